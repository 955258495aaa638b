// src/utils/split.rs: partitioning a matrix into bounded sample batches

use crate::cli::SampleOrder;
use crate::config::defs::PipelineError;
use crate::utils::matrix::FeatureMatrix;

/// A column subset of the source matrix.
#[derive(Debug, Clone)]
pub struct Batch {
    pub split_id: usize,
    /// Source column indices, in batch column order.
    pub columns: Vec<usize>,
    pub matrix: FeatureMatrix,
}

impl Batch {
    pub fn sample_ids(&self) -> &[String] {
        self.matrix.sample_ids()
    }
}


/// Greedy partition of an ordered column list into chunks of at most `max_samples`.
///
/// # Arguments
///
/// * `order` - Column indices in the order batches are filled.
/// * `max_samples` - Batch size ceiling, must be positive.
///
/// # Returns
/// Vec of column index groups; group `i` becomes `split_id` `i`.
pub fn plan_batches(order: &[usize], max_samples: usize) -> Result<Vec<Vec<usize>>, PipelineError> {
    if max_samples == 0 {
        return Err(PipelineError::InvalidConfig("max_samples must be at least 1".to_string()));
    }
    Ok(order.chunks(max_samples).map(|c| c.to_vec()).collect())
}


/// Splits a matrix into sample batches.
///
/// # Arguments
///
/// * `matrix` - Source table.
/// * `max_samples` - Batch size ceiling.
/// * `order` - Natural column order, or the leaf order of a clustering of the samples.
/// * `drop_empty_features` - Remove features that are all-zero inside a batch.
///
/// # Returns
/// Batches in `split_id` order. A source with `max_samples` or fewer samples yields one batch
/// holding the whole table.
pub fn split_matrix(
    matrix: &FeatureMatrix,
    max_samples: usize,
    order: SampleOrder,
    drop_empty_features: bool,
) -> Result<Vec<Batch>, PipelineError> {
    if matrix.n_samples() == 0 {
        return Err(PipelineError::EmptyInput(matrix.table_id.clone()));
    }
    if max_samples == 0 {
        return Err(PipelineError::InvalidConfig("max_samples must be at least 1".to_string()));
    }

    if max_samples >= matrix.n_samples() {
        let mut whole = matrix.clone();
        if drop_empty_features {
            whole.remove_empty_observations();
        }
        return Ok(vec![Batch {
            split_id: 0,
            columns: (0..matrix.n_samples()).collect(),
            matrix: whole,
        }]);
    }

    let column_order = match order {
        SampleOrder::Natural => (0..matrix.n_samples()).collect(),
        SampleOrder::Clustered => clustered_sample_order(matrix),
    };

    plan_batches(&column_order, max_samples)?
        .into_iter()
        .enumerate()
        .map(|(split_id, columns)| {
            let mut sub = matrix
                .select_samples(&columns)
                .map_err(|e| PipelineError::InvalidConfig(e.to_string()))?;
            if drop_empty_features {
                sub.remove_empty_observations();
            }
            Ok(Batch { split_id, columns, matrix: sub })
        })
        .collect()
}


/// Orders samples so that ones sharing features end up adjacent.
///
/// Samples are clustered by average linkage (UPGMA) on the Jaccard distance between their
/// presence/absence profiles, and the tree's leaves are read left to right. The subtree whose
/// smallest column index is lower always goes left, and distance ties go to the lower index,
/// so the order only depends on the data.
pub fn clustered_sample_order(matrix: &FeatureMatrix) -> Vec<usize> {
    let n = matrix.n_samples();
    if n <= 2 {
        return (0..n).collect();
    }
    let distances = jaccard_distances(matrix);
    upgma_leaf_order(distances, n)
}

fn jaccard_distances(matrix: &FeatureMatrix) -> Vec<f64> {
    let n = matrix.n_samples();
    let mut distances = vec![0.0; n * n];
    for a in 0..n {
        let rows_a = matrix.column_rows(a);
        for b in (a + 1)..n {
            let rows_b = matrix.column_rows(b);
            let shared = sorted_intersection_size(rows_a, rows_b);
            let union = rows_a.len() + rows_b.len() - shared;
            let d = if union == 0 { 0.0 } else { 1.0 - shared as f64 / union as f64 };
            distances[a * n + b] = d;
            distances[b * n + a] = d;
        }
    }
    distances
}

fn sorted_intersection_size(a: &[usize], b: &[usize]) -> usize {
    let (mut i, mut j, mut count) = (0, 0, 0);
    while i < a.len() && j < b.len() {
        if a[i] == b[j] {
            count += 1;
            i += 1;
            j += 1;
        } else if a[i] < b[j] {
            i += 1;
        } else {
            j += 1;
        }
    }
    count
}

/// Average-linkage clustering by nearest-neighbour chain. A merged cluster keeps the slot of
/// its lower-numbered member. Returns leaf order.
fn upgma_leaf_order(mut distances: Vec<f64>, n: usize) -> Vec<usize> {
    let mut active = vec![true; n];
    let mut sizes = vec![1usize; n];
    let mut leaves: Vec<Vec<usize>> = (0..n).map(|i| vec![i]).collect();
    let mut remaining = n;
    let mut chain: Vec<usize> = Vec::new();

    while remaining > 1 {
        if chain.is_empty() {
            let first = (0..n).find(|&i| active[i]).unwrap_or(0);
            chain.push(first);
        }
        let a = chain[chain.len() - 1];
        let previous = if chain.len() >= 2 { Some(chain[chain.len() - 2]) } else { None };

        let mut nearest = usize::MAX;
        let mut nearest_dist = f64::INFINITY;
        if let Some(p) = previous {
            nearest = p;
            nearest_dist = distances[a * n + p];
        }
        for k in 0..n {
            if !active[k] || k == a {
                continue;
            }
            let d = distances[a * n + k];
            if d < nearest_dist {
                nearest = k;
                nearest_dist = d;
            }
        }

        if Some(nearest) == previous {
            chain.pop();
            chain.pop();
            let b = nearest;
            let (keep, gone) = (a.min(b), a.max(b));
            let (size_keep, size_gone) = (sizes[keep] as f64, sizes[gone] as f64);
            for k in 0..n {
                if !active[k] || k == keep || k == gone {
                    continue;
                }
                let d = (size_keep * distances[keep * n + k] + size_gone * distances[gone * n + k])
                    / (size_keep + size_gone);
                distances[keep * n + k] = d;
                distances[k * n + keep] = d;
            }
            active[gone] = false;
            sizes[keep] += sizes[gone];

            let gone_leaves = std::mem::take(&mut leaves[gone]);
            // Leaf lists are built so their first element is their smallest index.
            if gone_leaves[0] < leaves[keep][0] {
                let keep_leaves = std::mem::replace(&mut leaves[keep], gone_leaves);
                leaves[keep].extend(keep_leaves);
            } else {
                leaves[keep].extend(gone_leaves);
            }
            remaining -= 1;
        } else {
            chain.push(nearest);
        }
    }

    let root = (0..n).find(|&i| active[i]).unwrap_or(0);
    std::mem::take(&mut leaves[root])
}


#[cfg(test)]
mod tests {
    use super::*;

    fn presence_matrix(profiles: &[&[usize]], n_features: usize) -> FeatureMatrix {
        let observation_ids = (0..n_features).map(|i| format!("f{}", i)).collect();
        let sample_ids = (0..profiles.len()).map(|i| format!("s{}", i)).collect();
        let mut triplets = Vec::new();
        for (col, rows) in profiles.iter().enumerate() {
            for &row in rows.iter() {
                triplets.push((row, col, 1.0));
            }
        }
        FeatureMatrix::from_triplets("t", observation_ids, sample_ids, triplets).unwrap()
    }

    #[test]
    fn test_plan_batches_greedy() {
        let order: Vec<usize> = (0..7).collect();
        let plan = plan_batches(&order, 3).unwrap();
        assert_eq!(plan, vec![vec![0, 1, 2], vec![3, 4, 5], vec![6]]);
        assert!(plan_batches(&order, 0).is_err());
    }

    #[test]
    fn test_clustered_order_groups_similar_samples() {
        // s0/s2 share features 0-2, s1/s3 share features 3-5.
        let m = presence_matrix(&[&[0, 1, 2], &[3, 4, 5], &[0, 1], &[3, 4, 5]], 6);
        let order = clustered_sample_order(&m);
        assert_eq!(order.len(), 4);
        let pos = |s: usize| order.iter().position(|&x| x == s).unwrap();
        assert_eq!((pos(0) as isize - pos(2) as isize).abs(), 1);
        assert_eq!((pos(1) as isize - pos(3) as isize).abs(), 1);
        assert_eq!(order[0], 0);
    }

    #[test]
    fn test_clustered_order_is_a_permutation_and_stable() {
        let m = presence_matrix(&[&[0], &[0], &[1], &[], &[0, 1], &[2]], 3);
        let first = clustered_sample_order(&m);
        let second = clustered_sample_order(&m);
        assert_eq!(first, second);
        let mut sorted = first.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, (0..6).collect::<Vec<usize>>());
    }

    #[test]
    fn test_drop_empty_features_per_batch() {
        let m = presence_matrix(&[&[0], &[1], &[2]], 3);
        let batches = split_matrix(&m, 2, SampleOrder::Natural, true).unwrap();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].matrix.n_observations(), 2);
        assert_eq!(batches[1].matrix.observation_ids(), &["f2".to_string()]);
    }
}
