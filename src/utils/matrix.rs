// src/utils/matrix.rs: sparse feature x sample abundance matrix

use anyhow::{anyhow, Result};
use fxhash::{FxHashMap as HashMap, FxHashSet as HashSet};

/// Sparse feature-abundance matrix with named rows (features) and named columns (samples).
///
/// Stored column-major (CSC): column `j` owns `indices[indptr[j]..indptr[j + 1]]` (row
/// positions, ascending) and the matching `data` values. Explicit zeros are never stored.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureMatrix {
    pub table_id: String,
    observation_ids: Vec<String>,
    sample_ids: Vec<String>,
    indptr: Vec<usize>,
    indices: Vec<usize>,
    data: Vec<f64>,
}

impl FeatureMatrix {
    /// Builds a matrix from (row, col, value) triplets.
    ///
    /// # Arguments
    ///
    /// * `table_id` - Identifier carried into written files.
    /// * `observation_ids` - Row ids, must be unique.
    /// * `sample_ids` - Column ids, must be unique.
    /// * `triplets` - Coordinates and values. Duplicates are summed, zeros dropped.
    ///
    /// # Returns
    /// anyhow::Result<FeatureMatrix>
    pub fn from_triplets(
        table_id: &str,
        observation_ids: Vec<String>,
        sample_ids: Vec<String>,
        triplets: Vec<(usize, usize, f64)>,
    ) -> Result<Self> {
        check_unique(&observation_ids, "observation")?;
        check_unique(&sample_ids, "sample")?;

        let nrows = observation_ids.len();
        let ncols = sample_ids.len();
        let mut columns: Vec<Vec<(usize, f64)>> = vec![Vec::new(); ncols];
        for (row, col, value) in triplets {
            if row >= nrows || col >= ncols {
                return Err(anyhow!(
                    "Index ({}, {}) exceeds matrix dimensions ({}, {})",
                    row, col, nrows, ncols
                ));
            }
            if !value.is_finite() {
                return Err(anyhow!("Non-finite value {} at ({}, {})", value, row, col));
            }
            columns[col].push((row, value));
        }

        let mut indptr = Vec::with_capacity(ncols + 1);
        let mut indices = Vec::new();
        let mut data = Vec::new();
        indptr.push(0);
        for mut column in columns {
            column.sort_by_key(|&(row, _)| row);
            let mut iter = column.into_iter().peekable();
            while let Some((row, mut value)) = iter.next() {
                while let Some(&(next_row, next_value)) = iter.peek() {
                    if next_row != row {
                        break;
                    }
                    value += next_value;
                    iter.next();
                }
                if value != 0.0 {
                    indices.push(row);
                    data.push(value);
                }
            }
            indptr.push(indices.len());
        }

        Ok(FeatureMatrix {
            table_id: table_id.to_string(),
            observation_ids,
            sample_ids,
            indptr,
            indices,
            data,
        })
    }

    /// Builds a matrix from compressed sparse column arrays as stored in BIOM files.
    pub fn from_csc(
        table_id: &str,
        observation_ids: Vec<String>,
        sample_ids: Vec<String>,
        indptr: Vec<usize>,
        indices: Vec<usize>,
        data: Vec<f64>,
    ) -> Result<Self> {
        if indptr.len() != sample_ids.len() + 1 {
            return Err(anyhow!(
                "indptr has {} entries for {} samples",
                indptr.len(),
                sample_ids.len()
            ));
        }
        if indices.len() != data.len() || indptr.last().copied() != Some(indices.len()) {
            return Err(anyhow!(
                "Inconsistent sparse arrays: {} indices, {} values, indptr ends at {:?}",
                indices.len(),
                data.len(),
                indptr.last()
            ));
        }
        let mut triplets = Vec::with_capacity(data.len());
        for col in 0..sample_ids.len() {
            let (start, end) = (indptr[col], indptr[col + 1]);
            if start > end {
                return Err(anyhow!("indptr is not monotonic at column {}", col));
            }
            for k in start..end {
                triplets.push((indices[k], col, data[k]));
            }
        }
        Self::from_triplets(table_id, observation_ids, sample_ids, triplets)
    }

    /// Row-major dense input, mostly for tests and small tables.
    pub fn from_dense(
        table_id: &str,
        observation_ids: Vec<String>,
        sample_ids: Vec<String>,
        rows: &[Vec<f64>],
    ) -> Result<Self> {
        if rows.len() != observation_ids.len() {
            return Err(anyhow!(
                "{} rows of values for {} observation ids",
                rows.len(),
                observation_ids.len()
            ));
        }
        let mut triplets = Vec::new();
        for (r, row) in rows.iter().enumerate() {
            if row.len() != sample_ids.len() {
                return Err(anyhow!(
                    "Row {} has {} values, expected {}",
                    observation_ids[r],
                    row.len(),
                    sample_ids.len()
                ));
            }
            for (c, &value) in row.iter().enumerate() {
                triplets.push((r, c, value));
            }
        }
        Self::from_triplets(table_id, observation_ids, sample_ids, triplets)
    }

    pub fn n_observations(&self) -> usize {
        self.observation_ids.len()
    }

    pub fn n_samples(&self) -> usize {
        self.sample_ids.len()
    }

    pub fn nnz(&self) -> usize {
        self.data.len()
    }

    pub fn observation_ids(&self) -> &[String] {
        &self.observation_ids
    }

    pub fn sample_ids(&self) -> &[String] {
        &self.sample_ids
    }

    /// Non-zero entries of one sample column as (row, value).
    pub fn column(&self, col: usize) -> impl Iterator<Item = (usize, f64)> + '_ {
        let (start, end) = (self.indptr[col], self.indptr[col + 1]);
        self.indices[start..end]
            .iter()
            .copied()
            .zip(self.data[start..end].iter().copied())
    }

    /// Rows present (non-zero) in a column.
    pub fn column_rows(&self, col: usize) -> &[usize] {
        &self.indices[self.indptr[col]..self.indptr[col + 1]]
    }

    /// Value lookup by ids; absent entries are zero.
    pub fn get(&self, observation_id: &str, sample_id: &str) -> Option<f64> {
        let row = self.observation_ids.iter().position(|o| o == observation_id)?;
        let col = self.sample_ids.iter().position(|s| s == sample_id)?;
        let rows = self.column_rows(col);
        Some(match rows.binary_search(&row) {
            Ok(k) => self.data[self.indptr[col] + k],
            Err(_) => 0.0,
        })
    }

    pub fn csc_parts(&self) -> (&[usize], &[usize], &[f64]) {
        (&self.indptr, &self.indices, &self.data)
    }

    /// Converts to compressed sparse row arrays (indptr, column indices, values), the layout
    /// BIOM stores under `observation/matrix`.
    pub fn to_csr(&self) -> (Vec<usize>, Vec<usize>, Vec<f64>) {
        let nrows = self.n_observations();
        let mut counts = vec![0usize; nrows + 1];
        for &row in &self.indices {
            counts[row + 1] += 1;
        }
        for r in 0..nrows {
            counts[r + 1] += counts[r];
        }
        let indptr = counts.clone();
        let mut next = counts;
        let mut indices = vec![0usize; self.nnz()];
        let mut data = vec![0f64; self.nnz()];
        for col in 0..self.n_samples() {
            for (row, value) in self.column(col) {
                let slot = next[row];
                indices[slot] = col;
                data[slot] = value;
                next[row] += 1;
            }
        }
        (indptr, indices, data)
    }

    /// New matrix holding the given columns, in the given order. Row set is unchanged.
    pub fn select_samples(&self, columns: &[usize]) -> Result<FeatureMatrix> {
        let mut sample_ids = Vec::with_capacity(columns.len());
        let mut indptr = Vec::with_capacity(columns.len() + 1);
        let mut indices = Vec::new();
        let mut data = Vec::new();
        indptr.push(0);
        for &col in columns {
            if col >= self.n_samples() {
                return Err(anyhow!("Sample index {} out of range ({} samples)", col, self.n_samples()));
            }
            sample_ids.push(self.sample_ids[col].clone());
            let (start, end) = (self.indptr[col], self.indptr[col + 1]);
            indices.extend_from_slice(&self.indices[start..end]);
            data.extend_from_slice(&self.data[start..end]);
            indptr.push(indices.len());
        }
        check_unique(&sample_ids, "sample")?;
        Ok(FeatureMatrix {
            table_id: self.table_id.clone(),
            observation_ids: self.observation_ids.clone(),
            sample_ids,
            indptr,
            indices,
            data,
        })
    }

    /// Drops rows without any non-zero value.
    pub fn remove_empty_observations(&mut self) {
        let mut keep = vec![false; self.n_observations()];
        for &row in &self.indices {
            keep[row] = true;
        }
        if keep.iter().all(|&k| k) {
            return;
        }
        let mut remap = vec![usize::MAX; keep.len()];
        let mut observation_ids = Vec::new();
        for (row, id) in self.observation_ids.drain(..).enumerate() {
            if keep[row] {
                remap[row] = observation_ids.len();
                observation_ids.push(id);
            }
        }
        for row in self.indices.iter_mut() {
            *row = remap[*row];
        }
        self.observation_ids = observation_ids;
    }

    /// Reorders columns to follow `order` (a list of sample ids covering every column once).
    pub fn reorder_samples(&self, order: &[String]) -> Result<FeatureMatrix> {
        if order.len() != self.n_samples() {
            return Err(anyhow!("Sample order has {} ids, matrix has {}", order.len(), self.n_samples()));
        }
        let position: HashMap<&str, usize> = self
            .sample_ids
            .iter()
            .enumerate()
            .map(|(i, s)| (s.as_str(), i))
            .collect();
        let columns = order
            .iter()
            .map(|s| {
                position
                    .get(s.as_str())
                    .copied()
                    .ok_or_else(|| anyhow!("Sample '{}' is not in the matrix", s))
            })
            .collect::<Result<Vec<usize>>>()?;
        self.select_samples(&columns)
    }

    /// Compares ids and values regardless of row order; column order must match.
    pub fn same_content(&self, other: &FeatureMatrix) -> bool {
        if self.sample_ids != other.sample_ids || self.n_observations() != other.n_observations() {
            return false;
        }
        let other_rows: HashMap<&str, usize> = other
            .observation_ids
            .iter()
            .enumerate()
            .map(|(i, o)| (o.as_str(), i))
            .collect();
        let mut remap = Vec::with_capacity(self.n_observations());
        for id in &self.observation_ids {
            match other_rows.get(id.as_str()) {
                Some(&row) => remap.push(row),
                None => return false,
            }
        }
        for col in 0..self.n_samples() {
            let mut mine: Vec<(usize, f64)> = self.column(col).map(|(r, v)| (remap[r], v)).collect();
            mine.sort_by_key(|&(r, _)| r);
            let theirs: Vec<(usize, f64)> = other.column(col).collect();
            if mine != theirs {
                return false;
            }
        }
        true
    }
}

fn check_unique(ids: &[String], axis: &str) -> Result<()> {
    let mut seen = HashSet::default();
    for id in ids {
        if !seen.insert(id.as_str()) {
            return Err(anyhow!("Duplicate {} id '{}'", axis, id));
        }
    }
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::*;

    fn ids(prefix: &str, n: usize) -> Vec<String> {
        (0..n).map(|i| format!("{}{}", prefix, i)).collect()
    }

    #[test]
    fn test_from_triplets_sums_and_drops_zeros() -> Result<()> {
        let m = FeatureMatrix::from_triplets(
            "t",
            ids("f", 3),
            ids("s", 2),
            vec![(0, 0, 1.0), (0, 0, 2.0), (2, 1, 0.0), (1, 1, 4.5)],
        )?;
        assert_eq!(m.nnz(), 2);
        assert_eq!(m.get("f0", "s0"), Some(3.0));
        assert_eq!(m.get("f2", "s1"), Some(0.0));
        assert_eq!(m.get("f1", "s1"), Some(4.5));
        assert_eq!(m.get("missing", "s1"), None);
        Ok(())
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let dup = vec!["a".to_string(), "a".to_string()];
        assert!(FeatureMatrix::from_triplets("t", ids("f", 1), dup, vec![]).is_err());
    }

    #[test]
    fn test_to_csr_matches_csc() -> Result<()> {
        let m = FeatureMatrix::from_dense(
            "t",
            ids("f", 3),
            ids("s", 3),
            &[vec![1.0, 0.0, 2.0], vec![0.0, 0.0, 0.0], vec![0.0, 3.0, 4.0]],
        )?;
        let (indptr, indices, data) = m.to_csr();
        assert_eq!(indptr, vec![0, 2, 2, 4]);
        assert_eq!(indices, vec![0, 2, 1, 2]);
        assert_eq!(data, vec![1.0, 2.0, 3.0, 4.0]);
        Ok(())
    }

    #[test]
    fn test_select_and_prune() -> Result<()> {
        let m = FeatureMatrix::from_dense(
            "t",
            ids("f", 3),
            ids("s", 3),
            &[vec![1.0, 0.0, 2.0], vec![0.0, 5.0, 0.0], vec![0.0, 3.0, 4.0]],
        )?;
        let mut sub = m.select_samples(&[2, 0])?;
        assert_eq!(sub.sample_ids(), &["s2".to_string(), "s0".to_string()]);
        assert_eq!(sub.n_observations(), 3);
        sub.remove_empty_observations();
        assert_eq!(sub.observation_ids(), &["f0".to_string(), "f2".to_string()]);
        assert_eq!(sub.get("f2", "s2"), Some(4.0));
        assert_eq!(sub.get("f0", "s0"), Some(1.0));
        Ok(())
    }

    #[test]
    fn test_same_content_ignores_row_order() -> Result<()> {
        let a = FeatureMatrix::from_dense(
            "a",
            vec!["x".into(), "y".into()],
            ids("s", 2),
            &[vec![1.0, 0.0], vec![0.0, 2.0]],
        )?;
        let b = FeatureMatrix::from_dense(
            "b",
            vec!["y".into(), "x".into()],
            ids("s", 2),
            &[vec![0.0, 2.0], vec![1.0, 0.0]],
        )?;
        assert!(a.same_content(&b));
        let c = b.reorder_samples(&["s1".to_string(), "s0".to_string()])?;
        assert!(!a.same_content(&c));
        Ok(())
    }
}
