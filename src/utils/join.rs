// src/utils/join.rs: merging per-batch result tables

use fxhash::{FxHashMap as HashMap, FxHashSet as HashSet};

use crate::cli::JoinOrder;
use crate::config::defs::PipelineError;
use crate::utils::matrix::FeatureMatrix;

/// A batch output loaded from disk, tagged with its split.
#[derive(Debug, Clone)]
pub struct BatchTable {
    pub split_id: usize,
    pub matrix: FeatureMatrix,
    /// Samples the batch was given; checked against the output when present.
    pub expected_samples: Option<Vec<String>>,
}

/// Checks applied while joining.
#[derive(Debug, Clone, Default)]
pub struct JoinOptions {
    /// Every output feature must be in this set.
    pub feature_universe: Option<HashSet<String>>,
    /// Final column order: `Batch` keeps split order; `Source` follows this sample list.
    pub order: JoinOrder,
    pub source_samples: Option<Vec<String>>,
    pub table_id: Option<String>,
}


/// Joins batch outputs into one matrix.
///
/// Batches are taken in `split_id` order whatever order they arrive in. Columns are the
/// concatenation of each batch's columns; rows are the union of all batch rows in order of
/// first appearance. A row missing from a batch is zero for that batch's samples.
///
/// # Arguments
///
/// * `tables` - Successful batch outputs.
/// * `options` - Feature/sample checks and the column order.
///
/// # Returns
/// Result<FeatureMatrix, PipelineError>. `JoinConflict` if a sample id appears in two batches.
pub fn join_tables(mut tables: Vec<BatchTable>, options: &JoinOptions) -> Result<FeatureMatrix, PipelineError> {
    tables.sort_by_key(|t| t.split_id);

    let mut owner: HashMap<String, usize> = HashMap::default();
    for table in &tables {
        check_samples(table)?;
        if let Some(universe) = &options.feature_universe {
            if let Some(unknown) = table.matrix.observation_ids().iter().find(|f| !universe.contains(*f)) {
                return Err(PipelineError::UnknownFeature {
                    split_id: table.split_id,
                    feature: unknown.clone(),
                });
            }
        }
        for sample in table.matrix.sample_ids() {
            if let Some(&first) = owner.get(sample) {
                return Err(PipelineError::JoinConflict {
                    sample: sample.clone(),
                    first,
                    second: table.split_id,
                });
            }
            owner.insert(sample.clone(), table.split_id);
        }
    }

    let mut row_index: HashMap<String, usize> = HashMap::default();
    let mut observation_ids: Vec<String> = Vec::new();
    let mut sample_ids: Vec<String> = Vec::new();
    let mut triplets = Vec::new();

    for table in &tables {
        let local_to_global: Vec<usize> = table
            .matrix
            .observation_ids()
            .iter()
            .map(|id| {
                *row_index.entry(id.clone()).or_insert_with(|| {
                    observation_ids.push(id.clone());
                    observation_ids.len() - 1
                })
            })
            .collect();
        for col in 0..table.matrix.n_samples() {
            let global_col = sample_ids.len();
            sample_ids.push(table.matrix.sample_ids()[col].clone());
            for (row, value) in table.matrix.column(col) {
                triplets.push((local_to_global[row], global_col, value));
            }
        }
    }

    let table_id = options
        .table_id
        .clone()
        .or_else(|| tables.first().map(|t| t.matrix.table_id.clone()))
        .unwrap_or_default();
    let joined = FeatureMatrix::from_triplets(&table_id, observation_ids, sample_ids, triplets)
        .map_err(|e| PipelineError::MatrixFormat { path: table_id.clone(), error: e.to_string() })?;

    match (options.order, &options.source_samples) {
        (JoinOrder::Source, Some(source)) => {
            let present: HashSet<&str> = joined.sample_ids().iter().map(String::as_str).collect();
            let order: Vec<String> = source.iter().filter(|s| present.contains(s.as_str())).cloned().collect();
            if order.len() != joined.n_samples() {
                return Err(PipelineError::InvalidConfig(
                    "Source sample order does not cover the joined samples; use --join-order batch".to_string(),
                ));
            }
            joined
                .reorder_samples(&order)
                .map_err(|e| PipelineError::MatrixFormat { path: table_id, error: e.to_string() })
        }
        _ => Ok(joined),
    }
}

fn check_samples(table: &BatchTable) -> Result<(), PipelineError> {
    let expected = match &table.expected_samples {
        Some(expected) => expected,
        None => return Ok(()),
    };
    let got: HashSet<&str> = table.matrix.sample_ids().iter().map(String::as_str).collect();
    let want: HashSet<&str> = expected.iter().map(String::as_str).collect();
    if got == want {
        return Ok(());
    }
    let mut missing: Vec<&str> = want.difference(&got).copied().collect();
    let mut unexpected: Vec<&str> = got.difference(&want).copied().collect();
    missing.sort_unstable();
    unexpected.sort_unstable();
    Err(PipelineError::SampleMismatch {
        split_id: table.split_id,
        missing: missing.join(", "),
        unexpected: unexpected.join(", "),
    })
}
