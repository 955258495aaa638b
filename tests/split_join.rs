use anyhow::Result;
use fxhash::FxHashSet as HashSet;

use safe_cluster_process::config::defs::PipelineError;
use safe_cluster_process::utils::join::{join_tables, BatchTable, JoinOptions};
use safe_cluster_process::utils::matrix::FeatureMatrix;
use safe_cluster_process::utils::split::{clustered_sample_order, split_matrix};
use safe_cluster_process::utils::synthetic::matrix_generator;
use safe_cluster_process::{JoinOrder, SampleOrder};


fn as_tables(batches: Vec<safe_cluster_process::utils::split::Batch>) -> Vec<BatchTable> {
    batches
        .into_iter()
        .map(|b| BatchTable {
            split_id: b.split_id,
            expected_samples: Some(b.sample_ids().to_vec()),
            matrix: b.matrix,
        })
        .collect()
}


#[test]
fn test_150_columns_make_100_and_50() -> Result<()> {
    let matrix = matrix_generator(20, 150, 0.2, 42)?;
    let batches = split_matrix(&matrix, 100, SampleOrder::Natural, false)?;
    let sizes: Vec<usize> = batches.iter().map(|b| b.matrix.n_samples()).collect();
    assert_eq!(sizes, vec![100, 50]);
    assert_eq!(batches[1].sample_ids()[0], "sample_100");
    Ok(())
}


#[test]
fn test_split_join_round_trip() -> Result<()> {
    let matrix = matrix_generator(60, 53, 0.15, 7)?;
    for max_samples in [1, 2, 7, 52, 53, 54, 1000] {
        let batches = split_matrix(&matrix, max_samples, SampleOrder::Natural, false)?;
        assert_eq!(batches.len(), (53 + max_samples - 1) / max_samples);
        assert!(batches.iter().all(|b| b.matrix.n_samples() <= max_samples));
        for (i, b) in batches.iter().enumerate() {
            assert_eq!(b.split_id, i);
        }

        let mut tables = as_tables(batches);
        tables.reverse();
        let joined = join_tables(tables, &JoinOptions::default())?;
        assert!(joined.same_content(&matrix), "max_samples={}", max_samples);
    }
    Ok(())
}


#[test]
fn test_clustered_split_restores_source_order() -> Result<()> {
    let matrix = matrix_generator(40, 30, 0.25, 99)?;
    let batches = split_matrix(&matrix, 8, SampleOrder::Clustered, true)?;
    assert_eq!(batches.len(), 4);

    let mut columns: Vec<usize> = batches.iter().flat_map(|b| b.columns.clone()).collect();
    assert_eq!(columns, clustered_sample_order(&matrix));
    columns.sort_unstable();
    assert_eq!(columns, (0..30).collect::<Vec<usize>>());

    let universe: HashSet<String> = matrix.observation_ids().iter().cloned().collect();
    let options = JoinOptions {
        feature_universe: Some(universe),
        order: JoinOrder::Source,
        source_samples: Some(matrix.sample_ids().to_vec()),
        table_id: None,
    };
    let joined = join_tables(as_tables(batches), &options)?;
    assert_eq!(joined.sample_ids(), matrix.sample_ids());
    for sample in matrix.sample_ids() {
        for feature in matrix.observation_ids() {
            assert_eq!(
                joined.get(feature, sample).unwrap_or(0.0),
                matrix.get(feature, sample).unwrap_or(0.0)
            );
        }
    }
    Ok(())
}


#[test]
fn test_empty_input_and_zero_batch_size() -> Result<()> {
    let empty = FeatureMatrix::from_triplets("empty", vec!["f1".to_string()], Vec::new(), Vec::new())?;
    let err = split_matrix(&empty, 10, SampleOrder::Natural, false).unwrap_err();
    assert!(matches!(err, PipelineError::EmptyInput(_)));
    assert_eq!(err.exit_code(), 2);

    let matrix = matrix_generator(3, 3, 0.5, 1)?;
    assert!(matches!(
        split_matrix(&matrix, 0, SampleOrder::Natural, false),
        Err(PipelineError::InvalidConfig(_))
    ));
    Ok(())
}


#[test]
fn test_batch_output_rows_may_differ() -> Result<()> {
    // A tool that regroups features produces different rows per batch.
    let a = FeatureMatrix::from_dense(
        "a",
        vec!["RXN-1".into(), "RXN-2".into()],
        vec!["s0".into(), "s1".into()],
        &[vec![1.0, 2.0], vec![0.0, 5.0]],
    )?;
    let b = FeatureMatrix::from_dense("b", vec!["RXN-3".into()], vec!["s2".into()], &[vec![7.0]])?;
    let joined = join_tables(
        vec![
            BatchTable { split_id: 1, matrix: b, expected_samples: None },
            BatchTable { split_id: 0, matrix: a, expected_samples: None },
        ],
        &JoinOptions::default(),
    )?;
    assert_eq!(joined.n_observations(), 3);
    assert_eq!(joined.n_samples(), 3);
    assert_eq!(joined.get("RXN-3", "s0"), Some(0.0));
    assert_eq!(joined.get("RXN-1", "s2"), Some(0.0));
    assert_eq!(joined.get("RXN-3", "s2"), Some(7.0));
    Ok(())
}
