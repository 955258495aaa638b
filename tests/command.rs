use std::path::{Path, PathBuf};

use anyhow::Result;
use fxhash::FxHashSet as HashSet;

use safe_cluster_process::config::defs::{PipelineError, DEFAULT_OUTPUT_FLAGS, INPUT_PLACEHOLDER};
use safe_cluster_process::utils::command::CommandTemplate;


fn default_flags() -> Vec<String> {
    DEFAULT_OUTPUT_FLAGS.iter().map(|f| f.to_string()).collect()
}

fn parse(command: &str) -> Result<CommandTemplate, PipelineError> {
    CommandTemplate::parse(command, &default_flags(), INPUT_PLACEHOLDER)
}


#[test]
fn test_rewritten_output_paths_are_unique() -> Result<()> {
    let template = parse("humann_regroup_table -i {input} -g uniref90_rxn -o /results/rxn.biom")?;
    let mut seen = HashSet::default();
    for split_id in 0..250 {
        let path = template.for_split(split_id).output_path();
        assert_eq!(path.parent(), Some(Path::new("/results")));
        assert!(seen.insert(path));
    }
    assert_eq!(
        template.for_split(7).output_path(),
        PathBuf::from("/results/rxn_split_7.biom")
    );
    Ok(())
}


#[test]
fn test_only_output_token_changes() -> Result<()> {
    let template = parse("tool --mode 'two words' -i {input} --output-fp out.tsv.gz --threads 4")?;
    let split = template.for_split(3);
    assert_eq!(split.program(), "tool");
    assert_eq!(
        split.args(),
        &[
            "--mode".to_string(),
            "two words".to_string(),
            "-i".to_string(),
            "{input}".to_string(),
            "--output-fp".to_string(),
            "out_split_3.tsv.gz".to_string(),
            "--threads".to_string(),
            "4".to_string(),
        ]
    );
    let bound = split.bind_input(Path::new("/tmp/w/split_3/split_3.tsv"));
    assert_eq!(bound[3], "/tmp/w/split_3/split_3.tsv");
    assert_eq!(bound[5], "out_split_3.tsv.gz");
    Ok(())
}


#[test]
fn test_output_flag_count_must_be_one() {
    let err = parse("tool -i {input} -o a.biom -o b.biom").unwrap_err();
    assert!(matches!(err, PipelineError::AmbiguousOutput { found: 2, .. }));
    assert_eq!(err.exit_code(), 3);

    let err = parse("tool -i {input} > out.biom").unwrap_err();
    assert!(matches!(err, PipelineError::AmbiguousOutput { found: 0, .. }));
}


#[test]
fn test_placeholder_required() {
    let err = parse("tool -i table.biom -o out.biom").unwrap_err();
    assert!(matches!(err, PipelineError::MissingInputPlaceholder(_)));
    assert_eq!(err.exit_code(), 3);

    let custom = CommandTemplate::parse("tool -i @IN@ -o out.biom", &default_flags(), "@IN@");
    assert!(custom.is_ok());
}


#[test]
fn test_relative_output_resolved_against_launch_dir() -> Result<()> {
    let template = parse("tool -i {input} -o sub/out.biom")?.resolve_output(Path::new("/launch"));
    assert_eq!(template.output_path(), PathBuf::from("/launch/sub/out.biom"));
    assert_eq!(template.for_split(0).output_path(), PathBuf::from("/launch/sub/out_split_0.biom"));
    Ok(())
}


#[test]
fn test_unbalanced_quotes_rejected() {
    let err = parse("tool -i {input} -o 'out.biom").unwrap_err();
    assert!(matches!(err, PipelineError::InvalidTemplate(_)));
    assert_eq!(err.exit_code(), 3);
}


#[test]
fn test_placeholder_in_output_rejected() {
    let err = parse("tool -i {input} -o {input}_out.biom").unwrap_err();
    assert!(matches!(err, PipelineError::InvalidTemplate(_)));
    assert_eq!(err.exit_code(), 3);
}
