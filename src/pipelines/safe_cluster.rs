use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use fxhash::FxHashSet as HashSet;
use log::{debug, info, warn};
use tokio::task;

use crate::cli::Arguments;
use crate::config::defs::{
    PipelineError, RunConfig, DEFAULT_OUTPUT_FLAGS, INPUT_PLACEHOLDER, SPLIT_TAG,
};
use crate::pipelines::batch_runner::{run_batches, BatchExecutor, BatchJob, CompletedBatch, SubprocessExecutor};
use crate::utils::command::CommandTemplate;
use crate::utils::file::{absolutize, batch_input_name, load_table, save_table, table_format};
use crate::utils::join::{join_tables, BatchTable, JoinOptions};
use crate::utils::matrix::FeatureMatrix;
use crate::utils::split::split_matrix;
use crate::utils::streams::LogSink;
use crate::utils::system::effective_workers;


/// What a finished run produced.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub batches: usize,
    pub samples: usize,
    pub features: usize,
    /// Joined table, or `None` with `--no-join`.
    pub output_path: Option<PathBuf>,
    /// Per-batch outputs still on disk.
    pub batch_outputs: Vec<PathBuf>,
    /// Working directory root, if kept.
    pub work_dir: Option<PathBuf>,
}


/// Parses the command template with the configured flags and placeholder, and anchors a
/// relative output path at `cwd`.
///
/// # Arguments
///
/// * `args` - Parsed command line.
/// * `cwd` - Launch directory.
///
/// # Returns
/// Result<CommandTemplate, PipelineError>
pub fn prepare_template(args: &Arguments, cwd: &Path) -> Result<CommandTemplate, PipelineError> {
    let output_flags: Vec<String> = if args.output_flags.is_empty() {
        DEFAULT_OUTPUT_FLAGS.iter().map(|f| f.to_string()).collect()
    } else {
        args.output_flags.clone()
    };
    let placeholder = if args.input_placeholder.is_empty() {
        INPUT_PLACEHOLDER
    } else {
        args.input_placeholder.as_str()
    };
    let template = CommandTemplate::parse(&args.command, &output_flags, placeholder)?;
    Ok(template.resolve_output(cwd))
}


/// Run function for the split / process / join pipeline with real subprocesses.
///
/// # Arguments
///
/// * `config` - RunConfig struct from main.
///
/// # Returns
/// Result<RunSummary, PipelineError>
pub async fn run(config: Arc<RunConfig>) -> Result<RunSummary, PipelineError> {
    let template = prepare_template(&config.args, &config.cwd)?;
    let program = template.check_program()?;
    debug!("Using {} for {}", program.display(), template.program());
    let executor = Arc::new(SubprocessExecutor::new(config.args.timeout_secs.map(Duration::from_secs)));
    run_with_executor(config, executor).await
}


/// Same as `run` with the batch commands handed to `executor`.
pub async fn run_with_executor(
    config: Arc<RunConfig>,
    executor: Arc<dyn BatchExecutor>,
) -> Result<RunSummary, PipelineError> {
    let args = &config.args;

    // Template problems surface before any input is read.
    let template = prepare_template(args, &config.cwd)?;
    let output_path = template.output_path();
    if !args.no_join {
        table_format(&output_path).map_err(|e| PipelineError::InvalidTemplate(e.to_string()))?;
    }
    if args.max_samples == 0 {
        return Err(PipelineError::InvalidConfig("--max-samples must be at least 1".to_string()));
    }
    if args.num_threads == 0 {
        return Err(PipelineError::InvalidConfig("--num-threads must be at least 1".to_string()));
    }

    let input_path = absolutize(&args.input, &config.cwd);
    if !input_path.is_file() {
        return Err(PipelineError::IOError(format!("Input file not found: {}", input_path.display())));
    }
    let input_format = table_format(&input_path).map_err(|e| PipelineError::InvalidConfig(e.to_string()))?;
    info!("Loading {} ({})", input_path.display(), input_format);
    let matrix = read_matrix(input_path.clone()).await?;
    info!(
        "Input has {} features x {} samples ({} non-zero)",
        matrix.n_observations(),
        matrix.n_samples(),
        matrix.nnz()
    );

    let batches = split_matrix(&matrix, args.max_samples, args.sample_order, args.drop_empty_features)?;
    info!(
        "Split into {} batch(es) of at most {} samples ({:?} order)",
        batches.len(),
        args.max_samples,
        args.sample_order
    );

    fs::create_dir_all(&config.temp_root)
        .map_err(|e| PipelineError::IOError(format!("Cannot create {}: {}", config.temp_root.display(), e)))?;
    let work_root = tempfile::Builder::new()
        .prefix("safe_cluster_")
        .tempdir_in(&config.temp_root)
        .map_err(|e| PipelineError::IOError(format!("Cannot create working directory: {}", e)))?;
    debug!("Working directory: {}", work_root.path().display());

    if let Some(parent) = output_path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| PipelineError::IOError(format!("Cannot create {}: {}", parent.display(), e)))?;
    }

    let n_batches = batches.len();
    let jobs: Vec<BatchJob> = batches
        .into_iter()
        .map(|batch| {
            let work_dir = work_root.path().join(format!("{}_{}", SPLIT_TAG, batch.split_id));
            let batch_input = work_dir.join(batch_input_name(batch.split_id, input_format));
            let split_template = template.for_split(batch.split_id);
            BatchJob {
                split_id: batch.split_id,
                args: split_template.bind_input(&batch_input),
                program: split_template.program().to_string(),
                output_path: split_template.output_path(),
                input_path: batch_input,
                work_dir,
                matrix: batch.matrix,
            }
        })
        .collect();

    let workers = effective_workers(args.num_threads, n_batches);
    if workers > config.max_cores {
        warn!(
            "Running {} batches at once on {} physical cores; each batch command may also be multithreaded",
            workers, config.max_cores
        );
    }
    let input_bytes = fs::metadata(&input_path).map(|m| m.len()).unwrap_or(0);
    if config.available_ram > 0 && input_bytes.saturating_mul(workers as u64) > config.available_ram {
        warn!(
            "{} concurrent batches of a {} byte table may exceed the {} bytes of available RAM",
            workers, input_bytes, config.available_ram
        );
    }

    let (log, drain) = LogSink::spawn();
    let report = run_batches(jobs, executor, workers, log.clone()).await;
    drop(log);
    if let Err(e) = drain.await {
        warn!("Log drain ended abnormally: {}", e);
    }

    let work_dir = if args.keep_temp {
        let kept = work_root.keep();
        info!("Kept working directory {}", kept.display());
        Some(kept)
    } else {
        None
    };

    let batch_outputs: Vec<PathBuf> = report.completed.iter().map(|c| c.output_path.clone()).collect();
    let completed = match report.into_result() {
        Ok(completed) => completed,
        Err(e) => {
            // Failed batches keep whatever they wrote.
            if !args.keep_temp {
                remove_outputs(&batch_outputs);
            }
            return Err(e);
        }
    };

    if args.no_join {
        info!("Skipping join; {} batch output(s) left in place", batch_outputs.len());
        return Ok(RunSummary {
            batches: n_batches,
            samples: matrix.n_samples(),
            features: matrix.n_observations(),
            output_path: None,
            batch_outputs,
            work_dir,
        });
    }

    let options = JoinOptions {
        feature_universe: args
            .check_features
            .then(|| matrix.observation_ids().iter().cloned().collect::<HashSet<String>>()),
        order: args.join_order,
        source_samples: Some(matrix.sample_ids().to_vec()),
        table_id: Some(matrix.table_id.clone()),
    };
    let joined = join_outputs(completed, options, !args.skip_sample_check).await?;
    info!(
        "Joined {} batch output(s): {} features x {} samples",
        n_batches,
        joined.n_observations(),
        joined.n_samples()
    );
    write_matrix(joined, output_path.clone()).await?;
    info!("Wrote {}", output_path.display());

    let batch_outputs = if args.keep_temp {
        batch_outputs
    } else {
        remove_outputs(&batch_outputs);
        Vec::new()
    };

    Ok(RunSummary {
        batches: n_batches,
        samples: matrix.n_samples(),
        features: matrix.n_observations(),
        output_path: Some(output_path),
        batch_outputs,
        work_dir,
    })
}


async fn read_matrix(path: PathBuf) -> Result<FeatureMatrix, PipelineError> {
    let display = path.display().to_string();
    task::spawn_blocking(move || load_table(&path))
        .await
        .map_err(|e| PipelineError::IOError(e.to_string()))?
        .map_err(|e| PipelineError::MatrixFormat { path: display, error: e.to_string() })
}


async fn write_matrix(matrix: FeatureMatrix, path: PathBuf) -> Result<(), PipelineError> {
    task::spawn_blocking(move || {
        save_table(&matrix, &path).map_err(|e| PipelineError::IOError(format!("{}: {}", path.display(), e)))
    })
    .await
    .map_err(|e| PipelineError::IOError(e.to_string()))?
}


/// Reads every batch output and joins them. Nothing is written if the join fails.
async fn join_outputs(
    completed: Vec<CompletedBatch>,
    options: JoinOptions,
    check_samples: bool,
) -> Result<FeatureMatrix, PipelineError> {
    task::spawn_blocking(move || {
        let mut tables = Vec::with_capacity(completed.len());
        for batch in completed {
            let matrix = load_table(&batch.output_path).map_err(|e| PipelineError::MatrixFormat {
                path: batch.output_path.display().to_string(),
                error: e.to_string(),
            })?;
            tables.push(BatchTable {
                split_id: batch.split_id,
                matrix,
                expected_samples: check_samples.then_some(batch.samples),
            });
        }
        join_tables(tables, &options)
    })
    .await
    .map_err(|e| PipelineError::IOError(e.to_string()))?
}


fn remove_outputs(paths: &[PathBuf]) {
    for path in paths {
        match fs::remove_file(path) {
            Ok(()) => debug!("Removed {}", path.display()),
            Err(e) => warn!("Could not remove {}: {}", path.display(), e),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::defs::TableFormat;

    fn arguments(command: &str) -> Arguments {
        Arguments {
            input: PathBuf::from("in.tsv"),
            command: command.to_string(),
            max_samples: 100,
            num_threads: 1,
            ..Default::default()
        }
    }

    #[test]
    fn test_prepare_template_uses_defaults_and_cwd() {
        let template = prepare_template(&arguments("tool -i {input} --output-fp res/out.biom"), Path::new("/runs/a")).unwrap();
        assert_eq!(template.output_path(), PathBuf::from("/runs/a/res/out.biom"));
        assert_eq!(table_format(&template.output_path()).unwrap(), TableFormat::Biom);
    }

    #[test]
    fn test_prepare_template_custom_flag() {
        let mut args = arguments("tool -i {input} --table out.tsv");
        args.output_flags = vec!["--table".to_string()];
        let template = prepare_template(&args, Path::new("/w")).unwrap();
        assert_eq!(template.output_path(), PathBuf::from("/w/out.tsv"));
        assert!(matches!(
            prepare_template(&arguments("tool -i {input} --table out.tsv"), Path::new("/w")),
            Err(PipelineError::AmbiguousOutput { found: 0, .. })
        ));
    }
}
