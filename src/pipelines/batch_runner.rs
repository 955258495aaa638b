// src/pipelines/batch_runner.rs: bounded-concurrency execution of batch commands
use std::fs;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use tokio::process::Command;
use tokio::sync::Semaphore;
use tokio::task::{self, JoinHandle};

use crate::config::defs::{BatchFailure, FailureKind, PipelineError, DIAGNOSTIC_TAIL_LINES};
use crate::utils::file::{is_nonempty_file, save_table};
use crate::utils::matrix::FeatureMatrix;
use crate::utils::streams::{diagnostic_text, LogSink};


/// What an executor is asked to run for one batch.
#[derive(Debug, Clone)]
pub struct ExecRequest {
    pub split_id: usize,
    pub program: String,
    pub args: Vec<String>,
    pub work_dir: PathBuf,
    pub input_path: PathBuf,
    pub output_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecStatus {
    Success,
    Exit(i32),
    Signalled,
    TimedOut(u64),
    SpawnFailed(String),
}

#[derive(Debug, Clone)]
pub struct ExecOutcome {
    pub status: ExecStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl ExecOutcome {
    pub fn success() -> Self {
        ExecOutcome { status: ExecStatus::Success, stdout: Vec::new(), stderr: Vec::new() }
    }

    pub fn failed(code: i32, stderr: &str) -> Self {
        ExecOutcome { status: ExecStatus::Exit(code), stdout: Vec::new(), stderr: stderr.as_bytes().to_vec() }
    }
}

/// Runs one batch command to completion.
///
/// Production runs use `SubprocessExecutor`; tests plug in-process executors in here.
#[async_trait]
pub trait BatchExecutor: Send + Sync {
    async fn execute(&self, request: ExecRequest) -> ExecOutcome;
}


/// Spawns the batch command as an OS process in the batch's working directory.
#[derive(Debug, Clone, Default)]
pub struct SubprocessExecutor {
    timeout: Option<Duration>,
}

impl SubprocessExecutor {
    pub fn new(timeout: Option<Duration>) -> Self {
        SubprocessExecutor { timeout }
    }
}

#[async_trait]
impl BatchExecutor for SubprocessExecutor {
    async fn execute(&self, request: ExecRequest) -> ExecOutcome {
        let mut cmd = Command::new(&request.program);
        cmd.args(&request.args)
            .current_dir(&request.work_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                return ExecOutcome {
                    status: ExecStatus::SpawnFailed(format!("{}: {}", request.program, e)),
                    stdout: Vec::new(),
                    stderr: Vec::new(),
                };
            }
        };

        // Dropping the wait future on timeout drops the child, which kills it.
        let waited = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, child.wait_with_output()).await {
                Ok(result) => result,
                Err(_) => {
                    return ExecOutcome {
                        status: ExecStatus::TimedOut(limit.as_secs()),
                        stdout: Vec::new(),
                        stderr: Vec::new(),
                    };
                }
            },
            None => child.wait_with_output().await,
        };

        match waited {
            Ok(output) => {
                let status = match output.status.code() {
                    Some(0) => ExecStatus::Success,
                    Some(code) => ExecStatus::Exit(code),
                    None => ExecStatus::Signalled,
                };
                ExecOutcome { status, stdout: output.stdout, stderr: output.stderr }
            }
            Err(e) => ExecOutcome {
                status: ExecStatus::SpawnFailed(format!("failed to wait on {}: {}", request.program, e)),
                stdout: Vec::new(),
                stderr: Vec::new(),
            },
        }
    }
}


/// One batch ready to run: its input matrix and the fully bound command.
#[derive(Debug, Clone)]
pub struct BatchJob {
    pub split_id: usize,
    pub matrix: FeatureMatrix,
    pub work_dir: PathBuf,
    pub input_path: PathBuf,
    pub program: String,
    pub args: Vec<String>,
    pub output_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedBatch {
    pub split_id: usize,
    pub output_path: PathBuf,
    pub samples: Vec<String>,
}

#[derive(Debug, Default)]
pub struct RunReport {
    /// Successful batches in `split_id` order.
    pub completed: Vec<CompletedBatch>,
    /// Failed batches in `split_id` order.
    pub failures: Vec<BatchFailure>,
    /// Batches never submitted because an earlier one failed.
    pub skipped: Vec<usize>,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn into_result(self) -> Result<Vec<CompletedBatch>, PipelineError> {
        if self.failures.is_empty() {
            Ok(self.completed)
        } else {
            Err(PipelineError::BatchExecution { failures: self.failures, skipped: self.skipped })
        }
    }
}


/// Runs batch jobs with at most `num_threads` in flight.
///
/// Jobs are submitted in `split_id` order. Once any batch fails, batches already running
/// are left to finish but no further batch is started; those are reported as skipped.
///
/// # Arguments
///
/// * `jobs` - Batches, one per split.
/// * `executor` - Runs the bound command of each batch.
/// * `num_threads` - Pool size, at least 1.
/// * `log` - Sink for per-batch log lines.
///
/// # Returns
/// RunReport once every submitted batch has settled.
pub async fn run_batches(
    mut jobs: Vec<BatchJob>,
    executor: Arc<dyn BatchExecutor>,
    num_threads: usize,
    log: LogSink,
) -> RunReport {
    jobs.sort_by_key(|j| j.split_id);
    let semaphore = Arc::new(Semaphore::new(num_threads.max(1)));
    let abort = Arc::new(AtomicBool::new(false));
    let failures: Arc<Mutex<Vec<BatchFailure>>> = Arc::new(Mutex::new(Vec::new()));

    let mut handles: Vec<(usize, JoinHandle<Option<CompletedBatch>>)> = Vec::new();
    let mut skipped = Vec::new();

    let mut pending = jobs.into_iter();
    while let Some(job) = pending.next() {
        if abort.load(Ordering::SeqCst) {
            skipped.push(job.split_id);
            skipped.extend(pending.by_ref().map(|j| j.split_id));
            break;
        }
        let permit = match semaphore.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                skipped.push(job.split_id);
                continue;
            }
        };
        // A failure may have landed while waiting for the slot.
        if abort.load(Ordering::SeqCst) {
            drop(permit);
            skipped.push(job.split_id);
            skipped.extend(pending.by_ref().map(|j| j.split_id));
            break;
        }

        let split_id = job.split_id;
        let executor = executor.clone();
        let abort = abort.clone();
        let failures = failures.clone();
        let log = log.clone();
        let handle = tokio::spawn(async move {
            let result = run_one(job, executor, &log).await;
            let completed = match result {
                Ok(done) => Some(done),
                Err(failure) => {
                    log.error(failure.split_id, format!("Batch failed: {}", failure.kind));
                    abort.store(true, Ordering::SeqCst);
                    failures.lock().unwrap_or_else(|p| p.into_inner()).push(failure);
                    None
                }
            };
            // Released only after the failure is visible to the submit loop.
            drop(permit);
            completed
        });
        handles.push((split_id, handle));
    }

    if !skipped.is_empty() {
        log.send(
            log::Level::Warn,
            None,
            format!("Not submitting {} batch(es) after a failure: {:?}", skipped.len(), skipped),
        );
    }

    let settled = join_all(handles.into_iter().map(|(split_id, handle)| async move { (split_id, handle.await) })).await;
    let mut completed = Vec::new();
    for (split_id, result) in settled {
        match result {
            Ok(Some(done)) => completed.push(done),
            Ok(None) => {}
            Err(e) => failures.lock().unwrap_or_else(|p| p.into_inner()).push(BatchFailure {
                split_id,
                kind: FailureKind::SpawnFailed(format!("batch task aborted: {}", e)),
                diagnostics: String::new(),
            }),
        }
    }

    let mut failures = std::mem::take(&mut *failures.lock().unwrap_or_else(|p| p.into_inner()));
    failures.sort_by_key(|f| f.split_id);
    completed.sort_by_key(|c: &CompletedBatch| c.split_id);

    RunReport { completed, failures, skipped }
}


async fn run_one(job: BatchJob, executor: Arc<dyn BatchExecutor>, log: &LogSink) -> Result<CompletedBatch, BatchFailure> {
    let split_id = job.split_id;
    let samples = job.matrix.sample_ids().to_vec();

    let work_dir = job.work_dir.clone();
    let input_path = job.input_path.clone();
    let output_path = job.output_path.clone();
    let matrix = job.matrix;
    // The output name is deterministic, so a file from an earlier run must not count as this
    // batch's artifact.
    let written = task::spawn_blocking(move || -> anyhow::Result<bool> {
        fs::create_dir_all(&work_dir)?;
        let stale = match fs::remove_file(&output_path) {
            Ok(()) => true,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
            Err(e) => {
                return Err(anyhow::anyhow!("Cannot clear previous output {}: {}", output_path.display(), e));
            }
        };
        save_table(&matrix, &input_path)?;
        Ok(stale)
    })
    .await;
    let input_error = match written {
        Ok(Ok(stale)) => {
            if stale {
                log.warn(split_id, format!("Removed previous output {}", job.output_path.display()));
            }
            None
        }
        Ok(Err(e)) => Some(e.to_string()),
        Err(e) => Some(e.to_string()),
    };
    if let Some(error) = input_error {
        return Err(BatchFailure { split_id, kind: FailureKind::InputWrite(error), diagnostics: String::new() });
    }
    log.debug(split_id, format!("Wrote {} samples to {}", samples.len(), job.input_path.display()));

    let request = ExecRequest {
        split_id,
        program: job.program,
        args: job.args,
        work_dir: job.work_dir,
        input_path: job.input_path,
        output_path: job.output_path.clone(),
    };
    log.info(split_id, format!("Running {} {}", request.program, request.args.join(" ")));
    let outcome = executor.execute(request).await;
    let diagnostics = diagnostic_text(&outcome.stdout, &outcome.stderr, DIAGNOSTIC_TAIL_LINES);

    let kind = match outcome.status {
        ExecStatus::Success => {
            if is_nonempty_file(&job.output_path) {
                if !diagnostics.is_empty() {
                    log.debug(split_id, diagnostics);
                }
                log.info(split_id, format!("Finished: {}", job.output_path.display()));
                return Ok(CompletedBatch { split_id, output_path: job.output_path, samples });
            }
            FailureKind::MissingArtifact(job.output_path)
        }
        ExecStatus::Exit(code) => FailureKind::NonZeroExit(code),
        ExecStatus::Signalled => FailureKind::Signalled,
        ExecStatus::TimedOut(secs) => FailureKind::TimedOut(secs),
        ExecStatus::SpawnFailed(e) => FailureKind::SpawnFailed(e),
    };
    Err(BatchFailure { split_id, kind, diagnostics })
}
