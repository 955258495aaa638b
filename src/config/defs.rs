use std::fmt;
use std::path::PathBuf;
use crate::cli::Arguments;
use lazy_static::lazy_static;
use std::collections::HashMap;
use thiserror::Error;

// Command template
pub const INPUT_PLACEHOLDER: &str = "{input}";
pub const DEFAULT_OUTPUT_FLAGS: &[&'static str] = &["-o", "--output", "--output-fp"];
pub const SPLIT_TAG: &str = "split";

// Table formats
pub const BIOM_TAG: &str = "biom";
pub const TSV_TAG: &str = "tsv";
pub const GZIP_EXT: &str = "gz";
pub const COMPRESSION_EXTS: &[&'static str] = &["gz", "bz2", "xz", "zst"];

lazy_static! {
    pub static ref TABLE_FORMATS: HashMap<&'static str, TableFormat> = {
        let mut m = HashMap::new();
        m.insert("biom", TableFormat::Biom);
        m.insert("h5", TableFormat::Biom);
        m.insert("hdf5", TableFormat::Biom);
        m.insert("tsv", TableFormat::Tsv);
        m.insert("txt", TableFormat::Tsv);
        m
    };
}

// Static Parameters
pub const DEFAULT_MAX_SAMPLES: usize = 100;
pub const DIAGNOSTIC_TAIL_LINES: usize = 20;
pub const HDF5_CHUNK_SIZE: usize = 1000;
pub const BIOM_FORMAT_URL: &str = "http://biom-format.org";
pub const BIOM_TABLE_TYPE: &str = "Gene table";
pub const GENERATED_BY: &str = concat!("safe-cluster-process ", env!("CARGO_PKG_VERSION"));


#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableFormat {
    Biom,
    Tsv,
}

impl fmt::Display for TableFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TableFormat::Biom => write!(f, "{}", BIOM_TAG),
            TableFormat::Tsv => write!(f, "{}", TSV_TAG),
        }
    }
}


pub struct RunConfig {
    pub cwd: PathBuf,
    pub temp_root: PathBuf,
    pub args: Arguments,
    pub max_cores: usize,
    pub available_ram: u64,
}


#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    NonZeroExit(i32),
    Signalled,
    TimedOut(u64),
    SpawnFailed(String),
    InputWrite(String),
    MissingArtifact(PathBuf),
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::NonZeroExit(code) => write!(f, "exited with code {}", code),
            FailureKind::Signalled => write!(f, "terminated by signal"),
            FailureKind::TimedOut(secs) => write!(f, "timed out after {}s", secs),
            FailureKind::SpawnFailed(e) => write!(f, "failed to spawn: {}", e),
            FailureKind::InputWrite(e) => write!(f, "failed to write batch input: {}", e),
            FailureKind::MissingArtifact(path) => {
                write!(f, "reported success but output {} is missing or empty", path.display())
            }
        }
    }
}

/// One failed batch with the tail of whatever the command printed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchFailure {
    pub split_id: usize,
    pub kind: FailureKind,
    pub diagnostics: String,
}

impl fmt::Display for BatchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "split {} {}", self.split_id, self.kind)?;
        if !self.diagnostics.is_empty() {
            write!(f, "\n{}", self.diagnostics)?;
        }
        Ok(())
    }
}

fn format_batch_failures(failures: &[BatchFailure], skipped: &[usize]) -> String {
    let ids: Vec<String> = failures.iter().map(|f| f.split_id.to_string()).collect();
    let mut msg = format!("{} batch(es) failed (split_id: {})", failures.len(), ids.join(", "));
    if !skipped.is_empty() {
        let skipped: Vec<String> = skipped.iter().map(|s| s.to_string()).collect();
        msg.push_str(&format!("; not submitted: {}", skipped.join(", ")));
    }
    for failure in failures {
        msg.push_str(&format!("\n--- {}", failure));
    }
    msg
}


#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Input matrix {0} has no sample columns")]
    EmptyInput(String),

    #[error("Command template must contain exactly one output path (flags: {flags}); found {found}")]
    AmbiguousOutput { flags: String, found: usize },

    #[error("Command template has no input placeholder '{0}'")]
    MissingInputPlaceholder(String),

    #[error("Invalid command template: {0}")]
    InvalidTemplate(String),

    #[error("{}", format_batch_failures(.failures, .skipped))]
    BatchExecution { failures: Vec<BatchFailure>, skipped: Vec<usize> },

    #[error("Join conflict: sample '{sample}' is present in the outputs of split {first} and split {second}")]
    JoinConflict { sample: String, first: usize, second: usize },

    #[error("Sample mismatch in split {split_id}: missing [{missing}], unexpected [{unexpected}]")]
    SampleMismatch { split_id: usize, missing: String, unexpected: String },

    #[error("Split {split_id} output contains feature '{feature}' not present in the input matrix")]
    UnknownFeature { split_id: usize, feature: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Tool {tool} failed: {error}")]
    ToolExecution { tool: String, error: String },

    #[error("Matrix format error in {path}: {error}")]
    MatrixFormat { path: String, error: String },

    #[error("IO error: {0}")]
    IOError(String),
}

impl PipelineError {
    /// Process exit code for this error kind.
    pub fn exit_code(&self) -> i32 {
        match self {
            PipelineError::EmptyInput(_) => 2,
            PipelineError::AmbiguousOutput { .. }
            | PipelineError::MissingInputPlaceholder(_)
            | PipelineError::InvalidTemplate(_) => 3,
            PipelineError::BatchExecution { .. } => 4,
            PipelineError::JoinConflict { .. }
            | PipelineError::SampleMismatch { .. }
            | PipelineError::UnknownFeature { .. } => 5,
            _ => 1,
        }
    }

    /// Failed split ids for a batch execution error, empty for anything else.
    pub fn failed_splits(&self) -> Vec<usize> {
        match self {
            PipelineError::BatchExecution { failures, .. } => {
                failures.iter().map(|f| f.split_id).collect()
            }
            _ => Vec::new(),
        }
    }
}
