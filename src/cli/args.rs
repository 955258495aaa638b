use std::path::PathBuf;
use clap::{Parser, ValueEnum};

#[derive(Debug, Clone, Copy, ValueEnum, Default, PartialEq)]
pub enum SampleOrder {
    #[default]
    Natural,
    Clustered,
}

#[derive(Debug, Clone, Copy, ValueEnum, Default, PartialEq)]
pub enum JoinOrder {
    #[default]
    Batch,
    Source,
}

#[derive(Parser, Debug, Clone, Default)]
#[command(name = "safe-cluster-process", version, about = "Run a memory-hungry table command on bounded sample batches and join the results")]
pub struct Arguments {

    #[arg(help = "Input feature table (BIOM/HDF5 or TSV)")]
    pub input: PathBuf,

    #[arg(help = "Command run on each batch, e.g. \"humann_regroup_table -i {input} -g uniref90_rxn -o out.biom\"")]
    pub command: String,

    #[arg(short = 'v', long = "verbose", action)]
    pub verbose: bool,

    #[arg(short = 'm', long = "max-samples", default_value_t = 100)]
    pub max_samples: usize,

    #[arg(short = 't', long = "num-threads", default_value_t = 1)]
    pub num_threads: usize,

    #[arg(long = "keep-temp", help = "Keep per-batch working directories and batch outputs")]
    pub keep_temp: bool,

    #[clap(
        long = "output-flag",
        value_delimiter = ',',
        default_value = "-o,--output,--output-fp",
        allow_hyphen_values = true,
        help = "Flag(s) that introduce the output path in the command"
    )]
    pub output_flags: Vec<String>,

    #[arg(long = "input-placeholder", default_value = "{input}")]
    pub input_placeholder: String,

    #[arg(long = "timeout-secs", help = "Per-batch wall-clock limit; no limit by default")]
    pub timeout_secs: Option<u64>,

    #[arg(long = "sample-order", default_value = "natural", value_enum)]
    pub sample_order: SampleOrder,

    #[arg(long = "join-order", default_value = "batch", value_enum)]
    pub join_order: JoinOrder,

    #[arg(long = "drop-empty-features", help = "Remove all-zero features from each batch input")]
    pub drop_empty_features: bool,

    #[arg(long = "check-features", help = "Fail if a batch output has features absent from the input")]
    pub check_features: bool,

    #[arg(long = "skip-sample-check", help = "Do not require batch outputs to keep their batch's samples")]
    pub skip_sample_check: bool,

    #[arg(long = "no-join", help = "Leave the per-batch outputs in place instead of joining them")]
    pub no_join: bool,

    #[arg(long = "temp-dir", help = "Parent directory for batch working directories")]
    pub temp_dir: Option<PathBuf>,
}
