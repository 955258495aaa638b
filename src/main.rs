use std::env;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use env_logger::Builder;
use log::{debug, error, info, warn, LevelFilter};

use safe_cluster_process::cli::parse;
use safe_cluster_process::config::defs::RunConfig;
use safe_cluster_process::pipelines::safe_cluster;
use safe_cluster_process::utils::file::absolutize;
use safe_cluster_process::utils::system::{detect_cores_and_load, detect_ram, temp_root};


#[tokio::main]
async fn main() -> Result<()> {
    let run_start = Instant::now();

    let args = parse();

    let log_level = if args.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    Builder::new()
        .filter_level(log_level)
        .format(|buf, record| {
            writeln!(
                buf,
                "[{}] {}: {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.args()
            )
        })
        .init();

    let dir = env::current_dir()?;
    debug!("The current directory is {:?}", dir);

    let (max_cores, cpu_load) = detect_cores_and_load().await?;
    debug!("Detected {} physical cores; CPU load {}%", max_cores, cpu_load);

    let available_ram = match detect_ram() {
        Ok((total_ram, available_ram)) => {
            debug!("Available RAM: {} bytes (~{} GiB)", available_ram, available_ram / 1_073_741_824);
            debug!("Total RAM: {} bytes (~{} GiB)", total_ram, total_ram / 1_073_741_824);
            available_ram
        }
        Err(e) => {
            warn!("{}", e);
            0
        }
    };

    let input = absolutize(&args.input, &dir);
    info!("Input: {}", input.display());
    info!("Command: {}", args.command);
    info!(
        "Up to {} samples per batch, {} batch(es) at a time",
        args.max_samples, args.num_threads
    );

    let temp_root: PathBuf = temp_root(args.temp_dir.as_ref(), &dir);
    let run_config = Arc::new(RunConfig {
        cwd: dir,
        temp_root,
        args,
        max_cores,
        available_ram,
    });

    match safe_cluster::run(run_config).await {
        Ok(summary) => {
            match &summary.output_path {
                Some(path) => info!(
                    "Processed {} samples x {} features in {} batch(es); output {}",
                    summary.samples,
                    summary.features,
                    summary.batches,
                    path.display()
                ),
                None => {
                    for path in &summary.batch_outputs {
                        info!("Batch output: {}", path.display());
                    }
                }
            }
            info!("Run complete: {} milliseconds.", run_start.elapsed().as_millis());
            Ok(())
        }
        Err(e) => {
            error!("Pipeline failed: {} at {} milliseconds.", e, run_start.elapsed().as_millis());
            std::process::exit(e.exit_code());
        }
    }
}
