// src/utils/system.rs: System functions

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Result};
use sysinfo::{CpuRefreshKind, MemoryRefreshKind, RefreshKind, System};
use tokio::time::sleep;


/// Determines the number of physical cores and the current CPU load.
///
/// # Returns
///
/// Result<(usize, f32)> physical cores, current cpu usage in percent
pub async fn detect_cores_and_load() -> Result<(usize, f32)> {
    let refresh_kind = RefreshKind::nothing().with_cpu(CpuRefreshKind::nothing().with_cpu_usage());
    let mut system = System::new_with_specifics(refresh_kind);
    system.refresh_cpu_all();
    let physical_cores = System::physical_core_count().unwrap_or(1);
    sleep(Duration::from_millis(100)).await;
    system.refresh_cpu_specifics(CpuRefreshKind::nothing().with_cpu_usage());
    let cpu_load = system.global_cpu_usage();
    Ok((physical_cores, cpu_load))
}


/// Finds the amount of total and available RAM, keyed to OS
///
/// # Returns
///
/// Result<(u64, u64)> total ram, available ram
pub fn detect_ram() -> Result<(u64, u64)> {
    let (total_ram, available_ram) = if cfg!(target_os = "macos") {
        let refresh_kind = RefreshKind::nothing().with_memory(MemoryRefreshKind::everything());
        let mut system = System::new_with_specifics(refresh_kind);
        system.refresh_memory_specifics(MemoryRefreshKind::everything());
        let total = system.total_memory();
        let used = system.used_memory();
        (total, total.saturating_sub(used))
    } else {
        let refresh_kind = RefreshKind::nothing().with_memory(MemoryRefreshKind::everything());
        let mut system = System::new_with_specifics(refresh_kind);
        system.refresh_memory();
        (system.total_memory(), system.available_memory())
    };

    if total_ram == 0 || available_ram == 0 {
        return Err(anyhow!("Failed to detect valid RAM values"));
    }

    Ok((total_ram, available_ram))
}


/// Caps the requested worker count at the number of batches; there is never a reason to hold
/// more pool slots than there is work.
///
/// # Arguments
///
/// * `requested` - `--num-threads` from the command line.
/// * `num_batches` - Batches produced by the splitter.
///
/// # Returns
/// usize, at least 1.
pub fn effective_workers(requested: usize, num_batches: usize) -> usize {
    requested.min(num_batches).max(1)
}


/// Parent directory for per-run working directories.
///
/// # Arguments
///
/// * `requested` - `--temp-dir`, if given.
/// * `cwd` - Launch directory; relative requests are anchored here.
///
/// # Returns
/// PathBuf: the requested directory, else the system temp dir.
pub fn temp_root(requested: Option<&PathBuf>, cwd: &PathBuf) -> PathBuf {
    match requested {
        Some(dir) if dir.is_absolute() => dir.clone(),
        Some(dir) => cwd.join(dir),
        None => std::env::temp_dir(),
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effective_workers() {
        assert_eq!(effective_workers(4, 2), 2);
        assert_eq!(effective_workers(1, 10), 1);
        assert_eq!(effective_workers(3, 0), 1);
    }

    #[test]
    fn test_temp_root() {
        let cwd = PathBuf::from("/work");
        assert_eq!(temp_root(Some(&PathBuf::from("tmp")), &cwd), PathBuf::from("/work/tmp"));
        assert_eq!(temp_root(Some(&PathBuf::from("/scratch")), &cwd), PathBuf::from("/scratch"));
        assert_eq!(temp_root(None, &cwd), std::env::temp_dir());
    }
}
