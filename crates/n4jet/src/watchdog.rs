//! Resource watchdog: samples process memory and free disk space every 5 s
//! and requests cancellation with a resource reason when a threshold is
//! breached. The export pipeline treats that as fatal with cleanup.

use export::{CancelFlag, CancelReason};
use std::path::PathBuf;
use std::time::Duration;
use sysinfo::{Disks, System};

const SAMPLE_INTERVAL: Duration = Duration::from_secs(5);

pub fn spawn(
    max_memory_mb: u64,
    min_disk_gb: u64,
    output_directory: PathBuf,
    cancel: CancelFlag,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let pid = match sysinfo::get_current_pid() {
            Ok(pid) => pid,
            Err(err) => {
                tracing::warn!(error = %err, "watchdog disabled: cannot resolve own pid");
                return;
            }
        };
        let output_directory = output_directory
            .canonicalize()
            .unwrap_or(output_directory);
        let mut system = System::new();
        let mut disks = Disks::new_with_refreshed_list();

        loop {
            tokio::time::sleep(SAMPLE_INTERVAL).await;
            if cancel.is_cancelled() {
                return;
            }

            system.refresh_process(pid);
            if let Some(process) = system.process(pid) {
                let rss_mb = process.memory() / (1024 * 1024);
                tracing::trace!(rss_mb, "watchdog memory sample");
                if rss_mb > max_memory_mb {
                    cancel.cancel(CancelReason::Resource(format!(
                        "process memory {rss_mb} MiB exceeds the {max_memory_mb} MiB limit"
                    )));
                    return;
                }
            }

            disks.refresh();
            if let Some(free_gb) = free_space_gb(&disks, &output_directory) {
                tracing::trace!(free_gb, "watchdog disk sample");
                if free_gb < min_disk_gb {
                    cancel.cancel(CancelReason::Resource(format!(
                        "free disk space {free_gb} GiB below the {min_disk_gb} GiB minimum"
                    )));
                    return;
                }
            }
        }
    })
}

/// Free space on the disk holding `path`: the mounted filesystem with the
/// longest mount-point prefix of the path.
fn free_space_gb(disks: &Disks, path: &std::path::Path) -> Option<u64> {
    disks
        .list()
        .iter()
        .filter(|disk| path.starts_with(disk.mount_point()))
        .max_by_key(|disk| disk.mount_point().as_os_str().len())
        .map(|disk| disk.available_space() / (1024 * 1024 * 1024))
}
