//! Engine log retention.

use std::path::Path;
use std::time::{Duration, SystemTime};

use serde::Serialize;
use tracing::{debug, info, warn};
use xpanel_common::Result;

/// Outcome of one sweep
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub files_removed: usize,
    pub bytes_freed: u64,
}

/// Engine access/error logs and their rotated siblings
pub fn is_engine_log(name: &str) -> bool {
    name.starts_with("access.log") || name.starts_with("error.log") || name.contains(".log.")
}

/// Delete engine logs in `dir` last modified more than `retention` before `now`.
///
/// A missing directory is reported and treated as nothing to do. Files that
/// cannot be inspected or removed are skipped.
pub async fn sweep_engine_logs(dir: &Path, retention: Duration, now: SystemTime) -> Result<SweepReport> {
    let mut report = SweepReport::default();

    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!("Log directory {:?} does not exist", dir);
            return Ok(report);
        }
        Err(e) => return Err(e.into()),
    };

    let cutoff = now.checked_sub(retention).unwrap_or(SystemTime::UNIX_EPOCH);

    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if !is_engine_log(name) {
            continue;
        }

        let metadata = match entry.metadata().await {
            Ok(m) if m.is_file() => m,
            Ok(_) => continue,
            Err(e) => {
                debug!("Skipping {}: {}", name, e);
                continue;
            }
        };

        let modified = match metadata.modified() {
            Ok(t) => t,
            Err(_) => continue,
        };
        if modified >= cutoff {
            continue;
        }

        match tokio::fs::remove_file(entry.path()).await {
            Ok(()) => {
                debug!("Deleted old log file {}", name);
                report.files_removed += 1;
                report.bytes_freed += metadata.len();
            }
            Err(e) => warn!("Failed to delete {}: {}", name, e),
        }
    }

    if report.files_removed > 0 {
        info!(
            "Log sweep removed {} files, freed {:.2} MB",
            report.files_removed,
            report.bytes_freed as f64 / (1024.0 * 1024.0)
        );
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    const DAY: Duration = Duration::from_secs(24 * 3600);

    #[test]
    fn test_name_patterns() {
        assert!(is_engine_log("access.log"));
        assert!(is_engine_log("access.log.1"));
        assert!(is_engine_log("error.log.2024-01-01"));
        assert!(is_engine_log("xray.log.3"));
        assert!(!is_engine_log("config.json"));
        assert!(!is_engine_log("panel.log"));
    }

    #[tokio::test]
    async fn test_sweeps_only_old_logs() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("access.log"), vec![0u8; 100]).unwrap();
        std::fs::write(dir.path().join("error.log.1"), vec![0u8; 50]).unwrap();
        std::fs::write(dir.path().join("keep.json"), b"{}").unwrap();

        // Nothing is older than a day yet
        let fresh = sweep_engine_logs(dir.path(), DAY, SystemTime::now()).await.unwrap();
        assert_eq!(fresh, SweepReport::default());

        // Two days later both logs have aged out
        let later = SystemTime::now() + 2 * DAY;
        let report = sweep_engine_logs(dir.path(), DAY, later).await.unwrap();
        assert_eq!(report.files_removed, 2);
        assert_eq!(report.bytes_freed, 150);
        assert!(dir.path().join("keep.json").exists());
        assert!(!dir.path().join("access.log").exists());
    }

    #[tokio::test]
    async fn test_missing_directory_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let report = sweep_engine_logs(&dir.path().join("nope"), DAY, SystemTime::now())
            .await
            .unwrap();
        assert_eq!(report.files_removed, 0);
    }
}
