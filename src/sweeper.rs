//! Retention sweep for downloaded demos.
//!
//! Deletes `.dem` and `.dem.bz2` artifacts whose modification time is
//! strictly older than the configured age. A failed deletion is logged and
//! the sweep moves on.

use serde::Serialize;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::Result;

const ARTIFACT_SUFFIXES: [&str; 2] = [".dem", ".dem.bz2"];

#[derive(Debug, Clone)]
pub struct RetentionConfig {
    pub directory: PathBuf,
    pub max_age: Duration,
    pub interval: Duration,
}

impl RetentionConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            directory: config.temp_dir.clone(),
            max_age: config.retention_max_age(),
            interval: config.sweep_interval(),
        }
    }
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct SweepReport {
    pub scanned: usize,
    pub deleted: Vec<PathBuf>,
    pub failed: Vec<PathBuf>,
}

pub fn is_artifact(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| ARTIFACT_SUFFIXES.iter().any(|suffix| name.ends_with(suffix)))
}

pub async fn sweep_older_than(directory: &Path, max_age: Duration) -> Result<SweepReport> {
    sweep_older_than_at(directory, max_age, SystemTime::now()).await
}

/// Sweep as if the current time were `now`.
pub async fn sweep_older_than_at(
    directory: &Path,
    max_age: Duration,
    now: SystemTime,
) -> Result<SweepReport> {
    let mut report = SweepReport::default();
    let mut entries = match tokio::fs::read_dir(directory).await {
        Ok(entries) => entries,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            debug!(directory = %directory.display(), "Demo directory absent, nothing to sweep");
            return Ok(report);
        }
        Err(err) => return Err(err.into()),
    };

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if !is_artifact(&path) {
            continue;
        }

        let metadata = match entry.metadata().await {
            Ok(metadata) if metadata.is_file() => metadata,
            Ok(_) => continue,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "Failed to stat demo artifact");
                report.failed.push(path);
                continue;
            }
        };
        report.scanned += 1;

        let modified = match metadata.modified() {
            Ok(modified) => modified,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "Artifact has no modification time");
                report.failed.push(path);
                continue;
            }
        };

        let age = now.duration_since(modified).unwrap_or(Duration::ZERO);
        if age <= max_age {
            continue;
        }

        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                info!(path = %path.display(), age_secs = age.as_secs(), "Deleted stale demo artifact");
                report.deleted.push(path);
            }
            Err(err) => {
                warn!(path = %path.display(), error = %err, "Failed to delete stale demo artifact");
                report.failed.push(path);
            }
        }
    }

    Ok(report)
}

/// Run the sweep every `interval` until the returned token is cancelled.
pub fn spawn_retention_sweeper(config: RetentionConfig) -> CancellationToken {
    let cancel = CancellationToken::new();
    let cancel_clone = cancel.clone();

    tokio::spawn(async move {
        run_sweep_loop(config, cancel_clone).await;
    });

    cancel
}

async fn run_sweep_loop(config: RetentionConfig, cancel: CancellationToken) {
    let mut ticker = interval(config.interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    info!(
        directory = %config.directory.display(),
        max_age_secs = config.max_age.as_secs(),
        interval_secs = config.interval.as_secs(),
        "Retention sweeper started"
    );

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("Retention sweeper shutting down");
                break;
            }
            _ = ticker.tick() => {
                match sweep_older_than(&config.directory, config.max_age).await {
                    Ok(report) if !report.deleted.is_empty() || !report.failed.is_empty() => {
                        info!(
                            scanned = report.scanned,
                            deleted = report.deleted.len(),
                            failed = report.failed.len(),
                            "Retention sweep finished"
                        );
                    }
                    Ok(_) => {}
                    Err(err) => warn!(error = %err, "Retention sweep failed"),
                }
            }
        }
    }
}
