use crate::config::types::ArchiveConfig;
use crate::ingress::event::BusEnvelope;
use crate::ingress::pattern::EventPattern;
use chrono::{DateTime, NaiveDate, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const DAY_FILE_EXTENSION: &str = "jsonl";

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("archive I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode envelope: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Bus archive: every matching envelope appended to one JSON-lines file per
/// day, pruned once it falls out of the retention window.
#[derive(Debug)]
pub struct BusArchive {
    root: PathBuf,
    retention: Duration,
    pattern: EventPattern,
    // Appends from concurrent requests must not interleave within a line
    write_lock: Mutex<()>,
}

impl BusArchive {
    pub async fn open(config: &ArchiveConfig, pattern: EventPattern) -> Result<Self, ArchiveError> {
        tokio::fs::create_dir_all(&config.path).await?;
        Ok(Self {
            root: config.path.clone(),
            retention: config.retention,
            pattern,
            write_lock: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn day_file(&self, date: NaiveDate) -> PathBuf {
        self.root
            .join(format!("{}.{}", date.format("%Y-%m-%d"), DAY_FILE_EXTENSION))
    }

    /// Append an envelope to its day file. Returns `false` when the archive
    /// pattern does not select it.
    pub async fn append(&self, envelope: &BusEnvelope) -> Result<bool, ArchiveError> {
        if !self.pattern.matches(envelope) {
            return Ok(false);
        }

        let mut line = serde_json::to_vec(envelope)?;
        line.push(b'\n');
        let path = self.day_file(envelope.time.date_naive());

        let _guard = self.write_lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(&line).await?;
        file.flush().await?;

        Ok(true)
    }

    /// Days currently held, oldest first
    pub async fn days(&self) -> Result<Vec<NaiveDate>, ArchiveError> {
        let mut days = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            if let Some(date) = parse_day_file(&entry.path()) {
                days.push(date);
            }
        }
        days.sort();
        Ok(days)
    }

    /// Delete day files that lie entirely before `now - retention`
    pub async fn prune(&self, now: DateTime<Utc>) -> Result<Vec<NaiveDate>, ArchiveError> {
        let retention = chrono::Duration::from_std(self.retention)
            .unwrap_or_else(|_| chrono::Duration::days(36500));
        let cutoff = (now - retention).date_naive();

        let _guard = self.write_lock.lock().await;
        let mut removed = Vec::new();
        for day in self.days().await? {
            if day < cutoff {
                tokio::fs::remove_file(self.day_file(day)).await?;
                removed.push(day);
            }
        }

        if !removed.is_empty() {
            info!(
                removed = removed.len(),
                cutoff = %cutoff,
                "Pruned expired archive days"
            );
        }
        Ok(removed)
    }
}

fn parse_day_file(path: &Path) -> Option<NaiveDate> {
    if path.extension()?.to_str()? != DAY_FILE_EXTENSION {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    NaiveDate::parse_from_str(stem, "%Y-%m-%d").ok()
}

/// Prune on a fixed interval until cancelled
pub async fn run_pruner(archive: Arc<BusArchive>, interval: Duration, shutdown: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                match archive.prune(Utc::now()).await {
                    Ok(removed) => debug!(removed = removed.len(), "Archive prune pass complete"),
                    Err(e) => warn!(error = %e, "Archive prune failed"),
                }
            }
        }
    }

    debug!("Archive pruner stopped");
}
