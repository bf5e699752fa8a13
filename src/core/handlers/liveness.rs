//! Liveness monitor.
//!
//! Reads a marker file written by whatever owns the auxiliary long-lived connection and,
//! while that connection is up, counts one synthetic request per tick. This keeps
//! `num_of_requests` moving for instances that are busy without proxying traffic, so an
//! idle-based reaper does not stop them.
use std::{path::PathBuf, sync::Arc, time::Duration};

use prometheus::IntCounter;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;

use crate::{config::LivenessConfig, ports::file_system::MarkerReader};

/// Marker content meaning the auxiliary connection is alive.
pub const ALIVE_SENTINEL: &str = "1";

/// Result of a single marker check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LivenessOutcome {
    /// No marker file; nothing to do
    Absent,
    /// Marker reads `1`; the counter was incremented
    Alive,
    /// Marker exists with any other content
    NotAlive,
    /// Marker exists but could not be read
    ReadFailed,
}

pub struct LivenessMonitor {
    marker_path: PathBuf,
    interval: Duration,
    reader: Arc<dyn MarkerReader>,
    counter: IntCounter,
}

impl LivenessMonitor {
    pub fn new(
        config: &LivenessConfig,
        reader: Arc<dyn MarkerReader>,
        counter: IntCounter,
    ) -> Self {
        Self {
            marker_path: config.marker_path.clone(),
            interval: config.interval(),
            reader,
            counter,
        }
    }

    /// Check the marker once.
    pub async fn tick(&self) -> LivenessOutcome {
        match self.reader.read_marker(&self.marker_path).await {
            Ok(None) => LivenessOutcome::Absent,
            Ok(Some(content)) if content.trim() == ALIVE_SENTINEL => {
                self.counter.inc();
                LivenessOutcome::Alive
            }
            Ok(Some(content)) => {
                tracing::debug!(
                    path = %self.marker_path.display(),
                    content = %content.trim(),
                    "Liveness marker does not report an open connection"
                );
                LivenessOutcome::NotAlive
            }
            Err(e) => {
                tracing::warn!(
                    path = %self.marker_path.display(),
                    error = %e,
                    "Failed to read liveness marker"
                );
                LivenessOutcome::ReadFailed
            }
        }
    }

    /// Check the marker every interval until `shutdown` is cancelled.
    ///
    /// The first check happens one interval after the call.
    pub async fn run(self, shutdown: CancellationToken) {
        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::debug!(
            path = %self.marker_path.display(),
            interval_secs = self.interval.as_secs(),
            "Liveness monitor started"
        );

        loop {
            tokio::select! {
                () = shutdown.cancelled() => {
                    tracing::debug!("Liveness monitor stopped");
                    return;
                }
                _ = ticker.tick() => {
                    self.tick().await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use async_trait::async_trait;
    use prometheus::Opts;
    use tempfile::TempDir;

    use super::*;
    use crate::{
        adapters::FileSystemAdapter,
        ports::file_system::{FileSystemError, FileSystemResult},
    };

    struct FailingReader;

    #[async_trait]
    impl MarkerReader for FailingReader {
        async fn read_marker(&self, _path: &Path) -> FileSystemResult<Option<String>> {
            Err(FileSystemError::IoError(std::io::Error::other("permission denied")))
        }
    }

    fn counter() -> IntCounter {
        IntCounter::with_opts(Opts::new("liveness_test", "help")).unwrap()
    }

    struct AliveReader;

    #[async_trait]
    impl MarkerReader for AliveReader {
        async fn read_marker(&self, _path: &Path) -> FileSystemResult<Option<String>> {
            Ok(Some("1\n".to_string()))
        }
    }

    fn monitor(dir: &Path, reader: Arc<dyn MarkerReader>, counter: IntCounter) -> LivenessMonitor {
        let config = LivenessConfig {
            marker_path: dir.join("connection_alive"),
            interval_secs: 1,
        };
        LivenessMonitor::new(&config, reader, counter)
    }

    #[tokio::test]
    async fn test_marker_contents() {
        let dir = TempDir::new().unwrap();
        let counter = counter();
        let monitor = monitor(dir.path(), Arc::new(FileSystemAdapter::new()), counter.clone());
        let path = dir.path().join("connection_alive");

        assert_eq!(monitor.tick().await, LivenessOutcome::Absent);
        assert_eq!(counter.get(), 0);

        std::fs::write(&path, " 1\n").unwrap();
        assert_eq!(monitor.tick().await, LivenessOutcome::Alive);
        assert_eq!(monitor.tick().await, LivenessOutcome::Alive);
        assert_eq!(counter.get(), 2);

        std::fs::write(&path, "0").unwrap();
        assert_eq!(monitor.tick().await, LivenessOutcome::NotAlive);
        std::fs::write(&path, "").unwrap();
        assert_eq!(monitor.tick().await, LivenessOutcome::NotAlive);
        assert_eq!(counter.get(), 2);
    }

    #[tokio::test]
    async fn test_read_failure_leaves_counter() {
        let dir = TempDir::new().unwrap();
        let counter = counter();
        let monitor = monitor(dir.path(), Arc::new(FailingReader), counter.clone());

        assert_eq!(monitor.tick().await, LivenessOutcome::ReadFailed);
        assert_eq!(counter.get(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_ticks_every_interval_until_cancelled() {
        let counter = counter();
        let monitor = monitor(Path::new("/unused"), Arc::new(AliveReader), counter.clone());

        let shutdown = CancellationToken::new();
        let task = tokio::spawn(monitor.run(shutdown.clone()));

        tokio::time::sleep(Duration::from_millis(3500)).await;
        shutdown.cancel();
        task.await.unwrap();

        assert_eq!(counter.get(), 3);
    }
}
