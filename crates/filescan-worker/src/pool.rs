//! Fixed-size pool of scan workers with graceful drain.

use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use filescan_core::Config;

use crate::worker::{ScanServices, ScanWorker};

#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    pub workers: usize,
    /// Bound on a single attempt; matches the queue's lease duration.
    pub lease_duration: Duration,
    /// Pause after a queue error before the worker tries again.
    pub error_backoff: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            lease_duration: Duration::from_secs(60),
            error_backoff: Duration::from_secs(1),
        }
    }
}

impl From<&Config> for WorkerPoolConfig {
    fn from(config: &Config) -> Self {
        Self {
            workers: config.scan_workers,
            lease_duration: config.scan_lease_duration(),
            ..Self::default()
        }
    }
}

pub struct WorkerPool {
    shutdown_tx: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
    drain_timeout: Duration,
}

impl WorkerPool {
    pub fn spawn(services: ScanServices, config: WorkerPoolConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let workers = config.workers.max(1);

        let handles = (0..workers)
            .map(|id| {
                let worker = ScanWorker::new(
                    id,
                    services.clone(),
                    config.lease_duration,
                    config.error_backoff,
                );
                tokio::spawn(worker.run(shutdown_rx.clone()))
            })
            .collect();

        tracing::info!(
            workers,
            lease_secs = config.lease_duration.as_secs(),
            "Scan worker pool started"
        );

        Self {
            shutdown_tx,
            handles,
            // An in-flight attempt is abandoned at the lease duration; the extra
            // second covers settling it with the queue.
            drain_timeout: config.lease_duration + Duration::from_secs(1),
        }
    }

    pub fn size(&self) -> usize {
        self.handles.len()
    }

    /// Stop acquiring new jobs and wait for in-flight attempts to finish.
    pub async fn shutdown(self) {
        tracing::info!(workers = self.handles.len(), "Draining scan worker pool");
        let _ = self.shutdown_tx.send(true);

        let handles = self.handles;
        let drain = async move {
            for handle in handles {
                if let Err(e) = handle.await {
                    tracing::error!(error = %e, "Scan worker task panicked");
                }
            }
        };

        if tokio::time::timeout(self.drain_timeout, drain).await.is_err() {
            tracing::warn!(
                timeout_secs = self.drain_timeout.as_secs(),
                "Scan worker pool did not drain in time"
            );
        } else {
            tracing::info!("Scan worker pool stopped");
        }
    }
}
