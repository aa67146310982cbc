//! The device client: wires configuration, queue, transport and loops.
//!
//! [`DeviceClient`] owns the shared state. [`DeviceClient::start`] spawns
//! the sampling loop and the flush worker and returns a [`RunningClient`]
//! whose [`shutdown`](RunningClient::shutdown) stops both loops, waits for
//! them within the grace period and then closes the transport.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::payload::{DeviceIdentity, PayloadBuilder};
use crate::queue::{DurableQueue, QueueError};
use crate::registration::{Registrar, RegistrationError, RegistrationResponse, TokenStore};
use crate::sensors::SensorSet;
use crate::transport::{PayloadSink, TransportError, TransportHandle, TransportSettings};
use crate::worker::{DeliveryStats, FlushWorker, SamplingLoop, StatsSnapshot};

/// Errors that prevent the client from starting.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("failed to open durable queue: {0}")]
    Queue(#[from] QueueError),

    #[error("failed to create transport: {0}")]
    Transport(#[from] TransportError),

    #[error("failed to create registrar: {0}")]
    Registration(#[from] RegistrationError),
}

/// A configured device, ready to register or run.
pub struct DeviceClient {
    config: Config,
    identity: DeviceIdentity,
    queue: DurableQueue,
    transport: Arc<TransportHandle>,
    registrar: Registrar,
    stats: Arc<DeliveryStats>,
}

impl DeviceClient {
    /// Open the queue, load any stored token and build the transport.
    pub async fn new(config: Config) -> Result<Self, ClientError> {
        let identity = config.identity();
        let store = TokenStore::new(&config.token_file);
        let token = store.load().await;

        let queue = DurableQueue::open(&config.queue_file)?;
        let transport = Arc::new(
            TransportHandle::connect(TransportSettings::from_config(&config), token.as_deref())
                .await?,
        );
        let registrar = Registrar::new(config.register_url(), config.request_timeout, store)?;

        info!(
            device_id = %identity.device_id,
            market_id = %identity.market_id,
            mode = %config.mode,
            registered = token.is_some(),
            backlog = queue.len(),
            "Device client initialized"
        );

        Ok(Self {
            config,
            identity,
            queue,
            transport,
            registrar,
            stats: Arc::new(DeliveryStats::default()),
        })
    }

    /// Register with the platform and switch to the returned token.
    pub async fn register(&self) -> Result<RegistrationResponse, RegistrationError> {
        self.registrar.register(&self.identity, &self.transport).await
    }

    /// Spawn the sampling loop and the flush worker.
    pub fn start(&self) -> RunningClient {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let sink: Arc<dyn PayloadSink> = self.transport.clone();

        let builder = PayloadBuilder::new(
            self.identity.clone(),
            SensorSet::for_mode(self.config.sensor_mode, self.config.commodities.clone()),
        );
        let sampling = SamplingLoop::new(
            builder,
            Arc::clone(&sink),
            self.queue.clone(),
            self.config.interval,
            Arc::clone(&self.stats),
        );
        let flushing = FlushWorker::new(
            sink,
            self.queue.clone(),
            self.config.retry_interval,
            Arc::clone(&self.stats),
        );

        RunningClient {
            shutdown_tx,
            sampling: tokio::spawn(sampling.run(shutdown_rx.clone())),
            flushing: tokio::spawn(flushing.run(shutdown_rx)),
            transport: Arc::clone(&self.transport),
            grace: self.config.shutdown_grace,
        }
    }

    /// Run until `signal` resolves, then shut down.
    pub async fn run_until<F>(&self, signal: F) -> StatsSnapshot
    where
        F: Future<Output = ()>,
    {
        let running = self.start();
        info!("Device client running");
        signal.await;
        info!("Shutdown signal received, stopping...");
        running.shutdown().await;
        self.stats()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn queue(&self) -> &DurableQueue {
        &self.queue
    }

    pub fn transport(&self) -> &Arc<TransportHandle> {
        &self.transport
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }
}

/// Handles to the spawned loops.
pub struct RunningClient {
    shutdown_tx: watch::Sender<bool>,
    sampling: JoinHandle<()>,
    flushing: JoinHandle<()>,
    transport: Arc<TransportHandle>,
    grace: Duration,
}

impl RunningClient {
    /// Stop both loops, then close the transport.
    ///
    /// Both loops share one grace period; any still running when it ends
    /// are aborted.
    pub async fn shutdown(self) {
        let RunningClient {
            shutdown_tx,
            mut sampling,
            mut flushing,
            transport,
            grace,
        } = self;
        shutdown_tx.send_replace(true);

        match tokio::time::timeout(grace, async { tokio::join!(&mut sampling, &mut flushing) })
            .await
        {
            Ok((sampled, flushed)) => {
                log_join("Sampling loop", sampled);
                log_join("Flush worker", flushed);
            }
            Err(_) => {
                warn!(
                    grace_ms = grace.as_millis() as u64,
                    "Loop shutdown timed out, aborting"
                );
                sampling.abort();
                flushing.abort();
            }
        }

        transport.close().await;
        info!("Device client stopped");
    }
}

fn log_join(name: &str, result: Result<(), tokio::task::JoinError>) {
    match result {
        Ok(()) => info!(task = name, "Task shut down gracefully"),
        Err(e) => error!(task = name, error = %e, "Task panicked during shutdown"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransportKind;
    use tempfile::TempDir;

    fn test_config(dir: &TempDir) -> Config {
        Config {
            api_url: "http://127.0.0.1:9".to_string(),
            mode: TransportKind::Http,
            interval: Duration::from_millis(20),
            retry_interval: Duration::from_millis(50),
            request_timeout: Duration::from_secs(1),
            token_file: dir.path().join("token.json"),
            queue_file: dir.path().join("queue.log"),
            shutdown_grace: Duration::from_secs(2),
            ..Config::default()
        }
    }

    #[tokio::test]
    async fn test_new_client_without_token() {
        let dir = TempDir::new().unwrap();
        let client = DeviceClient::new(test_config(&dir)).await.unwrap();

        assert_eq!(client.identity().device_id, "DEV-001");
        assert!(client.queue().is_empty());
        assert_eq!(client.stats(), StatsSnapshot::default());
    }

    #[tokio::test]
    async fn test_unreachable_platform_queues_everything() {
        let dir = TempDir::new().unwrap();
        let client = DeviceClient::new(test_config(&dir)).await.unwrap();

        let stats = client
            .run_until(tokio::time::sleep(Duration::from_millis(200)))
            .await;

        assert!(stats.sampled >= 1);
        assert_eq!(stats.delivered, 0);
        assert_eq!(stats.queued + stats.dropped, stats.sampled);
        assert_eq!(client.queue().len() as u64, stats.queued);
    }

    #[tokio::test]
    async fn test_queue_survives_client_restart() {
        let dir = TempDir::new().unwrap();
        let queued = {
            let client = DeviceClient::new(test_config(&dir)).await.unwrap();
            client
                .run_until(tokio::time::sleep(Duration::from_millis(100)))
                .await
                .queued
        };

        let client = DeviceClient::new(test_config(&dir)).await.unwrap();
        assert_eq!(client.queue().len() as u64, queued);
    }

    #[tokio::test]
    async fn test_shutdown_waits_one_grace_period_for_both_loops() {
        let dir = TempDir::new().unwrap();
        let client = DeviceClient::new(test_config(&dir)).await.unwrap();
        let (shutdown_tx, _) = watch::channel(false);

        // Loops that ignore the signal
        let stuck = || tokio::spawn(tokio::time::sleep(Duration::from_secs(60)));
        let running = RunningClient {
            shutdown_tx,
            sampling: stuck(),
            flushing: stuck(),
            transport: Arc::clone(client.transport()),
            grace: Duration::from_millis(300),
        };

        let started = std::time::Instant::now();
        running.shutdown().await;
        let elapsed = started.elapsed();

        assert!(elapsed >= Duration::from_millis(300));
        assert!(elapsed < Duration::from_millis(550), "took {:?}", elapsed);
    }
}
