//! The two periodic loops: sampling and queue flushing.
//!
//! [`SamplingLoop`] builds and delivers one payload per tick and hands any
//! failure to the durable queue. [`FlushWorker`] drains that queue in FIFO
//! order on a fixed period. Both stop taking new ticks once the shutdown
//! signal flips to `true`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::payload::PayloadBuilder;
use crate::queue::{DurableQueue, QueueError};
use crate::transport::PayloadSink;

/// How often the sampling loop logs a progress line.
const PROGRESS_INTERVAL: Duration = Duration::from_secs(30);

/// Counters shared by both loops.
#[derive(Debug, Default)]
pub struct DeliveryStats {
    sampled: AtomicU64,
    delivered: AtomicU64,
    queued: AtomicU64,
    dropped: AtomicU64,
    flushed: AtomicU64,
    flush_failures: AtomicU64,
}

/// Point-in-time copy of [`DeliveryStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Payloads built by the sampling loop
    pub sampled: u64,

    /// Fresh payloads delivered on first attempt
    pub delivered: u64,

    /// Fresh payloads written to the queue after a failed send
    pub queued: u64,

    /// Fresh payloads lost because the queue write failed
    pub dropped: u64,

    /// Queued payloads delivered by the flush worker
    pub flushed: u64,

    /// Failed sends of queued payloads
    pub flush_failures: u64,
}

impl DeliveryStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            sampled: self.sampled.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            queued: self.queued.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            flushed: self.flushed.load(Ordering::Relaxed),
            flush_failures: self.flush_failures.load(Ordering::Relaxed),
        }
    }

    fn bump(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }
}

/// What happened to the payload of one sampling tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// The transport accepted it
    Delivered,
    /// The send failed and the payload was queued under this id
    Queued(u64),
    /// The send failed and the queue write failed too
    Dropped,
}

/// Periodic sample, send, enqueue-on-failure.
pub struct SamplingLoop {
    builder: PayloadBuilder,
    sink: Arc<dyn PayloadSink>,
    queue: DurableQueue,
    interval: Duration,
    stats: Arc<DeliveryStats>,
}

impl SamplingLoop {
    pub fn new(
        builder: PayloadBuilder,
        sink: Arc<dyn PayloadSink>,
        queue: DurableQueue,
        interval: Duration,
        stats: Arc<DeliveryStats>,
    ) -> Self {
        Self {
            builder,
            sink,
            queue,
            interval,
            stats,
        }
    }

    /// Run one sampling round.
    ///
    /// A failed send is enqueued immediately, without an inline retry.
    pub async fn tick(&self) -> TickOutcome {
        let payload = self.builder.build().await;
        DeliveryStats::bump(&self.stats.sampled, 1);

        if self.sink.send(&payload).await {
            DeliveryStats::bump(&self.stats.delivered, 1);
            return TickOutcome::Delivered;
        }

        match self.queue.enqueue(&payload).await {
            Ok(id) => {
                DeliveryStats::bump(&self.stats.queued, 1);
                info!(id, backlog = self.queue.len(), "Send failed, payload queued");
                TickOutcome::Queued(id)
            }
            Err(e) => {
                DeliveryStats::bump(&self.stats.dropped, 1);
                error!(error = %e, "Send failed and payload could not be queued");
                TickOutcome::Dropped
            }
        }
    }

    /// Tick every `interval` until shutdown is signalled.
    ///
    /// The first tick runs immediately. A tick in progress when the signal
    /// arrives runs to completion.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_report = Instant::now();

        info!(interval_ms = self.interval.as_millis() as u64, "Sampling loop started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => {}
            }
            if is_shutdown(&shutdown) {
                break;
            }

            let outcome = self.tick().await;
            debug!(outcome = ?outcome, "Sampling tick finished");

            if last_report.elapsed() >= PROGRESS_INTERVAL {
                let stats = self.stats.snapshot();
                info!(
                    sampled = stats.sampled,
                    delivered = stats.delivered,
                    queued = stats.queued,
                    dropped = stats.dropped,
                    flushed = stats.flushed,
                    backlog = self.queue.len(),
                    "Delivery progress"
                );
                last_report = Instant::now();
            }
        }

        info!("Sampling loop stopped");
    }
}

/// Summary of one flush pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Entries a send was attempted for
    pub attempted: usize,
    /// Entries delivered (and deleted, unless the delete itself failed)
    pub delivered: usize,
    /// Entries whose send failed; they stay queued
    pub failed: usize,
    /// Entries whose stored payload could not be decoded; left in place
    pub undecodable: usize,
}

/// Periodic FIFO drain of the durable queue.
pub struct FlushWorker {
    sink: Arc<dyn PayloadSink>,
    queue: DurableQueue,
    interval: Duration,
    stats: Arc<DeliveryStats>,
}

impl FlushWorker {
    pub fn new(
        sink: Arc<dyn PayloadSink>,
        queue: DurableQueue,
        interval: Duration,
        stats: Arc<DeliveryStats>,
    ) -> Self {
        Self {
            sink,
            queue,
            interval,
            stats,
        }
    }

    /// Attempt every queued entry once, oldest first.
    ///
    /// Delivered entries are deleted; failed ones stay for the next pass.
    pub async fn flush_once(&self) -> Result<FlushReport, QueueError> {
        self.flush(None).await
    }

    async fn flush(
        &self,
        shutdown: Option<&watch::Receiver<bool>>,
    ) -> Result<FlushReport, QueueError> {
        let entries = self.queue.list_all().await?;
        let mut report = FlushReport::default();

        if entries.is_empty() {
            return Ok(report);
        }
        debug!(pending = entries.len(), "Flushing queue");

        for entry in entries {
            if shutdown.is_some_and(is_shutdown) {
                debug!("Shutdown requested, stopping flush between entries");
                break;
            }

            let payload = match entry.decode() {
                Ok(payload) => payload,
                Err(e) => {
                    report.undecodable += 1;
                    warn!(id = entry.id, error = %e, "Queued payload is not decodable, leaving it");
                    continue;
                }
            };

            report.attempted += 1;
            if !self.sink.send(&payload).await {
                report.failed += 1;
                DeliveryStats::bump(&self.stats.flush_failures, 1);
                debug!(id = entry.id, "Flush send failed, entry kept");
                continue;
            }

            report.delivered += 1;
            DeliveryStats::bump(&self.stats.flushed, 1);
            match self.queue.delete(entry.id).await {
                Ok(_) => debug!(id = entry.id, "Flushed queued payload"),
                // Left in place; it will be delivered again next pass
                Err(e) => error!(id = entry.id, error = %e, "Failed to delete flushed entry"),
            }
        }

        if report.delivered > 0 || report.failed > 0 {
            info!(
                delivered = report.delivered,
                failed = report.failed,
                remaining = self.queue.len(),
                "Queue flush finished"
            );
        }

        Ok(report)
    }

    /// Flush every `interval` until shutdown is signalled.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            interval_ms = self.interval.as_millis() as u64,
            backlog = self.queue.len(),
            "Flush worker started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => {}
            }
            if is_shutdown(&shutdown) {
                break;
            }

            if let Err(e) = self.flush(Some(&shutdown)).await {
                error!(error = %e, "Queue flush failed");
            }
        }

        info!("Flush worker stopped");
    }
}

/// True once the signal is set or its sender is gone.
fn is_shutdown(shutdown: &watch::Receiver<bool>) -> bool {
    *shutdown.borrow() || shutdown.has_changed().is_err()
}
