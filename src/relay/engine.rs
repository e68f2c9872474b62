//! Receive loop and forwarding pipeline.
//!
//! Two futures run concurrently on the caller's task:
//!
//! - the receiver reads a delivery, accepts it, decodes its annotations and
//!   queues a [`ForwardJob`];
//! - the forwarder drains the queue in order and hands each job to the
//!   [`SinkRelay`]. Between jobs it sweeps idle sending links.
//!
//! The queue is bounded, so a slow sink only stalls the receiver (and with it
//! the broker's credit) once `queue_capacity` messages are waiting. A single
//! forwarder keeps messages in the order they were received.
//!
//! One [`CancellationToken`] governs the run. Shutdown cancels it, which
//! stops the receiver wherever it is waiting and makes the forwarder abandon
//! the in-flight send and drop what is still queued. When the inbound link
//! fails instead, the queue is drained before the run ends.

use std::future::{self, Future};

use tokio::sync::mpsc;
use tokio::time::{Instant, Interval, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::RelaySettings;
use crate::relay::address::target_address;
use crate::relay::annotations;
use crate::relay::policy::AcceptFailurePolicy;
use crate::relay::sink::{ForwardJob, SinkRelay};
use crate::transport::{Inbound, InboundLink, LinkFactory};
use crate::utils::RelayError;

/// Credit window of the inbound link.
pub const LINK_CREDIT: u32 = 10;

/// Counters for one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    /// Deliveries read off the inbound link.
    pub received: u64,
    /// Deliveries dropped before forwarding (accept failure, bad annotations).
    pub skipped: u64,
    pub forwarded: u64,
    /// Deliveries dropped after the retry policy gave up.
    pub failed: u64,
    /// Accepted deliveries abandoned because of shutdown.
    pub abandoned: u64,
}

#[derive(Debug, Default)]
struct ReceiveStats {
    received: u64,
    skipped: u64,
}

#[derive(Debug, Default)]
struct ForwardStats {
    forwarded: u64,
    failed: u64,
    abandoned: u64,
}

/// The relay pipeline for one tenant/message-type pair.
pub struct Relay {
    settings: RelaySettings,
    receive_stats: ReceiveStats,
    forward_stats: ForwardStats,
}

impl Relay {
    pub fn new(settings: RelaySettings) -> Self {
        Self {
            settings,
            receive_stats: ReceiveStats::default(),
            forward_stats: ForwardStats::default(),
        }
    }

    pub fn stats(&self) -> RelayStats {
        RelayStats {
            received: self.receive_stats.received,
            skipped: self.receive_stats.skipped,
            forwarded: self.forward_stats.forwarded,
            failed: self.forward_stats.failed,
            abandoned: self.forward_stats.abandoned,
        }
    }

    /// Runs until the inbound link fails, a fatal error occurs or `shutdown`
    /// resolves.
    ///
    /// Every cached sending link is closed before this returns. Fatal errors
    /// are returned; per-message failures are logged and counted.
    pub async fn run<I, F, S>(
        &mut self,
        inbound: &mut I,
        links: F,
        shutdown: S,
    ) -> Result<(), RelayError>
    where
        I: InboundLink,
        F: LinkFactory<Delivery = I::Delivery>,
        S: Future<Output = ()>,
    {
        let (queue, jobs) = mpsc::channel(self.settings.queue_capacity.max(1));
        let mut sink = SinkRelay::new(links, &self.settings);
        let cancel = CancellationToken::new();

        let receiving = receive_loop(
            inbound,
            queue,
            &self.settings,
            &mut self.receive_stats,
            &cancel,
            shutdown,
        );
        let forwarding = forward_loop(&mut sink, jobs, &mut self.forward_stats, &cancel);
        let (received, forwarded) = tokio::join!(receiving, forwarding);

        sink.close_all().await;

        let stats = self.stats();
        info!(
            received = stats.received,
            forwarded = stats.forwarded,
            skipped = stats.skipped,
            failed = stats.failed,
            abandoned = stats.abandoned,
            "relay stopped"
        );
        // a fatal forwarding error wins over the receiver's result
        forwarded.and(received)
    }
}

/// Logs a non-fatal error and hands fatal ones back to the caller.
fn tolerate(err: RelayError, message_id: &str) -> Result<(), RelayError> {
    if err.is_fatal() {
        error!(message_id, kind = ?err.kind(), "{err}");
        return Err(err);
    }
    warn!(message_id, kind = ?err.kind(), "skipping message: {err}");
    Ok(())
}

async fn receive_loop<I, S>(
    inbound: &mut I,
    queue: mpsc::Sender<ForwardJob<I::Delivery>>,
    settings: &RelaySettings,
    stats: &mut ReceiveStats,
    cancel: &CancellationToken,
    shutdown: S,
) -> Result<(), RelayError>
where
    I: InboundLink,
    S: Future<Output = ()>,
{
    let result = tokio::select! {
        biased;
        _ = shutdown => {
            info!("shutdown requested, no longer receiving");
            Ok(())
        }
        _ = cancel.cancelled() => Ok(()),
        result = receive_messages(inbound, &queue, settings, stats) => result,
    };
    match &result {
        Ok(()) => cancel.cancel(),
        Err(e) => error!("receiving stopped: {e}"),
    }
    result
}

/// Receives, accepts and queues messages until a fatal error.
async fn receive_messages<I: InboundLink>(
    inbound: &mut I,
    queue: &mpsc::Sender<ForwardJob<I::Delivery>>,
    settings: &RelaySettings,
    stats: &mut ReceiveStats,
) -> Result<(), RelayError> {
    loop {
        let Inbound {
            delivery,
            message_id,
            annotations,
        } = inbound.receive().await?;
        stats.received += 1;
        let id = message_id.as_deref().unwrap_or("-");

        if let Err(e) = accept(inbound, &delivery, settings, id).await {
            tolerate(e, id)?;
            stats.skipped += 1;
            continue;
        }

        let extracted = annotations::extract(&annotations);
        for skipped in extracted.skipped() {
            warn!(message_id = id, "ignoring {skipped}");
        }

        let device_id = match extracted.require_device_id() {
            Ok(device_id) => device_id.to_string(),
            Err(e) => {
                tolerate(RelayError::from(e), id)?;
                stats.skipped += 1;
                continue;
            }
        };

        let target = target_address(&settings.sink_base, &device_id);
        debug!(message_id = id, %device_id, target_address = %target, "queueing message");

        let job = ForwardJob {
            delivery,
            message_id,
            device_id,
            target,
        };
        if queue.send(job).await.is_err() {
            return Err(RelayError::Receive("forward queue closed".to_string()));
        }
    }
}

/// Accepts `delivery` under the configured policy.
///
/// Under `continue` the failure comes back as the non-fatal
/// [`RelayError::AcceptSkipped`]; every other failure ends the run.
async fn accept<I: InboundLink>(
    inbound: &mut I,
    delivery: &I::Delivery,
    settings: &RelaySettings,
    message_id: &str,
) -> Result<(), RelayError> {
    let err = match inbound.accept(delivery).await {
        Ok(()) => return Ok(()),
        Err(e) => e,
    };

    match settings.accept_failure {
        AcceptFailurePolicy::Terminate => Err(err),
        AcceptFailurePolicy::Continue => Err(RelayError::AcceptSkipped(err.to_string())),
        AcceptFailurePolicy::Retry => {
            let mut last = err;
            for (attempt, delay) in settings
                .retry
                .delays()
                .take(settings.accept_retries)
                .enumerate()
            {
                warn!(message_id, attempt = attempt + 1, ?delay, "retrying accept: {last}");
                tokio::time::sleep(delay).await;
                match inbound.accept(delivery).await {
                    Ok(()) => return Ok(()),
                    Err(e) => last = e,
                }
            }
            warn!(message_id, "giving up on accept");
            Err(last)
        }
    }
}

async fn forward_loop<F: LinkFactory>(
    sink: &mut SinkRelay<F>,
    mut jobs: mpsc::Receiver<ForwardJob<F::Delivery>>,
    stats: &mut ForwardStats,
    cancel: &CancellationToken,
) -> Result<(), RelayError> {
    let mut sweep = sink.idle_timeout().map(|period| {
        let mut sweep = interval_at(Instant::now() + period, period);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
        sweep
    });

    loop {
        let job = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            job = jobs.recv() => match job {
                Some(job) => job,
                None => return Ok(()),
            },
            _ = next_sweep(&mut sweep) => {
                sink.evict_idle().await;
                continue;
            }
        };

        let message_id = job.message_id.as_deref().unwrap_or("-");
        match sink.forward(&job, cancel).await {
            Ok(()) => {
                stats.forwarded += 1;
                debug!(message_id, device_id = %job.device_id, "forwarded");
            }
            Err(e @ RelayError::Cancelled { .. }) => {
                stats.abandoned += 1;
                warn!(message_id, device_id = %job.device_id, "{e}");
                break;
            }
            Err(e) if e.is_fatal() => {
                stats.failed += 1;
                error!(message_id, device_id = %job.device_id, "forwarding stopped: {e}");
                cancel.cancel();
                return Err(e);
            }
            Err(e) => {
                stats.failed += 1;
                error!(
                    message_id,
                    device_id = %job.device_id,
                    target_address = %job.target,
                    kind = ?e.kind(),
                    "dropping message: {e}"
                );
            }
        }
    }

    // shutdown: whatever is still queued will not be sent
    jobs.close();
    let mut dropped = 0;
    while jobs.try_recv().is_ok() {
        dropped += 1;
    }
    if dropped > 0 {
        warn!(dropped, "dropping queued messages on shutdown");
    }
    stats.abandoned += dropped;
    Ok(())
}

async fn next_sweep(sweep: &mut Option<Interval>) {
    match sweep {
        Some(sweep) => {
            sweep.tick().await;
        }
        None => future::pending().await,
    }
}
