//! Outbound relay.
//!
//! Forwards each message to `{sink_base}/topics/{device-id}` over a sending
//! link attached on the shared session. Links are cached per target address
//! so a device that reports often does not pay for an attach/detach round
//! trip on every message:
//!
//! - at most one link is open per target;
//! - a link unused for `link_idle_secs` is closed before the next forward;
//! - when `max_links` links are open, the least recently used one is closed
//!   to make room;
//! - with `link_idle_secs = 0` every link is closed right after its send.
//!
//! A link whose attach or send failed is closed and evicted; the forward is
//! retried on a fresh link according to the [`RetryPolicy`]. A send that timed
//! out is not retried, since the sink may already hold the message.
//!
//! Every send and backoff sleep is raced against the run's cancellation
//! token.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::{Instant, sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::RelaySettings;
use crate::relay::policy::RetryPolicy;
use crate::transport::{LinkFactory, OutboundLink, close_within};
use crate::utils::RelayError;

/// One accepted message waiting to be forwarded.
#[derive(Debug)]
pub struct ForwardJob<D> {
    pub delivery: D,
    pub message_id: Option<String>,
    pub device_id: String,
    pub target: String,
}

struct CachedLink<L> {
    link: L,
    last_used: Instant,
}

pub struct SinkRelay<F: LinkFactory> {
    factory: F,
    links: HashMap<String, CachedLink<F::Link>>,
    send_timeout: Duration,
    /// `None` means single-use links.
    idle_timeout: Option<Duration>,
    max_links: usize,
    retry: RetryPolicy,
}

impl<F: LinkFactory> SinkRelay<F> {
    pub fn new(factory: F, settings: &RelaySettings) -> Self {
        let idle_timeout = match settings.link_idle_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };

        Self {
            factory,
            links: HashMap::new(),
            send_timeout: Duration::from_millis(settings.send_timeout_ms),
            idle_timeout,
            max_links: settings.max_links.max(1),
            retry: settings.retry.clone(),
        }
    }

    /// Number of sending links currently open.
    pub fn open_links(&self) -> usize {
        self.links.len()
    }

    pub fn is_open(&self, target: &str) -> bool {
        self.links.contains_key(target)
    }

    /// Idle time after which a cached link is closed, if links are cached.
    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout
    }

    /// Forwards `job`, retrying on a fresh link after failures.
    ///
    /// Returns the last error once the retry policy is exhausted, and
    /// [`RelayError::Cancelled`] as soon as `cancel` fires.
    pub async fn forward(
        &mut self,
        job: &ForwardJob<F::Delivery>,
        cancel: &CancellationToken,
    ) -> Result<(), RelayError> {
        self.evict_idle().await;

        let mut delays = self.retry.delays();
        let mut attempt = 1;
        loop {
            let err = match self.try_forward(job, cancel).await {
                Ok(()) => return Ok(()),
                Err(e @ (RelayError::SendTimeout { .. } | RelayError::Cancelled { .. })) => {
                    return Err(e);
                }
                Err(e) => e,
            };
            let Some(delay) = delays.next() else {
                return Err(err);
            };

            warn!(
                target_address = %job.target,
                device_id = %job.device_id,
                attempt,
                ?delay,
                "forward failed, retrying: {err}"
            );
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(cancelled(job)),
                _ = sleep(delay) => {}
            }
            attempt += 1;
        }
    }

    async fn try_forward(
        &mut self,
        job: &ForwardJob<F::Delivery>,
        cancel: &CancellationToken,
    ) -> Result<(), RelayError> {
        let send_timeout = self.send_timeout;
        let cached = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(cancelled(job)),
            cached = self.link_for(&job.target) => cached?,
        };

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(cancelled(job)),
            sent = timeout(send_timeout, cached.link.send(&job.delivery)) => match sent {
                Ok(result) => result,
                Err(_) => Err(RelayError::SendTimeout {
                    address: job.target.clone(),
                    timeout: send_timeout,
                }),
            },
        };

        if result.is_ok() && self.idle_timeout.is_some() {
            if let Some(cached) = self.links.get_mut(&job.target) {
                cached.last_used = Instant::now();
            }
        } else {
            self.close_link(&job.target).await;
        }
        result
    }

    async fn link_for(&mut self, target: &str) -> Result<&mut CachedLink<F::Link>, RelayError> {
        if !self.links.contains_key(target) {
            if self.links.len() >= self.max_links {
                self.evict_least_recent().await;
            }
            let link = self.factory.open(target).await?;
            debug!(target_address = %target, "sender attached");
            self.links.insert(
                target.to_string(),
                CachedLink {
                    link,
                    last_used: Instant::now(),
                },
            );
        }

        self.links
            .get_mut(target)
            .ok_or_else(|| RelayError::SenderAttach {
                address: target.to_string(),
                reason: "link missing from cache".to_string(),
            })
    }

    /// Closes every link unused for longer than the idle timeout.
    pub async fn evict_idle(&mut self) {
        let Some(idle_timeout) = self.idle_timeout else {
            return;
        };
        let now = Instant::now();
        let expired: Vec<String> = self
            .links
            .iter()
            .filter(|(_, cached)| now.duration_since(cached.last_used) >= idle_timeout)
            .map(|(target, _)| target.clone())
            .collect();

        for target in expired {
            debug!(target_address = %target, "closing idle sender");
            self.close_link(&target).await;
        }
    }

    async fn evict_least_recent(&mut self) {
        let oldest = self
            .links
            .iter()
            .min_by_key(|(_, cached)| cached.last_used)
            .map(|(target, _)| target.clone());

        if let Some(target) = oldest {
            debug!(target_address = %target, "sender cache full, closing least recently used");
            self.close_link(&target).await;
        }
    }

    async fn close_link(&mut self, target: &str) {
        if let Some(cached) = self.links.remove(target) {
            if let Err(e) = close_within("sender", cached.link.close()).await {
                warn!(target_address = %target, "{e}");
            }
        }
    }

    /// Closes every cached link. Failures are logged.
    pub async fn close_all(&mut self) {
        let targets: Vec<String> = self.links.keys().cloned().collect();
        for target in targets {
            self.close_link(&target).await;
        }
    }
}

fn cancelled<D>(job: &ForwardJob<D>) -> RelayError {
    RelayError::Cancelled {
        address: job.target.clone(),
    }
}
