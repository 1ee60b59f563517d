//! Fire-and-forget delivery of calculation payloads to the compute service.
//!
//! Resolving a request only pushes a [`CalculationPayload`] onto a bounded
//! queue through a [`DispatchHandle`]. A single [`Dispatcher`] drains the queue
//! and sends payloads from a pool of tasks bounded by a semaphore. The result
//! comes back later, out of band, through [`crate::callback`].
//!
//! Failures never reach the moderator who resolved the request. They are
//! logged, counted in [`DispatchStats`] and exported as
//! `salvor_dispatch_total{outcome}`.
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use metrics::counter;
use serde::{Deserialize, Serialize};
use tokio::sync::{Semaphore, mpsc};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

use crate::error::{Result, SalvorError};
use crate::http::{HttpClient, HttpResponse};

pub mod payload;

pub use payload::CalculationPayload;

/// Default retry predicate: retry on server errors (5xx), rate limits (429), and timeouts (408).
pub fn default_should_retry(response: &HttpResponse) -> bool {
    response.status >= 500 || response.status == 429 || response.status == 408
}

/// Configuration for the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Where payloads are POSTed
    pub endpoint_url: String,

    /// Timeout for each individual send attempt in milliseconds
    pub timeout_ms: u64,

    /// Maximum number of sends in flight at once
    pub max_concurrent_dispatches: usize,

    /// Payloads that can wait in the queue before submissions are refused
    pub queue_capacity: usize,

    /// Extra attempts after a retriable failure. 0 sends exactly once.
    pub max_retries: u32,

    /// Base backoff duration in milliseconds (will be exponentially increased)
    pub backoff_ms: u64,

    /// Factor by which the backoff_ms is increased with each retry
    pub backoff_factor: u64,

    /// Maximum backoff time in milliseconds
    pub max_backoff_ms: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            endpoint_url: "http://localhost:8001/calculate".to_string(),
            timeout_ms: 10_000,
            max_concurrent_dispatches: 8,
            queue_capacity: 1024,
            max_retries: 0,
            backoff_ms: 1000,
            backoff_factor: 2,
            max_backoff_ms: 10_000,
        }
    }
}

impl DispatchConfig {
    /// Exponential backoff before retry number `retry_attempt` (0-based):
    /// `backoff_ms * backoff_factor ^ retry_attempt`, capped at `max_backoff_ms`.
    pub fn backoff(&self, retry_attempt: u32) -> Duration {
        let exponential = self
            .backoff_ms
            .saturating_mul(self.backoff_factor.saturating_pow(retry_attempt));
        Duration::from_millis(exponential.min(self.max_backoff_ms))
    }
}

/// Point-in-time dispatch counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchStats {
    /// Accepted onto the queue
    pub submitted: u64,
    /// Acknowledged by the compute service with a 2xx
    pub sent: u64,
    /// Gave up after exhausting attempts, or dropped at shutdown
    pub failed: u64,
    /// Refused at submission (queue full or dispatcher stopped)
    pub rejected: u64,
}

#[derive(Default)]
struct StatsCounters {
    submitted: AtomicU64,
    sent: AtomicU64,
    failed: AtomicU64,
    rejected: AtomicU64,
}

impl StatsCounters {
    fn snapshot(&self) -> DispatchStats {
        DispatchStats {
            submitted: self.submitted.load(Ordering::Relaxed),
            sent: self.sent.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }
}

fn record_outcome(outcome: &'static str) {
    counter!("salvor_dispatch_total", "outcome" => outcome).increment(1);
}

/// Cheap, cloneable submission side of the dispatch queue.
#[derive(Clone)]
pub struct DispatchHandle {
    sender: mpsc::Sender<CalculationPayload>,
    stats: Arc<StatsCounters>,
}

impl DispatchHandle {
    /// Queue a payload for delivery. Never waits on the network.
    ///
    /// Fails with [`SalvorError::Dispatch`] when the queue is full or the
    /// dispatcher has stopped; the refusal is counted either way.
    pub fn submit(&self, payload: CalculationPayload) -> Result<()> {
        let request_id = payload.request_id;
        match self.sender.try_send(payload) {
            Ok(()) => {
                self.stats.submitted.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(request_id = %request_id, "Calculation queued");
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.stats.rejected.fetch_add(1, Ordering::Relaxed);
                record_outcome("queue_full");
                Err(SalvorError::Dispatch(format!(
                    "dispatch queue is full, calculation for request {request_id} dropped"
                )))
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.stats.rejected.fetch_add(1, Ordering::Relaxed);
                record_outcome("closed");
                Err(SalvorError::Dispatch(format!(
                    "dispatcher is not running, calculation for request {request_id} dropped"
                )))
            }
        }
    }

    pub fn stats(&self) -> DispatchStats {
        self.stats.snapshot()
    }
}

/// Drains the dispatch queue and sends payloads to the compute service.
pub struct Dispatcher<H: HttpClient> {
    http_client: Arc<H>,
    config: DispatchConfig,
    receiver: mpsc::Receiver<CalculationPayload>,
    stats: Arc<StatsCounters>,
}

impl<H: HttpClient + 'static> Dispatcher<H> {
    /// Create a dispatcher and the handle that feeds it.
    ///
    /// Payloads submitted before [`Dispatcher::run`] starts wait in the queue.
    pub fn new(http_client: Arc<H>, config: DispatchConfig) -> (Self, DispatchHandle) {
        let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));
        let stats = Arc::new(StatsCounters::default());
        let handle = DispatchHandle {
            sender,
            stats: stats.clone(),
        };
        let dispatcher = Self {
            http_client,
            config,
            receiver,
            stats,
        };
        (dispatcher, handle)
    }

    /// Run the dispatcher on the current tokio runtime.
    pub fn spawn(self, shutdown_token: CancellationToken) -> JoinHandle<Result<()>> {
        tokio::spawn(self.run(shutdown_token))
    }

    /// Process the queue until `shutdown_token` fires or every handle is dropped.
    ///
    /// On shutdown no further payloads are started; payloads still queued are
    /// counted as failed and sends already in flight are awaited.
    #[tracing::instrument(skip_all, fields(endpoint = %self.config.endpoint_url))]
    pub async fn run(mut self, shutdown_token: CancellationToken) -> Result<()> {
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_dispatches.max(1)));
        let mut join_set: JoinSet<()> = JoinSet::new();

        tracing::info!(
            max_concurrent = self.config.max_concurrent_dispatches,
            max_retries = self.config.max_retries,
            "Dispatcher started"
        );

        loop {
            while let Some(result) = join_set.try_join_next() {
                if let Err(join_error) = result {
                    tracing::error!(error = %join_error, "Dispatch task panicked");
                }
            }

            let payload = tokio::select! {
                biased;
                _ = shutdown_token.cancelled() => {
                    tracing::info!("Shutdown signal received, stopping dispatcher");
                    break;
                }
                next = self.receiver.recv() => match next {
                    Some(payload) => payload,
                    None => {
                        tracing::info!("All dispatch handles dropped, stopping dispatcher");
                        break;
                    }
                },
            };

            let permit = tokio::select! {
                biased;
                _ = shutdown_token.cancelled() => {
                    self.drop_payload(&payload, "shutdown before send");
                    tracing::info!("Shutdown signal received, stopping dispatcher");
                    break;
                }
                permit = semaphore.clone().acquire_owned() => permit.map_err(|e| {
                    SalvorError::Other(anyhow::anyhow!("Dispatch semaphore closed: {}", e))
                })?,
            };

            let http_client = self.http_client.clone();
            let config = self.config.clone();
            let stats = self.stats.clone();
            let shutdown_token = shutdown_token.clone();

            join_set.spawn(async move {
                // Permit is held for the duration of this task
                let _permit = permit;
                send_with_retry(http_client.as_ref(), &config, payload, &stats, &shutdown_token)
                    .await;
            });
        }

        self.receiver.close();
        while let Ok(payload) = self.receiver.try_recv() {
            self.drop_payload(&payload, "shutdown before send");
        }

        tracing::info!(in_flight = join_set.len(), "Waiting for in-flight dispatches");
        while let Some(result) = join_set.join_next().await {
            if let Err(join_error) = result {
                tracing::error!(error = %join_error, "Dispatch task panicked");
            }
        }

        let stats = self.stats.snapshot();
        tracing::info!(
            submitted = stats.submitted,
            sent = stats.sent,
            failed = stats.failed,
            rejected = stats.rejected,
            "Dispatcher stopped"
        );
        Ok(())
    }

    fn drop_payload(&self, payload: &CalculationPayload, reason: &str) {
        self.stats.failed.fetch_add(1, Ordering::Relaxed);
        record_outcome("dropped");
        tracing::error!(request_id = %payload.request_id, reason, "Calculation not dispatched");
    }
}

async fn send_with_retry<H: HttpClient>(
    http_client: &H,
    config: &DispatchConfig,
    payload: CalculationPayload,
    stats: &StatsCounters,
    shutdown_token: &CancellationToken,
) {
    let request_id = payload.request_id;
    let body = match serde_json::to_string(&payload) {
        Ok(body) => body,
        Err(e) => {
            stats.failed.fetch_add(1, Ordering::Relaxed);
            record_outcome("failed");
            tracing::error!(request_id = %request_id, error = %e, "Failed to serialize calculation payload");
            return;
        }
    };

    let mut retry_attempt = 0;
    loop {
        let result = http_client
            .post_json(&config.endpoint_url, &body, config.timeout_ms)
            .await;

        let (retriable, error) = match result {
            Ok(response) if response.is_success() => {
                stats.sent.fetch_add(1, Ordering::Relaxed);
                record_outcome("sent");
                tracing::info!(
                    request_id = %request_id,
                    status = response.status,
                    retry_attempt,
                    "Calculation dispatched"
                );
                return;
            }
            Ok(response) => {
                tracing::warn!(
                    request_id = %request_id,
                    status = response.status,
                    body = %response.body,
                    retry_attempt,
                    "Compute service returned non-success status"
                );
                (
                    default_should_retry(&response),
                    format!("status {}", response.status),
                )
            }
            Err(e) => (true, e.to_string()),
        };

        if !retriable || retry_attempt >= config.max_retries {
            stats.failed.fetch_add(1, Ordering::Relaxed);
            record_outcome("failed");
            tracing::error!(
                request_id = %request_id,
                retry_attempt,
                error = %error,
                "Calculation dispatch failed"
            );
            return;
        }

        let backoff = config.backoff(retry_attempt);
        retry_attempt += 1;
        tracing::debug!(
            request_id = %request_id,
            retry_attempt,
            backoff_ms = backoff.as_millis() as u64,
            error = %error,
            "Retrying calculation dispatch"
        );
        tokio::select! {
            _ = tokio::time::sleep(backoff) => {}
            _ = shutdown_token.cancelled() => {
                stats.failed.fetch_add(1, Ordering::Relaxed);
                record_outcome("failed");
                tracing::error!(
                    request_id = %request_id,
                    retry_attempt,
                    error = %error,
                    "Shutdown during retry backoff, calculation dispatch abandoned"
                );
                return;
            }
        }
    }
}
