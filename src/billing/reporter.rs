//! Fire-and-forget usage reporting.
//!
//! A usage report must never hold up the request path: the initial POST runs
//! on a spawned task, and failed reports land in a bounded in-memory retry
//! queue drained by a background scanner with capped exponential backoff.
//! The queue is best-effort by design -- overflow drops the oldest entry and
//! nothing survives a restart.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;

use super::balance::BalanceCache;
use super::client::BillingClient;
use super::UsageReport;

/// Hard cap on the retry queue.
pub const MAX_FAILED_REPORTS: usize = 1000;

/// Maximum retry attempts per report (on top of the initial POST).
pub const MAX_RETRIES: u32 = 3;

/// First retry delay; doubles per attempt (30s, 60s, 120s).
pub const BASE_RETRY: Duration = Duration::from_secs(30);

/// How often the scanner looks for due entries.
pub const RETRY_SCAN_INTERVAL: Duration = Duration::from_secs(30);

/// A failed report waiting for redelivery.
#[derive(Debug, Clone)]
struct RetryEntry {
    token: String,
    payload: serde_json::Value,
    retries: u32,
    next_retry: Instant,
}

/// Queue state visible to inspection hooks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueuedReport {
    pub retries: u32,
    pub next_retry: Instant,
}

pub struct UsageReporter {
    billing: BillingClient,
    balance: Arc<BalanceCache>,
    queue: Mutex<VecDeque<RetryEntry>>,
    base_retry: Duration,
    max_queue: usize,
}

impl UsageReporter {
    pub fn new(billing: BillingClient, balance: Arc<BalanceCache>) -> Self {
        Self::with_timing(billing, balance, BASE_RETRY, MAX_FAILED_REPORTS)
    }

    /// Construct with custom retry timing and queue cap. Production uses
    /// [`new`](Self::new); tests shrink the backoff to milliseconds.
    pub fn with_timing(
        billing: BillingClient,
        balance: Arc<BalanceCache>,
        base_retry: Duration,
        max_queue: usize,
    ) -> Self {
        Self {
            billing,
            balance,
            queue: Mutex::new(VecDeque::new()),
            base_retry,
            max_queue,
        }
    }

    /// Submit a usage report without blocking the caller. Returns before any
    /// network I/O happens.
    pub fn report(self: &Arc<Self>, credential: &str, report: UsageReport) {
        let reporter = Arc::clone(self);
        let credential = credential.to_string();
        tokio::spawn(async move {
            reporter.submit(&credential, report).await;
        });
    }

    /// The body of [`report`](Self::report), exposed for deterministic tests.
    pub async fn submit(&self, credential: &str, report: UsageReport) {
        // The user just spent money: their cached balance is no longer
        // trustworthy, but keep the snapshot for the outage grace window.
        self.balance.invalidate(&report.user_id);

        let payload = payload_json(&report);
        match self.billing.post_usage(credential, &payload).await {
            Ok(()) => {
                tracing::debug!(
                    user_id = %report.user_id,
                    model = %report.model,
                    total_tokens = report.usage.total(),
                    cost_usd = report.cost,
                    "Usage reported"
                );
            }
            Err(err) => {
                tracing::warn!(
                    user_id = %report.user_id,
                    error = %err,
                    "Usage report failed, queueing for retry"
                );
                self.enqueue(RetryEntry {
                    token: credential.to_string(),
                    payload,
                    retries: 0,
                    next_retry: Instant::now() + self.base_retry,
                });
            }
        }
    }

    /// One scanner pass: every due entry is removed from the queue and
    /// retried. Entries may be dispatched concurrently within a pass.
    pub async fn run_scan(&self) {
        let now = Instant::now();
        let due: Vec<RetryEntry> = {
            let mut queue = self.queue.lock().unwrap();
            let mut due = Vec::new();
            let mut waiting = VecDeque::with_capacity(queue.len());
            while let Some(entry) = queue.pop_front() {
                if entry.next_retry <= now {
                    due.push(entry);
                } else {
                    waiting.push_back(entry);
                }
            }
            *queue = waiting;
            due
        };

        if due.is_empty() {
            return;
        }

        futures::future::join_all(due.into_iter().map(|entry| self.attempt(entry))).await;
    }

    /// Spawn the periodic retry scanner.
    pub fn spawn_scanner(self: Arc<Self>, period: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                self.run_scan().await;
            }
        })
    }

    // -- Inspection hooks -----------------------------------------------

    pub fn queue_len(&self) -> usize {
        self.queue.lock().unwrap().len()
    }

    pub fn queue_snapshot(&self) -> Vec<QueuedReport> {
        self.queue
            .lock()
            .unwrap()
            .iter()
            .map(|entry| QueuedReport {
                retries: entry.retries,
                next_retry: entry.next_retry,
            })
            .collect()
    }

    pub fn clear_queue(&self) {
        self.queue.lock().unwrap().clear();
    }

    // -- Internals ------------------------------------------------------

    fn enqueue(&self, entry: RetryEntry) {
        let mut queue = self.queue.lock().unwrap();
        if queue.len() >= self.max_queue {
            queue.pop_front();
            tracing::error!(
                capacity = self.max_queue,
                "Retry queue full, dropping oldest usage report"
            );
        }
        queue.push_back(entry);
    }

    async fn attempt(&self, mut entry: RetryEntry) {
        entry.retries += 1;
        if entry.retries > MAX_RETRIES {
            tracing::error!(
                retries = entry.retries,
                "Dropping usage report past retry limit"
            );
            return;
        }

        match self.billing.post_usage(&entry.token, &entry.payload).await {
            Ok(()) => {
                tracing::info!(retries = entry.retries, "Queued usage report delivered");
            }
            Err(err) if entry.retries < MAX_RETRIES => {
                let backoff = self.base_retry * 2u32.pow(entry.retries - 1);
                tracing::warn!(
                    retries = entry.retries,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %err,
                    "Usage report retry failed, rescheduling"
                );
                entry.next_retry = Instant::now() + backoff;
                self.enqueue(entry);
            }
            Err(err) => {
                tracing::error!(
                    retries = entry.retries,
                    error = %err,
                    "Usage report dropped after final retry"
                );
            }
        }
    }
}

/// Wire payload for `POST /api/billing/usage`.
fn payload_json(report: &UsageReport) -> serde_json::Value {
    serde_json::json!({
        "model": report.model,
        "provider": "anthropic",
        "inputTokens": report.usage.input_tokens,
        "outputTokens": report.usage.output_tokens,
        "cacheReadTokens": report.usage.cache_read_tokens,
        "cacheWriteTokens": report.usage.cache_creation_tokens,
        "totalTokens": report.usage.total(),
        "cost": report.cost,
        "currency": "USD",
    })
}
