//! Per-user balance cache.
//!
//! Gates requests on the billing service's answer while keeping billing off
//! the hot path: a fresh snapshot is authoritative without refetch, a stale
//! snapshot within the grace window keeps paying users unblocked during
//! billing outages, and outside the grace window the cache fails closed.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;

use super::client::{BillingClient, BillingError};

/// How long a snapshot is authoritative without refetch.
pub const FRESH_TTL: Duration = Duration::from_secs(2 * 60);

/// Additional window during which an expired snapshot may still satisfy
/// requests if the billing service is unreachable.
pub const STALE_TTL: Duration = Duration::from_secs(10 * 60);

/// How often the janitor sweeps out entries past the grace window.
pub const JANITOR_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Which field set decides whether a snapshot authorizes traffic. The two
/// variants mirror the billing-server contracts in the wild; pick per
/// deployment via `BALANCE_GATE`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BalanceGate {
    /// `claude_balance > 0 || free_tokens > 0`
    #[default]
    ClaudeBalance,
    /// `balance > 0 || free_tokens > 0`
    Balance,
}

#[derive(Debug, thiserror::Error)]
#[error("unrecognized balance gate")]
pub struct InvalidBalanceGate;

impl FromStr for BalanceGate {
    type Err = InvalidBalanceGate;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "claude" => Ok(Self::ClaudeBalance),
            "balance" => Ok(Self::Balance),
            _ => Err(InvalidBalanceGate),
        }
    }
}

/// Cached balance state for one user.
#[derive(Debug, Clone, Copy)]
pub struct BalanceSnapshot {
    pub balance: f64,
    pub free_tokens: f64,
    pub claude_balance: f64,
    pub expires_at: Instant,
}

/// Outcome of a balance check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BalanceResult {
    pub balance: f64,
    pub free_tokens: f64,
    pub ok: bool,
    pub service_unavailable: bool,
}

/// Per-user snapshot map with fresh/stale/fail-closed semantics.
///
/// The map lock is held only for lookups and upserts; the billing fetch
/// itself runs without it.
pub struct BalanceCache {
    entries: Mutex<HashMap<String, BalanceSnapshot>>,
    billing: BillingClient,
    gate: BalanceGate,
    fresh_ttl: Duration,
    stale_ttl: Duration,
}

impl BalanceCache {
    pub fn new(billing: BillingClient, gate: BalanceGate) -> Self {
        Self::with_ttls(billing, gate, FRESH_TTL, STALE_TTL)
    }

    /// Construct with custom TTLs. Production uses [`new`](Self::new); tests
    /// shrink the windows to milliseconds.
    pub fn with_ttls(
        billing: BillingClient,
        gate: BalanceGate,
        fresh_ttl: Duration,
        stale_ttl: Duration,
    ) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            billing,
            gate,
            fresh_ttl,
            stale_ttl,
        }
    }

    /// Check whether a user may spend. A fresh cache hit answers without any
    /// network call; otherwise the billing service is consulted, falling
    /// back to a stale snapshot within the grace window and failing closed
    /// beyond it.
    pub async fn check(&self, user_id: &str, credential: &str) -> BalanceResult {
        let now = Instant::now();
        {
            let entries = self.entries.lock().unwrap();
            if let Some(entry) = entries.get(user_id) {
                if entry.expires_at > now {
                    return self.to_result(entry);
                }
            }
        }

        match self.billing.fetch_balance(credential).await {
            Ok(body) => {
                let snapshot = BalanceSnapshot {
                    balance: body.balance,
                    free_tokens: body.free_tokens,
                    claude_balance: body.claude_balance,
                    expires_at: Instant::now() + self.fresh_ttl,
                };
                self.entries
                    .lock()
                    .unwrap()
                    .insert(user_id.to_string(), snapshot);
                tracing::debug!(
                    user_id = %user_id,
                    balance = snapshot.balance,
                    free_tokens = snapshot.free_tokens,
                    "Balance refreshed"
                );
                self.to_result(&snapshot)
            }
            Err(err) => self.stale_fallback(user_id, &err),
        }
    }

    /// Mark a user's snapshot as just-expired. The snapshot is retained so a
    /// billing outage within the grace window can still be bridged.
    pub fn invalidate(&self, user_id: &str) {
        let mut entries = self.entries.lock().unwrap();
        if let Some(entry) = entries.get_mut(user_id) {
            entry.expires_at = Instant::now();
        }
    }

    /// One janitor pass: evict entries older than the grace window.
    pub fn sweep(&self) {
        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap();
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at + self.stale_ttl > now);
        let evicted = before - entries.len();
        if evicted > 0 {
            tracing::debug!(evicted, remaining = entries.len(), "Balance cache swept");
        }
    }

    /// Spawn the periodic janitor.
    pub fn spawn_janitor(self: Arc<Self>, period: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                self.sweep();
            }
        })
    }

    // -- Inspection hooks -----------------------------------------------

    /// Insert a snapshot directly.
    pub fn seed(&self, user_id: &str, snapshot: BalanceSnapshot) {
        self.entries
            .lock()
            .unwrap()
            .insert(user_id.to_string(), snapshot);
    }

    /// Current snapshot for a user, if any.
    pub fn get(&self, user_id: &str) -> Option<BalanceSnapshot> {
        self.entries.lock().unwrap().get(user_id).copied()
    }

    pub fn clear(&self) {
        self.entries.lock().unwrap().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // -- Internals ------------------------------------------------------

    fn stale_fallback(&self, user_id: &str, err: &BillingError) -> BalanceResult {
        let now = Instant::now();
        let entries = self.entries.lock().unwrap();
        if let Some(entry) = entries.get(user_id) {
            if entry.expires_at + self.stale_ttl > now {
                tracing::warn!(
                    user_id = %user_id,
                    error = %err,
                    "Balance fetch failed, serving stale snapshot"
                );
                return self.to_result(entry);
            }
        }

        tracing::error!(
            user_id = %user_id,
            error = %err,
            "Balance fetch failed with no usable snapshot, failing closed"
        );
        BalanceResult {
            balance: 0.0,
            free_tokens: 0.0,
            ok: false,
            service_unavailable: true,
        }
    }

    fn to_result(&self, entry: &BalanceSnapshot) -> BalanceResult {
        BalanceResult {
            balance: entry.balance,
            free_tokens: entry.free_tokens,
            ok: self.usable(entry),
            service_unavailable: false,
        }
    }

    fn usable(&self, entry: &BalanceSnapshot) -> bool {
        match self.gate {
            BalanceGate::ClaudeBalance => entry.claude_balance > 0.0 || entry.free_tokens > 0.0,
            BalanceGate::Balance => entry.balance > 0.0 || entry.free_tokens > 0.0,
        }
    }
}
