//! Billing-service integration: balance gating and usage reporting.

pub mod balance;
pub mod client;
pub mod reporter;

pub use balance::{
    BalanceCache, BalanceGate, BalanceResult, BalanceSnapshot, FRESH_TTL, JANITOR_INTERVAL,
    STALE_TTL,
};
pub use client::{BalanceBody, BillingClient, BillingError};
pub use reporter::{
    UsageReporter, BASE_RETRY, MAX_FAILED_REPORTS, MAX_RETRIES, RETRY_SCAN_INTERVAL,
};

use crate::meter::UsageTokens;

/// One completed upstream response, priced and attributed to a user.
/// Immutable once constructed.
#[derive(Debug, Clone, PartialEq)]
pub struct UsageReport {
    pub user_id: String,
    pub model: String,
    pub usage: UsageTokens,
    pub cost: f64,
}
