pub mod api;
pub mod auth;
pub mod billing;
pub mod config;
pub mod error;
pub mod meter;
pub mod pricing;

use std::sync::Arc;

use crate::auth::TokenVerifier;
use crate::billing::{BalanceCache, UsageReporter};
use crate::config::Config;
use crate::pricing::PricingTable;

/// Shared application state accessible from all handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub verifier: Arc<TokenVerifier>,
    pub pricing: Arc<PricingTable>,
    pub balance: Arc<BalanceCache>,
    pub reporter: Arc<UsageReporter>,
    pub http: reqwest::Client,
}
