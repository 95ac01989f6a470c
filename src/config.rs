//! Environment-driven configuration.
//!
//! All settings come from the process environment. The three required
//! variables (`ANTHROPIC_API_KEY`, `JWT_SECRET`, `DOMESTIC_API_URL`) abort
//! startup when absent; everything else has a default.

use crate::billing::BalanceGate;

/// Default listen port.
const DEFAULT_PORT: u16 = 3000;

/// Default bind address.
const DEFAULT_HOST: &str = "0.0.0.0";

/// Default upstream base URL.
const DEFAULT_ANTHROPIC_API_URL: &str = "https://api.anthropic.com";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    MissingVar(&'static str),

    #[error("invalid PORT value: {0}")]
    InvalidPort(String),

    #[error("invalid BALANCE_GATE value: {0} (expected \"claude\" or \"balance\")")]
    InvalidGate(String),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    /// Shared upstream key forwarded as `x-api-key` to the Anthropic API.
    pub anthropic_api_key: String,
    /// Upstream base URL, overridable for tests.
    pub anthropic_api_url: String,
    /// HS256 secret for verifying client bearer tokens.
    pub jwt_secret: String,
    /// Billing service base URL.
    pub domestic_api_url: String,
    /// Which field set decides whether a balance snapshot is usable.
    pub balance_gate: BalanceGate,
}

impl Config {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let required = |name: &'static str| -> Result<String, ConfigError> {
            lookup(name)
                .filter(|value| !value.is_empty())
                .ok_or(ConfigError::MissingVar(name))
        };

        let port = match lookup("PORT") {
            Some(raw) => raw.parse().map_err(|_| ConfigError::InvalidPort(raw))?,
            None => DEFAULT_PORT,
        };

        let balance_gate = match lookup("BALANCE_GATE") {
            Some(raw) => raw.parse().map_err(|_| ConfigError::InvalidGate(raw))?,
            None => BalanceGate::default(),
        };

        Ok(Self {
            host: lookup("HOST").unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port,
            anthropic_api_key: required("ANTHROPIC_API_KEY")?,
            anthropic_api_url: lookup("ANTHROPIC_API_URL")
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_ANTHROPIC_API_URL.to_string()),
            jwt_secret: required("JWT_SECRET")?,
            domestic_api_url: required("DOMESTIC_API_URL")?
                .trim_end_matches('/')
                .to_string(),
            balance_gate,
        })
    }

    /// Socket address string for the listener.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn base_vars() -> HashMap<&'static str, &'static str> {
        HashMap::from([
            ("ANTHROPIC_API_KEY", "sk-ant-test"),
            ("JWT_SECRET", "secret"),
            ("DOMESTIC_API_URL", "https://billing.example.com"),
        ])
    }

    fn load(vars: &HashMap<&'static str, &'static str>) -> Result<Config, ConfigError> {
        Config::from_lookup(|name| vars.get(name).map(|v| v.to_string()))
    }

    #[test]
    fn test_defaults() {
        let config = load(&base_vars()).unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 3000);
        assert_eq!(config.anthropic_api_url, "https://api.anthropic.com");
        assert_eq!(config.balance_gate, BalanceGate::ClaudeBalance);
        assert_eq!(config.listen_addr(), "0.0.0.0:3000");
    }

    #[test]
    fn test_missing_required_var() {
        let mut vars = base_vars();
        vars.remove("JWT_SECRET");
        let err = load(&vars).unwrap_err();
        assert!(matches!(err, ConfigError::MissingVar("JWT_SECRET")));
    }

    #[test]
    fn test_empty_required_var_is_missing() {
        let mut vars = base_vars();
        vars.insert("ANTHROPIC_API_KEY", "");
        let err = load(&vars).unwrap_err();
        assert!(matches!(err, ConfigError::MissingVar("ANTHROPIC_API_KEY")));
    }

    #[test]
    fn test_port_override() {
        let mut vars = base_vars();
        vars.insert("PORT", "8080");
        let config = load(&vars).unwrap();
        assert_eq!(config.port, 8080);
    }

    #[test]
    fn test_invalid_port() {
        let mut vars = base_vars();
        vars.insert("PORT", "not-a-port");
        assert!(matches!(load(&vars), Err(ConfigError::InvalidPort(_))));
    }

    #[test]
    fn test_trailing_slash_trimmed() {
        let mut vars = base_vars();
        vars.insert("DOMESTIC_API_URL", "https://billing.example.com/");
        vars.insert("ANTHROPIC_API_URL", "http://127.0.0.1:9999/");
        let config = load(&vars).unwrap();
        assert_eq!(config.domestic_api_url, "https://billing.example.com");
        assert_eq!(config.anthropic_api_url, "http://127.0.0.1:9999");
    }

    #[test]
    fn test_balance_gate_variants() {
        let mut vars = base_vars();
        vars.insert("BALANCE_GATE", "balance");
        let config = load(&vars).unwrap();
        assert_eq!(config.balance_gate, BalanceGate::Balance);

        vars.insert("BALANCE_GATE", "what");
        assert!(matches!(load(&vars), Err(ConfigError::InvalidGate(_))));
    }
}
