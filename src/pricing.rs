//! Model pricing table.
//!
//! Prices are in USD per 1M tokens, split by token class (input, output,
//! cache read, cache write). Lookup is exact-match on the model id; unknown
//! models fall back to a designated default row so cost computation never
//! fails.

use std::collections::HashMap;

use crate::meter::UsageTokens;

// MARK: - Types

/// Per-token-class prices for one model, USD per 1M tokens.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelPricing {
    pub input: f64,
    pub output: f64,
    pub cache_read: f64,
    pub cache_write: f64,
}

/// Static pricing table keyed by model id.
#[derive(Debug, Clone)]
pub struct PricingTable {
    models: HashMap<String, ModelPricing>,
    default: ModelPricing,
}

// MARK: - Implementation

impl PricingTable {
    /// Build the table with current Anthropic pricing.
    /// Source: https://www.anthropic.com/pricing
    pub fn new() -> Self {
        let sonnet = ModelPricing {
            input: 3.00,
            output: 15.00,
            cache_read: 0.30,
            cache_write: 3.75,
        };
        let opus = ModelPricing {
            input: 15.00,
            output: 75.00,
            cache_read: 1.50,
            cache_write: 18.75,
        };
        let haiku = ModelPricing {
            input: 0.80,
            output: 4.00,
            cache_read: 0.08,
            cache_write: 1.00,
        };

        let mut models = HashMap::new();

        // Sonnet family (alias + dated ids).
        models.insert("claude-sonnet-4-6".to_string(), sonnet);
        models.insert("claude-sonnet-4-6-20250514".to_string(), sonnet);
        models.insert("claude-sonnet-4-20250514".to_string(), sonnet);

        // Opus family.
        models.insert("claude-opus-4-1".to_string(), opus);
        models.insert("claude-opus-4-20250514".to_string(), opus);

        // Haiku family.
        models.insert("claude-haiku-3-5".to_string(), haiku);
        models.insert("claude-haiku-3-5-20241022".to_string(), haiku);

        Self {
            models,
            // Unknown models are billed at Sonnet rates.
            default: sonnet,
        }
    }

    /// Pricing for a model, falling back to the default row.
    pub fn get(&self, model: &str) -> &ModelPricing {
        self.models.get(model).unwrap_or(&self.default)
    }

    /// Whether an exact pricing row exists for a model.
    pub fn has_pricing(&self, model: &str) -> bool {
        self.models.contains_key(model)
    }

    /// Compute the USD cost of one response.
    pub fn cost_usd(&self, model: &str, usage: &UsageTokens) -> f64 {
        let pricing = self.get(model);
        (usage.input_tokens as f64 * pricing.input
            + usage.output_tokens as f64 * pricing.output
            + usage.cache_read_tokens as f64 * pricing.cache_read
            + usage.cache_creation_tokens as f64 * pricing.cache_write)
            / 1_000_000.0
    }
}

impl Default for PricingTable {
    fn default() -> Self {
        Self::new()
    }
}

// MARK: - Tests
