//! Response observation: token usage extraction from upstream bodies.

mod sse;
mod stream;

pub use sse::UsageExtractor;
pub use stream::MeteredStream;

/// Token counts observed from a single upstream response.
///
/// Populated incrementally while the response is read; all counts are the
/// most recent totals reported by the upstream, not increments.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UsageTokens {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_read_tokens: u64,
    pub cache_creation_tokens: u64,
}

impl UsageTokens {
    /// Sum of all four counts.
    pub fn total(&self) -> u64 {
        self.input_tokens
            + self.output_tokens
            + self.cache_read_tokens
            + self.cache_creation_tokens
    }

    /// Whether this usage is worth reporting.
    pub fn is_billable(&self) -> bool {
        self.input_tokens > 0 || self.output_tokens > 0
    }
}
