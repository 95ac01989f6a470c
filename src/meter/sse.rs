//! Inline SSE usage sniffer.
//!
//! Parses the textual event stream the Anthropic Messages API emits,
//! accumulating token counts and the resolved model id. The extractor never
//! owns the bytes it is shown -- the caller forwards every chunk downstream
//! unchanged and only lends it here for inspection.

use serde_json::Value;

use super::UsageTokens;

/// Incremental usage/model extractor for an SSE byte stream.
///
/// Feed raw chunks with [`push_chunk`](Self::push_chunk); call
/// [`finish`](Self::finish) once the stream ends to flush a trailing
/// partial line. Accessors are valid at any point and reflect the most
/// recent event observed.
#[derive(Debug, Default)]
pub struct UsageExtractor {
    buffer: String,
    usage: UsageTokens,
    model: Option<String>,
}

impl UsageExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Observe one upstream chunk. Complete lines are parsed; the trailing
    /// partial line is retained until the next chunk.
    pub fn push_chunk(&mut self, chunk: &[u8]) {
        self.buffer.push_str(&String::from_utf8_lossy(chunk));

        while let Some(pos) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=pos).collect();
            self.scan_line(&line);
        }
    }

    /// Flush whatever remains in the line buffer through the parser.
    pub fn finish(&mut self) {
        if !self.buffer.is_empty() {
            let line = std::mem::take(&mut self.buffer);
            self.scan_line(&line);
        }
    }

    pub fn usage(&self) -> UsageTokens {
        self.usage
    }

    pub fn model(&self) -> Option<&str> {
        self.model.as_deref()
    }

    fn scan_line(&mut self, line: &str) {
        let Some(payload) = line.trim_end_matches(['\n', '\r']).strip_prefix("data: ") else {
            return;
        };

        let payload = payload.trim();
        if payload == "[DONE]" {
            return;
        }

        // Anything that is not JSON (comments, partial garbage) is skipped.
        let Ok(event) = serde_json::from_str::<Value>(payload) else {
            return;
        };
        self.observe(&event);
    }

    fn observe(&mut self, event: &Value) {
        match event.get("type").and_then(Value::as_str) {
            Some("message_start") => {
                let Some(message) = event.get("message") else {
                    return;
                };
                if let Some(usage) = message.get("usage") {
                    self.usage.input_tokens = count(usage, "input_tokens").unwrap_or(0);
                    self.usage.cache_read_tokens =
                        count(usage, "cache_read_input_tokens").unwrap_or(0);
                    self.usage.cache_creation_tokens =
                        count(usage, "cache_creation_input_tokens").unwrap_or(0);
                }
                if let Some(model) = message.get("model").and_then(Value::as_str) {
                    self.model = Some(model.to_string());
                }
            }
            Some("message_delta") => {
                let Some(usage) = event.get("usage") else {
                    return;
                };
                // Delta events carry running totals: overwrite, never add.
                if let Some(n) = count(usage, "output_tokens") {
                    self.usage.output_tokens = n;
                }
                if let Some(n) = count(usage, "input_tokens") {
                    self.usage.input_tokens = n;
                }
                if let Some(n) = count(usage, "cache_read_input_tokens") {
                    self.usage.cache_read_tokens = n;
                }
                if let Some(n) = count(usage, "cache_creation_input_tokens") {
                    self.usage.cache_creation_tokens = n;
                }
            }
            _ => {}
        }
    }
}

fn count(usage: &Value, field: &str) -> Option<u64> {
    usage.get(field).and_then(Value::as_u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(extractor: &mut UsageExtractor, text: &str) {
        extractor.push_chunk(text.as_bytes());
    }

    #[test]
    fn test_message_start_seeds_usage_and_model() {
        let mut extractor = UsageExtractor::new();
        feed(
            &mut extractor,
            "event: message_start\n\
             data: {\"type\":\"message_start\",\"message\":{\"model\":\"claude-sonnet-4-6-20250514\",\"usage\":{\"input_tokens\":500,\"cache_read_input_tokens\":100}}}\n\n",
        );

        assert_eq!(extractor.usage().input_tokens, 500);
        assert_eq!(extractor.usage().cache_read_tokens, 100);
        assert_eq!(extractor.usage().cache_creation_tokens, 0);
        assert_eq!(extractor.model(), Some("claude-sonnet-4-6-20250514"));
    }

    #[test]
    fn test_message_delta_overwrites_totals() {
        let mut extractor = UsageExtractor::new();
        feed(
            &mut extractor,
            "data: {\"type\":\"message_delta\",\"usage\":{\"output_tokens\":10}}\n\
             data: {\"type\":\"message_delta\",\"usage\":{\"output_tokens\":150}}\n",
        );

        // Running totals, not increments.
        assert_eq!(extractor.usage().output_tokens, 150);
    }

    #[test]
    fn test_delta_preserves_unmentioned_fields() {
        let mut extractor = UsageExtractor::new();
        feed(
            &mut extractor,
            "data: {\"type\":\"message_start\",\"message\":{\"usage\":{\"input_tokens\":500}}}\n\
             data: {\"type\":\"message_delta\",\"usage\":{\"output_tokens\":42}}\n",
        );

        assert_eq!(extractor.usage().input_tokens, 500);
        assert_eq!(extractor.usage().output_tokens, 42);
    }

    #[test]
    fn test_chunk_split_mid_line() {
        let mut extractor = UsageExtractor::new();
        let event =
            "data: {\"type\":\"message_delta\",\"usage\":{\"output_tokens\":77}}\n";
        let (left, right) = event.split_at(30);

        feed(&mut extractor, left);
        assert_eq!(extractor.usage().output_tokens, 0);

        feed(&mut extractor, right);
        assert_eq!(extractor.usage().output_tokens, 77);
    }

    #[test]
    fn test_finish_flushes_trailing_line() {
        let mut extractor = UsageExtractor::new();
        // No trailing newline: the event sits in the buffer.
        feed(
            &mut extractor,
            "data: {\"type\":\"message_delta\",\"usage\":{\"output_tokens\":9}}",
        );
        assert_eq!(extractor.usage().output_tokens, 0);

        extractor.finish();
        assert_eq!(extractor.usage().output_tokens, 9);
    }

    #[test]
    fn test_done_sentinel_and_garbage_ignored() {
        let mut extractor = UsageExtractor::new();
        feed(
            &mut extractor,
            "data: [DONE]\n\
             data: {broken json\n\
             : keep-alive comment\n\
             event: ping\n\
             data: {\"type\":\"content_block_delta\",\"delta\":{\"text\":\"hi\"}}\n",
        );

        assert_eq!(extractor.usage(), UsageTokens::default());
        assert_eq!(extractor.model(), None);
    }

    #[test]
    fn test_crlf_lines() {
        let mut extractor = UsageExtractor::new();
        feed(
            &mut extractor,
            "data: {\"type\":\"message_delta\",\"usage\":{\"output_tokens\":5}}\r\n\r\n",
        );
        assert_eq!(extractor.usage().output_tokens, 5);
    }

    #[test]
    fn test_full_stream_sequence() {
        let mut extractor = UsageExtractor::new();
        feed(
            &mut extractor,
            "data: {\"type\":\"message_start\",\"message\":{\"model\":\"claude-sonnet-4-6-20250514\",\"usage\":{\"input_tokens\":500,\"cache_read_input_tokens\":100}}}\n\n\
             data: {\"type\":\"content_block_start\",\"index\":0}\n\n\
             data: {\"type\":\"content_block_delta\",\"delta\":{\"text\":\"Hello\"}}\n\n\
             data: {\"type\":\"message_delta\",\"usage\":{\"output_tokens\":150}}\n\n\
             data: [DONE]\n\n",
        );
        extractor.finish();

        let usage = extractor.usage();
        assert_eq!(usage.input_tokens, 500);
        assert_eq!(usage.output_tokens, 150);
        assert_eq!(usage.cache_read_tokens, 100);
        assert_eq!(usage.total(), 750);
        assert_eq!(extractor.model(), Some("claude-sonnet-4-6-20250514"));
    }
}
