use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Token counts reported for one provider call. Zeros are valid: providers
/// omit usage metadata on some chunks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageDelta {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    /// Portion of the prompt served from a context cache.
    #[serde(default)]
    pub cached_tokens: u64,
}

impl UsageDelta {
    pub fn new(prompt_tokens: u64, completion_tokens: u64, total_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens,
            cached_tokens: 0,
        }
    }
}

/// Running totals for the session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageCounters {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    pub cached_tokens: u64,
    pub request_count: u64,
}

/// Identifies one logical request so its usage is recorded at most once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestToken(Uuid);

impl RequestToken {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RequestToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RequestToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Session token usage. Counters only grow until an explicit `reset()`.
#[derive(Debug, Default)]
pub struct UsageAccumulator {
    counters: UsageCounters,
    // Only the latest request can still deliver usage; older tokens are
    // already rejected by the session.
    last_recorded: Option<RequestToken>,
}

impl UsageAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, delta: UsageDelta) {
        let c = &mut self.counters;
        c.prompt_tokens = c.prompt_tokens.saturating_add(delta.prompt_tokens);
        c.completion_tokens = c.completion_tokens.saturating_add(delta.completion_tokens);
        c.total_tokens = c.total_tokens.saturating_add(delta.total_tokens);
        c.cached_tokens = c.cached_tokens.saturating_add(delta.cached_tokens);
        c.request_count += 1;
    }

    /// Record `delta` for `token` unless that request was just counted.
    /// Returns whether the delta was applied.
    pub fn record_for(&mut self, token: RequestToken, delta: UsageDelta) -> bool {
        if self.last_recorded == Some(token) {
            tracing::debug!(request = %token, "usage already recorded, ignoring");
            return false;
        }
        self.last_recorded = Some(token);
        self.record(delta);
        true
    }

    pub fn snapshot(&self) -> UsageCounters {
        self.counters
    }

    pub fn reset(&mut self) {
        self.counters = UsageCounters::default();
        self.last_recorded = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_for_is_idempotent_per_token() {
        let mut acc = UsageAccumulator::new();
        let token = RequestToken::new();
        assert!(acc.record_for(token, UsageDelta::new(3, 4, 7)));
        assert!(!acc.record_for(token, UsageDelta::new(3, 4, 7)));
        assert!(acc.record_for(RequestToken::new(), UsageDelta::new(1, 1, 2)));

        let snap = acc.snapshot();
        assert_eq!(snap.total_tokens, 9);
        assert_eq!(snap.request_count, 2);
    }

    #[test]
    fn reset_forgets_the_last_token() {
        let mut acc = UsageAccumulator::new();
        let token = RequestToken::new();
        acc.record_for(token, UsageDelta::new(1, 1, 2));
        acc.reset();
        assert!(acc.last_recorded.is_none());
        assert_eq!(acc.snapshot(), UsageCounters::default());
        assert!(acc.record_for(RequestToken::new(), UsageDelta::new(2, 2, 4)));
        assert_eq!(acc.snapshot().request_count, 1);
    }

    #[test]
    fn saturates_instead_of_wrapping() {
        let mut acc = UsageAccumulator::new();
        acc.record(UsageDelta::new(u64::MAX, 0, u64::MAX));
        acc.record(UsageDelta::new(5, 0, 5));
        assert_eq!(acc.snapshot().prompt_tokens, u64::MAX);
    }
}
