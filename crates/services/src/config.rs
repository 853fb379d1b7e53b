use std::time::Duration;

const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(5);
const DEFAULT_SYNC_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_SUBMIT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Timing and strictness knobs for running sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Period of the background progress push.
    pub sync_interval: Duration,
    /// Upper bound for a single progress push.
    pub sync_timeout: Duration,
    /// Upper bound for the terminal result submission.
    pub submit_timeout: Duration,
    /// Upper bound for status lookup and session registration at start.
    pub request_timeout: Duration,
    /// Period of the cosmetic elapsed-time ticker.
    pub tick_interval: Duration,
    /// Panic on inconsistent persisted progress instead of starting fresh.
    pub strict_resume: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sync_interval: DEFAULT_SYNC_INTERVAL,
            sync_timeout: DEFAULT_SYNC_TIMEOUT,
            submit_timeout: DEFAULT_SUBMIT_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            tick_interval: DEFAULT_TICK_INTERVAL,
            strict_resume: cfg!(debug_assertions),
        }
    }
}

impl EngineConfig {
    #[must_use]
    pub fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = interval;
        self
    }

    #[must_use]
    pub fn with_sync_timeout(mut self, timeout: Duration) -> Self {
        self.sync_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_submit_timeout(mut self, timeout: Duration) -> Self {
        self.submit_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    #[must_use]
    pub fn with_strict_resume(mut self, strict: bool) -> Self {
        self.strict_resume = strict;
        self
    }
}
