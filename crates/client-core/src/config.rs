use std::time::Duration;

use crate::retry::RetryPolicy;

const DEFAULT_LONG_POLL_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_REQUEST_SLACK: Duration = Duration::from_secs(10);

/// Tuning for the background sync loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// How long the server may hold each `/sync` request open.
    pub long_poll_timeout: Duration,
    /// Added to `long_poll_timeout` to get the client-side request timeout.
    pub request_slack: Duration,
    /// Backoff between failed polls.
    pub retry: RetryPolicy,
    /// Filter id or inline filter JSON forwarded as `filter`.
    pub filter: Option<String>,
    /// Presence forwarded as `set_presence` (`online`, `offline`, `unavailable`).
    pub set_presence: Option<String>,
}

impl SyncConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_long_poll_timeout(mut self, timeout: Duration) -> Self {
        self.long_poll_timeout = timeout;
        self
    }

    pub fn with_request_slack(mut self, slack: Duration) -> Self {
        self.request_slack = slack;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    pub fn with_set_presence(mut self, presence: impl Into<String>) -> Self {
        self.set_presence = Some(presence.into());
        self
    }

    /// Transport timeout for one poll.
    pub fn request_timeout(&self) -> Duration {
        self.long_poll_timeout.saturating_add(self.request_slack)
    }

    /// Query parameters for one `/sync` request.
    pub fn query(&self, since: Option<&str>) -> Vec<(String, String)> {
        let mut query = vec![(
            "timeout".to_owned(),
            self.long_poll_timeout.as_millis().to_string(),
        )];
        if let Some(since) = since {
            query.push(("since".to_owned(), since.to_owned()));
        }
        if let Some(filter) = &self.filter {
            query.push(("filter".to_owned(), filter.clone()));
        }
        if let Some(presence) = &self.set_presence {
            query.push(("set_presence".to_owned(), presence.clone()));
        }
        query
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            long_poll_timeout: DEFAULT_LONG_POLL_TIMEOUT,
            request_slack: DEFAULT_REQUEST_SLACK,
            retry: RetryPolicy::default(),
            filter: None,
            set_presence: None,
        }
    }
}
