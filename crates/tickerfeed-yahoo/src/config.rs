//! Session configuration.

use std::time::Duration;

use crate::session::Strategy;

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Browser user agent; the upstream rejects obvious library agents.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/58.0.3029.110 Safari/537.3";

/// Settings consumed by a [`Session`](crate::session::Session).
///
/// All fields are optional in spirit: the default is no proxy, a 30 second
/// timeout, a browser user agent and the basic cookie strategy.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionConfig {
    /// Proxy URL applied to every request, e.g. `http://127.0.0.1:8080`.
    pub proxy: Option<String>,
    /// Timeout used when a request does not carry its own.
    pub timeout: Duration,
    /// `User-Agent` header.
    pub user_agent: String,
    /// Strategy the session starts with.
    pub strategy: Strategy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            proxy: None,
            timeout: DEFAULT_TIMEOUT,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            strategy: Strategy::default(),
        }
    }
}

impl SessionConfig {
    /// Routes all traffic through `proxy`.
    #[must_use]
    pub fn with_proxy(mut self, proxy: impl Into<String>) -> Self {
        self.proxy = Some(proxy.into());
        self
    }

    /// Sets the default request timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Overrides the user agent.
    #[must_use]
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Sets the initial cookie strategy.
    #[must_use]
    pub const fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }
}
