//! Cookie/crumb session shared by every request against the upstream.
//!
//! A [`Session`] owns the active [`Strategy`], the cookie jar the strategy
//! populated and the cached crumb. Crumbs are acquired lazily by a handshake
//! and cached until the strategy changes. Switching strategies installs an
//! empty jar and forgets the crumb in one step, so a token obtained under one
//! strategy is never sent under the other.
//!
//! The session never switches on its own; the
//! [`RequestExecutor`](crate::executor::RequestExecutor) decides when a failed
//! request warrants a switch.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use reqwest::Url;
use reqwest::cookie::Jar;
use tickerfeed_core::{DataError, Result};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

use crate::config::SessionConfig;
use crate::transport::{Body, HttpRequest, HttpResponse, ReqwestTransport, Transport};

/// Cookie endpoint of the basic handshake.
const COOKIE_URL: &str = "https://fc.yahoo.com";

/// Crumb endpoint of the basic handshake.
const BASIC_CRUMB_URL: &str = "https://query1.finance.yahoo.com/v1/test/getcrumb";

/// Consent page that carries the CSRF form fields.
const CONSENT_URL: &str = "https://guce.yahoo.com/consent";

/// Consent form target.
const COLLECT_CONSENT_URL: &str = "https://consent.yahoo.com/v2/collectConsent";

/// Copies the consent cookies onto the finance domain.
const COPY_CONSENT_URL: &str = "https://guce.yahoo.com/copyConsent";

/// Crumb endpoint of the CSRF handshake.
const CSRF_CRUMB_URL: &str = "https://query2.finance.yahoo.com/v1/test/getcrumb";

/// Way of acquiring cookies and a crumb.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Strategy {
    /// Fetch a cookie from the cookie endpoint, then ask for a crumb.
    #[default]
    Basic,
    /// Walk the consent flow, then ask for a crumb.
    Csrf,
}

impl Strategy {
    /// The strategy a switch moves to.
    #[must_use]
    pub const fn other(self) -> Self {
        match self {
            Self::Basic => Self::Csrf,
            Self::Csrf => Self::Basic,
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Basic => write!(f, "basic"),
            Self::Csrf => write!(f, "csrf"),
        }
    }
}

/// A crumb together with the cookies it is valid for.
#[derive(Clone)]
pub struct Credentials {
    /// Strategy that produced the crumb.
    pub strategy: Strategy,
    /// Anti-CSRF token appended to data requests.
    pub crumb: String,
    cookies: Arc<Jar>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("strategy", &self.strategy)
            .field("crumb", &"<redacted>")
            .finish_non_exhaustive()
    }
}

struct SessionState {
    strategy: Strategy,
    crumb: Option<String>,
    cookies: Arc<Jar>,
    generation: u64,
    transport: Arc<dyn Transport>,
    config: SessionConfig,
}

impl SessionState {
    /// Moves to `strategy` with an empty jar and no crumb.
    fn install(&mut self, strategy: Strategy) {
        self.strategy = strategy;
        self.crumb = None;
        self.cookies = Arc::new(Jar::default());
        self.generation += 1;
    }
}

/// Authenticated session state.
///
/// A session is cheap to share behind an [`Arc`]; all mutation goes through a
/// short internal lock that is never held across network I/O.
pub struct Session {
    timeout: Duration,
    state: Mutex<SessionState>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new(SessionConfig::default())
    }
}

impl Session {
    /// Creates a session that talks HTTP through `reqwest`.
    #[must_use]
    pub fn new(config: SessionConfig) -> Self {
        let transport = Arc::new(ReqwestTransport::new(&config));
        Self::with_transport(config, transport)
    }

    /// Creates a session on top of a custom transport.
    #[must_use]
    pub fn with_transport(config: SessionConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            timeout: config.timeout,
            state: Mutex::new(SessionState {
                strategy: config.strategy,
                crumb: None,
                cookies: Arc::new(Jar::default()),
                generation: 0,
                transport,
                config,
            }),
        }
    }

    /// Default timeout for requests made through this session.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Currently active strategy.
    pub async fn strategy(&self) -> Strategy {
        self.state.lock().await.strategy
    }

    /// Returns credentials for the active strategy, running the handshake if
    /// no crumb is cached.
    ///
    /// A handshake that completes after a concurrent switch is returned to
    /// the caller but not cached.
    ///
    /// # Errors
    ///
    /// Returns [`DataError::Auth`] if the handshake fails.
    pub async fn credentials(&self) -> Result<Credentials> {
        let (strategy, cookies, generation, transport) = {
            let state = self.state.lock().await;
            if let Some(crumb) = &state.crumb {
                return Ok(Credentials {
                    strategy: state.strategy,
                    crumb: crumb.clone(),
                    cookies: Arc::clone(&state.cookies),
                });
            }
            (
                state.strategy,
                Arc::clone(&state.cookies),
                state.generation,
                Arc::clone(&state.transport),
            )
        };

        let crumb = self.handshake(strategy, transport.as_ref(), &cookies).await?;

        let mut state = self.state.lock().await;
        if state.generation == generation {
            state.crumb = Some(crumb.clone());
        } else {
            debug!(%strategy, "session changed during handshake; crumb not cached");
        }

        Ok(Credentials {
            strategy,
            crumb,
            cookies,
        })
    }

    /// Switches to the other strategy if `failed` is still the active one.
    ///
    /// Concurrent requests that fail under the same strategy therefore flip
    /// it once, not once each. Returns the strategy active afterwards.
    pub async fn switch_from(&self, failed: Strategy) -> Strategy {
        let mut state = self.state.lock().await;
        if state.strategy == failed {
            let next = failed.other();
            info!(from = %failed, to = %next, "switching cookie strategy");
            state.install(next);
        }
        state.strategy
    }

    /// Unconditionally switches to the other strategy.
    pub async fn switch_strategy(&self) -> Strategy {
        let mut state = self.state.lock().await;
        let next = state.strategy.other();
        info!(from = %state.strategy, to = %next, "switching cookie strategy");
        state.install(next);
        next
    }

    /// Moves to `strategy`; a no-op if it is already active.
    pub async fn set_strategy(&self, strategy: Strategy) {
        let mut state = self.state.lock().await;
        if state.strategy != strategy {
            state.install(strategy);
        }
    }

    /// Drops cookies and crumb, keeping the active strategy.
    pub async fn reset(&self) {
        let mut state = self.state.lock().await;
        let strategy = state.strategy;
        state.install(strategy);
    }

    /// Replaces the proxy used by the built-in transport.
    ///
    /// Cookies and crumb survive; they are bound to the upstream, not to the
    /// route taken to reach it. Installing a proxy replaces any custom
    /// transport with the built-in one.
    pub async fn set_proxy(&self, proxy: Option<String>) {
        let mut state = self.state.lock().await;
        state.config.proxy = proxy;
        state.transport = Arc::new(ReqwestTransport::new(&state.config));
    }

    /// Sends `request` with the cookies belonging to `credentials`.
    pub(crate) async fn send(
        &self,
        request: HttpRequest,
        credentials: &Credentials,
    ) -> Result<HttpResponse> {
        let transport = Arc::clone(&self.state.lock().await.transport);
        transport
            .send(request, Arc::clone(&credentials.cookies))
            .await
    }

    #[instrument(skip(self, transport, cookies))]
    async fn handshake(
        &self,
        strategy: Strategy,
        transport: &dyn Transport,
        cookies: &Arc<Jar>,
    ) -> Result<String> {
        debug!("acquiring crumb");
        let crumb = match strategy {
            Strategy::Basic => self.basic_handshake(transport, cookies).await,
            Strategy::Csrf => self.csrf_handshake(transport, cookies).await,
        }?;
        debug!("crumb acquired");
        Ok(crumb)
    }

    async fn basic_handshake(&self, transport: &dyn Transport, cookies: &Arc<Jar>) -> Result<String> {
        // The cookie endpoint answers with an error status but still sets the cookie.
        self.handshake_get(transport, cookies, parse_url(COOKIE_URL, &[])?)
            .await?;
        self.fetch_crumb(transport, cookies, BASIC_CRUMB_URL).await
    }

    async fn csrf_handshake(&self, transport: &dyn Transport, cookies: &Arc<Jar>) -> Result<String> {
        let page = self
            .handshake_get(transport, cookies, parse_url(CONSENT_URL, &[])?)
            .await?;
        let csrf_token = input_value(&page.body, "csrfToken")
            .ok_or_else(|| DataError::Auth("consent page has no csrfToken".to_string()))?;
        let session_id = input_value(&page.body, "sessionId")
            .ok_or_else(|| DataError::Auth("consent page has no sessionId".to_string()))?;

        let form: Vec<(String, String)> = [
            ("agree", "agree"),
            ("agree", "agree"),
            ("consentUUID", "default"),
            ("sessionId", session_id.as_str()),
            ("csrfToken", csrf_token.as_str()),
            ("originalDoneUrl", "https://finance.yahoo.com/"),
            ("namespace", "yahoo"),
        ]
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect();

        let url = parse_url(COLLECT_CONSENT_URL, &[("sessionId", session_id.as_str())])?;
        transport
            .send(
                HttpRequest::post(url, Body::Form(form), self.timeout),
                Arc::clone(cookies),
            )
            .await
            .map_err(|e| DataError::Auth(format!("consent submission failed: {e}")))?;

        let url = parse_url(COPY_CONSENT_URL, &[("sessionId", session_id.as_str())])?;
        self.handshake_get(transport, cookies, url).await?;

        self.fetch_crumb(transport, cookies, CSRF_CRUMB_URL).await
    }

    async fn handshake_get(
        &self,
        transport: &dyn Transport,
        cookies: &Arc<Jar>,
        url: Url,
    ) -> Result<HttpResponse> {
        let endpoint = url.to_string();
        transport
            .send(HttpRequest::get(url, self.timeout), Arc::clone(cookies))
            .await
            .map_err(|e| DataError::Auth(format!("{endpoint}: {e}")))
    }

    async fn fetch_crumb(&self, transport: &dyn Transport, cookies: &Arc<Jar>, url: &str) -> Result<String> {
        let response = self
            .handshake_get(transport, cookies, parse_url(url, &[])?)
            .await?;
        if !response.is_success() {
            return Err(DataError::Auth(format!(
                "crumb endpoint returned HTTP {}",
                response.status
            )));
        }
        validate_crumb(&response.body)
    }
}

fn parse_url(base: &str, params: &[(&str, &str)]) -> Result<Url> {
    let mut url =
        Url::parse(base).map_err(|e| DataError::Auth(format!("invalid handshake URL {base}: {e}")))?;
    if !params.is_empty() {
        url.query_pairs_mut().extend_pairs(params);
    }
    Ok(url)
}

/// Accepts a crumb body only if it looks like a token.
fn validate_crumb(body: &str) -> Result<String> {
    let crumb = body.trim();
    if crumb.is_empty() {
        return Err(DataError::Auth("crumb endpoint returned an empty body".to_string()));
    }
    if crumb.contains('<') || crumb.contains(char::is_whitespace) {
        return Err(DataError::Auth(
            "crumb endpoint returned markup instead of a token".to_string(),
        ));
    }
    Ok(crumb.to_string())
}

/// Extracts the `value` attribute of the `<input>` whose `name` is `name`.
fn input_value(html: &str, name: &str) -> Option<String> {
    let needle = format!("name=\"{name}\"");
    let at = html.find(&needle)?;
    let start = html[..at].rfind('<')?;
    let end = at + html[at..].find('>')?;
    let tag = &html[start..end];

    let value_at = tag.find("value=\"")? + "value=\"".len();
    let len = tag[value_at..].find('"')?;
    Some(tag[value_at..value_at + len].to_string())
}
