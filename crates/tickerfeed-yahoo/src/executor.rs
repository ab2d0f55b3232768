//! Authenticated request execution.
//!
//! [`RequestExecutor::execute`] turns a [`RequestDescriptor`] into an
//! authenticated HTTP call. Every data request gets the crumb of the active
//! strategy plus the default query parameters. An error status on the first
//! attempt switches the session to the other cookie strategy and the request
//! is sent exactly once more. Whatever the second attempt returns is final.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use reqwest::Url;
use serde_json::Value;
use tickerfeed_core::{DataError, Result};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::session::{Credentials, Session};
use crate::transport::{Body, HttpRequest, HttpResponse, Method};

/// Provider name reported in rate-limit errors.
pub const PROVIDER_NAME: &str = "Yahoo Finance";

/// Query parameter carrying the crumb. Owned by the executor.
const CRUMB_PARAM: &str = "crumb";

/// Parameters added to every request unless the caller sets them.
const DEFAULT_PARAMS: [(&str, &str); 2] = [("formatted", "false"), ("corsDomain", "finance.yahoo.com")];

/// What to request, without any authentication material.
#[derive(Clone, Debug, PartialEq)]
pub struct RequestDescriptor {
    /// HTTP method.
    pub method: Method,
    /// Absolute URL without query string.
    pub url: String,
    /// Query parameters.
    pub params: BTreeMap<String, String>,
    /// JSON body, sent only with [`Method::Post`].
    pub body: Option<Value>,
    /// Overrides the session timeout.
    pub timeout: Option<Duration>,
}

impl RequestDescriptor {
    /// A GET request.
    #[must_use]
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            url: url.into(),
            params: BTreeMap::new(),
            body: None,
            timeout: None,
        }
    }

    /// A POST request with a JSON body.
    #[must_use]
    pub fn post(url: impl Into<String>, body: Value) -> Self {
        Self {
            method: Method::Post,
            url: url.into(),
            params: BTreeMap::new(),
            body: Some(body),
            timeout: None,
        }
    }

    /// Adds a query parameter.
    #[must_use]
    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Sets a per-request timeout.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Executes descriptors against a shared [`Session`].
#[derive(Clone, Debug)]
pub struct RequestExecutor {
    session: Arc<Session>,
}

impl RequestExecutor {
    /// Creates an executor bound to `session`.
    #[must_use]
    pub const fn new(session: Arc<Session>) -> Self {
        Self { session }
    }

    /// The session used for credentials.
    #[must_use]
    pub const fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Sends `descriptor` with credentials, retrying once under the other
    /// strategy if the first attempt fails.
    ///
    /// A handshake failure on the first attempt counts as that attempt's
    /// failure and consumes the switch.
    ///
    /// # Errors
    ///
    /// - [`DataError::InvalidParameter`] if the caller supplied a crumb.
    /// - [`DataError::Cancelled`] if `cancel` fires before completion.
    /// - [`DataError::Auth`] if no crumb can be obtained after the switch.
    /// - [`DataError::RateLimited`] if the final status is 429.
    /// - [`DataError::Http`] for any other final status of 400 or above.
    /// - [`DataError::Network`] for transport failures.
    #[instrument(skip(self, descriptor, cancel), fields(url = %descriptor.url))]
    pub async fn execute(
        &self,
        descriptor: &RequestDescriptor,
        cancel: &CancellationToken,
    ) -> Result<HttpResponse> {
        if descriptor.params.contains_key(CRUMB_PARAM) {
            return Err(DataError::InvalidParameter(
                "the crumb parameter is managed by the session".to_string(),
            ));
        }
        if cancel.is_cancelled() {
            return Err(DataError::Cancelled);
        }

        let active = self.session.strategy().await;
        let failed = match cancellable(cancel, self.session.credentials()).await {
            Ok(credentials) => {
                let response = self.attempt(descriptor, &credentials, cancel).await?;
                if !response.is_error() {
                    return Ok(response);
                }
                warn!(status = response.status, strategy = %credentials.strategy, "request failed");
                credentials.strategy
            }
            Err(DataError::Auth(reason)) => {
                warn!(strategy = %active, %reason, "handshake failed");
                active
            }
            Err(e) => return Err(e),
        };

        let strategy = self.session.switch_from(failed).await;
        debug!(%strategy, "retrying under switched strategy");

        let credentials = cancellable(cancel, self.session.credentials()).await?;
        let response = self.attempt(descriptor, &credentials, cancel).await?;
        classify(response)
    }

    async fn attempt(
        &self,
        descriptor: &RequestDescriptor,
        credentials: &Credentials,
        cancel: &CancellationToken,
    ) -> Result<HttpResponse> {
        let request = self.build(descriptor, credentials)?;
        let response = cancellable(cancel, self.session.send(request, credentials)).await?;
        debug!(status = response.status, strategy = %credentials.strategy, "response received");
        Ok(response)
    }

    fn build(&self, descriptor: &RequestDescriptor, credentials: &Credentials) -> Result<HttpRequest> {
        let mut url = Url::parse(&descriptor.url)
            .map_err(|e| DataError::InvalidParameter(format!("invalid URL {}: {e}", descriptor.url)))?;
        {
            let mut query = url.query_pairs_mut();
            query.extend_pairs(&descriptor.params);
            for (key, value) in DEFAULT_PARAMS {
                if !descriptor.params.contains_key(key) {
                    query.append_pair(key, value);
                }
            }
            query.append_pair(CRUMB_PARAM, &credentials.crumb);
        }

        let timeout = descriptor.timeout.unwrap_or_else(|| self.session.timeout());
        Ok(match (descriptor.method, &descriptor.body) {
            (Method::Post, Some(body)) => HttpRequest::post(url, Body::Json(body.clone()), timeout),
            (Method::Post, None) => HttpRequest {
                method: Method::Post,
                url,
                body: None,
                timeout,
            },
            (Method::Get, _) => HttpRequest::get(url, timeout),
        })
    }
}

/// Maps the status of the final attempt onto the error taxonomy.
fn classify(response: HttpResponse) -> Result<HttpResponse> {
    match response.status {
        429 => Err(DataError::RateLimited {
            provider: PROVIDER_NAME.to_string(),
            retry_after: None,
        }),
        status if status >= 400 => Err(DataError::Http { status }),
        _ => Ok(response),
    }
}

/// Races `future` against `cancel`.
async fn cancellable<T>(
    cancel: &CancellationToken,
    future: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(DataError::Cancelled),
        result = future => result,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;
    use crate::session::Strategy;
    use crate::testing::ScriptedTransport;
    use crate::transport::Transport;

    const DATA_URL: &str = "https://query2.finance.yahoo.com/v8/finance/chart/AAPL";
    const BASIC_CRUMB: &str = "https://query1.finance.yahoo.com/v1/test/getcrumb";
    const CSRF_CRUMB: &str = "https://query2.finance.yahoo.com/v1/test/getcrumb";

    fn executor(transport: &Arc<ScriptedTransport>) -> RequestExecutor {
        let session = Session::with_transport(
            SessionConfig::default(),
            Arc::clone(transport) as Arc<dyn Transport>,
        );
        RequestExecutor::new(Arc::new(session))
    }

    #[tokio::test]
    async fn test_success_carries_crumb_and_defaults() {
        let transport = Arc::new(ScriptedTransport::new().with_auth().route(DATA_URL, 200, "{}"));
        let executor = executor(&transport);

        let descriptor = RequestDescriptor::get(DATA_URL).param("interval", "1d");
        let response = executor
            .execute(&descriptor, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(transport.calls_to(DATA_URL), 1);
        assert_eq!(transport.last_param(DATA_URL, "crumb").as_deref(), Some("crumb-basic"));
        assert_eq!(transport.last_param(DATA_URL, "formatted").as_deref(), Some("false"));
        assert_eq!(
            transport.last_param(DATA_URL, "corsDomain").as_deref(),
            Some("finance.yahoo.com")
        );
        assert_eq!(transport.last_param(DATA_URL, "interval").as_deref(), Some("1d"));
    }

    #[tokio::test]
    async fn test_caller_defaults_win() {
        let transport = Arc::new(ScriptedTransport::new().with_auth().route(DATA_URL, 200, "{}"));
        let executor = executor(&transport);

        let descriptor = RequestDescriptor::get(DATA_URL).param("formatted", "true");
        executor
            .execute(&descriptor, &CancellationToken::new())
            .await
            .unwrap();

        let request = transport.last_request(DATA_URL).unwrap();
        let formatted: Vec<_> = request
            .url
            .query_pairs()
            .filter(|(k, _)| k == "formatted")
            .map(|(_, v)| v.into_owned())
            .collect();
        assert_eq!(formatted, vec!["true".to_string()]);
    }

    #[tokio::test]
    async fn test_server_error_retries_exactly_once() {
        let transport = Arc::new(ScriptedTransport::new().with_auth().route(DATA_URL, 500, ""));
        let executor = executor(&transport);

        let err = executor
            .execute(&RequestDescriptor::get(DATA_URL), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, DataError::Http { status: 500 }));
        assert_eq!(transport.calls_to(DATA_URL), 2);
        assert_eq!(executor.session().strategy().await, Strategy::Csrf);
    }

    #[tokio::test]
    async fn test_rate_limit_after_retry() {
        let transport = Arc::new(ScriptedTransport::new().with_auth().route(DATA_URL, 429, ""));
        let executor = executor(&transport);

        let err = executor
            .execute(&RequestDescriptor::get(DATA_URL), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            DataError::RateLimited { ref provider, .. } if provider == PROVIDER_NAME
        ));
        assert_eq!(transport.calls_to(DATA_URL), 2);
    }

    #[tokio::test]
    async fn test_retry_uses_new_strategy_crumb() {
        let transport = Arc::new(
            ScriptedTransport::new()
                .with_auth()
                .sequence(DATA_URL, &[(401, ""), (200, "{}")]),
        );
        let executor = executor(&transport);

        let response = executor
            .execute(&RequestDescriptor::get(DATA_URL), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(transport.calls_to(DATA_URL), 2);
        assert_eq!(transport.last_param(DATA_URL, "crumb").as_deref(), Some("crumb-csrf"));
    }

    #[tokio::test]
    async fn test_switched_strategy_persists() {
        let transport = Arc::new(
            ScriptedTransport::new()
                .with_auth()
                .sequence(DATA_URL, &[(401, ""), (200, "{}")]),
        );
        let executor = executor(&transport);
        let cancel = CancellationToken::new();

        executor
            .execute(&RequestDescriptor::get(DATA_URL), &cancel)
            .await
            .unwrap();
        executor
            .execute(&RequestDescriptor::get(DATA_URL), &cancel)
            .await
            .unwrap();

        assert_eq!(transport.calls_to(BASIC_CRUMB), 1);
        assert_eq!(transport.calls_to(CSRF_CRUMB), 1);
        assert_eq!(transport.calls_to(DATA_URL), 3);
    }

    #[tokio::test]
    async fn test_handshake_failure_consumes_switch() {
        let transport = Arc::new(
            ScriptedTransport::new()
                .with_auth()
                .route(BASIC_CRUMB, 500, "")
                .route(DATA_URL, 200, "{}"),
        );
        let executor = executor(&transport);

        executor
            .execute(&RequestDescriptor::get(DATA_URL), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(transport.calls_to(DATA_URL), 1);
        assert_eq!(transport.last_param(DATA_URL, "crumb").as_deref(), Some("crumb-csrf"));
    }

    #[tokio::test]
    async fn test_both_handshakes_fail() {
        let transport = Arc::new(
            ScriptedTransport::new()
                .with_auth()
                .route(BASIC_CRUMB, 500, "")
                .route(CSRF_CRUMB, 200, "<html></html>")
                .route(DATA_URL, 200, "{}"),
        );
        let executor = executor(&transport);

        let err = executor
            .execute(&RequestDescriptor::get(DATA_URL), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, DataError::Auth(_)));
        assert_eq!(transport.calls_to(DATA_URL), 0);
    }

    #[tokio::test]
    async fn test_manual_crumb_rejected() {
        let transport = Arc::new(ScriptedTransport::new().with_auth().route(DATA_URL, 200, "{}"));
        let executor = executor(&transport);

        let descriptor = RequestDescriptor::get(DATA_URL).param("crumb", "mine");
        let err = executor
            .execute(&descriptor, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, DataError::InvalidParameter(_)));
        assert_eq!(transport.calls_to(""), 0);
    }

    #[tokio::test]
    async fn test_cancelled_before_send() {
        let transport = Arc::new(ScriptedTransport::new().with_auth().route(DATA_URL, 200, "{}"));
        let executor = executor(&transport);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = executor
            .execute(&RequestDescriptor::get(DATA_URL), &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, DataError::Cancelled));
        assert_eq!(transport.calls_to(DATA_URL), 0);
    }

    #[tokio::test]
    async fn test_cancel_in_flight_leaves_other_calls_alone() {
        const OTHER_URL: &str = "https://query2.finance.yahoo.com/v10/finance/quoteSummary/AAPL";
        let transport = Arc::new(
            ScriptedTransport::new()
                .with_auth()
                .hang(DATA_URL)
                .route(OTHER_URL, 200, "{}"),
        );
        let executor = executor(&transport);

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let hanging = RequestDescriptor::get(DATA_URL);
        let other = RequestDescriptor::get(OTHER_URL);
        let untouched = CancellationToken::new();
        let (cancelled, completed) = tokio::time::timeout(Duration::from_secs(5), async {
            tokio::join!(
                executor.execute(&hanging, &cancel),
                executor.execute(&other, &untouched)
            )
        })
        .await
        .expect("cancellation should end the hanging call");

        assert!(matches!(cancelled, Err(DataError::Cancelled)));
        // No retry after cancellation, and the strategy is untouched.
        assert_eq!(transport.calls_to(DATA_URL), 1);
        assert_eq!(executor.session().strategy().await, Strategy::Basic);
        assert_eq!(completed.unwrap().status, 200);
        assert!(!untouched.is_cancelled());
    }

    #[tokio::test]
    async fn test_post_sends_json_body() {
        const SCREENER: &str = "https://query2.finance.yahoo.com/v1/finance/screener";
        let transport = Arc::new(ScriptedTransport::new().with_auth().route(SCREENER, 200, "{}"));
        let executor = executor(&transport);

        let body = serde_json::json!({"size": 25, "quoteType": "EQUITY"});
        executor
            .execute(
                &RequestDescriptor::post(SCREENER, body.clone()),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        let request = transport.last_request(SCREENER).unwrap();
        assert_eq!(request.method, Method::Post);
        assert_eq!(request.body, Some(Body::Json(body)));
    }
}
