//! HTTP transport seam.
//!
//! The session and executor never talk to `reqwest` directly; they hand an
//! [`HttpRequest`] and the cookie jar of the current strategy to a
//! [`Transport`]. [`ReqwestTransport`] is the pooled production
//! implementation; tests substitute a scripted one.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::cookie::Jar;
use reqwest::{Client, Url};
use serde_json::Value;
use tickerfeed_core::{DataError, Result};
use tokio::sync::Mutex;

use crate::config::SessionConfig;

/// Clients kept by [`ReqwestTransport`]: the current jar's and the previous one's.
const CACHED_CLIENTS: usize = 2;

/// HTTP method.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Method {
    /// GET.
    Get,
    /// POST.
    Post,
}

/// Request body.
#[derive(Clone, Debug, PartialEq)]
pub enum Body {
    /// `application/json` body.
    Json(Value),
    /// `application/x-www-form-urlencoded` body; keys may repeat.
    Form(Vec<(String, String)>),
}

/// A fully built request, query string included.
#[derive(Clone, Debug, PartialEq)]
pub struct HttpRequest {
    /// Method.
    pub method: Method,
    /// Target URL with encoded query.
    pub url: Url,
    /// Optional body.
    pub body: Option<Body>,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl HttpRequest {
    /// A GET request without body.
    #[must_use]
    pub const fn get(url: Url, timeout: Duration) -> Self {
        Self {
            method: Method::Get,
            url,
            body: None,
            timeout,
        }
    }

    /// A POST request with the given body.
    #[must_use]
    pub const fn post(url: Url, body: Body, timeout: Duration) -> Self {
        Self {
            method: Method::Post,
            url,
            body: Some(body),
            timeout,
        }
    }
}

/// Status and text body of a response.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HttpResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response body as text.
    pub body: String,
}

impl HttpResponse {
    /// Creates a response.
    #[must_use]
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// Returns true for 2xx statuses.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }

    /// Returns true for the client and server error range.
    #[must_use]
    pub const fn is_error(&self) -> bool {
        self.status >= 400
    }
}

/// Sends requests with a given cookie jar.
///
/// Implementations must not retry; retry policy belongs to the executor.
#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    /// Sends `request`, reading cookies from and storing cookies into `cookies`.
    async fn send(&self, request: HttpRequest, cookies: Arc<Jar>) -> Result<HttpResponse>;
}

/// `reqwest`-backed transport.
///
/// A pooled client is kept per cookie jar. A strategy switch hands in a fresh
/// jar, which builds a fresh client, so no cookie of the previous strategy can
/// leak into the next one. Clients of the current and the previous jar are
/// kept, so requests still in flight across a switch reuse theirs.
pub struct ReqwestTransport {
    user_agent: String,
    proxy: Option<String>,
    clients: Mutex<VecDeque<(Arc<Jar>, Client)>>,
}

impl fmt::Debug for ReqwestTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReqwestTransport")
            .field("user_agent", &self.user_agent)
            .field("proxy", &self.proxy)
            .finish_non_exhaustive()
    }
}

impl ReqwestTransport {
    /// Creates a transport from the session configuration.
    ///
    /// The client itself is built lazily on the first request.
    #[must_use]
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            user_agent: config.user_agent.clone(),
            proxy: config.proxy.clone(),
            clients: Mutex::new(VecDeque::with_capacity(CACHED_CLIENTS)),
        }
    }

    async fn client_for(&self, cookies: &Arc<Jar>) -> Result<Client> {
        let mut cached = self.clients.lock().await;
        if let Some((_, client)) = cached.iter().find(|(jar, _)| Arc::ptr_eq(jar, cookies)) {
            return Ok(client.clone());
        }

        let mut builder = Client::builder()
            .user_agent(&self.user_agent)
            .cookie_provider(Arc::clone(cookies));
        if let Some(proxy) = &self.proxy {
            let proxy = reqwest::Proxy::all(proxy)
                .map_err(|e| DataError::Network(format!("invalid proxy '{proxy}': {e}")))?;
            builder = builder.proxy(proxy);
        }
        let client = builder
            .build()
            .map_err(|e| DataError::Network(format!("failed to create HTTP client: {e}")))?;

        if cached.len() == CACHED_CLIENTS {
            cached.pop_front();
        }
        cached.push_back((Arc::clone(cookies), client.clone()));
        Ok(client)
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: HttpRequest, cookies: Arc<Jar>) -> Result<HttpResponse> {
        let client = self.client_for(&cookies).await?;

        let mut builder = match request.method {
            Method::Get => client.get(request.url),
            Method::Post => client.post(request.url),
        }
        .timeout(request.timeout);

        builder = match request.body {
            Some(Body::Json(value)) => builder.json(&value),
            Some(Body::Form(fields)) => builder.form(&fields),
            None => builder,
        };

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                DataError::Network(format!("request timed out: {e}"))
            } else {
                DataError::Network(e.to_string())
            }
        })?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| DataError::Network(e.to_string()))?;

        Ok(HttpResponse { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classes() {
        assert!(HttpResponse::new(200, "").is_success());
        assert!(!HttpResponse::new(302, "").is_error());
        assert!(HttpResponse::new(404, "").is_error());
        assert!(HttpResponse::new(500, "").is_error());
        assert!(!HttpResponse::new(500, "").is_success());
    }

    async fn cached_jars(transport: &ReqwestTransport) -> Vec<Arc<Jar>> {
        transport
            .clients
            .lock()
            .await
            .iter()
            .map(|(jar, _)| Arc::clone(jar))
            .collect()
    }

    #[tokio::test]
    async fn test_client_built_per_jar() {
        let transport = ReqwestTransport::new(&SessionConfig::default());
        let first = Arc::new(Jar::default());
        let second = Arc::new(Jar::default());
        let third = Arc::new(Jar::default());

        transport.client_for(&first).await.unwrap();
        transport.client_for(&second).await.unwrap();
        // A straggler on the previous jar reuses its client.
        transport.client_for(&first).await.unwrap();
        let jars = cached_jars(&transport).await;
        assert_eq!(jars.len(), 2);
        assert!(Arc::ptr_eq(&jars[0], &first));
        assert!(Arc::ptr_eq(&jars[1], &second));

        transport.client_for(&third).await.unwrap();
        let jars = cached_jars(&transport).await;
        assert_eq!(jars.len(), 2);
        assert!(Arc::ptr_eq(&jars[0], &second));
        assert!(Arc::ptr_eq(&jars[1], &third));
    }

    #[tokio::test]
    async fn test_invalid_proxy_is_network_error() {
        let config = SessionConfig::default().with_proxy("not a url");
        let transport = ReqwestTransport::new(&config);
        let err = transport
            .client_for(&Arc::new(Jar::default()))
            .await
            .unwrap_err();
        assert!(matches!(err, DataError::Network(_)));
    }
}
