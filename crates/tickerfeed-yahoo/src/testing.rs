//! Scripted transport for unit tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use reqwest::cookie::Jar;
use tickerfeed_core::Result;

use crate::transport::{HttpRequest, HttpResponse, Transport};

#[derive(Debug)]
struct Route {
    prefix: String,
    responses: VecDeque<HttpResponse>,
}

/// Answers requests from canned responses keyed by URL prefix.
///
/// A route with several responses plays them in order and then keeps
/// repeating the last one. Unrouted URLs get a 404. Hanging prefixes never
/// answer.
#[derive(Debug, Default)]
pub(crate) struct ScriptedTransport {
    routes: Mutex<Vec<Route>>,
    hanging: Mutex<Vec<String>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl ScriptedTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Always answers `prefix` with `status` and `body`.
    pub(crate) fn route(self, prefix: &str, status: u16, body: &str) -> Self {
        self.sequence(prefix, &[(status, body)])
    }

    /// Answers `prefix` with `responses` in order.
    pub(crate) fn sequence(self, prefix: &str, responses: &[(u16, &str)]) -> Self {
        {
            let mut routes = self.routes.lock().unwrap();
            routes.retain(|r| r.prefix != prefix);
            routes.push(Route {
                prefix: prefix.to_string(),
                responses: responses
                    .iter()
                    .map(|(status, body)| HttpResponse::new(*status, *body))
                    .collect(),
            });
        }
        self
    }

    /// Never answers requests to `prefix`.
    pub(crate) fn hang(self, prefix: &str) -> Self {
        self.hanging.lock().unwrap().push(prefix.to_string());
        self
    }

    /// Routes for both handshakes, each succeeding with its own crumb.
    pub(crate) fn with_auth(self) -> Self {
        self.route("https://fc.yahoo.com", 404, "")
            .route(
                "https://query1.finance.yahoo.com/v1/test/getcrumb",
                200,
                "crumb-basic",
            )
            .route(
                "https://guce.yahoo.com/consent",
                200,
                r#"<form method="post">
                    <input type="hidden" name="csrfToken" value="csrf-abc">
                    <input type="hidden" name="sessionId" value="session-1">
                </form>"#,
            )
            .route("https://consent.yahoo.com/v2/collectConsent", 200, "")
            .route("https://guce.yahoo.com/copyConsent", 200, "")
            .route(
                "https://query2.finance.yahoo.com/v1/test/getcrumb",
                200,
                "crumb-csrf",
            )
    }

    /// Number of requests whose URL starts with `prefix`.
    pub(crate) fn calls_to(&self, prefix: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.url.as_str().starts_with(prefix))
            .count()
    }

    /// Most recent request whose URL starts with `prefix`.
    pub(crate) fn last_request(&self, prefix: &str) -> Option<HttpRequest> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|r| r.url.as_str().starts_with(prefix))
            .cloned()
    }

    /// Value of query parameter `key` on the most recent request to `prefix`.
    pub(crate) fn last_param(&self, prefix: &str, key: &str) -> Option<String> {
        self.last_request(prefix)?
            .url
            .query_pairs()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.into_owned())
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: HttpRequest, _cookies: Arc<Jar>) -> Result<HttpResponse> {
        let url = request.url.to_string();
        self.requests.lock().unwrap().push(request);

        let hangs = self
            .hanging
            .lock()
            .unwrap()
            .iter()
            .any(|prefix| url.starts_with(prefix.as_str()));
        if hangs {
            std::future::pending::<()>().await;
        }

        let mut routes = self.routes.lock().unwrap();
        let route = routes
            .iter_mut()
            .filter(|r| url.starts_with(&r.prefix))
            .max_by_key(|r| r.prefix.len());

        Ok(match route {
            Some(route) if route.responses.len() > 1 => route.responses.pop_front().unwrap(),
            Some(route) => route.responses[0].clone(),
            None => HttpResponse::new(404, ""),
        })
    }
}
