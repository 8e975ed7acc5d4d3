//! Call executor: exactly one physical HTTP exchange per invocation.
//!
//! [`CallExecutor`] resolves the bearer token, stamps the identifying
//! `User-Agent`, and hands a fully prepared request to an
//! [`HttpTransport`]. The transport is the only seam that touches the
//! network, which keeps the rest of the crate testable with canned
//! responses. No retries happen here.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Method;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::{DurableHttpError, TransportError};
use crate::types::{DurableHttpRequest, DurableHttpResponse, HttpHeaders};

pub const AUTHORIZATION: &str = "Authorization";
pub const CONTENT_TYPE: &str = "Content-Type";
pub const USER_AGENT: &str = "User-Agent";

/// A request with every outbound header already computed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedRequest {
    pub method: Method,
    pub uri: Url,
    pub headers: HttpHeaders,
    pub body: Option<String>,
}

/// Performs one physical HTTP exchange.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: PreparedRequest) -> Result<DurableHttpResponse, TransportError>;
}

/// [`HttpTransport`] over a shared `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Redirects are not followed: a 3xx is a terminal response here.
    pub fn new(request_timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| TransportError::with_source("failed to build HTTP client", e))?;
        Ok(Self { client })
    }

    pub fn from_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: PreparedRequest) -> Result<DurableHttpResponse, TransportError> {
        let mut builder = self.client.request(request.method.clone(), request.uri.clone());
        for (name, values) in request.headers.iter() {
            for value in values {
                builder = builder.header(name, value);
            }
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await.map_err(|e| {
            TransportError::with_source(
                format!("{} {} failed", request.method, request.uri),
                e,
            )
        })?;

        let status_code = response.status().as_u16();
        let mut headers = HttpHeaders::new();
        for (name, value) in response.headers() {
            let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
            headers.append(name.as_str(), value);
        }
        let content = response.text().await.map_err(|e| {
            TransportError::with_source(
                format!("failed to read response body from {}", request.uri),
                e,
            )
        })?;

        Ok(DurableHttpResponse {
            status_code,
            headers,
            content,
        })
    }
}

/// Resolves credentials and sends a [`DurableHttpRequest`] over a transport.
#[derive(Clone)]
pub struct CallExecutor {
    transport: Arc<dyn HttpTransport>,
    user_agent: String,
}

impl CallExecutor {
    pub fn new(transport: Arc<dyn HttpTransport>, user_agent: impl Into<String>) -> Self {
        Self {
            transport,
            user_agent: user_agent.into(),
        }
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    /// Send one request. Token resolution and the exchange itself both stop
    /// early if `cancel` fires.
    pub async fn send(
        &self,
        request: &DurableHttpRequest,
        cancel: &CancellationToken,
    ) -> Result<DurableHttpResponse, DurableHttpError> {
        let token = match request.token_source() {
            Some(source) => {
                let token = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(DurableHttpError::Cancelled),
                    token = source.get_token() => token,
                };
                match token {
                    Ok(token) => Some(token),
                    Err(e) => {
                        tracing::warn!(uri = %request.uri(), error = %e, "bearer token unavailable, call not attempted");
                        return Err(e.into());
                    }
                }
            }
            None => None,
        };

        let prepared = self.prepare(request, token.as_deref());
        tracing::info!(method = %prepared.method, uri = %prepared.uri, "sending durable http request");

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(DurableHttpError::Cancelled),
            response = self.transport.send(prepared) => response?,
        };

        tracing::info!(
            method = %request.method(),
            uri = %request.uri(),
            status = response.status_code,
            "durable http response received"
        );
        Ok(response)
    }

    /// Compute the outbound headers for `request`. Never mutates the request.
    pub fn prepare(&self, request: &DurableHttpRequest, token: Option<&str>) -> PreparedRequest {
        let mut headers = request.headers().clone();
        if let Some(body) = request.body() {
            if !headers.contains(CONTENT_TYPE) {
                headers.insert(CONTENT_TYPE, body.content_type.clone());
            }
        }
        headers.insert(USER_AGENT, self.user_agent.clone());
        if let Some(token) = token {
            headers.insert(AUTHORIZATION, format!("Bearer {token}"));
        }

        PreparedRequest {
            method: request.method().clone(),
            uri: request.uri().clone(),
            headers,
            body: request.body().map(|b| b.content.clone()),
        }
    }
}

impl std::fmt::Debug for CallExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallExecutor")
            .field("user_agent", &self.user_agent)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::StaticTokenSource;
    use crate::types::RequestBody;

    fn executor() -> CallExecutor {
        let transport = ReqwestTransport::new(Duration::from_secs(5)).unwrap();
        CallExecutor::new(Arc::new(transport), "durable-http-tests/1.0")
    }

    #[test]
    fn prepare_sets_user_agent_and_bearer_token() {
        let request = DurableHttpRequest::get("https://example/op/1")
            .unwrap()
            .with_header("User-Agent", "caller-supplied");
        let prepared = executor().prepare(&request, Some("dummy test token"));

        assert_eq!(prepared.headers.get_all(USER_AGENT), ["durable-http-tests/1.0"]);
        assert_eq!(
            prepared.headers.get(AUTHORIZATION),
            Some("Bearer dummy test token")
        );
        assert!(request.headers().get(AUTHORIZATION).is_none());
    }

    #[test]
    fn prepare_derives_content_type_from_body() {
        let request = DurableHttpRequest::post("https://example/jobs")
            .unwrap()
            .with_body(RequestBody::json(r#"{"a":1}"#));
        let prepared = executor().prepare(&request, None);
        assert_eq!(prepared.headers.get(CONTENT_TYPE), Some("application/json"));
        assert_eq!(prepared.body.as_deref(), Some(r#"{"a":1}"#));
        assert!(!prepared.headers.contains(AUTHORIZATION));
    }

    #[test]
    fn explicit_content_type_header_wins() {
        let request = DurableHttpRequest::post("https://example/jobs")
            .unwrap()
            .with_header("content-type", "application/merge-patch+json")
            .with_body(RequestBody::json("{}"));
        let prepared = executor().prepare(&request, None);
        assert_eq!(
            prepared.headers.get_all(CONTENT_TYPE),
            ["application/merge-patch+json"]
        );
    }

    #[tokio::test]
    async fn cancelled_before_send_short_circuits() {
        let request = DurableHttpRequest::get("http://127.0.0.1:9/never")
            .unwrap()
            .with_token_source(Arc::new(StaticTokenSource::new("t")));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = executor().send(&request, &cancel).await.unwrap_err();
        assert!(matches!(err, DurableHttpError::Cancelled));
    }
}
