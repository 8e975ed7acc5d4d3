//! Test doubles for code that issues durable HTTP calls.
//!
//! - [`ScriptedTransport`] answers from a finite queue of canned responses,
//!   in order, and records every request it sees. Requests that fail its
//!   [`RequestMatcher`] are rejected with a `401` and never consume a
//!   canned response.
//! - [`VirtualContext`] is a durable context whose clock only moves when a
//!   timer fires, so long poll intervals cost nothing in tests.
//! - [`FailingTokenSource`] and [`CountingTokenSource`] exercise token
//!   acquisition.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use tokio_util::sync::CancellationToken;

use crate::context::DurableContext;
use crate::error::{AuthError, TransportError};
use crate::executor::{HttpTransport, PreparedRequest};
use crate::token::TokenSource;
use crate::types::DurableHttpResponse;

/// Predicate a [`ScriptedTransport`] applies to every incoming request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestMatcher {
    Any,
    UriSuffix(String),
    HeaderEquals { name: String, value: String },
    All(Vec<RequestMatcher>),
}

impl RequestMatcher {
    pub fn uri_suffix(suffix: impl Into<String>) -> Self {
        RequestMatcher::UriSuffix(suffix.into())
    }

    pub fn header(name: impl Into<String>, value: impl Into<String>) -> Self {
        RequestMatcher::HeaderEquals {
            name: name.into(),
            value: value.into(),
        }
    }

    pub fn matches(&self, request: &PreparedRequest) -> bool {
        match self {
            RequestMatcher::Any => true,
            RequestMatcher::UriSuffix(suffix) => request.uri.as_str().ends_with(suffix.as_str()),
            RequestMatcher::HeaderEquals { name, value } => request
                .headers
                .get_all(name)
                .iter()
                .any(|candidate| candidate == value),
            RequestMatcher::All(all) => all.iter().all(|m| m.matches(request)),
        }
    }
}

/// Transport that replays canned responses in order.
#[derive(Debug)]
pub struct ScriptedTransport {
    matcher: RequestMatcher,
    responses: Mutex<VecDeque<DurableHttpResponse>>,
    requests: Mutex<Vec<PreparedRequest>>,
    rejected: AtomicUsize,
}

impl ScriptedTransport {
    pub fn new(responses: impl IntoIterator<Item = DurableHttpResponse>) -> Self {
        Self::with_matcher(RequestMatcher::Any, responses)
    }

    pub fn with_matcher(
        matcher: RequestMatcher,
        responses: impl IntoIterator<Item = DurableHttpResponse>,
    ) -> Self {
        Self {
            matcher,
            responses: Mutex::new(responses.into_iter().collect()),
            requests: Mutex::new(Vec::new()),
            rejected: AtomicUsize::new(0),
        }
    }

    /// Every request received, matched or not.
    pub fn requests(&self) -> Vec<PreparedRequest> {
        self.requests.lock().expect("lock poisoned").clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().expect("lock poisoned").len()
    }

    pub fn rejected_count(&self) -> usize {
        self.rejected.load(Ordering::SeqCst)
    }

    pub fn remaining(&self) -> usize {
        self.responses.lock().expect("lock poisoned").len()
    }
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
    async fn send(&self, request: PreparedRequest) -> Result<DurableHttpResponse, TransportError> {
        let matched = self.matcher.matches(&request);
        let uri = request.uri.to_string();
        self.requests.lock().expect("lock poisoned").push(request);

        if !matched {
            self.rejected.fetch_add(1, Ordering::SeqCst);
            return Ok(DurableHttpResponse::new(401).with_content("request rejected by matcher"));
        }

        self.responses
            .lock()
            .expect("lock poisoned")
            .pop_front()
            .ok_or_else(|| TransportError::new(format!("no scripted response left for {uri}")))
    }
}

/// Durable context with a virtual clock.
///
/// `delay` records the requested duration, advances the clock by it and
/// returns immediately. `advance` moves the clock without a timer, to
/// simulate slow calls.
#[derive(Debug)]
pub struct VirtualContext {
    now: Mutex<DateTime<Utc>>,
    delays: Mutex<Vec<Duration>>,
    cancel: CancellationToken,
}

impl VirtualContext {
    pub fn new() -> Self {
        Self::starting_at(Utc.timestamp_opt(1_700_000_000, 0).single().unwrap_or_default())
    }

    pub fn starting_at(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
            delays: Mutex::new(Vec::new()),
            cancel: CancellationToken::new(),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().expect("lock poisoned");
        let step = chrono::Duration::from_std(by).unwrap_or(chrono::Duration::zero());
        if let Some(next) = now.checked_add_signed(step) {
            *now = next;
        }
    }

    /// Durations passed to `delay`, in order.
    pub fn delays(&self) -> Vec<Duration> {
        self.delays.lock().expect("lock poisoned").clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

impl Default for VirtualContext {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DurableContext for VirtualContext {
    fn current_time(&self) -> DateTime<Utc> {
        *self.now.lock().expect("lock poisoned")
    }

    async fn delay(&self, duration: Duration) {
        self.delays.lock().expect("lock poisoned").push(duration);
        self.advance(duration);
        tokio::task::yield_now().await;
    }

    fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

/// Token source that always fails.
#[derive(Debug, Clone)]
pub struct FailingTokenSource {
    message: String,
}

impl FailingTokenSource {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[async_trait]
impl TokenSource for FailingTokenSource {
    async fn get_token(&self) -> Result<String, AuthError> {
        Err(AuthError::new(self.message.clone()))
    }
}

/// Issues `"<prefix>-<n>"` tokens, counting how often it was asked.
#[derive(Debug)]
pub struct CountingTokenSource {
    prefix: String,
    issued: AtomicUsize,
}

impl CountingTokenSource {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            issued: AtomicUsize::new(0),
        }
    }

    pub fn issued(&self) -> usize {
        self.issued.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenSource for CountingTokenSource {
    async fn get_token(&self) -> Result<String, AuthError> {
        let n = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("{}-{n}", self.prefix))
    }
}

#[cfg(test)]
mod tests {
    use reqwest::Method;
    use url::Url;

    use super::*;
    use crate::types::HttpHeaders;

    fn prepared(uri: &str, headers: &[(&str, &str)]) -> PreparedRequest {
        PreparedRequest {
            method: Method::GET,
            uri: Url::parse(uri).unwrap(),
            headers: headers.iter().copied().collect::<HttpHeaders>(),
            body: None,
        }
    }

    #[test]
    fn matcher_combines_uri_suffix_and_header() {
        let matcher = RequestMatcher::All(vec![
            RequestMatcher::uri_suffix("/op/1"),
            RequestMatcher::header("Authorization", "Bearer t"),
        ]);
        assert!(matcher.matches(&prepared("https://example/op/1", &[("authorization", "Bearer t")])));
        assert!(!matcher.matches(&prepared("https://example/op/2", &[("authorization", "Bearer t")])));
        assert!(!matcher.matches(&prepared("https://example/op/1", &[])));
    }

    #[tokio::test]
    async fn scripted_transport_consumes_in_order_and_rejects_mismatches() {
        let transport = ScriptedTransport::with_matcher(
            RequestMatcher::uri_suffix("/ok"),
            [DurableHttpResponse::new(202), DurableHttpResponse::new(200)],
        );

        let rejected = transport.send(prepared("https://example/nope", &[])).await.unwrap();
        assert_eq!(rejected.status_code, 401);

        let first = transport.send(prepared("https://example/ok", &[])).await.unwrap();
        let second = transport.send(prepared("https://example/ok", &[])).await.unwrap();
        assert_eq!((first.status_code, second.status_code), (202, 200));
        assert!(transport.send(prepared("https://example/ok", &[])).await.is_err());

        assert_eq!(transport.call_count(), 4);
        assert_eq!(transport.rejected_count(), 1);
        assert_eq!(transport.remaining(), 0);
    }

    #[tokio::test]
    async fn virtual_delay_advances_clock_without_sleeping() {
        let ctx = VirtualContext::new();
        let start = ctx.current_time();
        ctx.delay(Duration::from_secs(3600)).await;
        assert_eq!((ctx.current_time() - start).num_seconds(), 3600);
        assert_eq!(ctx.delays(), [Duration::from_secs(3600)]);
    }
}
