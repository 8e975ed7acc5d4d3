//! Asynchronous REST polling (202 Accepted + `Location`).
//!
//! After the initial call, a `202` response that carries a usable absolute
//! `Location` is followed with `GET <Location>` until a terminal response
//! arrives or the wait deadline is reached. Between polls the controller
//! waits `Retry-After` seconds when the header holds an integer, otherwise
//! the configured default interval. Every wait goes through the durable
//! context's timer.

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::Method;
use url::Url;

use crate::context::{DurableContext, elapsed_since};
use crate::error::DurableHttpError;
use crate::executor::{CallExecutor, CONTENT_TYPE};
use crate::types::{DurableHttpRequest, DurableHttpResponse, HttpHeaders};

pub const LOCATION: &str = "Location";
pub const RETRY_AFTER: &str = "Retry-After";

const ACCEPTED: u16 = 202;

/// Where a poll delay came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DelaySource {
    RetryAfter,
    Default,
}

/// What to do with the latest response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollDecision {
    Terminal,
    Poll {
        location: Url,
        delay: Duration,
        source: DelaySource,
    },
}

/// Upper bound on a server-requested wait between polls (one day).
pub const MAX_RETRY_AFTER: Duration = Duration::from_secs(24 * 60 * 60);

/// `Retry-After` as a whole number of seconds, capped at
/// [`MAX_RETRY_AFTER`]. HTTP-date values and anything else unparseable
/// yield `None`.
pub fn retry_after(response: &DurableHttpResponse) -> Option<Duration> {
    let secs = response
        .headers
        .get(RETRY_AFTER)?
        .trim()
        .parse::<u64>()
        .ok()?;
    Some(Duration::from_secs(secs).min(MAX_RETRY_AFTER))
}

/// The absolute URI to poll next, if the response names one.
///
/// A relative or malformed `Location` is treated like a missing one.
pub fn poll_location(response: &DurableHttpResponse) -> Option<Url> {
    let raw = response.headers.get(LOCATION)?;
    match Url::parse(raw.trim()) {
        Ok(url) => Some(url),
        Err(e) => {
            tracing::debug!(location = %raw, error = %e, "ignoring unusable Location header");
            None
        }
    }
}

/// Decide whether `response` ends the loop or names another poll.
pub fn decide(response: &DurableHttpResponse, default_interval: Duration) -> PollDecision {
    if response.status_code != ACCEPTED {
        return PollDecision::Terminal;
    }
    let Some(location) = poll_location(response) else {
        return PollDecision::Terminal;
    };
    let (delay, source) = match retry_after(response) {
        Some(delay) => (delay, DelaySource::RetryAfter),
        None => (default_interval, DelaySource::Default),
    };
    PollDecision::Poll {
        location,
        delay,
        source,
    }
}

/// Build the follow-up `GET` for `location`.
///
/// Carries the original headers (minus body headers and `exclusions`) and
/// the original token source, so each poll re-authenticates.
pub fn poll_request(
    original: &DurableHttpRequest,
    location: Url,
    exclusions: &[String],
) -> DurableHttpRequest {
    let headers: HttpHeaders = original
        .headers()
        .iter()
        .filter(|(name, _)| {
            !name.eq_ignore_ascii_case(CONTENT_TYPE)
                && !name.eq_ignore_ascii_case("Content-Length")
                && !exclusions.iter().any(|ex| name.eq_ignore_ascii_case(ex))
        })
        .flat_map(|(name, values)| values.iter().map(move |value| (name, value.as_str())))
        .collect();

    let poll = DurableHttpRequest::from_url(Method::GET, location).with_headers(headers);
    match original.token_source() {
        Some(source) => poll.with_token_source(source.clone()),
        None => poll,
    }
}

/// Result of driving the poll loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollResult {
    pub response: DurableHttpResponse,
    pub polls: u32,
    pub timed_out: bool,
}

/// Per-invocation loop state. Never shared between calls.
struct PollState {
    current: DurableHttpResponse,
    polls: u32,
    started_at: DateTime<Utc>,
    max_wait: Duration,
}

impl PollState {
    fn finish(self, timed_out: bool) -> PollResult {
        PollResult {
            response: self.current,
            polls: self.polls,
            timed_out,
        }
    }
}

/// Drives follow-up calls for the asynchronous REST pattern.
#[derive(Debug, Clone)]
pub struct AsyncPollController {
    executor: CallExecutor,
    default_interval: Duration,
    header_exclusions: Vec<String>,
}

impl AsyncPollController {
    pub fn new(executor: CallExecutor, default_interval: Duration) -> Self {
        Self {
            executor,
            default_interval,
            header_exclusions: Vec::new(),
        }
    }

    pub fn with_header_exclusions(mut self, exclusions: Vec<String>) -> Self {
        self.header_exclusions = exclusions;
        self
    }

    /// Poll from `initial` until a terminal response or `max_wait` measured
    /// on the durable clock from `started_at`.
    ///
    /// The deadline is checked after each poll, so a wait that overruns
    /// `max_wait` is still followed by one more poll.
    pub async fn drive(
        &self,
        ctx: &dyn DurableContext,
        request: &DurableHttpRequest,
        initial: DurableHttpResponse,
        started_at: DateTime<Utc>,
        max_wait: Duration,
    ) -> Result<PollResult, DurableHttpError> {
        let mut state = PollState {
            current: initial,
            polls: 0,
            started_at,
            max_wait,
        };
        if !request.asynchronous_pattern_enabled() {
            return Ok(state.finish(false));
        }

        let cancel = ctx.cancellation();
        loop {
            let PollDecision::Poll {
                location,
                delay,
                source,
            } = decide(&state.current, self.default_interval)
            else {
                return Ok(state.finish(false));
            };

            tracing::debug!(%location, ?delay, ?source, polls = state.polls, "operation still running, waiting before next poll");
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(DurableHttpError::Cancelled),
                _ = ctx.delay(delay) => {}
            }

            let poll = poll_request(request, location, &self.header_exclusions);
            state.current = self.executor.send(&poll, &cancel).await?;
            state.polls += 1;

            let elapsed = elapsed_since(ctx, state.started_at);
            if elapsed > state.max_wait
                && decide(&state.current, self.default_interval) != PollDecision::Terminal
            {
                tracing::warn!(?elapsed, max_wait = ?state.max_wait, polls = state.polls, "wait deadline exceeded while operation still running");
                return Ok(state.finish(true));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::token::StaticTokenSource;

    fn accepted(location: &str) -> DurableHttpResponse {
        DurableHttpResponse::new(202).with_header(LOCATION, location)
    }

    #[test]
    fn retry_after_seconds_win_over_default() {
        let response = accepted("https://example/op/1").with_header(RETRY_AFTER, "20");
        assert_eq!(
            decide(&response, Duration::from_secs(30)),
            PollDecision::Poll {
                location: Url::parse("https://example/op/1").unwrap(),
                delay: Duration::from_secs(20),
                source: DelaySource::RetryAfter,
            }
        );
    }

    #[test]
    fn oversized_retry_after_is_capped() {
        let response = accepted("https://example/op/1").with_header(RETRY_AFTER, u64::MAX.to_string());
        assert_eq!(retry_after(&response), Some(MAX_RETRY_AFTER));
    }

    #[test]
    fn unparseable_retry_after_falls_back_to_default() {
        let response = accepted("https://example/op/1")
            .with_header(RETRY_AFTER, "Wed, 21 Oct 2015 07:28:00 GMT");
        assert_eq!(retry_after(&response), None);
        assert!(matches!(
            decide(&response, Duration::from_secs(7)),
            PollDecision::Poll { delay, source: DelaySource::Default, .. } if delay == Duration::from_secs(7)
        ));
    }

    #[test]
    fn accepted_without_location_is_terminal() {
        let response = DurableHttpResponse::new(202);
        assert_eq!(decide(&response, Duration::from_secs(1)), PollDecision::Terminal);
    }

    #[test]
    fn relative_location_is_terminal() {
        let response = accepted("/op/1");
        assert_eq!(poll_location(&response), None);
        assert_eq!(decide(&response, Duration::from_secs(1)), PollDecision::Terminal);
    }

    #[test]
    fn non_accepted_status_is_terminal_even_with_location() {
        let response = DurableHttpResponse::new(201).with_header(LOCATION, "https://example/op/1");
        assert_eq!(decide(&response, Duration::from_secs(1)), PollDecision::Terminal);
    }

    #[test]
    fn poll_request_is_get_without_body_headers() {
        let original = DurableHttpRequest::post("https://example/jobs")
            .unwrap()
            .with_header("Content-Type", "application/json")
            .with_header("x-functions-key", "secret")
            .with_header("x-correlation-id", "abc")
            .with_token_source(Arc::new(StaticTokenSource::new("t")));
        let location = Url::parse("https://example/op/1").unwrap();

        let poll = poll_request(&original, location.clone(), &["X-Functions-Key".to_string()]);

        assert_eq!(poll.method(), &Method::GET);
        assert_eq!(poll.uri(), &location);
        assert!(poll.body().is_none());
        assert!(!poll.headers().contains("content-type"));
        assert!(!poll.headers().contains("x-functions-key"));
        assert_eq!(poll.headers().get("X-Correlation-Id"), Some("abc"));
        assert!(poll.token_source().is_some());
        assert!(poll.asynchronous_pattern_enabled());
    }
}
