//! Serializable request/response models for durable HTTP calls.
//!
//! The response model is the value recorded into durable history, so it
//! implements `Serialize` + `Deserialize` with the wire shape
//! `{"statusCode": u16, "headers": {name: [values]}, "content": string}`.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use reqwest::Method;
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use url::Url;

use crate::error::DurableHttpError;
use crate::token::TokenSource;

// ---------------------------------------------------------------------------
// Headers
// ---------------------------------------------------------------------------

/// Ordered multi-valued header map.
///
/// Lookups are ASCII case-insensitive; the first spelling of a name is the
/// one kept for serialization. Repeated values are preserved in arrival
/// order and never concatenated.
#[derive(Debug, Clone, Default)]
pub struct HttpHeaders {
    entries: Vec<(String, Vec<String>)>,
}

impl HttpHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|(existing, _)| existing.eq_ignore_ascii_case(name))
    }

    /// Add a value, keeping any values already present for `name`.
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        match self.position(&name) {
            Some(idx) => self.entries[idx].1.push(value.into()),
            None => self.entries.push((name, vec![value.into()])),
        }
    }

    /// Replace every value of `name` with `value`.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        match self.position(&name) {
            Some(idx) => self.entries[idx].1 = vec![value.into()],
            None => self.entries.push((name, vec![value.into()])),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.get_all(name).first().map(String::as_str)
    }

    pub fn get_all(&self, name: &str) -> &[String] {
        self.position(name)
            .map(|idx| self.entries[idx].1.as_slice())
            .unwrap_or(&[])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    pub fn remove(&mut self, name: &str) -> Option<Vec<String>> {
        self.position(name).map(|idx| self.entries.remove(idx).1)
    }

    /// Iterate `(name, values)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.entries
            .iter()
            .map(|(name, values)| (name.as_str(), values.as_slice()))
    }

    /// Number of distinct header names.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl PartialEq for HttpHeaders {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len()
            && self
                .iter()
                .all(|(name, values)| other.get_all(name) == values)
    }
}

impl Eq for HttpHeaders {}

impl<N: Into<String>, V: Into<String>> FromIterator<(N, V)> for HttpHeaders {
    fn from_iter<I: IntoIterator<Item = (N, V)>>(iter: I) -> Self {
        let mut headers = HttpHeaders::new();
        for (name, value) in iter {
            headers.append(name, value);
        }
        headers
    }
}

impl Serialize for HttpHeaders {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (name, values) in &self.entries {
            map.serialize_entry(name, values)?;
        }
        map.end()
    }
}

/// A header value on the wire: either a sequence or a single bare string.
#[derive(Deserialize)]
#[serde(untagged)]
enum HeaderValues {
    Many(Vec<String>),
    One(String),
}

impl<'de> Deserialize<'de> for HttpHeaders {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct HeadersVisitor;

        impl<'de> Visitor<'de> for HeadersVisitor {
            type Value = HttpHeaders;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of header names to a string or a sequence of strings")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut headers = HttpHeaders::new();
                while let Some((name, values)) = access.next_entry::<String, HeaderValues>()? {
                    match values {
                        HeaderValues::Many(values) => {
                            for value in values {
                                headers.append(name.clone(), value);
                            }
                        }
                        HeaderValues::One(value) => headers.append(name, value),
                    }
                }
                Ok(headers)
            }
        }

        deserializer.deserialize_map(HeadersVisitor)
    }
}

// ---------------------------------------------------------------------------
// Request model
// ---------------------------------------------------------------------------

/// Request payload with its media type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestBody {
    pub content: String,
    pub content_type: String,
}

impl RequestBody {
    pub fn new(content: impl Into<String>, content_type: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            content_type: content_type.into(),
        }
    }

    pub fn json(content: impl Into<String>) -> Self {
        Self::new(content, "application/json")
    }
}

/// An outbound call issued from a durable workflow step.
///
/// `method` and `uri` are fixed at construction. The token source is a
/// shared capability and is never serialized; a fresh `Authorization`
/// header is computed for every physical call without touching the model.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DurableHttpRequest {
    #[serde(with = "method_serde")]
    method: Method,
    uri: Url,
    #[serde(default)]
    headers: HttpHeaders,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    body: Option<RequestBody>,
    #[serde(skip)]
    token_source: Option<Arc<dyn TokenSource>>,
    #[serde(default = "default_async_pattern")]
    asynchronous_pattern_enabled: bool,
}

fn default_async_pattern() -> bool {
    true
}

impl DurableHttpRequest {
    /// Build a request against an absolute URI.
    pub fn new(method: Method, uri: &str) -> Result<Self, DurableHttpError> {
        let uri = Url::parse(uri)
            .map_err(|e| DurableHttpError::InvalidRequest(format!("`{uri}` is not an absolute URI: {e}")))?;
        Ok(Self::from_url(method, uri))
    }

    pub fn get(uri: &str) -> Result<Self, DurableHttpError> {
        Self::new(Method::GET, uri)
    }

    pub fn post(uri: &str) -> Result<Self, DurableHttpError> {
        Self::new(Method::POST, uri)
    }

    /// `Url` is always absolute, so no further validation is needed.
    pub fn from_url(method: Method, uri: Url) -> Self {
        Self {
            method,
            uri,
            headers: HttpHeaders::new(),
            body: None,
            token_source: None,
            asynchronous_pattern_enabled: true,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn with_headers(mut self, headers: HttpHeaders) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_body(mut self, body: RequestBody) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_token_source(mut self, token_source: Arc<dyn TokenSource>) -> Self {
        self.token_source = Some(token_source);
        self
    }

    /// Opt out of 202/Location polling; the first response is returned as-is.
    pub fn with_asynchronous_pattern(mut self, enabled: bool) -> Self {
        self.asynchronous_pattern_enabled = enabled;
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn uri(&self) -> &Url {
        &self.uri
    }

    pub fn headers(&self) -> &HttpHeaders {
        &self.headers
    }

    pub fn body(&self) -> Option<&RequestBody> {
        self.body.as_ref()
    }

    pub fn token_source(&self) -> Option<&Arc<dyn TokenSource>> {
        self.token_source.as_ref()
    }

    pub fn asynchronous_pattern_enabled(&self) -> bool {
        self.asynchronous_pattern_enabled
    }
}

impl fmt::Debug for DurableHttpRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DurableHttpRequest")
            .field("method", &self.method)
            .field("uri", &self.uri.as_str())
            .field("headers", &self.headers)
            .field("body", &self.body)
            .field("token_source", &self.token_source.is_some())
            .field("asynchronous_pattern_enabled", &self.asynchronous_pattern_enabled)
            .finish()
    }
}

mod method_serde {
    use reqwest::Method;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(method: &Method, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(method.as_str())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Method, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Method::from_bytes(raw.to_ascii_uppercase().as_bytes()).map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Response model
// ---------------------------------------------------------------------------

/// Captured HTTP response. This is the value written to durable history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DurableHttpResponse {
    pub status_code: u16,
    #[serde(default)]
    pub headers: HttpHeaders,
    #[serde(default)]
    pub content: String,
}

impl DurableHttpResponse {
    pub fn new(status_code: u16) -> Self {
        Self {
            status_code,
            headers: HttpHeaders::new(),
            content: String::new(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = content.into();
        self
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }
}

/// Net result of one durable call: the final response plus how it was
/// reached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpCallOutcome {
    pub response: DurableHttpResponse,
    /// Number of follow-up polls issued after the initial call.
    pub polls: u32,
    /// Set when the poll loop stopped at the wait deadline rather than on a
    /// terminal response.
    pub timed_out: bool,
    /// Durable-clock time spent between the initial call and the outcome.
    #[serde(with = "duration_millis")]
    pub elapsed: Duration,
}

impl HttpCallOutcome {
    pub fn into_response(self) -> DurableHttpResponse {
        self.response
    }
}

mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
