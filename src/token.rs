//! Bearer-token sources.
//!
//! The executor asks the request's token source for a token before every
//! physical call, so long-running polls always present a fresh credential.
//! Implementations must be safe to share between concurrent calls.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::AuthError;

/// Produces a bearer token on demand.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn get_token(&self) -> Result<String, AuthError>;
}

/// A fixed token, typically injected from configuration.
#[derive(Clone)]
pub struct StaticTokenSource {
    token: String,
}

impl StaticTokenSource {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl fmt::Debug for StaticTokenSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticTokenSource").finish_non_exhaustive()
    }
}

#[async_trait]
impl TokenSource for StaticTokenSource {
    async fn get_token(&self) -> Result<String, AuthError> {
        Ok(self.token.clone())
    }
}

/// Reads the token from an environment variable on every call, so a
/// rotated value is picked up without restarting the worker.
#[derive(Debug, Clone)]
pub struct EnvTokenSource {
    var: String,
}

impl EnvTokenSource {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

#[async_trait]
impl TokenSource for EnvTokenSource {
    async fn get_token(&self) -> Result<String, AuthError> {
        match std::env::var(&self.var) {
            Ok(token) if !token.trim().is_empty() => Ok(token.trim().to_string()),
            Ok(_) => Err(AuthError::new(format!("{} is empty", self.var))),
            Err(e) => Err(AuthError::with_source(format!("{} not set", self.var), e)),
        }
    }
}

/// Tokens are refreshed this long before the provider says they expire.
const EXPIRY_SKEW: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

struct CachedToken {
    token: String,
    refresh_at: Instant,
}

/// OAuth2 client-credentials grant against a token endpoint.
///
/// The token is cached until shortly before `expires_in`; a response
/// without `expires_in` is not cached.
pub struct ClientCredentialsTokenSource {
    http: reqwest::Client,
    token_url: String,
    client_id: String,
    client_secret: String,
    scope: Option<String>,
    cached: Mutex<Option<CachedToken>>,
}

impl ClientCredentialsTokenSource {
    pub fn new(
        token_url: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        scope: Option<String>,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            token_url: token_url.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            scope,
            cached: Mutex::new(None),
        }
    }

    async fn fetch(&self) -> Result<TokenResponse, AuthError> {
        let mut form = vec![
            ("grant_type", "client_credentials"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
        ];
        if let Some(scope) = &self.scope {
            form.push(("scope", scope.as_str()));
        }

        tracing::debug!(token_url = %self.token_url, client_id = %self.client_id, "requesting access token");

        let response = self
            .http
            .post(&self.token_url)
            .form(&form)
            .send()
            .await
            .map_err(|e| AuthError::with_source("token endpoint unreachable", e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable>".to_string());
            return Err(AuthError::new(format!("token endpoint returned {status}: {body}")));
        }

        response
            .json::<TokenResponse>()
            .await
            .map_err(|e| AuthError::with_source("malformed token response", e))
    }
}

impl fmt::Debug for ClientCredentialsTokenSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientCredentialsTokenSource")
            .field("token_url", &self.token_url)
            .field("client_id", &self.client_id)
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl TokenSource for ClientCredentialsTokenSource {
    async fn get_token(&self) -> Result<String, AuthError> {
        let mut cached = self.cached.lock().await;
        if let Some(entry) = cached.as_ref() {
            if Instant::now() < entry.refresh_at {
                return Ok(entry.token.clone());
            }
        }

        let fresh = self.fetch().await?;
        *cached = fresh
            .expires_in
            .and_then(|secs| Instant::now().checked_add(Duration::from_secs(secs).saturating_sub(EXPIRY_SKEW)))
            .map(|refresh_at| CachedToken {
                token: fresh.access_token.clone(),
                refresh_at,
            });
        Ok(fresh.access_token)
    }
}

/// Declarative token source selection, as found in configuration files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TokenSourceConfig {
    Static {
        token: String,
    },
    Env {
        var: String,
    },
    ClientCredentials {
        token_url: String,
        client_id: String,
        /// Name of the env var holding the client secret.
        client_secret_env: String,
        #[serde(default)]
        scope: Option<String>,
    },
}

impl TokenSourceConfig {
    pub fn build(&self) -> Result<Arc<dyn TokenSource>, AuthError> {
        let source: Arc<dyn TokenSource> = match self {
            TokenSourceConfig::Static { token } => {
                Arc::new(StaticTokenSource::new(token.clone()))
            }
            TokenSourceConfig::Env { var } => Arc::new(EnvTokenSource::new(var.clone())),
            TokenSourceConfig::ClientCredentials {
                token_url,
                client_id,
                client_secret_env,
                scope,
            } => {
                let secret = std::env::var(client_secret_env).map_err(|e| {
                    AuthError::with_source(format!("{client_secret_env} not set"), e)
                })?;
                Arc::new(ClientCredentialsTokenSource::new(
                    token_url.clone(),
                    client_id.clone(),
                    secret,
                    scope.clone(),
                ))
            }
        };
        Ok(source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_source_returns_token() {
        let source = StaticTokenSource::new("dummy test token");
        assert_eq!(source.get_token().await.unwrap(), "dummy test token");
    }

    #[tokio::test]
    async fn env_source_reports_missing_var() {
        let source = EnvTokenSource::new("DURABLE_HTTP_TEST_TOKEN_THAT_IS_NEVER_SET");
        let err = source.get_token().await.unwrap_err();
        assert!(err.to_string().contains("not set"), "unexpected error: {err}");
    }

    #[tokio::test]
    async fn env_source_rejects_blank_value() {
        let var = "DURABLE_HTTP_TEST_TOKEN_BLANK";
        // SAFETY: the variable name is unique to this test.
        unsafe { std::env::set_var(var, "   ") };
        let err = EnvTokenSource::new(var).get_token().await.unwrap_err();
        assert!(err.to_string().contains("is empty"), "unexpected error: {err}");
    }

    #[test]
    fn token_source_config_parses_tagged_kinds() {
        let config: TokenSourceConfig =
            toml::from_str("kind = \"env\"\nvar = \"API_TOKEN\"").unwrap();
        assert_eq!(
            config,
            TokenSourceConfig::Env {
                var: "API_TOKEN".to_string()
            }
        );
    }

    #[tokio::test]
    async fn static_config_builds_usable_source() {
        let config = TokenSourceConfig::Static {
            token: "abc".to_string(),
        };
        let source = config.build().unwrap();
        assert_eq!(source.get_token().await.unwrap(), "abc");
    }
}
