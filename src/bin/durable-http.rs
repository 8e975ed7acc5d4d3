//! One-shot durable HTTP call from the command line.
//!
//! Usage:
//!   durable-http <METHOD> <URL> [BODY]
//!
//! Reads an optional TOML config from `DURABLE_HTTP_CONFIG`, applies
//! `DURABLE_HTTP_*` env overrides, follows 202/Location polling with the
//! wall clock, and prints the outcome as JSON. Ctrl-C cancels the call.

use color_eyre::eyre::{bail, eyre};
use reqwest::Method;

use durable_http::telemetry::init_tracing;
use durable_http::{
    DurableHttpClient, DurableHttpConfig, DurableHttpRequest, RequestBody, WallClockContext,
};

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    init_tracing();

    let mut args = std::env::args().skip(1);
    let (Some(method), Some(url)) = (args.next(), args.next()) else {
        bail!("usage: durable-http <METHOD> <URL> [BODY]");
    };
    let body = args.next();

    let config = match std::env::var("DURABLE_HTTP_CONFIG") {
        Ok(path) => DurableHttpConfig::load(&path)?,
        Err(_) => DurableHttpConfig::default(),
    }
    .apply_env()?;

    let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes())
        .map_err(|e| eyre!("invalid method `{method}`: {e}"))?;
    let mut request = DurableHttpRequest::new(method, &url)?
        .with_header("X-Request-Id", uuid::Uuid::new_v4().to_string());
    if let Some(body) = body {
        request = request.with_body(RequestBody::json(body));
    }
    if let Some(token_source) = &config.token_source {
        request = request.with_token_source(token_source.build()?);
    }

    let client = DurableHttpClient::from_config(&config)?;
    let ctx = WallClockContext::new();

    let cancel = durable_http::DurableContext::cancellation(&ctx);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, cancelling call");
            cancel.cancel();
        }
    });

    tracing::info!(method = %request.method(), uri = %request.uri(), "starting durable http call");
    let outcome = client.execute_default(&ctx, &request).await?;

    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}
