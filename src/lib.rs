//! Replay-safe outbound HTTP for durable workflow steps.
//!
//! A workflow step hands a [`DurableHttpRequest`] to
//! [`DurableHttpClient::execute`]. The client performs the physical call,
//! and when the target answers `202 Accepted` with a `Location` header it
//! keeps polling that location until a terminal response arrives or the
//! wait deadline passes. The final [`DurableHttpResponse`] is a plain
//! serializable value suitable for durable history.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                      Durable workflow step                          │
//! │                                                                     │
//! │  DurableHttpClient::execute(ctx, request, max_wait)                 │
//! │    ├─ CallExecutor::send(request)                                   │
//! │    │    ├─ TokenSource::get_token()     → Authorization: Bearer …   │
//! │    │    └─ HttpTransport::send()        → one physical exchange     │
//! │    └─ AsyncPollController::drive()                                  │
//! │         while 202 + Location:                                       │
//! │           ├─ DurableContext::delay(Retry-After | default interval)  │
//! │           └─ CallExecutor::send(GET Location)                       │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The workflow engine is consumed through [`DurableContext`] (clock,
//! durable timer, cancellation) and, optionally, [`StepHistory`] for the
//! replay boundary used by [`DurableHttpClient::call_step`].

pub mod codec;
pub mod config;
pub mod context;
pub mod error;
pub mod executor;
pub mod history;
pub mod orchestrator;
pub mod poll;
pub mod telemetry;
pub mod testing;
pub mod token;
pub mod types;

pub use codec::{HistoryCodec, JsonCodec};
pub use config::{DurableHttpConfig, TimeoutPolicy};
pub use context::{DurableContext, WallClockContext};
pub use error::{AuthError, CodecError, ConfigError, DurableHttpError, TransportError};
pub use executor::{CallExecutor, HttpTransport, PreparedRequest, ReqwestTransport};
pub use history::{InMemoryHistory, StepHistory};
pub use orchestrator::DurableHttpClient;
pub use poll::AsyncPollController;
pub use token::{
    ClientCredentialsTokenSource, EnvTokenSource, StaticTokenSource, TokenSource,
    TokenSourceConfig,
};
pub use types::{DurableHttpRequest, DurableHttpResponse, HttpCallOutcome, HttpHeaders, RequestBody};
