//! Entry point invoked from a deterministic workflow step.
//!
//! ```text
//! workflow step
//!   └─ DurableHttpClient::execute(request, max_wait)
//!        ├─ CallExecutor::send(request)                  initial call
//!        └─ AsyncPollController::drive(...)              0..n polls
//!             ├─ DurableContext::delay(Retry-After | default)
//!             └─ CallExecutor::send(GET Location)
//! ```
//!
//! The client persists nothing itself. [`DurableHttpClient::call_step`]
//! adds a replay boundary on top of a [`StepHistory`]: a step that already
//! has a recorded outcome is answered from history without any network
//! call.

use std::sync::Arc;
use std::time::Duration;

use crate::codec::{HistoryCodec, JsonCodec};
use crate::config::{DurableHttpConfig, TimeoutPolicy};
use crate::context::{DurableContext, elapsed_since};
use crate::error::{DurableHttpError, TransportError};
use crate::executor::{CallExecutor, HttpTransport, ReqwestTransport};
use crate::history::StepHistory;
use crate::poll::AsyncPollController;
use crate::types::{DurableHttpRequest, HttpCallOutcome};

/// Composes the call executor and the poll controller.
#[derive(Clone)]
pub struct DurableHttpClient {
    executor: CallExecutor,
    poller: AsyncPollController,
    timeout_policy: TimeoutPolicy,
    default_max_wait: Duration,
    codec: Arc<dyn HistoryCodec>,
}

impl DurableHttpClient {
    /// Client backed by reqwest with the JSON history codec.
    pub fn from_config(config: &DurableHttpConfig) -> Result<Self, TransportError> {
        let transport = ReqwestTransport::new(config.request_timeout())?;
        Ok(Self::with_transport(config, Arc::new(transport)))
    }

    pub fn with_transport(config: &DurableHttpConfig, transport: Arc<dyn HttpTransport>) -> Self {
        let executor = CallExecutor::new(transport, config.user_agent.clone());
        let poller = AsyncPollController::new(executor.clone(), config.default_poll_interval())
            .with_header_exclusions(config.poll_header_exclusions.clone());
        Self {
            executor,
            poller,
            timeout_policy: config.timeout_policy,
            default_max_wait: config.default_max_wait(),
            codec: Arc::new(JsonCodec),
        }
    }

    pub fn with_codec(mut self, codec: Arc<dyn HistoryCodec>) -> Self {
        self.codec = codec;
        self
    }

    pub fn executor(&self) -> &CallExecutor {
        &self.executor
    }

    /// Perform the initial call and follow the asynchronous pattern until a
    /// terminal response or `max_wait` elapses on the durable clock.
    pub async fn execute(
        &self,
        ctx: &dyn DurableContext,
        request: &DurableHttpRequest,
        max_wait: Duration,
    ) -> Result<HttpCallOutcome, DurableHttpError> {
        let started_at = ctx.current_time();
        let cancel = ctx.cancellation();

        let initial = self.executor.send(request, &cancel).await?;
        let result = self
            .poller
            .drive(ctx, request, initial, started_at, max_wait)
            .await?;
        let elapsed = elapsed_since(ctx, started_at);

        if result.timed_out && self.timeout_policy == TimeoutPolicy::Fail {
            return Err(DurableHttpError::TimeoutExceeded {
                elapsed,
                last_response: Box::new(result.response),
            });
        }

        Ok(HttpCallOutcome {
            response: result.response,
            polls: result.polls,
            timed_out: result.timed_out,
            elapsed,
        })
    }

    /// [`execute`](Self::execute) with the configured default wait.
    pub async fn execute_default(
        &self,
        ctx: &dyn DurableContext,
        request: &DurableHttpRequest,
    ) -> Result<HttpCallOutcome, DurableHttpError> {
        self.execute(ctx, request, self.default_max_wait).await
    }

    /// Run `request` as logical step `step_id`, at most once.
    ///
    /// Replays return the recorded outcome. Failures are not recorded, so a
    /// failed step is re-issued with the same inputs on the next attempt.
    pub async fn call_step(
        &self,
        ctx: &dyn DurableContext,
        history: &dyn StepHistory,
        step_id: &str,
        request: &DurableHttpRequest,
        max_wait: Duration,
    ) -> Result<HttpCallOutcome, DurableHttpError> {
        if let Some(payload) = history
            .load(step_id)
            .await
            .map_err(DurableHttpError::History)?
        {
            tracing::debug!(step_id, "replaying recorded durable http outcome");
            return Ok(self.codec.decode_outcome(&payload)?);
        }

        let outcome = self.execute(ctx, request, max_wait).await?;
        let payload = self.codec.encode_outcome(&outcome)?;
        history
            .record(step_id, payload)
            .await
            .map_err(DurableHttpError::History)?;
        Ok(outcome)
    }
}

impl std::fmt::Debug for DurableHttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DurableHttpClient")
            .field("executor", &self.executor)
            .field("poller", &self.poller)
            .field("timeout_policy", &self.timeout_policy)
            .field("default_max_wait", &self.default_max_wait)
            .finish_non_exhaustive()
    }
}
