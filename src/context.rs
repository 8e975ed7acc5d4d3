//! The durable execution context a call runs inside.
//!
//! The workflow engine owns history, replay and timers. This crate only
//! needs three things from it: a deterministic clock, a replay-safe timer,
//! and a cancellation signal. Waiting between polls always goes through
//! [`DurableContext::delay`], never a raw sleep, so an engine can persist
//! the pending timer and skip it on replay.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

/// Capabilities consumed from the surrounding workflow engine.
#[async_trait]
pub trait DurableContext: Send + Sync {
    /// Deterministic "now" for the current workflow step.
    fn current_time(&self) -> DateTime<Utc>;

    /// Suspend for `duration` using the engine's durable timer.
    ///
    /// Dropping the returned future must cancel the timer.
    async fn delay(&self, duration: Duration);

    /// Signal observed at every call and timer suspension point.
    fn cancellation(&self) -> CancellationToken;
}

/// Context for running outside a workflow engine: wall clock time and
/// tokio timers. Waits do not survive a process restart.
#[derive(Debug, Clone, Default)]
pub struct WallClockContext {
    cancel: CancellationToken,
}

impl WallClockContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cancellation(cancel: CancellationToken) -> Self {
        Self { cancel }
    }
}

#[async_trait]
impl DurableContext for WallClockContext {
    fn current_time(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn delay(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

/// Durable-clock time elapsed since `start`, clamped at zero.
pub(crate) fn elapsed_since(ctx: &dyn DurableContext, start: DateTime<Utc>) -> Duration {
    (ctx.current_time() - start).to_std().unwrap_or(Duration::ZERO)
}
