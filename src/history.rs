//! Step history used to draw the replay boundary around a durable call.
//!
//! The workflow engine normally owns history. This seam lets a caller plug
//! in whatever store the engine exposes; the in-memory store backs tests
//! and single-process use.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

/// Recorded payloads keyed by logical step id.
#[async_trait]
pub trait StepHistory: Send + Sync {
    async fn load(&self, step_id: &str) -> anyhow::Result<Option<String>>;
    async fn record(&self, step_id: &str, payload: String) -> anyhow::Result<()>;
}

/// A [`StepHistory`] kept in process memory.
#[derive(Debug, Default)]
pub struct InMemoryHistory {
    entries: Mutex<HashMap<String, String>>,
}

impl InMemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Raw payload recorded for `step_id`.
    pub fn payload(&self, step_id: &str) -> Option<String> {
        self.entries
            .lock()
            .expect("lock poisoned")
            .get(step_id)
            .cloned()
    }
}

#[async_trait]
impl StepHistory for InMemoryHistory {
    async fn load(&self, step_id: &str) -> anyhow::Result<Option<String>> {
        Ok(self.payload(step_id))
    }

    async fn record(&self, step_id: &str, payload: String) -> anyhow::Result<()> {
        let mut guard = self.entries.lock().expect("lock poisoned");
        if guard.contains_key(step_id) {
            anyhow::bail!("step `{step_id}` already has a recorded outcome");
        }
        guard.insert(step_id.to_string(), payload);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_and_loads_by_step_id() {
        let history = InMemoryHistory::new();
        assert!(history.is_empty());

        history.record("step-1", "{}".to_string()).await.unwrap();

        assert_eq!(history.load("step-1").await.unwrap().as_deref(), Some("{}"));
        assert_eq!(history.load("step-2").await.unwrap(), None);
        assert_eq!(history.len(), 1);
    }

    #[tokio::test]
    async fn refuses_to_overwrite_a_step() {
        let history = InMemoryHistory::new();
        history.record("step-1", "a".to_string()).await.unwrap();
        assert!(history.record("step-1", "b".to_string()).await.is_err());
        assert_eq!(history.payload("step-1").as_deref(), Some("a"));
    }
}
