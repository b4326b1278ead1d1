// src/llm/client.rs
// Language-model client abstraction

use crate::Result;
use async_trait::async_trait;
use std::time::Duration;

/// Prompt-in/text-out collaborator.
///
/// Callers own retry policy: a timeout or transport error is returned as-is
/// and the same request may be issued again on a later tick, so providers
/// must tolerate duplicates.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Run one completion, failing once `timeout` elapses.
    async fn generate(&self, prompt: &str, timeout: Duration) -> Result<String>;

    /// Cheap reachability probe; never errors.
    async fn health(&self) -> bool;

    /// Model identifier, for logging.
    fn model_name(&self) -> String;
}
