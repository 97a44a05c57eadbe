//! Reasoning service port.

use async_trait::async_trait;

use crate::error::AgentError;

/// Language-model collaborator.
///
/// Treated as a single blocking round trip; streaming variants are an
/// optional optimization of the implementation, not required for
/// correctness. An empty reply is a normal no-op outcome, not an error.
#[async_trait]
pub trait ReasoningService: Send + Sync {
    /// Obtain a reply to the user's transcript.
    async fn ask(&self, text: &str) -> Result<String, AgentError>;
}
