//! External reasoning service used when no rule explains a failure.

pub mod anthropic;

use async_trait::async_trait;

use crate::error::ReasonerError;

pub use self::anthropic::AnthropicReasoner;

/// A service that answers a diagnostic prompt with free text.
///
/// Implementations make exactly one request per call. Timeouts and retries
/// are the caller's business.
#[async_trait]
pub trait Reasoner: Send + Sync {
    /// Service name for logs
    fn name(&self) -> &'static str;

    /// Ask `model` to analyze `prompt` and return its answer.
    async fn ask(&self, model: &str, prompt: &str) -> Result<String, ReasonerError>;
}
