use async_trait::async_trait;

use crate::types::{CompletionRequest, CompletionResponse};
use crate::LLMError;

pub mod openai;
pub mod scripted;

/// A chat-completions endpoint: messages plus tool schema in, one assistant message out.
#[async_trait]
pub trait LLMProvider: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LLMError>;

    /// Base URL requests are sent to, recorded in the request log.
    fn endpoint(&self) -> Option<String> {
        None
    }

    fn name(&self) -> &'static str;
}
