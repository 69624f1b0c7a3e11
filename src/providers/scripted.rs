use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use serde_json::Value;

use crate::{
    functions::{FunctionCall, ToolCall},
    providers::LLMProvider,
    types::{ChatMessage, CompletionRequest, CompletionResponse},
    LLMError,
};

/// One canned model turn.
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    Text(String),
    ToolCalls(Vec<ToolCall>),
    Error(String),
}

impl ScriptedReply {
    pub fn text(content: impl Into<String>) -> Self {
        Self::Text(content.into())
    }

    pub fn tool_call(name: impl Into<String>, arguments: Value) -> Self {
        Self::ToolCalls(vec![ToolCall::new(FunctionCall::new(name, arguments))])
    }

    /// A tool call whose argument payload is passed through verbatim.
    pub fn raw_tool_call(name: impl Into<String>, raw_arguments: impl Into<String>) -> Self {
        Self::ToolCalls(vec![ToolCall::new(FunctionCall::from_raw(name, raw_arguments))])
    }
}

/// Replays a fixed sequence of replies and remembers every request it saw.
pub struct ScriptedProvider {
    replies: Mutex<VecDeque<ScriptedReply>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedProvider {
    pub fn new<I>(replies: I) -> Self
    where
        I: IntoIterator<Item = ScriptedReply>,
    {
        Self {
            replies: Mutex::new(replies.into_iter().collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn remaining(&self) -> usize {
        self.replies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[async_trait]
impl LLMProvider for ScriptedProvider {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LLMError> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request);

        let reply = self
            .replies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();

        let message = match reply {
            Some(ScriptedReply::Text(content)) => ChatMessage::assistant(content),
            Some(ScriptedReply::ToolCalls(calls)) => ChatMessage::tool_request(calls),
            Some(ScriptedReply::Error(message)) => return Err(LLMError::Provider(message)),
            None => {
                return Err(LLMError::Provider(
                    "no more scripted responses".to_string(),
                ))
            }
        };

        Ok(CompletionResponse {
            message,
            usage: None,
        })
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}
