//! Wire shapes shared by the upstream provider and the `/chat` endpoint.
//!
//! Both speak the same response envelope: `{ "choices": [ { "message":
//! { "role", "content" } } ] }`. Every field is optional at parse time and
//! validated in [`CompletionEnvelope::into_reply`], so a structurally odd
//! body becomes a `MalformedResponse` failure instead of a panic.

use serde::{Deserialize, Serialize};

use super::{ChatMode, CompletionError};
use crate::models::{ChatMessage, Role};

/// Body accepted by `POST /chat`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatEndpointRequest {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub history: Vec<ChatMessage>,
    #[serde(default)]
    pub is_summary_request: bool,
}

impl ChatEndpointRequest {
    pub fn mode(&self) -> ChatMode {
        if self.is_summary_request {
            ChatMode::Summary
        } else {
            ChatMode::Question
        }
    }

    /// The new user turn, if present and not blank.
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref().filter(|m| !m.trim().is_empty())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompletionEnvelope {
    #[serde(default)]
    pub choices: Vec<CompletionChoice>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionChoice {
    #[serde(default)]
    pub message: Option<ChoiceMessage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChoiceMessage {
    #[serde(default)]
    pub role: Option<Role>,
    #[serde(default)]
    pub content: Option<String>,
}

impl CompletionEnvelope {
    pub fn from_reply(reply: ChatMessage) -> Self {
        Self {
            choices: vec![CompletionChoice {
                message: Some(ChoiceMessage {
                    role: Some(reply.role),
                    content: Some(reply.content),
                }),
            }],
        }
    }

    /// Validate and extract the first choice as an assistant message.
    pub fn into_reply(self) -> Result<ChatMessage, CompletionError> {
        let choice = self
            .choices
            .into_iter()
            .next()
            .ok_or(CompletionError::NoChoices)?;

        let content = choice
            .message
            .and_then(|m| m.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or(CompletionError::MissingContent)?;

        Ok(ChatMessage::assistant(content))
    }
}

/// Error body returned by `POST /chat`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub error: String,
}
