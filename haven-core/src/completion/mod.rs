//! Completion service contract for the guided intake assistant.
//!
//! A completion request carries the mode ("question" or "summary"), the
//! mode's system prompt and generation parameters, the prior turns, and the
//! new user turn. Backends return exactly one assistant message or a
//! classified [`CompletionError`]. Nothing here retries: failures propagate
//! to the turn controller, which rolls the transcript back.

pub mod prompts;
pub mod provider;
pub mod wire;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{CompletionConfig, ConversationConfig};
use crate::models::ChatMessage;

pub use provider::{ProviderClient, ProviderConfig};

// ============================================================================
// CompletionBackend trait
// ============================================================================

/// Abstraction over completion providers.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    /// Produce the assistant reply for `request`.
    async fn complete(&self, request: &CompletionRequest) -> Result<ChatMessage, CompletionError>;

    /// Backend name for logging.
    fn name(&self) -> &str;
}

// ============================================================================
// Error types
// ============================================================================

/// Caller-facing failure classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Configuration,
    Transport,
    MalformedResponse,
}

#[derive(Error, Debug)]
pub enum CompletionError {
    #[error("Completion provider API key is not configured")]
    MissingApiKey,

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Provider error ({code}): {message}")]
    Api { code: u16, message: String },

    #[error("Completion timed out after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("Unparseable provider response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Provider returned no completion choices")]
    NoChoices,

    #[error("Provider completion has no message content")]
    MissingContent,
}

impl CompletionError {
    pub fn kind(&self) -> FailureKind {
        match self {
            CompletionError::MissingApiKey => FailureKind::Configuration,
            CompletionError::Http(_)
            | CompletionError::Api { .. }
            | CompletionError::Timeout { .. } => FailureKind::Transport,
            CompletionError::Decode(_)
            | CompletionError::NoChoices
            | CompletionError::MissingContent => FailureKind::MalformedResponse,
        }
    }

    /// Whether resubmitting the same input can succeed.
    pub fn is_retryable(&self) -> bool {
        self.kind() != FailureKind::Configuration
    }
}

// ============================================================================
// Requests
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatMode {
    Question,
    Summary,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletionRequest {
    pub mode: ChatMode,
    pub system_prompt: String,
    /// Prior turns, replayed verbatim.
    pub history: Vec<ChatMessage>,
    /// The new user turn.
    pub message: String,
    pub temperature: f64,
    pub top_p: f64,
    pub max_tokens: u32,
}

impl CompletionRequest {
    /// Full upstream message list: system prompt, history, new user turn.
    pub fn messages(&self) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(self.history.len() + 2);
        messages.push(ChatMessage::system(self.system_prompt.clone()));
        messages.extend(self.history.iter().cloned());
        messages.push(ChatMessage::user(self.message.clone()));
        messages
    }
}

/// Mode-dependent prompt and sampling selection.
#[derive(Debug, Clone)]
pub struct CompletionProfile {
    pub persona_name: String,
    pub question_temperature: f64,
    pub summary_temperature: f64,
    pub top_p: f64,
    pub max_tokens: u32,
}

impl CompletionProfile {
    pub fn from_config(completion: &CompletionConfig, conversation: &ConversationConfig) -> Self {
        Self {
            persona_name: conversation.persona_name.clone(),
            question_temperature: completion.question_temperature,
            summary_temperature: completion.summary_temperature,
            top_p: completion.top_p,
            max_tokens: completion.max_tokens,
        }
    }

    pub fn request(
        &self,
        mode: ChatMode,
        history: Vec<ChatMessage>,
        message: impl Into<String>,
    ) -> CompletionRequest {
        let (system_prompt, temperature) = match mode {
            ChatMode::Question => (
                prompts::question_prompt(&self.persona_name),
                self.question_temperature,
            ),
            ChatMode::Summary => (prompts::SUMMARY_PROMPT.to_string(), self.summary_temperature),
        };

        CompletionRequest {
            mode,
            system_prompt,
            history,
            message: message.into(),
            temperature,
            top_p: self.top_p,
            max_tokens: self.max_tokens,
        }
    }

    pub fn question(&self, history: Vec<ChatMessage>, message: impl Into<String>) -> CompletionRequest {
        self.request(ChatMode::Question, history, message)
    }

    /// Summary request over a whole transcript, using the fixed instruction
    /// as the user turn.
    pub fn summary(&self, transcript: Vec<ChatMessage>) -> CompletionRequest {
        self.request(ChatMode::Summary, transcript, prompts::SUMMARY_INSTRUCTION)
    }
}

impl Default for CompletionProfile {
    fn default() -> Self {
        Self::from_config(&CompletionConfig::default(), &ConversationConfig::default())
    }
}
