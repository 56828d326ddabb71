use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::models::ChatMessage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    AwaitingResponse,
    Completed,
}

/// Submissions rejected before anything is sent upstream.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("message is empty")]
    EmptyInput,

    #[error("a response is still pending for this conversation")]
    AwaitingResponse,

    #[error("conversation is already completed")]
    Completed,

    #[error("have a conversation first before requesting a summary")]
    EmptyTranscript,

    #[error("conversation has not produced a summary yet")]
    NotCompleted,
}

/// Transcript length and turn count before a call, restored on failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Checkpoint {
    transcript_len: usize,
    turn_count: u32,
}

/// One reporter's guided conversation. Never persisted; only the summary
/// outlives it.
#[derive(Debug, Clone)]
pub struct ConversationSession {
    id: Uuid,
    transcript: Vec<ChatMessage>,
    turn_count: u32,
    status: SessionStatus,
    summary: Option<String>,
    created_at: DateTime<Utc>,
    last_active_at: DateTime<Utc>,
}

impl Default for ConversationSession {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversationSession {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            transcript: Vec::new(),
            turn_count: 0,
            status: SessionStatus::Active,
            summary: None,
            created_at: now,
            last_active_at: now,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn transcript(&self) -> &[ChatMessage] {
        &self.transcript
    }

    /// Messages shown to the reporter (system messages filtered out).
    pub fn visible_transcript(&self) -> Vec<ChatMessage> {
        self.transcript
            .iter()
            .filter(|m| m.is_visible())
            .cloned()
            .collect()
    }

    pub fn turn_count(&self) -> u32 {
        self.turn_count
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn summary(&self) -> Option<&str> {
        self.summary.as_deref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn last_active_at(&self) -> DateTime<Utc> {
        self.last_active_at
    }

    pub fn is_completed(&self) -> bool {
        self.status == SessionStatus::Completed
    }

    /// Consume the session, yielding its summary once completed.
    pub fn into_summary(self) -> Result<String, ValidationError> {
        match (self.status, self.summary) {
            (SessionStatus::Completed, Some(summary)) => Ok(summary),
            _ => Err(ValidationError::NotCompleted),
        }
    }

    fn ensure_accepting(&self) -> Result<(), ValidationError> {
        match self.status {
            SessionStatus::Completed => Err(ValidationError::Completed),
            SessionStatus::AwaitingResponse => Err(ValidationError::AwaitingResponse),
            SessionStatus::Active => Ok(()),
        }
    }

    fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            transcript_len: self.transcript.len(),
            turn_count: self.turn_count,
        }
    }

    /// Validate and speculatively append a user turn. Returns the restore
    /// point and the prior turns to send upstream.
    pub(crate) fn begin_turn(
        &mut self,
        text: &str,
    ) -> Result<(Checkpoint, Vec<ChatMessage>), ValidationError> {
        if text.trim().is_empty() {
            return Err(ValidationError::EmptyInput);
        }
        self.ensure_accepting()?;

        let checkpoint = self.checkpoint();
        let history = self.transcript.clone();
        self.transcript.push(ChatMessage::user(text));
        self.status = SessionStatus::AwaitingResponse;
        self.last_active_at = Utc::now();
        Ok((checkpoint, history))
    }

    /// Validate an explicit summary request. Returns the restore point and
    /// the full transcript.
    pub(crate) fn begin_summary(&mut self) -> Result<(Checkpoint, Vec<ChatMessage>), ValidationError> {
        self.ensure_accepting()?;
        if !self.transcript.iter().any(|m| m.is_visible()) {
            return Err(ValidationError::EmptyTranscript);
        }

        self.status = SessionStatus::AwaitingResponse;
        self.last_active_at = Utc::now();
        Ok((self.checkpoint(), self.transcript.clone()))
    }

    pub(crate) fn record_reply(&mut self, reply: ChatMessage) {
        self.transcript.push(reply);
        self.turn_count += 1;
        self.last_active_at = Utc::now();
    }

    pub(crate) fn release(&mut self) {
        self.status = SessionStatus::Active;
    }

    pub(crate) fn complete(&mut self, summary: String) {
        self.summary = Some(summary);
        self.status = SessionStatus::Completed;
        self.last_active_at = Utc::now();
    }

    pub(crate) fn rollback(&mut self, checkpoint: Checkpoint) {
        self.transcript.truncate(checkpoint.transcript_len);
        self.turn_count = checkpoint.turn_count;
        self.status = SessionStatus::Active;
    }
}
