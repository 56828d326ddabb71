//! Turn controller: drives the bounded question/answer loop and converts
//! the transcript into a summary.
//!
//! The session mutex is only held while checking or mutating session state,
//! never across a completion call. A concurrent submission therefore sees
//! `AwaitingResponse` and is rejected instead of queueing.

use regex::Regex;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;

use super::session::{Checkpoint, ConversationSession, SessionStatus, ValidationError};
use crate::completion::{
    CompletionBackend, CompletionError, CompletionProfile, CompletionRequest, FailureKind,
};
use crate::config::HavenConfig;
use crate::models::ChatMessage;

#[derive(Error, Debug)]
pub enum TurnError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Completion(#[from] CompletionError),
}

impl TurnError {
    /// Failure class for completion errors; `None` for local validation.
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            TurnError::Validation(_) => None,
            TurnError::Completion(e) => Some(e.kind()),
        }
    }
}

/// When questioning stops and the summary is requested.
#[derive(Debug, Clone)]
pub struct TerminationPolicy {
    max_turns: u32,
    trigger: Option<Regex>,
}

impl TerminationPolicy {
    pub fn new(max_turns: u32, trigger_word: Option<&str>) -> Self {
        let trigger = trigger_word
            .map(str::trim)
            .filter(|w| !w.is_empty())
            .and_then(|word| {
                match Regex::new(&format!(r"(?i)\b{}\b", regex::escape(word))) {
                    Ok(re) => Some(re),
                    Err(e) => {
                        tracing::warn!(word, error = %e, "Ignoring unusable summary trigger word");
                        None
                    }
                }
            });

        Self {
            max_turns: max_turns.max(1),
            trigger,
        }
    }

    pub fn max_turns(&self) -> u32 {
        self.max_turns
    }

    pub fn should_summarize(&self, turn_count: u32, reply: &str) -> bool {
        turn_count >= self.max_turns
            || self.trigger.as_ref().is_some_and(|re| re.is_match(reply))
    }
}

/// Result of a successful `submit_turn`.
#[derive(Debug, Clone, Serialize)]
pub struct TurnOutcome {
    pub reply: ChatMessage,
    pub turn_count: u32,
    pub status: SessionStatus,
    /// Present when this turn completed the conversation.
    pub summary: Option<String>,
}

/// A turn between `begin_*` and its final state change. Dropped while
/// still armed, it restores the checkpoint so an abandoned call cannot
/// leave the session in `AwaitingResponse`.
struct PendingTurn {
    session: Arc<Mutex<ConversationSession>>,
    checkpoint: Option<Checkpoint>,
}

impl PendingTurn {
    fn new(session: &Arc<Mutex<ConversationSession>>, checkpoint: Checkpoint) -> Self {
        Self {
            session: Arc::clone(session),
            checkpoint: Some(checkpoint),
        }
    }

    async fn rollback(mut self) {
        if let Some(checkpoint) = self.checkpoint.take() {
            self.session.lock().await.rollback(checkpoint);
        }
    }

    fn disarm(mut self) {
        self.checkpoint = None;
    }
}

impl Drop for PendingTurn {
    fn drop(&mut self) {
        let Some(checkpoint) = self.checkpoint.take() else {
            return;
        };

        if let Ok(mut s) = self.session.try_lock() {
            s.rollback(checkpoint);
            tracing::warn!(session = %s.id(), "Turn abandoned, transcript rolled back");
            return;
        }

        // Lock is briefly held elsewhere; finish the rollback on the runtime.
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let session = Arc::clone(&self.session);
                handle.spawn(async move {
                    let mut s = session.lock().await;
                    s.rollback(checkpoint);
                    tracing::warn!(session = %s.id(), "Turn abandoned, transcript rolled back");
                });
            }
            Err(_) => tracing::error!("Turn abandoned outside a runtime; session left awaiting a response"),
        }
    }
}

pub struct TurnController {
    backend: Arc<dyn CompletionBackend>,
    profile: CompletionProfile,
    policy: TerminationPolicy,
    timeout: Duration,
}

impl TurnController {
    pub fn new(
        backend: Arc<dyn CompletionBackend>,
        profile: CompletionProfile,
        policy: TerminationPolicy,
        timeout: Duration,
    ) -> Self {
        Self {
            backend,
            profile,
            policy,
            timeout,
        }
    }

    pub fn from_config(backend: Arc<dyn CompletionBackend>, config: &HavenConfig) -> Self {
        Self::new(
            backend,
            CompletionProfile::from_config(&config.completion, &config.conversation),
            TerminationPolicy::new(
                config.conversation.max_turns,
                config.conversation.trigger_word.as_deref(),
            ),
            Duration::from_secs(config.conversation.turn_timeout_seconds),
        )
    }

    pub fn policy(&self) -> &TerminationPolicy {
        &self.policy
    }

    pub fn profile(&self) -> &CompletionProfile {
        &self.profile
    }

    /// Submit one user turn. On any completion failure the transcript and
    /// turn count are restored to their state before this call. Dropping
    /// the returned future mid-call restores them as well.
    pub async fn submit_turn(
        &self,
        session: &Arc<Mutex<ConversationSession>>,
        text: &str,
    ) -> Result<TurnOutcome, TurnError> {
        let (pending, history, session_id) = {
            let mut s = session.lock().await;
            let (checkpoint, history) = s.begin_turn(text)?;
            (PendingTurn::new(session, checkpoint), history, s.id())
        };

        let request = self.profile.question(history, text);
        let reply = match self.call(&request).await {
            Ok(reply) => reply,
            Err(e) => {
                pending.rollback().await;
                tracing::warn!(session = %session_id, error = %e, "Turn failed, transcript rolled back");
                return Err(e.into());
            }
        };

        let (turn_count, transcript) = {
            let mut s = session.lock().await;
            s.record_reply(reply.clone());
            let turn_count = s.turn_count();
            if self.policy.should_summarize(turn_count, &reply.content) {
                (turn_count, Some(s.transcript().to_vec()))
            } else {
                s.release();
                (turn_count, None)
            }
        };

        let Some(transcript) = transcript else {
            pending.disarm();
            tracing::info!(session = %session_id, turn_count, "Turn recorded");
            return Ok(TurnOutcome {
                reply,
                turn_count,
                status: SessionStatus::Active,
                summary: None,
            });
        };

        tracing::info!(session = %session_id, turn_count, "Termination reached, requesting summary");
        match self.call(&self.profile.summary(transcript)).await {
            Ok(summary) => {
                session.lock().await.complete(summary.content.clone());
                pending.disarm();
                tracing::info!(session = %session_id, turn_count, "Conversation completed");
                Ok(TurnOutcome {
                    reply,
                    turn_count,
                    status: SessionStatus::Completed,
                    summary: Some(summary.content),
                })
            }
            Err(e) => {
                pending.rollback().await;
                tracing::warn!(session = %session_id, error = %e, "Summary failed, turn rolled back");
                Err(e.into())
            }
        }
    }

    /// Explicit summary action. The transcript is never changed.
    pub async fn request_summary(
        &self,
        session: &Arc<Mutex<ConversationSession>>,
    ) -> Result<String, TurnError> {
        let (pending, transcript, session_id) = {
            let mut s = session.lock().await;
            let (checkpoint, transcript) = s.begin_summary()?;
            (PendingTurn::new(session, checkpoint), transcript, s.id())
        };

        match self.call(&self.profile.summary(transcript)).await {
            Ok(summary) => {
                session.lock().await.complete(summary.content.clone());
                pending.disarm();
                tracing::info!(session = %session_id, "Conversation completed on request");
                Ok(summary.content)
            }
            Err(e) => {
                pending.rollback().await;
                tracing::warn!(session = %session_id, error = %e, "Summary request failed");
                Err(e.into())
            }
        }
    }

    async fn call(&self, request: &CompletionRequest) -> Result<ChatMessage, CompletionError> {
        match tokio::time::timeout(self.timeout, self.backend.complete(request)).await {
            Ok(result) => result,
            Err(_) => Err(CompletionError::Timeout {
                seconds: self.timeout.as_secs(),
            }),
        }
    }
}
