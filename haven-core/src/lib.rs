pub mod completion;
pub mod config;
pub mod conversation;
pub mod db;
pub mod error;
pub mod evidence;
pub mod hotspots;
pub mod models;
pub mod store;

pub use completion::{
    ChatMode, CompletionBackend, CompletionError, CompletionProfile, CompletionRequest,
    FailureKind, ProviderClient, ProviderConfig,
};
pub use config::HavenConfig;
pub use conversation::{
    ConversationSession, IntakeDraft, SessionStatus, TerminationPolicy, TurnController,
    TurnError, TurnOutcome, ValidationError,
};
pub use error::HavenError;
pub use evidence::{EvidenceError, EvidenceStore};
pub use hotspots::{Hotspot, RiskLevel};
pub use store::{IncidentUpdate, StoreError};
