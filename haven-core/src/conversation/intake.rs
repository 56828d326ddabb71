use serde::{Deserialize, Serialize};

use super::session::{ConversationSession, ValidationError};
use crate::models::NewIncident;

/// Prefill for the incident form, produced from a completed conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntakeDraft {
    pub description: String,
}

impl IntakeDraft {
    /// Consume a completed session. The summary becomes the description
    /// unchanged.
    pub fn from_session(session: ConversationSession) -> Result<Self, ValidationError> {
        Ok(Self {
            description: session.into_summary()?,
        })
    }

    /// Start a new incident from the draft; the reporter fills in the rest.
    pub fn into_new_incident(self, incident_type: impl Into<String>) -> NewIncident {
        NewIncident {
            incident_type: incident_type.into(),
            description: self.description,
            ..NewIncident::default()
        }
    }
}
