pub mod chat;
pub mod incident;

pub use chat::{ChatMessage, Role};
pub use incident::{
    IncidentLocation, IncidentRecord, IncidentStatus, NewIncident, INCIDENT_TYPES,
};
