use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Incident categories offered by the report form. Free-form types are
/// still accepted; these are the suggested values.
pub const INCIDENT_TYPES: [&str; 5] = [
    "Harassment",
    "Stalking",
    "Suspicious Activity",
    "Unsafe Environment",
    "Other",
];

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvalidIncident {
    #[error("incident type is required")]
    MissingType,

    #[error("description is required")]
    MissingDescription,

    #[error("unknown incident status: {0}")]
    UnknownStatus(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentStatus {
    Pending,
    InReview,
    Resolved,
    Closed,
}

impl IncidentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IncidentStatus::Pending => "pending",
            IncidentStatus::InReview => "in_review",
            IncidentStatus::Resolved => "resolved",
            IncidentStatus::Closed => "closed",
        }
    }

    /// Audit line appended to `log` on every status change.
    pub fn log_entry(&self, at: DateTime<Utc>) -> String {
        format!(
            "[{}] Status changed to \"{}\" by authority\n",
            at.to_rfc3339_opts(SecondsFormat::Millis, true),
            self.as_str()
        )
    }
}

impl fmt::Display for IncidentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IncidentStatus {
    type Err = InvalidIncident;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(IncidentStatus::Pending),
            "in_review" => Ok(IncidentStatus::InReview),
            "resolved" => Ok(IncidentStatus::Resolved),
            "closed" => Ok(IncidentStatus::Closed),
            other => Err(InvalidIncident::UnknownStatus(other.to_string())),
        }
    }
}

/// A stored incident report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncidentRecord {
    pub id: Uuid,
    pub user_id: Option<Uuid>,
    pub reporter_name: Option<String>,
    #[serde(rename = "type")]
    pub incident_type: String,
    pub description: String,
    pub location: Option<String>,
    pub evidence_file: Option<String>,
    pub status: IncidentStatus,
    pub reported_at: DateTime<Utc>,
    pub is_anonymous: bool,
    pub log: String,
}

impl IncidentRecord {
    pub fn parsed_location(&self) -> Option<IncidentLocation> {
        self.location.as_deref().map(IncidentLocation::parse)
    }
}

/// Report as submitted by the intake form.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewIncident {
    #[serde(rename = "type")]
    pub incident_type: String,
    pub description: String,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub evidence_file: Option<String>,
    #[serde(default)]
    pub reporter_name: Option<String>,
    #[serde(default)]
    pub is_anonymous: bool,
}

impl NewIncident {
    /// Trim fields, drop blank optionals, and strip the reporter name from
    /// anonymous reports.
    pub fn normalized(self) -> Result<Self, InvalidIncident> {
        let incident_type = self.incident_type.trim().to_string();
        if incident_type.is_empty() {
            return Err(InvalidIncident::MissingType);
        }
        let description = self.description.trim().to_string();
        if description.is_empty() {
            return Err(InvalidIncident::MissingDescription);
        }

        let reporter_name = if self.is_anonymous {
            None
        } else {
            non_blank(self.reporter_name)
        };

        Ok(Self {
            incident_type,
            description,
            location: non_blank(self.location),
            evidence_file: non_blank(self.evidence_file),
            reporter_name,
            is_anonymous: self.is_anonymous,
        })
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Parsed view over an incident's `location` text.
#[derive(Debug, Clone, PartialEq)]
pub enum IncidentLocation {
    Coordinates {
        lat: f64,
        lon: f64,
        address: Option<String>,
    },
    Text(String),
}

impl IncidentLocation {
    /// Accepts `"lat,lon"` and `"lat,lon|address"`; anything else (including
    /// out-of-range coordinates) is kept as free text.
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        let (coords, address) = match raw.split_once('|') {
            Some((c, a)) => (c, non_blank(Some(a.to_string()))),
            None => (raw, None),
        };

        let parsed = coords.split_once(',').and_then(|(lat, lon)| {
            let lat: f64 = lat.trim().parse().ok()?;
            let lon: f64 = lon.trim().parse().ok()?;
            let in_range = (-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lon);
            in_range.then_some((lat, lon))
        });

        match parsed {
            Some((lat, lon)) => IncidentLocation::Coordinates { lat, lon, address },
            None => IncidentLocation::Text(raw.to_string()),
        }
    }

    pub fn coordinates(&self) -> Option<(f64, f64)> {
        match self {
            IncidentLocation::Coordinates { lat, lon, .. } => Some((*lat, *lon)),
            IncidentLocation::Text(_) => None,
        }
    }
}

impl fmt::Display for IncidentLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IncidentLocation::Coordinates {
                lat,
                lon,
                address: Some(address),
            } => write!(f, "{},{}|{}", lat, lon, address),
            IncidentLocation::Coordinates { lat, lon, address: None } => {
                write!(f, "{},{}", lat, lon)
            }
            IncidentLocation::Text(text) => f.write_str(text),
        }
    }
}
