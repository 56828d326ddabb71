//! Postgres incident store.
//!
//! Status changes and their audit line are written by one `UPDATE`, so a
//! record's `log` can never disagree with its `status`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use thiserror::Error;
use uuid::Uuid;

use crate::models::incident::InvalidIncident;
use crate::models::{IncidentRecord, IncidentStatus, NewIncident};

const RETURNING: &str = "id, user_id, reporter_name, incident_type, description, location, \
     evidence_file, status, reported_at, is_anonymous, log";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Invalid incident: {0}")]
    Invalid(#[from] InvalidIncident),

    #[error("Incident not found: {0}")]
    NotFound(Uuid),
}

#[derive(Debug, FromRow)]
struct IncidentRow {
    id: Uuid,
    user_id: Option<Uuid>,
    reporter_name: Option<String>,
    incident_type: String,
    description: String,
    location: Option<String>,
    evidence_file: Option<String>,
    status: String,
    reported_at: DateTime<Utc>,
    is_anonymous: bool,
    log: String,
}

impl TryFrom<IncidentRow> for IncidentRecord {
    type Error = InvalidIncident;

    fn try_from(row: IncidentRow) -> Result<Self, Self::Error> {
        Ok(IncidentRecord {
            id: row.id,
            user_id: row.user_id,
            reporter_name: row.reporter_name,
            incident_type: row.incident_type,
            description: row.description,
            location: row.location,
            evidence_file: row.evidence_file,
            status: row.status.parse()?,
            reported_at: row.reported_at,
            is_anonymous: row.is_anonymous,
            log: row.log,
        })
    }
}

/// Owner edit. Absent fields are left unchanged; a blank location clears it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IncidentUpdate {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
}

impl IncidentUpdate {
    pub fn is_empty(&self) -> bool {
        self.description.is_none() && self.location.is_none()
    }
}

/// Insert a new report. Records always start `pending` with an empty log.
pub async fn create(
    pool: &PgPool,
    user_id: Option<Uuid>,
    incident: NewIncident,
) -> Result<IncidentRecord, StoreError> {
    let incident = incident.normalized()?;

    let sql = format!(
        "INSERT INTO incidents \
         (id, user_id, reporter_name, incident_type, description, location, evidence_file, status, is_anonymous, log) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, '') \
         RETURNING {RETURNING}"
    );

    let row: IncidentRow = sqlx::query_as(&sql)
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(&incident.reporter_name)
        .bind(&incident.incident_type)
        .bind(&incident.description)
        .bind(&incident.location)
        .bind(&incident.evidence_file)
        .bind(IncidentStatus::Pending.as_str())
        .bind(incident.is_anonymous)
        .fetch_one(pool)
        .await?;

    let record = IncidentRecord::try_from(row)?;
    tracing::info!(
        incident = %record.id,
        incident_type = %record.incident_type,
        anonymous = record.is_anonymous,
        "Incident created"
    );
    Ok(record)
}

pub async fn get(pool: &PgPool, id: Uuid) -> Result<IncidentRecord, StoreError> {
    let sql = format!("SELECT {RETURNING} FROM incidents WHERE id = $1");
    let row: Option<IncidentRow> = sqlx::query_as(&sql).bind(id).fetch_optional(pool).await?;

    match row {
        Some(row) => Ok(IncidentRecord::try_from(row)?),
        None => Err(StoreError::NotFound(id)),
    }
}

/// All incidents, or only those filed by `user_id`, newest first.
pub async fn list(pool: &PgPool, user_id: Option<Uuid>) -> Result<Vec<IncidentRecord>, StoreError> {
    let rows: Vec<IncidentRow> = match user_id {
        Some(user_id) => {
            let sql = format!(
                "SELECT {RETURNING} FROM incidents WHERE user_id = $1 ORDER BY reported_at DESC"
            );
            sqlx::query_as(&sql).bind(user_id).fetch_all(pool).await?
        }
        None => {
            let sql = format!("SELECT {RETURNING} FROM incidents ORDER BY reported_at DESC");
            sqlx::query_as(&sql).fetch_all(pool).await?
        }
    };

    rows.into_iter()
        .map(|row| IncidentRecord::try_from(row).map_err(StoreError::from))
        .collect()
}

pub async fn update_details(
    pool: &PgPool,
    id: Uuid,
    update: IncidentUpdate,
) -> Result<IncidentRecord, StoreError> {
    let description = match update.description {
        Some(d) if d.trim().is_empty() => return Err(InvalidIncident::MissingDescription.into()),
        Some(d) => Some(d.trim().to_string()),
        None => None,
    };
    let set_location = update.location.is_some();
    let location = update
        .location
        .map(|l| l.trim().to_string())
        .filter(|l| !l.is_empty());

    let sql = format!(
        "UPDATE incidents SET \
         description = COALESCE($2, description), \
         location = CASE WHEN $3 THEN $4 ELSE location END \
         WHERE id = $1 \
         RETURNING {RETURNING}"
    );

    let row: Option<IncidentRow> = sqlx::query_as(&sql)
        .bind(id)
        .bind(description)
        .bind(set_location)
        .bind(location)
        .fetch_optional(pool)
        .await?;

    let record = IncidentRecord::try_from(row.ok_or(StoreError::NotFound(id))?)?;
    tracing::info!(incident = %id, "Incident details updated");
    Ok(record)
}

/// Set the status and append the matching audit line in one statement.
pub async fn update_status(
    pool: &PgPool,
    id: Uuid,
    status: IncidentStatus,
    at: DateTime<Utc>,
) -> Result<IncidentRecord, StoreError> {
    let sql = format!(
        "UPDATE incidents SET status = $2, log = log || $3 \
         WHERE id = $1 \
         RETURNING {RETURNING}"
    );

    let row: Option<IncidentRow> = sqlx::query_as(&sql)
        .bind(id)
        .bind(status.as_str())
        .bind(status.log_entry(at))
        .fetch_optional(pool)
        .await?;

    let record = IncidentRecord::try_from(row.ok_or(StoreError::NotFound(id))?)?;
    tracing::info!(incident = %id, status = %status, "Incident status changed");
    Ok(record)
}

pub async fn is_authority(pool: &PgPool, user_id: Uuid) -> Result<bool, StoreError> {
    let row: Option<(String,)> = sqlx::query_as("SELECT role FROM user_roles WHERE user_id = $1")
        .bind(user_id)
        .fetch_optional(pool)
        .await?;

    Ok(matches!(row, Some((role,)) if role == "authority"))
}
