//! Doubt payloads and their validated domain form.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::DoubtId;

/// Assignment status of a doubt.
///
/// `Assigned` is terminal: a doubt never transitions back to `Open`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DoubtStatus {
    Open,
    Assigned,
}

impl DoubtStatus {
    /// Parse the backend's status string.
    ///
    /// The backend uses several spellings for the open state and several
    /// post-acceptance states; every non-open state collapses to `Assigned`.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "open" | "pending" | "available" => Some(Self::Open),
            "assigned" | "accepted" | "in_progress" | "in-progress" | "resolved" | "closed" => {
                Some(Self::Assigned)
            }
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Assigned => "assigned",
        }
    }
}

/// Deferred-session details. Immutable once set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    pub date: String,
    pub time: String,
}

/// A doubt as the reconciler sees it: validated, immutable apart from `status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailableDoubt {
    pub id: DoubtId,
    pub subject: String,
    pub description: String,
    pub status: DoubtStatus,
    pub created_at: DateTime<Utc>,
    pub schedule: Option<Schedule>,
}

impl AvailableDoubt {
    #[must_use]
    pub fn is_scheduled(&self) -> bool {
        self.schedule.is_some()
    }

    /// Case-insensitive subject match against a solver's subject list.
    ///
    /// An empty list matches everything.
    #[must_use]
    pub fn matches_subjects(&self, subjects: &[String]) -> bool {
        subjects.is_empty()
            || subjects
                .iter()
                .any(|s| s.trim().eq_ignore_ascii_case(self.subject.trim()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PayloadError {
    #[error("payload is not valid JSON for a doubt: {0}")]
    Json(String),
    #[error("payload is missing required field `{0}`")]
    MissingField(&'static str),
    #[error("payload field `{0}` is empty")]
    EmptyField(&'static str),
    #[error("unknown doubt status {0:?}")]
    UnknownStatus(String),
    #[error("invalid createdAt timestamp {value:?}: {reason}")]
    InvalidTimestamp { value: String, reason: String },
    #[error("scheduled doubt is missing scheduledDate or scheduledTime")]
    IncompleteSchedule,
}

/// Loose mirror of the backend doubt document.
///
/// Every field is optional so that validation can report which one is wrong
/// instead of failing with a generic serde error. The identifier is accepted
/// under `doubtId` (push), `_id` (database documents) or `id`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DoubtPayload {
    pub doubt_id: Option<String>,
    #[serde(rename = "_id")]
    pub document_id: Option<String>,
    pub id: Option<String>,
    pub subject: Option<String>,
    pub description: Option<String>,
    pub status: Option<String>,
    pub created_at: Option<String>,
    #[serde(default)]
    pub is_scheduled: bool,
    pub scheduled_date: Option<String>,
    pub scheduled_time: Option<String>,
}

impl DoubtPayload {
    pub fn from_json(value: &serde_json::Value) -> Result<Self, PayloadError> {
        Self::deserialize(value).map_err(|e| PayloadError::Json(e.to_string()))
    }

    /// Best-effort id of a document that may fail validation.
    ///
    /// Looks at the same keys, in the same order, as the full conversion.
    #[must_use]
    pub fn listed_id(value: &serde_json::Value) -> Option<DoubtId> {
        ["doubtId", "_id", "id"].iter().find_map(|key| {
            value
                .get(*key)
                .and_then(serde_json::Value::as_str)
                .and_then(|raw| DoubtId::new(raw).ok())
        })
    }
}

/// One validated poll response.
///
/// `unreadable` holds the ids of listed entries that failed validation. The
/// backend still lists them, so they are never treated as absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollList {
    pub doubts: Vec<AvailableDoubt>,
    pub unreadable: Vec<DoubtId>,
}

impl From<Vec<AvailableDoubt>> for PollList {
    fn from(doubts: Vec<AvailableDoubt>) -> Self {
        Self {
            doubts,
            unreadable: Vec::new(),
        }
    }
}

impl TryFrom<DoubtPayload> for AvailableDoubt {
    type Error = PayloadError;

    fn try_from(payload: DoubtPayload) -> Result<Self, Self::Error> {
        let raw_id = payload
            .doubt_id
            .or(payload.document_id)
            .or(payload.id)
            .ok_or(PayloadError::MissingField("doubtId"))?;
        let id = DoubtId::new(raw_id).map_err(|_| PayloadError::EmptyField("doubtId"))?;

        let subject = payload
            .subject
            .ok_or(PayloadError::MissingField("subject"))?;
        if subject.trim().is_empty() {
            return Err(PayloadError::EmptyField("subject"));
        }

        let raw_status = payload.status.ok_or(PayloadError::MissingField("status"))?;
        let status =
            DoubtStatus::parse(&raw_status).ok_or(PayloadError::UnknownStatus(raw_status))?;

        let raw_created = payload
            .created_at
            .ok_or(PayloadError::MissingField("createdAt"))?;
        let created_at = DateTime::parse_from_rfc3339(raw_created.trim())
            .map_err(|e| PayloadError::InvalidTimestamp {
                value: raw_created.clone(),
                reason: e.to_string(),
            })?
            .with_timezone(&Utc);

        let schedule = if payload.is_scheduled {
            match (payload.scheduled_date, payload.scheduled_time) {
                (Some(date), Some(time)) if !date.trim().is_empty() && !time.trim().is_empty() => {
                    Some(Schedule { date, time })
                }
                _ => return Err(PayloadError::IncompleteSchedule),
            }
        } else {
            None
        };

        Ok(Self {
            id,
            subject,
            description: payload.description.unwrap_or_default(),
            status,
            created_at,
            schedule,
        })
    }
}

/// Payload of `doubt:assigned`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignedPayload {
    pub doubt_id: DoubtId,
}

impl AssignedPayload {
    pub fn from_json(value: &serde_json::Value) -> Result<Self, PayloadError> {
        Self::deserialize(value).map_err(|e| PayloadError::Json(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(value: &serde_json::Value) -> Result<AvailableDoubt, PayloadError> {
        AvailableDoubt::try_from(DoubtPayload::from_json(value)?)
    }

    #[test]
    fn parses_push_shape() {
        let doubt = parse(&json!({
            "doubtId": "d1",
            "subject": "java",
            "description": "Why is String immutable?",
            "status": "open",
            "createdAt": "2024-03-01T10:00:00.000Z"
        }))
        .unwrap();

        assert_eq!(doubt.id.as_str(), "d1");
        assert_eq!(doubt.subject, "java");
        assert_eq!(doubt.status, DoubtStatus::Open);
        assert!(!doubt.is_scheduled());
    }

    #[test]
    fn accepts_document_id_from_poll_shape() {
        let doubt = parse(&json!({
            "_id": "665f1c",
            "subject": "dbms",
            "status": "pending",
            "createdAt": "2024-03-01T10:00:00+05:30"
        }))
        .unwrap();

        assert_eq!(doubt.id.as_str(), "665f1c");
        assert_eq!(doubt.description, "");
        assert_eq!(doubt.created_at.to_rfc3339(), "2024-03-01T04:30:00+00:00");
    }

    #[test]
    fn scheduled_doubt_requires_date_and_time() {
        let ok = parse(&json!({
            "doubtId": "d2",
            "subject": "os",
            "status": "open",
            "createdAt": "2024-03-01T10:00:00Z",
            "isScheduled": true,
            "scheduledDate": "2024-03-05",
            "scheduledTime": "18:30"
        }))
        .unwrap();
        assert_eq!(
            ok.schedule,
            Some(Schedule {
                date: "2024-03-05".to_string(),
                time: "18:30".to_string()
            })
        );

        let err = parse(&json!({
            "doubtId": "d3",
            "subject": "os",
            "status": "open",
            "createdAt": "2024-03-01T10:00:00Z",
            "isScheduled": true,
            "scheduledDate": "2024-03-05"
        }))
        .unwrap_err();
        assert_eq!(err, PayloadError::IncompleteSchedule);
    }

    #[test]
    fn rejects_missing_and_invalid_fields() {
        assert_eq!(
            parse(&json!({"subject": "java", "createdAt": "2024-03-01T10:00:00Z"})).unwrap_err(),
            PayloadError::MissingField("doubtId")
        );
        assert_eq!(
            parse(&json!({"doubtId": "d1", "subject": "  ", "createdAt": "2024-03-01T10:00:00Z"}))
                .unwrap_err(),
            PayloadError::EmptyField("subject")
        );
        assert!(matches!(
            parse(&json!({
                "doubtId": "d1",
                "subject": "java",
                "status": "open",
                "createdAt": "yesterday"
            })),
            Err(PayloadError::InvalidTimestamp { .. })
        ));
        assert_eq!(
            parse(&json!({
                "doubtId": "d1",
                "subject": "java",
                "status": "archived",
                "createdAt": "2024-03-01T10:00:00Z"
            }))
            .unwrap_err(),
            PayloadError::UnknownStatus("archived".to_string())
        );
        assert_eq!(
            parse(&json!({"doubtId": "d1", "subject": "java", "createdAt": "2024-03-01T10:00:00Z"}))
                .unwrap_err(),
            PayloadError::MissingField("status")
        );
        assert!(matches!(
            DoubtPayload::from_json(&json!(42)),
            Err(PayloadError::Json(_))
        ));
    }

    #[test]
    fn non_open_statuses_collapse_to_assigned() {
        for raw in ["assigned", "accepted", "in_progress", "resolved", "closed"] {
            assert_eq!(DoubtStatus::parse(raw), Some(DoubtStatus::Assigned), "{raw}");
        }
        for raw in ["open", "Pending", "available"] {
            assert_eq!(DoubtStatus::parse(raw), Some(DoubtStatus::Open), "{raw}");
        }
    }

    #[test]
    fn subject_matching_is_case_insensitive() {
        let doubt = parse(&json!({
            "doubtId": "d1",
            "subject": "Java",
            "status": "open",
            "createdAt": "2024-03-01T10:00:00Z"
        }))
        .unwrap();

        assert!(doubt.matches_subjects(&[]));
        assert!(doubt.matches_subjects(&["dbms".to_string(), "java".to_string()]));
        assert!(!doubt.matches_subjects(&["python".to_string()]));
    }

    #[test]
    fn listed_id_reads_ids_of_invalid_documents() {
        let broken = json!({"_id": "d1", "subject": "java", "createdAt": "2024-03-01 10:00"});
        assert!(parse(&broken).is_err());
        assert_eq!(DoubtPayload::listed_id(&broken), Some(DoubtId::new("d1").unwrap()));

        let fallback = DoubtPayload::listed_id(&json!({"doubtId": "  ", "_id": "d2"}));
        assert_eq!(fallback.unwrap().as_str(), "d2");
        assert_eq!(DoubtPayload::listed_id(&json!({"doubtId": 7})), None);
        assert_eq!(DoubtPayload::listed_id(&json!("d1")), None);
    }

    #[test]
    fn assigned_payload_requires_id() {
        let ok = AssignedPayload::from_json(&json!({"doubtId": "d1"})).unwrap();
        assert_eq!(ok.doubt_id.as_str(), "d1");
        assert!(AssignedPayload::from_json(&json!({"doubtId": ""})).is_err());
        assert!(AssignedPayload::from_json(&json!({})).is_err());
    }
}
