//! Core request types.
//!
//! This module defines the type-safe request lifecycle using the typestate pattern.
//! Each request progresses through distinct states, enforced at compile time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::user::UserId;
use crate::error::SalvorError;

id_type!(
    /// Unique identifier for a recovery request.
    RequestId,
    "request id"
);

/// Status values as stored in the database's `status` column.
///
/// Used for filtering and for naming the current status in state conflicts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[cfg_attr(feature = "postgres", derive(sqlx::Type))]
#[cfg_attr(
    feature = "postgres",
    sqlx(type_name = "text", rename_all = "lowercase")
)]
pub enum RequestStatus {
    Draft,
    Formed,
    Completed,
    Rejected,
    Deleted,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Draft => "draft",
            RequestStatus::Formed => "formed",
            RequestStatus::Completed => "completed",
            RequestStatus::Rejected => "rejected",
            RequestStatus::Deleted => "deleted",
        }
    }

    /// Draft and deleted requests never show up in listings.
    pub fn is_listed(&self) -> bool {
        !matches!(self, RequestStatus::Draft | RequestStatus::Deleted)
    }
}

impl std::fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RequestStatus {
    type Err = SalvorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "draft" => Ok(RequestStatus::Draft),
            "formed" => Ok(RequestStatus::Formed),
            "completed" => Ok(RequestStatus::Completed),
            "rejected" => Ok(RequestStatus::Rejected),
            "deleted" => Ok(RequestStatus::Deleted),
            other => Err(SalvorError::Validation(format!(
                "unknown request status '{other}'"
            ))),
        }
    }
}

/// Marker trait for valid request states.
///
/// This trait enables the typestate pattern, ensuring that operations
/// are only performed on requests in valid states.
pub trait RequestState: Send + Sync {
    const STATUS: RequestStatus;
}

/// A recovery request.
///
/// The generic parameter `T` represents the current state of the request; only
/// the transitions legal from that state are callable on it.
#[derive(Debug, Clone, Serialize)]
pub struct Request<T: RequestState> {
    /// The current state of the request.
    pub state: T,
    /// Data shared by every state.
    pub data: RequestData,
}

/// Data carried by a request regardless of its state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestData {
    pub id: RequestId,

    /// Creator; immutable once the request exists
    pub user_id: UserId,

    /// Refinement inputs the creator fills in before forming
    pub details: RecoveryDetails,
}

/// Optional inputs that refine the recovery-time estimate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryDetails {
    pub it_skill_level: Option<String>,
    pub network_bandwidth_mbps: Option<i32>,
    pub documentation_quality: Option<String>,
}

/// Partial update of [`RecoveryDetails`]; `None` leaves the field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetailsUpdate {
    pub it_skill_level: Option<String>,
    pub network_bandwidth_mbps: Option<i32>,
    pub documentation_quality: Option<String>,
}

impl DetailsUpdate {
    pub fn is_empty(&self) -> bool {
        self.it_skill_level.is_none()
            && self.network_bandwidth_mbps.is_none()
            && self.documentation_quality.is_none()
    }

    pub fn apply_to(&self, details: &mut RecoveryDetails) {
        if let Some(skill) = &self.it_skill_level {
            details.it_skill_level = Some(skill.clone());
        }
        if let Some(mbps) = self.network_bandwidth_mbps {
            details.network_bandwidth_mbps = Some(mbps);
        }
        if let Some(quality) = &self.documentation_quality {
            details.documentation_quality = Some(quality.clone());
        }
    }
}

// ============================================================================
// Request States
// ============================================================================

/// The user's cart. Mutable by its creator; at most one per user.
#[derive(Debug, Clone, Serialize)]
pub struct Draft {
    pub created_at: DateTime<Utc>,
}

impl RequestState for Draft {
    const STATUS: RequestStatus = RequestStatus::Draft;
}

/// Submitted by the creator, waiting for a moderator.
#[derive(Debug, Clone, Serialize)]
pub struct Formed {
    pub created_at: DateTime<Utc>,
    pub formed_at: DateTime<Utc>,
}

impl RequestState for Formed {
    const STATUS: RequestStatus = RequestStatus::Formed;
}

/// Accepted by a moderator.
///
/// `calculated_recovery_time_hours` is `None` while the external calculation
/// is outstanding.
#[derive(Debug, Clone, Serialize)]
pub struct Completed {
    pub created_at: DateTime<Utc>,
    pub formed_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub moderator_id: UserId,
    pub calculated_recovery_time_hours: Option<f64>,
}

impl RequestState for Completed {
    const STATUS: RequestStatus = RequestStatus::Completed;
}

/// Turned down by a moderator.
#[derive(Debug, Clone, Serialize)]
pub struct Rejected {
    pub created_at: DateTime<Utc>,
    pub formed_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub moderator_id: UserId,
}

impl RequestState for Rejected {
    const STATUS: RequestStatus = RequestStatus::Rejected;
}

/// Soft-deleted draft.
#[derive(Debug, Clone, Serialize)]
pub struct Deleted {
    pub created_at: DateTime<Utc>,
}

impl RequestState for Deleted {
    const STATUS: RequestStatus = RequestStatus::Deleted;
}

// ============================================================================
// Unified Request Representation
// ============================================================================

/// Enum that can hold a request in any state.
///
/// This is used for storage and API responses where we need to handle
/// requests uniformly regardless of their current state.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", content = "request", rename_all = "lowercase")]
pub enum AnyRequest {
    Draft(Request<Draft>),
    Formed(Request<Formed>),
    Completed(Request<Completed>),
    Rejected(Request<Rejected>),
    Deleted(Request<Deleted>),
}

impl AnyRequest {
    /// Get the request ID regardless of state.
    pub fn id(&self) -> RequestId {
        self.data().id
    }

    /// Get the creator regardless of state.
    pub fn user_id(&self) -> UserId {
        self.data().user_id
    }

    /// Get the current status.
    pub fn status(&self) -> RequestStatus {
        match self {
            AnyRequest::Draft(_) => RequestStatus::Draft,
            AnyRequest::Formed(_) => RequestStatus::Formed,
            AnyRequest::Completed(_) => RequestStatus::Completed,
            AnyRequest::Rejected(_) => RequestStatus::Rejected,
            AnyRequest::Deleted(_) => RequestStatus::Deleted,
        }
    }

    /// Get the request data regardless of state.
    pub fn data(&self) -> &RequestData {
        match self {
            AnyRequest::Draft(r) => &r.data,
            AnyRequest::Formed(r) => &r.data,
            AnyRequest::Completed(r) => &r.data,
            AnyRequest::Rejected(r) => &r.data,
            AnyRequest::Deleted(r) => &r.data,
        }
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        match self {
            AnyRequest::Draft(r) => r.state.created_at,
            AnyRequest::Formed(r) => r.state.created_at,
            AnyRequest::Completed(r) => r.state.created_at,
            AnyRequest::Rejected(r) => r.state.created_at,
            AnyRequest::Deleted(r) => r.state.created_at,
        }
    }

    /// When the creator submitted the request, if it got that far.
    pub fn formed_at(&self) -> Option<DateTime<Utc>> {
        match self {
            AnyRequest::Formed(r) => Some(r.state.formed_at),
            AnyRequest::Completed(r) => Some(r.state.formed_at),
            AnyRequest::Rejected(r) => Some(r.state.formed_at),
            AnyRequest::Draft(_) | AnyRequest::Deleted(_) => None,
        }
    }

    pub fn calculated_recovery_time_hours(&self) -> Option<f64> {
        match self {
            AnyRequest::Completed(r) => r.state.calculated_recovery_time_hours,
            _ => None,
        }
    }

    /// Check if this request is in a terminal state (Completed, Rejected, or Deleted).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AnyRequest::Completed(_) | AnyRequest::Rejected(_) | AnyRequest::Deleted(_)
        )
    }

    /// Try to take as a Draft request, consuming self.
    pub fn into_draft(self) -> Option<Request<Draft>> {
        match self {
            AnyRequest::Draft(r) => Some(r),
            _ => None,
        }
    }

    /// Try to take as a Formed request, consuming self.
    pub fn into_formed(self) -> Option<Request<Formed>> {
        match self {
            AnyRequest::Formed(r) => Some(r),
            _ => None,
        }
    }

    /// Try to take as a Completed request, consuming self.
    pub fn into_completed(self) -> Option<Request<Completed>> {
        match self {
            AnyRequest::Completed(r) => Some(r),
            _ => None,
        }
    }
}

// Conversion traits for going from typed Request to AnyRequest

impl From<Request<Draft>> for AnyRequest {
    fn from(r: Request<Draft>) -> Self {
        AnyRequest::Draft(r)
    }
}

impl From<Request<Formed>> for AnyRequest {
    fn from(r: Request<Formed>) -> Self {
        AnyRequest::Formed(r)
    }
}

impl From<Request<Completed>> for AnyRequest {
    fn from(r: Request<Completed>) -> Self {
        AnyRequest::Completed(r)
    }
}

impl From<Request<Rejected>> for AnyRequest {
    fn from(r: Request<Rejected>) -> Self {
        AnyRequest::Rejected(r)
    }
}

impl From<Request<Deleted>> for AnyRequest {
    fn from(r: Request<Deleted>) -> Self {
        AnyRequest::Deleted(r)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trips_through_str() {
        for status in [
            RequestStatus::Draft,
            RequestStatus::Formed,
            RequestStatus::Completed,
            RequestStatus::Rejected,
            RequestStatus::Deleted,
        ] {
            assert_eq!(status.as_str().parse::<RequestStatus>().unwrap(), status);
        }
        assert_eq!(
            "Completed".parse::<RequestStatus>().unwrap(),
            RequestStatus::Completed
        );
        assert!("pending".parse::<RequestStatus>().is_err());
    }

    #[test]
    fn test_listed_statuses() {
        assert!(!RequestStatus::Draft.is_listed());
        assert!(!RequestStatus::Deleted.is_listed());
        assert!(RequestStatus::Formed.is_listed());
        assert!(RequestStatus::Completed.is_listed());
        assert!(RequestStatus::Rejected.is_listed());
    }

    #[test]
    fn test_details_update_only_touches_present_fields() {
        let mut details = RecoveryDetails {
            it_skill_level: Some("expert".into()),
            network_bandwidth_mbps: Some(100),
            documentation_quality: None,
        };
        let update = DetailsUpdate {
            documentation_quality: Some("good".into()),
            ..Default::default()
        };
        update.apply_to(&mut details);

        assert_eq!(details.it_skill_level.as_deref(), Some("expert"));
        assert_eq!(details.network_bandwidth_mbps, Some(100));
        assert_eq!(details.documentation_quality.as_deref(), Some("good"));
        assert!(DetailsUpdate::default().is_empty());
    }
}
