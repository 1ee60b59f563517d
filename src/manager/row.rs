//! Flat row representation of a request, shared by the storage backends.

use anyhow::anyhow;
use chrono::{DateTime, Utc};

use crate::domain::UserId;
use crate::domain::request::{
    AnyRequest, Completed, Deleted, Draft, Formed, RecoveryDetails, Rejected, Request,
    RequestData, RequestId, RequestStatus,
};
use crate::error::{Result, SalvorError};

/// One row of the `recovery_requests` table.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "postgres", derive(sqlx::FromRow))]
pub(crate) struct RequestRow {
    pub id: i64,
    pub status: RequestStatus,
    pub user_id: i64,
    pub moderator_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub formed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub it_skill_level: Option<String>,
    pub network_bandwidth_mbps: Option<i32>,
    pub documentation_quality: Option<String>,
    pub calculated_recovery_time_hours: Option<f64>,
}

fn required<T>(value: Option<T>, id: i64, status: RequestStatus, column: &str) -> Result<T> {
    value.ok_or_else(|| {
        SalvorError::Other(anyhow!(
            "Corrupt row: request {} is '{}' but has no {}",
            id,
            status,
            column
        ))
    })
}

impl TryFrom<RequestRow> for AnyRequest {
    type Error = SalvorError;

    fn try_from(row: RequestRow) -> Result<Self> {
        let id = row.id;
        let status = row.status;
        let data = RequestData {
            id: RequestId(row.id),
            user_id: UserId(row.user_id),
            details: RecoveryDetails {
                it_skill_level: row.it_skill_level,
                network_bandwidth_mbps: row.network_bandwidth_mbps,
                documentation_quality: row.documentation_quality,
            },
        };
        let created_at = row.created_at;

        let request = match status {
            RequestStatus::Draft => AnyRequest::Draft(Request {
                data,
                state: Draft { created_at },
            }),
            RequestStatus::Formed => AnyRequest::Formed(Request {
                data,
                state: Formed {
                    created_at,
                    formed_at: required(row.formed_at, id, status, "formed_at")?,
                },
            }),
            RequestStatus::Completed => AnyRequest::Completed(Request {
                data,
                state: Completed {
                    created_at,
                    formed_at: required(row.formed_at, id, status, "formed_at")?,
                    completed_at: required(row.completed_at, id, status, "completed_at")?,
                    moderator_id: UserId(required(row.moderator_id, id, status, "moderator_id")?),
                    calculated_recovery_time_hours: row.calculated_recovery_time_hours,
                },
            }),
            RequestStatus::Rejected => AnyRequest::Rejected(Request {
                data,
                state: Rejected {
                    created_at,
                    formed_at: required(row.formed_at, id, status, "formed_at")?,
                    completed_at: required(row.completed_at, id, status, "completed_at")?,
                    moderator_id: UserId(required(row.moderator_id, id, status, "moderator_id")?),
                },
            }),
            RequestStatus::Deleted => AnyRequest::Deleted(Request {
                data,
                state: Deleted { created_at },
            }),
        };
        Ok(request)
    }
}

impl From<&AnyRequest> for RequestRow {
    fn from(request: &AnyRequest) -> Self {
        let data = request.data();
        let mut row = RequestRow {
            id: *data.id,
            status: request.status(),
            user_id: *data.user_id,
            moderator_id: None,
            created_at: request.created_at(),
            formed_at: request.formed_at(),
            completed_at: None,
            it_skill_level: data.details.it_skill_level.clone(),
            network_bandwidth_mbps: data.details.network_bandwidth_mbps,
            documentation_quality: data.details.documentation_quality.clone(),
            calculated_recovery_time_hours: None,
        };
        match request {
            AnyRequest::Completed(r) => {
                row.moderator_id = Some(*r.state.moderator_id);
                row.completed_at = Some(r.state.completed_at);
                row.calculated_recovery_time_hours = r.state.calculated_recovery_time_hours;
            }
            AnyRequest::Rejected(r) => {
                row.moderator_id = Some(*r.state.moderator_id);
                row.completed_at = Some(r.state.completed_at);
            }
            AnyRequest::Draft(_) | AnyRequest::Formed(_) | AnyRequest::Deleted(_) => {}
        }
        row
    }
}
