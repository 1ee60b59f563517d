//! State transitions for recovery requests using the typestate pattern.
//!
//! Each request state is a distinct type parameter on `Request<State>`, so a
//! transition can only be called from the state it is legal in:
//!
//! ```text
//! Request<Draft> ──form()────> Request<Formed> ──complete()──> Request<Completed> ──record_estimate()─┐
//!       │                                      │                       ^                             │
//!       │                                      │                       └─────────────────────────────┘
//!       │                                      └──reject()────> Request<Rejected>
//!       └──delete()──> Request<Deleted>
//! ```
//!
//! # Guards
//!
//! - `form` and `delete` may only be called by the request's creator.
//! - `complete` and `reject` may only be called by a moderator.
//!
//! Violations fail with [`crate::error::SalvorError::Unauthorized`], before anything is written.
//!
//! # Persistence
//!
//! Every transition persists through [`Storage::persist`] with the status it
//! started from. The store applies the write only if the row still has that
//! status, so two racing transitions on the same request cannot both succeed;
//! the loser gets [`crate::error::SalvorError::InvalidState`] naming the status it found.

use chrono::Utc;
use metrics::counter;

use crate::domain::user::Actor;
use crate::error::Result;
use crate::estimate::validate_hours;
use crate::manager::Storage;

use super::state::{
    Completed, Deleted, Draft, Formed, Rejected, Request, RequestState, RequestStatus,
};

fn record_transition<Prev: RequestState, Next: RequestState>() {
    counter!(
        "salvor_transitions_total",
        "from" => Prev::STATUS.as_str(),
        "to" => Next::STATUS.as_str()
    )
    .increment(1);
}

impl Request<Draft> {
    /// Submit the draft for moderation.
    pub async fn form<S: Storage + ?Sized>(
        self,
        actor: &Actor,
        storage: &S,
    ) -> Result<Request<Formed>> {
        actor.require_owner(self.data.user_id, "form")?;

        let request = Request {
            data: self.data,
            state: Formed {
                created_at: self.state.created_at,
                formed_at: Utc::now(),
            },
        };
        storage.persist(&request, RequestStatus::Draft).await?;
        record_transition::<Draft, Formed>();

        tracing::info!(request_id = %request.data.id, user_id = %actor.user_id, "Request formed");
        Ok(request)
    }

    /// Soft-delete the draft.
    pub async fn delete<S: Storage + ?Sized>(
        self,
        actor: &Actor,
        storage: &S,
    ) -> Result<Request<Deleted>> {
        actor.require_owner(self.data.user_id, "delete")?;

        let request = Request {
            data: self.data,
            state: Deleted {
                created_at: self.state.created_at,
            },
        };
        storage.persist(&request, RequestStatus::Draft).await?;
        record_transition::<Draft, Deleted>();

        tracing::info!(request_id = %request.data.id, user_id = %actor.user_id, "Request deleted");
        Ok(request)
    }
}

impl Request<Formed> {
    /// Accept the request.
    ///
    /// The calculated time starts out empty; the caller is responsible for
    /// dispatching the calculation (see [`crate::dispatch`]).
    pub async fn complete<S: Storage + ?Sized>(
        self,
        actor: &Actor,
        storage: &S,
    ) -> Result<Request<Completed>> {
        actor.require_moderator("complete")?;

        let request = Request {
            data: self.data,
            state: Completed {
                created_at: self.state.created_at,
                formed_at: self.state.formed_at,
                completed_at: Utc::now(),
                moderator_id: actor.user_id,
                calculated_recovery_time_hours: None,
            },
        };
        storage.persist(&request, RequestStatus::Formed).await?;
        record_transition::<Formed, Completed>();

        tracing::info!(
            request_id = %request.data.id,
            moderator_id = %actor.user_id,
            "Request completed, calculation pending"
        );
        Ok(request)
    }

    /// Turn the request down.
    pub async fn reject<S: Storage + ?Sized>(
        self,
        actor: &Actor,
        storage: &S,
    ) -> Result<Request<Rejected>> {
        actor.require_moderator("reject")?;

        let request = Request {
            data: self.data,
            state: Rejected {
                created_at: self.state.created_at,
                formed_at: self.state.formed_at,
                completed_at: Utc::now(),
                moderator_id: actor.user_id,
            },
        };
        storage.persist(&request, RequestStatus::Formed).await?;
        record_transition::<Formed, Rejected>();

        tracing::info!(
            request_id = %request.data.id,
            moderator_id = %actor.user_id,
            "Request rejected"
        );
        Ok(request)
    }
}

impl Request<Completed> {
    /// Store the estimate returned by the compute service.
    ///
    /// Repeated calls overwrite; the last write wins.
    pub async fn record_estimate<S: Storage + ?Sized>(
        mut self,
        hours: f64,
        storage: &S,
    ) -> Result<Request<Completed>> {
        let hours = validate_hours(hours)?;
        let previous = self.state.calculated_recovery_time_hours.replace(hours);
        storage.persist(&self, RequestStatus::Completed).await?;

        tracing::info!(
            request_id = %self.data.id,
            hours,
            previous = ?previous,
            "Recorded calculated recovery time"
        );
        Ok(self)
    }
}
