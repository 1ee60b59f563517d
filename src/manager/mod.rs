//! Storage abstraction for recovery requests and their strategy ledger.
//!
//! This module defines the `Storage` trait, which provides the durable-store
//! interface the rest of the crate is written against, plus the filter and
//! projection types shared by every implementation.

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::request::{
    AnyRequest, DetailsUpdate, Draft, Request, RequestId, RequestState, RequestStatus,
};
use crate::domain::{Actor, LineItem, Strategy, StrategyId, UserId};
use crate::error::{Result, SalvorError};

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;
mod row;

pub use memory::InMemoryStorage;

/// Storage trait for persisting and querying recovery requests.
///
/// Implementations must make the two check-then-act operations atomic:
/// [`Storage::get_or_create_draft`] never yields two drafts for one user, and
/// [`Storage::add_association`] never yields two rows for one pair. Both are
/// backed by uniqueness constraints rather than caller serialization.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Return the user's draft, creating an empty one if none exists.
    async fn get_or_create_draft(&self, user_id: UserId) -> Result<Request<Draft>>;

    /// Return the user's draft without creating one.
    async fn find_draft(&self, user_id: UserId) -> Result<Option<Request<Draft>>>;

    /// Get a request in whatever state it is in (deleted requests included).
    async fn get_request(&self, id: RequestId) -> Result<AnyRequest>;

    /// List non-draft, non-deleted requests matching the filter, ordered by
    /// `formed_at` then id.
    async fn list_requests(&self, filter: &RequestFilter) -> Result<Vec<AnyRequest>>;

    /// Overwrite the refinement inputs present in `update`.
    ///
    /// Only applies while the request is still a draft.
    async fn update_details(&self, id: RequestId, update: &DetailsUpdate) -> Result<()>;

    /// Write a request's new state, provided its stored status is still `expected`.
    ///
    /// Fails with `RequestNotFound` if the row is gone and `InvalidState` if
    /// another transition got there first.
    async fn persist<T: RequestState + Clone>(
        &self,
        request: &Request<T>,
        expected: RequestStatus,
    ) -> Result<()>
    where
        AnyRequest: From<Request<T>>;

    /// Look up a catalog strategy.
    async fn get_strategy(&self, id: StrategyId) -> Result<Strategy>;

    /// Attach a strategy to a draft. Attaching an already attached strategy
    /// is a successful no-op; returns whether a row was inserted.
    ///
    /// This and the other ledger mutations fail with `InvalidState` once the
    /// request has left `draft`.
    async fn add_association(
        &self,
        request_id: RequestId,
        strategy_id: StrategyId,
        data_gb: i32,
    ) -> Result<bool>;

    /// Overwrite the data volume of an existing association.
    async fn update_association(
        &self,
        request_id: RequestId,
        strategy_id: StrategyId,
        data_gb: i32,
    ) -> Result<()>;

    /// Detach a strategy from a request.
    async fn remove_association(&self, request_id: RequestId, strategy_id: StrategyId)
    -> Result<()>;

    /// All associations of a request joined with their strategies, ordered by strategy id.
    async fn list_line_items(&self, request_id: RequestId) -> Result<Vec<LineItem>>;

    /// Number of strategies attached to a request.
    async fn count_associations(&self, request_id: RequestId) -> Result<u64>;

    /// Draft id and item count for the user's cart.
    #[tracing::instrument(skip(self), fields(user_id = %user_id))]
    async fn cart_badge(&self, user_id: UserId) -> Result<CartBadge> {
        match self.find_draft(user_id).await? {
            Some(draft) => {
                let count = self.count_associations(draft.data.id).await?;
                Ok(CartBadge {
                    request_id: Some(draft.data.id),
                    count,
                })
            }
            None => Ok(CartBadge::default()),
        }
    }
}

/// Action named in `InvalidState` when the ledger of a non-draft request is touched.
pub(crate) const LEDGER_ACTION: &str = "edit";

/// Name of the operation a persist from `expected` to `target` stands for,
/// used when reporting a lost race.
pub(crate) fn transition_action(expected: RequestStatus, target: RequestStatus) -> &'static str {
    match (expected, target) {
        (_, RequestStatus::Formed) => "form",
        (_, RequestStatus::Deleted) => "delete",
        (RequestStatus::Completed, RequestStatus::Completed) => "record an estimate",
        (_, RequestStatus::Completed) => "complete",
        (_, RequestStatus::Rejected) => "reject",
        (_, RequestStatus::Draft) => "update",
    }
}

/// Lightweight cart summary for UI affordances.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartBadge {
    pub request_id: Option<RequestId>,
    pub count: u64,
}

/// Filter for [`Storage::list_requests`].
///
/// Draft and deleted requests are always excluded; every set field narrows the
/// result further.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestFilter {
    /// Restrict to one creator's requests
    pub owner: Option<UserId>,
    pub status: Option<RequestStatus>,
    /// Inclusive lower bound on `formed_at`
    pub formed_from: Option<DateTime<Utc>>,
    /// Exclusive upper bound on `formed_at`
    pub formed_before: Option<DateTime<Utc>>,
}

impl RequestFilter {
    pub fn matches(&self, request: &AnyRequest) -> bool {
        let status = request.status();
        if !status.is_listed() {
            return false;
        }
        if self.owner.is_some_and(|owner| owner != request.user_id()) {
            return false;
        }
        if self.status.is_some_and(|wanted| wanted != status) {
            return false;
        }
        let formed_at = request.formed_at();
        if let Some(from) = self.formed_from {
            if formed_at.is_none_or(|at| at < from) {
                return false;
            }
        }
        if let Some(before) = self.formed_before {
            if formed_at.is_none_or(|at| at >= before) {
                return false;
            }
        }
        true
    }
}

/// Raw listing parameters as they arrive from an adapter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListQuery {
    pub status: Option<String>,
    /// `YYYY-MM-DD`, inclusive
    pub date_from: Option<String>,
    /// `YYYY-MM-DD`, inclusive of the whole day
    pub date_to: Option<String>,
}

impl ListQuery {
    /// Build the storage filter for `actor`: moderators see everyone's
    /// requests, everyone else only their own.
    pub fn into_filter(self, actor: &Actor) -> Result<RequestFilter> {
        let status = non_empty(self.status)
            .map(|s| s.parse::<RequestStatus>())
            .transpose()?;
        let formed_from = non_empty(self.date_from)
            .map(|d| parse_day(&d))
            .transpose()?;
        let formed_before = non_empty(self.date_to)
            .map(|d| parse_day(&d).map(|day| day + Duration::days(1)))
            .transpose()?;

        Ok(RequestFilter {
            owner: (!actor.is_moderator).then_some(actor.user_id),
            status,
            formed_from,
            formed_before,
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn parse_day(value: &str) -> Result<DateTime<Utc>> {
    let date = NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d").map_err(|e| {
        SalvorError::Validation(format!("invalid date '{value}', expected YYYY-MM-DD: {e}"))
    })?;
    date.and_hms_opt(0, 0, 0)
        .map(|midnight| midnight.and_utc())
        .ok_or_else(|| SalvorError::Validation(format!("invalid date '{value}'")))
}
