//! The operations adapters call, one method per user or moderator action.
//!
//! [`RecoveryDesk`] layers the actor and status guards over [`Storage`] and
//! wires the completion transition to the dispatcher. Every method takes the
//! [`Actor`] explicitly; the desk never looks identity up on its own.
//!
//! Guards run in a fixed order. Malformed input is refused before the store is
//! touched; then the request must exist, the actor must be allowed, and the
//! status must be right. A caller who is not the creator of a request
//! therefore always gets an authorization error for it, whatever its status.

use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::dispatch::{CalculationPayload, DispatchHandle, DispatchStats};
use crate::domain::association::validate_data_gb;
use crate::domain::request::{
    AnyRequest, Completed, Deleted, DetailsUpdate, Draft, Formed, Request, RequestId,
    RequestStatus,
};
use crate::domain::{Actor, LineItem, StrategyId};
use crate::error::{Result, SalvorError};
use crate::estimate::{StrategyInput, estimate_recovery_hours};
use crate::manager::{CartBadge, LEDGER_ACTION, ListQuery, Storage};

/// How a moderator resolves a formed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolveAction {
    Complete,
    Reject,
}

impl ResolveAction {
    fn verb(&self) -> &'static str {
        match self {
            ResolveAction::Complete => "complete",
            ResolveAction::Reject => "reject",
        }
    }
}

impl FromStr for ResolveAction {
    type Err = SalvorError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "complete" => Ok(ResolveAction::Complete),
            "reject" => Ok(ResolveAction::Reject),
            _ => Err(SalvorError::Validation(format!(
                "unknown action '{s}', expected 'complete' or 'reject'"
            ))),
        }
    }
}

/// A request together with its line items.
#[derive(Debug, Clone, Serialize)]
pub struct RequestView {
    pub request: AnyRequest,
    pub line_items: Vec<LineItem>,
}

/// Entry point for every request operation.
///
/// # Example
/// ```ignore
/// let storage = Arc::new(InMemoryStorage::new());
/// let (dispatcher, handle) = Dispatcher::new(Arc::new(ReqwestHttpClient::new()), config.dispatch);
/// dispatcher.spawn(shutdown.clone());
///
/// let desk = RecoveryDesk::new(storage, handle);
/// let draft_id = desk.add_to_cart(&Actor::user(7), StrategyId(3), 120).await?;
/// desk.form(&Actor::user(7), draft_id).await?;
/// desk.resolve(&Actor::moderator(1), draft_id, "complete".parse()?).await?;
/// ```
pub struct RecoveryDesk<S: Storage> {
    storage: Arc<S>,
    dispatch: DispatchHandle,
}

impl<S: Storage> RecoveryDesk<S> {
    pub fn new(storage: Arc<S>, dispatch: DispatchHandle) -> Self {
        Self { storage, dispatch }
    }

    pub fn storage(&self) -> &Arc<S> {
        &self.storage
    }

    pub fn dispatch_stats(&self) -> DispatchStats {
        self.dispatch.stats()
    }

    /// Load a request the actor created and require it to still be a draft.
    async fn owned_draft(
        &self,
        actor: &Actor,
        id: RequestId,
        action: &'static str,
    ) -> Result<Request<Draft>> {
        let request = self.storage.get_request(id).await?;
        actor.require_owner(request.user_id(), action)?;

        let current = request.status();
        request.into_draft().ok_or(SalvorError::InvalidState {
            request: id,
            current,
            action,
        })
    }

    /// Load a request the actor may read. Deleted requests read as missing.
    async fn visible_request(&self, actor: &Actor, id: RequestId) -> Result<AnyRequest> {
        let request = self.storage.get_request(id).await?;
        if request.status() == RequestStatus::Deleted {
            return Err(SalvorError::RequestNotFound(id));
        }
        if !actor.can_view(request.user_id()) {
            return Err(SalvorError::Unauthorized(format!(
                "only the creator or a moderator can view request {id}"
            )));
        }
        Ok(request)
    }

    /// The actor's draft id and how many strategies it holds.
    ///
    /// Never fails; a storage error is logged and reported as an empty cart.
    #[tracing::instrument(skip(self, actor), fields(user_id = %actor.user_id))]
    pub async fn cart_badge(&self, actor: &Actor) -> CartBadge {
        match self.storage.cart_badge(actor.user_id).await {
            Ok(badge) => badge,
            Err(e) => {
                tracing::error!(error = %e, "Failed to load cart badge, reporting empty cart");
                CartBadge::default()
            }
        }
    }

    /// The actor's draft, created if they have none.
    pub async fn get_or_create_draft(&self, actor: &Actor) -> Result<Request<Draft>> {
        self.storage.get_or_create_draft(actor.user_id).await
    }

    /// Add a catalog strategy to the actor's cart, creating the draft on first
    /// use. Adding a strategy that is already in the cart changes nothing.
    ///
    /// Returns the draft id.
    #[tracing::instrument(skip(self, actor), fields(user_id = %actor.user_id, strategy_id = %strategy_id))]
    pub async fn add_to_cart(
        &self,
        actor: &Actor,
        strategy_id: StrategyId,
        data_gb: i32,
    ) -> Result<RequestId> {
        let data_gb = validate_data_gb(data_gb)?;
        let strategy = self.storage.get_strategy(strategy_id).await?;
        if !strategy.is_active() {
            return Err(SalvorError::Validation(format!(
                "strategy {strategy_id} is not available"
            )));
        }

        let draft = self.storage.get_or_create_draft(actor.user_id).await?;
        let inserted = self
            .storage
            .add_association(draft.data.id, strategy_id, data_gb)
            .await?;

        tracing::debug!(request_id = %draft.data.id, inserted, "Added strategy to cart");
        Ok(draft.data.id)
    }

    /// Attach a strategy to a specific draft of the actor's.
    ///
    /// Returns whether the strategy was newly attached.
    #[tracing::instrument(skip(self, actor), fields(user_id = %actor.user_id))]
    pub async fn add_strategy(
        &self,
        actor: &Actor,
        request_id: RequestId,
        strategy_id: StrategyId,
        data_gb: i32,
    ) -> Result<bool> {
        let data_gb = validate_data_gb(data_gb)?;
        let draft = self.owned_draft(actor, request_id, LEDGER_ACTION).await?;
        let strategy = self.storage.get_strategy(strategy_id).await?;
        if !strategy.is_active() {
            return Err(SalvorError::Validation(format!(
                "strategy {strategy_id} is not available"
            )));
        }

        self.storage
            .add_association(draft.data.id, strategy_id, data_gb)
            .await
    }

    /// Change how much data a strategy in a draft covers.
    #[tracing::instrument(skip(self, actor), fields(user_id = %actor.user_id))]
    pub async fn update_quantity(
        &self,
        actor: &Actor,
        request_id: RequestId,
        strategy_id: StrategyId,
        data_gb: i32,
    ) -> Result<()> {
        let data_gb = validate_data_gb(data_gb)?;
        self.owned_draft(actor, request_id, LEDGER_ACTION).await?;
        self.storage
            .update_association(request_id, strategy_id, data_gb)
            .await
    }

    /// Take a strategy out of a draft.
    #[tracing::instrument(skip(self, actor), fields(user_id = %actor.user_id))]
    pub async fn remove_strategy(
        &self,
        actor: &Actor,
        request_id: RequestId,
        strategy_id: StrategyId,
    ) -> Result<()> {
        self.owned_draft(actor, request_id, LEDGER_ACTION).await?;
        self.storage
            .remove_association(request_id, strategy_id)
            .await
    }

    /// Line items of a request the actor may read.
    pub async fn list_line_items(&self, actor: &Actor, id: RequestId) -> Result<Vec<LineItem>> {
        self.visible_request(actor, id).await?;
        self.storage.list_line_items(id).await
    }

    /// A request with its line items. Readable by its creator and by moderators.
    #[tracing::instrument(skip(self, actor), fields(user_id = %actor.user_id))]
    pub async fn get_request(&self, actor: &Actor, id: RequestId) -> Result<RequestView> {
        let request = self.visible_request(actor, id).await?;
        let line_items = self.storage.list_line_items(id).await?;
        Ok(RequestView {
            request,
            line_items,
        })
    }

    /// Set the refinement inputs of a draft. Fields absent from `update` are kept.
    #[tracing::instrument(skip(self, actor, update), fields(user_id = %actor.user_id))]
    pub async fn update_details(
        &self,
        actor: &Actor,
        id: RequestId,
        update: DetailsUpdate,
    ) -> Result<()> {
        if let Some(mbps) = update.network_bandwidth_mbps.filter(|mbps| *mbps < 0) {
            return Err(SalvorError::Validation(format!(
                "network bandwidth must be >= 0, got {mbps}"
            )));
        }
        self.owned_draft(actor, id, "update").await?;
        if update.is_empty() {
            return Ok(());
        }
        self.storage.update_details(id, &update).await
    }

    /// Submit a draft for moderation.
    #[tracing::instrument(skip(self, actor), fields(user_id = %actor.user_id))]
    pub async fn form(&self, actor: &Actor, id: RequestId) -> Result<Request<Formed>> {
        let draft = self.owned_draft(actor, id, "form").await?;
        draft.form(actor, self.storage.as_ref()).await
    }

    /// Soft-delete a draft.
    #[tracing::instrument(skip(self, actor), fields(user_id = %actor.user_id))]
    pub async fn delete(&self, actor: &Actor, id: RequestId) -> Result<Request<Deleted>> {
        let draft = self.owned_draft(actor, id, "delete").await?;
        draft.delete(actor, self.storage.as_ref()).await
    }

    /// Complete or reject a formed request.
    ///
    /// Completing clears any previous estimate and queues a calculation. The
    /// call returns once the transition is stored; a dispatch that cannot be
    /// queued is logged and counted but does not fail the resolution.
    #[tracing::instrument(skip(self, actor), fields(moderator_id = %actor.user_id))]
    pub async fn resolve(
        &self,
        actor: &Actor,
        id: RequestId,
        action: ResolveAction,
    ) -> Result<AnyRequest> {
        let request = self.storage.get_request(id).await?;
        actor.require_moderator(action.verb())?;

        let current = request.status();
        let formed = request.into_formed().ok_or(SalvorError::InvalidState {
            request: id,
            current,
            action: action.verb(),
        })?;

        match action {
            ResolveAction::Complete => {
                let completed = formed.complete(actor, self.storage.as_ref()).await?;
                self.dispatch_calculation(&completed).await;
                Ok(completed.into())
            }
            ResolveAction::Reject => {
                let rejected = formed.reject(actor, self.storage.as_ref()).await?;
                Ok(rejected.into())
            }
        }
    }

    async fn dispatch_calculation(&self, request: &Request<Completed>) {
        let line_items = match self.storage.list_line_items(request.data.id).await {
            Ok(items) => items,
            Err(e) => {
                tracing::error!(
                    request_id = %request.data.id,
                    error = %e,
                    "Failed to load line items, calculation not dispatched"
                );
                return;
            }
        };

        let payload = CalculationPayload::new(request, &line_items);
        if let Err(e) = self.dispatch.submit(payload) {
            tracing::error!(request_id = %request.data.id, error = %e, "Calculation not dispatched");
        }
    }

    /// Compute the estimate locally without storing it.
    #[tracing::instrument(skip(self, actor), fields(user_id = %actor.user_id))]
    pub async fn preview_estimate(&self, actor: &Actor, id: RequestId) -> Result<f64> {
        let request = self.visible_request(actor, id).await?;
        let line_items = self.storage.list_line_items(id).await?;
        let inputs: Vec<StrategyInput> = line_items.iter().map(StrategyInput::from).collect();
        Ok(estimate_recovery_hours(&inputs, &request.data().details))
    }

    /// Non-draft, non-deleted requests visible to the actor, oldest formed first.
    #[tracing::instrument(skip(self, actor), fields(user_id = %actor.user_id))]
    pub async fn list_requests(&self, actor: &Actor, query: ListQuery) -> Result<Vec<AnyRequest>> {
        let filter = query.into_filter(actor)?;
        self.storage.list_requests(&filter).await
    }
}
