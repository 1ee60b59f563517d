//! In-memory implementation of [`Storage`].
//!
//! Every operation runs inside one critical section, which gives the same
//! guarantees the PostgreSQL constraints give: one draft per user, one row per
//! (request, strategy) pair, and compare-and-set transitions. Useful for
//! embedding, local development and tests.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;

use super::row::RequestRow;
use super::{LEDGER_ACTION, RequestFilter, Storage, transition_action};
use crate::domain::request::{
    AnyRequest, DetailsUpdate, Draft, Request, RequestId, RequestState, RequestStatus,
};
use crate::domain::{Association, LineItem, Strategy, StrategyId, UserId};
use crate::error::{Result, SalvorError};

#[derive(Default)]
struct Inner {
    last_request_id: i64,
    requests: BTreeMap<RequestId, RequestRow>,
    /// Mirrors the partial unique index on (user_id) WHERE status = 'draft'
    drafts: HashMap<UserId, RequestId>,
    associations: BTreeMap<(RequestId, StrategyId), Association>,
    strategies: HashMap<StrategyId, Strategy>,
}

impl Inner {
    fn row(&self, id: RequestId) -> Result<&RequestRow> {
        self.requests
            .get(&id)
            .ok_or(SalvorError::RequestNotFound(id))
    }

    fn require_draft(&self, id: RequestId) -> Result<()> {
        let current = self.row(id)?.status;
        if current != RequestStatus::Draft {
            return Err(SalvorError::InvalidState {
                request: id,
                current,
                action: LEDGER_ACTION,
            });
        }
        Ok(())
    }

    fn draft(&self, id: RequestId) -> Result<Request<Draft>> {
        let request = AnyRequest::try_from(self.row(id)?.clone())?;
        request.into_draft().ok_or(SalvorError::Other(anyhow::anyhow!(
            "draft index points at non-draft request {}",
            id
        )))
    }
}

/// Storage backed by process memory.
#[derive(Default)]
pub struct InMemoryStorage {
    inner: Mutex<Inner>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the externally managed strategy catalog.
    pub fn insert_strategy(&self, strategy: Strategy) {
        self.inner.lock().strategies.insert(strategy.id, strategy);
    }
}

#[async_trait]
impl Storage for InMemoryStorage {
    #[tracing::instrument(skip(self), fields(user_id = %user_id))]
    async fn get_or_create_draft(&self, user_id: UserId) -> Result<Request<Draft>> {
        let mut inner = self.inner.lock();
        if let Some(&id) = inner.drafts.get(&user_id) {
            return inner.draft(id);
        }

        inner.last_request_id += 1;
        let id = RequestId(inner.last_request_id);
        let row = RequestRow {
            id: *id,
            status: RequestStatus::Draft,
            user_id: *user_id,
            moderator_id: None,
            created_at: Utc::now(),
            formed_at: None,
            completed_at: None,
            it_skill_level: None,
            network_bandwidth_mbps: None,
            documentation_quality: None,
            calculated_recovery_time_hours: None,
        };
        inner.requests.insert(id, row);
        inner.drafts.insert(user_id, id);
        tracing::debug!(request_id = %id, "Created draft request");

        inner.draft(id)
    }

    async fn find_draft(&self, user_id: UserId) -> Result<Option<Request<Draft>>> {
        let inner = self.inner.lock();
        inner
            .drafts
            .get(&user_id)
            .map(|&id| inner.draft(id))
            .transpose()
    }

    async fn get_request(&self, id: RequestId) -> Result<AnyRequest> {
        let inner = self.inner.lock();
        AnyRequest::try_from(inner.row(id)?.clone())
    }

    async fn list_requests(&self, filter: &RequestFilter) -> Result<Vec<AnyRequest>> {
        let rows: Vec<RequestRow> = self.inner.lock().requests.values().cloned().collect();

        let mut requests = Vec::new();
        for row in rows {
            let request = AnyRequest::try_from(row)?;
            if filter.matches(&request) {
                requests.push(request);
            }
        }
        requests.sort_by_key(|r| (r.formed_at(), r.id()));
        Ok(requests)
    }

    #[tracing::instrument(skip(self, update), fields(request_id = %id))]
    async fn update_details(&self, id: RequestId, update: &DetailsUpdate) -> Result<()> {
        let mut inner = self.inner.lock();
        let row = inner
            .requests
            .get_mut(&id)
            .ok_or(SalvorError::RequestNotFound(id))?;
        if row.status != RequestStatus::Draft {
            return Err(SalvorError::InvalidState {
                request: id,
                current: row.status,
                action: "update",
            });
        }

        if let Some(skill) = &update.it_skill_level {
            row.it_skill_level = Some(skill.clone());
        }
        if let Some(mbps) = update.network_bandwidth_mbps {
            row.network_bandwidth_mbps = Some(mbps);
        }
        if let Some(quality) = &update.documentation_quality {
            row.documentation_quality = Some(quality.clone());
        }
        Ok(())
    }

    #[tracing::instrument(skip(self, request), fields(request_id = %request.data.id, to = %T::STATUS))]
    async fn persist<T: RequestState + Clone>(
        &self,
        request: &Request<T>,
        expected: RequestStatus,
    ) -> Result<()>
    where
        AnyRequest: From<Request<T>>,
    {
        let new_row = RequestRow::from(&AnyRequest::from(request.clone()));
        let id = request.data.id;

        let mut inner = self.inner.lock();
        let current = inner.row(id)?.status;
        if current != expected {
            return Err(SalvorError::InvalidState {
                request: id,
                current,
                action: transition_action(expected, T::STATUS),
            });
        }

        if current == RequestStatus::Draft && T::STATUS != RequestStatus::Draft {
            inner.drafts.remove(&request.data.user_id);
        }
        inner.requests.insert(id, new_row);
        Ok(())
    }

    async fn get_strategy(&self, id: StrategyId) -> Result<Strategy> {
        self.inner
            .lock()
            .strategies
            .get(&id)
            .cloned()
            .ok_or(SalvorError::StrategyNotFound(id))
    }

    #[tracing::instrument(skip(self), fields(request_id = %request_id, strategy_id = %strategy_id))]
    async fn add_association(
        &self,
        request_id: RequestId,
        strategy_id: StrategyId,
        data_gb: i32,
    ) -> Result<bool> {
        let mut inner = self.inner.lock();
        inner.require_draft(request_id)?;
        if !inner.strategies.contains_key(&strategy_id) {
            return Err(SalvorError::StrategyNotFound(strategy_id));
        }

        let key = (request_id, strategy_id);
        if inner.associations.contains_key(&key) {
            tracing::debug!("Strategy already attached, nothing to do");
            return Ok(false);
        }
        inner.associations.insert(
            key,
            Association {
                request_id,
                strategy_id,
                data_to_recover_gb: data_gb,
            },
        );
        Ok(true)
    }

    async fn update_association(
        &self,
        request_id: RequestId,
        strategy_id: StrategyId,
        data_gb: i32,
    ) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.require_draft(request_id)?;
        let association = inner
            .associations
            .get_mut(&(request_id, strategy_id))
            .ok_or(SalvorError::AssociationNotFound(request_id, strategy_id))?;
        association.data_to_recover_gb = data_gb;
        Ok(())
    }

    async fn remove_association(
        &self,
        request_id: RequestId,
        strategy_id: StrategyId,
    ) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.require_draft(request_id)?;
        inner
            .associations
            .remove(&(request_id, strategy_id))
            .map(|_| ())
            .ok_or(SalvorError::AssociationNotFound(request_id, strategy_id))
    }

    async fn list_line_items(&self, request_id: RequestId) -> Result<Vec<LineItem>> {
        let inner = self.inner.lock();
        inner
            .associations
            .range((request_id, StrategyId(i64::MIN))..=(request_id, StrategyId(i64::MAX)))
            .map(|(_, association)| {
                inner
                    .strategies
                    .get(&association.strategy_id)
                    .map(|strategy| LineItem::new(strategy, association.data_to_recover_gb))
                    .ok_or(SalvorError::StrategyNotFound(association.strategy_id))
            })
            .collect()
    }

    async fn count_associations(&self, request_id: RequestId) -> Result<u64> {
        let inner = self.inner.lock();
        let count = inner
            .associations
            .range((request_id, StrategyId(i64::MIN))..=(request_id, StrategyId(i64::MAX)))
            .count();
        Ok(count as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::StrategyStatus;
    use crate::domain::request::Formed;

    fn strategy(id: i64, hours: f64) -> Strategy {
        Strategy {
            id: StrategyId(id),
            title: format!("Strategy {id}"),
            description: "restore from backup".to_string(),
            image_url: None,
            base_recovery_hours: hours,
            status: StrategyStatus::Active,
        }
    }

    #[tokio::test]
    async fn test_get_or_create_draft_is_idempotent() {
        let storage = InMemoryStorage::new();
        let first = storage.get_or_create_draft(UserId(1)).await.unwrap();
        let second = storage.get_or_create_draft(UserId(1)).await.unwrap();
        let other_user = storage.get_or_create_draft(UserId(2)).await.unwrap();

        assert_eq!(first.data.id, second.data.id);
        assert_ne!(first.data.id, other_user.data.id);
    }

    #[tokio::test]
    async fn test_persist_is_compare_and_set() {
        let storage = InMemoryStorage::new();
        let draft = storage.get_or_create_draft(UserId(1)).await.unwrap();
        let formed = Request {
            data: draft.data.clone(),
            state: Formed {
                created_at: draft.state.created_at,
                formed_at: Utc::now(),
            },
        };

        storage.persist(&formed, RequestStatus::Draft).await.unwrap();
        let err = storage
            .persist(&formed, RequestStatus::Draft)
            .await
            .unwrap_err();
        match err {
            SalvorError::InvalidState {
                current, action, ..
            } => {
                assert_eq!(current, RequestStatus::Formed);
                assert_eq!(action, "form");
            }
            other => panic!("expected InvalidState, got {other:?}"),
        }

        // The user no longer has a draft, so the next cart mutation opens a new one
        assert!(storage.find_draft(UserId(1)).await.unwrap().is_none());
        let next = storage.get_or_create_draft(UserId(1)).await.unwrap();
        assert_ne!(next.data.id, draft.data.id);
    }

    #[tokio::test]
    async fn test_ledger_operations() {
        let storage = InMemoryStorage::new();
        storage.insert_strategy(strategy(10, 2.0));
        storage.insert_strategy(strategy(20, 3.0));
        let draft = storage.get_or_create_draft(UserId(1)).await.unwrap();
        let id = draft.data.id;

        assert!(storage.add_association(id, StrategyId(20), 5).await.unwrap());
        assert!(storage.add_association(id, StrategyId(10), 0).await.unwrap());
        assert!(!storage.add_association(id, StrategyId(10), 99).await.unwrap());
        assert_eq!(storage.count_associations(id).await.unwrap(), 2);

        storage
            .update_association(id, StrategyId(10), 40)
            .await
            .unwrap();
        let items = storage.list_line_items(id).await.unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].strategy_id, StrategyId(10));
        assert_eq!(items[0].data_to_recover_gb, 40);
        assert_eq!(items[1].base_recovery_hours, 3.0);

        storage.remove_association(id, StrategyId(20)).await.unwrap();
        assert!(matches!(
            storage.remove_association(id, StrategyId(20)).await,
            Err(SalvorError::AssociationNotFound(..))
        ));
        assert!(matches!(
            storage.update_association(id, StrategyId(20), 1).await,
            Err(SalvorError::AssociationNotFound(..))
        ));
        assert!(matches!(
            storage.add_association(id, StrategyId(99), 0).await,
            Err(SalvorError::StrategyNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_ledger_is_frozen_once_formed() {
        let storage = InMemoryStorage::new();
        storage.insert_strategy(strategy(10, 2.0));
        storage.insert_strategy(strategy(20, 3.0));
        let draft = storage.get_or_create_draft(UserId(1)).await.unwrap();
        let id = draft.data.id;
        storage.add_association(id, StrategyId(10), 5).await.unwrap();

        let formed = Request {
            data: draft.data.clone(),
            state: Formed {
                created_at: draft.state.created_at,
                formed_at: Utc::now(),
            },
        };
        storage.persist(&formed, RequestStatus::Draft).await.unwrap();

        for result in [
            storage.add_association(id, StrategyId(20), 1).await.map(|_| ()),
            storage.update_association(id, StrategyId(10), 1).await,
            storage.remove_association(id, StrategyId(10)).await,
        ] {
            assert!(matches!(
                result,
                Err(SalvorError::InvalidState {
                    current: RequestStatus::Formed,
                    ..
                })
            ));
        }
        assert_eq!(storage.list_line_items(id).await.unwrap()[0].data_to_recover_gb, 5);
    }

    #[tokio::test]
    async fn test_cart_badge_without_draft_is_zero() {
        let storage = InMemoryStorage::new();
        let badge = storage.cart_badge(UserId(42)).await.unwrap();
        assert_eq!(badge.request_id, None);
        assert_eq!(badge.count, 0);
    }
}
