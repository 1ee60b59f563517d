//! PostgreSQL implementation of Storage.
//!
//! Atomicity comes from the schema rather than from caller locking: the
//! partial unique index `recovery_requests_one_draft_per_user` backs draft
//! creation, the composite primary key of `request_strategies` backs
//! association inserts, and every transition is an `UPDATE ... WHERE status = $expected`.

use anyhow::anyhow;
use async_trait::async_trait;
use sqlx::postgres::PgPool;
use sqlx::{Postgres, QueryBuilder};

use super::row::RequestRow;
use super::{LEDGER_ACTION, RequestFilter, Storage, transition_action};
use crate::domain::request::{
    AnyRequest, DetailsUpdate, Draft, Request, RequestId, RequestState, RequestStatus,
};
use crate::domain::{LineItem, Strategy, StrategyId, UserId};
use crate::error::{Result, SalvorError};

const REQUEST_COLUMNS: &str = "id, status, user_id, moderator_id, created_at, formed_at, \
     completed_at, it_skill_level, network_bandwidth_mbps, documentation_quality, \
     calculated_recovery_time_hours";

/// A concurrent insert can commit between our `ON CONFLICT DO NOTHING` and the
/// fallback select, leaving neither branch with a visible row. Retrying sees it.
const DRAFT_UPSERT_ATTEMPTS: usize = 3;

/// PostgreSQL implementation of the Storage trait.
///
/// # Example
/// ```ignore
/// use salvor::PostgresStorage;
/// use sqlx::PgPool;
///
/// let pool = PgPool::connect("postgresql://localhost/salvor").await?;
/// salvor::migrator().run(&pool).await?;
/// let storage = Arc::new(PostgresStorage::new(pool));
/// ```
#[derive(Clone)]
pub struct PostgresStorage {
    pool: PgPool,
}

impl PostgresStorage {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn fetch_row(&self, id: RequestId) -> Result<Option<RequestRow>> {
        sqlx::query_as::<_, RequestRow>(&format!(
            "SELECT {REQUEST_COLUMNS} FROM recovery_requests WHERE id = $1"
        ))
        .bind(*id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| SalvorError::Other(anyhow!("Failed to fetch request: {}", e)))
    }

    async fn require_draft(&self, id: RequestId) -> Result<()> {
        let current = self.current_status(id).await?;
        if current != RequestStatus::Draft {
            return Err(SalvorError::InvalidState {
                request: id,
                current,
                action: LEDGER_ACTION,
            });
        }
        Ok(())
    }

    async fn current_status(&self, id: RequestId) -> Result<RequestStatus> {
        sqlx::query_scalar::<_, RequestStatus>("SELECT status FROM recovery_requests WHERE id = $1")
            .bind(*id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| SalvorError::Other(anyhow!("Failed to fetch request status: {}", e)))?
            .ok_or(SalvorError::RequestNotFound(id))
    }
}

fn into_draft(row: RequestRow) -> Result<Request<Draft>> {
    let id = row.id;
    AnyRequest::try_from(row)?
        .into_draft()
        .ok_or_else(|| SalvorError::Other(anyhow!("Request {} is not a draft", id)))
}

#[async_trait]
impl Storage for PostgresStorage {
    #[tracing::instrument(skip(self), fields(user_id = %user_id))]
    async fn get_or_create_draft(&self, user_id: UserId) -> Result<Request<Draft>> {
        let query = format!(
            r#"
            WITH inserted AS (
                INSERT INTO recovery_requests (user_id, status)
                VALUES ($1, 'draft')
                ON CONFLICT (user_id) WHERE status = 'draft' DO NOTHING
                RETURNING {REQUEST_COLUMNS}
            )
            SELECT {REQUEST_COLUMNS} FROM inserted
            UNION ALL
            SELECT {REQUEST_COLUMNS} FROM recovery_requests
            WHERE user_id = $1 AND status = 'draft'
            LIMIT 1
            "#
        );

        for attempt in 1..=DRAFT_UPSERT_ATTEMPTS {
            let row = sqlx::query_as::<_, RequestRow>(&query)
                .bind(*user_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| SalvorError::Other(anyhow!("Failed to upsert draft: {}", e)))?;

            if let Some(row) = row {
                return into_draft(row);
            }
            tracing::debug!(attempt, "Draft upsert raced with a concurrent insert, retrying");
        }

        Err(SalvorError::Other(anyhow!(
            "Failed to upsert draft for user {} after {} attempts",
            user_id,
            DRAFT_UPSERT_ATTEMPTS
        )))
    }

    async fn find_draft(&self, user_id: UserId) -> Result<Option<Request<Draft>>> {
        sqlx::query_as::<_, RequestRow>(&format!(
            "SELECT {REQUEST_COLUMNS} FROM recovery_requests WHERE user_id = $1 AND status = 'draft'"
        ))
        .bind(*user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| SalvorError::Other(anyhow!("Failed to fetch draft: {}", e)))?
        .map(into_draft)
        .transpose()
    }

    async fn get_request(&self, id: RequestId) -> Result<AnyRequest> {
        let row = self
            .fetch_row(id)
            .await?
            .ok_or(SalvorError::RequestNotFound(id))?;
        AnyRequest::try_from(row)
    }

    #[tracing::instrument(skip(self))]
    async fn list_requests(&self, filter: &RequestFilter) -> Result<Vec<AnyRequest>> {
        let mut query: QueryBuilder<Postgres> = QueryBuilder::new(format!(
            "SELECT {REQUEST_COLUMNS} FROM recovery_requests \
             WHERE status NOT IN ('draft', 'deleted')"
        ));
        if let Some(owner) = filter.owner {
            query.push(" AND user_id = ").push_bind(*owner);
        }
        if let Some(status) = filter.status {
            query.push(" AND status = ").push_bind(status);
        }
        if let Some(from) = filter.formed_from {
            query.push(" AND formed_at >= ").push_bind(from);
        }
        if let Some(before) = filter.formed_before {
            query.push(" AND formed_at < ").push_bind(before);
        }
        query.push(" ORDER BY formed_at ASC, id ASC");

        let rows = query
            .build_query_as::<RequestRow>()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| SalvorError::Other(anyhow!("Failed to list requests: {}", e)))?;

        tracing::debug!(count = rows.len(), "Listed requests");
        rows.into_iter().map(AnyRequest::try_from).collect()
    }

    #[tracing::instrument(skip(self, update), fields(request_id = %id))]
    async fn update_details(&self, id: RequestId, update: &DetailsUpdate) -> Result<()> {
        let rows_affected = sqlx::query(
            r#"
            UPDATE recovery_requests SET
                it_skill_level = COALESCE($2, it_skill_level),
                network_bandwidth_mbps = COALESCE($3, network_bandwidth_mbps),
                documentation_quality = COALESCE($4, documentation_quality)
            WHERE id = $1 AND status = 'draft'
            "#,
        )
        .bind(*id)
        .bind(update.it_skill_level.as_deref())
        .bind(update.network_bandwidth_mbps)
        .bind(update.documentation_quality.as_deref())
        .execute(&self.pool)
        .await
        .map_err(|e| SalvorError::Other(anyhow!("Failed to update request details: {}", e)))?
        .rows_affected();

        if rows_affected == 0 {
            let current = self.current_status(id).await?;
            return Err(SalvorError::InvalidState {
                request: id,
                current,
                action: "update",
            });
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
        let row = RequestRow::from(&AnyRequest::from(request.clone()));
        let id = request.data.id;

        let rows_affected = sqlx::query(
            r#"
            UPDATE recovery_requests SET
                status = $3,
                moderator_id = $4,
                formed_at = $5,
                completed_at = $6,
                it_skill_level = $7,
                network_bandwidth_mbps = $8,
                documentation_quality = $9,
                calculated_recovery_time_hours = $10
            WHERE id = $1 AND status = $2
            "#,
        )
        .bind(row.id)
        .bind(expected)
        .bind(row.status)
        .bind(row.moderator_id)
        .bind(row.formed_at)
        .bind(row.completed_at)
        .bind(row.it_skill_level)
        .bind(row.network_bandwidth_mbps)
        .bind(row.documentation_quality)
        .bind(row.calculated_recovery_time_hours)
        .execute(&self.pool)
        .await
        .map_err(|e| SalvorError::Other(anyhow!("Failed to update request: {}", e)))?
        .rows_affected();

        if rows_affected == 0 {
            let current = self.current_status(id).await?;
            return Err(SalvorError::InvalidState {
                request: id,
                current,
                action: transition_action(expected, T::STATUS),
            });
        }
        Ok(())
    }

    async fn get_strategy(&self, id: StrategyId) -> Result<Strategy> {
        sqlx::query_as::<_, Strategy>(
            r#"
            SELECT id, title, description, image_url, base_recovery_hours, status
            FROM strategies
            WHERE id = $1
            "#,
        )
        .bind(*id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| SalvorError::Other(anyhow!("Failed to fetch strategy: {}", e)))?
        .ok_or(SalvorError::StrategyNotFound(id))
    }

    #[tracing::instrument(skip(self), fields(request_id = %request_id, strategy_id = %strategy_id))]
    async fn add_association(
        &self,
        request_id: RequestId,
        strategy_id: StrategyId,
        data_gb: i32,
    ) -> Result<bool> {
        // FOR SHARE blocks a concurrent transition out of draft until we commit,
        // and re-checks the status if one committed first
        let result = sqlx::query(
            r#"
            INSERT INTO request_strategies (request_id, strategy_id, data_to_recover_gb)
            SELECT r.id, $2, $3
            FROM recovery_requests r
            WHERE r.id = $1 AND r.status = 'draft'
            FOR SHARE
            ON CONFLICT (request_id, strategy_id) DO NOTHING
            "#,
        )
        .bind(*request_id)
        .bind(*strategy_id)
        .bind(data_gb)
        .execute(&self.pool)
        .await;

        let rows_affected = match result {
            Ok(done) => done.rows_affected(),
            Err(sqlx::Error::Database(e)) if e.is_foreign_key_violation() => {
                return Err(SalvorError::StrategyNotFound(strategy_id));
            }
            Err(e) => {
                return Err(SalvorError::Other(anyhow!(
                    "Failed to add strategy to request: {}",
                    e
                )));
            }
        };
        if rows_affected > 0 {
            return Ok(true);
        }

        // Either already attached, or the request is missing or no longer a draft
        self.require_draft(request_id).await?;
        tracing::debug!("Strategy already attached, nothing to do");
        Ok(false)
    }

    async fn update_association(
        &self,
        request_id: RequestId,
        strategy_id: StrategyId,
        data_gb: i32,
    ) -> Result<()> {
        let rows_affected = sqlx::query(
            r#"
            UPDATE request_strategies rs SET data_to_recover_gb = $3
            FROM recovery_requests r
            WHERE r.id = rs.request_id AND r.status = 'draft'
              AND rs.request_id = $1 AND rs.strategy_id = $2
            "#,
        )
        .bind(*request_id)
        .bind(*strategy_id)
        .bind(data_gb)
        .execute(&self.pool)
        .await
        .map_err(|e| SalvorError::Other(anyhow!("Failed to update association: {}", e)))?
        .rows_affected();

        if rows_affected == 0 {
            self.require_draft(request_id).await?;
            return Err(SalvorError::AssociationNotFound(request_id, strategy_id));
        }
        Ok(())
    }

    async fn remove_association(
        &self,
        request_id: RequestId,
        strategy_id: StrategyId,
    ) -> Result<()> {
        let rows_affected = sqlx::query(
            r#"
            DELETE FROM request_strategies rs
            USING recovery_requests r
            WHERE r.id = rs.request_id AND r.status = 'draft'
              AND rs.request_id = $1 AND rs.strategy_id = $2
            "#,
        )
        .bind(*request_id)
        .bind(*strategy_id)
        .execute(&self.pool)
        .await
        .map_err(|e| SalvorError::Other(anyhow!("Failed to remove association: {}", e)))?
        .rows_affected();

        if rows_affected == 0 {
            self.require_draft(request_id).await?;
            return Err(SalvorError::AssociationNotFound(request_id, strategy_id));
        }
        Ok(())
    }

    async fn list_line_items(&self, request_id: RequestId) -> Result<Vec<LineItem>> {
        sqlx::query_as::<_, LineItem>(
            r#"
            SELECT rs.strategy_id, s.title, s.description, s.image_url,
                   s.base_recovery_hours, rs.data_to_recover_gb
            FROM request_strategies rs
            JOIN strategies s ON s.id = rs.strategy_id
            WHERE rs.request_id = $1
            ORDER BY rs.strategy_id ASC
            "#,
        )
        .bind(*request_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| SalvorError::Other(anyhow!("Failed to list line items: {}", e)))
    }

    async fn count_associations(&self, request_id: RequestId) -> Result<u64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM request_strategies WHERE request_id = $1")
                .bind(*request_id)
                .fetch_one(&self.pool)
                .await
                .map_err(|e| SalvorError::Other(anyhow!("Failed to count associations: {}", e)))?;
        Ok(count as u64)
    }
}
