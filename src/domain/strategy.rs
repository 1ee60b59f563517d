//! Recovery strategies from the catalog.
//!
//! The catalog is managed elsewhere; the core only reads strategies, and the
//! only field that feeds a calculation is `base_recovery_hours`.

use serde::{Deserialize, Serialize};

id_type!(
    /// Identifier of a catalog strategy.
    StrategyId,
    "strategy id"
);

/// Catalog availability of a strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[cfg_attr(feature = "postgres", derive(sqlx::Type))]
#[cfg_attr(
    feature = "postgres",
    sqlx(type_name = "text", rename_all = "lowercase")
)]
pub enum StrategyStatus {
    Active,
    Inactive,
}

/// A data-recovery strategy that can be attached to a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "postgres", derive(sqlx::FromRow))]
pub struct Strategy {
    pub id: StrategyId,
    pub title: String,
    pub description: String,
    /// Reference into the external image store, if the strategy has one
    pub image_url: Option<String>,
    /// Hours the strategy needs on its own, before data transfer (>= 0)
    pub base_recovery_hours: f64,
    pub status: StrategyStatus,
}

impl Strategy {
    pub fn is_active(&self) -> bool {
        self.status == StrategyStatus::Active
    }
}
