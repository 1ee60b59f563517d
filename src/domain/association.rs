//! Ledger rows linking requests to strategies.

use serde::{Deserialize, Serialize};

use super::request::RequestId;
use super::strategy::{Strategy, StrategyId};
use crate::error::{Result, SalvorError};

/// "This strategy is part of this request, covering N GB of data."
///
/// `(request_id, strategy_id)` is unique.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Association {
    pub request_id: RequestId,
    pub strategy_id: StrategyId,
    pub data_to_recover_gb: i32,
}

/// An association joined with the strategy data needed to display it and
/// to feed the calculation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "postgres", derive(sqlx::FromRow))]
pub struct LineItem {
    pub strategy_id: StrategyId,
    pub title: String,
    pub description: String,
    pub image_url: Option<String>,
    pub base_recovery_hours: f64,
    pub data_to_recover_gb: i32,
}

impl LineItem {
    pub fn new(strategy: &Strategy, data_to_recover_gb: i32) -> Self {
        Self {
            strategy_id: strategy.id,
            title: strategy.title.clone(),
            description: strategy.description.clone(),
            image_url: strategy.image_url.clone(),
            base_recovery_hours: strategy.base_recovery_hours,
            data_to_recover_gb,
        }
    }
}

/// Rejects negative data volumes before they reach the store.
pub fn validate_data_gb(data_gb: i32) -> Result<i32> {
    if data_gb < 0 {
        return Err(SalvorError::Validation(format!(
            "data_to_recover_gb must be >= 0, got {data_gb}"
        )));
    }
    Ok(data_gb)
}
