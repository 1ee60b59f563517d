//! Wire body sent to the compute service.

use serde::{Deserialize, Serialize};

use crate::domain::LineItem;
use crate::domain::request::{Completed, RecoveryDetails, Request, RequestId};
use crate::estimate::{StrategyInput, estimate_recovery_hours};

/// Everything the compute service needs to estimate one request.
///
/// Absent refinement inputs go over the wire as `""` and `0`, which the
/// service treats the same as "unknown".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalculationPayload {
    pub request_id: RequestId,
    pub it_skill_level: String,
    pub network_bandwidth_mbps: i32,
    pub documentation_quality: String,
    pub strategies: Vec<StrategyInput>,
}

impl CalculationPayload {
    pub fn new(request: &Request<Completed>, line_items: &[LineItem]) -> Self {
        let details = &request.data.details;
        Self {
            request_id: request.data.id,
            it_skill_level: details.it_skill_level.clone().unwrap_or_default(),
            network_bandwidth_mbps: details.network_bandwidth_mbps.unwrap_or_default(),
            documentation_quality: details.documentation_quality.clone().unwrap_or_default(),
            strategies: line_items.iter().map(StrategyInput::from).collect(),
        }
    }

    /// What the compute service is expected to answer for this payload.
    pub fn estimate(&self) -> f64 {
        let details = RecoveryDetails {
            it_skill_level: Some(self.it_skill_level.clone()),
            network_bandwidth_mbps: Some(self.network_bandwidth_mbps),
            documentation_quality: Some(self.documentation_quality.clone()),
        };
        estimate_recovery_hours(&self.strategies, &details)
    }
}
