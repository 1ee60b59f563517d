//! Recovery time calculation.
//!
//! A pure function of the attached strategies and the request's refinement
//! inputs:
//!
//! ```text
//! hours = (Σ base_recovery_hours + transfer_hours) * skill_multiplier * documentation_multiplier
//! transfer_hours = Σ data_to_recover_gb * 8 * 1024 / (bandwidth_mbps * 3600)   (0 without bandwidth)
//! ```
//!
//! The external compute service is the canonical source of the stored value;
//! this module is used for previews and to describe what that service computes.

use serde::{Deserialize, Serialize};

use crate::domain::LineItem;
use crate::domain::request::RecoveryDetails;
use crate::error::{Result, SalvorError};

/// Megabits per gigabyte.
const MEGABITS_PER_GB: f64 = 8.0 * 1024.0;
const SECONDS_PER_HOUR: f64 = 3600.0;

/// Per-strategy input to the calculation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StrategyInput {
    #[serde(rename = "baseRecoveryHours")]
    pub base_recovery_hours: f64,
    #[serde(rename = "dataToRecoverGB")]
    pub data_to_recover_gb: i32,
}

impl From<&LineItem> for StrategyInput {
    fn from(item: &LineItem) -> Self {
        Self {
            base_recovery_hours: item.base_recovery_hours,
            data_to_recover_gb: item.data_to_recover_gb,
        }
    }
}

/// IT staff skill level, parsed leniently from free text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkillLevel {
    Average,
    Expert,
    /// Anything unrecognised, including no answer at all
    Unskilled,
}

impl SkillLevel {
    pub fn from_label(label: Option<&str>) -> Self {
        match label.map(|l| l.trim().to_lowercase()).as_deref() {
            Some("средний") | Some("average") => SkillLevel::Average,
            Some("эксперт") | Some("expert") => SkillLevel::Expert,
            _ => SkillLevel::Unskilled,
        }
    }

    pub fn multiplier(&self) -> f64 {
        match self {
            SkillLevel::Average => 1.0,
            SkillLevel::Expert => 0.7,
            SkillLevel::Unskilled => 1.5,
        }
    }
}

/// Quality of the documentation for the systems being recovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentationQuality {
    Good,
    Excellent,
    /// Anything unrecognised, including no answer at all
    Poor,
}

impl DocumentationQuality {
    pub fn from_label(label: Option<&str>) -> Self {
        match label.map(|l| l.trim().to_lowercase()).as_deref() {
            Some("хорошая") | Some("good") => DocumentationQuality::Good,
            Some("отличная") | Some("excellent") => DocumentationQuality::Excellent,
            _ => DocumentationQuality::Poor,
        }
    }

    pub fn multiplier(&self) -> f64 {
        match self {
            DocumentationQuality::Good => 1.0,
            DocumentationQuality::Excellent => 0.8,
            DocumentationQuality::Poor => 1.5,
        }
    }
}

/// Hours needed to move `total_gb` over a `bandwidth_mbps` link.
///
/// Zero when the bandwidth is unknown or not positive.
pub fn transfer_hours(total_gb: i64, bandwidth_mbps: Option<i32>) -> f64 {
    match bandwidth_mbps {
        Some(mbps) if mbps > 0 => {
            total_gb as f64 * MEGABITS_PER_GB / (f64::from(mbps) * SECONDS_PER_HOUR)
        }
        _ => 0.0,
    }
}

/// Estimate the recovery time in hours.
pub fn estimate_recovery_hours(strategies: &[StrategyInput], details: &RecoveryDetails) -> f64 {
    let total_base_hours: f64 = strategies.iter().map(|s| s.base_recovery_hours).sum();
    let total_data_gb: i64 = strategies
        .iter()
        .map(|s| i64::from(s.data_to_recover_gb))
        .sum();

    let skill = SkillLevel::from_label(details.it_skill_level.as_deref());
    let docs = DocumentationQuality::from_label(details.documentation_quality.as_deref());

    (total_base_hours + transfer_hours(total_data_gb, details.network_bandwidth_mbps))
        * skill.multiplier()
        * docs.multiplier()
}

/// Checks an estimate before it is stored.
pub fn validate_hours(hours: f64) -> Result<f64> {
    if !hours.is_finite() || hours < 0.0 {
        return Err(SalvorError::Validation(format!(
            "calculated time must be a finite, non-negative number of hours, got {hours}"
        )));
    }
    Ok(hours)
}
