//! Inbound results from the compute service.
//!
//! The compute service answers a dispatched [`crate::dispatch::CalculationPayload`]
//! by calling back with a [`CalculationResult`] and the shared secret in the
//! [`SECRET_HEADER`] header. [`CallbackHandler::handle`] applies the write policy:
//!
//! 1. A missing or wrong secret is refused before the store is touched.
//! 2. The value must be a finite, non-negative number of hours.
//! 3. The request must exist and be `completed`. Nothing else ever has a
//!    calculation in flight, so a callback for any other status is refused.
//! 4. Repeated callbacks for the same request overwrite; the last write wins.

use std::sync::Arc;

use metrics::counter;
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;

use crate::domain::request::RequestId;
use crate::error::{ErrorKind, Result, SalvorError};
use crate::estimate::validate_hours;
use crate::manager::Storage;

/// Header carrying the shared secret on callbacks.
pub const SECRET_HEADER: &str = "X-Internal-Secret";

/// Body of a callback.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalculationResult {
    pub request_id: RequestId,
    /// Estimated recovery time in hours
    pub calculated_time: f64,
}

/// Acknowledgement returned to the compute service.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallbackAck {
    pub request_id: RequestId,
    pub calculated_time: f64,
}

/// Validates and applies calculation results.
pub struct CallbackHandler<S: Storage> {
    storage: Arc<S>,
    secret: String,
}

impl<S: Storage> CallbackHandler<S> {
    pub fn new(storage: Arc<S>, secret: impl Into<String>) -> Self {
        Self {
            storage,
            secret: secret.into(),
        }
    }

    /// Apply one callback.
    #[tracing::instrument(skip(self, provided_secret), fields(request_id = %result.request_id))]
    pub async fn handle(
        &self,
        provided_secret: Option<&str>,
        result: CalculationResult,
    ) -> Result<CallbackAck> {
        let outcome = self.apply(provided_secret, result).await;

        let label = match &outcome {
            Ok(_) => "accepted",
            Err(e) => match e.kind() {
                ErrorKind::Authorization => "unauthorized",
                ErrorKind::Validation => "invalid",
                ErrorKind::NotFound => "not_found",
                ErrorKind::StateConflict => "conflict",
                ErrorKind::Dispatch | ErrorKind::Internal => "error",
            },
        };
        counter!("salvor_callbacks_total", "outcome" => label).increment(1);

        if let Err(e) = &outcome {
            tracing::warn!(outcome = label, error = %e, "Calculation callback refused");
        }
        outcome
    }

    async fn apply(
        &self,
        provided_secret: Option<&str>,
        result: CalculationResult,
    ) -> Result<CallbackAck> {
        if !self.secret_matches(provided_secret) {
            return Err(SalvorError::Unauthorized(format!(
                "missing or invalid {SECRET_HEADER} header"
            )));
        }
        let hours = validate_hours(result.calculated_time)?;

        let request = self.storage.get_request(result.request_id).await?;
        let current = request.status();
        let completed = request
            .into_completed()
            .ok_or(SalvorError::InvalidState {
                request: result.request_id,
                current,
                action: "record an estimate",
            })?;

        completed.record_estimate(hours, self.storage.as_ref()).await?;

        Ok(CallbackAck {
            request_id: result.request_id,
            calculated_time: hours,
        })
    }

    fn secret_matches(&self, provided: Option<&str>) -> bool {
        match provided {
            // An unset secret never authenticates anyone
            Some(provided) if !self.secret.is_empty() => {
                provided.as_bytes().ct_eq(self.secret.as_bytes()).into()
            }
            _ => false,
        }
    }
}
