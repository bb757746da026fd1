//! Error taxonomy for allocation and risk assessment.

use serde::Serialize;
use thiserror::Error;

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, RiskError>;

#[derive(Error, Debug)]
pub enum RiskError {
    /// Input statistics are non-finite or degenerate.
    #[error("Data validation failed: {message}")]
    DataValidation { message: String },

    /// The local solver did not converge (single pass) or no restart converged.
    #[error("Optimization failed: {message}")]
    OptimizationFailure { message: String },

    /// The request itself is malformed.
    #[error("Validation failed: {message}")]
    Validation { message: String },

    /// The price collaborator could not supply a series.
    #[error("Price data unavailable for {asset}: {reason}")]
    DataUnavailable { asset: String, reason: String },
}

impl RiskError {
    pub fn data_validation(message: impl Into<String>) -> Self {
        Self::DataValidation {
            message: message.into(),
        }
    }

    pub fn optimization_failure(message: impl Into<String>) -> Self {
        Self::OptimizationFailure {
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn data_unavailable(asset: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::DataUnavailable {
            asset: asset.into(),
            reason: reason.into(),
        }
    }

    /// True for failures that are reported to the caller as an error payload.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::DataUnavailable { .. })
    }
}

/// Structured error body handed back in place of a result.
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct ErrorPayload {
    pub error: String,
}

impl From<&RiskError> for ErrorPayload {
    fn from(err: &RiskError) -> Self {
        Self {
            error: err.to_string(),
        }
    }
}

/// Either a computed result or an error payload.
#[derive(Clone, Debug, Serialize)]
#[serde(untagged)]
pub enum ServiceResponse<T> {
    Success(T),
    Failed(ErrorPayload),
}

impl<T> ServiceResponse<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

/// Converts validation and optimization failures into a payload.
///
/// `DataUnavailable` has no safe default and is passed through unchanged.
pub fn respond<T>(result: Result<T>) -> Result<ServiceResponse<T>> {
    match result {
        Ok(value) => Ok(ServiceResponse::Success(value)),
        Err(err) if err.is_recoverable() => {
            tracing::warn!("Request failed: {}", err);
            Ok(ServiceResponse::Failed(ErrorPayload::from(&err)))
        }
        Err(err) => Err(err),
    }
}
