// SPDX-License-Identifier: MIT

//! The error taxonomy every core operation returns through (spec §7).
//!
//! Propagation policy lives in `forge-lifecycle`; this module only defines
//! the stable kinds and what they carry.

use thiserror::Error;

/// Stable error taxonomy shared by the store, queue, engine registry,
/// spec resolver, and policy evaluator.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("validation error: {0}")]
    ValidationError(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("illegal transition: {from} -> {to}")]
    IllegalTransition { from: String, to: String },

    #[error("policy violation: {0}")]
    PolicyViolation(String),

    #[error("engine failure: {0}")]
    EngineFailure(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("missing dependency: {0}")]
    Dependency(String),
}

impl CoreError {
    /// Whether the worker runtime should retry the enclosing job on this error.
    ///
    /// `Storage` and `Timeout` are transient; everything else is surfaced.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CoreError::Storage(_) | CoreError::Timeout(_))
    }

    /// The `event_type` a terminal occurrence of this error should be recorded under.
    pub fn event_type(&self) -> &'static str {
        match self {
            CoreError::NotFound(_) => "error_not_found",
            CoreError::ValidationError(_) => "spec_validation_error",
            CoreError::Conflict(_) => "error_conflict",
            CoreError::IllegalTransition { .. } => "error_illegal_transition",
            CoreError::PolicyViolation(_) => "policy_blocked",
            CoreError::EngineFailure(_) => "engine_failure",
            CoreError::Timeout(_) => "error_timeout",
            CoreError::Storage(_) => "error_storage",
            CoreError::Dependency(_) => "error_dependency",
        }
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
