// ─────────────────────────────────────────────────────────────────────
// Fringe RTD — Errors
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
use thiserror::Error;

use crate::step::Step;

#[derive(Error, Debug)]
pub enum RtdError {
    /// Transport failure, timeout or malformed frame. Retryable.
    #[error("Communication error: {0}")]
    Communication(String),

    #[error("Step `{step}` requires `{requires}` to be done first")]
    Precondition { step: Step, requires: Step },

    /// A step's product was asked for but the step has not run this cycle.
    #[error("`{0}` has not run this cycle")]
    NotComputed(Step),

    /// Raised by the linear solver; the telescope solve skips the pivot.
    #[error("Singular system")]
    SingularSystem,

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("The cycle data is locked (waited {timeout_ms} ms)")]
    DataLocked { timeout_ms: u64 },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Unknown recipe {0:?}")]
    UnknownRecipe(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl RtdError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, RtdError::Communication(_))
    }
}

pub type RtdResult<T> = Result<T, RtdError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_communication_is_retryable() {
        assert!(RtdError::Communication("timeout".into()).is_retryable());
        assert!(!RtdError::SingularSystem.is_retryable());
        assert!(!RtdError::Configuration("no map".into()).is_retryable());
        assert!(!RtdError::DataLocked { timeout_ms: 5 }.is_retryable());
    }

    #[test]
    fn test_precondition_message_names_both_steps() {
        let err = RtdError::Precondition {
            step: Step::Combine,
            requires: Step::Prepare,
        };
        let msg = err.to_string();
        assert!(msg.contains("combine"), "{msg}");
        assert!(msg.contains("prepare"), "{msg}");
    }
}
