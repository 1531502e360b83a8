use std::any::Any;
use thiserror::Error;

use crate::parser::types::TestType;

/// Why a single step failed. Recorded in the log, never propagated past the runner.
#[derive(Error, Debug)]
pub enum StepError {
    #[error("Unsupported action '{action}'{}", variant_suffix(.variant))]
    UnsupportedAction {
        action: String,
        variant: Option<TestType>,
    },

    #[error("Invalid config for '{action}': {reason}")]
    InvalidConfig { action: String, reason: String },

    #[error("{0}")]
    Assertion(String),

    #[error("'{action}' timed out after {timeout_ms}ms")]
    Timeout { action: String, timeout_ms: u64 },

    #[error("'{action}' failed: {reason}")]
    Driver { action: String, reason: String },

    #[error("'{action}' crashed: {reason}")]
    Crashed { action: String, reason: String },
}

fn variant_suffix(variant: &Option<TestType>) -> String {
    variant
        .map(|v| format!(" for {} tests", v))
        .unwrap_or_default()
}

impl StepError {
    /// Wrap a driver error, keeping the whole context chain in the message
    pub fn driver(action: &str, err: anyhow::Error) -> Self {
        StepError::Driver {
            action: action.to_string(),
            reason: format!("{:#}", err),
        }
    }

    /// A step that panicked, with the panic message when there is one
    pub fn crashed(action: &str, payload: Box<dyn Any + Send>) -> Self {
        let reason = if let Some(msg) = payload.downcast_ref::<&str>() {
            msg.to_string()
        } else if let Some(msg) = payload.downcast_ref::<String>() {
            msg.clone()
        } else {
            "unknown panic".to_string()
        };
        StepError::Crashed {
            action: action.to_string(),
            reason,
        }
    }
}
