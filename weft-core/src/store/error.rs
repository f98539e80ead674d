//! Store Errors
//!
//! Failures inside the store are captured and republished on the affected
//! token's meta channel rather than propagated to the caller. `StoreError`
//! is the reason type carried by those meta updates.

use thiserror::Error;

/// An error raised while computing or writing reactive state.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A state token could not be initialized.
    #[error("unable to initialize state: {name}")]
    Initialization { name: String },

    /// A reactive computation (container query) failed.
    #[error("state computation failed: {detail}")]
    Computation { detail: String },

    /// A writer rejected the message it was asked to apply.
    #[error("write rejected: {detail}")]
    WriteRejected { detail: String },
}

impl StoreError {
    /// Convenience constructor for computation failures.
    pub fn computation(detail: impl Into<String>) -> Self {
        Self::Computation {
            detail: detail.into(),
        }
    }

    /// Convenience constructor for rejected writes.
    pub fn rejected(detail: impl Into<String>) -> Self {
        Self::WriteRejected {
            detail: detail.into(),
        }
    }
}
