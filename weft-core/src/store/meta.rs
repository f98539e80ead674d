//! Meta State
//!
//! Every state token has a companion meta channel describing the status of
//! its most recent update. The channel is itself ordinary reactive state, so
//! views can subscribe to it like any other token.
//!
//! # Lifecycle
//!
//! 1. A token starts out `Ok`.
//! 2. A writer (or any asynchronous producer) publishes `Pending(message)`
//!    while work is in flight.
//! 3. When a new value lands on the base token, the meta channel is reset
//!    to `Ok` automatically.
//! 4. Failures publish `Error`, carrying the message that failed (when one
//!    exists) and the reason.

use crate::store::error::StoreError;

/// The status of the most recent update to a state token.
#[derive(Debug, Clone, PartialEq)]
pub enum Meta<M> {
    /// The latest value was produced without incident.
    Ok,
    /// The carried message is being processed asynchronously.
    Pending(M),
    /// Processing failed. `message` is the message that could not be
    /// applied, when the failure is tied to one.
    Error {
        message: Option<M>,
        reason: StoreError,
    },
}

impl<M> Meta<M> {
    pub fn is_ok(&self) -> bool {
        matches!(self, Meta::Ok)
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Meta::Pending(_))
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Meta::Error { .. })
    }

    /// The in-flight message, if this state is `Pending`.
    pub fn pending_message(&self) -> Option<&M> {
        match self {
            Meta::Pending(message) => Some(message),
            _ => None,
        }
    }
}
