//! Error kinds surfaced by the administration protocol.
//!
//! Patient and medication mismatches are not errors: they are states the
//! session moves into. Only configuration faults, protocol misuse, bad scanner
//! input and persistence failures come back as `BcmaError`.

use thiserror::Error;
use uuid::Uuid;

use super::session::{Operation, SessionState};
use crate::db::DatabaseError;
use crate::schedule::ScheduleError;

#[derive(Error, Debug)]
pub enum BcmaError {
    #[error(transparent)]
    InvalidOrderConfiguration(#[from] ScheduleError),

    #[error("A verification session is already open for order {order_id}")]
    SessionAlreadyActive { order_id: Uuid },

    #[error("Invalid scan token: {reason}")]
    InvalidScanToken { reason: String },

    #[error("Cannot {operation} while session is {state}")]
    InvalidStateTransition {
        state: SessionState,
        operation: Operation,
    },

    #[error("Order {order_id} is not active")]
    OrderInactive { order_id: Uuid },

    #[error("Early administration needs a documented reason")]
    MissingOverrideReason,

    #[error("Persistence failed: {0}")]
    Persistence(#[from] DatabaseError),
}

impl BcmaError {
    pub(crate) fn invalid_token(reason: impl Into<String>) -> Self {
        Self::InvalidScanToken {
            reason: reason.into(),
        }
    }
}
