//! Error types for MIDI port management.

use crate::port::{Direction, PortState};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("driver failed to allocate a {direction} handle: {reason}")]
    NativeAllocation {
        direction: Direction,
        reason: String,
    },

    #[error("cannot {operation} a port in state {state:?}")]
    InvalidState {
        operation: &'static str,
        state: PortState,
    },

    #[error("MIDI port unavailable: {0}")]
    PortUnavailable(String),

    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("a callback is already registered, remove it first")]
    CallbackAlreadyRegistered,

    #[error("port handle was already destroyed")]
    AlreadyDestroyed,

    #[error("port enumeration failed: {0}")]
    Enumeration(String),

    #[error("expected a {expected} port, got a {actual} port info")]
    DirectionMismatch {
        expected: Direction,
        actual: Direction,
    },

    #[error("port is in {active} delivery mode")]
    DeliveryModeConflict { active: &'static str },

    #[error("MIDI driver error: {0}")]
    Driver(String),

    #[error("Invalid config: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, Error>;
