//! Signals consumed from external collaborators.
//!
//! Raw DOM capture happens in the host; this module only defines the shape
//! of what arrives and how malformed input is recognised.

pub mod types;

pub use types::{
    validate_coordinate, validate_timestamp, ContextCategory, ContextUpdate, InteractionEvent,
    LockMode, SignalError,
};
