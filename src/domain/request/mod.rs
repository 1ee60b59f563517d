//! Request aggregate - domain model and state transitions.
//!
//! This module contains the core domain logic for recovery requests:
//! - Request types and states (typestate pattern)
//! - State transition methods and their guards
//! - Value objects (RequestData, RecoveryDetails, etc.)

pub mod state;
pub mod transitions;

// Re-export commonly used types
pub use state::*;
