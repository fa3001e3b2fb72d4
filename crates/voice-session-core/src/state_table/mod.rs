//! Call session state table
//!
//! Inputs from the device, the presence hub, the user and the timer are
//! applied one at a time by [`CallSessionMachine`]. Each application yields a
//! [`Transition`] describing the side effects to run and the events to
//! publish.

pub mod machine;
pub mod types;

pub use machine::CallSessionMachine;
pub use types::*;
