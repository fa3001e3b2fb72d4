//! Side-effect execution for the call session state table

pub mod actions;

pub use actions::{execute_action, is_call_critical, ActionContext};
