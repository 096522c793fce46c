//! CLI command implementations

pub mod batch;
pub mod config_cmd;
pub mod detect;
pub mod health;
