//! CLI command implementations for mempressure.
//!
//! - `check`: kernel interface validation
//! - `config`: configuration file generation

pub mod check;
pub mod config;

// Re-export command functions
pub use check::command_check;
pub use config::command_config;
