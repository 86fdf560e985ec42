// Core modules
pub mod config;
pub mod confluence;
pub mod error;
pub mod execution;
pub mod indicators;
pub mod models;
pub mod regime;
pub mod replay;
pub mod risk;
pub mod state_machine;
pub mod strategy;
pub mod veto;

// Re-export commonly used types
pub use config::AppConfig;
pub use models::*;
pub use state_machine::StateMachine;

// Error handling
pub use error::{Error, Result};
