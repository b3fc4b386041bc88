//! ClassCraft Core - Shared data structures and trait definitions
//!
//! Types, configuration, logging and errors used by every ClassCraft client crate

pub mod config;
pub mod error;
pub mod logging;
pub mod traits;
pub mod types;

pub use config::*;
pub use error::*;
pub use logging::*;
pub use traits::*;
pub use types::*;

// Re-export commonly used external types
pub use async_trait::async_trait;
pub use tracing;
