//! mhcpred-common: shared errors, configuration and HTTP plumbing used across all mhcpred crates.

pub mod config;
pub mod error;
pub mod sandbox;

// Re-export commonly used types
pub use config::{ExecutionOptions, LocalToolOptions, PredictorOptions, RemoteServiceOptions, RetryPolicy};
pub use error::{MhcPredError, Result};
pub use sandbox::SandboxClient;
