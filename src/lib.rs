//! Pool Mining Client
//!
//! An async client for mining pools that speak the line-delimited JSON
//! login/job/submit protocol:
//! - Long-lived pool session with automatic reconnect
//! - Parallel nonce search with at most one submission per job
//! - Solutions found while disconnected are submitted after the next login
//! - Pluggable proof-of-work hash engine

pub mod config;
pub mod coordinator;
pub mod crypto;
pub mod dispatcher;
pub mod error;
pub mod protocol;
pub mod search;
pub mod session;
pub mod stats;
pub mod types;
pub mod utils;

pub use config::Config;
pub use coordinator::MiningCoordinator;
pub use error::{Error, Result};
pub use types::*;

/// Application information
pub const APP_NAME: &str = "pool-mining-client";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");
pub const APP_DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");
