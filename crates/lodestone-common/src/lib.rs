//! Lodestone Common Types
//!
//! This crate provides the shared building blocks for the lodestone load
//! balancer:
//!
//! - **Configuration**: the validated config record consumed by every other
//!   component, loaded from YAML ([`config`])
//! - **Errors**: the structured error type carrying a kind, message,
//!   timestamp and optional cause ([`error`])
//! - **Rate limiting**: token-bucket and sliding-window admission
//!   ([`rate_limit`])
//! - **Shutdown**: the cancellation signal propagated from the process
//!   lifecycle into listeners, rollouts and background tasks ([`shutdown`])

pub mod config;
pub mod error;
pub mod rate_limit;
pub mod shutdown;

pub use config::Config;
pub use error::{ErrorKind, LbError, Result};
