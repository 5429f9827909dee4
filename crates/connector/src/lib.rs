//! Taskbridge connector
//!
//! Runs on the user's machine. Pairs with an orchestrator, then accepts
//! signed plans addressed to this device, checks them against local policy
//! and executes them with the built-in actions.

pub mod auth;
pub mod service;

pub use auth::{Authenticator, Verification};
pub use service::{Connector, ConnectorConfig, DEFAULT_CONNECTOR_SOCK};
