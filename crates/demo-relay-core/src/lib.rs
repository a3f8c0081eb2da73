//! Core types, config, errors, and relay model for Demo Relay.

pub mod audit;
pub mod audit_store;
pub mod broadcast;
pub mod catalog;
pub mod config;
pub mod demo;
pub mod error;
pub mod machine;
pub mod protocol;
pub mod registry;
pub mod relay;
pub mod timeout;

pub use relay::{CommandOutcome, Relay};
