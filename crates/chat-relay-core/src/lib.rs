//! Core types, wire protocol, config, and errors for Chat Relay.

pub mod config;
pub mod error;
pub mod protocol;
pub mod types;
