//! Idasen - Standing desk control service
//!
//! This crate provides the application around `desk_runtime`, including:
//! - Configuration loading and logging setup
//! - The desk GATT protocol codec
//! - A simulated desk link for running without a radio
//! - The HTTP API

// Re-export the runtime
pub use desk_runtime;

// Configuration
pub mod config;

// Tracing setup
pub mod logging;

// Desk wire protocol
pub mod protocol;

// Simulated desk transport
pub mod simulator;

// HTTP server
pub mod server;
