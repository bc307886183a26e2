//! # rtcmesh-cli
//!
//! Command-line interface for rtcmesh.
//!
//! ## Commands
//!
//! - `rtcmesh join`: Join a mesh through the configured signaling server
//! - `rtcmesh config`: Show the effective configuration
//! - `rtcmesh check`: Validate the configuration

pub mod commands;

pub use commands::Cli;
