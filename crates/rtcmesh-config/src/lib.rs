//! # rtcmesh-config
//!
//! Configuration system for rtcmesh. Reads from `rtcmesh.toml`, then applies
//! `RTCMESH_*` environment overrides, then validates.

pub mod loader;
pub mod schema;

pub use loader::ConfigLoader;
pub use schema::{ConfigWarning, LoggingConfig, MeshConfig, RtcMeshConfig, WarningSeverity};
