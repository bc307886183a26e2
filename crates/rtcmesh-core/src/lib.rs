//! # rtcmesh-core
//!
//! Shared vocabulary for the rtcmesh workspace: the error type every crate
//! returns, the wire types exchanged with peers and the signaling server, and
//! the per-component event emitter.

pub mod error;
pub mod event;
pub mod types;

pub use error::{ErrorKind, MeshError, Result};
pub use event::Emitter;
pub use types::*;
