//! Workspace placeholder crate.
//!
//! This crate exposes shared feature flags that map to the individual
//! workspace crates (`core-service`, `core-status`). Host applications can
//! depend on `session-workspace` and enable the documented features without
//! wiring each crate individually.

#[cfg(any(feature = "desktop-shims", feature = "secure-store"))]
pub use core_service::*;

#[cfg(feature = "status-channel")]
pub use core_status;
