//! # Core Runtime Module
//!
//! Foundational runtime infrastructure for the session core:
//! - Configuration (`SessionConfig`) with fail-fast validation
//! - Logging and tracing setup
//! - Event bus for session and status events
//!
//! Every other session crate depends on this one for its configuration
//! types and logging conventions.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use config::{ExecutionContext, SessionConfig};
pub use error::{Error, Result};
pub use events::{CoreEvent, EventBus, SessionEvent, StatusEvent};
