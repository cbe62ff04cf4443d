//! # Status Channel
//!
//! Best-effort push updates for long-running server jobs (dataset imports,
//! training runs). Each mounted [`StatusChannel`] owns one connection for
//! one resource and exposes its latest status through a `watch` channel.
//!
//! The channel is independent of the session: it carries no token and
//! outlives sign-in state changes.

pub mod channel;
pub mod error;
pub mod message;

pub use channel::{StatusChannel, StatusSnapshot};
pub use error::{Result, StatusError};
pub use message::{parse_frame, FrameError, StatusUpdate};
