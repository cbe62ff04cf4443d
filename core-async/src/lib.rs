//! Async primitives shared by the session crates.
//!
//! Downstream crates depend on this crate rather than naming Tokio directly,
//! so the executor stays a single decision made here.
//!
//! # Modules
//!
//! - `task`: Task spawning and execution
//! - `time`: Time-related operations (sleep, duration, instant)
//! - `sync`: Synchronization primitives (Mutex, RwLock, channels, cancellation)
//! - `runtime`: Runtime handles for code that must spawn from sync contexts
//! - `single_flight`: Collapse concurrent calls into one shared in-flight future
//!
//! # Examples
//!
//! ```rust
//! use core_async::task;
//! use core_async::time::{sleep, Duration};
//!
//! async fn example() {
//!     let handle = task::spawn(async {
//!         sleep(Duration::from_millis(10)).await;
//!         42
//!     });
//!     assert_eq!(handle.await.unwrap(), 42);
//! }
//! ```

pub mod runtime;
pub mod single_flight;
pub mod sync;
pub mod task;
pub mod time;

pub use single_flight::SingleFlight;
pub use task::spawn;
pub use time::{sleep, Duration, Instant};

/// Waits on several branches, running the first to complete.
pub use tokio::select;
