//! Runtime utilities.
//!
//! Re-exports the Tokio runtime types so downstream crates never need to
//! depend on Tokio directly.

pub use tokio::runtime::{Builder, Handle, Runtime};

/// Runs the provided future to completion on a fresh current-thread runtime.
///
/// Fails only if the runtime itself cannot be built.
pub fn block_on<F>(future: F) -> std::io::Result<F::Output>
where
    F: std::future::Future,
{
    let runtime = Builder::new_current_thread().enable_all().build()?;
    Ok(runtime.block_on(future))
}
