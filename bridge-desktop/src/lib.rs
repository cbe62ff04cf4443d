//! # Desktop Bridge Implementations
//!
//! Default implementations of bridge traits for desktop hosts
//! (macOS, Windows, Linux).
//!
//! ## Overview
//!
//! - `HttpClient` using `reqwest`, with a cookie jar for credentialed requests
//! - `SecureStore` using the `keyring` crate, plus an in-process store
//! - `PushTransport` using `tokio-tungstenite`
//!
//! ## Feature Flags
//!
//! - `secure-store`: Enable OS keychain integration (default)
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_desktop::{ReqwestHttpClient, TungsteniteTransport};
//!
//! #[tokio::main]
//! async fn main() {
//!     let http_client = ReqwestHttpClient::new()?;
//!     let push = TungsteniteTransport::new();
//!
//!     // Use in session configuration
//! }
//! ```

mod http;
mod memory_store;
mod push;

#[cfg(feature = "secure-store")]
mod secure_store;

pub use http::ReqwestHttpClient;
pub use memory_store::MemorySecureStore;
pub use push::{TungsteniteConnection, TungsteniteTransport};

#[cfg(feature = "secure-store")]
pub use secure_store::KeyringSecureStore;
