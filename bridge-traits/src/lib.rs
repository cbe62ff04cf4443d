//! # Host Bridge Traits
//!
//! Platform abstraction traits that must be implemented by each host platform.
//!
//! ## Overview
//!
//! This crate defines the contract between the session core and platform-specific
//! implementations. Each trait represents a capability that the core requires but
//! that must be implemented differently per host (desktop shell, embedded web view,
//! test harness).
//!
//! ## Traits
//!
//! ### Networking
//! - [`HttpClient`](http::HttpClient) - Async HTTP operations with credential delivery
//! - [`PushTransport`](realtime::PushTransport) - Persistent push connections (WebSocket)
//!
//! ### Security & Storage
//! - [`SecureStore`](storage::SecureStore) - Credential persistence for the token slot
//!
//! ### Utilities
//! - [`Clock`](time::Clock) - Time source for deterministic expiry handling
//! - [`LoggerSink`](time::LoggerSink) - Forward structured logs to host logging
//!
//! ## Error Handling
//!
//! All bridge traits use the [`BridgeError`](error::BridgeError) type. Implementations
//! should convert platform-specific errors to `BridgeError` with actionable messages
//! and must never include credential material in them.
//!
//! ## Thread Safety
//!
//! All bridge traits require `Send + Sync` bounds so a single session can be shared
//! across async tasks.
//!
//! ## Examples
//!
//! ### Implementing HttpClient
//!
//! ```ignore
//! use bridge_traits::http::{HttpClient, HttpRequest, HttpResponse};
//! use bridge_traits::error::Result;
//! use async_trait::async_trait;
//!
//! pub struct MyHttpClient {
//!     client: reqwest::Client,
//! }
//!
//! #[async_trait]
//! impl HttpClient for MyHttpClient {
//!     async fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
//!         // Implementation
//!         todo!()
//!     }
//! }
//! ```

pub mod error;
pub mod http;
pub mod realtime;
pub mod storage;
pub mod time;

pub use error::BridgeError;

// Re-export commonly used types
pub use http::{
    CredentialsMode, FormData, FormPart, HttpClient, HttpMethod, HttpRequest, HttpResponse,
};
pub use realtime::{PushConnection, PushTransport};
pub use storage::SecureStore;
pub use time::{Clock, LogEntry, LogLevel, LoggerSink, ManualClock, SystemClock};
