//! Push Transport Abstraction
//!
//! Persistent server-to-client channels (WebSocket on every current host).
//! The session core only consumes text frames; control frames such as
//! ping/pong are the implementation's business.

use async_trait::async_trait;

use crate::error::Result;

/// An open push connection.
#[async_trait]
pub trait PushConnection: Send {
    /// Wait for the next inbound text frame.
    ///
    /// Returns `Ok(None)` once the peer closed the connection cleanly.
    async fn next_text(&mut self) -> Result<Option<String>>;

    /// Close the connection. Closing twice is not an error.
    async fn close(&mut self) -> Result<()>;
}

/// Factory for push connections.
///
/// # Example
///
/// ```ignore
/// use bridge_traits::realtime::PushTransport;
///
/// async fn watch(transport: &dyn PushTransport) -> Result<()> {
///     let mut conn = transport.connect("wss://host/ws/datasets/42/").await?;
///     while let Some(text) = conn.next_text().await? {
///         println!("{text}");
///     }
///     Ok(())
/// }
/// ```
#[async_trait]
pub trait PushTransport: Send + Sync {
    /// Open a connection to `url`.
    async fn connect(&self, url: &str) -> Result<Box<dyn PushConnection>>;
}
