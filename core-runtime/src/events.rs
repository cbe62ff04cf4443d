//! # Event Bus System
//!
//! Broadcasts typed session and status events using `tokio::sync::broadcast`,
//! so hosts can react to sign-in, sign-out and job status changes without the
//! session components knowing who listens.
//!
//! ## Overview
//!
//! - **Event Types**: `CoreEvent` wrapping `SessionEvent` and `StatusEvent`
//! - **EventBus**: Central broadcast channel for publishing events; each
//!   emitted event is also traced at the level given by its severity
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────┐   emit    ┌───────────┐   subscribe   ┌────────────┐
//! │ SessionManager ├──────────>│ EventBus  ├──────────────>│ Subscriber │
//! └────────────────┘           │ (broadcast│               └────────────┘
//! ┌────────────────┐   emit    │  channel) │   subscribe   ┌────────────┐
//! │ StatusChannel  ├──────────>│           ├──────────────>│ Subscriber │
//! └────────────────┘           └───────────┘               └────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{CoreEvent, EventBus, SessionEvent};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let event_bus = EventBus::new(100);
//! let mut subscriber = event_bus.subscribe();
//!
//! event_bus
//!     .emit(CoreEvent::Session(SessionEvent::SignedIn {
//!         username: "alice".to_string(),
//!     }))
//!     .ok();
//!
//! let event = subscriber.recv().await.unwrap();
//! assert_eq!(event.description(), "User signed in");
//! # }
//! ```
//!
//! Events never carry token values.

use core_async::sync::broadcast;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, error, info, warn};

pub use core_async::sync::broadcast::error::{RecvError, SendError};
pub use core_async::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
///
/// Subscribers that fall further behind receive `RecvError::Lagged`.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 100;

// ============================================================================
// Core Event Types
// ============================================================================

/// Top-level event enum published through the event bus.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    /// Session lifecycle events
    Session(SessionEvent),
    /// Push status channel events
    Status(StatusEvent),
}

impl CoreEvent {
    /// Returns a human-readable description of the event.
    pub fn description(&self) -> &str {
        match self {
            CoreEvent::Session(e) => e.description(),
            CoreEvent::Status(e) => e.description(),
        }
    }

    /// Returns the severity level of the event.
    pub fn severity(&self) -> EventSeverity {
        match self {
            CoreEvent::Session(SessionEvent::AuthError { .. }) => EventSeverity::Error,
            CoreEvent::Status(StatusEvent::Disconnected { .. }) => EventSeverity::Warning,
            CoreEvent::Session(SessionEvent::SignedIn { .. })
            | CoreEvent::Session(SessionEvent::SignedOut)
            | CoreEvent::Status(StatusEvent::Updated { .. }) => EventSeverity::Info,
            _ => EventSeverity::Debug,
        }
    }
}

/// Event severity levels for filtering and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

// ============================================================================
// Session Events
// ============================================================================

/// Events related to the authenticated session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum SessionEvent {
    /// Login succeeded and both tokens were stored.
    SignedIn {
        username: String,
    },
    /// Session state was cleared. Only emitted when something was cleared.
    SignedOut,
    /// Account registration succeeded.
    Registered {
        username: String,
    },
    /// A refresh request was sent.
    TokenRefreshing,
    /// A new access token was stored.
    TokenRefreshed,
    /// The cached user profile was replaced.
    ProfileLoaded {
        user_id: u64,
        username: String,
    },
    /// An authentication operation failed.
    AuthError {
        /// Human-readable error message, never containing credentials.
        message: String,
        /// Whether retrying later may succeed (tokens were retained).
        recoverable: bool,
    },
}

impl SessionEvent {
    fn description(&self) -> &str {
        match self {
            SessionEvent::SignedIn { .. } => "User signed in",
            SessionEvent::SignedOut => "User signed out",
            SessionEvent::Registered { .. } => "Account registered",
            SessionEvent::TokenRefreshing => "Refreshing access token",
            SessionEvent::TokenRefreshed => "Access token refreshed",
            SessionEvent::ProfileLoaded { .. } => "User profile loaded",
            SessionEvent::AuthError { .. } => "Authentication error",
        }
    }
}

// ============================================================================
// Status Events
// ============================================================================

/// Events from push status channels.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum StatusEvent {
    /// The push connection for a resource opened.
    Connected {
        resource_kind: String,
        resource_id: String,
    },
    /// A status update arrived.
    Updated {
        resource_id: String,
        status: String,
        message: String,
    },
    /// The push connection closed or failed.
    Disconnected {
        resource_id: String,
        reason: Option<String>,
    },
    /// A reconnect attempt is scheduled.
    Reconnecting {
        resource_id: String,
        attempt: u32,
    },
}

impl StatusEvent {
    fn description(&self) -> &str {
        match self {
            StatusEvent::Connected { .. } => "Status channel connected",
            StatusEvent::Updated { .. } => "Status updated",
            StatusEvent::Disconnected { .. } => "Status channel disconnected",
            StatusEvent::Reconnecting { .. } => "Status channel reconnecting",
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Central event bus for publishing and subscribing to core events.
///
/// Cloning is cheap; clones share the same channel.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// Creates a new event bus with the specified buffer size.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns the number of subscribers that received the event, or an
    /// error if there are none. Publishers usually ignore that error.
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        let description = event.description();
        match event.severity() {
            EventSeverity::Error => error!(event = description, "Core event"),
            EventSeverity::Warning => warn!(event = description, "Core event"),
            EventSeverity::Info => info!(event = description, "Core event"),
            EventSeverity::Debug => debug!(event = description, "Core event"),
        }
        self.sender.send(event)
    }

    /// Creates a new subscriber. Past events are not replayed.
    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    /// Returns the number of active subscribers.
    ///
    /// ```rust
    /// use core_runtime::events::EventBus;
    ///
    /// let event_bus = EventBus::new(100);
    /// assert_eq!(event_bus.subscriber_count(), 0);
    ///
    /// let _subscriber = event_bus.subscribe();
    /// assert_eq!(event_bus.subscriber_count(), 1);
    /// ```
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}
