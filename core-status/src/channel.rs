//! Status Channel
//!
//! One push connection per mounted resource. The connection opens after a
//! short delay, reports `status_update` frames through a `watch` channel and
//! reconnects with exponential backoff when it drops. Nothing here touches
//! credentials; the channel lives entirely outside the session lifecycle.
//!
//! ```no_run
//! use core_status::StatusChannel;
//! use core_runtime::config::StatusChannelConfig;
//! use core_runtime::events::EventBus;
//! # use bridge_traits::PushTransport;
//! # use std::sync::Arc;
//!
//! # async fn example(transport: Arc<dyn PushTransport>) -> core_status::Result<()> {
//! let config = StatusChannelConfig::new("wss://annotate.example.com");
//! let channel = StatusChannel::mount(transport, config, "datasets", "42", EventBus::default())?;
//!
//! let mut updates = channel.subscribe();
//! while updates.changed().await.is_ok() {
//!     let snapshot = updates.borrow().clone();
//!     if snapshot.status == "completed" {
//!         break;
//!     }
//! }
//!
//! channel.unmount().await
//! # }
//! ```

use crate::error::{Result, StatusError};
use crate::message::parse_frame;
use bridge_traits::realtime::{PushConnection, PushTransport};
use core_async::runtime::Handle;
use core_async::sync::{watch, CancellationToken};
use core_async::task::JoinHandle;
use core_async::time::sleep;
use core_runtime::config::StatusChannelConfig;
use core_runtime::events::{CoreEvent, EventBus, StatusEvent};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Observable state of a channel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusSnapshot {
    pub status: String,
    pub message: String,
    pub is_connected: bool,
}

/// A mounted status channel.
///
/// Dropping the channel stops the background task; [`unmount`](Self::unmount)
/// also waits for it to finish.
pub struct StatusChannel {
    resource_kind: String,
    resource_id: String,
    url: String,
    state: watch::Receiver<StatusSnapshot>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl StatusChannel {
    /// Starts watching one resource.
    ///
    /// # Errors
    ///
    /// - `InvalidResource` - Kind or id is empty or would escape the path
    /// - `RuntimeUnavailable` - Called outside a Tokio runtime
    pub fn mount(
        transport: Arc<dyn PushTransport>,
        config: StatusChannelConfig,
        resource_kind: &str,
        resource_id: &str,
        event_bus: EventBus,
    ) -> Result<Self> {
        validate_segment(resource_kind)?;
        validate_segment(resource_id)?;
        let handle = Handle::try_current().map_err(|_| StatusError::RuntimeUnavailable)?;

        let url = config.url_for(resource_kind, resource_id);
        let (tx, rx) = watch::channel(StatusSnapshot::default());
        let cancel = CancellationToken::new();

        let worker = Worker {
            transport,
            config,
            url: url.clone(),
            resource_kind: resource_kind.to_string(),
            resource_id: resource_id.to_string(),
            state: tx,
            event_bus,
            cancel: cancel.clone(),
        };
        let task = handle.spawn(worker.run());

        debug!(url = %url, "Status channel mounted");
        Ok(Self {
            resource_kind: resource_kind.to_string(),
            resource_id: resource_id.to_string(),
            url,
            state: rx,
            cancel,
            task: Some(task),
        })
    }

    pub fn status(&self) -> String {
        self.state.borrow().status.clone()
    }

    pub fn message(&self) -> String {
        self.state.borrow().message.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.state.borrow().is_connected
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        self.state.borrow().clone()
    }

    /// A receiver notified on every state change.
    pub fn subscribe(&self) -> watch::Receiver<StatusSnapshot> {
        self.state.clone()
    }

    pub fn resource_kind(&self) -> &str {
        &self.resource_kind
    }

    pub fn resource_id(&self) -> &str {
        &self.resource_id
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Closes the connection and waits for the background task to exit.
    pub async fn unmount(mut self) -> Result<()> {
        self.cancel.cancel();
        match self.task.take() {
            Some(task) => task.await.map_err(|e| StatusError::Task(e.to_string())),
            None => Ok(()),
        }
    }
}

impl Drop for StatusChannel {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl fmt::Debug for StatusChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatusChannel")
            .field("url", &self.url)
            .field("state", &*self.state.borrow())
            .finish()
    }
}

fn validate_segment(segment: &str) -> Result<()> {
    if segment.is_empty() || segment.contains(['/', '?', '#']) {
        return Err(StatusError::InvalidResource(segment.to_string()));
    }
    Ok(())
}

/// How one connection ended.
enum Ended {
    Cancelled,
    Dropped { opened: bool, reason: Option<String> },
}

struct Worker {
    transport: Arc<dyn PushTransport>,
    config: StatusChannelConfig,
    url: String,
    resource_kind: String,
    resource_id: String,
    state: watch::Sender<StatusSnapshot>,
    event_bus: EventBus,
    cancel: CancellationToken,
}

impl Worker {
    #[instrument(skip(self), fields(url = %self.url))]
    async fn run(self) {
        core_async::select! {
            _ = self.cancel.cancelled() => return,
            _ = sleep(self.config.connect_delay) => {}
        }

        let mut attempt = 0u32;
        loop {
            let (opened, reason) = match self.connect_once().await {
                Ended::Cancelled => break,
                Ended::Dropped { opened, reason } => (opened, reason),
            };

            self.set_connected(false);
            self.emit(StatusEvent::Disconnected {
                resource_id: self.resource_id.clone(),
                reason: reason.clone(),
            });

            if opened {
                attempt = 0;
            }
            attempt += 1;
            if attempt > self.config.max_reconnect_attempts {
                warn!(
                    attempts = attempt - 1,
                    reason = ?reason,
                    "Status channel giving up"
                );
                break;
            }

            let delay = self.config.reconnect_delay(attempt);
            info!(attempt, delay_ms = delay.as_millis() as u64, "Status channel reconnecting");
            self.emit(StatusEvent::Reconnecting {
                resource_id: self.resource_id.clone(),
                attempt,
            });

            core_async::select! {
                _ = self.cancel.cancelled() => break,
                _ = sleep(delay) => {}
            }
        }

        self.set_connected(false);
        debug!("Status channel stopped");
    }

    async fn connect_once(&self) -> Ended {
        let connected = core_async::select! {
            _ = self.cancel.cancelled() => return Ended::Cancelled,
            result = self.transport.connect(&self.url) => result,
        };

        let mut connection = match connected {
            Ok(connection) => connection,
            Err(e) => {
                warn!(error = %e, "Status channel failed to connect");
                return Ended::Dropped {
                    opened: false,
                    reason: Some(e.to_string()),
                };
            }
        };

        info!("Status channel connected");
        self.set_connected(true);
        self.emit(StatusEvent::Connected {
            resource_kind: self.resource_kind.clone(),
            resource_id: self.resource_id.clone(),
        });

        loop {
            let frame = core_async::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    close(connection.as_mut()).await;
                    return Ended::Cancelled;
                }
                frame = connection.next_text() => frame,
            };

            match frame {
                Ok(Some(text)) => self.handle_frame(&text),
                Ok(None) => {
                    info!("Status channel closed by server");
                    return Ended::Dropped {
                        opened: true,
                        reason: None,
                    };
                }
                Err(e) => {
                    warn!(error = %e, "Status channel connection lost");
                    return Ended::Dropped {
                        opened: true,
                        reason: Some(e.to_string()),
                    };
                }
            }
        }
    }

    fn handle_frame(&self, text: &str) {
        let update = match parse_frame(text) {
            Ok(Some(update)) => update,
            Ok(None) => {
                debug!("Ignoring non-status frame");
                return;
            }
            Err(e) => {
                warn!(error = %e, "Dropping status frame");
                return;
            }
        };

        if let Some(id) = update.dataset_id.as_deref() {
            if id != self.resource_id {
                debug!(frame_id = %id, "Status frame names another resource");
            }
        }

        debug!(status = %update.status, "Status updated");
        self.state.send_modify(|state| {
            state.status = update.status.clone();
            state.message = update.message.clone();
        });
        self.emit(StatusEvent::Updated {
            resource_id: self.resource_id.clone(),
            status: update.status,
            message: update.message,
        });
    }

    fn set_connected(&self, connected: bool) {
        self.state.send_if_modified(|state| {
            let changed = state.is_connected != connected;
            state.is_connected = connected;
            changed
        });
    }

    fn emit(&self, event: StatusEvent) {
        let _ = self.event_bus.emit(CoreEvent::Status(event));
    }
}

async fn close(connection: &mut dyn PushConnection) {
    if let Err(e) = connection.close().await {
        debug!(error = %e, "Error closing status channel");
    }
}
