//! Session core façade and bootstrap.
//!
//! [`SessionCore`] wires the token store, session manager, request gateway,
//! route guard and status channels over one [`SessionConfig`]. Hosts create
//! exactly one per application, share it by reference and call
//! [`SessionCore::shutdown`] before exit so queued token writes land.
//!
//! Desktop hosts typically enable the `desktop-shims` feature, which supplies
//! the reqwest HTTP client, the keychain token slot (`secure-store`) and the
//! WebSocket push transport.
//!
//! ```no_run
//! use core_auth::Route;
//! use core_runtime::config::SessionConfig;
//! use core_service::SessionCore;
//!
//! # async fn example() -> core_service::Result<()> {
//! let config = SessionConfig::builder()
//!     .api_base("https://annotate.example.com")
//!     .build()?;
//! let core = SessionCore::bootstrap(config).await?;
//!
//! core.session().login("alice", "pw").await?;
//! let decision = core.guard().before_each(&Route::protected("/datasets")).await;
//! println!("{:?}", decision);
//!
//! let channel = core.status_channel("datasets", "42")?;
//! println!("{}", channel.status());
//!
//! core.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod error;

pub use error::{CoreError, Result};

use bridge_traits::realtime::PushTransport;
use core_auth::{AuthGateway, RouteGuard, SessionManager, TokenStore};
use core_runtime::config::SessionConfig;
use core_runtime::events::{CoreEvent, EventBus, Receiver};
use core_status::StatusChannel;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// One authenticated session per application.
pub struct SessionCore {
    config: SessionConfig,
    event_bus: EventBus,
    tokens: Arc<TokenStore>,
    session: Arc<SessionManager>,
    gateway: Arc<AuthGateway>,
    guard: Arc<RouteGuard>,
    push_transport: Option<Arc<dyn PushTransport>>,
}

impl SessionCore {
    /// Builds every component and restores persisted tokens.
    ///
    /// A secure store that cannot be read is logged and the session starts
    /// anonymous.
    ///
    /// # Errors
    ///
    /// `Auth(SecureStorageUnavailable)` when called outside a Tokio runtime.
    pub async fn bootstrap(config: SessionConfig) -> Result<Self> {
        Self::bootstrap_with_events(config, EventBus::default()).await
    }

    /// Like [`bootstrap`](Self::bootstrap), publishing on an existing bus.
    #[instrument(skip(config, event_bus), fields(context = ?config.context))]
    pub async fn bootstrap_with_events(config: SessionConfig, event_bus: EventBus) -> Result<Self> {
        let tokens = Arc::new(TokenStore::from_config(&config)?);
        match tokens.restore().await {
            Ok(pair) => info!(
                restored = !pair.is_empty(),
                "Session core restored persisted tokens"
            ),
            Err(e) => warn!(error = %e, "Could not restore tokens, starting anonymous"),
        }

        let session = Arc::new(SessionManager::new(
            &config,
            Arc::clone(&tokens),
            event_bus.clone(),
        ));
        let gateway = Arc::new(AuthGateway::new(&config, Arc::clone(&session)));
        let guard = Arc::new(RouteGuard::new(
            Arc::clone(&session),
            config.navigation.clone(),
        ));

        info!("Session core ready");
        Ok(Self {
            config,
            event_bus,
            tokens,
            session,
            gateway,
            guard,
            push_transport: default_push_transport(),
        })
    }

    /// Replaces the transport used by [`status_channel`](Self::status_channel).
    pub fn with_push_transport(mut self, transport: Arc<dyn PushTransport>) -> Self {
        self.push_transport = Some(transport);
        self
    }

    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    pub fn gateway(&self) -> &Arc<AuthGateway> {
        &self.gateway
    }

    pub fn guard(&self) -> &Arc<RouteGuard> {
        &self.guard
    }

    pub fn tokens(&self) -> &Arc<TokenStore> {
        &self.tokens
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn events(&self) -> &EventBus {
        &self.event_bus
    }

    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.event_bus.subscribe()
    }

    /// Mounts a status channel for one resource.
    ///
    /// # Errors
    ///
    /// - `ServerContext` - Push channels only run in client context
    /// - `CapabilityMissing` - No push transport was configured
    /// - `Status` - Invalid resource id, or no runtime
    pub fn status_channel(&self, resource_kind: &str, resource_id: &str) -> Result<StatusChannel> {
        if self.config.context.is_server() {
            debug!(resource_kind, resource_id, "Skipping status channel in server context");
            return Err(CoreError::ServerContext("Status channel"));
        }

        let transport =
            self.push_transport
                .clone()
                .ok_or_else(|| CoreError::CapabilityMissing {
                    capability: "PushTransport".to_string(),
                    message: "No push transport configured. Call with_push_transport() or \
                              enable the 'desktop-shims' feature."
                        .to_string(),
                })?;

        Ok(StatusChannel::mount(
            transport,
            self.config.status.clone(),
            resource_kind,
            resource_id,
            self.event_bus.clone(),
        )?)
    }

    /// Waits for queued token writes. Call before the host exits.
    pub async fn shutdown(&self) {
        self.tokens.flush().await;
        info!("Session core shut down");
    }
}

impl fmt::Debug for SessionCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionCore")
            .field("config", &self.config)
            .field("session", &self.session)
            .field("push_transport", &self.push_transport.is_some())
            .finish()
    }
}

#[cfg(all(feature = "desktop-shims", not(target_arch = "wasm32")))]
fn default_push_transport() -> Option<Arc<dyn PushTransport>> {
    Some(Arc::new(bridge_desktop::TungsteniteTransport::new()))
}

#[cfg(not(all(feature = "desktop-shims", not(target_arch = "wasm32"))))]
fn default_push_transport() -> Option<Arc<dyn PushTransport>> {
    None
}
