//! Token Storage
//!
//! Holds the access and refresh tokens with their expiries. The in-memory
//! snapshot is the single source of truth for "are we authenticated"; the
//! secure store only mirrors it so a restart can pick the session back up.
//!
//! ## Consistency
//!
//! - The snapshot is replaced wholesale under a write lock, so a reader never
//!   observes access set with refresh still pending.
//! - Both slots live in one JSON document under one secure store key, so the
//!   persisted form is replaced atomically too.
//! - Persistence runs on a single writer task fed in submission order. That
//!   keeps [`TokenStore::clear`] synchronous while a later `set` can never be
//!   overtaken by an earlier delete.
//! - A slot past its max age reads as absent.
//!
//! ## Example
//!
//! ```no_run
//! use core_auth::TokenStore;
//! # use core_runtime::config::SessionConfig;
//! # async fn example(config: &SessionConfig) -> core_auth::Result<()> {
//! let store = TokenStore::from_config(config)?;
//! store.restore().await?;
//!
//! store.set(Some("A1".to_string()), Some("R1".to_string()));
//! assert!(store.is_authenticated());
//!
//! store.clear();
//! store.flush().await;
//! # Ok(())
//! # }
//! ```

use crate::error::{AuthError, Result};
use crate::types::TokenPair;
use bridge_traits::storage::SecureStore;
use bridge_traits::time::Clock;
use chrono::{DateTime, Utc};
use core_async::runtime::Handle;
use core_async::sync::{mpsc, oneshot};
use core_runtime::config::{SessionConfig, TokenLifetimes};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info, warn};

/// Persisted form of both slots.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct StoredTokens {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    access_expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    refresh_expires_at: Option<DateTime<Utc>>,
}

impl StoredTokens {
    fn live_access(&self, now: DateTime<Utc>) -> Option<&str> {
        live_slot(&self.access_token, self.access_expires_at, now)
    }

    fn live_refresh(&self, now: DateTime<Utc>) -> Option<&str> {
        live_slot(&self.refresh_token, self.refresh_expires_at, now)
    }

    fn pair(&self, now: DateTime<Utc>) -> TokenPair {
        TokenPair {
            access: self.live_access(now).map(str::to_string),
            refresh: self.live_refresh(now).map(str::to_string),
        }
    }

    /// Drops slots that can no longer be read.
    fn pruned(&self, now: DateTime<Utc>) -> Self {
        let mut next = Self::default();
        if self.live_access(now).is_some() {
            next.access_token = self.access_token.clone();
            next.access_expires_at = self.access_expires_at;
        }
        if self.live_refresh(now).is_some() {
            next.refresh_token = self.refresh_token.clone();
            next.refresh_expires_at = self.refresh_expires_at;
        }
        next
    }

    fn is_empty(&self) -> bool {
        self.access_token.is_none() && self.refresh_token.is_none()
    }
}

// Custom Debug implementation to avoid logging tokens
impl fmt::Debug for StoredTokens {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoredTokens")
            .field("access_token", &self.access_token.as_ref().map(|_| "[REDACTED]"))
            .field("access_expires_at", &self.access_expires_at)
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[REDACTED]"))
            .field("refresh_expires_at", &self.refresh_expires_at)
            .finish()
    }
}

fn live_slot(
    token: &Option<String>,
    expires_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Option<&str> {
    match (token.as_deref(), expires_at) {
        (Some(token), Some(expires_at)) if !token.is_empty() && now < expires_at => Some(token),
        _ => None,
    }
}

enum PersistOp {
    Save(StoredTokens),
    Delete,
    DeleteKey(String),
    Flush(oneshot::Sender<()>),
}

/// Credential slot shared by the session manager and the request gateway.
///
/// Reads and writes are synchronous; persistence happens behind them.
pub struct TokenStore {
    state: RwLock<StoredTokens>,
    clock: Arc<dyn Clock>,
    lifetimes: TokenLifetimes,
    storage_key: String,
    secure_store: Arc<dyn SecureStore>,
    writer: mpsc::UnboundedSender<PersistOp>,
}

impl TokenStore {
    /// Create an empty token store and start its persistence writer.
    ///
    /// Call [`restore`](Self::restore) afterwards to load a persisted session.
    ///
    /// # Errors
    ///
    /// `SecureStorageUnavailable` when called outside a Tokio runtime, since
    /// the writer task has nowhere to run.
    pub fn new(
        secure_store: Arc<dyn SecureStore>,
        clock: Arc<dyn Clock>,
        lifetimes: TokenLifetimes,
        storage_key: impl Into<String>,
    ) -> Result<Self> {
        let handle = Handle::try_current().map_err(|_| {
            AuthError::SecureStorageUnavailable(
                "token persistence requires a running Tokio runtime".to_string(),
            )
        })?;

        let storage_key = storage_key.into();
        let (writer, queue) = mpsc::unbounded_channel();
        handle.spawn(run_writer(
            Arc::clone(&secure_store),
            storage_key.clone(),
            queue,
        ));

        debug!(storage_key = %storage_key, "Initializing TokenStore");

        Ok(Self {
            state: RwLock::new(StoredTokens::default()),
            clock,
            lifetimes,
            storage_key,
            secure_store,
            writer,
        })
    }

    pub fn from_config(config: &SessionConfig) -> Result<Self> {
        Self::new(
            Arc::clone(&config.secure_store),
            Arc::clone(&config.clock),
            config.lifetimes,
            config.token_storage_key.clone(),
        )
    }

    /// Both tokens as seen by one read. Expired slots are `None`.
    pub fn get(&self) -> TokenPair {
        let now = self.clock.now();
        self.read_state().pair(now)
    }

    pub fn access_token(&self) -> Option<String> {
        self.get().access
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.get().refresh
    }

    /// `true` iff an unexpired, non-empty access token is present.
    pub fn is_authenticated(&self) -> bool {
        let now = self.clock.now();
        self.read_state().live_access(now).is_some()
    }

    /// Replace one or both slots in a single write.
    ///
    /// `None` keeps that slot as it is. `Some` stores the value with a fresh
    /// max age; `Some("")` empties the slot.
    pub fn set(&self, access: Option<String>, refresh: Option<String>) {
        let now = self.clock.now();
        let mut state = self.write_state();

        let mut next = state.pruned(now);
        if let Some(access) = access {
            if access.is_empty() {
                next.access_token = None;
                next.access_expires_at = None;
            } else {
                next.access_token = Some(access);
                next.access_expires_at = Some(now + self.lifetimes.access_max_age);
            }
        }
        if let Some(refresh) = refresh {
            if refresh.is_empty() {
                next.refresh_token = None;
                next.refresh_expires_at = None;
            } else {
                next.refresh_token = Some(refresh);
                next.refresh_expires_at = Some(now + self.lifetimes.refresh_max_age);
            }
        }

        debug!(
            has_access = next.access_token.is_some(),
            has_refresh = next.refresh_token.is_some(),
            "Token slots updated"
        );

        *state = next.clone();
        // Queued under the lock so persistence order matches snapshot order.
        self.persist(PersistOp::Save(next));
    }

    /// Store a refreshed access token, but only if the refresh slot still
    /// holds `expected_refresh`.
    ///
    /// Returns `false` when the session was cleared or replaced meanwhile.
    pub fn replace_access(&self, access: String, expected_refresh: &str) -> bool {
        let now = self.clock.now();
        let mut state = self.write_state();
        if state.live_refresh(now) != Some(expected_refresh) || access.is_empty() {
            return false;
        }

        let mut next = state.pruned(now);
        next.access_token = Some(access);
        next.access_expires_at = Some(now + self.lifetimes.access_max_age);

        *state = next.clone();
        self.persist(PersistOp::Save(next));
        true
    }

    /// Empty both slots. Returns whether a readable token was present.
    pub fn clear(&self) -> bool {
        let now = self.clock.now();
        let mut state = self.write_state();
        let had_tokens = !state.pair(now).is_empty();
        let had_anything = !state.is_empty();

        *state = StoredTokens::default();
        if had_anything {
            self.persist(PersistOp::Delete);
        }

        if had_tokens {
            info!("Token slots cleared");
        }
        had_tokens
    }

    /// Like [`clear`](Self::clear), but only while `expected_refresh` is the
    /// refresh token held. Returns whether the slots were cleared.
    pub fn clear_if_refresh(&self, expected_refresh: &str) -> bool {
        let now = self.clock.now();
        let mut state = self.write_state();
        if state.live_refresh(now) != Some(expected_refresh) {
            return false;
        }

        *state = StoredTokens::default();
        self.persist(PersistOp::Delete);
        info!("Token slots cleared");
        true
    }

    /// Load the persisted document into memory.
    ///
    /// A document that cannot be decoded is deleted and treated as empty.
    /// Expired slots are dropped.
    ///
    /// # Errors
    ///
    /// `SecureStorageUnavailable` when the secure store cannot be read.
    pub async fn restore(&self) -> Result<TokenPair> {
        self.flush().await;

        let data = self
            .secure_store
            .get_secret(&self.storage_key)
            .await
            .map_err(|e| {
                warn!(error = %e, "Failed to read tokens from secure storage");
                AuthError::SecureStorageUnavailable(e.to_string())
            })?;

        let Some(data) = data else {
            debug!("No persisted session found");
            return Ok(TokenPair::default());
        };

        let stored: StoredTokens = match serde_json::from_slice(&data) {
            Ok(stored) => stored,
            Err(e) => {
                warn!(error = %e, "Persisted tokens are corrupted, discarding them");
                if let Err(delete_err) = self.secure_store.delete_secret(&self.storage_key).await {
                    warn!(error = %delete_err, "Failed to delete corrupted token data");
                }
                return Ok(TokenPair::default());
            }
        };

        let now = self.clock.now();
        let live = stored.pruned(now);
        let pair = live.pair(now);

        {
            let mut state = self.write_state();
            *state = live.clone();
            if live != stored {
                debug!("Dropping expired persisted slots");
                self.persist(if live.is_empty() {
                    PersistOp::Delete
                } else {
                    PersistOp::Save(live)
                });
            }
        }

        info!(
            has_access = pair.access.is_some(),
            has_refresh = pair.refresh.is_some(),
            "Session restored from secure storage"
        );
        Ok(pair)
    }

    /// Delete unrelated secure store entries, skipping the token slot itself.
    pub fn purge_keys(&self, keys: &[String]) {
        let _state = self.write_state();
        for key in keys.iter().filter(|key| **key != self.storage_key) {
            self.persist(PersistOp::DeleteKey(key.clone()));
        }
    }

    /// Wait until every persistence operation queued so far has been applied.
    pub async fn flush(&self) {
        let (done, applied) = oneshot::channel();
        if self.writer.send(PersistOp::Flush(done)).is_ok() {
            let _ = applied.await;
        }
    }

    fn persist(&self, op: PersistOp) {
        if self.writer.send(op).is_err() {
            warn!("Token writer has stopped; change kept in memory only");
        }
    }

    fn read_state(&self) -> std::sync::RwLockReadGuard<'_, StoredTokens> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> std::sync::RwLockWriteGuard<'_, StoredTokens> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for TokenStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenStore")
            .field("state", &*self.read_state())
            .field("storage_key", &self.storage_key)
            .finish()
    }
}

async fn run_writer(
    secure_store: Arc<dyn SecureStore>,
    storage_key: String,
    mut queue: mpsc::UnboundedReceiver<PersistOp>,
) {
    while let Some(op) = queue.recv().await {
        match op {
            PersistOp::Save(tokens) if tokens.is_empty() => {
                delete_entry(secure_store.as_ref(), &storage_key).await;
            }
            PersistOp::Save(tokens) => match serde_json::to_vec(&tokens) {
                Ok(bytes) => {
                    if let Err(e) = secure_store.set_secret(&storage_key, &bytes).await {
                        warn!(error = %e, "Failed to persist tokens");
                    }
                }
                Err(e) => warn!(error = %e, "Failed to serialize tokens"),
            },
            PersistOp::Delete => delete_entry(secure_store.as_ref(), &storage_key).await,
            PersistOp::DeleteKey(key) => delete_entry(secure_store.as_ref(), &key).await,
            PersistOp::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
    debug!("Token writer stopped");
}

async fn delete_entry(secure_store: &dyn SecureStore, key: &str) {
    if let Err(e) = secure_store.delete_secret(key).await {
        warn!(key, error = %e, "Failed to delete secure store entry");
    }
}
