//! Secure Storage Abstraction
//!
//! Provides the platform-agnostic trait behind the persisted token slot.

use async_trait::async_trait;

use crate::error::Result;

/// Secure credential storage trait
///
/// Abstracts secure storage mechanisms:
/// - macOS/iOS: Keychain
/// - Windows: Credential Manager
/// - Linux: Secret Service / libsecret
/// - Browser hosts: HTTP-only, same-site cookies owned by the host
///
/// # Security Requirements
///
/// Implementations MUST:
/// - Survive application restarts (page reloads)
/// - Keep stored values unreadable to code from other origins/applications
/// - Replace a value atomically on overwrite
/// - Never log or expose stored data
///
/// # Example
///
/// ```ignore
/// use bridge_traits::storage::SecureStore;
///
/// async fn store_tokens(store: &dyn SecureStore, json: &[u8]) -> Result<()> {
///     store.set_secret("session_tokens", json).await?;
///     Ok(())
/// }
/// ```
#[async_trait]
pub trait SecureStore: Send + Sync {
    /// Store a secret value, replacing any previous value for `key`
    async fn set_secret(&self, key: &str, value: &[u8]) -> Result<()>;

    /// Retrieve a secret value
    ///
    /// Returns `Ok(None)` if the key doesn't exist.
    async fn get_secret(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Delete a secret
    ///
    /// Deleting a missing key succeeds.
    async fn delete_secret(&self, key: &str) -> Result<()>;

    /// Check if a secret exists without retrieving it
    async fn has_secret(&self, key: &str) -> Result<bool> {
        Ok(self.get_secret(key).await?.is_some())
    }
}
