//! In-process secure store.
//!
//! Used when the host offers no keychain (headless servers, tests). Values
//! live as long as the process.

use async_trait::async_trait;
use bridge_traits::{error::Result, storage::SecureStore};
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Debug, Default)]
pub struct MemorySecureStore {
    entries: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemorySecureStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SecureStore for MemorySecureStore {
    async fn set_secret(&self, key: &str, value: &[u8]) -> Result<()> {
        self.entries
            .write()
            .await
            .insert(key.to_string(), value.to_vec());
        Ok(())
    }

    async fn get_secret(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn delete_secret(&self, key: &str) -> Result<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_overwrite_and_delete() {
        let store = MemorySecureStore::new();

        store.set_secret("session_tokens", b"one").await.unwrap();
        store.set_secret("session_tokens", b"two").await.unwrap();
        assert_eq!(
            store.get_secret("session_tokens").await.unwrap(),
            Some(b"two".to_vec())
        );

        store.delete_secret("session_tokens").await.unwrap();
        store.delete_secret("session_tokens").await.unwrap();
        assert!(!store.has_secret("session_tokens").await.unwrap());
    }
}
