//! OAuth Storage Backend
//!
//! Five independent document collections: clients, flow states,
//! authorization codes, access tokens and user data. There is no
//! cross-collection transaction; referential integrity is the engine's job.
//!
//! Reads of the TTL-bearing collections check expiry against the supplied
//! `now` and delete an expired document as a side effect, so expiry holds
//! even without the reaper running. Single-use documents (flow state and
//! authorization codes) are consumed with `take_*`, an atomic
//! remove-and-return, so two concurrent callers can never both obtain them.

use crate::oauth::models::{
    AccessToken, AuthorizationCode, Expiring, FlowState, OAuthClient, UserData,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Debug, Error)]
pub enum OAuthStorageError {
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[error("Storage serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// OAuth storage backend trait
#[async_trait]
pub trait OAuthStorage: Send + Sync {
    // Client operations
    async fn save_client(&self, client: &OAuthClient) -> Result<(), OAuthStorageError>;
    async fn get_client(&self, client_id: &str) -> Result<Option<OAuthClient>, OAuthStorageError>;

    // Flow state operations
    async fn save_flow_state(&self, state: &FlowState) -> Result<(), OAuthStorageError>;
    async fn get_flow_state(
        &self,
        state: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<FlowState>, OAuthStorageError>;
    async fn take_flow_state(
        &self,
        state: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<FlowState>, OAuthStorageError>;

    // Authorization code operations
    async fn save_authorization_code(
        &self,
        code: &AuthorizationCode,
    ) -> Result<(), OAuthStorageError>;
    async fn get_authorization_code(
        &self,
        code: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<AuthorizationCode>, OAuthStorageError>;
    async fn take_authorization_code(
        &self,
        code: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<AuthorizationCode>, OAuthStorageError>;
    async fn delete_authorization_code(&self, code: &str) -> Result<(), OAuthStorageError>;

    // Access token operations
    async fn save_access_token(&self, token: &AccessToken) -> Result<(), OAuthStorageError>;
    async fn get_access_token(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<AccessToken>, OAuthStorageError>;
    async fn delete_access_token(&self, token: &str) -> Result<(), OAuthStorageError>;

    // User data operations, keyed by username or by token
    async fn save_user_data(&self, key: &str, data: &UserData) -> Result<(), OAuthStorageError>;
    async fn get_user_data(&self, key: &str) -> Result<Option<UserData>, OAuthStorageError>;
    async fn delete_user_data(&self, key: &str) -> Result<(), OAuthStorageError>;

    // Sweep expired entries, returning how many were removed. Sweeping
    // access tokens also drops the user data keyed by each swept token.
    async fn sweep_access_tokens(&self, now: DateTime<Utc>) -> Result<usize, OAuthStorageError>;
    async fn sweep_authorization_codes(
        &self,
        now: DateTime<Utc>,
    ) -> Result<usize, OAuthStorageError>;
    async fn sweep_flow_states(&self, now: DateTime<Utc>) -> Result<usize, OAuthStorageError>;
}

/// Outcome of a TTL-aware read
#[derive(Debug)]
pub(crate) enum Lookup<T> {
    Live(T),
    /// Was present but expired, and has been deleted
    Expired,
    Missing,
}

impl<T> Lookup<T> {
    pub(crate) fn into_option(self) -> Option<T> {
        match self {
            Lookup::Live(doc) => Some(doc),
            Lookup::Expired | Lookup::Missing => None,
        }
    }
}

/// One keyed document collection
#[derive(Debug)]
pub(crate) struct Collection<T> {
    name: &'static str,
    docs: RwLock<HashMap<String, T>>,
}

impl<T: Clone> Collection<T> {
    pub(crate) fn new(name: &'static str, docs: HashMap<String, T>) -> Self {
        Self {
            name,
            docs: RwLock::new(docs),
        }
    }

    pub(crate) fn name(&self) -> &'static str {
        self.name
    }

    pub(crate) async fn get(&self, key: &str) -> Option<T> {
        self.docs.read().await.get(key).cloned()
    }

    /// Insert or replace, returning the replaced document
    pub(crate) async fn set(&self, key: &str, doc: T) -> Option<T> {
        self.docs.write().await.insert(key.to_string(), doc)
    }

    /// Put `key` back to an earlier value, `None` meaning absent
    pub(crate) async fn restore(&self, key: &str, previous: Option<T>) {
        let mut docs = self.docs.write().await;
        match previous {
            Some(doc) => {
                docs.insert(key.to_string(), doc);
            }
            None => {
                docs.remove(key);
            }
        }
    }

    pub(crate) async fn remove(&self, key: &str) -> Option<T> {
        self.docs.write().await.remove(key)
    }

    pub(crate) async fn snapshot(&self) -> HashMap<String, T> {
        self.docs.read().await.clone()
    }
}

impl<T: Clone + Expiring> Collection<T> {
    /// Read a document, lazily deleting it if expired.
    ///
    /// The deletion re-checks expiry under the write lock, so a fresh
    /// document written concurrently under the same key is never removed.
    pub(crate) async fn get_live(&self, key: &str, now: DateTime<Utc>) -> Lookup<T> {
        {
            let docs = self.docs.read().await;
            match docs.get(key) {
                None => return Lookup::Missing,
                Some(doc) if !doc.is_expired_at(now) => return Lookup::Live(doc.clone()),
                Some(_) => {}
            }
        }

        let mut docs = self.docs.write().await;
        match docs.get(key) {
            None => Lookup::Missing,
            Some(doc) if !doc.is_expired_at(now) => Lookup::Live(doc.clone()),
            Some(_) => {
                docs.remove(key);
                debug!(collection = self.name, "Deleted expired document on read");
                Lookup::Expired
            }
        }
    }

    /// Atomically remove a document and return it if it was still live
    pub(crate) async fn take_live(&self, key: &str, now: DateTime<Utc>) -> Lookup<T> {
        let mut docs = self.docs.write().await;
        match docs.remove(key) {
            None => Lookup::Missing,
            Some(doc) if doc.is_expired_at(now) => Lookup::Expired,
            Some(doc) => Lookup::Live(doc),
        }
    }

    /// Remove every expired document, returning the removed keys
    pub(crate) async fn sweep(&self, now: DateTime<Utc>) -> Vec<String> {
        let mut docs = self.docs.write().await;
        let expired: Vec<String> = docs
            .iter()
            .filter(|(_, doc)| doc.is_expired_at(now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            docs.remove(key);
        }
        expired
    }
}

/// Serialized form of all five collections
#[derive(Debug, Default, Serialize, Deserialize)]
pub(crate) struct StoreSnapshot {
    #[serde(default)]
    pub clients: HashMap<String, OAuthClient>,
    #[serde(default)]
    pub flow_states: HashMap<String, FlowState>,
    #[serde(default)]
    pub authorization_codes: HashMap<String, AuthorizationCode>,
    #[serde(default)]
    pub access_tokens: HashMap<String, AccessToken>,
    #[serde(default)]
    pub user_data: HashMap<String, UserData>,
}

/// The five collections backing both storage implementations
#[derive(Debug)]
pub(crate) struct Collections {
    pub clients: Collection<OAuthClient>,
    pub flow_states: Collection<FlowState>,
    pub authorization_codes: Collection<AuthorizationCode>,
    pub access_tokens: Collection<AccessToken>,
    pub user_data: Collection<UserData>,
}

impl Collections {
    pub(crate) fn from_snapshot(snapshot: StoreSnapshot) -> Self {
        Self {
            clients: Collection::new("oauth_clients", snapshot.clients),
            flow_states: Collection::new("oauth_state", snapshot.flow_states),
            authorization_codes: Collection::new("auth_codes", snapshot.authorization_codes),
            access_tokens: Collection::new("oauth_tokens", snapshot.access_tokens),
            user_data: Collection::new("user_data", snapshot.user_data),
        }
    }

    pub(crate) async fn snapshot(&self) -> StoreSnapshot {
        StoreSnapshot {
            clients: self.clients.snapshot().await,
            flow_states: self.flow_states.snapshot().await,
            authorization_codes: self.authorization_codes.snapshot().await,
            access_tokens: self.access_tokens.snapshot().await,
            user_data: self.user_data.snapshot().await,
        }
    }
}

/// In-memory OAuth storage implementation
///
/// Thread-safe storage using one RwLock per collection. State is lost on
/// restart; use [`FileOAuthStorage`](crate::oauth::file_storage::FileOAuthStorage)
/// to persist it.
#[derive(Debug)]
pub struct InMemoryOAuthStorage {
    collections: Collections,
}

impl InMemoryOAuthStorage {
    pub fn new() -> Self {
        Self {
            collections: Collections::from_snapshot(StoreSnapshot::default()),
        }
    }
}

impl Default for InMemoryOAuthStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OAuthStorage for InMemoryOAuthStorage {
    async fn save_client(&self, client: &OAuthClient) -> Result<(), OAuthStorageError> {
        self.collections
            .clients
            .set(&client.client_id, client.clone())
            .await;
        Ok(())
    }

    async fn get_client(&self, client_id: &str) -> Result<Option<OAuthClient>, OAuthStorageError> {
        Ok(self.collections.clients.get(client_id).await)
    }

    async fn save_flow_state(&self, state: &FlowState) -> Result<(), OAuthStorageError> {
        self.collections
            .flow_states
            .set(&state.state, state.clone())
            .await;
        Ok(())
    }

    async fn get_flow_state(
        &self,
        state: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<FlowState>, OAuthStorageError> {
        Ok(self.collections.flow_states.get_live(state, now).await.into_option())
    }

    async fn take_flow_state(
        &self,
        state: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<FlowState>, OAuthStorageError> {
        Ok(self.collections.flow_states.take_live(state, now).await.into_option())
    }

    async fn save_authorization_code(
        &self,
        code: &AuthorizationCode,
    ) -> Result<(), OAuthStorageError> {
        self.collections
            .authorization_codes
            .set(&code.code, code.clone())
            .await;
        Ok(())
    }

    async fn get_authorization_code(
        &self,
        code: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<AuthorizationCode>, OAuthStorageError> {
        Ok(self
            .collections
            .authorization_codes
            .get_live(code, now)
            .await
            .into_option())
    }

    async fn take_authorization_code(
        &self,
        code: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<AuthorizationCode>, OAuthStorageError> {
        Ok(self
            .collections
            .authorization_codes
            .take_live(code, now)
            .await
            .into_option())
    }

    async fn delete_authorization_code(&self, code: &str) -> Result<(), OAuthStorageError> {
        self.collections.authorization_codes.remove(code).await;
        Ok(())
    }

    async fn save_access_token(&self, token: &AccessToken) -> Result<(), OAuthStorageError> {
        self.collections
            .access_tokens
            .set(&token.token, token.clone())
            .await;
        Ok(())
    }

    async fn get_access_token(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<AccessToken>, OAuthStorageError> {
        Ok(self
            .collections
            .access_tokens
            .get_live(token, now)
            .await
            .into_option())
    }

    async fn delete_access_token(&self, token: &str) -> Result<(), OAuthStorageError> {
        self.collections.access_tokens.remove(token).await;
        Ok(())
    }

    async fn save_user_data(&self, key: &str, data: &UserData) -> Result<(), OAuthStorageError> {
        self.collections.user_data.set(key, data.clone()).await;
        Ok(())
    }

    async fn get_user_data(&self, key: &str) -> Result<Option<UserData>, OAuthStorageError> {
        Ok(self.collections.user_data.get(key).await)
    }

    async fn delete_user_data(&self, key: &str) -> Result<(), OAuthStorageError> {
        self.collections.user_data.remove(key).await;
        Ok(())
    }

    async fn sweep_access_tokens(&self, now: DateTime<Utc>) -> Result<usize, OAuthStorageError> {
        let swept = self.collections.access_tokens.sweep(now).await;
        for token in &swept {
            self.collections.user_data.remove(token).await;
        }
        Ok(swept.len())
    }

    async fn sweep_authorization_codes(
        &self,
        now: DateTime<Utc>,
    ) -> Result<usize, OAuthStorageError> {
        Ok(self.collections.authorization_codes.sweep(now).await.len())
    }

    async fn sweep_flow_states(&self, now: DateTime<Utc>) -> Result<usize, OAuthStorageError> {
        Ok(self.collections.flow_states.sweep(now).await.len())
    }
}
