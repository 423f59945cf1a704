//! File-backed OAuth storage
//!
//! Keeps the five collections in memory and writes a JSON snapshot of all of
//! them after every mutation, so registered clients and issued tokens survive
//! a restart of the authorization server. Snapshots are written to a sibling
//! temp file and renamed into place.
//!
//! A mutation holds the write lock from the in-memory change until the
//! snapshot is on disk. If the snapshot cannot be written the change is
//! rolled back in memory and the error returned.

use crate::oauth::models::{
    AccessToken, AuthorizationCode, Expiring, FlowState, OAuthClient, UserData,
};
use crate::oauth::storage::{
    Collection, Collections, Lookup, OAuthStorage, OAuthStorageError, StoreSnapshot,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

pub struct FileOAuthStorage {
    path: PathBuf,
    collections: Collections,
    write_lock: Mutex<()>,
}

impl FileOAuthStorage {
    /// Open the store at `path`, loading the existing snapshot if there is one
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, OAuthStorageError> {
        let path = path.into();

        let snapshot = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice::<StoreSnapshot>(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StoreSnapshot::default(),
            Err(e) => return Err(e.into()),
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        info!(
            path = %path.display(),
            clients = snapshot.clients.len(),
            tokens = snapshot.access_tokens.len(),
            "Opened file-backed OAuth storage"
        );

        Ok(Self {
            path,
            collections: Collections::from_snapshot(snapshot),
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the current collections to disk. Callers hold `write_lock`.
    async fn write_snapshot(&self) -> Result<(), OAuthStorageError> {
        let snapshot = self.collections.snapshot().await;
        let bytes = serde_json::to_vec_pretty(&snapshot)?;

        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;

        debug!(path = %self.path.display(), "Persisted OAuth storage snapshot");
        Ok(())
    }

    /// Persist a change already applied to `collection[key]`, putting
    /// `previous` back if the snapshot cannot be written.
    /// Callers hold `write_lock`.
    async fn commit<T: Clone>(
        &self,
        collection: &Collection<T>,
        key: &str,
        previous: Option<T>,
    ) -> Result<(), OAuthStorageError> {
        if let Err(e) = self.write_snapshot().await {
            collection.restore(key, previous).await;
            warn!(
                collection = collection.name(),
                error = %e,
                "Failed to persist OAuth storage, change rolled back"
            );
            return Err(e);
        }
        Ok(())
    }

    async fn save<T: Clone>(
        &self,
        collection: &Collection<T>,
        key: &str,
        doc: T,
    ) -> Result<(), OAuthStorageError> {
        let _guard = self.write_lock.lock().await;
        let previous = collection.set(key, doc).await;
        self.commit(collection, key, previous).await
    }

    async fn delete<T: Clone>(
        &self,
        collection: &Collection<T>,
        key: &str,
    ) -> Result<(), OAuthStorageError> {
        let _guard = self.write_lock.lock().await;
        match collection.remove(key).await {
            Some(previous) => self.commit(collection, key, Some(previous)).await,
            None => Ok(()),
        }
    }

    /// Consume a single-use document; on a failed write it stays claimable
    async fn take<T: Clone + Expiring>(
        &self,
        collection: &Collection<T>,
        key: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<T>, OAuthStorageError> {
        let _guard = self.write_lock.lock().await;
        match collection.take_live(key, now).await {
            Lookup::Missing => Ok(None),
            Lookup::Expired => {
                self.write_snapshot().await?;
                Ok(None)
            }
            Lookup::Live(doc) => {
                self.commit(collection, key, Some(doc.clone())).await?;
                Ok(Some(doc))
            }
        }
    }

    /// Persist if a lazy read deleted something, then unwrap the lookup.
    /// An expired document is never restored: it is invisible either way.
    async fn settle<T>(&self, lookup: Lookup<T>) -> Result<Option<T>, OAuthStorageError> {
        if matches!(lookup, Lookup::Expired) {
            let _guard = self.write_lock.lock().await;
            self.write_snapshot().await?;
        }
        Ok(lookup.into_option())
    }

    async fn sweep<T: Clone + Expiring>(
        &self,
        collection: &Collection<T>,
        now: DateTime<Utc>,
    ) -> Result<Vec<String>, OAuthStorageError> {
        let _guard = self.write_lock.lock().await;
        let swept = collection.sweep(now).await;
        if !swept.is_empty() {
            self.write_snapshot().await?;
        }
        Ok(swept)
    }
}

#[async_trait]
impl OAuthStorage for FileOAuthStorage {
    async fn save_client(&self, client: &OAuthClient) -> Result<(), OAuthStorageError> {
        self.save(&self.collections.clients, &client.client_id, client.clone())
            .await
    }

    async fn get_client(&self, client_id: &str) -> Result<Option<OAuthClient>, OAuthStorageError> {
        Ok(self.collections.clients.get(client_id).await)
    }

    async fn save_flow_state(&self, state: &FlowState) -> Result<(), OAuthStorageError> {
        self.save(&self.collections.flow_states, &state.state, state.clone())
            .await
    }

    async fn get_flow_state(
        &self,
        state: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<FlowState>, OAuthStorageError> {
        let lookup = self.collections.flow_states.get_live(state, now).await;
        self.settle(lookup).await
    }

    async fn take_flow_state(
        &self,
        state: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<FlowState>, OAuthStorageError> {
        self.take(&self.collections.flow_states, state, now).await
    }

    async fn save_authorization_code(
        &self,
        code: &AuthorizationCode,
    ) -> Result<(), OAuthStorageError> {
        self.save(&self.collections.authorization_codes, &code.code, code.clone())
            .await
    }

    async fn get_authorization_code(
        &self,
        code: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<AuthorizationCode>, OAuthStorageError> {
        let lookup = self.collections.authorization_codes.get_live(code, now).await;
        self.settle(lookup).await
    }

    async fn take_authorization_code(
        &self,
        code: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<AuthorizationCode>, OAuthStorageError> {
        self.take(&self.collections.authorization_codes, code, now)
            .await
    }

    async fn delete_authorization_code(&self, code: &str) -> Result<(), OAuthStorageError> {
        self.delete(&self.collections.authorization_codes, code).await
    }

    async fn save_access_token(&self, token: &AccessToken) -> Result<(), OAuthStorageError> {
        self.save(&self.collections.access_tokens, &token.token, token.clone())
            .await
    }

    async fn get_access_token(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<AccessToken>, OAuthStorageError> {
        let lookup = self.collections.access_tokens.get_live(token, now).await;
        self.settle(lookup).await
    }

    async fn delete_access_token(&self, token: &str) -> Result<(), OAuthStorageError> {
        self.delete(&self.collections.access_tokens, token).await
    }

    async fn save_user_data(&self, key: &str, data: &UserData) -> Result<(), OAuthStorageError> {
        self.save(&self.collections.user_data, key, data.clone()).await
    }

    async fn get_user_data(&self, key: &str) -> Result<Option<UserData>, OAuthStorageError> {
        Ok(self.collections.user_data.get(key).await)
    }

    async fn delete_user_data(&self, key: &str) -> Result<(), OAuthStorageError> {
        self.delete(&self.collections.user_data, key).await
    }

    async fn sweep_access_tokens(&self, now: DateTime<Utc>) -> Result<usize, OAuthStorageError> {
        let _guard = self.write_lock.lock().await;
        let swept = self.collections.access_tokens.sweep(now).await;
        if swept.is_empty() {
            return Ok(0);
        }
        for token in &swept {
            self.collections.user_data.remove(token).await;
        }
        self.write_snapshot().await?;
        Ok(swept.len())
    }

    async fn sweep_authorization_codes(
        &self,
        now: DateTime<Utc>,
    ) -> Result<usize, OAuthStorageError> {
        Ok(self
            .sweep(&self.collections.authorization_codes, now)
            .await?
            .len())
    }

    async fn sweep_flow_states(&self, now: DateTime<Utc>) -> Result<usize, OAuthStorageError> {
        Ok(self.sweep(&self.collections.flow_states, now).await?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oauth::storage::tests::{
        create_test_access_token, create_test_authorization_code, create_test_client,
    };
    use chrono::Duration;

    #[tokio::test]
    async fn test_state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("oauth.json");
        let now = Utc::now();

        {
            let storage = FileOAuthStorage::open(&path).await.unwrap();
            storage.save_client(&create_test_client()).await.unwrap();
            storage
                .save_access_token(&create_test_access_token(now))
                .await
                .unwrap();
        }

        let reopened = FileOAuthStorage::open(&path).await.unwrap();
        assert!(reopened.get_client("test_client").await.unwrap().is_some());
        assert!(
            reopened
                .get_access_token("mcp_test_token_123", now)
                .await
                .unwrap()
                .is_some()
        );
    }

    #[tokio::test]
    async fn test_consumed_code_stays_consumed_after_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("oauth.json");
        let now = Utc::now();
        let code = create_test_authorization_code(now);

        {
            let storage = FileOAuthStorage::open(&path).await.unwrap();
            storage.save_authorization_code(&code).await.unwrap();
            assert!(
                storage
                    .take_authorization_code(&code.code, now)
                    .await
                    .unwrap()
                    .is_some()
            );
        }

        let reopened = FileOAuthStorage::open(&path).await.unwrap();
        assert!(
            reopened
                .get_authorization_code(&code.code, now)
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_sweep_persists_removal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("oauth.json");
        let now = Utc::now();

        {
            let storage = FileOAuthStorage::open(&path).await.unwrap();
            let mut token = create_test_access_token(now);
            token.expires_at = now - Duration::seconds(5);
            storage.save_access_token(&token).await.unwrap();
            assert_eq!(storage.sweep_access_tokens(now).await.unwrap(), 1);
        }

        let raw = tokio::fs::read_to_string(&path).await.unwrap();
        assert!(!raw.contains("mcp_test_token_123"));
    }

    /// A directory squatting on the temp path makes every snapshot write fail
    async fn block_snapshot_writes(path: &Path) -> PathBuf {
        let tmp = path.with_extension("tmp");
        tokio::fs::create_dir(&tmp).await.unwrap();
        tmp
    }

    #[tokio::test]
    async fn test_failed_revocation_keeps_token() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("oauth.json");
        let now = Utc::now();
        let token = create_test_access_token(now);

        let storage = FileOAuthStorage::open(&path).await.unwrap();
        storage.save_access_token(&token).await.unwrap();

        let tmp = block_snapshot_writes(&path).await;
        let result = storage.delete_access_token(&token.token).await;
        assert!(matches!(result, Err(OAuthStorageError::Io(_))));

        // Memory and disk agree that the token was never revoked
        assert_eq!(
            storage.get_access_token(&token.token, now).await.unwrap(),
            Some(token.clone())
        );
        tokio::fs::remove_dir(&tmp).await.unwrap();
        drop(storage);
        let reopened = FileOAuthStorage::open(&path).await.unwrap();
        assert!(
            reopened
                .get_access_token(&token.token, now)
                .await
                .unwrap()
                .is_some()
        );

        // Once writes succeed again the revocation sticks
        reopened.delete_access_token(&token.token).await.unwrap();
        let reopened = FileOAuthStorage::open(&path).await.unwrap();
        assert!(
            reopened
                .get_access_token(&token.token, now)
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_failed_save_is_not_visible() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("oauth.json");
        let now = Utc::now();

        let storage = FileOAuthStorage::open(&path).await.unwrap();
        block_snapshot_writes(&path).await;

        assert!(
            storage
                .save_access_token(&create_test_access_token(now))
                .await
                .is_err()
        );
        assert!(
            storage
                .get_access_token("mcp_test_token_123", now)
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_failed_overwrite_restores_previous_client() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("oauth.json");
        let client = create_test_client();

        let storage = FileOAuthStorage::open(&path).await.unwrap();
        storage.save_client(&client).await.unwrap();
        block_snapshot_writes(&path).await;

        let mut renamed = client.clone();
        renamed.client_name = Some("Renamed".to_string());
        assert!(storage.save_client(&renamed).await.is_err());

        assert_eq!(
            storage.get_client(&client.client_id).await.unwrap(),
            Some(client)
        );
    }

    #[tokio::test]
    async fn test_failed_take_leaves_code_claimable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("oauth.json");
        let now = Utc::now();
        let code = create_test_authorization_code(now);

        let storage = FileOAuthStorage::open(&path).await.unwrap();
        storage.save_authorization_code(&code).await.unwrap();

        let tmp = block_snapshot_writes(&path).await;
        assert!(storage.take_authorization_code(&code.code, now).await.is_err());

        tokio::fs::remove_dir(&tmp).await.unwrap();
        assert_eq!(
            storage.take_authorization_code(&code.code, now).await.unwrap(),
            Some(code)
        );
    }

    #[tokio::test]
    async fn test_sweep_persists_user_data_removal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("oauth.json");
        let now = Utc::now();

        {
            let storage = FileOAuthStorage::open(&path).await.unwrap();
            let mut token = create_test_access_token(now);
            token.expires_at = now - Duration::seconds(5);
            storage.save_access_token(&token).await.unwrap();
            storage
                .save_user_data(
                    &token.token,
                    &UserData {
                        username: "demo".to_string(),
                        user_id: "user_0011223344556677".to_string(),
                        authenticated_at: now,
                    },
                )
                .await
                .unwrap();
            assert_eq!(storage.sweep_access_tokens(now).await.unwrap(), 1);
        }

        let reopened = FileOAuthStorage::open(&path).await.unwrap();
        assert!(
            reopened
                .get_user_data("mcp_test_token_123")
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_corrupt_snapshot_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("oauth.json");
        tokio::fs::write(&path, b"not json").await.unwrap();

        let result = FileOAuthStorage::open(&path).await;
        assert!(matches!(result, Err(OAuthStorageError::Serialization(_))));
    }
}
