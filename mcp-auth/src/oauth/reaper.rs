//! Background removal of expired authorization state
//!
//! Lazy delete-on-read already hides expired documents; the reaper bounds
//! storage growth for documents that are never read again.

use crate::oauth::engine::{AuthorizationEngine, FlowError};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Number of documents removed by one sweep, per collection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub tokens: usize,
    pub auth_codes: usize,
    pub flow_states: usize,
}

impl CleanupReport {
    pub fn total(&self) -> usize {
        self.tokens + self.auth_codes + self.flow_states
    }
}

impl AuthorizationEngine {
    /// Delete every token, code and flow state with `expires_at <= now`,
    /// along with the user data keyed by each swept token
    pub async fn cleanup_expired(&self) -> Result<CleanupReport, FlowError> {
        let now = self.now();
        let storage = self.storage();

        Ok(CleanupReport {
            tokens: storage.sweep_access_tokens(now).await?,
            auth_codes: storage.sweep_authorization_codes(now).await?,
            flow_states: storage.sweep_flow_states(now).await?,
        })
    }
}

/// Run [`AuthorizationEngine::cleanup_expired`] every `interval`.
///
/// Sweep failures are logged and retried on the next tick.
pub fn spawn_reaper(engine: Arc<AuthorizationEngine>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;
            match engine.cleanup_expired().await {
                Ok(report) if report.total() > 0 => info!(
                    tokens = report.tokens,
                    auth_codes = report.auth_codes,
                    flow_states = report.flow_states,
                    "Removed expired OAuth state"
                ),
                Ok(_) => debug!("No expired OAuth state to remove"),
                Err(e) => warn!(error = %e, "Expired OAuth state sweep failed"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oauth::engine::EngineConfig;
    use crate::oauth::models::{AuthorizationParams, UserData};
    use crate::oauth::storage::tests::{
        create_test_access_token, create_test_authorization_code, create_test_client,
    };
    use crate::oauth::storage::{InMemoryOAuthStorage, OAuthStorage};
    use chrono::Utc;

    #[tokio::test]
    async fn test_cleanup_reports_each_collection() {
        let storage = Arc::new(InMemoryOAuthStorage::new());
        let past = Utc::now() - chrono::Duration::hours(2);

        // Saved with `past` as their creation time, so all have expired
        storage
            .save_access_token(&create_test_access_token(past))
            .await
            .unwrap();
        storage
            .save_authorization_code(&create_test_authorization_code(past))
            .await
            .unwrap();

        let engine = AuthorizationEngine::new(storage.clone(), EngineConfig::default())
            .with_clock(move || past);
        engine
            .authorize(
                &create_test_client(),
                AuthorizationParams {
                    state: Some("old".to_string()),
                    scopes: vec![],
                    code_challenge: "abc".to_string(),
                    redirect_uri: "https://example.com/callback".to_string(),
                    redirect_uri_provided_explicitly: false,
                    resource: None,
                },
            )
            .await
            .unwrap();

        let engine = AuthorizationEngine::new(storage.clone(), EngineConfig::default());
        let report = engine.cleanup_expired().await.unwrap();
        assert_eq!(
            report,
            CleanupReport {
                tokens: 1,
                auth_codes: 1,
                flow_states: 1,
            }
        );

        let again = engine.cleanup_expired().await.unwrap();
        assert_eq!(again.total(), 0);
    }

    #[tokio::test]
    async fn test_cleanup_drops_token_user_data() {
        let storage = Arc::new(InMemoryOAuthStorage::new());
        let past = Utc::now() - chrono::Duration::hours(2);
        let token = create_test_access_token(past);
        let user = UserData {
            username: "demo".to_string(),
            user_id: "user_0011223344556677".to_string(),
            authenticated_at: past,
        };
        storage.save_access_token(&token).await.unwrap();
        storage.save_user_data(&token.token, &user).await.unwrap();
        storage.save_user_data("demo", &user).await.unwrap();

        let engine = AuthorizationEngine::new(storage, EngineConfig::default());
        assert_eq!(engine.cleanup_expired().await.unwrap().tokens, 1);

        assert!(engine.get_user_data(&token.token).await.unwrap().is_none());
        assert!(engine.get_user_data("demo").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_cleanup_keeps_live_state() {
        let storage = Arc::new(InMemoryOAuthStorage::new());
        storage
            .save_access_token(&create_test_access_token(Utc::now()))
            .await
            .unwrap();

        let engine = AuthorizationEngine::new(storage, EngineConfig::default());
        assert_eq!(engine.cleanup_expired().await.unwrap().total(), 0);
        assert!(
            engine
                .load_access_token("mcp_test_token_123")
                .await
                .unwrap()
                .is_some()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_reaper_sweeps_on_interval() {
        let storage = Arc::new(InMemoryOAuthStorage::new());
        let past = Utc::now() - chrono::Duration::hours(2);
        storage
            .save_access_token(&create_test_access_token(past))
            .await
            .unwrap();

        let engine = Arc::new(AuthorizationEngine::new(
            storage.clone(),
            EngineConfig::default(),
        ));
        let handle = spawn_reaper(engine, Duration::from_secs(60));

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(storage.sweep_access_tokens(Utc::now()).await.unwrap(), 0);

        handle.abort();
    }
}
