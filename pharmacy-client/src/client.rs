//! Wiring of transport, persistence, session manager and controller.

use std::sync::Arc;

use tracing::instrument;

use crate::{
    auth::{FileStore, MemoryStore, RefreshScheduler, SessionManager, SessionStore},
    config::ClientConfig,
    error::Result,
    subscription::SubscriptionController,
    transport::HttpTransport,
};

/// A configured client: one session and one subscription controller over
/// a shared HTTP transport.
///
/// # Examples
///
/// ```rust,no_run
/// use pharmacy_client::{PharmacyClient, config::ClientConfig};
///
/// # async fn example() -> pharmacy_client::Result<()> {
/// let config = ClientConfig::from_file("pharmacy.toml")?;
/// let client = PharmacyClient::from_config(&config)?;
///
/// if !client.initialize().await {
///     client.session().login("owner@pharmacy.example", "secret").await?;
/// }
/// let scheduler = client.start_refresh();
/// // ...
/// scheduler.stop().await;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct PharmacyClient {
    session: Arc<SessionManager<HttpTransport>>,
    subscriptions: SubscriptionController<HttpTransport>,
}

impl PharmacyClient {
    /// Builds a client from validated configuration.
    ///
    /// The session is persisted to `session.storage_path` when set, and kept
    /// in memory otherwise.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::ConfigError`](crate::ClientError::ConfigError) if
    /// the configuration is invalid, or an HTTP error if the client cannot be built.
    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        config.validate()?;

        let transport = HttpTransport::with_config(&config.api_base(), &config.http)?;
        let store: Arc<dyn SessionStore> = match &config.session.storage_path {
            Some(path) => Arc::new(FileStore::new(path)),
            None => Arc::new(MemoryStore::new()),
        };

        let session = Arc::new(SessionManager::new(
            transport,
            config.endpoints.clone(),
            config.session.clone(),
            store,
        ));
        let subscriptions =
            SubscriptionController::with_retry_policy(Arc::clone(&session), config.retry.policy());

        tracing::info!(base_url = %config.api_base(), "Pharmacy client configured");
        Ok(Self { session, subscriptions })
    }

    /// Session manager.
    #[must_use]
    pub fn session(&self) -> &Arc<SessionManager<HttpTransport>> {
        &self.session
    }

    /// Subscription controller.
    #[must_use]
    pub fn subscriptions(&self) -> &SubscriptionController<HttpTransport> {
        &self.subscriptions
    }

    /// Restores and validates the persisted session.
    ///
    /// If only the refresh token survived, one refresh is attempted. Returns
    /// whether a usable session is in place.
    #[instrument(skip(self))]
    pub async fn initialize(&self) -> bool {
        if !self.session.restore().await {
            return false;
        }
        if self.session.validate_token_on_init().await {
            return true;
        }
        self.session.has_refresh_token().await && self.session.refresh_token().await
    }

    /// Starts the proactive refresh task. Stop it before shutting down.
    #[must_use]
    pub fn start_refresh(&self) -> RefreshScheduler {
        RefreshScheduler::start(Arc::clone(&self.session))
    }
}
