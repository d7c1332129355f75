//! Session manager.
//!
//! Owns the access/refresh token pair, attaches the access token to outgoing
//! requests, and keeps the session alive:
//!
//! - a request that comes back 401 triggers exactly one refresh and one retry
//! - refreshes are single-flight: callers queued behind an in-flight refresh
//!   reuse its result instead of issuing their own
//! - a refresh response that arrives after logout or a new login is dropped
//! - a rejected refresh token ends the session (fail closed)
//!
//! Observers follow the session through [`SessionManager::subscribe`].

use std::{sync::Arc, time::Instant};

use chrono::Utc;
use serde::Serialize;
use tokio::sync::{Mutex, RwLock, watch};
use tracing::instrument;
use uuid::Uuid;
use zeroize::Zeroizing;

use super::{
    session::{AuthStatus, LoginResponse, RefreshResponse, SecretToken, Session, UserProfile},
    storage::{PersistedSession, SessionStore},
    token::is_token_valid,
};
use crate::{
    api::{ApiRequest, error_for_status},
    audit,
    config::SessionSettings,
    endpoints::Endpoints,
    error::{ClientError, Result},
    security::audit::{AuditEventType, redact_email},
    transport::{HttpMethod, RequestContext, Transport, TransportResponse},
};

const ANONYMOUS: &str = "anonymous";

#[derive(Debug, Default)]
struct SessionState {
    session: Session,
    /// Bumped on login and on every clear; refresh results carrying an older
    /// epoch are discarded.
    epoch: u64,
    /// Bumped whenever the access token is replaced or dropped. Callers queued
    /// on the refresh gate compare it against what they saw.
    generation: u64,
    /// Sequence of the latest snapshot handed to the store.
    persist_seq: u64,
}

impl SessionState {
    fn replace_access_token(&mut self, token: Option<SecretToken>) {
        self.session.access_token = token;
        self.generation += 1;
    }

    fn snapshot(&mut self) -> Snapshot {
        self.persist_seq += 1;
        let session = &self.session;
        let persisted = (!session.is_empty() || session.user.is_some()).then(|| PersistedSession {
            token: session.access_token.as_ref().map(|t| t.expose().to_owned()),
            refresh_token: session.refresh_token.as_ref().map(|t| t.expose().to_owned()),
            user: session.user.clone(),
        });
        Snapshot { seq: self.persist_seq, session: persisted }
    }
}

/// Session state captured for the store; `None` clears it.
struct Snapshot {
    seq: u64,
    session: Option<PersistedSession>,
}

/// Result of a refresh attempt.
#[derive(Debug)]
pub(crate) enum RefreshOutcome {
    /// A fresh access token is in place.
    Refreshed,
    /// The refresh token was refused or missing; the session is gone.
    Rejected,
    /// Transient failure; tokens were kept.
    Failed(ClientError),
    /// The session changed while the refresh was in flight.
    Stale,
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

/// Session manager.
///
/// Generic over the [`Transport`] so the HTTP stack can be swapped in tests.
/// Share it behind an [`Arc`]; every method takes `&self`.
#[derive(Debug)]
pub struct SessionManager<T: Transport> {
    transport: T,
    endpoints: Endpoints,
    settings: SessionSettings,
    store: Arc<dyn SessionStore>,
    state: RwLock<SessionState>,
    refresh_gate: Mutex<()>,
    /// Sequence of the last snapshot written to the store.
    persisted_seq: Mutex<u64>,
    status_tx: watch::Sender<AuthStatus>,
}

impl<T: Transport> SessionManager<T> {
    /// Creates a signed-out manager.
    ///
    /// Call [`restore`](Self::restore) to pick up a persisted session.
    #[must_use]
    pub fn new(
        transport: T,
        endpoints: Endpoints,
        settings: SessionSettings,
        store: Arc<dyn SessionStore>,
    ) -> Self {
        let (status_tx, _) = watch::channel(AuthStatus::SignedOut);
        Self {
            transport,
            endpoints,
            settings,
            store,
            state: RwLock::new(SessionState::default()),
            refresh_gate: Mutex::new(()),
            persisted_seq: Mutex::new(0),
            status_tx,
        }
    }

    /// Session timing settings.
    #[must_use]
    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// Endpoint paths.
    #[must_use]
    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    /// Subscribes to authentication status changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<AuthStatus> {
        self.status_tx.subscribe()
    }

    /// Current authentication status.
    #[must_use]
    pub fn status(&self) -> AuthStatus {
        *self.status_tx.borrow()
    }

    /// Profile of the signed-in user.
    pub async fn current_user(&self) -> Option<UserProfile> {
        self.state.read().await.session.user.clone()
    }

    /// Whether an unexpired access token is held.
    pub async fn is_authenticated(&self) -> bool {
        let state = self.state.read().await;
        let token = state.session.access_token.as_ref().map(SecretToken::expose);
        is_token_valid(token, Utc::now(), self.settings.clock_skew())
    }

    /// Whether a refresh token is held.
    pub async fn has_refresh_token(&self) -> bool {
        self.state.read().await.session.refresh_token.is_some()
    }

    #[cfg(test)]
    pub(crate) fn transport_for_tests(&self) -> &T {
        &self.transport
    }

    pub(crate) async fn access_token(&self) -> Option<SecretToken> {
        self.state.read().await.session.access_token.clone()
    }

    /// Access token together with its generation.
    async fn token_snapshot(&self) -> (Option<SecretToken>, u64) {
        let state = self.state.read().await;
        (state.session.access_token.clone(), state.generation)
    }

    /// Rehydrates the persisted session.
    ///
    /// An access token that is already expired is dropped on load; the refresh
    /// token is kept so [`refresh_token`](Self::refresh_token) may revive the
    /// session. Returns whether anything was restored. Storage errors are
    /// logged and treated as "nothing stored".
    #[instrument(skip(self))]
    pub async fn restore(&self) -> bool {
        let store = Arc::clone(&self.store);
        let persisted = match tokio::task::spawn_blocking(move || store.load()).await {
            Ok(Ok(Some(persisted))) => persisted,
            Ok(Ok(None)) => return false,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Failed to load persisted session");
                return false;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Session load task failed");
                return false;
            }
        };

        let now = Utc::now();
        let skew = self.settings.clock_skew();
        let access_valid = is_token_valid(persisted.token.as_deref(), now, skew);
        if persisted.token.is_some() && !access_valid {
            tracing::info!("Discarding expired access token from storage");
        }

        let session = Session {
            access_token: persisted.token.as_deref().filter(|_| access_valid).map(SecretToken::new),
            refresh_token: persisted.refresh_token.as_deref().map(SecretToken::new),
            user: persisted.user.clone(),
        };

        if session.is_empty() {
            let snapshot = self.state.write().await.snapshot();
            self.persist(snapshot).await;
            return false;
        }

        let mut state = self.state.write().await;
        state.session = session;
        state.epoch += 1;
        state.generation += 1;
        let snapshot = (!access_valid).then(|| state.snapshot());
        drop(state);
        if let Some(snapshot) = snapshot {
            self.persist(snapshot).await;
        }

        self.status_tx.send_replace(AuthStatus::SignedIn);
        tracing::info!(access_valid, "Session restored");
        true
    }

    /// Checks the held access token at startup.
    ///
    /// Returns `false` if the token is absent, malformed, or expired by more
    /// than the configured clock skew. An invalid token is discarded from
    /// memory and storage; the refresh token is kept. Never fails.
    #[instrument(skip(self))]
    pub async fn validate_token_on_init(&self) -> bool {
        let mut state = self.state.write().await;
        let token = state.session.access_token.as_ref().map(SecretToken::expose);
        let valid = is_token_valid(token, Utc::now(), self.settings.clock_skew());

        if !valid && state.session.access_token.is_some() {
            tracing::info!("Access token invalid at startup, discarding");
            state.replace_access_token(None);
            let snapshot = state.snapshot();
            drop(state);
            self.persist(snapshot).await;
        }
        valid
    }

    /// Exchanges credentials for a session.
    ///
    /// On failure the existing session, if any, is left untouched.
    ///
    /// # Errors
    ///
    /// - [`ClientError::InvalidCredentials`] on HTTP 400 or 401
    /// - [`ClientError::InvalidInput`] if either field is empty
    /// - transport or backend errors otherwise
    #[instrument(skip(self, email, password), fields(email = %redact_email(email)))]
    pub async fn login(&self, email: &str, password: &str) -> Result<UserProfile> {
        let email = email.trim();
        if email.is_empty() || password.is_empty() {
            return Err(ClientError::InvalidInput("email and password are required".to_owned()));
        }

        let request_id = Uuid::new_v4();
        let started = Instant::now();
        let body = Zeroizing::new(
            serde_json::to_vec(&LoginRequest { email, password })
                .map_err(|e| ClientError::InvalidInput(format!("failed to encode login: {e}")))?,
        );

        let ctx = RequestContext::new(HttpMethod::Post, &self.endpoints.login)
            .with_body(&body)
            .with_request_id(request_id);

        let response = match self.transport.send(ctx).await {
            Ok(response) => response,
            Err(e) => {
                audit!(
                    AuditEventType::LoginFailed,
                    ANONYMOUS,
                    request_id,
                    with_email(email),
                    with_error(e.to_string())
                );
                return Err(e);
            }
        };

        if !response.is_success() {
            let error = match response.status {
                400 | 401 => ClientError::InvalidCredentials,
                _ => error_for_status(&response),
            };
            audit!(
                AuditEventType::LoginFailed,
                ANONYMOUS,
                request_id,
                with_email(email),
                with_error(error.to_string())
            );
            return Err(error);
        }

        let login: LoginResponse = response.json()?;
        let user = login.user.clone();

        let mut state = self.state.write().await;
        state.session = Session {
            access_token: Some(SecretToken::new(login.access_token)),
            refresh_token: Some(SecretToken::new(login.refresh_token)),
            user: Some(login.user),
        };
        state.epoch += 1;
        state.generation += 1;
        let snapshot = state.snapshot();
        drop(state);
        self.persist(snapshot).await;

        self.status_tx.send_replace(AuthStatus::SignedIn);
        audit!(
            AuditEventType::LoginSucceeded,
            user.id.clone(),
            request_id,
            with_email(email),
            with_duration(started.elapsed())
        );
        tracing::info!(user_id = %user.id, role = ?user.role, "Signed in");
        Ok(user)
    }

    /// Exchanges the refresh token for a new token pair.
    ///
    /// Returns whether a valid access token is in place afterwards. A 401 from
    /// the refresh endpoint ends the session; any other failure keeps both
    /// tokens so a later attempt can succeed.
    pub async fn refresh_token(&self) -> bool {
        let (_, generation) = self.token_snapshot().await;
        matches!(self.refresh_replacing(generation).await, RefreshOutcome::Refreshed)
    }

    /// Refreshes unless the access token was replaced after the caller saw
    /// generation `observed`.
    ///
    /// Serialized by the refresh gate: a caller that waited behind another
    /// refresh finds a newer generation and returns without a network call,
    /// even when the backend re-issued a byte-identical token.
    #[instrument(skip_all)]
    pub(crate) async fn refresh_replacing(&self, observed: u64) -> RefreshOutcome {
        let _gate = self.refresh_gate.lock().await;

        let (refresh_token, epoch, actor) = {
            let state = self.state.read().await;
            if state.generation != observed && state.session.access_token.is_some() {
                tracing::debug!("Access token already replaced by a concurrent refresh");
                return RefreshOutcome::Refreshed;
            }
            if state.session.is_empty() {
                return RefreshOutcome::Rejected;
            }
            (state.session.refresh_token.clone(), state.epoch, actor_of(&state.session))
        };

        let request_id = Uuid::new_v4();
        let Some(refresh_token) = refresh_token else {
            tracing::warn!("No refresh token held, expiring session");
            self.expire(epoch, &actor, request_id).await;
            return RefreshOutcome::Rejected;
        };

        let body = match serde_json::to_vec(&RefreshRequest { refresh_token: refresh_token.expose() })
        {
            Ok(body) => Zeroizing::new(body),
            Err(e) => {
                return RefreshOutcome::Failed(ClientError::InvalidInput(format!(
                    "failed to encode refresh request: {e}"
                )));
            }
        };
        let ctx = RequestContext::new(HttpMethod::Post, &self.endpoints.refresh)
            .with_body(&body)
            .with_request_id(request_id);

        let response = match self.transport.send(ctx).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(error = %e, "Token refresh failed, keeping session");
                return RefreshOutcome::Failed(e);
            }
        };

        if response.status == 401 {
            audit!(AuditEventType::RefreshRejected, actor.clone(), request_id);
            tracing::warn!("Refresh token rejected, expiring session");
            if self.expire(epoch, &actor, request_id).await {
                return RefreshOutcome::Rejected;
            }
            return RefreshOutcome::Stale;
        }

        if !response.is_success() {
            let error = error_for_status(&response);
            tracing::warn!(error = %error, "Token refresh failed, keeping session");
            return RefreshOutcome::Failed(error);
        }

        let refreshed: RefreshResponse = match response.json() {
            Ok(refreshed) => refreshed,
            Err(e) => {
                tracing::warn!(error = %e, "Malformed refresh response, keeping session");
                return RefreshOutcome::Failed(e);
            }
        };

        let mut state = self.state.write().await;
        if state.epoch != epoch {
            tracing::info!("Discarding refresh result for a superseded session");
            return RefreshOutcome::Stale;
        }
        state.replace_access_token(Some(SecretToken::new(refreshed.access_token)));
        if let Some(rotated) = refreshed.refresh_token {
            state.session.refresh_token = Some(SecretToken::new(rotated));
        }
        let snapshot = state.snapshot();
        drop(state);
        self.persist(snapshot).await;

        self.status_tx.send_replace(AuthStatus::SignedIn);
        audit!(AuditEventType::TokenRefreshed, actor, request_id);
        tracing::info!("Access token refreshed");
        RefreshOutcome::Refreshed
    }

    /// Ends the session.
    ///
    /// Notifies the backend on a best-effort basis, then clears memory and
    /// storage regardless of the backend outcome.
    #[instrument(skip(self))]
    pub async fn logout(&self) {
        let request_id = Uuid::new_v4();
        let (token, actor) = {
            let state = self.state.read().await;
            (state.session.access_token.clone(), actor_of(&state.session))
        };

        if let Some(token) = &token {
            let ctx = RequestContext::new(HttpMethod::Post, &self.endpoints.logout)
                .with_bearer(token.expose())
                .with_request_id(request_id);
            match self.transport.send(ctx).await {
                Ok(response) if response.is_success() => {}
                Ok(response) => {
                    tracing::debug!(status = response.status, "Backend logout not acknowledged");
                }
                Err(e) => tracing::debug!(error = %e, "Backend logout failed"),
            }
        }

        self.clear(AuthStatus::SignedOut).await;
        audit!(AuditEventType::LoggedOut, actor, request_id);
        tracing::info!("Signed out");
    }

    /// Sends an authenticated request.
    ///
    /// Attaches the access token. A token that is already known to be expired
    /// is refreshed first. On a 401 the token is refreshed once and the
    /// request re-sent once; a second 401 is returned as an error. At most one
    /// refresh happens per call.
    ///
    /// Non-401 responses, including other error statuses, are returned as-is.
    ///
    /// # Errors
    ///
    /// - [`ClientError::NotAuthenticated`] if no session is held
    /// - [`ClientError::SessionExpired`] if the refresh token was rejected
    /// - [`ClientError::Unauthorized`] if the request is still refused after
    ///   the permitted refresh, or the refresh failed transiently
    /// - transport errors
    #[instrument(
        skip(self, request),
        fields(method = request.method.as_str(), path = request.path, request_id = tracing::field::Empty)
    )]
    pub async fn execute(&self, request: ApiRequest<'_>) -> Result<TransportResponse> {
        let request_id = request.request_id;
        tracing::Span::current().record("request_id", tracing::field::display(request_id));

        let (mut token, generation) = self.token_snapshot().await;
        let mut refreshed = false;

        let token_usable = is_token_valid(
            token.as_ref().map(SecretToken::expose),
            Utc::now(),
            self.settings.clock_skew(),
        );
        if !token_usable {
            if !self.has_refresh_token().await && token.is_none() {
                return Err(ClientError::NotAuthenticated);
            }
            tracing::debug!("Access token expired, refreshing before request");
            refreshed = true;
            match self.refresh_replacing(generation).await {
                // A stale refresh means a logout or a new login happened in
                // the meantime; send with whatever session is current now.
                RefreshOutcome::Refreshed | RefreshOutcome::Stale => {
                    token = self.access_token().await;
                }
                RefreshOutcome::Rejected => return Err(ClientError::SessionExpired),
                RefreshOutcome::Failed(e) => return Err(e),
            }
        }

        let Some(current) = token else {
            return Err(ClientError::NotAuthenticated);
        };

        let response = self.send_with(&request, &current, request_id).await?;
        if response.status != 401 {
            return Ok(self.observe(response, request_id).await);
        }
        if refreshed {
            tracing::warn!("Request unauthorized after refresh");
            return Err(ClientError::Unauthorized);
        }

        tracing::debug!("Request unauthorized, refreshing once");
        match self.refresh_replacing(generation).await {
            RefreshOutcome::Refreshed => {}
            RefreshOutcome::Rejected => return Err(ClientError::SessionExpired),
            RefreshOutcome::Failed(_) | RefreshOutcome::Stale => {
                return Err(ClientError::Unauthorized);
            }
        }

        let Some(renewed) = self.access_token().await else {
            return Err(ClientError::SessionExpired);
        };
        let retry = self.send_with(&request, &renewed, request_id).await?;
        if retry.status == 401 {
            tracing::warn!("Request unauthorized after refresh");
            return Err(ClientError::Unauthorized);
        }
        Ok(self.observe(retry, request_id).await)
    }

    async fn send_with(
        &self,
        request: &ApiRequest<'_>,
        token: &SecretToken,
        request_id: Uuid,
    ) -> Result<TransportResponse> {
        let mut ctx = RequestContext::new(request.method, request.path)
            .with_bearer(token.expose())
            .with_request_id(request_id);
        ctx.body = request.body;
        self.transport.send(ctx).await
    }

    async fn observe(&self, response: TransportResponse, request_id: Uuid) -> TransportResponse {
        if response.status == 403 {
            let actor = actor_of(&self.state.read().await.session);
            audit!(
                AuditEventType::AccessDenied,
                actor,
                request_id,
                with_error(response.message())
            );
        }
        response
    }

    /// Clears the session if it is still the one identified by `epoch`.
    async fn expire(&self, epoch: u64, actor: &str, request_id: Uuid) -> bool {
        {
            let state = self.state.read().await;
            if state.epoch != epoch {
                return false;
            }
        }

        // Best-effort notification, the same as a user-initiated logout.
        if let Some(token) = self.access_token().await {
            let ctx = RequestContext::new(HttpMethod::Post, &self.endpoints.logout)
                .with_bearer(token.expose())
                .with_request_id(request_id);
            if let Err(e) = self.transport.send(ctx).await {
                tracing::debug!(error = %e, "Backend logout failed");
            }
        }

        let mut state = self.state.write().await;
        if state.epoch != epoch {
            return false;
        }
        state.session = Session::default();
        state.epoch += 1;
        state.generation += 1;
        let snapshot = state.snapshot();
        drop(state);
        self.persist(snapshot).await;

        self.status_tx.send_replace(AuthStatus::Expired);
        audit!(AuditEventType::SessionExpired, actor.to_owned(), request_id);
        true
    }

    async fn clear(&self, status: AuthStatus) {
        let mut state = self.state.write().await;
        state.session = Session::default();
        state.epoch += 1;
        state.generation += 1;
        let snapshot = state.snapshot();
        drop(state);
        self.persist(snapshot).await;
        self.status_tx.send_replace(status);
    }

    /// Writes a snapshot to the store on the blocking pool.
    ///
    /// Runs with the state lock released. A snapshot older than the last one
    /// written is skipped, so the store never goes back in time. Failures are
    /// logged, never returned.
    async fn persist(&self, snapshot: Snapshot) {
        let mut written = self.persisted_seq.lock().await;
        if *written >= snapshot.seq {
            tracing::debug!(seq = snapshot.seq, "Skipping superseded session snapshot");
            return;
        }

        let Snapshot { seq, session } = snapshot;
        let store = Arc::clone(&self.store);
        let result = tokio::task::spawn_blocking(move || match session {
            Some(session) => store.save(&session),
            None => store.clear(),
        })
        .await;
        *written = seq;

        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(error = %e, "Failed to persist session"),
            Err(e) => tracing::warn!(error = %e, "Session persistence task failed"),
        }
    }
}

fn actor_of(session: &Session) -> String {
    session.user.as_ref().map_or_else(|| ANONYMOUS.to_owned(), |u| u.id.clone())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::{
        auth::{storage::MemoryStore, token::testing::token_expiring_in},
        transport::mock::{MockReply, MockTransport},
    };

    const LOGIN: &str = "/auth/login";
    const REFRESH: &str = "/auth/refresh-token";
    const LOGOUT: &str = "/auth/logout";
    const PLANS: &str = "/subscriptions/plans";

    fn fresh_token() -> String {
        token_expiring_in(Utc::now(), 900)
    }

    fn expired_token() -> String {
        token_expiring_in(Utc::now(), -3600)
    }

    fn user_json() -> serde_json::Value {
        json!({
            "id": "u-1",
            "name": "Amina",
            "email": "amina@example.com",
            "role": "OWNER",
            "pharmacyId": "ph-1"
        })
    }

    fn login_reply(access: &str, refresh: &str) -> MockReply {
        MockReply::ok(json!({
            "access_token": access,
            "refresh_token": refresh,
            "user": user_json()
        }))
    }

    fn manager_with(
        transport: MockTransport,
        store: Arc<MemoryStore>,
    ) -> SessionManager<MockTransport> {
        SessionManager::new(transport, Endpoints::default(), SessionSettings::default(), store)
    }

    fn manager(transport: MockTransport) -> (SessionManager<MockTransport>, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        (manager_with(transport, Arc::clone(&store)), store)
    }

    async fn signed_in(
        transport: MockTransport,
        access: &str,
    ) -> (SessionManager<MockTransport>, Arc<MemoryStore>) {
        transport.push(LOGIN, login_reply(access, "refresh-1"));
        let (manager, store) = manager(transport);
        manager.login("amina@example.com", "secret").await.unwrap();
        (manager, store)
    }

    fn stored(store: &MemoryStore) -> Option<PersistedSession> {
        store.load().unwrap()
    }

    // ========================================================================
    // Login
    // ========================================================================

    #[tokio::test]
    async fn test_login_stores_and_persists_session() {
        let access = fresh_token();
        let (manager, store) = signed_in(MockTransport::new(), &access).await;

        assert!(manager.is_authenticated().await);
        assert_eq!(manager.status(), AuthStatus::SignedIn);
        assert_eq!(manager.current_user().await.unwrap().id, "u-1");

        let persisted = stored(&store).unwrap();
        assert_eq!(persisted.token.as_deref(), Some(access.as_str()));
        assert_eq!(persisted.refresh_token.as_deref(), Some("refresh-1"));
        assert_eq!(persisted.user.as_ref().unwrap().email, "amina@example.com");
    }

    #[tokio::test]
    async fn test_login_sends_credentials_without_bearer() {
        let transport = MockTransport::new();
        transport.push(LOGIN, login_reply(&fresh_token(), "r"));
        let (manager, _) = manager(transport);
        manager.login(" amina@example.com ", "secret").await.unwrap();

        let calls = manager.transport.calls_to(LOGIN);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].method, "POST");
        assert!(calls[0].bearer.is_none());
        assert_eq!(
            calls[0].body,
            Some(json!({ "email": "amina@example.com", "password": "secret" }))
        );
    }

    #[tokio::test]
    async fn test_login_invalid_credentials_leaves_state_untouched() {
        for status in [400, 401] {
            let transport = MockTransport::new();
            transport.push(LOGIN, MockReply::error(status, "Invalid credentials"));
            let (manager, store) = manager(transport);

            let result = manager.login("amina@example.com", "wrong").await;
            assert!(matches!(result, Err(ClientError::InvalidCredentials)));
            assert!(!manager.is_authenticated().await);
            assert_eq!(manager.status(), AuthStatus::SignedOut);
            assert!(stored(&store).is_none());
        }
    }

    #[tokio::test]
    async fn test_failed_login_keeps_existing_session() {
        let access = fresh_token();
        let (manager, store) = signed_in(MockTransport::new(), &access).await;
        manager.transport.push(LOGIN, MockReply::NetworkError);

        let result = manager.login("amina@example.com", "secret").await;
        assert!(matches!(result, Err(ClientError::TransportError(_))));
        assert!(manager.is_authenticated().await);
        assert_eq!(stored(&store).unwrap().token.as_deref(), Some(access.as_str()));
    }

    #[tokio::test]
    async fn test_login_backend_failure() {
        let transport = MockTransport::new();
        transport.push(LOGIN, MockReply::error(500, "boom"));
        let (manager, _) = manager(transport);

        let result = manager.login("amina@example.com", "secret").await;
        assert!(matches!(result, Err(ClientError::BackendError { status: 500, .. })));
    }

    #[tokio::test]
    async fn test_login_rejects_empty_input() {
        let (manager, _) = manager(MockTransport::new());
        assert!(matches!(manager.login("", "x").await, Err(ClientError::InvalidInput(_))));
        assert!(matches!(manager.login("a@b.c", "").await, Err(ClientError::InvalidInput(_))));
        assert!(manager.transport.calls().is_empty());
    }

    #[tokio::test]
    async fn test_login_malformed_response() {
        let transport = MockTransport::new();
        transport.push(LOGIN, MockReply::ok(json!({ "unexpected": true })));
        let (manager, store) = manager(transport);

        let result = manager.login("amina@example.com", "secret").await;
        assert!(matches!(result, Err(ClientError::InvalidResponse(_))));
        assert!(stored(&store).is_none());
    }

    // ========================================================================
    // Startup
    // ========================================================================

    #[tokio::test]
    async fn test_restore_valid_session() {
        let access = fresh_token();
        let store = Arc::new(MemoryStore::with_session(PersistedSession {
            token: Some(access),
            refresh_token: Some("refresh-1".to_owned()),
            user: serde_json::from_value(user_json()).unwrap(),
        }));
        let manager = manager_with(MockTransport::new(), store);

        assert!(manager.restore().await);
        assert!(manager.validate_token_on_init().await);
        assert!(manager.is_authenticated().await);
        assert_eq!(manager.status(), AuthStatus::SignedIn);
    }

    #[tokio::test]
    async fn test_restore_discards_expired_access_token() {
        let store = Arc::new(MemoryStore::with_session(PersistedSession {
            token: Some(expired_token()),
            refresh_token: Some("refresh-1".to_owned()),
            user: None,
        }));
        let manager = manager_with(MockTransport::new(), Arc::clone(&store));

        assert!(manager.restore().await);
        assert!(!manager.is_authenticated().await);
        assert!(manager.has_refresh_token().await);

        let persisted = stored(&store).unwrap();
        assert!(persisted.token.is_none());
        assert_eq!(persisted.refresh_token.as_deref(), Some("refresh-1"));
    }

    #[tokio::test]
    async fn test_restore_empty_store() {
        let (manager, _) = manager(MockTransport::new());
        assert!(!manager.restore().await);
        assert!(!manager.validate_token_on_init().await);
        assert_eq!(manager.status(), AuthStatus::SignedOut);
    }

    #[tokio::test]
    async fn test_validate_on_init_discards_expiring_token() {
        let (manager, store) = signed_in(MockTransport::new(), &expired_token()).await;

        assert!(!manager.validate_token_on_init().await);
        assert!(manager.access_token().await.is_none());
        assert!(manager.has_refresh_token().await);
        assert!(stored(&store).unwrap().token.is_none());
    }

    #[tokio::test]
    async fn test_validate_on_init_accepts_token_within_skew() {
        let (manager, _) =
            signed_in(MockTransport::new(), &token_expiring_in(Utc::now(), -2)).await;
        assert!(manager.validate_token_on_init().await);
    }

    // ========================================================================
    // Refresh
    // ========================================================================

    #[tokio::test]
    async fn test_refresh_replaces_tokens() {
        let new_access = fresh_token();
        let transport = MockTransport::new();
        transport.push(
            REFRESH,
            MockReply::ok(json!({ "access_token": new_access, "refresh_token": "refresh-2" })),
        );
        let (manager, store) = signed_in(transport, &expired_token()).await;

        assert!(manager.refresh_token().await);
        assert!(manager.is_authenticated().await);

        let calls = manager.transport.calls_to(REFRESH);
        assert_eq!(calls[0].body, Some(json!({ "refreshToken": "refresh-1" })));

        let persisted = stored(&store).unwrap();
        assert_eq!(persisted.token.as_deref(), Some(new_access.as_str()));
        assert_eq!(persisted.refresh_token.as_deref(), Some("refresh-2"));
    }

    #[tokio::test]
    async fn test_refresh_without_rotation_keeps_refresh_token() {
        let transport = MockTransport::new();
        transport.push(REFRESH, MockReply::ok(json!({ "accessToken": fresh_token() })));
        let (manager, store) = signed_in(transport, &expired_token()).await;

        assert!(manager.refresh_token().await);
        assert_eq!(stored(&store).unwrap().refresh_token.as_deref(), Some("refresh-1"));
    }

    #[tokio::test]
    async fn test_refresh_rejected_clears_session() {
        let transport = MockTransport::new();
        transport.push(REFRESH, MockReply::status(401));
        let (manager, store) = signed_in(transport, &expired_token()).await;
        let mut status = manager.subscribe();

        assert!(!manager.refresh_token().await);
        assert!(!manager.is_authenticated().await);
        assert!(!manager.has_refresh_token().await);
        assert!(manager.current_user().await.is_none());
        assert!(stored(&store).is_none());
        assert_eq!(*status.borrow_and_update(), AuthStatus::Expired);
    }

    #[tokio::test]
    async fn test_refresh_network_error_keeps_tokens() {
        let access = expired_token();
        let transport = MockTransport::new();
        transport.push(REFRESH, MockReply::NetworkError);
        let (manager, store) = signed_in(transport, &access).await;

        assert!(!manager.refresh_token().await);
        assert!(manager.has_refresh_token().await);
        assert_eq!(manager.status(), AuthStatus::SignedIn);
        let persisted = stored(&store).unwrap();
        assert_eq!(persisted.token.as_deref(), Some(access.as_str()));
        assert_eq!(persisted.refresh_token.as_deref(), Some("refresh-1"));
    }

    #[tokio::test]
    async fn test_refresh_server_error_keeps_tokens() {
        let transport = MockTransport::new();
        transport.push(REFRESH, MockReply::status(503));
        let (manager, _) = signed_in(transport, &expired_token()).await;

        assert!(!manager.refresh_token().await);
        assert!(manager.has_refresh_token().await);
    }

    #[tokio::test]
    async fn test_refresh_when_signed_out() {
        let (manager, _) = manager(MockTransport::new());
        assert!(!manager.refresh_token().await);
        assert_eq!(manager.status(), AuthStatus::SignedOut);
        assert!(manager.transport.calls().is_empty());
    }

    #[tokio::test]
    async fn test_stale_refresh_after_logout_is_discarded() {
        let transport = MockTransport::new();
        transport.push(
            REFRESH,
            MockReply::ok(json!({ "access_token": fresh_token() }))
                .delayed(Duration::from_millis(50)),
        );
        let (manager, store) = signed_in(transport, &expired_token()).await;
        let manager = Arc::new(manager);

        let refreshing = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.refresh_token().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        manager.logout().await;

        assert!(!refreshing.await.unwrap());
        assert!(!manager.is_authenticated().await);
        assert!(!manager.has_refresh_token().await);
        assert!(stored(&store).is_none());
        assert_eq!(manager.status(), AuthStatus::SignedOut);
    }

    // ========================================================================
    // Logout
    // ========================================================================

    #[tokio::test]
    async fn test_logout_clears_even_when_backend_fails() {
        let transport = MockTransport::new();
        transport.push(LOGOUT, MockReply::NetworkError);
        let (manager, store) = signed_in(transport, &fresh_token()).await;

        manager.logout().await;

        assert!(!manager.is_authenticated().await);
        assert!(manager.access_token().await.is_none());
        assert!(!manager.has_refresh_token().await);
        assert!(stored(&store).is_none());
        assert_eq!(manager.status(), AuthStatus::SignedOut);
        assert_eq!(manager.transport.count(LOGOUT), 1);
    }

    #[tokio::test]
    async fn test_logout_notifies_backend_with_bearer() {
        let access = fresh_token();
        let transport = MockTransport::new();
        transport.push(LOGOUT, MockReply::ok(json!({ "success": true })));
        let (manager, _) = signed_in(transport, &access).await;

        manager.logout().await;
        let calls = manager.transport.calls_to(LOGOUT);
        assert_eq!(calls[0].bearer.as_deref(), Some(access.as_str()));
    }

    #[tokio::test]
    async fn test_logout_without_session_skips_backend() {
        let (manager, _) = manager(MockTransport::new());
        manager.logout().await;
        assert!(manager.transport.calls().is_empty());
    }

    // ========================================================================
    // Interceptor
    // ========================================================================

    #[tokio::test]
    async fn test_execute_attaches_bearer() {
        let access = fresh_token();
        let transport = MockTransport::new();
        transport.push(PLANS, MockReply::ok(json!([])));
        let (manager, _) = signed_in(transport, &access).await;

        let response = manager.execute(ApiRequest::get(PLANS)).await.unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(manager.transport.calls_to(PLANS)[0].bearer.as_deref(), Some(access.as_str()));
    }

    #[tokio::test]
    async fn test_execute_without_session() {
        let (manager, _) = manager(MockTransport::new());
        let result = manager.execute(ApiRequest::get(PLANS)).await;
        assert!(matches!(result, Err(ClientError::NotAuthenticated)));
        assert!(manager.transport.calls().is_empty());
    }

    #[tokio::test]
    async fn test_execute_401_refreshes_once_and_retries_once() {
        let new_access = fresh_token();
        let transport = MockTransport::new();
        transport.push(PLANS, MockReply::status(401));
        transport.push(PLANS, MockReply::ok(json!([])));
        transport.push(REFRESH, MockReply::ok(json!({ "access_token": new_access })));
        let (manager, _) = signed_in(transport, &fresh_token()).await;

        let response = manager.execute(ApiRequest::get(PLANS)).await.unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(manager.transport.count(REFRESH), 1);

        let calls = manager.transport.calls_to(PLANS);
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].bearer.as_deref(), Some(new_access.as_str()));
    }

    #[tokio::test]
    async fn test_execute_second_401_does_not_loop() {
        let transport = MockTransport::new();
        transport.always(PLANS, MockReply::status(401));
        transport.always(REFRESH, MockReply::ok(json!({ "access_token": fresh_token() })));
        let (manager, _) = signed_in(transport, &fresh_token()).await;

        let result = manager.execute(ApiRequest::get(PLANS)).await;
        assert!(matches!(result, Err(ClientError::Unauthorized)));
        assert_eq!(manager.transport.count(REFRESH), 1);
        assert_eq!(manager.transport.count(PLANS), 2);
        assert!(manager.is_authenticated().await);
    }

    #[tokio::test]
    async fn test_execute_refresh_rejected_expires_session() {
        let transport = MockTransport::new();
        transport.push(PLANS, MockReply::status(401));
        transport.push(REFRESH, MockReply::status(401));
        let (manager, store) = signed_in(transport, &fresh_token()).await;

        let result = manager.execute(ApiRequest::get(PLANS)).await;
        assert!(matches!(result, Err(ClientError::SessionExpired)));
        assert_eq!(manager.status(), AuthStatus::Expired);
        assert!(stored(&store).is_none());
        assert_eq!(manager.transport.count(PLANS), 1);
    }

    #[tokio::test]
    async fn test_execute_refresh_network_failure_keeps_session() {
        let transport = MockTransport::new();
        transport.push(PLANS, MockReply::status(401));
        transport.push(REFRESH, MockReply::NetworkError);
        let (manager, _) = signed_in(transport, &fresh_token()).await;

        let result = manager.execute(ApiRequest::get(PLANS)).await;
        assert!(matches!(result, Err(ClientError::Unauthorized)));
        assert!(manager.is_authenticated().await);
        assert!(manager.has_refresh_token().await);
    }

    #[tokio::test]
    async fn test_execute_preflight_refresh_for_expired_token() {
        let new_access = fresh_token();
        let transport = MockTransport::new();
        transport.push(REFRESH, MockReply::ok(json!({ "access_token": new_access })));
        transport.always(PLANS, MockReply::status(401));
        let (manager, _) = signed_in(transport, &expired_token()).await;

        // Pre-flight refresh counts as the single refresh: the 401 is final.
        let result = manager.execute(ApiRequest::get(PLANS)).await;
        assert!(matches!(result, Err(ClientError::Unauthorized)));
        assert_eq!(manager.transport.count(REFRESH), 1);

        let calls = manager.transport.calls_to(PLANS);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].bearer.as_deref(), Some(new_access.as_str()));
    }

    #[tokio::test]
    async fn test_execute_preflight_network_failure_surfaces_error() {
        let transport = MockTransport::new();
        transport.push(REFRESH, MockReply::NetworkError);
        let (manager, _) = signed_in(transport, &expired_token()).await;

        let result = manager.execute(ApiRequest::get(PLANS)).await;
        assert!(matches!(result, Err(ClientError::TransportError(_))));
        assert!(manager.has_refresh_token().await);
        assert_eq!(manager.transport.count(PLANS), 0);
    }

    #[tokio::test]
    async fn test_execute_passes_through_error_statuses() {
        let transport = MockTransport::new();
        transport.push(PLANS, MockReply::error(403, "Forbidden"));
        let (manager, _) = signed_in(transport, &fresh_token()).await;

        let response = manager.execute(ApiRequest::get(PLANS)).await.unwrap();
        assert_eq!(response.status, 403);
        assert!(manager.is_authenticated().await);
    }

    async fn concurrent_401s(
        login_access: &str,
        refreshed_access: &str,
    ) -> Arc<SessionManager<MockTransport>> {
        let transport = MockTransport::new();
        transport.push(PLANS, MockReply::status(401));
        transport.push(PLANS, MockReply::status(401));
        transport.always(PLANS, MockReply::ok(json!([])));
        transport.push(
            REFRESH,
            MockReply::ok(json!({ "access_token": refreshed_access }))
                .delayed(Duration::from_millis(20)),
        );
        let (manager, _) = signed_in(transport, login_access).await;
        let manager = Arc::new(manager);

        let tasks: Vec<_> = (0..2)
            .map(|_| {
                let manager = Arc::clone(&manager);
                tokio::spawn(async move { manager.execute(ApiRequest::get(PLANS)).await })
            })
            .collect();

        for task in tasks {
            assert_eq!(task.await.unwrap().unwrap().status, 200);
        }
        manager
    }

    #[tokio::test]
    async fn test_concurrent_401s_share_one_refresh() {
        let refreshed = token_expiring_in(Utc::now(), 1800);
        let manager = concurrent_401s(&fresh_token(), &refreshed).await;

        assert_eq!(manager.transport.count(REFRESH), 1);
        let retried: Vec<_> = manager.transport.calls_to(PLANS).into_iter().skip(2).collect();
        assert_eq!(retried.len(), 2);
        assert!(retried.iter().all(|c| c.bearer.as_deref() == Some(refreshed.as_str())));
    }

    #[tokio::test]
    async fn test_concurrent_401s_share_refresh_with_reissued_token() {
        // Deterministic tokens: the backend hands back the very same string.
        let access = fresh_token();
        let manager = concurrent_401s(&access, &access).await;

        assert_eq!(manager.transport.count(REFRESH), 1);
        assert_eq!(manager.transport.count(PLANS), 4);
    }

    #[tokio::test]
    async fn test_preflight_refresh_superseded_by_login_uses_new_session() {
        let transport = MockTransport::new();
        transport.push(
            REFRESH,
            MockReply::ok(json!({ "access_token": fresh_token() }))
                .delayed(Duration::from_millis(50)),
        );
        transport.push(PLANS, MockReply::ok(json!([])));
        let (manager, _) = signed_in(transport, &expired_token()).await;
        let manager = Arc::new(manager);

        let request = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.execute(ApiRequest::get(PLANS)).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        let relogin = token_expiring_in(Utc::now(), 1200);
        manager.transport.push(LOGIN, login_reply(&relogin, "refresh-2"));
        manager.login("amina@example.com", "secret").await.unwrap();

        assert_eq!(request.await.unwrap().unwrap().status, 200);
        let calls = manager.transport.calls_to(PLANS);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].bearer.as_deref(), Some(relogin.as_str()));
        assert!(manager.is_authenticated().await);
    }

    // ========================================================================
    // Persistence
    // ========================================================================

    /// Store whose saves take a while and announce themselves.
    #[derive(Debug, Default)]
    struct SlowStore {
        inner: MemoryStore,
        saving: tokio::sync::Notify,
    }

    impl SessionStore for SlowStore {
        fn load(&self) -> Result<Option<PersistedSession>> {
            self.inner.load()
        }

        fn save(&self, session: &PersistedSession) -> Result<()> {
            self.saving.notify_one();
            std::thread::sleep(Duration::from_millis(200));
            self.inner.save(session)
        }

        fn clear(&self) -> Result<()> {
            self.inner.clear()
        }
    }

    #[tokio::test]
    async fn test_readers_not_blocked_by_slow_store() {
        let transport = MockTransport::new();
        transport.push(LOGIN, login_reply(&fresh_token(), "refresh-1"));
        let store = Arc::new(SlowStore::default());
        let manager = Arc::new(SessionManager::new(
            transport,
            Endpoints::default(),
            SessionSettings::default(),
            Arc::clone(&store) as Arc<dyn SessionStore>,
        ));

        let login = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.login("amina@example.com", "secret").await })
        };
        store.saving.notified().await;

        // The save is still sleeping; the new session is already readable.
        let authenticated =
            tokio::time::timeout(Duration::from_millis(100), manager.is_authenticated()).await;
        assert_eq!(authenticated.ok(), Some(true));

        login.await.unwrap().unwrap();
        assert!(store.inner.load().unwrap().is_some());
    }

    #[tokio::test]
    async fn test_store_reflects_latest_change() {
        let (manager, store) = signed_in(MockTransport::new(), &fresh_token()).await;
        let manager = Arc::new(manager);

        let logouts: Vec<_> = (0..3)
            .map(|_| {
                let manager = Arc::clone(&manager);
                tokio::spawn(async move { manager.logout().await })
            })
            .collect();
        for logout in logouts {
            logout.await.unwrap();
        }

        assert!(stored(&store).is_none());
    }
}
