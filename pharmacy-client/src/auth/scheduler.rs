//! Proactive token refresh.
//!
//! A background task that refreshes the access token before it expires, so
//! requests rarely hit the reactive 401 path. The refresh goes through
//! [`SessionManager::refresh_token`] and therefore shares its single-flight
//! gate with interceptor-driven refreshes.
//!
//! Consecutive proactive refreshes are at least [`MIN_REFRESH_SPACING`]
//! apart. A refresh that succeeds but hands back a token with less than that
//! left counts as failed and backs off for the configured retry interval.

use std::{sync::Arc, time::Duration};

use chrono::Utc;
use tokio::{sync::oneshot, task::JoinHandle, time::Instant};

use super::{
    manager::SessionManager,
    session::AuthStatus,
    token::{refresh_delay, remaining_lifetime},
};
use crate::transport::Transport;

/// Minimum time between two proactive refresh attempts.
pub const MIN_REFRESH_SPACING: Duration = Duration::from_secs(5);

/// Handle to the background refresh task.
///
/// Dropping the handle aborts the task; [`stop`](Self::stop) shuts it down
/// and waits for it.
#[derive(Debug)]
pub struct RefreshScheduler {
    handle: Option<JoinHandle<()>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl RefreshScheduler {
    /// Spawns the refresh task on the current runtime.
    #[must_use]
    pub fn start<T: Transport + 'static>(manager: Arc<SessionManager<T>>) -> Self {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let handle = tokio::spawn(run(manager, shutdown_rx));
        tracing::debug!("Refresh scheduler started");
        Self { handle: Some(handle), shutdown_tx: Some(shutdown_tx) }
    }

    /// Stops the task and waits for it to exit.
    pub async fn stop(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
        tracing::debug!("Refresh scheduler stopped");
    }
}

impl Drop for RefreshScheduler {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

async fn run<T: Transport>(manager: Arc<SessionManager<T>>, mut shutdown: oneshot::Receiver<()>) {
    let mut status = manager.subscribe();
    let mut last_attempt: Option<Instant> = None;

    loop {
        status.mark_unchanged();

        let Some(wait) = next_refresh_in(&manager).await else {
            // Nothing to keep alive until the next login or restore.
            tokio::select! {
                _ = &mut shutdown => break,
                changed = status.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
            }
        };

        let wait = match last_attempt {
            Some(at) => wait.max(MIN_REFRESH_SPACING.saturating_sub(at.elapsed())),
            None => wait,
        };

        tracing::debug!(wait_secs = wait.as_secs(), "Next proactive refresh scheduled");
        tokio::select! {
            _ = &mut shutdown => break,
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
            () = tokio::time::sleep(wait) => {}
        }

        last_attempt = Some(Instant::now());
        if manager.refresh_token().await {
            if has_usable_lifetime(&manager).await {
                continue;
            }
            tracing::warn!("Refreshed access token is already expiring");
        }

        if manager.status() == AuthStatus::SignedIn {
            let retry = manager.settings().retry_interval();
            tracing::warn!(retry_secs = retry.as_secs(), "Proactive refresh failed, will retry");
            tokio::select! {
                _ = &mut shutdown => break,
                () = tokio::time::sleep(retry) => {}
            }
        }
    }
}

/// Whether the held token lives long enough to schedule the next refresh.
async fn has_usable_lifetime<T: Transport>(manager: &SessionManager<T>) -> bool {
    next_refresh_in(manager).await.is_some_and(|wait| wait >= MIN_REFRESH_SPACING)
}

/// Delay until the next refresh, `None` when there is no session to keep alive.
async fn next_refresh_in<T: Transport>(manager: &SessionManager<T>) -> Option<Duration> {
    if manager.status() != AuthStatus::SignedIn {
        return None;
    }

    let settings = manager.settings();
    match manager.access_token().await {
        Some(token) => match remaining_lifetime(token.expose(), Utc::now()) {
            Ok(remaining) => Some(refresh_delay(
                remaining,
                settings.refresh_ratio,
                settings.min_refresh_lead(),
            )),
            Err(e) => {
                tracing::warn!(error = %e, "Undecodable access token, refreshing now");
                Some(Duration::ZERO)
            }
        },
        // Restored with only a refresh token, or the access token was discarded.
        None => manager.has_refresh_token().await.then_some(Duration::ZERO),
    }
}
