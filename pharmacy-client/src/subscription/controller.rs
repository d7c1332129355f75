//! Subscription lifecycle controller.
//!
//! Reads and mutates a pharmacy's subscription through the session manager.
//! The backend is authoritative: every mutation is followed by a re-fetch of
//! the current subscription, and that re-fetched record is what callers get
//! back. Nothing is patched locally. A failed re-fetch is reported as
//! [`ClientError::RefetchFailed`] so callers know the change went through.

use std::{
    collections::HashSet,
    sync::{Arc, Mutex, PoisonError},
    time::Instant,
};

use serde::{Serialize, de::DeserializeOwned};
use tracing::instrument;
use uuid::Uuid;

use super::{
    models::{PharmacyId, Plan, PlanId, Subscription, SubscriptionId},
    view::{SubscriptionView, resolve_view},
};
use crate::{
    api::{ApiRequest, error_for_status},
    auth::{Role, SessionManager},
    error::{ClientError, Result},
    reliability::{RetryPolicy, is_retryable, retry_with_backoff},
    security::audit::{AuditEvent, AuditEventType, audit_log},
    transport::{Transport, TransportResponse},
};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MutationBody<'a> {
    pharmacy_id: &'a PharmacyId,
    #[serde(skip_serializing_if = "Option::is_none")]
    plan_id: Option<&'a PlanId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    subscription_id: Option<&'a SubscriptionId>,
}

impl<'a> MutationBody<'a> {
    fn new(pharmacy_id: &'a PharmacyId) -> Self {
        Self { pharmacy_id, plan_id: None, subscription_id: None }
    }
}

/// Marks a pharmacy as having a mutation in flight until dropped.
struct PendingGuard<'a> {
    pending: &'a Mutex<HashSet<PharmacyId>>,
    pharmacy_id: PharmacyId,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner).remove(&self.pharmacy_id);
    }
}

/// Subscription lifecycle controller.
///
/// # Examples
///
/// ```rust,no_run
/// use std::sync::Arc;
///
/// use pharmacy_client::{
///     auth::{MemoryStore, SessionManager},
///     config::SessionSettings,
///     endpoints::Endpoints,
///     subscription::{PharmacyId, SubscriptionController},
///     transport::HttpTransport,
/// };
///
/// # async fn example() -> pharmacy_client::Result<()> {
/// let transport = HttpTransport::new("https://api.pharmacy.example/api")?;
/// let session = Arc::new(SessionManager::new(
///     transport,
///     Endpoints::default(),
///     SessionSettings::default(),
///     Arc::new(MemoryStore::new()),
/// ));
/// session.login("owner@pharmacy.example", "secret").await?;
///
/// let controller = SubscriptionController::new(Arc::clone(&session));
/// let pharmacy = PharmacyId::new("ph-1")?;
/// if controller.current(&pharmacy).await?.is_none() {
///     controller.start_free_trial(&pharmacy).await?;
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct SubscriptionController<T: Transport> {
    session: Arc<SessionManager<T>>,
    retry: RetryPolicy,
    pending: Mutex<HashSet<PharmacyId>>,
}

impl<T: Transport> SubscriptionController<T> {
    /// Creates a controller with the default read retry policy.
    #[must_use]
    pub fn new(session: Arc<SessionManager<T>>) -> Self {
        Self::with_retry_policy(session, RetryPolicy::default())
    }

    /// Creates a controller with a custom read retry policy.
    #[must_use]
    pub fn with_retry_policy(session: Arc<SessionManager<T>>, retry: RetryPolicy) -> Self {
        Self { session, retry, pending: Mutex::new(HashSet::new()) }
    }

    /// Session manager used for requests.
    #[must_use]
    pub fn session(&self) -> &Arc<SessionManager<T>> {
        &self.session
    }

    /// Current subscription of a pharmacy.
    ///
    /// Returns `None` when the pharmacy has no subscription yet, whether the
    /// backend says so with 404 or with a `null` body. Transient failures are
    /// retried.
    ///
    /// # Errors
    ///
    /// - [`ClientError::AccessDenied`] if the user may not see this pharmacy
    /// - session, transport and backend errors
    #[instrument(skip(self, pharmacy_id), fields(pharmacy_id = %pharmacy_id))]
    pub async fn current(&self, pharmacy_id: &PharmacyId) -> Result<Option<Subscription>> {
        let path = self.session.endpoints().current_subscription_for(pharmacy_id.as_str());
        retry_with_backoff(&self.retry, is_retryable, || self.fetch_current(&path)).await
    }

    async fn fetch_current(&self, path: &str) -> Result<Option<Subscription>> {
        let response = self.session.execute(ApiRequest::get(path)).await?;
        if response.status == 404 {
            return Ok(None);
        }
        if !response.is_success() {
            return Err(error_for_status(&response));
        }
        if response.is_null() {
            return Ok(None);
        }
        response.json().map(Some)
    }

    /// Past and present subscriptions of a pharmacy.
    ///
    /// # Errors
    ///
    /// - [`ClientError::NotFound`] if the backend does not know the pharmacy
    /// - [`ClientError::AccessDenied`] if the user may not see this pharmacy
    #[instrument(skip(self, pharmacy_id), fields(pharmacy_id = %pharmacy_id))]
    pub async fn history(&self, pharmacy_id: &PharmacyId) -> Result<Vec<Subscription>> {
        let path = self.session.endpoints().history_for(pharmacy_id.as_str());
        retry_with_backoff(&self.retry, is_retryable, || self.fetch_list(&path)).await
    }

    /// Plans offered to subscribers.
    ///
    /// # Errors
    ///
    /// Session, transport and backend errors.
    #[instrument(skip(self))]
    pub async fn plans(&self) -> Result<Vec<Plan>> {
        let path = self.session.endpoints().plans.as_str();
        retry_with_backoff(&self.retry, is_retryable, || self.fetch_list(path)).await
    }

    async fn fetch_list<V: DeserializeOwned>(&self, path: &str) -> Result<Vec<V>> {
        let response = self.session.execute(ApiRequest::get(path)).await?;
        if !response.is_success() {
            return Err(error_for_status(&response));
        }
        if response.is_null() {
            return Ok(Vec::new());
        }
        response.json()
    }

    /// Starts the free trial and returns the re-fetched subscription.
    ///
    /// # Errors
    ///
    /// - [`ClientError::TrialAlreadyUsed`] if the pharmacy had a trial before
    /// - [`ClientError::OperationInProgress`] if another mutation for this
    ///   pharmacy is pending
    #[instrument(skip(self, pharmacy_id), fields(pharmacy_id = %pharmacy_id))]
    pub async fn start_free_trial(&self, pharmacy_id: &PharmacyId) -> Result<Option<Subscription>> {
        let path = self.session.endpoints().start_trial.as_str();
        self.mutate(pharmacy_id, path, MutationBody::new(pharmacy_id), AuditEventType::TrialStarted)
            .await
    }

    /// Switches the pharmacy to `plan_id` and returns the re-fetched subscription.
    ///
    /// # Errors
    ///
    /// - [`ClientError::OperationInProgress`] if another mutation for this
    ///   pharmacy is pending
    /// - [`ClientError::BadRequest`] if the backend refuses the plan
    #[instrument(skip(self, pharmacy_id, plan_id), fields(pharmacy_id = %pharmacy_id, plan_id = %plan_id))]
    pub async fn change_plan(
        &self,
        pharmacy_id: &PharmacyId,
        plan_id: &PlanId,
    ) -> Result<Option<Subscription>> {
        let path = self.session.endpoints().change_plan.as_str();
        let body = MutationBody { plan_id: Some(plan_id), ..MutationBody::new(pharmacy_id) };
        self.mutate(pharmacy_id, path, body, AuditEventType::PlanChanged).await
    }

    /// Cancels the subscription and returns the re-fetched record.
    ///
    /// Access normally continues until the current period ends; the backend
    /// decides.
    ///
    /// # Errors
    ///
    /// - [`ClientError::OperationInProgress`] if another mutation for this
    ///   pharmacy is pending
    #[instrument(
        skip(self, pharmacy_id, subscription_id),
        fields(pharmacy_id = %pharmacy_id, subscription_id = %subscription_id)
    )]
    pub async fn cancel(
        &self,
        pharmacy_id: &PharmacyId,
        subscription_id: &SubscriptionId,
    ) -> Result<Option<Subscription>> {
        let path = self.session.endpoints().cancel.as_str();
        let body =
            MutationBody { subscription_id: Some(subscription_id), ..MutationBody::new(pharmacy_id) };
        self.mutate(pharmacy_id, path, body, AuditEventType::SubscriptionCanceled).await
    }

    /// Renews an ended subscription and returns the re-fetched record.
    ///
    /// # Errors
    ///
    /// - [`ClientError::OperationInProgress`] if another mutation for this
    ///   pharmacy is pending
    #[instrument(
        skip(self, pharmacy_id, subscription_id),
        fields(pharmacy_id = %pharmacy_id, subscription_id = %subscription_id)
    )]
    pub async fn renew(
        &self,
        pharmacy_id: &PharmacyId,
        subscription_id: &SubscriptionId,
    ) -> Result<Option<Subscription>> {
        let path = self.session.endpoints().renew.as_str();
        let body =
            MutationBody { subscription_id: Some(subscription_id), ..MutationBody::new(pharmacy_id) };
        self.mutate(pharmacy_id, path, body, AuditEventType::SubscriptionRenewed).await
    }

    /// Resolves what the subscription screen should show.
    ///
    /// Never fails: errors become [`SubscriptionView`] variants.
    pub async fn view(&self, pharmacy_id: &PharmacyId, role: Role) -> SubscriptionView {
        resolve_view(self.current(pharmacy_id).await, role)
    }

    async fn mutate(
        &self,
        pharmacy_id: &PharmacyId,
        path: &str,
        body: MutationBody<'_>,
        event: AuditEventType,
    ) -> Result<Option<Subscription>> {
        let _pending = self.begin(pharmacy_id)?;
        let request_id = Uuid::new_v4();
        let started = Instant::now();

        let payload = serde_json::to_vec(&body)
            .map_err(|e| ClientError::InvalidInput(format!("failed to encode request: {e}")))?;
        let response = self
            .session
            .execute(ApiRequest::post(path, &payload).with_request_id(request_id))
            .await?;

        if !response.is_success() {
            let error = mutation_error(event, &response);
            tracing::warn!(status = response.status, error = %error, "Subscription mutation rejected");
            return Err(error);
        }

        let actor = self.session.current_user().await.map_or_else(|| "anonymous".to_owned(), |u| u.id);
        let audit_event = AuditEvent::new(event, actor, request_id)
            .with_pharmacy_id(pharmacy_id.as_str())
            .with_duration(started.elapsed());
        let audit_event = match (body.plan_id, body.subscription_id) {
            (Some(plan_id), _) => audit_event.with_plan_id(plan_id.as_str()),
            (None, Some(subscription_id)) => audit_event.with_subscription_id(subscription_id.as_str()),
            (None, None) => audit_event,
        };
        audit_log(&audit_event);

        self.current(pharmacy_id).await.map_err(|e| {
            tracing::warn!(error = %e, "Mutation applied but re-fetch failed");
            ClientError::RefetchFailed(Box::new(e))
        })
    }

    fn begin(&self, pharmacy_id: &PharmacyId) -> Result<PendingGuard<'_>> {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        if !pending.insert(pharmacy_id.clone()) {
            tracing::debug!(pharmacy_id = %pharmacy_id, "Mutation already pending");
            return Err(ClientError::OperationInProgress(pharmacy_id.to_string()));
        }
        Ok(PendingGuard { pending: &self.pending, pharmacy_id: pharmacy_id.clone() })
    }
}

fn mutation_error(event: AuditEventType, response: &TransportResponse) -> ClientError {
    if event == AuditEventType::TrialStarted {
        let trial_used = match response.status {
            409 => true,
            400 => response.message().to_lowercase().contains("trial"),
            _ => false,
        };
        if trial_used {
            return ClientError::TrialAlreadyUsed;
        }
    }
    error_for_status(response)
}
