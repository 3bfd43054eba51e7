//! Per-account refresh decisions.
//!
//! `RefreshState::attempts` is the whole state machine: 1 means the last
//! fetch succeeded, anything higher means the last good snapshot is being
//! served while retries back off.

use crate::api::{AccountApi, ApiError, Classified};
use crate::core::notifications::{account_not_found_message, alert_key, AlertSink, ACCOUNT_NOT_FOUND};
use crate::core::store::SnapshotCache;
use crate::core::{AccountDiagnostics, AccountSnapshot, ErrorKind, RefreshPolicy, RefreshState};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

pub const ACCOUNT_NOT_FOUND_MESSAGE: &str = "Account not found";

/// Everything one account's refreshes need, passed explicitly.
pub struct AccountContext {
    pub name: String,
    pub api: Arc<dyn AccountApi>,
    pub cache: SnapshotCache,
    pub alerts: Arc<dyn AlertSink>,
    pub policy: RefreshPolicy,
}

impl AccountContext {
    fn alert_key(&self) -> String {
        alert_key(ACCOUNT_NOT_FOUND, &self.name)
    }

    async fn raise_account_not_found(&self) {
        self.alerts
            .raise(&self.alert_key(), &account_not_found_message(&self.name))
            .await;
    }

    async fn clear_account_not_found(&self) {
        self.alerts.clear(&self.alert_key()).await;
    }

    async fn save_snapshot(&self, snapshot: &AccountSnapshot, now: DateTime<Utc>) {
        if let Err(e) = self.cache.save(&self.name, snapshot, now).await {
            warn!(account = %self.name, error = %e, "Failed to save account data");
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    /// Nothing to serve yet. The host should retry later.
    #[error("Failed to retrieve account information for {account}: {reason}")]
    NotReady { account: String, reason: String },

    #[error(transparent)]
    Fatal(#[from] ApiError),
}

impl SetupError {
    fn not_ready(context: &AccountContext, reason: impl ToString) -> Self {
        Self::NotReady {
            account: context.name.clone(),
            reason: reason.to_string(),
        }
    }
}

/// Builds the initial state for an account.
///
/// A live fetch is preferred. If it fails with anything but an
/// authentication error, the cached snapshot is served in degraded mode with
/// `attempts = 2`, so the first retry is already backed off.
pub async fn setup(context: &AccountContext, now: DateTime<Utc>) -> Result<RefreshState, SetupError> {
    let error = match context.api.fetch_account().await {
        Ok(Classified::Data(snapshot)) => {
            context.clear_account_not_found().await;
            context.save_snapshot(&snapshot, now).await;
            info!(account = %context.name, "Account information retrieved");
            return Ok(RefreshState::succeeded(now, context.policy, snapshot));
        }
        Ok(Classified::Absent) => {
            context.raise_account_not_found().await;
            return Err(SetupError::not_ready(context, ACCOUNT_NOT_FOUND_MESSAGE));
        }
        Err(err) => err,
    };

    let kind = match error.kind() {
        Some(kind) => kind.clone(),
        None => return Err(SetupError::Fatal(error)),
    };

    if kind.is_authentication() {
        context.raise_account_not_found().await;
        return Err(SetupError::not_ready(context, kind));
    }

    let Some(cached) = context.cache.load(&context.name).await else {
        return Err(SetupError::not_ready(context, kind));
    };

    warn!(
        account = %context.name,
        saved_at = %cached.saved_at,
        error = %kind,
        "Using cached account information during startup. This data will be updated automatically when available"
    );

    Ok(RefreshState::new(
        cached.saved_at,
        2,
        context.policy,
        Some(Arc::new(cached.account)),
        Some(kind),
        Some(cached.saved_at),
    ))
}

/// One coordinator tick.
///
/// Returns `previous` itself when nothing is due. Unclassified API errors
/// propagate and leave the caller's state untouched.
pub async fn evaluate(
    context: &AccountContext,
    now: DateTime<Utc>,
    previous: &Arc<RefreshState>,
    manual: bool,
) -> Result<Arc<RefreshState>, ApiError> {
    if !manual && !previous.is_due(now) {
        return Ok(Arc::clone(previous));
    }

    debug!(account = %context.name, manual, attempts = previous.attempts(), "Refreshing account");

    let kind = match context.api.fetch_account().await {
        Ok(Classified::Data(snapshot)) => {
            debug!(account = %context.name, "Account information retrieved");
            context.clear_account_not_found().await;
            context.save_snapshot(&snapshot, now).await;
            return Ok(Arc::new(RefreshState::succeeded(now, context.policy, snapshot)));
        }
        Ok(Classified::Absent) => {
            context.raise_account_not_found().await;
            ErrorKind::request(vec![ACCOUNT_NOT_FOUND_MESSAGE.to_string()])
        }
        Err(err) => match err.kind() {
            Some(kind) => {
                if kind.is_authentication() {
                    context.raise_account_not_found().await;
                }
                kind.clone()
            }
            None => return Err(err),
        },
    };

    let next = previous.failed(kind);
    if starts_failure_streak(&next) {
        warn!(
            account = %context.name,
            error = ?next.last_error(),
            "Failed to retrieve account information - using cached version"
        );
    }
    Ok(Arc::new(next))
}

/// Only the first failure after a success is worth a warning.
fn starts_failure_streak(state: &RefreshState) -> bool {
    state.attempts() == 2
}

/// Owns one account's state and serializes every evaluation against it.
pub struct AccountCoordinator {
    context: AccountContext,
    state: Mutex<Arc<RefreshState>>,
    published: watch::Sender<Arc<RefreshState>>,
}

impl AccountCoordinator {
    pub fn new(context: AccountContext, initial: RefreshState) -> Self {
        let initial = Arc::new(initial);
        let (published, _) = watch::channel(Arc::clone(&initial));
        Self {
            context,
            state: Mutex::new(initial),
            published,
        }
    }

    pub fn name(&self) -> &str {
        &self.context.name
    }

    /// Latest published state. Never blocks on an evaluation in progress.
    pub fn current(&self) -> Arc<RefreshState> {
        Arc::clone(&self.published.borrow())
    }

    pub fn diagnostics(&self) -> AccountDiagnostics {
        self.current().diagnostics(self.name())
    }

    pub async fn refresh(&self, manual: bool) -> Result<Arc<RefreshState>, ApiError> {
        self.refresh_at(Utc::now(), manual).await
    }

    pub async fn refresh_at(
        &self,
        now: DateTime<Utc>,
        manual: bool,
    ) -> Result<Arc<RefreshState>, ApiError> {
        let mut state = self.state.lock().await;
        let next = evaluate(&self.context, now, &state, manual).await?;

        if !Arc::ptr_eq(&next, &state) {
            info!(
                account = %self.context.name,
                attempts = next.attempts(),
                degraded = next.is_degraded(),
                last_retrieved = %next.last_retrieved(),
                next_refresh = %next.next_refresh(),
                "Account state updated"
            );
            *state = Arc::clone(&next);
            self.published.send_replace(Arc::clone(&next));
        }
        Ok(next)
    }

    pub async fn close(&self) {
        self.context.api.close().await;
    }
}
