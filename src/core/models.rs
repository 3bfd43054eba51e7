use crate::core::error::ErrorKind;
use crate::core::retry::calculate_next_refresh;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub type_id: String,
    pub name: String,
    pub pack_size: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: String,
    pub next_charge_scheduled_at: Option<DateTime<Utc>>,
    pub product: Product,
    pub address: Address,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HolidayMode {
    pub end_date: Option<DateTime<Utc>>,
}

/// Point-in-time view of an account. Never mutated; a changed account is a
/// new snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountSnapshot {
    pub holiday_mode: Option<HolidayMode>,
    pub subscriptions: Vec<Subscription>,
}

impl AccountSnapshot {
    pub fn is_on_holiday(&self, now: DateTime<Utc>) -> bool {
        match &self.holiday_mode {
            Some(HolidayMode {
                end_date: Some(end),
            }) => *end > now,
            Some(HolidayMode { end_date: None }) => true,
            None => false,
        }
    }

    pub fn holiday_end_date(&self) -> Option<DateTime<Utc>> {
        self.holiday_mode.as_ref().and_then(|h| h.end_date)
    }

    pub fn next_charge(&self) -> Option<&Subscription> {
        self.subscriptions
            .iter()
            .filter(|s| s.next_charge_scheduled_at.is_some())
            .min_by_key(|s| s.next_charge_scheduled_at)
    }

    pub fn subscription(&self, id: &str) -> Option<&Subscription> {
        self.subscriptions.iter().find(|s| s.id == id)
    }
}

/// Parameters that shape `next_refresh`; fixed for the life of an account.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RefreshPolicy {
    pub rate_minutes: f64,
    pub backoff_base_minutes: f64,
    pub backoff_max_step_minutes: f64,
    pub backoff_ceiling_minutes: f64,
}

/// A daemon's view of one account, as reported by its `Status` method.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountDiagnostics {
    pub account: String,
    pub attempts: u32,
    pub last_evaluated: DateTime<Utc>,
    pub last_retrieved: DateTime<Utc>,
    pub next_refresh: DateTime<Utc>,
    pub last_error: Option<String>,
    pub snapshot: Option<AccountSnapshot>,
}

/// The coordinator's retained memory for one account.
///
/// Replaced wholesale on every evaluation. `next_refresh` is derived from
/// `(last_evaluated, attempts, policy)` in the constructor and has no setter.
#[derive(Debug, Clone)]
pub struct RefreshState {
    last_evaluated: DateTime<Utc>,
    last_retrieved: DateTime<Utc>,
    next_refresh: DateTime<Utc>,
    attempts: u32,
    policy: RefreshPolicy,
    last_error: Option<ErrorKind>,
    snapshot: Option<Arc<AccountSnapshot>>,
}

impl RefreshState {
    pub fn new(
        last_evaluated: DateTime<Utc>,
        attempts: u32,
        policy: RefreshPolicy,
        snapshot: Option<Arc<AccountSnapshot>>,
        last_error: Option<ErrorKind>,
        last_retrieved: Option<DateTime<Utc>>,
    ) -> Self {
        let attempts = attempts.max(1);
        let next_refresh = calculate_next_refresh(last_evaluated, attempts, &policy);

        tracing::debug!(
            %last_evaluated,
            attempts,
            rate_minutes = policy.rate_minutes,
            %next_refresh,
            last_error = ?last_error,
            "Refresh state evaluated"
        );

        Self {
            last_evaluated,
            last_retrieved: last_retrieved.unwrap_or(last_evaluated),
            next_refresh,
            attempts,
            policy,
            last_error,
            snapshot,
        }
    }

    /// State after a successful fetch at `now`.
    pub fn succeeded(now: DateTime<Utc>, policy: RefreshPolicy, snapshot: AccountSnapshot) -> Self {
        Self::new(now, 1, policy, Some(Arc::new(snapshot)), None, None)
    }

    /// State after another failed fetch; keeps the last good snapshot.
    pub fn failed(&self, error: ErrorKind) -> Self {
        Self::new(
            self.last_evaluated,
            self.attempts.saturating_add(1),
            self.policy,
            self.snapshot.clone(),
            Some(error),
            Some(self.last_retrieved),
        )
    }

    pub fn last_evaluated(&self) -> DateTime<Utc> {
        self.last_evaluated
    }

    pub fn last_retrieved(&self) -> DateTime<Utc> {
        self.last_retrieved
    }

    pub fn next_refresh(&self) -> DateTime<Utc> {
        self.next_refresh
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn last_error(&self) -> Option<&ErrorKind> {
        self.last_error.as_ref()
    }

    pub fn snapshot(&self) -> Option<&Arc<AccountSnapshot>> {
        self.snapshot.as_ref()
    }

    pub fn is_degraded(&self) -> bool {
        self.attempts > 1
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        now >= self.next_refresh
    }

    pub fn diagnostics(&self, account: &str) -> AccountDiagnostics {
        AccountDiagnostics {
            account: account.to_string(),
            attempts: self.attempts,
            last_evaluated: self.last_evaluated,
            last_retrieved: self.last_retrieved,
            next_refresh: self.next_refresh,
            last_error: self.last_error.as_ref().map(ToString::to_string),
            snapshot: self.snapshot.as_deref().cloned(),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::{policy, snapshot};
    use super::*;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 18, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_holiday_mode_checks() {
        let mut snap = snapshot("LAUNDRY");
        assert!(snap.is_on_holiday(now()));
        assert_eq!(
            snap.holiday_end_date(),
            Some(Utc.with_ymd_and_hms(2026, 11, 1, 0, 0, 0).unwrap())
        );

        snap.holiday_mode = Some(HolidayMode {
            end_date: Some(now() - Duration::days(1)),
        });
        assert!(!snap.is_on_holiday(now()));

        snap.holiday_mode = None;
        assert!(!snap.is_on_holiday(now()));
        assert!(snap.holiday_end_date().is_none());
    }

    #[test]
    fn test_next_charge_picks_earliest() {
        let mut snap = snapshot("LAUNDRY");
        let mut later = snap.subscriptions[0].clone();
        later.id = "sub-later".to_string();
        later.next_charge_scheduled_at = Some(now() + Duration::days(60));
        let mut unscheduled = snap.subscriptions[0].clone();
        unscheduled.id = "sub-none".to_string();
        unscheduled.next_charge_scheduled_at = None;
        snap.subscriptions.insert(0, later);
        snap.subscriptions.push(unscheduled);

        assert_eq!(snap.next_charge().unwrap().id, "sub-LAUNDRY");
        assert!(snap.subscription("sub-none").is_some());
        assert!(snap.subscription("missing").is_none());
    }

    #[test]
    fn test_succeeded_state_schedules_at_refresh_rate() {
        let state = RefreshState::succeeded(now(), policy(), snapshot("LAUNDRY"));
        assert_eq!(state.attempts(), 1);
        assert_eq!(state.next_refresh(), now() + Duration::minutes(60));
        assert_eq!(state.last_retrieved(), now());
        assert!(state.last_error().is_none());
        assert!(!state.is_degraded());
        assert!(!state.is_due(now()));
        assert!(state.is_due(now() + Duration::minutes(60)));
    }

    #[test]
    fn test_failed_state_keeps_snapshot_and_last_evaluated() {
        let ok = RefreshState::succeeded(now(), policy(), snapshot("LAUNDRY"));
        let failed = ok.failed(ErrorKind::Server);

        assert_eq!(failed.attempts(), 2);
        assert_eq!(failed.last_evaluated(), now());
        assert_eq!(failed.last_retrieved(), now());
        assert_eq!(failed.last_error(), Some(&ErrorKind::Server));
        assert_eq!(failed.snapshot(), ok.snapshot());
        assert!(failed.is_degraded());
        assert!(failed.next_refresh() > ok.next_refresh());
    }

    #[test]
    fn test_diagnostics_reflect_degraded_state() {
        let failed = RefreshState::succeeded(now(), policy(), snapshot("LAUNDRY"))
            .failed(ErrorKind::Timeout);
        let diagnostics = failed.diagnostics("home");

        assert_eq!(diagnostics.account, "home");
        assert_eq!(diagnostics.attempts, 2);
        assert_eq!(diagnostics.last_retrieved, now());
        assert_eq!(diagnostics.next_refresh, failed.next_refresh());
        assert_eq!(diagnostics.last_error, Some(ErrorKind::Timeout.to_string()));
        assert_eq!(diagnostics.snapshot, Some(snapshot("LAUNDRY")));

        let json = serde_json::to_string(&diagnostics).unwrap();
        let back: AccountDiagnostics = serde_json::from_str(&json).unwrap();
        assert_eq!(back, diagnostics);
    }

    #[test]
    fn test_attempts_never_below_one() {
        let state = RefreshState::new(now(), 0, policy(), None, None, None);
        assert_eq!(state.attempts(), 1);
    }

    #[test]
    fn test_snapshot_serialization_roundtrip() {
        let snap = snapshot("LAUNDRY");
        let json = serde_json::to_string(&snap).unwrap();
        let back: AccountSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back, snap);
    }
}
