use crate::api::{ApiError, Classified, SmolApiClient};
use crate::cli::{daemon_destination, format_time_until, load_settings, session_bus};
use crate::core::settings::AccountConfig;
use crate::core::store::{FileStore, SnapshotCache};
use crate::core::{AccountDiagnostics, AccountSnapshot};
use anyhow::{Context, Result};
use chrono::{DateTime, Local, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Serialize)]
struct StatusOutput {
    accounts: BTreeMap<String, AccountStatus>,
    #[serde(with = "chrono::serde::ts_seconds")]
    fetched_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum Source {
    Daemon,
    Live,
    Cache,
    Unavailable,
}

#[derive(Serialize)]
struct AccountStatus {
    source: Source,
    #[serde(skip_serializing_if = "Option::is_none")]
    retrieved_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    on_holiday: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    holiday_end_date: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    next_charge_subscription: Option<String>,
    subscriptions: Vec<SubscriptionStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    attempts: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    next_refresh: Option<DateTime<Utc>>,
}

#[derive(Serialize)]
struct SubscriptionStatus {
    id: String,
    product: String,
    type_id: String,
    pack_size: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    next_charge: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    next_charge_in: Option<String>,
}

pub async fn run(json: bool, account_filter: Option<String>) -> Result<()> {
    let settings = load_settings()?;
    let accounts = settings.select_accounts(account_filter.as_deref())?;
    let cache = SnapshotCache::new(Arc::new(FileStore::open_default()?));

    let mut from_daemon: BTreeMap<String, AccountDiagnostics> =
        match query_daemon(account_filter.as_deref()).await {
            Ok(diagnostics) => diagnostics
                .into_iter()
                .map(|d| (d.account.clone(), d))
                .collect(),
            Err(e) => {
                tracing::debug!(error = %e, "Daemon state unavailable, fetching directly");
                BTreeMap::new()
            }
        };

    let mut results = BTreeMap::new();
    for account in accounts {
        if let Some(diagnostics) = from_daemon.remove(&account.name) {
            results.insert(account.name.clone(), daemon_status(diagnostics, Utc::now()));
            continue;
        }

        let client = SmolApiClient::new(account, &settings.api);
        let result = client.get_account().await;
        let status = account_status(account, result, &cache, Utc::now()).await;
        client.close().await;
        results.insert(account.name.clone(), status);
    }

    if json {
        let output = StatusOutput {
            accounts: results,
            fetched_at: Utc::now(),
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        print_text_output(&results);
    }

    Ok(())
}

/// What a running daemon currently serves, without touching the API.
async fn query_daemon(account: Option<&str>) -> Result<Vec<AccountDiagnostics>> {
    let connection = session_bus().await?;
    let (name, path) = daemon_destination();

    let reply = match account {
        Some(account) => {
            connection
                .call_method(Some(name), path, Some(name), "Status", &(account,))
                .await
        }
        None => {
            connection
                .call_method(Some(name), path, Some(name), "StatusAll", &())
                .await
        }
    };

    let json: String = reply
        .context("Status failed - is the daemon running?")?
        .body()
        .deserialize()
        .context("Failed to deserialize response")?;

    serde_json::from_str(&json).context("Daemon returned invalid status")
}

fn daemon_status(diagnostics: AccountDiagnostics, now: DateTime<Utc>) -> AccountStatus {
    let mut status = match &diagnostics.snapshot {
        Some(snapshot) => snapshot_status(
            Source::Daemon,
            snapshot,
            diagnostics.last_retrieved,
            now,
            diagnostics.last_error.clone(),
        ),
        None => unavailable(
            diagnostics
                .last_error
                .clone()
                .unwrap_or_else(|| "No account data yet".to_string()),
        ),
    };
    status.attempts = Some(diagnostics.attempts);
    status.next_refresh = Some(diagnostics.next_refresh);
    status
}

/// Live data when available. Classified failures fall back to the cached
/// snapshot the daemon last wrote.
async fn account_status(
    account: &AccountConfig,
    result: Result<Classified<AccountSnapshot>, ApiError>,
    cache: &SnapshotCache,
    now: DateTime<Utc>,
) -> AccountStatus {
    let error = match result {
        Ok(Classified::Data(snapshot)) => {
            return snapshot_status(Source::Live, &snapshot, now, now, None);
        }
        Ok(Classified::Absent) => {
            return unavailable("Account not found".to_string());
        }
        Err(e) if e.kind().is_none() => return unavailable(e.to_string()),
        Err(e) => e,
    };

    match cache.load(&account.name).await {
        Some(cached) => snapshot_status(
            Source::Cache,
            &cached.account,
            cached.saved_at,
            now,
            Some(error.to_string()),
        ),
        None => unavailable(error.to_string()),
    }
}

fn unavailable(error: String) -> AccountStatus {
    AccountStatus {
        source: Source::Unavailable,
        retrieved_at: None,
        on_holiday: None,
        holiday_end_date: None,
        next_charge_subscription: None,
        subscriptions: Vec::new(),
        error: Some(error),
        attempts: None,
        next_refresh: None,
    }
}

fn snapshot_status(
    source: Source,
    snapshot: &AccountSnapshot,
    retrieved_at: DateTime<Utc>,
    now: DateTime<Utc>,
    error: Option<String>,
) -> AccountStatus {
    AccountStatus {
        source,
        retrieved_at: Some(retrieved_at),
        on_holiday: Some(snapshot.is_on_holiday(now)),
        holiday_end_date: snapshot.holiday_end_date(),
        next_charge_subscription: snapshot.next_charge().map(|s| s.id.clone()),
        subscriptions: snapshot
            .subscriptions
            .iter()
            .map(|s| SubscriptionStatus {
                id: s.id.clone(),
                product: s.product.name.clone(),
                type_id: s.product.type_id.clone(),
                pack_size: s.product.pack_size,
                next_charge: s.next_charge_scheduled_at,
                next_charge_in: s
                    .next_charge_scheduled_at
                    .map(|at| format_time_until(at, now)),
            })
            .collect(),
        error,
        attempts: None,
        next_refresh: None,
    }
}

fn print_text_output(results: &BTreeMap<String, AccountStatus>) {
    for (i, (name, status)) in results.iter().enumerate() {
        if i > 0 {
            println!();
        }

        match (status.source, status.retrieved_at) {
            (Source::Cache, Some(at)) => println!(
                "{} (cached from {})",
                name,
                at.with_timezone(&Local).format("%Y-%m-%d %H:%M")
            ),
            (Source::Daemon, Some(at)) => println!(
                "{} (daemon, retrieved {})",
                name,
                at.with_timezone(&Local).format("%Y-%m-%d %H:%M")
            ),
            _ => println!("{}", name),
        }

        if let (Some(attempts), Some(next)) = (status.attempts, status.next_refresh) {
            if attempts > 1 {
                println!(
                    "  Retrying: {} failed attempt(s), next at {}",
                    attempts - 1,
                    next.with_timezone(&Local).format("%Y-%m-%d %H:%M")
                );
            }
        }

        if let Some(error) = &status.error {
            println!("  Error: {}", error);
        }
        if status.source == Source::Unavailable {
            continue;
        }

        match (status.on_holiday, status.holiday_end_date) {
            (Some(true), Some(end)) => println!(
                "  Holiday: until {}",
                end.with_timezone(&Local).format("%Y-%m-%d")
            ),
            (Some(true), None) => println!("  Holiday: on"),
            _ => println!("  Holiday: off"),
        }

        for sub in &status.subscriptions {
            let marker = if status.next_charge_subscription.as_ref() == Some(&sub.id) {
                '*'
            } else {
                ' '
            };
            let next = match (&sub.next_charge, &sub.next_charge_in) {
                (Some(at), Some(rel)) => format!(
                    "next charge {} (in {})",
                    at.with_timezone(&Local).format("%Y-%m-%d"),
                    rel
                ),
                _ => "no charge scheduled".to_string(),
            };
            println!(
                " {}{:<24} x{:<3} {}  [{}]",
                marker, sub.product, sub.pack_size, next, sub.id
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::fixtures::snapshot;
    use crate::core::store::memory::MemoryStore;
    use crate::core::ErrorKind;
    use chrono::TimeZone;

    fn account() -> AccountConfig {
        AccountConfig {
            name: "home".to_string(),
            username: "u@example.com".to_string(),
            password: "p".to_string(),
            market: "GB".to_string(),
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 18, 12, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_live_status() {
        let cache = SnapshotCache::new(Arc::new(MemoryStore::default()));
        let status = account_status(
            &account(),
            Ok(Classified::Data(snapshot("LAUNDRY"))),
            &cache,
            now(),
        )
        .await;

        assert_eq!(status.source, Source::Live);
        assert_eq!(status.on_holiday, Some(true));
        assert_eq!(status.subscriptions.len(), 1);
        assert_eq!(status.subscriptions[0].next_charge_in.as_deref(), Some("26d 17h"));
        assert_eq!(
            status.next_charge_subscription.as_deref(),
            Some(status.subscriptions[0].id.as_str())
        );
        assert!(status.error.is_none());
    }

    #[tokio::test]
    async fn test_classified_error_falls_back_to_cache() {
        let cache = SnapshotCache::new(Arc::new(MemoryStore::default()));
        let saved_at = now() - chrono::Duration::hours(2);
        cache.save("home", &snapshot("CACHED"), saved_at).await.unwrap();

        let status = account_status(
            &account(),
            Err(ErrorKind::Timeout.into()),
            &cache,
            now(),
        )
        .await;

        assert_eq!(status.source, Source::Cache);
        assert_eq!(status.retrieved_at, Some(saved_at));
        assert_eq!(status.subscriptions[0].type_id, "CACHED");
        assert_eq!(status.error.as_deref(), Some(ErrorKind::Timeout.to_string().as_str()));
    }

    #[tokio::test]
    async fn test_fatal_error_does_not_use_cache() {
        let cache = SnapshotCache::new(Arc::new(MemoryStore::default()));
        cache.save("home", &snapshot("CACHED"), now()).await.unwrap();

        let status = account_status(
            &account(),
            Err(ApiError::malformed("http://x", "eof")),
            &cache,
            now(),
        )
        .await;

        assert_eq!(status.source, Source::Unavailable);
        assert!(status.subscriptions.is_empty());
    }

    #[test]
    fn test_daemon_diagnostics_are_reported() {
        use crate::core::models::fixtures::policy;
        use crate::core::RefreshState;

        let retrieved = now() - chrono::Duration::hours(1);
        let state = RefreshState::succeeded(retrieved, policy(), snapshot("DAEMON"))
            .failed(ErrorKind::Server);
        let status = daemon_status(state.diagnostics("home"), now());

        assert_eq!(status.source, Source::Daemon);
        assert_eq!(status.retrieved_at, Some(retrieved));
        assert_eq!(status.attempts, Some(2));
        assert_eq!(status.next_refresh, Some(state.next_refresh()));
        assert_eq!(status.subscriptions[0].type_id, "DAEMON");
        assert_eq!(status.error, Some(ErrorKind::Server.to_string()));

        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["source"], "daemon");
        assert_eq!(json["attempts"], 2);
    }

    #[tokio::test]
    async fn test_absent_account_is_unavailable() {
        let cache = SnapshotCache::new(Arc::new(MemoryStore::default()));
        let status = account_status(&account(), Ok(Classified::Absent), &cache, now()).await;
        assert_eq!(status.source, Source::Unavailable);
        assert_eq!(status.error.as_deref(), Some("Account not found"));
    }
}
