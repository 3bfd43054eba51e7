pub mod coordinator;
mod dbus;
mod polling;

use crate::api::SmolApiClient;
use crate::core::notifications::{AlertSink, DesktopAlertSink};
use crate::core::retry::setup_retry_delay;
use crate::core::settings::Settings;
use crate::core::store::{FileStore, SnapshotCache};
use anyhow::Result;
use chrono::Utc;
use coordinator::{AccountContext, AccountCoordinator, SetupError};
use dbus::DbusCommand;
use polling::PollingLoop;
use std::sync::Arc;
use tokio::sync::mpsc;

pub const DBUS_NAME: &str = "com.github.smolmonitor.Daemon";
pub const DBUS_PATH: &str = "/com/github/smolmonitor/Daemon";

pub async fn run(settings: Settings) -> Result<()> {
    tracing::info!(accounts = settings.accounts.len(), "Starting smol-monitor daemon");
    settings.validate()?;
    if settings.accounts.is_empty() {
        anyhow::bail!("No accounts configured. Add an [[accounts]] entry to the config file.");
    }

    let store = Arc::new(FileStore::open_default()?);
    tracing::info!(root = %store.root().display(), "Using snapshot store");
    let cache = SnapshotCache::new(store);
    let alerts: Arc<dyn AlertSink> = Arc::new(DesktopAlertSink::new());
    let policy = settings.refresh.policy();

    let (command_tx, command_rx) = mpsc::unbounded_channel::<DbusCommand>();
    let _dbus_connection = dbus::start_dbus_server(command_tx).await?;

    let (ready_tx, ready_rx) = mpsc::unbounded_channel::<Arc<AccountCoordinator>>();
    let mut setups = Vec::new();
    for account in &settings.accounts {
        let context = AccountContext {
            name: account.name.clone(),
            api: Arc::new(SmolApiClient::new(account, &settings.api)),
            cache: cache.clone(),
            alerts: Arc::clone(&alerts),
            policy,
        };
        setups.push(tokio::spawn(setup_with_retry(context, ready_tx.clone())));
    }
    drop(ready_tx);

    let mut polling = PollingLoop::new(
        settings.refresh.tick_interval(),
        settings.accounts.iter().map(|a| a.name.clone()),
    );
    polling.run(ready_rx, command_rx).await;

    for setup in &setups {
        setup.abort();
    }
    polling.shutdown().await;
    tracing::info!("Daemon stopped");
    Ok(())
}

/// Retries an account's startup until it has something to serve.
async fn setup_with_retry(
    context: AccountContext,
    ready_tx: mpsc::UnboundedSender<Arc<AccountCoordinator>>,
) {
    let mut failures = 0u32;

    loop {
        match coordinator::setup(&context, Utc::now()).await {
            Ok(state) => {
                let _ = ready_tx.send(Arc::new(AccountCoordinator::new(context, state)));
                return;
            }
            Err(SetupError::NotReady { account, reason }) => {
                failures = failures.saturating_add(1);
                let delay = setup_retry_delay(failures);
                tracing::warn!(%account, %reason, ?delay, "Account not ready, will retry");
                tokio::time::sleep(delay).await;
            }
            Err(SetupError::Fatal(e)) => {
                tracing::error!(account = %context.name, error = %e, "Account setup failed");
                context.api.close().await;
                return;
            }
        }
    }
}
