use crate::daemon::coordinator::AccountCoordinator;
use crate::daemon::dbus::{CommandRejected, DbusCommand, RefreshReply};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

/// Drives every ready account from one timer.
///
/// Ticks are cheap: a coordinator only calls the API once its state is due.
/// Accounts join as their setup completes; D-Bus refreshes run as manual
/// evaluations on their own task so a slow manual fetch never delays ticks
/// for other accounts.
pub struct PollingLoop {
    tick: Duration,
    configured: HashSet<String>,
    coordinators: Vec<Arc<AccountCoordinator>>,
}

impl PollingLoop {
    pub fn new(tick: Duration, configured: impl IntoIterator<Item = String>) -> Self {
        Self {
            tick,
            configured: configured.into_iter().collect(),
            coordinators: Vec::new(),
        }
    }

    pub async fn run(
        &mut self,
        mut ready_rx: mpsc::UnboundedReceiver<Arc<AccountCoordinator>>,
        mut command_rx: mpsc::UnboundedReceiver<DbusCommand>,
    ) {
        tracing::info!(interval = ?self.tick, "Polling loop started");

        let mut interval = tokio::time::interval(self.tick);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => self.tick_all().await,
                Some(coordinator) = ready_rx.recv() => {
                    tracing::info!(account = %coordinator.name(), "Account ready");
                    self.coordinators.push(coordinator);
                }
                Some(command) = command_rx.recv() => self.handle_command(command),
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Shutdown requested");
                    break;
                }
            }
        }
    }

    async fn tick_all(&self) {
        for coordinator in &self.coordinators {
            if let Err(e) = coordinator.refresh(false).await {
                tracing::error!(account = %coordinator.name(), error = %e, "Account refresh failed");
            }
        }
    }

    fn handle_command(&self, command: DbusCommand) {
        match command {
            DbusCommand::Refresh { account, reply } => {
                match self.targets(account.as_deref()) {
                    Ok(targets) => {
                        tokio::spawn(manual_refresh(targets, reply));
                    }
                    Err(rejected) => {
                        let _ = reply.send(Err(rejected));
                    }
                }
            }
            DbusCommand::Status { account, reply } => {
                let diagnostics = self
                    .targets(account.as_deref())
                    .map(|targets| targets.iter().map(|c| c.diagnostics()).collect());
                let _ = reply.send(diagnostics);
            }
        }
    }

    fn targets(
        &self,
        account: Option<&str>,
    ) -> Result<Vec<Arc<AccountCoordinator>>, CommandRejected> {
        let Some(name) = account else {
            return Ok(self.coordinators.clone());
        };

        if !self.configured.contains(name) {
            return Err(CommandRejected::UnknownAccount(name.to_string()));
        }

        let targets: Vec<_> = self
            .coordinators
            .iter()
            .filter(|c| c.name() == name)
            .cloned()
            .collect();

        if targets.is_empty() {
            return Err(CommandRejected::NotReady(name.to_string()));
        }
        Ok(targets)
    }

    /// Releases every account's credentials.
    pub async fn shutdown(&mut self) {
        for coordinator in self.coordinators.drain(..) {
            coordinator.close().await;
        }
    }
}

async fn manual_refresh(targets: Vec<Arc<AccountCoordinator>>, reply: RefreshReply) {
    let mut failures = Vec::new();

    for coordinator in targets {
        match coordinator.refresh(true).await {
            Ok(state) => match state.last_error() {
                Some(error) => failures.push(format!("{}: {error}", coordinator.name())),
                None => tracing::info!(account = %coordinator.name(), "Manual refresh complete"),
            },
            Err(e) => {
                tracing::error!(account = %coordinator.name(), error = %e, "Manual refresh failed");
                failures.push(format!("{}: {e}", coordinator.name()));
            }
        }
    }

    let result = if failures.is_empty() {
        Ok(())
    } else {
        Err(CommandRejected::Failed(failures.join("; ")))
    };
    let _ = reply.send(result);
}
