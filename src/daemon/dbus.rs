use crate::core::AccountDiagnostics;
use crate::daemon::{DBUS_NAME, DBUS_PATH};
use anyhow::{Context, Result};
use tokio::sync::{mpsc, oneshot};
use zbus::interface;

pub type RefreshReply = oneshot::Sender<std::result::Result<(), CommandRejected>>;
pub type StatusReply =
    oneshot::Sender<std::result::Result<Vec<AccountDiagnostics>, CommandRejected>>;

/// Requests from D-Bus callers. `account: None` means every ready account.
#[derive(Debug)]
pub enum DbusCommand {
    Refresh {
        account: Option<String>,
        reply: RefreshReply,
    },
    Status {
        account: Option<String>,
        reply: StatusReply,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandRejected {
    #[error("Unknown account: {0}")]
    UnknownAccount(String),

    #[error("Account {0} is not ready yet")]
    NotReady(String),

    #[error("{0}")]
    Failed(String),
}

pub struct SmolMonitorService {
    commands: mpsc::UnboundedSender<DbusCommand>,
}

impl SmolMonitorService {
    pub fn new(commands: mpsc::UnboundedSender<DbusCommand>) -> Self {
        Self { commands }
    }

    async fn request_refresh(&self, account: Option<String>) -> zbus::fdo::Result<()> {
        let (reply, response) = oneshot::channel();
        self.send(DbusCommand::Refresh { account, reply })?;
        into_fdo(response.await)
    }

    /// Current diagnostics as a JSON array of `AccountDiagnostics`.
    async fn request_status(&self, account: Option<String>) -> zbus::fdo::Result<String> {
        let (reply, response) = oneshot::channel();
        self.send(DbusCommand::Status { account, reply })?;
        let diagnostics = into_fdo(response.await)?;
        serde_json::to_string(&diagnostics).map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
    }

    fn send(&self, command: DbusCommand) -> zbus::fdo::Result<()> {
        self.commands
            .send(command)
            .map_err(|_| zbus::fdo::Error::Failed("Daemon is shutting down".to_string()))
    }
}

fn into_fdo<T>(
    response: std::result::Result<std::result::Result<T, CommandRejected>, oneshot::error::RecvError>,
) -> zbus::fdo::Result<T> {
    match response {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(CommandRejected::UnknownAccount(name))) => Err(zbus::fdo::Error::InvalidArgs(
            format!("Unknown account: {name}"),
        )),
        Ok(Err(e)) => Err(zbus::fdo::Error::Failed(e.to_string())),
        Err(_) => Err(zbus::fdo::Error::Failed(
            "Request was dropped before completing".to_string(),
        )),
    }
}

#[interface(name = "com.github.smolmonitor.Daemon")]
impl SmolMonitorService {
    async fn refresh(&self, account: &str) -> zbus::fdo::Result<()> {
        tracing::info!(account, "D-Bus Refresh called");
        self.request_refresh(Some(account.to_string())).await
    }

    async fn refresh_all(&self) -> zbus::fdo::Result<()> {
        tracing::info!("D-Bus RefreshAll called");
        self.request_refresh(None).await
    }

    async fn status(&self, account: &str) -> zbus::fdo::Result<String> {
        tracing::debug!(account, "D-Bus Status called");
        self.request_status(Some(account.to_string())).await
    }

    async fn status_all(&self) -> zbus::fdo::Result<String> {
        tracing::debug!("D-Bus StatusAll called");
        self.request_status(None).await
    }
}

pub async fn start_dbus_server(
    commands: mpsc::UnboundedSender<DbusCommand>,
) -> Result<zbus::Connection> {
    let connection = zbus::connection::Builder::session()
        .context("Failed to connect to session D-Bus")?
        .name(DBUS_NAME)
        .context("Failed to request D-Bus name")?
        .serve_at(DBUS_PATH, SmolMonitorService::new(commands))
        .context("Failed to register D-Bus interface")?
        .build()
        .await
        .with_context(|| format!("Failed to acquire {DBUS_NAME} - is another daemon running?"))?;

    tracing::info!(name = DBUS_NAME, path = DBUS_PATH, "D-Bus interface registered");
    Ok(connection)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_refresh_forwards_command_and_reply() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let service = SmolMonitorService::new(tx);

        let responder = tokio::spawn(async move {
            let Some(DbusCommand::Refresh { account, reply }) = rx.recv().await else {
                panic!("no command");
            };
            assert_eq!(account.as_deref(), Some("home"));
            reply.send(Ok(())).unwrap();
        });

        service.request_refresh(Some("home".to_string())).await.unwrap();
        responder.await.unwrap();
    }

    #[tokio::test]
    async fn test_unknown_account_is_invalid_args() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let service = SmolMonitorService::new(tx);

        tokio::spawn(async move {
            if let Some(DbusCommand::Refresh { account, reply }) = rx.recv().await {
                let _ = reply.send(Err(CommandRejected::UnknownAccount(account.unwrap_or_default())));
            }
        });

        let err = service.request_refresh(Some("cabin".to_string())).await.unwrap_err();
        assert!(matches!(err, zbus::fdo::Error::InvalidArgs(_)));
    }

    #[tokio::test]
    async fn test_status_returns_diagnostics_as_json() {
        use crate::core::models::fixtures::{policy, snapshot};
        use crate::core::{ErrorKind, RefreshState};
        use chrono::Utc;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let service = SmolMonitorService::new(tx);
        let state = RefreshState::succeeded(Utc::now(), policy(), snapshot("S"))
            .failed(ErrorKind::Server);
        let expected = state.diagnostics("home");

        let responder = tokio::spawn({
            let expected = expected.clone();
            async move {
                let Some(DbusCommand::Status { account, reply }) = rx.recv().await else {
                    panic!("no command");
                };
                assert!(account.is_none());
                reply.send(Ok(vec![expected])).unwrap();
            }
        });

        let json = service.request_status(None).await.unwrap();
        responder.await.unwrap();

        let decoded: Vec<AccountDiagnostics> = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, vec![expected]);
    }

    #[tokio::test]
    async fn test_status_of_unready_account_fails() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let service = SmolMonitorService::new(tx);

        tokio::spawn(async move {
            if let Some(DbusCommand::Status { account, reply }) = rx.recv().await {
                let _ = reply.send(Err(CommandRejected::NotReady(account.unwrap_or_default())));
            }
        });

        let err = service.request_status(Some("home".to_string())).await.unwrap_err();
        assert!(matches!(err, zbus::fdo::Error::Failed(ref m) if m.contains("not ready")));
    }

    #[tokio::test]
    async fn test_closed_channel_fails() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let service = SmolMonitorService::new(tx);
        assert!(service.request_refresh(None).await.is_err());
    }
}
