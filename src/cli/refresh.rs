use crate::cli::{daemon_destination, session_bus};
use anyhow::{Context, Result};

pub async fn run(account: Option<String>) -> Result<()> {
    call_daemon(account.as_deref()).await?;

    match account {
        Some(name) => println!("Refreshed account {name}"),
        None => println!("Refreshed all accounts"),
    }
    Ok(())
}

/// Manual refresh through the running daemon's D-Bus interface.
pub(crate) async fn call_daemon(account: Option<&str>) -> Result<()> {
    let connection = session_bus().await?;
    let (name, path) = daemon_destination();

    let reply = match account {
        Some(account) => {
            connection
                .call_method(Some(name), path, Some(name), "Refresh", &(account,))
                .await
        }
        None => {
            connection
                .call_method(Some(name), path, Some(name), "RefreshAll", &())
                .await
        }
    };

    let _: () = reply
        .context("Refresh failed - is the daemon running?")?
        .body()
        .deserialize()
        .context("Failed to deserialize response")?;

    Ok(())
}
