use crate::api::SmolApiClient;
use crate::cli::{holiday_end_instant, load_settings, notify_daemon, single_account};
use anyhow::Result;
use chrono::{Local, NaiveDate, Utc};

pub async fn start(until: NaiveDate, account: Option<String>) -> Result<()> {
    let settings = load_settings()?;
    let account = single_account(&settings, account.as_deref())?;
    let end_date = holiday_end_instant(until, &Local, Utc::now())?;

    let client = SmolApiClient::new(account, &settings.api);
    let applied = client.start_holiday(end_date).await;
    client.close().await;

    if !applied? {
        anyhow::bail!("Failed to start holiday mode for {}", account.name);
    }

    println!("Holiday mode started for {} until {}", account.name, until);
    notify_daemon(&account.name).await;
    Ok(())
}

pub async fn end(account: Option<String>) -> Result<()> {
    let settings = load_settings()?;
    let account = single_account(&settings, account.as_deref())?;

    let client = SmolApiClient::new(account, &settings.api);
    let applied = client.end_holiday().await;
    client.close().await;

    if !applied? {
        anyhow::bail!("Failed to end holiday mode for {}", account.name);
    }

    println!("Holiday mode ended for {}", account.name);
    notify_daemon(&account.name).await;
    Ok(())
}
