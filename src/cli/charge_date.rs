use crate::api::SmolApiClient;
use crate::cli::{load_settings, next_charge_instant, notify_daemon, single_account};
use anyhow::{Context, Result};
use chrono::{Local, NaiveDate, Utc};

pub async fn run(subscription_id: String, date: NaiveDate, account: Option<String>) -> Result<()> {
    let settings = load_settings()?;
    let account = single_account(&settings, account.as_deref())?;
    let next_charge = next_charge_instant(date, &Local, Utc::now())?;

    let client = SmolApiClient::new(account, &settings.api);
    let result = change(&client, &subscription_id, next_charge).await;
    client.close().await;
    result?;

    println!(
        "Next charge for {} moved to {}",
        subscription_id,
        next_charge.with_timezone(&Local).format("%Y-%m-%d %H:%M")
    );
    notify_daemon(&account.name).await;
    Ok(())
}

async fn change(
    client: &SmolApiClient,
    subscription_id: &str,
    next_charge: chrono::DateTime<Utc>,
) -> Result<()> {
    // The mutation needs the subscription's delivery address
    let snapshot = client
        .get_account()
        .await?
        .into_option()
        .context("Account not found")?;
    let subscription = snapshot
        .subscription(subscription_id)
        .with_context(|| format!("Unknown subscription: {subscription_id}"))?;

    let applied = client
        .change_next_charge_date(&subscription.id, &subscription.address.id, next_charge)
        .await?;
    if !applied {
        anyhow::bail!("Failed to change next charge date");
    }
    Ok(())
}
