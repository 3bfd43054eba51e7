pub mod charge_date;
pub mod check;
pub mod holiday;
pub mod refresh;
pub mod status;

use crate::core::settings::{AccountConfig, Settings};
use crate::daemon::{DBUS_NAME, DBUS_PATH};
use anyhow::{Context, Result};
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};

/// Hour of day (local) a changed charge date is scheduled for.
const CHARGE_HOUR: u32 = 5;

pub(crate) fn load_settings() -> Result<Settings> {
    let settings = Settings::load()?;
    settings.validate()?;
    Ok(settings)
}

/// The one account a mutating command acts on.
pub(crate) fn single_account<'a>(
    settings: &'a Settings,
    filter: Option<&str>,
) -> Result<&'a AccountConfig> {
    let accounts = settings.select_accounts(filter)?;
    match accounts.as_slice() {
        [account] => Ok(account),
        _ => anyhow::bail!(
            "{} accounts configured, pick one with --account",
            accounts.len()
        ),
    }
}

/// Asks a running daemon to refresh `account` so it reflects a change
/// straight away. A missing daemon is not an error.
pub(crate) async fn notify_daemon(account: &str) {
    if let Err(e) = refresh::call_daemon(Some(account)).await {
        tracing::warn!(account, error = %e, "Could not ask the daemon to refresh");
    }
}

pub(crate) async fn session_bus() -> Result<zbus::Connection> {
    zbus::Connection::session()
        .await
        .context("Failed to connect to session D-Bus")
}

pub(crate) fn daemon_destination() -> (&'static str, &'static str) {
    (DBUS_NAME, DBUS_PATH)
}

/// Local midnight at the start of `date`, which must still be ahead of `now`.
pub(crate) fn holiday_end_instant<Tz: TimeZone>(
    date: NaiveDate,
    tz: &Tz,
    now: DateTime<Utc>,
) -> Result<DateTime<Utc>> {
    let end = local_instant(date, 0, tz)?;
    if end <= now {
        anyhow::bail!("Holiday end date must be in the future");
    }
    Ok(end)
}

/// 05:00 local on `date`. Must be at least a day past today's 05:00 UTC.
pub(crate) fn next_charge_instant<Tz: TimeZone>(
    date: NaiveDate,
    tz: &Tz,
    now: DateTime<Utc>,
) -> Result<DateTime<Utc>> {
    let charge = local_instant(date, CHARGE_HOUR, tz)?;

    let today = now
        .date_naive()
        .and_hms_opt(CHARGE_HOUR, 0, 0)
        .context("invalid charge hour")?
        .and_utc();
    if charge < today + Duration::days(1) {
        anyhow::bail!("Next charge time must be in the future");
    }
    Ok(charge)
}

fn local_instant<Tz: TimeZone>(date: NaiveDate, hour: u32, tz: &Tz) -> Result<DateTime<Utc>> {
    let naive = date
        .and_hms_opt(hour, 0, 0)
        .with_context(|| format!("invalid hour {hour}"))?;
    tz.from_local_datetime(&naive)
        .earliest()
        .map(|t| t.with_timezone(&Utc))
        .with_context(|| format!("{naive} does not exist in the local time zone"))
}

/// Short relative description, e.g. `3d 4h`.
pub(crate) fn format_time_until(at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let duration = at.signed_duration_since(now);

    if duration.num_seconds() <= 0 {
        return "now".to_string();
    }

    let total_minutes = duration.num_minutes();
    let days = total_minutes / (24 * 60);
    let hours = (total_minutes % (24 * 60)) / 60;
    let minutes = total_minutes % 60;

    if days > 0 {
        format!("{}d {}h", days, hours)
    } else if hours > 0 {
        format!("{}h {:02}m", hours, minutes)
    } else {
        format!("{}m", minutes)
    }
}
