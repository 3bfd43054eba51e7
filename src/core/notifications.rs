use async_trait::async_trait;
use notify_rust::Notification;
use std::collections::HashSet;
use tokio::sync::Mutex;

pub const ACCOUNT_NOT_FOUND: &str = "account_not_found";

/// Operator-visible alerts, deduplicated by key.
#[async_trait]
pub trait AlertSink: Send + Sync {
    /// Raising a key that is already active is a no-op.
    async fn raise(&self, key: &str, message: &str);
    /// Clearing a key that is not active is a no-op.
    async fn clear(&self, key: &str);
}

/// Builds a stable alert key for an account, e.g. `account_not_found_home`.
pub fn alert_key(kind: &str, account_name: &str) -> String {
    let account: String = account_name
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    format!("{kind}_{account}")
}

pub fn account_not_found_message(account_name: &str) -> String {
    format!(
        "Account '{account_name}' was not found or its credentials are invalid. \
         Check the username and password in the smol-monitor config."
    )
}

/// Logs alerts and mirrors them to the desktop notification daemon.
pub struct DesktopAlertSink {
    active: Mutex<HashSet<String>>,
    desktop: bool,
}

impl DesktopAlertSink {
    pub fn new() -> Self {
        Self {
            active: Mutex::default(),
            desktop: true,
        }
    }

    #[cfg(test)]
    pub fn log_only() -> Self {
        Self {
            active: Mutex::default(),
            desktop: false,
        }
    }

    #[cfg(test)]
    pub async fn is_active(&self, key: &str) -> bool {
        self.active.lock().await.contains(key)
    }

    fn show(&self, key: &str, message: &str) {
        if !self.desktop {
            return;
        }

        let key = key.to_string();
        let message = message.to_string();
        tokio::task::spawn_blocking(move || {
            let result = Notification::new()
                .summary("Smol account problem")
                .body(&message)
                .appname("smol-monitor")
                .timeout(notify_rust::Timeout::Never)
                .show();

            if let Err(e) = result {
                tracing::warn!(key = %key, error = %e, "Failed to show desktop notification");
            }
        });
    }
}

impl Default for DesktopAlertSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AlertSink for DesktopAlertSink {
    async fn raise(&self, key: &str, message: &str) {
        if !self.active.lock().await.insert(key.to_string()) {
            return;
        }

        tracing::error!(key, "{message}");
        self.show(key, message);
    }

    async fn clear(&self, key: &str) {
        if self.active.lock().await.remove(key) {
            tracing::info!(key, "Alert resolved");
        }
    }
}
