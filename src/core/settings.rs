use crate::core::models::RefreshPolicy;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_MARKET: &str = "GB";
pub const DEFAULT_BASE_URL: &str = "https://customer-api.smol.com";
pub const DEFAULT_TOKEN_URL: &str = "https://login.smolproducts.com/oauth/token";

/// Upper bound for every refresh and backoff setting: one year.
pub const MAX_REFRESH_MINUTES: f64 = 525_600.0;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub accounts: Vec<AccountConfig>,
    pub refresh: RefreshSettings,
    pub api: ApiSettings,
    pub debug: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountConfig {
    pub name: String,
    pub username: String,
    pub password: String,
    #[serde(default = "default_market")]
    pub market: String,
}

fn default_market() -> String {
    DEFAULT_MARKET.to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RefreshSettings {
    pub rate_minutes: f64,
    pub tick_seconds: u64,
    pub backoff_base_minutes: f64,
    pub backoff_max_step_minutes: f64,
    pub backoff_ceiling_minutes: f64,
}

impl Default for RefreshSettings {
    fn default() -> Self {
        Self {
            rate_minutes: 60.0,
            tick_seconds: 60,
            backoff_base_minutes: 1.0,
            backoff_max_step_minutes: 30.0,
            backoff_ceiling_minutes: 1440.0,
        }
    }
}

impl RefreshSettings {
    pub fn policy(&self) -> RefreshPolicy {
        RefreshPolicy {
            rate_minutes: self.rate_minutes,
            backoff_base_minutes: self.backoff_base_minutes,
            backoff_max_step_minutes: self.backoff_max_step_minutes,
            backoff_ceiling_minutes: self.backoff_ceiling_minutes,
        }
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_seconds)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiSettings {
    pub base_url: String,
    pub token_url: String,
    pub timeout_seconds: u64,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            token_url: DEFAULT_TOKEN_URL.to_string(),
            timeout_seconds: 20,
        }
    }
}

impl ApiSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

impl Settings {
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("smol-monitor").join("config.toml"))
    }

    pub fn load() -> Result<Self> {
        let path = Self::config_path().context("Could not determine config directory")?;
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::info!(?path, "Config file not found, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let settings: Settings = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        tracing::info!(?path, accounts = settings.accounts.len(), "Loaded config");
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        let mut names = HashSet::new();
        for account in &self.accounts {
            if account.name.trim().is_empty() {
                anyhow::bail!("accounts.name must not be empty");
            }
            // Becomes part of the snapshot file name
            if account.name.starts_with('.')
                || !account
                    .name
                    .chars()
                    .all(|c| c.is_alphanumeric() || matches!(c, ' ' | '-' | '_' | '.'))
            {
                anyhow::bail!(
                    "account name {:?} may only contain letters, digits, spaces, '-', '_' and '.', \
                     and must not start with '.'",
                    account.name
                );
            }
            if !names.insert(account.name.as_str()) {
                anyhow::bail!("duplicate account name: {}", account.name);
            }
            if account.username.trim().is_empty() {
                anyhow::bail!("username is not set for account {}", account.name);
            }
            if account.password.is_empty() {
                anyhow::bail!("password is not set for account {}", account.name);
            }
            // Substituted into queries as a bare enum literal
            if account.market.is_empty()
                || !account
                    .market
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_')
            {
                anyhow::bail!(
                    "market for account {} must be a market code such as GB, got {:?}",
                    account.name,
                    account.market
                );
            }
        }

        let refresh = &self.refresh;
        for (field, value) in [
            ("rate_minutes", refresh.rate_minutes),
            ("backoff_base_minutes", refresh.backoff_base_minutes),
            ("backoff_max_step_minutes", refresh.backoff_max_step_minutes),
            ("backoff_ceiling_minutes", refresh.backoff_ceiling_minutes),
        ] {
            if !(0.0..=MAX_REFRESH_MINUTES).contains(&value) {
                anyhow::bail!(
                    "refresh.{field} must be between 0 and {MAX_REFRESH_MINUTES}, got {value}"
                );
            }
        }
        if refresh.rate_minutes == 0.0 {
            anyhow::bail!("refresh.rate_minutes must be positive");
        }
        if refresh.tick_seconds == 0 {
            anyhow::bail!("refresh.tick_seconds must be positive");
        }
        if refresh.backoff_ceiling_minutes < refresh.backoff_max_step_minutes {
            anyhow::bail!(
                "refresh.backoff_ceiling_minutes ({}) must be at least backoff_max_step_minutes ({})",
                refresh.backoff_ceiling_minutes,
                refresh.backoff_max_step_minutes
            );
        }
        if self.api.timeout_seconds == 0 {
            anyhow::bail!("api.timeout_seconds must be positive");
        }
        Ok(())
    }

    pub fn account(&self, name: &str) -> Option<&AccountConfig> {
        self.accounts.iter().find(|a| a.name == name)
    }

    /// Accounts matching an optional `--account` filter.
    pub fn select_accounts(&self, filter: Option<&str>) -> Result<Vec<&AccountConfig>> {
        if self.accounts.is_empty() {
            anyhow::bail!("No accounts configured. Add an [[accounts]] entry to the config file.");
        }

        match filter {
            Some(name) => self
                .account(name)
                .map(|a| vec![a])
                .with_context(|| format!("Unknown account: {name}")),
            None => Ok(self.accounts.iter().collect()),
        }
    }
}
