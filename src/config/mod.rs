use anyhow::{Result, bail};
use dotenvy::dotenv;
use serde::Deserialize;

/// Configuration for the billing engine, loaded from the environment
/// (comma-separated values for list fields, e.g.
/// `REMINDER_THRESHOLDS=3,15,30`).
#[derive(Debug, Deserialize)]
pub struct Config {
    /// Postgres connection URL. When absent the engine runs on the
    /// in-memory store (useful for local experiments and tests).
    pub database_url: Option<String>,

    #[serde(default = "default_smtp_host")]
    pub smtp_host: String,
    #[serde(default)]
    pub smtp_username: String,
    #[serde(default)]
    pub smtp_password: String,
    #[serde(default = "default_smtp_from")]
    pub smtp_from: String,

    /// Prefix for allocated invoice numbers (`PREFIX/YYYY/NNNNN`).
    #[serde(default = "default_invoice_prefix")]
    pub invoice_prefix: String,

    /// Ascending days-overdue schedule for reminder escalation.
    #[serde(default = "default_reminder_thresholds")]
    pub reminder_thresholds: Vec<i64>,

    #[serde(default = "default_currency")]
    pub default_currency: String,

    /// Payment terms applied when a due date is not supplied.
    #[serde(default = "default_due_days")]
    pub due_days: i64,

    /// Directory rendered invoice documents are written to.
    #[serde(default = "default_output_dir")]
    pub output_dir: String,
}

fn default_smtp_host() -> String {
    "localhost".to_string()
}

fn default_smtp_from() -> String {
    "billing@example.com".to_string()
}

fn default_invoice_prefix() -> String {
    "INV".to_string()
}

fn default_reminder_thresholds() -> Vec<i64> {
    vec![3, 15, 30]
}

fn default_currency() -> String {
    "USD".to_string()
}

fn default_due_days() -> i64 {
    30
}

fn default_output_dir() -> String {
    "invoices".to_string()
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// This function will:
    /// 1. Load variables from .env file if it exists
    /// 2. Deserialize environment variables into Config struct
    /// 3. Validate the reminder schedule
    pub fn load() -> Result<Self> {
        // Load .env file if it exists
        dotenv().ok();

        let config = envy::from_env::<Config>()?;
        config.validate()?;

        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.reminder_thresholds.is_empty() {
            bail!("reminder_thresholds must not be empty");
        }
        if !self.reminder_thresholds.windows(2).all(|w| w[0] < w[1]) {
            bail!("reminder_thresholds must be strictly ascending");
        }
        if self.reminder_thresholds[0] < 0 {
            bail!("reminder_thresholds must be non-negative");
        }
        if self.due_days < 0 {
            bail!("due_days must be non-negative");
        }
        Ok(())
    }
}

/// Initialize environment variables and load configuration
pub fn init() -> Result<Config> {
    dotenv().ok();
    Config::load()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> Config {
        Config {
            database_url: None,
            smtp_host: default_smtp_host(),
            smtp_username: String::new(),
            smtp_password: String::new(),
            smtp_from: default_smtp_from(),
            invoice_prefix: default_invoice_prefix(),
            reminder_thresholds: default_reminder_thresholds(),
            default_currency: default_currency(),
            due_days: default_due_days(),
            output_dir: default_output_dir(),
        }
    }

    #[test]
    fn default_schedule_is_valid() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn descending_schedule_is_rejected() {
        let mut config = base_config();
        config.reminder_thresholds = vec![15, 3, 30];
        assert!(config.validate().is_err());
    }

    #[test]
    fn empty_schedule_is_rejected() {
        let mut config = base_config();
        config.reminder_thresholds = vec![];
        assert!(config.validate().is_err());
    }
}
