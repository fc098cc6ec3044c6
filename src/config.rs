use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{FixedOffset, NaiveTime};
use config::{Config, Environment, File};
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub store: StoreConfig,
    pub database: DatabaseConfig,
    pub network: NetworkConfig,
    pub booking: BookingConfig,
    pub export: ExportConfig,
}

/// Hosted REST data service.
#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    pub url: String,
    pub anon_key: String,
    /// Session token of a logged-in administrator, sent as `x-admin-token`.
    pub admin_token: Option<String>,
}

/// Optional direct Postgres connection (bypasses the REST layer).
#[derive(Debug, Deserialize, Clone, Default)]
pub struct DatabaseConfig {
    pub url: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct NetworkConfig {
    pub request_timeout_secs: u64,
    pub connect_timeout_secs: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 10,
            connect_timeout_secs: 5,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct BookingConfig {
    /// Offset applied to every wall-clock time entered by a user.
    pub utc_offset_minutes: i32,
    /// Operating window used for rooms that have none configured.
    pub default_min_time: NaiveTime,
    pub default_max_time: NaiveTime,
}

impl Default for BookingConfig {
    fn default() -> Self {
        Self {
            utc_offset_minutes: -180,
            default_min_time: NaiveTime::from_hms_opt(7, 0, 0).unwrap(),
            default_max_time: NaiveTime::from_hms_opt(22, 0, 0).unwrap(),
        }
    }
}

impl BookingConfig {
    /// The fixed offset in which dates and times are interpreted.
    pub fn offset(&self) -> Result<FixedOffset> {
        FixedOffset::east_opt(self.utc_offset_minutes * 60).with_context(|| {
            format!(
                "booking.utc_offset_minutes out of range: {}",
                self.utc_offset_minutes
            )
        })
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExportConfig {
    pub output_dir: PathBuf,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("."),
        }
    }
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        Self::load_with_file(None)
    }

    /// Load configuration, layering `extra` on top of the standard files.
    pub fn load_with_file(extra: Option<&Path>) -> Result<Self> {
        // Load .env file (silently ignore if not present - production uses env vars directly)
        let _ = dotenvy::dotenv();

        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("school-booking");

        let mut builder = Config::builder()
            // 1. Load default values
            // Store
            .set_default("store.url", "")?
            .set_default("store.anon_key", "")?
            .set_default("store.admin_token", None::<String>)?
            // Database (plain DATABASE_URL wins over nothing)
            .set_default("database.url", std::env::var("DATABASE_URL").ok())?
            // Network
            .set_default("network.request_timeout_secs", 10)?
            .set_default("network.connect_timeout_secs", 5)?
            // Booking
            .set_default("booking.utc_offset_minutes", -180)?
            .set_default("booking.default_min_time", "07:00:00")?
            .set_default("booking.default_max_time", "22:00:00")?
            // Export
            .set_default("export.output_dir", ".")?
            // 2. Load from local config file (optional, lowest priority)
            .add_source(File::from(PathBuf::from("config.toml")).required(false))
            // 3. Load from user config directory (optional, overrides local)
            .add_source(File::from(config_dir.join("config.toml")).required(false));

        // 4. Explicit file from the command line
        if let Some(path) = extra {
            builder = builder.add_source(File::from(path.to_path_buf()).required(true));
        }

        // 5. Load from Environment variables (AGENDA__STORE__URL=...)
        let builder = builder.add_source(Environment::with_prefix("AGENDA").separator("__"));

        let s = builder.build()?;
        let config: AppConfig = s.try_deserialize()?;

        if config.booking.default_min_time >= config.booking.default_max_time {
            anyhow::bail!(
                "booking.default_min_time ({}) must be before booking.default_max_time ({})",
                config.booking.default_min_time,
                config.booking.default_max_time
            );
        }

        Ok(config)
    }
}
