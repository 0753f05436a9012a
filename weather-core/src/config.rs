use anyhow::{Context, Result, anyhow};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, fs, path::PathBuf, time::Duration};

use crate::provider::ProviderId;

/// Environment variable naming the provider to use, overriding the config file.
pub const PROVIDER_ENV_VAR: &str = "WEATHER_PROVIDER";

/// Configuration for a single provider (e.g., API key).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub api_key: String,
}

/// How readings reach the connected clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistributionMode {
    /// Every session fetches for its own location on its own interval.
    #[default]
    PerLocation,
    /// One task fetches for the default location and sends the same reading to everyone.
    Broadcast,
}

/// Timing and behaviour of the distribution server.
///
/// Example TOML:
/// [server]
/// push_interval_secs = 30
/// mode = "broadcast"
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub push_interval_secs: u64,
    pub sweep_interval_secs: u64,
    /// `0` waits for the client's location forever.
    pub location_timeout_secs: u64,
    pub shutdown_grace_secs: u64,
    pub mode: DistributionMode,
    pub location_drift: bool,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            push_interval_secs: 30,
            sweep_interval_secs: 30,
            location_timeout_secs: 60,
            shutdown_grace_secs: 5,
            mode: DistributionMode::PerLocation,
            location_drift: false,
        }
    }
}

impl ServerSettings {
    pub fn push_interval(&self) -> Duration {
        Duration::from_secs(self.push_interval_secs.max(1))
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    pub fn location_timeout(&self) -> Option<Duration> {
        (self.location_timeout_secs > 0).then(|| Duration::from_secs(self.location_timeout_secs))
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

/// Top-level configuration stored on disk.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Optional default provider id, e.g. "openweather" or "openmeteo".
    pub default_provider: Option<String>,

    /// Example TOML:
    /// [providers.openweather]
    /// api_key = "..."
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,

    #[serde(default)]
    pub server: ServerSettings,
}

impl Config {
    /// Return the default provider as a strongly-typed ProviderId.
    ///
    /// Nothing configured means simulated weather; a misspelt name is an error.
    pub fn default_provider_id(&self) -> Result<ProviderId> {
        match self.default_provider.as_deref() {
            None => Ok(ProviderId::Simulated),
            Some(s) => ProviderId::try_from(s),
        }
    }

    pub fn provider_config(&self, id: ProviderId) -> Option<&ProviderConfig> {
        self.providers.get(id.as_str())
    }

    /// Store default provider as string.
    pub fn set_default_provider(&mut self, id: ProviderId) {
        self.default_provider = Some(id.as_str().to_string());
    }

    /// Load config from disk, or return an empty default if it doesn't exist yet.
    pub fn load() -> Result<Self> {
        let path = Self::config_file_path()?;
        Self::load_from(&path)
    }

    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        if !path.exists() {
            // First run: no config file, return empty.
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let cfg: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(cfg)
    }

    /// Path to the config file.
    pub fn config_file_path() -> Result<PathBuf> {
        let dirs = ProjectDirs::from("dev", "weather-distribution", "weather-server")
            .ok_or_else(|| anyhow!("Could not determine platform config directory"))?;

        Ok(dirs.config_dir().join("config.toml"))
    }

    /// Apply `WEATHER_PROVIDER` and the per-provider API key variables from the process environment.
    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides(|name| std::env::var(name).ok())
    }

    /// Same as [`Config::with_env_overrides`], reading variables through `lookup`.
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let lookup = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        for id in ProviderId::all() {
            if let Some(key) = id.api_key_env_var().and_then(&lookup) {
                self.upsert_provider_api_key(*id, key);
            }
        }

        if let Some(name) = lookup(PROVIDER_ENV_VAR) {
            let id = ProviderId::try_from(name.as_str())
                .with_context(|| format!("Invalid {PROVIDER_ENV_VAR}"))?;
            self.set_default_provider(id);
        }

        Ok(self)
    }

    /// Convenience helper: set/replace a provider API key and optionally set default provider.
    pub fn upsert_provider_api_key(&mut self, provider_id: ProviderId, api_key: String) {
        self.providers.insert(provider_id.as_str().to_string(), ProviderConfig { api_key });

        if self.default_provider.is_none() {
            self.default_provider = Some(provider_id.to_string());
        }
    }

    /// Returns API key for a provider, if present.
    pub fn provider_api_key(&self, provider_id: ProviderId) -> Option<&str> {
        self.provider_config(provider_id).map(|cfg| cfg.api_key.as_str())
    }

    pub fn is_provider_configured(&self, provider_id: ProviderId) -> bool {
        self.provider_api_key(provider_id).is_some()
    }
}
