/// `load_config` module: loads a static YAML config and injects the provider secrets
/// from the environment, producing the [`CliConfig`] the CLI runs from.
///
/// This module is the only place where untrusted YAML is parsed and mapped to
/// strongly-typed structs.
///
/// # Accepted YAML
///
/// ```yaml
/// provider:
///   base_url: https://api.example.com/1.1
///   timeout_secs: 30          # optional
/// store:
///   connection: ./mirror      # directory of the JSON-lines store
/// sync:                       # optional, every key has a default
///   database: tweetDB
///   page_size: 200
///   owner_field: user.screen_name
///   recovery_window_secs: 900
///   store_retry: { max_attempts: 8, initial_delay_ms: 250, max_delay_ms: 30000 }
///   rate_budget: { requests: 900, window_secs: 900 }
/// feeds: [alice, bob]         # and/or a single `feed: alice`
/// ```
///
/// # Errors
/// All errors use `anyhow::Error` and are surfaced at the CLI boundary.
use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use timeline_mirror_core::config::SyncConfig;
use timeline_mirror_core::contract::FeedIdentity;
use tracing::{error, info};

use crate::provider::Credentials;

#[derive(Debug)]
pub struct CliConfig {
    pub provider: ProviderSection,
    pub store: StoreSection,
    pub sync: SyncConfig,
    pub feeds: Vec<FeedIdentity>,
    pub credentials: Credentials,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderSection {
    pub base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl ProviderSection {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreSection {
    pub connection: PathBuf,
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    provider: ProviderSection,
    store: StoreSection,
    #[serde(default)]
    sync: SyncConfig,
    #[serde(default)]
    feeds: Vec<FeedIdentity>,
    #[serde(default)]
    feed: Option<FeedIdentity>,
}

/// Loads a static YAML config file (no secrets) and injects required env vars for secrets.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<CliConfig> {
    let path_ref = path.as_ref();
    info!(config_path = ?path_ref, "Loading configuration from file");

    let config_content = match fs::read_to_string(path_ref) {
        Ok(content) => {
            info!(config_path = ?path_ref, "Config file read successfully");
            content
        }
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to read config file");
            return Err(anyhow::anyhow!(
                "Failed to read config file {:?}: {}",
                path_ref,
                e
            ));
        }
    };

    let raw: RawConfig = match serde_yaml::from_str(&config_content) {
        Ok(conf) => {
            info!(config_path = ?path_ref, "Parsed config YAML successfully");
            conf
        }
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to parse config YAML");
            return Err(anyhow::anyhow!("Failed to parse config YAML: {e}"));
        }
    };

    if raw.sync.page_size == 0 {
        error!(config_path = ?path_ref, "sync.page_size must be positive");
        anyhow::bail!("Invalid config: sync.page_size must be at least 1");
    }
    if let Some(budget) = &raw.sync.rate_budget {
        if budget.requests == 0 || budget.window_secs == 0 {
            error!(config_path = ?path_ref, requests = budget.requests, window_secs = budget.window_secs, "sync.rate_budget must be positive");
            anyhow::bail!("Invalid config: sync.rate_budget needs at least 1 request per window of at least 1 second");
        }
    }

    let mut feeds = raw.feeds;
    if let Some(single) = raw.feed {
        if !feeds.contains(&single) {
            feeds.push(single);
        }
    }

    let credentials = Credentials::from_env()
        .context("Provider credentials must be supplied through the environment")?;

    Ok(CliConfig {
        provider: raw.provider,
        store: raw.store,
        sync: raw.sync,
        feeds,
        credentials,
    })
}
