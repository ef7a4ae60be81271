//! Configuration for netdrift.
//!
//! Loaded from `netdrift.toml` (or another file prefix) layered under
//! `NETDRIFT__`-prefixed environment variables.

use std::collections::HashMap;

use serde::Deserialize;

/// Top-level netdrift configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DriftConfig {
    /// Path to the snapshot database file.
    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// Path to the nmap binary.
    #[serde(default = "default_nmap_path")]
    pub nmap_path: String,

    /// Orchestrator sweep interval in milliseconds.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Maximum number of diff results returned per request.
    #[serde(default = "default_max_diffs")]
    pub max_diffs: usize,

    /// Field names excluded from diffing at every depth.
    #[serde(default = "default_ignore_fields")]
    pub ignore_fields: Vec<String>,

    /// Named scan profiles: profile name -> scanner argument string.
    /// Used as a fallback when a profile is not yet in the store;
    /// on first use the profile is persisted.
    #[serde(default = "default_profiles")]
    pub profiles: HashMap<String, String>,
}

fn default_db_path() -> String {
    "netdrift.db".to_string()
}

fn default_nmap_path() -> String {
    "nmap".to_string()
}

fn default_poll_interval() -> u64 {
    250
}

fn default_max_diffs() -> usize {
    10
}

fn default_ignore_fields() -> Vec<String> {
    ["host", "osfingerprint", "last_boot", "servicefp"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// Built-in profiles, available without a config file.
fn default_profiles() -> HashMap<String, String> {
    [
        ("quick", "-sn"),
        ("standard", "-sS -sV --top-ports 1000"),
        ("deep", "-sS -sV -O -A -p-"),
    ]
    .iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

impl Default for DriftConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            nmap_path: default_nmap_path(),
            poll_interval_ms: default_poll_interval(),
            max_diffs: default_max_diffs(),
            ignore_fields: default_ignore_fields(),
            profiles: default_profiles(),
        }
    }
}

impl DriftConfig {
    /// Load configuration from `{file_prefix}.toml` and the environment.
    ///
    /// A missing file is not an error; missing keys fall back to the
    /// serde defaults.
    pub fn load(file_prefix: &str) -> Result<Self, config::ConfigError> {
        let cfg = config::Config::builder()
            .add_source(config::File::with_name(file_prefix).required(false))
            .add_source(
                config::Environment::with_prefix("NETDRIFT")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        match cfg.try_deserialize::<DriftConfig>() {
            Ok(c) => Ok(c),
            Err(e) => {
                tracing::warn!(error = %e, "Configuration did not deserialize, using defaults");
                Ok(DriftConfig::default())
            }
        }
    }

    /// Look up a profile argument string from the config file fallback.
    pub fn profile_arguments(&self, name: &str) -> Option<&str> {
        self.profiles.get(name).map(String::as_str)
    }
}
