//! Typed repository configuration.
//!
//! [`RepositoryConfig`] is built from defaults, from `ARBOR_*` environment
//! variables ([`RepositoryConfig::from_env`]) or from a JSON document
//! ([`RepositoryConfig::from_json`]), and handed to
//! [`Repository::open`](crate::Repository::open).

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{RepositoryError, Result};
use crate::version::HistoryLayout;

/// Configuration of a repository instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepositoryConfig {
    /// Reported through the `jcr.repository.name` descriptor.
    pub name: String,
    /// Workspace used by logins that name none.
    pub default_workspace: String,
    /// Additional workspaces created when the repository opens.
    pub workspaces: Vec<String>,
    pub history_layout: HistoryLayout,
    /// Reject saves that remove still-referenced nodes.
    pub referential_integrity: bool,
    /// Timeout of open-scoped locks, in seconds.
    pub lock_timeout_secs: u64,
    /// How long a sweep extends session-scoped locks of live sessions, in seconds.
    pub lock_extension_secs: u64,
    /// Period of the background lock sweep, in seconds.
    pub lock_sweep_interval_secs: u64,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        RepositoryConfig {
            name: "arbor".to_string(),
            default_workspace: "default".to_string(),
            workspaces: Vec::new(),
            history_layout: HistoryLayout::default(),
            referential_integrity: true,
            lock_timeout_secs: 30 * 60,
            lock_extension_secs: 120,
            lock_sweep_interval_secs: 60,
        }
    }
}

impl RepositoryConfig {
    /// Defaults overridden by `ARBOR_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each `ARBOR_*`
    /// variable name.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = RepositoryConfig::default();
        if let Some(name) = lookup("ARBOR_REPOSITORY_NAME") {
            config.name = name;
        }
        if let Some(ws) = lookup("ARBOR_DEFAULT_WORKSPACE") {
            config.default_workspace = ws;
        }
        if let Some(list) = lookup("ARBOR_WORKSPACES") {
            config.workspaces = list
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(layout) = lookup("ARBOR_HISTORY_LAYOUT") {
            config.history_layout = layout.parse().map_err(RepositoryError::Configuration)?;
        }
        if let Some(flag) = lookup("ARBOR_REFERENTIAL_INTEGRITY") {
            config.referential_integrity = parse_flag("ARBOR_REFERENTIAL_INTEGRITY", &flag)?;
        }
        if let Some(secs) = lookup("ARBOR_LOCK_TIMEOUT_SECS") {
            config.lock_timeout_secs = parse_secs("ARBOR_LOCK_TIMEOUT_SECS", &secs)?;
        }
        if let Some(secs) = lookup("ARBOR_LOCK_EXTENSION_SECS") {
            config.lock_extension_secs = parse_secs("ARBOR_LOCK_EXTENSION_SECS", &secs)?;
        }
        if let Some(secs) = lookup("ARBOR_LOCK_SWEEP_SECS") {
            config.lock_sweep_interval_secs = parse_secs("ARBOR_LOCK_SWEEP_SECS", &secs)?;
        }
        Ok(config)
    }

    /// Parses a JSON configuration document; missing fields take defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| RepositoryError::Configuration(e.to_string()))
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_timeout_secs)
    }

    pub fn lock_extension(&self) -> Duration {
        Duration::from_secs(self.lock_extension_secs)
    }

    pub fn lock_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.lock_sweep_interval_secs.max(1))
    }

    /// Default workspace first, then the configured extras, without duplicates.
    pub fn all_workspaces(&self) -> Vec<String> {
        let mut out = vec![self.default_workspace.clone()];
        for ws in &self.workspaces {
            if !out.contains(ws) {
                out.push(ws.clone());
            }
        }
        out
    }
}

fn parse_flag(var: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(RepositoryError::Configuration(format!(
            "{} must be a boolean, got '{}'",
            var, raw
        ))),
    }
}

fn parse_secs(var: &str, raw: &str) -> Result<u64> {
    raw.trim().parse().map_err(|_| {
        RepositoryError::Configuration(format!("{} must be a number of seconds, got '{}'", var, raw))
    })
}
