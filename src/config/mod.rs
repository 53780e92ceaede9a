//! Configuration management for agentsock

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::core::project::{default_aliases, resolve_project_with};
use crate::transport::{TransportKind, TransportOptions};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub agent: AgentConfig,
    pub project: ProjectConfig,
    pub session: SessionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Agent server origin, used when not embedded in a page
    pub endpoint: String,
    /// Socket.IO path on the server
    pub path: String,
    /// Transports to try, in order
    pub transports: Vec<TransportKind>,
    pub connect_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:3001".to_string(),
            path: "/socket.io/".to_string(),
            transports: TransportKind::preference(),
            connect_timeout_secs: 10,
        }
    }
}

impl ServerConfig {
    pub fn transport_options(&self) -> TransportOptions {
        TransportOptions {
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AgentConfig {
    /// Give up on a request after this many seconds (unset: wait forever)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_timeout_secs: Option<u64>,
    pub auto_commit: bool,
    pub run_tests: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: None,
            auto_commit: true,
            run_tests: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct ProjectConfig {
    /// Hostname of the page being edited; the project is derived from it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    /// Explicit project, overriding the hostname
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    /// Extra subdomain → project mappings
    pub aliases: HashMap<String, String>,
}

impl ProjectConfig {
    /// Built-in aliases overlaid with the configured ones
    pub fn alias_table(&self) -> HashMap<String, String> {
        let mut table = default_aliases().clone();
        for (label, project) in &self.aliases {
            table.insert(label.to_lowercase(), project.clone());
        }
        table
    }

    /// Project for `hostname` (or the configured hostname)
    pub fn resolve(&self, hostname: Option<&str>) -> Option<String> {
        if let Some(project) = &self.default {
            return Some(project.clone());
        }
        let hostname = hostname.or(self.hostname.as_deref())?;
        resolve_project_with(hostname, &self.alias_table())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    /// User id sent when none is stored locally
    pub user_id_fallback: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            user_id_fallback: crate::storage::USER_ID_FALLBACK.to_string(),
        }
    }
}

impl Config {
    /// Load configuration from the default location
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;
        Self::load_from(&config_path)
    }

    /// Load configuration from `path`; a missing file yields the defaults
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let config: Config = toml::from_str(&content)
                .with_context(|| format!("Invalid config in {}", path.display()))?;
            Ok(config)
        } else {
            Ok(Config::default())
        }
    }

    /// Get the configuration file path
    pub fn config_path() -> Result<PathBuf> {
        if let Some(proj_dirs) = directories::ProjectDirs::from("", "", "agentsock") {
            let config_dir = proj_dirs.config_dir();
            std::fs::create_dir_all(config_dir)?;
            Ok(config_dir.join("config.toml"))
        } else {
            Ok(PathBuf::from("config.toml"))
        }
    }

    /// Save configuration to default location
    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_path()?;
        self.save_to(&config_path)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

/// Agent server origin for this session
///
/// When the client runs embedded in a page, the agent is served from the
/// page's own origin; otherwise the configured endpoint is used.
pub fn resolve_endpoint(page_origin: Option<&str>, config: &Config) -> String {
    match page_origin.map(str::trim).filter(|o| !o.is_empty()) {
        Some(origin) => origin.trim_end_matches('/').to_string(),
        None => config.server.endpoint.clone(),
    }
}
