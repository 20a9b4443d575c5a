//! Configuration management
//!
//! A bot configuration lists the servers to connect to and, per server,
//! the modules to run. The same model is read from TOML, JSON or YAML.

use crate::{ConnectInfo, Error, ModuleParams, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// File names searched for, in order, when no configuration path is given
pub const CONFIG_CANDIDATES: &[&str] = &["bots.toml", "bots.json", "bots.yaml", "bots.yml"];

/// Top-level bot configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BotConfig {
    /// Servers to connect to
    #[serde(default)]
    pub servers: Vec<ServerConfig>,
}

/// One server connection and the modules that run on it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Protocol type; only `irc` is supported
    #[serde(rename = "type", default = "default_server_type")]
    pub kind: String,
    /// Server host name
    pub server: String,
    /// Server port (6667 when absent)
    #[serde(default)]
    pub port: Option<u16>,
    /// Candidate nicknames, in order of preference
    pub nicks: Vec<String>,
    /// Login user name
    pub user: String,
    /// Real name sent during registration
    #[serde(default)]
    pub realname: Option<String>,
    /// Server password
    #[serde(default)]
    pub server_pass: Option<String>,
    /// Force TLS on or off; otherwise TLS is used on port 6697
    #[serde(default)]
    pub ssl: Option<bool>,
    /// Seconds to wait before rejoining a room we were kicked from
    #[serde(default)]
    pub rejoin_delay: Option<u64>,
    /// Modules by instance name
    #[serde(default)]
    pub modules: BTreeMap<String, ModuleConfig>,
}

fn default_server_type() -> String {
    "irc".to_string()
}

/// Configuration of one module instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModuleConfig {
    /// Whether the module should be loaded
    pub enabled: bool,
    /// Rooms the module is active in
    pub rooms: Vec<String>,
    /// Named parameters passed to the module
    pub params: serde_json::Map<String, serde_json::Value>,
    /// Catalog identifier of the module implementation; defaults to the instance name
    pub path: Option<String>,
}

impl Default for ModuleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            rooms: Vec::new(),
            params: serde_json::Map::new(),
            path: None,
        }
    }
}

impl ModuleConfig {
    /// Catalog identifier used to build the instance called `name`
    pub fn factory_id<'a>(&'a self, name: &'a str) -> &'a str {
        self.path.as_deref().unwrap_or(name)
    }

    /// Parameters handed to the module factory and update path
    pub fn to_params(&self, name: &str) -> ModuleParams {
        ModuleParams::new(
            name,
            self.rooms.iter().cloned().collect(),
            serde_json::Value::Object(self.params.clone()),
        )
    }
}

impl ServerConfig {
    /// Connection target for this server
    pub fn connect_info(&self) -> Result<ConnectInfo> {
        let mut info = ConnectInfo::new(&self.server, self.port, self.nicks.clone(), &self.user)?
            .with_password(self.server_pass.clone());
        if let Some(tls) = self.ssl {
            info = info.with_tls(tls);
        }
        if let Some(realname) = &self.realname {
            info = info.with_realname(realname);
        }
        Ok(info)
    }

    /// Delay before rejoining after a kick, if configured
    pub fn rejoin_delay(&self) -> Option<Duration> {
        self.rejoin_delay.filter(|secs| *secs > 0).map(Duration::from_secs)
    }
}

impl TryFrom<&ServerConfig> for ConnectInfo {
    type Error = Error;

    fn try_from(config: &ServerConfig) -> Result<Self> {
        config.connect_info()
    }
}

impl BotConfig {
    /// Load configuration from file, choosing the format by extension
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read config file {}: {}", path.display(), e)))?;

        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase());
        let config = match extension.as_deref() {
            Some("toml") => Self::from_toml(&content)?,
            Some("json") => Self::from_json(&content)?,
            Some("yaml") | Some("yml") => Self::from_yaml(&content)?,
            _ => {
                return Err(Error::Config(format!(
                    "Unknown config format for {}; expected .toml, .json, .yaml or .yml",
                    path.display()
                )))
            }
        };

        tracing::debug!("Loaded {} server(s) from {}", config.servers.len(), path.display());
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        Ok(serde_json::from_str(content)?)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Find the configuration file in `dir`
    pub fn discover<P: AsRef<Path>>(dir: P) -> Result<PathBuf> {
        let dir = dir.as_ref();
        for candidate in CONFIG_CANDIDATES {
            let path = dir.join(candidate);
            tracing::debug!("Looking for {}", path.display());
            if path.is_file() {
                return Ok(path);
            }
        }
        Err(Error::Config(format!(
            "No configuration file found in {} (looked for {})",
            dir.display(),
            CONFIG_CANDIDATES.join(", ")
        )))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.servers.is_empty() {
            return Err(Error::Config("At least one server must be configured".to_string()));
        }

        let mut seen = HashSet::new();
        for server in &self.servers {
            if server.kind != "irc" {
                return Err(Error::Config(format!(
                    "Server {} has unsupported type '{}'",
                    server.server, server.kind
                )));
            }
            if !seen.insert(server.server.as_str()) {
                return Err(Error::Config(format!("Duplicate server {} in configuration", server.server)));
            }
            if server.port == Some(0) {
                return Err(Error::Config(format!("Server {} port cannot be 0", server.server)));
            }
            server
                .connect_info()
                .map_err(|e| Error::Config(format!("Server {}: {}", server.server, e)))?;

            for (name, module) in &server.modules {
                if module.rooms.iter().any(|room| room.is_empty() || room.contains([' ', ','])) {
                    return Err(Error::Config(format!(
                        "Module {} on {} has an invalid room name",
                        name, server.server
                    )));
                }
            }
        }

        Ok(())
    }

    /// Look up a server by host name
    pub fn server(&self, name: &str) -> Option<&ServerConfig> {
        self.servers.iter().find(|s| s.server == name)
    }
}
