//! Gateway configuration, loaded once at startup from a TOML file.
//!
//! Every section and field is optional; omitted values take the defaults
//! below. Durations use humantime syntax (`"90s"`, `"30m"`); `"0"` or an
//! empty string disables a timeout.

use serde::{Deserialize, Deserializer};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default, alias = "redis")]
    pub store: StoreSection,
    #[serde(default, alias = "ansible")]
    pub automation: AutomationSection,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ServerSection {
    #[serde(default = "default_server_addr")]
    pub addr: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            addr: default_server_addr(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Redis,
    /// In-process map; locks are not shared with other gateway instances.
    Memory,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct StoreSection {
    #[serde(default)]
    pub backend: StoreBackend,
    #[serde(default = "default_store_addr")]
    pub addr: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub db: i64,
    /// Connect/read/write timeout for each store round trip.
    #[serde(
        default = "default_store_timeout",
        deserialize_with = "deserialize_timeout"
    )]
    pub timeout: Option<Duration>,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            addr: default_store_addr(),
            password: String::new(),
            db: 0,
            timeout: default_store_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct AutomationSection {
    /// Playbook directory.
    #[serde(default = "default_recipe_dir")]
    pub dir: PathBuf,
    /// Where inventories and playbook logs are written.
    #[serde(default = "default_log_dir", alias = "log")]
    pub log_dir: PathBuf,
    #[serde(default = "default_user")]
    pub user: String,
    #[serde(default = "default_shell")]
    pub shell: PathBuf,
    #[serde(default = "default_shell_args")]
    pub shell_args: Vec<String>,
    #[serde(default = "default_ansible")]
    pub ansible: String,
    #[serde(default = "default_ansible_playbook")]
    pub ansible_playbook: String,
    /// Bounds everything after the lock is taken.
    #[serde(default, deserialize_with = "deserialize_timeout")]
    pub overall_timeout: Option<Duration>,
    #[serde(default, deserialize_with = "deserialize_timeout")]
    pub rename_timeout: Option<Duration>,
    #[serde(default, deserialize_with = "deserialize_timeout")]
    pub apply_timeout: Option<Duration>,
    /// After this much silence from a running command a "still running"
    /// line is streamed, which also detects callers that went away.
    #[serde(default = "default_heartbeat", deserialize_with = "deserialize_timeout")]
    pub heartbeat: Option<Duration>,
}

impl Default for AutomationSection {
    fn default() -> Self {
        Self {
            dir: default_recipe_dir(),
            log_dir: default_log_dir(),
            user: default_user(),
            shell: default_shell(),
            shell_args: default_shell_args(),
            ansible: default_ansible(),
            ansible_playbook: default_ansible_playbook(),
            overall_timeout: None,
            rename_timeout: None,
            apply_timeout: None,
            heartbeat: default_heartbeat(),
        }
    }
}

fn default_server_addr() -> String {
    "0.0.0.0:8080".to_owned()
}

fn default_store_addr() -> String {
    "127.0.0.1:6379".to_owned()
}

#[allow(clippy::unnecessary_wraps)]
fn default_store_timeout() -> Option<Duration> {
    Some(Duration::from_secs(5))
}

#[allow(clippy::unnecessary_wraps)]
fn default_heartbeat() -> Option<Duration> {
    Some(Duration::from_secs(15))
}

fn default_recipe_dir() -> PathBuf {
    PathBuf::from("/etc/ansible")
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("/var/log/hostgate")
}

fn default_user() -> String {
    "root".to_owned()
}

fn default_shell() -> PathBuf {
    PathBuf::from("/bin/bash")
}

fn default_shell_args() -> Vec<String> {
    vec!["-lc".to_owned()]
}

fn default_ansible() -> String {
    "ansible".to_owned()
}

fn default_ansible_playbook() -> String {
    "ansible-playbook".to_owned()
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawTimeout {
    Text(String),
    Seconds(u64),
}

fn deserialize_timeout<'de, D>(d: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    match RawTimeout::deserialize(d)? {
        RawTimeout::Seconds(0) => Ok(None),
        RawTimeout::Seconds(s) => Ok(Some(Duration::from_secs(s))),
        RawTimeout::Text(s) => parse_timeout(&s).map_err(serde::de::Error::custom),
    }
}

/// `""` and `"0"` mean no timeout.
pub fn parse_timeout(s: &str) -> Result<Option<Duration>, String> {
    let s = s.trim();
    if s.is_empty() || s == "0" {
        return Ok(None);
    }
    humantime::parse_duration(s)
        .map(|d| (!d.is_zero()).then_some(d))
        .map_err(|e| format!("invalid duration '{s}': {e}"))
}

impl GatewayConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.addr.trim().is_empty() {
            return Err(ConfigError::Invalid("server.addr must not be empty".to_owned()));
        }
        if self.store.backend == StoreBackend::Redis && self.store.addr.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "store.addr must not be empty for the redis backend".to_owned(),
            ));
        }
        if self.automation.shell.as_os_str().is_empty() {
            return Err(ConfigError::Invalid(
                "automation.shell must not be empty".to_owned(),
            ));
        }
        if self.automation.user.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "automation.user must not be empty".to_owned(),
            ));
        }
        Ok(())
    }
}
