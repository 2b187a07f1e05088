//! Load config from file and environment.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{bail, Context, Result};
use loralink_core::ProtocolConfig;
use serde::Deserialize;

#[derive(Debug, Clone, Copy, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Gateway,
    Node,
}

impl FromStr for Role {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "gateway" => Ok(Role::Gateway),
            "node" => Ok(Role::Node),
            other => bail!("unknown role {:?} (expected gateway or node)", other),
        }
    }
}

/// Daemon configuration. File: ~/.config/loralink/config.toml or /etc/loralink/config.toml.
/// Env overrides: LORALINK_ROLE, LORALINK_ARCHIVE_DIR, LORALINK_COMMAND,
/// LORALINK_UPLOAD_FILE, LORALINK_NODE_ID, LORALINK_RADIO_PORT, LORALINK_LOG_LEVEL.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Which machine to run (default gateway).
    #[serde(default = "default_role")]
    pub role: Role,
    /// Root of the upload archive (gateway).
    #[serde(default = "default_archive_dir")]
    pub archive_dir: PathBuf,
    /// Run as `<command> <path>` for every complete upload (gateway).
    #[serde(default)]
    pub command: Option<String>,
    /// File uploaded every cycle (node).
    #[serde(default)]
    pub upload_file: Option<PathBuf>,
    /// 16 hex chars; random per run when unset (node).
    #[serde(default)]
    pub node_id: Option<String>,
    /// Multicast group standing in for the radio channel.
    #[serde(default = "default_multicast_group")]
    pub multicast_group: String,
    #[serde(default = "default_radio_port")]
    pub radio_port: u16,
    /// Driver loop period (default 10 ms).
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub protocol: ProtocolConfig,
}

fn default_role() -> Role {
    Role::Gateway
}
fn default_archive_dir() -> PathBuf {
    PathBuf::from("archive")
}
fn default_multicast_group() -> String {
    "239.255.60.61".to_string()
}
fn default_radio_port() -> u16 {
    45680
}
fn default_poll_interval_ms() -> u64 {
    10
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            role: default_role(),
            archive_dir: default_archive_dir(),
            command: None,
            upload_file: None,
            node_id: None,
            multicast_group: default_multicast_group(),
            radio_port: default_radio_port(),
            poll_interval_ms: default_poll_interval_ms(),
            log_level: default_log_level(),
            protocol: ProtocolConfig::default(),
        }
    }
}

/// Load config: merge default, then config file (if present), then env vars.
/// An explicit path must exist and parse; the default locations are optional.
pub fn load(explicit: Option<&Path>) -> Result<Config> {
    let mut c = match explicit {
        Some(path) => parse_file(path)?,
        None => load_file().unwrap_or_default(),
    };
    apply_env(&mut c, |key| std::env::var(key).ok())?;
    Ok(c)
}

fn apply_env(c: &mut Config, var: impl Fn(&str) -> Option<String>) -> Result<()> {
    if let Some(s) = var("LORALINK_ROLE") {
        c.role = s.parse()?;
    }
    if let Some(s) = var("LORALINK_ARCHIVE_DIR") {
        c.archive_dir = PathBuf::from(s);
    }
    if let Some(s) = var("LORALINK_COMMAND") {
        c.command = Some(s);
    }
    if let Some(s) = var("LORALINK_UPLOAD_FILE") {
        c.upload_file = Some(PathBuf::from(s));
    }
    if let Some(s) = var("LORALINK_NODE_ID") {
        c.node_id = Some(s);
    }
    if let Some(s) = var("LORALINK_RADIO_PORT") {
        if let Ok(p) = s.parse::<u16>() {
            c.radio_port = p;
        }
    }
    if let Some(s) = var("LORALINK_LOG_LEVEL") {
        c.log_level = s;
    }
    Ok(())
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/loralink/config.toml"));
    }
    out.push(PathBuf::from("/etc/loralink/config.toml"));
    out
}

fn parse_file(path: &Path) -> Result<Config> {
    let s = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    toml::from_str(&s).with_context(|| format!("parsing {}", path.display()))
}

fn load_file() -> Option<Config> {
    for p in config_paths() {
        if p.exists() {
            return parse_file(&p).ok();
        }
    }
    None
}
