//! Configuration structures and file loading.
//!
//! A manager configuration lists the transport links (each optionally
//! `required`) and maps device names to their logical address plus a
//! free-form per-device config section, consumed by the matching device
//! factory. Files are YAML or JSON, with `CMDLINK_`-prefixed environment
//! variables overriding individual fields.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use figment::providers::{Env, Format, Json, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::error::{CmdLinkError, Result};
use crate::transport::{SerialLinkConfig, SocketLinkConfig};

fn default_init_timeout() -> f64 {
    1.0
}

fn default_init_attempts() -> u32 {
    5
}

fn default_probe_timeout() -> f64 {
    0.1
}

/// Handshake and discovery tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InitConfig {
    /// Gate timeout per ISINIT attempt, in seconds.
    pub timeout: f64,
    /// Number of ISINIT attempts per link.
    pub attempts: u32,
    /// Bonjour probe timeout per session, in seconds.
    pub bonjour_timeout: f64,
}

impl Default for InitConfig {
    fn default() -> Self {
        Self {
            timeout: default_init_timeout(),
            attempts: default_init_attempts(),
            bonjour_timeout: default_probe_timeout(),
        }
    }
}

impl InitConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs_f64(self.timeout)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.bonjour_timeout)
    }
}

/// One transport link, tagged by `type: serial` or `type: socket`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum LinkKind {
    Serial(SerialLinkConfig),
    Socket(SocketLinkConfig),
}

/// Link entry: the transport parameters plus the `required` flag deciding
/// whether an open failure is fatal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkEntry {
    #[serde(default)]
    pub required: bool,
    #[serde(flatten)]
    pub link: LinkKind,
}

/// One configured device: its logical address on the command bus and the
/// free-form section its factory deserializes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceEntry {
    /// Logical address (command identifier prefix) of the device.
    pub command_id: String,
    /// Device-type-specific configuration; `null`/absent means defaults.
    #[serde(default)]
    pub config: serde_json::Value,
}

/// Complete manager configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ManagerConfig {
    #[serde(default)]
    pub links: Vec<LinkEntry>,
    #[serde(default)]
    pub devices: BTreeMap<String, DeviceEntry>,
    #[serde(default)]
    pub init: InitConfig,
}

impl ManagerConfig {
    /// Load from a YAML or JSON file, with `CMDLINK_` environment overrides
    /// (`__` as section separator).
    pub fn from_file(path: &Path) -> Result<Self> {
        let figment = match path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml") | Some("yml") => Figment::from(Yaml::file(path)),
            Some("json") => Figment::from(Json::file(path)),
            other => {
                return Err(CmdLinkError::config(format!(
                    "unsupported config format {other:?} for {}",
                    path.display()
                )))
            }
        };
        let config: ManagerConfig = figment
            .merge(Env::prefixed("CMDLINK_").split("__"))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        for entry in &self.links {
            match &entry.link {
                LinkKind::Serial(config) => config.validate()?,
                LinkKind::Socket(config) => config.validate()?,
            }
        }
        for (name, device) in &self.devices {
            if device.command_id.is_empty() {
                return Err(CmdLinkError::config(format!(
                    "device \"{name}\" has an empty command_id"
                )));
            }
        }
        if self.init.attempts == 0 {
            return Err(CmdLinkError::config("init attempts must be at least 1"));
        }
        Ok(())
    }
}
