//! Launcher configuration.
//!
//! Loaded from an optional TOML file, then overridden from the environment:
//!
//! - `SAFE_LAUNCHER_CONNECT_TIMEOUT_MS`
//! - `SAFE_LAUNCHER_HANDSHAKE_TIMEOUT_MS`
//! - `SAFE_LAUNCHER_MACHINE_ID`
//! - `SAFE_LAUNCHER_STORE_DIR`

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{LauncherError, LauncherResult};
use crate::types::MachineId;

pub const ENV_CONNECT_TIMEOUT_MS: &str = "SAFE_LAUNCHER_CONNECT_TIMEOUT_MS";
pub const ENV_HANDSHAKE_TIMEOUT_MS: &str = "SAFE_LAUNCHER_HANDSHAKE_TIMEOUT_MS";
pub const ENV_MACHINE_ID: &str = "SAFE_LAUNCHER_MACHINE_ID";
pub const ENV_STORE_DIR: &str = "SAFE_LAUNCHER_STORE_DIR";

const STATE_DIR: &str = ".safe_launcher";
const MACHINE_ID_FILE: &str = "machine_id";

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_handshake_timeout_ms() -> u64 {
    5_000
}

fn default_port_attempts() -> u32 {
    16
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LauncherConfig {
    /// Time a launched app has to connect back.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Time from connection to confirmation.
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,
    /// Ports tried before a launch gives up on binding.
    #[serde(default = "default_port_attempts")]
    pub port_attempts: u32,
    #[serde(default)]
    pub machine_id: Option<String>,
    #[serde(default)]
    pub store_dir: Option<PathBuf>,
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            handshake_timeout_ms: default_handshake_timeout_ms(),
            port_attempts: default_port_attempts(),
            machine_id: None,
            store_dir: None,
        }
    }
}

impl LauncherConfig {
    /// Read `path` (if any) and apply environment overrides. A missing or
    /// broken file is logged and replaced by defaults.
    pub fn load(path: Option<&Path>) -> Self {
        let mut config = path.map(Self::from_file).unwrap_or_default();
        config.apply_overrides(|name| std::env::var(name).ok());
        config
    }

    fn from_file(path: &Path) -> Self {
        let contents = match fs::read_to_string(path) {
            Ok(value) => value,
            Err(err) => {
                warn!("Failed to read config file {}: {}", path.display(), err);
                return Self::default();
            }
        };
        match toml::from_str(&contents) {
            Ok(config) => config,
            Err(err) => {
                warn!("Failed to parse {}: {}", path.display(), err);
                Self::default()
            }
        }
    }

    /// Apply overrides looked up through `lookup`. Unparsable numbers are
    /// ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let parse_u64 = |name: &str| lookup(name)?.trim().parse::<u64>().ok();
        if let Some(ms) = parse_u64(ENV_CONNECT_TIMEOUT_MS) {
            self.connect_timeout_ms = ms;
        }
        if let Some(ms) = parse_u64(ENV_HANDSHAKE_TIMEOUT_MS) {
            self.handshake_timeout_ms = ms;
        }
        if let Some(id) = lookup(ENV_MACHINE_ID).filter(|id| !id.trim().is_empty()) {
            self.machine_id = Some(id.trim().to_string());
        }
        if let Some(dir) = lookup(ENV_STORE_DIR).filter(|dir| !dir.is_empty()) {
            self.store_dir = Some(PathBuf::from(dir));
        }
    }

    pub fn validate(&self) -> LauncherResult<()> {
        if self.connect_timeout_ms == 0 {
            return Err(LauncherError::Config(
                "connect_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.handshake_timeout_ms == 0 {
            return Err(LauncherError::Config(
                "handshake_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.port_attempts == 0 {
            return Err(LauncherError::Config(
                "port_attempts must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    /// Store directory: configured, else `$HOME/.safe_launcher/accounts`.
    pub fn store_dir(&self) -> LauncherResult<PathBuf> {
        match &self.store_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(state_dir()?.join("accounts")),
        }
    }

    /// This machine's id: configured, else the one persisted under
    /// `$HOME/.safe_launcher`, else a new one that is persisted there.
    pub fn resolve_machine_id(&self) -> LauncherResult<MachineId> {
        if let Some(id) = &self.machine_id {
            return Ok(MachineId::new(id.clone()));
        }
        load_or_create_machine_id(&state_dir()?)
    }
}

fn state_dir() -> LauncherResult<PathBuf> {
    let home = std::env::var_os("HOME")
        .ok_or_else(|| LauncherError::Config("HOME is not set".to_string()))?;
    Ok(PathBuf::from(home).join(STATE_DIR))
}

pub(crate) fn load_or_create_machine_id(dir: &Path) -> LauncherResult<MachineId> {
    let path = dir.join(MACHINE_ID_FILE);
    match fs::read_to_string(&path) {
        Ok(contents) if !contents.trim().is_empty() => {
            return Ok(MachineId::new(contents.trim()));
        }
        Ok(_) => {}
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => {
            return Err(LauncherError::Config(format!(
                "failed to read {}: {}",
                path.display(),
                err
            )))
        }
    }

    let id = Uuid::new_v4().to_string();
    fs::create_dir_all(dir)
        .and_then(|_| fs::write(&path, format!("{}\n", id)))
        .map_err(|e| LauncherError::Config(format!("failed to write {}: {}", path.display(), e)))?;
    debug!(machine_id = %id, path = %path.display(), "Generated machine id");
    Ok(MachineId::new(id))
}
