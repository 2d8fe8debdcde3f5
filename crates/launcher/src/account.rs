//! In-memory account and its persisted payload.

use std::collections::BTreeMap;

use base64::{engine::general_purpose, Engine as _};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{LauncherError, LauncherResult};
use crate::keys::{IdentityKeys, SECRET_KEY_BYTES};
use crate::registry::Registry;
use crate::types::{
    AccessRights, AppEntry, AppName, DirectoryId, LocalDetails, Locality, MachineId,
};

/// Registry plus identity material for one logged-in user.
#[derive(Debug, Clone)]
pub struct Account {
    pub(crate) registry: Registry,
    pub(crate) identity: IdentityKeys,
    pub(crate) dirty: bool,
}

impl Account {
    /// A fresh, clean account with no apps.
    pub fn new(identity: IdentityKeys) -> Self {
        Self {
            registry: Registry::new(),
            identity,
            dirty: false,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn identity(&self) -> &IdentityKeys {
        &self.identity
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Serialize for storage. Local apps record their install under `machine`.
    pub(crate) fn to_payload(&self, machine: &MachineId) -> LauncherResult<Vec<u8>> {
        let apps = self
            .registry
            .entries()
            .map(|entry| PersistedApp::from_entry(entry, machine))
            .collect();
        let persisted = PersistedAccount {
            saved_at: Utc::now(),
            dirty: false,
            secret_key: general_purpose::STANDARD.encode(self.identity.secret_bytes()),
            apps,
        };
        serde_json::to_vec(&persisted)
            .map_err(|e| LauncherError::Storage(format!("failed to serialize account: {}", e)))
    }

    /// Rebuild an account loaded on `machine`. `public_key` is the key the
    /// envelope was verified against and must match the stored secret.
    pub(crate) fn from_payload(
        payload: &[u8],
        machine: &MachineId,
        public_key: &[u8],
    ) -> LauncherResult<Self> {
        let persisted: PersistedAccount = serde_json::from_slice(payload)
            .map_err(|e| LauncherError::Storage(format!("corrupt account payload: {}", e)))?;

        let secret = general_purpose::STANDARD
            .decode(persisted.secret_key.as_bytes())
            .ok()
            .and_then(|bytes| <[u8; SECRET_KEY_BYTES]>::try_from(bytes.as_slice()).ok())
            .ok_or_else(|| LauncherError::Storage("corrupt identity key".to_string()))?;
        let identity = IdentityKeys::from_secret_bytes(&secret);
        if identity.public_key().as_slice() != public_key {
            return Err(LauncherError::Storage(
                "identity key does not match account signature".to_string(),
            ));
        }

        let mut registry = Registry::new();
        for app in persisted.apps {
            registry
                .insert_loaded(app.into_entry(machine)?)
                .map_err(|e| LauncherError::Storage(format!("corrupt app list: {}", e)))?;
        }

        Ok(Self {
            registry,
            identity,
            dirty: persisted.dirty,
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedAccount {
    saved_at: DateTime<Utc>,
    #[serde(default)]
    dirty: bool,
    secret_key: String,
    #[serde(default)]
    apps: Vec<PersistedApp>,
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedApp {
    name: AppName,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    icon: String,
    #[serde(default)]
    permitted_dirs: BTreeMap<DirectoryId, AccessRights>,
    /// Install details per machine.
    machines: BTreeMap<MachineId, LocalDetails>,
}

impl PersistedApp {
    fn from_entry(entry: &AppEntry, machine: &MachineId) -> Self {
        let mut machines = entry.other_machines.clone();
        let details = LocalDetails::of(entry);
        match entry.locality {
            Locality::Local => {
                machines.insert(machine.clone(), details);
            }
            Locality::NonLocal => {
                if let Some(mirrored) = machines.values_mut().next() {
                    *mirrored = details;
                }
            }
        }
        Self {
            name: entry.name.clone(),
            icon: general_purpose::STANDARD.encode(&entry.icon),
            permitted_dirs: entry.permitted_dirs.clone(),
            machines,
        }
    }

    fn into_entry(mut self, machine: &MachineId) -> LauncherResult<AppEntry> {
        let icon = general_purpose::STANDARD
            .decode(self.icon.as_bytes())
            .map_err(|e| LauncherError::Storage(format!("corrupt icon for '{}': {}", self.name, e)))?;
        let (locality, details) = match self.machines.remove(machine) {
            Some(details) => (Locality::Local, details),
            None => {
                let details = self.machines.values().next().cloned().ok_or_else(|| {
                    LauncherError::Storage(format!("'{}' is not installed anywhere", self.name))
                })?;
                (Locality::NonLocal, details)
            }
        };
        let mut entry = AppEntry::new(self.name, details.path.clone());
        entry.apply_details(details);
        entry.icon = icon;
        entry.permitted_dirs = self.permitted_dirs;
        entry.locality = locality;
        entry.other_machines = self.machines;
        Ok(entry)
    }
}
