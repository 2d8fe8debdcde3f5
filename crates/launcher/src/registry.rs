//! App registry with snapshot/rollback.
//!
//! Local and non-local apps live in one map keyed by name, each entry tagged
//! with its [`Locality`], so a name can never be in both sets at once.
//!
//! Every mutator runs inside a transaction: the map is snapshotted
//! first and restored if the mutation fails, so a failed call leaves the
//! registry exactly as it found it.

use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::error::{LauncherError, LauncherResult};
use crate::types::{AccessRights, AppEntry, AppName, DirectoryId, LocalDetails, Locality};

type Apps = BTreeMap<AppName, AppEntry>;

/// Point-in-time copy of every registry entry.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RegistrySnapshot {
    apps: Apps,
}

impl RegistrySnapshot {
    pub fn len(&self) -> usize {
        self.apps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.apps.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Registry {
    apps: Apps,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Entries with the given locality, ordered by name.
    pub fn list(&self, locality: Locality) -> Vec<AppEntry> {
        self.apps
            .values()
            .filter(|entry| entry.locality == locality)
            .cloned()
            .collect()
    }

    pub fn get(&self, name: &AppName) -> Option<&AppEntry> {
        self.apps.get(name)
    }

    pub fn len(&self) -> usize {
        self.apps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.apps.is_empty()
    }

    pub(crate) fn entries(&self) -> impl Iterator<Item = &AppEntry> {
        self.apps.values()
    }

    /// A launchable entry. Non-local apps are reported as not found.
    pub fn lookup_local(&self, name: &AppName) -> LauncherResult<&AppEntry> {
        self.apps
            .get(name)
            .filter(|entry| entry.is_local())
            .ok_or_else(|| LauncherError::NotFound(name.to_string()))
    }

    pub fn snapshot(&self) -> RegistrySnapshot {
        RegistrySnapshot {
            apps: self.apps.clone(),
        }
    }

    pub fn restore(&mut self, snapshot: RegistrySnapshot) {
        self.apps = snapshot.apps;
    }

    /// Add a new local app. The entry is forced local.
    pub fn add(&mut self, mut entry: AppEntry) -> LauncherResult<()> {
        self.transact(|apps| {
            if apps.contains_key(&entry.name) {
                return Err(LauncherError::DuplicateApp(entry.name.to_string()));
            }
            entry.locality = Locality::Local;
            entry.other_machines.clear();
            apps.insert(entry.name.clone(), entry);
            Ok(())
        })
    }

    /// Turn a non-local app into a local one using this machine's path,
    /// arguments and auto-start setting. Icon, directory rights and the
    /// installs on other machines carry over.
    pub fn link(
        &mut self,
        name: &AppName,
        path: PathBuf,
        args: Vec<String>,
        auto_start: bool,
    ) -> LauncherResult<()> {
        self.transact(|apps| {
            let entry = apps
                .get_mut(name)
                .ok_or_else(|| LauncherError::NotFound(name.to_string()))?;
            if entry.is_local() {
                return Err(LauncherError::AlreadyLocal(name.to_string()));
            }
            entry.apply_details(LocalDetails::new(path, args, auto_start));
            entry.locality = Locality::Local;
            Ok(())
        })
    }

    /// Rename an app, local or not. The new name must be unused.
    pub fn update_name(&mut self, name: &AppName, new_name: AppName) -> LauncherResult<()> {
        self.transact(|apps| {
            let mut entry = apps
                .remove(name)
                .ok_or_else(|| LauncherError::NotFound(name.to_string()))?;
            if apps.contains_key(&new_name) {
                return Err(LauncherError::DuplicateApp(new_name.to_string()));
            }
            entry.name = new_name.clone();
            apps.insert(new_name, entry);
            Ok(())
        })
    }

    pub fn update_path(&mut self, name: &AppName, path: PathBuf) -> LauncherResult<()> {
        self.update_entry(name, |entry| entry.path = path)
    }

    pub fn update_args(&mut self, name: &AppName, args: Vec<String>) -> LauncherResult<()> {
        self.update_entry(name, |entry| entry.args = args)
    }

    pub fn update_icon(&mut self, name: &AppName, icon: Vec<u8>) -> LauncherResult<()> {
        self.update_entry(name, |entry| entry.icon = icon)
    }

    pub fn update_auto_start(&mut self, name: &AppName, auto_start: bool) -> LauncherResult<()> {
        self.update_entry(name, |entry| entry.auto_start = auto_start)
    }

    pub fn update_safe_drive_access(
        &mut self,
        name: &AppName,
        rights: AccessRights,
    ) -> LauncherResult<()> {
        self.update_directory_access(name, DirectoryId::safe_drive(), Some(rights))
    }

    /// Set or (with `None`) revoke an app's rights on one directory.
    pub fn update_directory_access(
        &mut self,
        name: &AppName,
        directory: DirectoryId,
        rights: Option<AccessRights>,
    ) -> LauncherResult<()> {
        self.update_entry(name, |entry| match rights {
            Some(rights) => {
                entry.permitted_dirs.insert(directory, rights);
            }
            None => {
                entry.permitted_dirs.remove(&directory);
            }
        })
    }

    /// Drop this machine's install and return the local entry as it was.
    /// An app still installed on another machine stays known as non-local.
    pub fn remove_local(&mut self, name: &AppName) -> LauncherResult<AppEntry> {
        self.transact(|apps| {
            let removed = Self::take(apps, name, Locality::Local)?;
            if let Some((_, details)) = removed.other_machines.first_key_value() {
                let mut remaining = removed.clone();
                remaining.apply_details(details.clone());
                remaining.locality = Locality::NonLocal;
                apps.insert(name.clone(), remaining);
            }
            Ok(removed)
        })
    }

    /// Forget a non-local app on every machine.
    pub fn remove_non_local(&mut self, name: &AppName) -> LauncherResult<AppEntry> {
        self.transact(|apps| Self::take(apps, name, Locality::NonLocal))
    }

    /// Insert an entry exactly as loaded from a persisted account.
    pub(crate) fn insert_loaded(&mut self, entry: AppEntry) -> LauncherResult<()> {
        self.transact(|apps| {
            if apps.contains_key(&entry.name) {
                return Err(LauncherError::DuplicateApp(entry.name.to_string()));
            }
            apps.insert(entry.name.clone(), entry);
            Ok(())
        })
    }

    fn take(apps: &mut Apps, name: &AppName, locality: Locality) -> LauncherResult<AppEntry> {
        let in_set = apps
            .get(name)
            .is_some_and(|entry| entry.locality == locality);
        if !in_set {
            return Err(LauncherError::NotFound(name.to_string()));
        }
        apps.remove(name)
            .ok_or_else(|| LauncherError::NotFound(name.to_string()))
    }

    fn update_entry(
        &mut self,
        name: &AppName,
        apply: impl FnOnce(&mut AppEntry),
    ) -> LauncherResult<()> {
        self.transact(|apps| {
            let entry = apps
                .get_mut(name)
                .ok_or_else(|| LauncherError::NotFound(name.to_string()))?;
            apply(entry);
            Ok(())
        })
    }

    /// Run `op` against the map; on error the map is restored to its state
    /// before the call and the error is returned unchanged.
    fn transact<T>(
        &mut self,
        op: impl FnOnce(&mut Apps) -> LauncherResult<T>,
    ) -> LauncherResult<T> {
        let snapshot = self.snapshot();
        match op(&mut self.apps) {
            Ok(value) => Ok(value),
            Err(err) => {
                self.restore(snapshot);
                Err(err)
            }
        }
    }
}
