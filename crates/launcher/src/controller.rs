//! The launcher facade.
//!
//! [`Launcher`] owns the logged-in session and the table of in-flight
//! launches behind one async mutex. Every operation takes the lock; a launch
//! holds it only while reading the registry, binding its port, spawning the
//! app and recording itself, then waits for its handshake without it.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use safe_launcher_client::launcher_port_arg;
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, info};

use crate::config::LauncherConfig;
use crate::error::{LauncherError, LauncherResult};
use crate::handshake::{self, LaunchContext, LaunchDriver, LaunchId};
use crate::keys::{Ed25519Keys, SharedKeyProvider};
use crate::registry::Registry;
use crate::session::Session;
use crate::spawn::{DetachedSpawner, SharedSpawner};
use crate::store::{DiskStore, SharedStore};
use crate::types::{
    AccessRights, AppEntry, AppName, Credentials, DirectoryId, Locality, MachineId,
};

/// External services the launcher depends on.
#[derive(Clone)]
pub struct Collaborators {
    pub store: SharedStore,
    pub keys: SharedKeyProvider,
    pub spawner: SharedSpawner,
}

impl Collaborators {
    /// Ed25519 keys and real detached processes on top of `store`.
    pub fn new(store: SharedStore) -> Self {
        Self {
            store,
            keys: Arc::new(Ed25519Keys),
            spawner: Arc::new(DetachedSpawner),
        }
    }

    /// Defaults backed by a [`DiskStore`] in the configured store directory.
    pub fn from_config(config: &LauncherConfig) -> LauncherResult<Self> {
        let store = DiskStore::new(config.store_dir()?);
        Ok(Self::new(Arc::new(store)))
    }

    pub fn with_keys(mut self, keys: SharedKeyProvider) -> Self {
        self.keys = keys;
        self
    }

    pub fn with_spawner(mut self, spawner: SharedSpawner) -> Self {
        self.spawner = spawner;
        self
    }
}

struct InFlightLaunch {
    app: AppName,
    port: u16,
    abort: oneshot::Sender<()>,
}

struct ControllerState {
    /// `None` once logged out.
    session: Option<Session>,
    launches: HashMap<LaunchId, InFlightLaunch>,
}

impl ControllerState {
    fn session(&self) -> LauncherResult<&Session> {
        self.session.as_ref().ok_or(LauncherError::Stopped)
    }

    fn session_mut(&mut self) -> LauncherResult<&mut Session> {
        self.session.as_mut().ok_or(LauncherError::Stopped)
    }
}

/// Session controller. Cheap to clone; clones share the same session.
#[derive(Clone)]
pub struct Launcher {
    state: Arc<Mutex<ControllerState>>,
    config: Arc<LauncherConfig>,
    collaborators: Collaborators,
    machine_id: MachineId,
}

impl Launcher {
    /// Log into an existing account.
    pub async fn login(
        config: LauncherConfig,
        collaborators: Collaborators,
        credentials: Credentials,
    ) -> LauncherResult<Self> {
        config.validate()?;
        let machine_id = config.resolve_machine_id()?;
        let session = Session::login(
            credentials,
            machine_id.clone(),
            collaborators.store.clone(),
            collaborators.keys.clone(),
        )
        .await?;
        Ok(Self::with_session(config, collaborators, machine_id, session))
    }

    /// Create and store a new, empty account.
    pub async fn create_account(
        config: LauncherConfig,
        collaborators: Collaborators,
        credentials: Credentials,
    ) -> LauncherResult<Self> {
        config.validate()?;
        let machine_id = config.resolve_machine_id()?;
        let session = Session::create_account(
            credentials,
            machine_id.clone(),
            collaborators.store.clone(),
            collaborators.keys.clone(),
        )
        .await?;
        Ok(Self::with_session(config, collaborators, machine_id, session))
    }

    fn with_session(
        config: LauncherConfig,
        collaborators: Collaborators,
        machine_id: MachineId,
        session: Session,
    ) -> Self {
        Self {
            state: Arc::new(Mutex::new(ControllerState {
                session: Some(session),
                launches: HashMap::new(),
            })),
            config: Arc::new(config),
            collaborators,
            machine_id,
        }
    }

    pub fn machine_id(&self) -> &MachineId {
        &self.machine_id
    }

    pub fn config(&self) -> &LauncherConfig {
        &self.config
    }

    /// Save pending changes, abort every in-flight launch and stop. If the
    /// save fails the launcher keeps running and the error is returned.
    pub async fn logout_and_stop(&self) -> LauncherResult<()> {
        let mut state = self.state.lock().await;
        state.session_mut()?.save(false).await?;

        for (id, launch) in state.launches.drain() {
            debug!(launch_id = %id, app = %launch.app, port = launch.port, "Aborting launch");
            // The launch may already be finishing.
            let _ = launch.abort.send(());
        }
        state.session = None;
        info!(machine_id = %self.machine_id, "Logged out");
        Ok(())
    }

    pub async fn apps(&self, locality: Locality) -> LauncherResult<Vec<AppEntry>> {
        let state = self.state.lock().await;
        Ok(state.session()?.registry().list(locality))
    }

    pub async fn has_unsaved_changes(&self) -> LauncherResult<bool> {
        let state = self.state.lock().await;
        Ok(state.session()?.is_dirty())
    }

    /// Number of launches whose handshake has not finished.
    pub async fn in_flight_launches(&self) -> usize {
        self.state.lock().await.launches.len()
    }

    pub async fn add_app(
        &self,
        name: &str,
        path: impl Into<PathBuf>,
        args: Vec<String>,
        icon: Vec<u8>,
        auto_start: bool,
    ) -> LauncherResult<()> {
        let entry = AppEntry::new(AppName::new(name)?, path)
            .with_args(args)
            .with_icon(icon)
            .with_auto_start(auto_start);
        self.mutate(|registry| registry.add(entry)).await?;
        info!(app = name, "App added");
        Ok(())
    }

    pub async fn link_app(
        &self,
        name: &str,
        path: impl Into<PathBuf>,
        args: Vec<String>,
        auto_start: bool,
    ) -> LauncherResult<()> {
        let name = existing(name)?;
        let path = path.into();
        self.mutate(|registry| registry.link(&name, path, args, auto_start))
            .await?;
        info!(app = %name, "App linked");
        Ok(())
    }

    pub async fn update_app_name(&self, name: &str, new_name: &str) -> LauncherResult<()> {
        let name = existing(name)?;
        let new_name = AppName::new(new_name)?;
        self.mutate(|registry| registry.update_name(&name, new_name))
            .await
    }

    pub async fn update_app_path(&self, name: &str, path: impl Into<PathBuf>) -> LauncherResult<()> {
        let name = existing(name)?;
        let path = path.into();
        self.mutate(|registry| registry.update_path(&name, path))
            .await
    }

    pub async fn update_app_args(&self, name: &str, args: Vec<String>) -> LauncherResult<()> {
        let name = existing(name)?;
        self.mutate(|registry| registry.update_args(&name, args))
            .await
    }

    pub async fn update_app_safe_drive_access(
        &self,
        name: &str,
        rights: AccessRights,
    ) -> LauncherResult<()> {
        let name = existing(name)?;
        self.mutate(|registry| registry.update_safe_drive_access(&name, rights))
            .await
    }

    /// Grant `rights` on `directory`, or revoke access with `None`.
    pub async fn update_app_directory_access(
        &self,
        name: &str,
        directory: DirectoryId,
        rights: Option<AccessRights>,
    ) -> LauncherResult<()> {
        let name = existing(name)?;
        self.mutate(|registry| registry.update_directory_access(&name, directory, rights))
            .await
    }

    pub async fn update_app_icon(&self, name: &str, icon: Vec<u8>) -> LauncherResult<()> {
        let name = existing(name)?;
        self.mutate(|registry| registry.update_icon(&name, icon))
            .await
    }

    pub async fn update_app_auto_start(&self, name: &str, auto_start: bool) -> LauncherResult<()> {
        let name = existing(name)?;
        self.mutate(|registry| registry.update_auto_start(&name, auto_start))
            .await
    }

    pub async fn remove_app_locally(&self, name: &str) -> LauncherResult<()> {
        let name = existing(name)?;
        self.mutate(|registry| registry.remove_local(&name))
            .await?;
        info!(app = %name, "Local app removed");
        Ok(())
    }

    pub async fn remove_app_from_network(&self, name: &str) -> LauncherResult<()> {
        let name = existing(name)?;
        self.mutate(|registry| registry.remove_non_local(&name))
            .await?;
        info!(app = %name, "Non-local app removed");
        Ok(())
    }

    /// Persist the session. Without `force`, a session with no unsaved
    /// changes is not written. Returns whether a write happened.
    pub async fn save_session(&self, force: bool) -> LauncherResult<bool> {
        let mut state = self.state.lock().await;
        state.session_mut()?.save(force).await
    }

    pub async fn revert_to_last_saved_session(&self) -> LauncherResult<()> {
        let mut state = self.state.lock().await;
        state.session_mut()?.revert();
        Ok(())
    }

    /// Start a local app and run its handshake. Resolves once the app has
    /// confirmed its grants, or with `LaunchTimeout` / `ProtocolError`.
    pub async fn launch_app(&self, name: &str) -> LauncherResult<()> {
        let name = existing(name)?;
        let (launch_id, task) = {
            let mut state = self.state.lock().await;
            let (program, mut args, grants) = {
                let entry = state.session()?.registry().lookup_local(&name)?;
                (entry.path.clone(), entry.args.clone(), entry.grants())
            };

            let listener = handshake::bind_loopback(self.config.port_attempts).await?;
            let port = listener
                .local_addr()
                .map_err(LauncherError::Loopback)?
                .port();
            args.push(launcher_port_arg(port));

            let pid = self
                .collaborators
                .spawner
                .spawn_detached(&program, &args)
                .map_err(|source| LauncherError::Spawn {
                    app: name.to_string(),
                    source,
                })?;

            let launch_id = LaunchId::new();
            let (abort_tx, abort_rx) = oneshot::channel();
            state.launches.insert(
                launch_id,
                InFlightLaunch {
                    app: name.clone(),
                    port,
                    abort: abort_tx,
                },
            );
            info!(launch_id = %launch_id, app = %name, port, pid = ?pid, "Launch started");

            let ctx = LaunchContext::new(
                name.clone(),
                port,
                grants,
                self.config.connect_timeout(),
                self.config.handshake_timeout(),
            );
            let driver = LaunchDriver::new(ctx, listener, self.collaborators.keys.clone());
            let shared = Arc::clone(&self.state);
            let task = tokio::spawn(async move {
                let report = driver.run(abort_rx).await;
                shared.lock().await.launches.remove(&launch_id);
                report
            });
            (launch_id, task)
        };

        let report = task.await.map_err(|e| LauncherError::ProtocolError {
            app: name.to_string(),
            reason: format!("launch task {} failed: {}", launch_id, e),
        })?;
        report.into_result()
    }

    async fn mutate<T>(
        &self,
        op: impl FnOnce(&mut Registry) -> LauncherResult<T>,
    ) -> LauncherResult<T> {
        let mut state = self.state.lock().await;
        state.session_mut()?.mutate(op)
    }
}

impl std::fmt::Debug for Launcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Launcher")
            .field("machine_id", &self.machine_id)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// An app name that refers to an existing entry. Names that could never have
/// been added are simply not found.
fn existing(name: &str) -> LauncherResult<AppName> {
    AppName::new(name).map_err(|_| LauncherError::NotFound(name.to_string()))
}
