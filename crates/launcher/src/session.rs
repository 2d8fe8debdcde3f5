//! Account session lifecycle: login, create, mutate, save and revert.

use tracing::{debug, info};

use crate::account::Account;
use crate::envelope;
use crate::error::{LauncherError, LauncherResult};
use crate::keys::SharedKeyProvider;
use crate::registry::{Registry, RegistrySnapshot};
use crate::store::{PutMode, SharedStore};
use crate::types::{AccountLocator, Credentials, MachineId};

/// A logged-in account bound to its store.
pub struct Session {
    credentials: Credentials,
    locator: AccountLocator,
    machine_id: MachineId,
    account: Account,
    /// Registry as of the last successful save, recorded on the first
    /// mutation after it.
    rollback_snapshot: Option<RegistrySnapshot>,
    store: SharedStore,
    keys: SharedKeyProvider,
}

impl Session {
    pub async fn login(
        credentials: Credentials,
        machine_id: MachineId,
        store: SharedStore,
        keys: SharedKeyProvider,
    ) -> LauncherResult<Self> {
        let locator = credentials.locator();
        let blob = store
            .fetch(&locator)
            .await?
            .ok_or(LauncherError::AccountNotFound)?;
        let opened = envelope::open(&credentials, keys.as_ref(), &blob)?;
        let account = Account::from_payload(&opened.payload, &machine_id, &opened.public_key)?;

        info!(
            locator = %locator,
            apps = account.registry().len(),
            "Logged in"
        );
        Ok(Self {
            credentials,
            locator,
            machine_id,
            account,
            rollback_snapshot: None,
            store,
            keys,
        })
    }

    pub async fn create_account(
        credentials: Credentials,
        machine_id: MachineId,
        store: SharedStore,
        keys: SharedKeyProvider,
    ) -> LauncherResult<Self> {
        let locator = credentials.locator();
        if store.fetch(&locator).await?.is_some() {
            return Err(LauncherError::AccountExists);
        }

        let session = Self {
            account: Account::new(keys.generate()),
            credentials,
            locator,
            machine_id,
            rollback_snapshot: None,
            store,
            keys,
        };
        let blob = session.seal()?;
        session
            .store
            .put(&session.locator, blob, PutMode::Create)
            .await?;

        info!(locator = %session.locator, "Account created");
        Ok(session)
    }

    pub fn registry(&self) -> &Registry {
        &self.account.registry
    }

    pub fn account(&self) -> &Account {
        &self.account
    }

    pub fn is_dirty(&self) -> bool {
        self.account.dirty
    }

    pub fn machine_id(&self) -> &MachineId {
        &self.machine_id
    }

    /// Apply one registry mutation. On success the account becomes dirty and,
    /// if this is the first change since the last save, the prior registry is
    /// kept for [`Session::revert`]. On failure nothing changes.
    pub fn mutate<T>(
        &mut self,
        op: impl FnOnce(&mut Registry) -> LauncherResult<T>,
    ) -> LauncherResult<T> {
        let before = self
            .rollback_snapshot
            .is_none()
            .then(|| self.account.registry.snapshot());
        let value = op(&mut self.account.registry)?;
        if before.is_some() {
            self.rollback_snapshot = before;
        }
        self.account.dirty = true;
        Ok(value)
    }

    /// Persist the account. Returns whether a write was issued; a clean
    /// account is only written when `force` is set.
    pub async fn save(&mut self, force: bool) -> LauncherResult<bool> {
        if !force && !self.account.dirty {
            debug!(locator = %self.locator, "Save skipped, no unsaved changes");
            return Ok(false);
        }

        let blob = self.seal()?;
        self.store
            .put(&self.locator, blob, PutMode::Replace)
            .await?;

        self.account.dirty = false;
        self.rollback_snapshot = None;
        info!(
            locator = %self.locator,
            apps = self.account.registry.len(),
            forced = force,
            "Session saved"
        );
        Ok(true)
    }

    /// Undo every mutation since the last successful save. A no-op when
    /// nothing has changed since.
    pub fn revert(&mut self) {
        match self.rollback_snapshot.take() {
            Some(snapshot) => {
                self.account.registry.restore(snapshot);
                self.account.dirty = false;
                info!(locator = %self.locator, "Reverted to last saved session");
            }
            None => debug!(locator = %self.locator, "Nothing to revert"),
        }
    }

    fn seal(&self) -> LauncherResult<Vec<u8>> {
        let payload = self.account.to_payload(&self.machine_id)?;
        envelope::seal(
            &self.credentials,
            self.keys.as_ref(),
            &self.account.identity,
            &payload,
        )
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("locator", &self.locator)
            .field("machine_id", &self.machine_id)
            .field("apps", &self.account.registry.len())
            .field("dirty", &self.account.dirty)
            .finish_non_exhaustive()
    }
}
