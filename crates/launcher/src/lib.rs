//! safe-launcher core
//!
//! Local session controller for a decentralized-storage client: keeps the
//! user's account and app registry for the length of a session, persists it
//! through a network store and hands launched apps their directory grants
//! over a short loopback handshake.
//!
//! ```no_run
//! use std::sync::Arc;
//! use safe_launcher::{
//!     Collaborators, Credentials, Keyword, Launcher, LauncherConfig, MemoryStore, Password, Pin,
//! };
//!
//! # async fn demo() -> safe_launcher::LauncherResult<()> {
//! let config = LauncherConfig::load(None);
//! let collaborators = Collaborators::new(Arc::new(MemoryStore::new()));
//! let credentials = Credentials::new(Keyword::new("kw"), Pin::new("1234"), Password::new("pw"));
//!
//! let launcher = Launcher::create_account(config, collaborators, credentials).await?;
//! launcher.add_app("Notes", "/usr/bin/notes", vec![], vec![], false).await?;
//! launcher.save_session(false).await?;
//! launcher.launch_app("Notes").await?;
//! launcher.logout_and_stop().await?;
//! # Ok(())
//! # }
//! ```

pub mod account;
pub mod config;
pub mod controller;
pub mod envelope;
pub mod error;
pub mod handshake;
pub mod keys;
pub mod registry;
pub mod session;
pub mod spawn;
pub mod store;
pub mod types;

pub use account::Account;
pub use config::LauncherConfig;
pub use controller::{Collaborators, Launcher};
pub use error::{ErrorCategory, LauncherError, LauncherResult};
pub use handshake::{LaunchContext, LaunchEvent, LaunchId, LaunchReport, LaunchState};
pub use keys::{Ed25519Keys, IdentityKeys, KeyProvider, SharedKeyProvider};
pub use registry::{Registry, RegistrySnapshot};
pub use session::Session;
pub use spawn::{DetachedSpawner, ProcessSpawner, SharedSpawner};
pub use store::{DiskStore, MemoryStore, NetworkStore, PutMode, SharedStore, StoreError};
pub use types::{
    AccessRights, AccountLocator, AppEntry, AppName, Credentials, DirectoryGrant, DirectoryId,
    Keyword, LocalDetails, Locality, MachineId, Password, Pin,
};
