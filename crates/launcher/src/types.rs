use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{LauncherError, LauncherResult};
pub use safe_launcher_client::{AccessRights, DirectoryGrant, DirectoryId};

pub const MAX_APP_NAME_BYTES: usize = 255;

/// Name of an app, unique across local and non-local apps.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AppName(String);

impl AppName {
    pub fn new(name: impl Into<String>) -> LauncherResult<Self> {
        let name = name.into();
        let valid = !name.trim().is_empty()
            && name.len() <= MAX_APP_NAME_BYTES
            && !name.chars().any(char::is_control);
        if valid {
            Ok(Self(name))
        } else {
            Err(LauncherError::InvalidAppName(name))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for AppName {
    type Error = LauncherError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        AppName::new(value)
    }
}

impl From<AppName> for String {
    fn from(value: AppName) -> Self {
        value.0
    }
}

impl fmt::Display for AppName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifies the machine a launcher runs on; install details are keyed by it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MachineId(String);

impl MachineId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MachineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Locality {
    /// Added on this machine; can be launched here.
    Local,
    /// Added for this account on another machine; must be linked first.
    NonLocal,
}

/// How an app is installed on one machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalDetails {
    pub path: PathBuf,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub auto_start: bool,
}

impl LocalDetails {
    pub fn new(path: impl Into<PathBuf>, args: Vec<String>, auto_start: bool) -> Self {
        Self {
            path: path.into(),
            args,
            auto_start,
        }
    }

    pub(crate) fn of(entry: &AppEntry) -> Self {
        Self::new(entry.path.clone(), entry.args.clone(), entry.auto_start)
    }
}

/// One registered app.
///
/// `path`, `args` and `auto_start` are this machine's install for a local
/// entry. A non-local entry mirrors the first machine it is installed on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppEntry {
    pub name: AppName,
    pub path: PathBuf,
    pub args: Vec<String>,
    pub icon: Vec<u8>,
    pub auto_start: bool,
    pub permitted_dirs: BTreeMap<DirectoryId, AccessRights>,
    pub(crate) locality: Locality,
    /// Installs on every other machine, carried through save and load.
    pub(crate) other_machines: BTreeMap<MachineId, LocalDetails>,
}

impl AppEntry {
    /// A local entry with no arguments, icon or directory rights.
    pub fn new(name: AppName, path: impl Into<PathBuf>) -> Self {
        Self {
            name,
            path: path.into(),
            args: Vec::new(),
            icon: Vec::new(),
            auto_start: false,
            permitted_dirs: BTreeMap::new(),
            locality: Locality::Local,
            other_machines: BTreeMap::new(),
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_icon(mut self, icon: Vec<u8>) -> Self {
        self.icon = icon;
        self
    }

    pub fn with_auto_start(mut self, auto_start: bool) -> Self {
        self.auto_start = auto_start;
        self
    }

    pub fn with_access(mut self, directory: DirectoryId, rights: AccessRights) -> Self {
        self.permitted_dirs.insert(directory, rights);
        self
    }

    pub fn locality(&self) -> Locality {
        self.locality
    }

    pub fn is_local(&self) -> bool {
        self.locality == Locality::Local
    }

    /// Machines other than this one the app is installed on.
    pub fn other_machines(&self) -> impl Iterator<Item = &MachineId> {
        self.other_machines.keys()
    }

    /// Show `details` as this entry's install.
    pub(crate) fn apply_details(&mut self, details: LocalDetails) {
        self.path = details.path;
        self.args = details.args;
        self.auto_start = details.auto_start;
    }

    /// Grants issued to this app at launch, ordered by directory.
    pub fn grants(&self) -> Vec<DirectoryGrant> {
        self.permitted_dirs
            .iter()
            .map(|(directory, rights)| DirectoryGrant::new(directory.clone(), *rights))
            .collect()
    }
}

macro_rules! secret_newtype {
    ($name:ident) => {
        #[derive(Clone, PartialEq, Eq)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($name), "(<redacted>)"))
            }
        }
    };
}

secret_newtype!(Keyword);
secret_newtype!(Pin);
secret_newtype!(Password);

/// Login material for one account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub keyword: Keyword,
    pub pin: Pin,
    pub password: Password,
}

impl Credentials {
    pub fn new(keyword: Keyword, pin: Pin, password: Password) -> Self {
        Self {
            keyword,
            pin,
            password,
        }
    }

    /// Where the account lives in the store. Depends on keyword and pin only.
    pub fn locator(&self) -> AccountLocator {
        let mut hasher = Sha256::new();
        hasher.update(b"safe-launcher/locator/v1");
        absorb(&mut hasher, self.keyword.as_str());
        absorb(&mut hasher, self.pin.as_str());
        AccountLocator(hex::encode(hasher.finalize()))
    }

    /// Key for the account envelope's authentication tag.
    pub(crate) fn sealing_key(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(b"safe-launcher/seal/v1");
        absorb(&mut hasher, self.keyword.as_str());
        absorb(&mut hasher, self.pin.as_str());
        absorb(&mut hasher, self.password.as_str());
        hasher.finalize().into()
    }
}

// Length-prefixed so ("ab","c") and ("a","bc") differ.
fn absorb(hasher: &mut Sha256, field: &str) {
    hasher.update((field.len() as u64).to_be_bytes());
    hasher.update(field.as_bytes());
}

/// Opaque, credential-derived key of an account blob in the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AccountLocator(String);

impl AccountLocator {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
