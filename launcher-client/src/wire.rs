//! Handshake wire contract shared by the launcher and launched apps.
//!
//! Every frame is a single JSON object terminated by `\n`. Messages are
//! internally tagged by `type`:
//!
//! ```text
//! App                                     Launcher
//!  |  -- session_key { public_key } -->      |
//!  |  <-- grants { grants } -----------------|
//!  |  -- confirm ---------------------------> |
//!  |                        (launcher closes) |
//! ```

use std::fmt;

use base64::{engine::general_purpose, Engine as _};
use serde::{Deserialize, Serialize};

/// Largest frame either side will accept, newline included.
pub const MAX_FRAME_BYTES: usize = 64 * 1024;

/// Command-line flag carrying the launcher's loopback port to a launched app.
pub const LAUNCHER_PORT_ARG: &str = "--launcher_port";

/// Access an app is granted on one storage directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessRights {
    ReadOnly,
    ReadWrite,
}

impl AccessRights {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessRights::ReadOnly => "read_only",
            AccessRights::ReadWrite => "read_write",
        }
    }
}

/// Identifier of a storage directory an app may be granted.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DirectoryId(String);

impl DirectoryId {
    pub const SAFE_DRIVE: &'static str = "SafeDrive";

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The user's shared drive.
    pub fn safe_drive() -> Self {
        Self(Self::SAFE_DRIVE.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DirectoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One directory capability issued to a launched app.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryGrant {
    pub directory: DirectoryId,
    pub rights: AccessRights,
}

impl DirectoryGrant {
    pub fn new(directory: DirectoryId, rights: AccessRights) -> Self {
        Self { directory, rights }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HandshakeMessage {
    /// App → launcher: the app's session public key, base64 encoded.
    SessionKey { public_key: String },
    /// Launcher → app: ordered directory grants.
    Grants { grants: Vec<DirectoryGrant> },
    /// App → launcher: receipt of the grants.
    Confirm,
}

impl HandshakeMessage {
    pub fn session_key(public_key: &[u8]) -> Self {
        HandshakeMessage::SessionKey {
            public_key: general_purpose::STANDARD.encode(public_key),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            HandshakeMessage::SessionKey { .. } => "session_key",
            HandshakeMessage::Grants { .. } => "grants",
            HandshakeMessage::Confirm => "confirm",
        }
    }
}

/// Decode the base64 payload of a `session_key` message.
pub fn decode_public_key(encoded: &str) -> Option<Vec<u8>> {
    general_purpose::STANDARD.decode(encoded.trim()).ok()
}

/// Build the port argument appended to a launched app's command line.
pub fn launcher_port_arg(port: u16) -> String {
    format!("{}={}", LAUNCHER_PORT_ARG, port)
}

/// Find the launcher port in an app's command line.
///
/// Accepts both `--launcher_port=X` and `--launcher_port X`; the last
/// occurrence wins since the launcher always appends its own.
pub fn parse_launcher_port<I, S>(args: I) -> Option<u16>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut port = None;
    let mut expect_value = false;
    for arg in args {
        let arg = arg.as_ref();
        if expect_value {
            port = arg.parse().ok().or(port);
            expect_value = false;
            continue;
        }
        if arg == LAUNCHER_PORT_ARG {
            expect_value = true;
        } else if let Some(value) = arg
            .strip_prefix(LAUNCHER_PORT_ARG)
            .and_then(|rest| rest.strip_prefix('='))
        {
            port = value.parse().ok().or(port);
        }
    }
    port
}
