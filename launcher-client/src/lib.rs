//! safe-launcher client library
//!
//! Used by apps started through the launcher. An app finds the launcher's
//! loopback port on its command line, hands over its session public key,
//! receives the directories it may use and confirms receipt. After that the
//! app no longer depends on the launcher running.

pub mod transport;
pub mod wire;

use std::io;
use std::net::Ipv4Addr;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::time::{timeout_at, Instant};
use tracing::debug;

pub use transport::{LineTransport, TransportError};
pub use wire::{
    decode_public_key, launcher_port_arg, parse_launcher_port, AccessRights, DirectoryGrant,
    DirectoryId, HandshakeMessage, LAUNCHER_PORT_ARG, MAX_FRAME_BYTES,
};

/// Default budget for a whole registration, connect included.
pub const DEFAULT_REGISTER_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("launcher port not found on the command line")]
    MissingPort,
    #[error("timeout")]
    Timeout,
    #[error("disconnected")]
    Disconnected,
    #[error("unexpected {0} message from launcher")]
    UnexpectedMessage(&'static str),
    #[error("failed to connect to launcher: {0}")]
    Connect(#[source] io::Error),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Step-by-step app side of the handshake.
pub struct AppHandshake {
    transport: LineTransport,
}

impl AppHandshake {
    pub async fn connect(port: u16) -> Result<Self, ClientError> {
        let stream = TcpStream::connect((Ipv4Addr::LOCALHOST, port))
            .await
            .map_err(ClientError::Connect)?;
        debug!(port, "Connected to launcher");
        Ok(Self {
            transport: LineTransport::new(stream),
        })
    }

    pub async fn send_session_key(&mut self, public_key: &[u8]) -> Result<(), ClientError> {
        self.transport
            .send(&HandshakeMessage::session_key(public_key))
            .await?;
        Ok(())
    }

    pub async fn receive_grants(&mut self) -> Result<Vec<DirectoryGrant>, ClientError> {
        match self.transport.receive().await? {
            Some(HandshakeMessage::Grants { grants }) => Ok(grants),
            Some(other) => Err(ClientError::UnexpectedMessage(other.kind())),
            None => Err(ClientError::Disconnected),
        }
    }

    /// Confirm receipt and wait for the launcher to hang up.
    pub async fn confirm(mut self) -> Result<(), ClientError> {
        self.transport.send(&HandshakeMessage::Confirm).await?;
        match self.transport.receive().await? {
            None => Ok(()),
            Some(other) => Err(ClientError::UnexpectedMessage(other.kind())),
        }
    }

    /// Raw access for callers that need to speak off-script.
    pub fn transport_mut(&mut self) -> &mut LineTransport {
        &mut self.transport
    }
}

/// Run the whole handshake against the launcher listening on `port`.
///
/// `budget` bounds everything from connecting to the launcher closing the
/// connection after confirmation.
pub async fn register_app_session(
    port: u16,
    public_key: &[u8],
    budget: Duration,
) -> Result<Vec<DirectoryGrant>, ClientError> {
    let deadline = Instant::now() + budget;
    timeout_at(deadline, async {
        let mut handshake = AppHandshake::connect(port).await?;
        handshake.send_session_key(public_key).await?;
        let grants = handshake.receive_grants().await?;
        debug!(count = grants.len(), "Received directory grants");
        handshake.confirm().await?;
        Ok::<_, ClientError>(grants)
    })
    .await
    .map_err(|_| ClientError::Timeout)?
}

/// Same as [`register_app_session`] with the port taken from `args`.
pub async fn register_with_args<I, S>(
    args: I,
    public_key: &[u8],
    budget: Duration,
) -> Result<Vec<DirectoryGrant>, ClientError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let port = parse_launcher_port(args).ok_or(ClientError::MissingPort)?;
    register_app_session(port, public_key, budget).await
}

/// Same as [`register_app_session`] with the port read from this process's
/// command line.
pub async fn register_from_args(
    public_key: &[u8],
    budget: Duration,
) -> Result<Vec<DirectoryGrant>, ClientError> {
    register_with_args(std::env::args(), public_key, budget).await
}
