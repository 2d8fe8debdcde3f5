//! Launch handshake.
//!
//! Each launch owns a [`LaunchContext`], a state machine advanced by
//! [`LaunchEvent`]s:
//!
//! ```text
//! Spawned → AwaitingConnection → AwaitingKey → GrantSent → Confirmed
//!                  (any non-terminal state) → TimedOut | Rejected
//! ```
//!
//! The context does no I/O. It returns [`Directive`]s that the driver
//! carries out against the listener and the connection. Two deadlines apply
//! in sequence: `connect_timeout` from the start of listening, then a fresh
//! `handshake_timeout` from the moment the app connects.

use std::fmt;
use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use rand::Rng;
use safe_launcher_client::{decode_public_key, HandshakeMessage, LineTransport, TransportError};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{LauncherError, LauncherResult};
use crate::keys::{KeyProvider, SharedKeyProvider};
use crate::types::{AppName, DirectoryGrant};

pub const MIN_LAUNCH_PORT: u16 = 1025;
pub const MAX_LAUNCH_PORT: u16 = 65535;

/// Reason recorded when a launch is aborted by logout.
pub const STOPPED_REASON: &str = "launcher stopped";

/// Identifies one in-flight launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LaunchId(Uuid);

impl LaunchId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for LaunchId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for LaunchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchState {
    Spawned,
    AwaitingConnection,
    AwaitingKey,
    GrantSent,
    Confirmed,
    TimedOut,
    Rejected,
}

impl LaunchState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            LaunchState::Confirmed | LaunchState::TimedOut | LaunchState::Rejected
        )
    }

    /// What the launcher is waiting for in this state.
    pub fn phase(&self) -> &'static str {
        match self {
            LaunchState::Spawned => "starting",
            LaunchState::AwaitingConnection => "awaiting connection",
            LaunchState::AwaitingKey => "awaiting session key",
            LaunchState::GrantSent => "awaiting confirmation",
            LaunchState::Confirmed => "confirmed",
            LaunchState::TimedOut => "timed out",
            LaunchState::Rejected => "rejected",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchEvent {
    /// The listener is open and the app process is running.
    Listening,
    Connected,
    Message(HandshakeMessage),
    /// The app closed its end of the connection.
    ConnectionClosed,
    DeadlineExpired,
    /// A frame that is not a valid handshake message.
    Malformed(String),
    TransportFailed(String),
    Aborted,
}

/// I/O the driver must perform after a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    CloseListener,
    SendGrants(Vec<DirectoryGrant>),
    CloseConnection,
}

/// Per-launch state. Grants are fixed when the launch starts.
#[derive(Debug)]
pub struct LaunchContext {
    app: AppName,
    port: u16,
    grants: Vec<DirectoryGrant>,
    connect_timeout: Duration,
    handshake_timeout: Duration,
    state: LaunchState,
    deadline: Option<Instant>,
    peer_key: Option<Vec<u8>>,
    timed_out_in: Option<&'static str>,
    reason: Option<String>,
}

impl LaunchContext {
    pub fn new(
        app: AppName,
        port: u16,
        grants: Vec<DirectoryGrant>,
        connect_timeout: Duration,
        handshake_timeout: Duration,
    ) -> Self {
        Self {
            app,
            port,
            grants,
            connect_timeout,
            handshake_timeout,
            state: LaunchState::Spawned,
            deadline: None,
            peer_key: None,
            timed_out_in: None,
            reason: None,
        }
    }

    pub fn state(&self) -> LaunchState {
        self.state
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn peer_key(&self) -> Option<&[u8]> {
        self.peer_key.as_deref()
    }

    /// Apply `event` observed at `now`.
    pub fn advance(
        &mut self,
        event: LaunchEvent,
        now: Instant,
        keys: &dyn KeyProvider,
    ) -> Vec<Directive> {
        if self.state.is_terminal() {
            return Vec::new();
        }
        let from = self.state;

        let directives = match (from, event) {
            (_, LaunchEvent::Aborted) => self.reject(STOPPED_REASON.to_string()),
            (_, LaunchEvent::DeadlineExpired) => {
                self.timed_out_in = Some(from.phase());
                self.state = LaunchState::TimedOut;
                self.deadline = None;
                vec![Directive::CloseListener, Directive::CloseConnection]
            }
            (LaunchState::Spawned, LaunchEvent::Listening) => {
                self.state = LaunchState::AwaitingConnection;
                self.deadline = Some(now + self.connect_timeout);
                Vec::new()
            }
            (LaunchState::AwaitingConnection, LaunchEvent::Connected) => {
                self.state = LaunchState::AwaitingKey;
                self.deadline = Some(now + self.handshake_timeout);
                vec![Directive::CloseListener]
            }
            (
                LaunchState::AwaitingKey,
                LaunchEvent::Message(HandshakeMessage::SessionKey { public_key }),
            ) => match decode_public_key(&public_key).filter(|key| keys.validate_public_key(key)) {
                Some(key) => {
                    self.peer_key = Some(key);
                    self.state = LaunchState::GrantSent;
                    vec![Directive::SendGrants(self.grants.clone())]
                }
                None => self.reject("malformed session key".to_string()),
            },
            (LaunchState::GrantSent, LaunchEvent::Message(HandshakeMessage::Confirm)) => {
                self.state = LaunchState::Confirmed;
                self.deadline = None;
                vec![Directive::CloseConnection]
            }
            (state, LaunchEvent::Message(message)) => self.reject(format!(
                "unexpected {} message while {}",
                message.kind(),
                state.phase()
            )),
            (state, LaunchEvent::ConnectionClosed) => {
                self.reject(format!("connection closed while {}", state.phase()))
            }
            (_, LaunchEvent::Malformed(detail)) => self.reject(detail),
            (state, LaunchEvent::TransportFailed(detail)) => {
                self.reject(format!("transport failure while {}: {}", state.phase(), detail))
            }
            (state, event) => self.reject(format!("unexpected {:?} while {}", event, state.phase())),
        };

        debug!(
            app = %self.app,
            port = self.port,
            from = from.phase(),
            to = self.state.phase(),
            "Launch state transition"
        );
        directives
    }

    fn reject(&mut self, reason: String) -> Vec<Directive> {
        self.state = LaunchState::Rejected;
        self.deadline = None;
        self.reason = Some(reason);
        vec![Directive::CloseListener, Directive::CloseConnection]
    }

    pub fn into_report(self) -> LaunchReport {
        LaunchReport {
            app: self.app,
            port: self.port,
            state: self.state,
            timed_out_in: self.timed_out_in,
            reason: self.reason,
            peer_key: self.peer_key,
        }
    }
}

/// Terminal outcome of one launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchReport {
    pub app: AppName,
    pub port: u16,
    pub state: LaunchState,
    pub timed_out_in: Option<&'static str>,
    pub reason: Option<String>,
    pub peer_key: Option<Vec<u8>>,
}

impl LaunchReport {
    pub fn into_result(self) -> LauncherResult<()> {
        match self.state {
            LaunchState::Confirmed => Ok(()),
            LaunchState::TimedOut => Err(LauncherError::LaunchTimeout {
                app: self.app.to_string(),
                phase: self.timed_out_in.unwrap_or("awaiting connection"),
            }),
            _ => Err(LauncherError::ProtocolError {
                app: self.app.to_string(),
                reason: self
                    .reason
                    .unwrap_or_else(|| format!("launch ended while {}", self.state.phase())),
            }),
        }
    }
}

/// Open a loopback listener on a random port in
/// [`MIN_LAUNCH_PORT`, `MAX_LAUNCH_PORT`], drawing a new port whenever the
/// chosen one is taken.
pub async fn bind_loopback(attempts: u32) -> LauncherResult<TcpListener> {
    for attempt in 1..=attempts {
        let port = rand::thread_rng().gen_range(MIN_LAUNCH_PORT..=MAX_LAUNCH_PORT);
        match TcpListener::bind(SocketAddr::from((Ipv4Addr::LOCALHOST, port))).await {
            Ok(listener) => return Ok(listener),
            Err(err) if err.kind() == io::ErrorKind::AddrInUse => {
                debug!(port, attempt, "Launch port in use, drawing another");
            }
            Err(err) => return Err(LauncherError::Loopback(err)),
        }
    }
    Err(LauncherError::Loopback(io::Error::new(
        io::ErrorKind::AddrInUse,
        format!("no free loopback port after {} attempts", attempts),
    )))
}

/// Runs one [`LaunchContext`] to a terminal state over real sockets.
pub struct LaunchDriver {
    ctx: LaunchContext,
    listener: Option<TcpListener>,
    transport: Option<LineTransport>,
    keys: SharedKeyProvider,
}

impl LaunchDriver {
    pub fn new(ctx: LaunchContext, listener: TcpListener, keys: SharedKeyProvider) -> Self {
        Self {
            ctx,
            listener: Some(listener),
            transport: None,
            keys,
        }
    }

    /// Drive the handshake until it is confirmed, times out, is rejected or
    /// `abort` fires.
    pub async fn run(mut self, mut abort: oneshot::Receiver<()>) -> LaunchReport {
        self.dispatch(LaunchEvent::Listening).await;

        while !self.ctx.state().is_terminal() {
            let deadline = self.ctx.deadline().unwrap_or_else(Instant::now);
            let event = tokio::select! {
                biased;
                _ = &mut abort => LaunchEvent::Aborted,
                event = timeout_at(deadline, self.next_event()) => {
                    event.unwrap_or(LaunchEvent::DeadlineExpired)
                }
            };
            self.dispatch(event).await;
        }

        let report = self.ctx.into_report();
        match report.state {
            LaunchState::Confirmed => info!(app = %report.app, port = report.port, "App launched"),
            state => warn!(
                app = %report.app,
                port = report.port,
                state = state.phase(),
                reason = report.reason.as_deref().unwrap_or(""),
                "Launch failed"
            ),
        }
        report
    }

    async fn dispatch(&mut self, event: LaunchEvent) {
        let mut pending = Some(event);
        while let Some(event) = pending.take() {
            let directives = self
                .ctx
                .advance(event, Instant::now(), self.keys.as_ref());
            for directive in directives {
                if let Some(follow_up) = self.apply(directive).await {
                    pending = Some(follow_up);
                }
            }
        }
    }

    async fn apply(&mut self, directive: Directive) -> Option<LaunchEvent> {
        match directive {
            Directive::CloseListener => {
                self.listener = None;
                None
            }
            Directive::SendGrants(grants) => {
                let transport = self.transport.as_mut()?;
                let deadline = self.ctx.deadline().unwrap_or_else(Instant::now);
                match timeout_at(deadline, transport.send(&HandshakeMessage::Grants { grants }))
                    .await
                {
                    Ok(Ok(())) => None,
                    Ok(Err(err)) => Some(LaunchEvent::TransportFailed(err.to_string())),
                    Err(_) => Some(LaunchEvent::DeadlineExpired),
                }
            }
            Directive::CloseConnection => {
                if let Some(transport) = self.transport.take() {
                    if let Err(err) = transport.close().await {
                        debug!(error = %err, "Error closing launch connection");
                    }
                }
                None
            }
        }
    }

    async fn next_event(&mut self) -> LaunchEvent {
        if let Some(transport) = self.transport.as_mut() {
            return match transport.receive().await {
                Ok(Some(message)) => LaunchEvent::Message(message),
                Ok(None) => LaunchEvent::ConnectionClosed,
                Err(TransportError::Io(err)) => LaunchEvent::TransportFailed(err.to_string()),
                Err(err) => LaunchEvent::Malformed(err.to_string()),
            };
        }
        match self.listener.as_ref() {
            Some(listener) => match listener.accept().await {
                Ok((stream, peer)) => {
                    debug!(port = self.ctx.port, %peer, "App connected");
                    self.transport = Some(LineTransport::new(stream));
                    LaunchEvent::Connected
                }
                Err(err) => LaunchEvent::TransportFailed(err.to_string()),
            },
            None => std::future::pending().await,
        }
    }
}
