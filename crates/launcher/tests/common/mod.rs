//! Shared fixtures for launcher integration tests.
#![allow(dead_code)]

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use safe_launcher::{
    Collaborators, Credentials, DirectoryGrant, Ed25519Keys, KeyProvider, Keyword, Launcher,
    LauncherConfig, MemoryStore, Password, Pin, ProcessSpawner,
};
use safe_launcher_client::{parse_launcher_port, AppHandshake, HandshakeMessage};
use tokio::time::sleep;

/// How a scripted app behaves once spawned.
#[derive(Debug, Clone)]
pub enum PeerBehaviour {
    /// Full handshake.
    Honest,
    /// Connect after the delay, then never say anything.
    SilentAfter(Duration),
    NeverConnects,
    /// Send a session key that is not a valid public key.
    MalformedKey,
    /// Send a line that is not a handshake message.
    Garbage,
    /// Confirm before sending a key.
    ConfirmFirst,
    /// Send the key, then hang up without confirming.
    DisconnectAfterKey,
    /// The process cannot be started at all.
    SpawnFails,
}

/// What a scripted app saw.
#[derive(Debug, Clone)]
pub struct PeerRecord {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub port: Option<u16>,
    pub grants: Option<Vec<DirectoryGrant>>,
}

/// Spawner that runs an in-process peer task instead of a real program.
#[derive(Default)]
pub struct ScriptedSpawner {
    behaviours: Mutex<HashMap<PathBuf, PeerBehaviour>>,
    records: Arc<Mutex<Vec<PeerRecord>>>,
}

impl ScriptedSpawner {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Programs without a script behave honestly.
    pub fn script(&self, program: impl Into<PathBuf>, behaviour: PeerBehaviour) {
        self.behaviours
            .lock()
            .unwrap()
            .insert(program.into(), behaviour);
    }

    pub fn records(&self) -> Vec<PeerRecord> {
        self.records.lock().unwrap().clone()
    }
}

impl ProcessSpawner for ScriptedSpawner {
    fn spawn_detached(&self, program: &Path, args: &[String]) -> io::Result<Option<u32>> {
        let behaviour = self
            .behaviours
            .lock()
            .unwrap()
            .get(program)
            .cloned()
            .unwrap_or(PeerBehaviour::Honest);
        if matches!(behaviour, PeerBehaviour::SpawnFails) {
            return Err(io::Error::new(io::ErrorKind::NotFound, "no such program"));
        }

        let port = parse_launcher_port(args);
        let index = {
            let mut records = self.records.lock().unwrap();
            records.push(PeerRecord {
                program: program.to_path_buf(),
                args: args.to_vec(),
                port,
                grants: None,
            });
            records.len() - 1
        };

        if let Some(port) = port {
            let records = Arc::clone(&self.records);
            tokio::spawn(run_peer(port, behaviour, records, index));
        }
        Ok(None)
    }
}

async fn run_peer(
    port: u16,
    behaviour: PeerBehaviour,
    records: Arc<Mutex<Vec<PeerRecord>>>,
    index: usize,
) -> Option<()> {
    let key = Ed25519Keys.generate().public_key();
    match behaviour {
        PeerBehaviour::NeverConnects | PeerBehaviour::SpawnFails => None,
        PeerBehaviour::Honest => {
            let mut handshake = AppHandshake::connect(port).await.ok()?;
            handshake.send_session_key(&key).await.ok()?;
            let grants = handshake.receive_grants().await.ok()?;
            // Recorded before confirming so the launcher cannot finish first.
            records.lock().unwrap()[index].grants = Some(grants);
            handshake.confirm().await.ok()
        }
        PeerBehaviour::SilentAfter(delay) => {
            sleep(delay).await;
            let _handshake = AppHandshake::connect(port).await.ok()?;
            sleep(Duration::from_secs(60)).await;
            None
        }
        PeerBehaviour::MalformedKey => {
            let mut handshake = AppHandshake::connect(port).await.ok()?;
            handshake
                .transport_mut()
                .send(&HandshakeMessage::SessionKey {
                    public_key: "AAAA".to_string(),
                })
                .await
                .ok()?;
            let _ = handshake.transport_mut().receive().await;
            None
        }
        PeerBehaviour::Garbage => {
            let mut handshake = AppHandshake::connect(port).await.ok()?;
            handshake
                .transport_mut()
                .send_raw("this is not json\n")
                .await
                .ok()?;
            let _ = handshake.transport_mut().receive().await;
            None
        }
        PeerBehaviour::ConfirmFirst => {
            let mut handshake = AppHandshake::connect(port).await.ok()?;
            handshake
                .transport_mut()
                .send(&HandshakeMessage::Confirm)
                .await
                .ok()?;
            let _ = handshake.transport_mut().receive().await;
            None
        }
        PeerBehaviour::DisconnectAfterKey => {
            let mut handshake = AppHandshake::connect(port).await.ok()?;
            handshake.send_session_key(&key).await.ok()?;
            None
        }
    }
}

pub fn credentials(keyword: &str, password: &str) -> Credentials {
    Credentials::new(Keyword::new(keyword), Pin::new("2468"), Password::new(password))
}

pub fn config(machine: &str, connect_ms: u64, handshake_ms: u64) -> LauncherConfig {
    LauncherConfig {
        connect_timeout_ms: connect_ms,
        handshake_timeout_ms: handshake_ms,
        machine_id: Some(machine.to_string()),
        ..LauncherConfig::default()
    }
}

pub fn collaborators(store: &Arc<MemoryStore>, spawner: &Arc<ScriptedSpawner>) -> Collaborators {
    Collaborators::new(store.clone()).with_spawner(spawner.clone())
}

/// Fresh account on `machine` with a memory store and scripted apps.
pub async fn new_launcher(
    machine: &str,
    connect_ms: u64,
    handshake_ms: u64,
) -> (Launcher, Arc<MemoryStore>, Arc<ScriptedSpawner>) {
    let store = Arc::new(MemoryStore::new());
    let spawner = ScriptedSpawner::new();
    let launcher = Launcher::create_account(
        config(machine, connect_ms, handshake_ms),
        collaborators(&store, &spawner),
        credentials("alice", "correct horse"),
    )
    .await
    .unwrap();
    (launcher, store, spawner)
}
