//! In-memory SSH stand-ins and an isolated home directory

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, watch};

use keymaster::KeymasterEvent;
use keymaster::config::{EngineSettings, Paths};
use keymaster::error::SshError;
use keymaster::route::HopDescriptor;
use keymaster::ssh::{Connector, SessionEnd, Transport};

/// Long enough for any paused-clock backoff in these tests.
pub const WAIT: Duration = Duration::from_secs(300);

#[derive(Default)]
struct FakeState {
    calls: Mutex<Vec<String>>,
    failing: Mutex<HashSet<String>>,
    stalled: Mutex<HashSet<String>>,
    watched_ports: Mutex<Vec<u16>>,
    open_at_close: Mutex<Vec<(String, Vec<u16>)>>,
    sessions: Mutex<HashMap<String, watch::Sender<Option<SessionEnd>>>>,
}

/// Records every connect and close, and fails hosts on request.
#[derive(Clone, Default)]
pub struct FakeConnector {
    state: Arc<FakeState>,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail(&self, host: &str) {
        self.state.failing.lock().insert(host.to_string());
    }

    pub fn recover(&self, host: &str) {
        self.state.failing.lock().remove(host);
    }

    /// Make every connect to `host` hang without completing the handshake.
    pub fn stall(&self, host: &str) {
        self.state.stalled.lock().insert(host.to_string());
    }

    /// Check `port` for a listener whenever a session is closed.
    pub fn watch_port(&self, port: u16) {
        self.state.watched_ports.lock().push(port);
    }

    /// For each session close, in order: the host and which watched ports
    /// were still accepting connections at that moment.
    pub fn open_ports_at_close(&self) -> Vec<(String, Vec<u16>)> {
        self.state.open_at_close.lock().clone()
    }

    /// End the most recent session to `host` as if the server did it.
    pub fn end_session(&self, host: &str, end: SessionEnd) {
        if let Some(tx) = self.state.sessions.lock().get(host) {
            tx.send_replace(Some(end));
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.calls.lock().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.calls().iter().filter(|c| c.starts_with(prefix)).count()
    }
}

impl Connector for FakeConnector {
    type Session = FakeSession;

    async fn connect(
        &self,
        hop: &HopDescriptor,
        via: Option<&FakeSession>,
    ) -> Result<FakeSession, SshError> {
        let call = match via {
            Some(parent) => format!("connect {} via {}", hop.host, parent.host),
            None => format!("connect {}", hop.host),
        };
        self.state.calls.lock().push(call);

        if self.state.stalled.lock().contains(&hop.host) {
            return std::future::pending().await;
        }
        if self.state.failing.lock().contains(&hop.host) {
            return Err(SshError::ConnectionFailed {
                host: hop.host.clone(),
                port: hop.port,
                reason: "Connection refused".to_string(),
            });
        }

        let (end_tx, end_rx) = watch::channel(None);
        self.state.sessions.lock().insert(hop.host.clone(), end_tx);
        Ok(FakeSession {
            host: hop.host.clone(),
            state: self.state.clone(),
            end_rx,
        })
    }
}

/// Forwards straight to loopback TCP, ignoring the hop.
pub struct FakeSession {
    host: String,
    state: Arc<FakeState>,
    end_rx: watch::Receiver<Option<SessionEnd>>,
}

impl Transport for FakeSession {
    type Stream = TcpStream;

    async fn open_forward(
        &self,
        host: &str,
        port: u16,
        _originator: SocketAddr,
    ) -> Result<TcpStream, SshError> {
        TcpStream::connect((host, port))
            .await
            .map_err(|e| SshError::Channel(format!("open failed: {}", e)))
    }

    async fn closed(&self) -> SessionEnd {
        let mut end_rx = self.end_rx.clone();
        let _ = end_rx.wait_for(|end| end.is_some()).await;
        let end = end_rx.borrow().clone();
        end.unwrap_or(SessionEnd::Clean)
    }

    async fn close(&self) -> Result<(), SshError> {
        self.state.calls.lock().push(format!("close {}", self.host));

        let watched = self.state.watched_ports.lock().clone();
        let open = watched
            .into_iter()
            .filter(|port| std::net::TcpStream::connect(("127.0.0.1", *port)).is_ok())
            .collect();
        self.state.open_at_close.lock().push((self.host.clone(), open));
        Ok(())
    }
}

/// An isolated home with `~/.ssh/config` and a default identity.
pub struct EngineEnv {
    pub home: TempDir,
    pub settings: EngineSettings,
}

impl EngineEnv {
    pub fn new(ssh_config: &str) -> Self {
        let home = TempDir::new().expect("Failed to create temp dir");
        let paths = Paths::with_home(home.path(), "tester");
        std::fs::create_dir_all(&paths.ssh_dir).expect("Failed to create .ssh");
        std::fs::write(paths.ssh_dir.join("id_ed25519"), "not a real key\n")
            .expect("Failed to write identity");
        std::fs::write(paths.ssh_config_file(), ssh_config).expect("Failed to write config");

        let settings = EngineSettings::new(paths);
        Self { home, settings }
    }
}

pub async fn find_free_local_port() -> u16 {
    let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    port
}

/// A loopback server that echoes every byte back.
pub async fn spawn_echo_server() -> u16 {
    let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buf = [0u8; 1024];
                loop {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            if socket.write_all(&buf[..n]).await.is_err() {
                                break;
                            }
                        }
                    }
                }
            });
        }
    });
    port
}

/// Collect `name`'s log lines until one starts with `prefix`, returning
/// every line seen including that one.
pub async fn messages_until(
    rx: &mut broadcast::Receiver<KeymasterEvent>,
    name: &str,
    prefix: &str,
) -> Vec<String> {
    let mut seen = Vec::new();
    let collect = async {
        loop {
            match rx.recv().await {
                Ok(KeymasterEvent::ConnectionMessage { name: from, message }) if from == name => {
                    let done = message.starts_with(prefix);
                    seen.push(message);
                    if done {
                        return;
                    }
                }
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => {
                    panic!("event channel closed waiting for {prefix:?}")
                }
            }
        }
    };
    if tokio::time::timeout(WAIT, collect).await.is_err() {
        panic!("timed out waiting for {prefix:?}; saw {seen:?}");
    }
    seen
}
