use std::path::PathBuf;

use russh::client::{DisconnectReason, Handler};
use russh::keys::{HashAlg, PublicKey};
use tokio::sync::watch;

use crate::error::SshError;

use super::transport::SessionEnd;

/// SSH client handler implementation
pub struct ClientHandler {
    host: String,
    port: u16,
    /// Checked when present; unknown hosts are accepted with a warning.
    known_hosts: Option<PathBuf>,
    end_tx: watch::Sender<Option<SessionEnd>>,
}

impl ClientHandler {
    pub fn new(
        host: String,
        port: u16,
        known_hosts: Option<PathBuf>,
        end_tx: watch::Sender<Option<SessionEnd>>,
    ) -> Self {
        Self {
            host,
            port,
            known_hosts,
            end_tx,
        }
    }

    fn record_end(&self, end: SessionEnd) {
        self.end_tx.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(end);
            true
        });
    }
}

impl Handler for ClientHandler {
    type Error = SshError;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        let fingerprint = server_public_key.fingerprint(HashAlg::Sha256);
        let path = match &self.known_hosts {
            Some(path) if path.exists() => path.clone(),
            _ => {
                tracing::warn!(
                    "No known_hosts file; accepting {}:{} ({})",
                    self.host,
                    self.port,
                    fingerprint
                );
                return Ok(true);
            }
        };

        let status = tokio::task::spawn_blocking({
            let host = self.host.clone();
            let port = self.port;
            let key = server_public_key.clone();
            move || russh::keys::check_known_hosts_path(&host, port, &key, &path)
        })
        .await
        .map_err(|e| SshError::HostKeyVerification(format!("Host key check failed: {}", e)))?;

        match status {
            Ok(true) => {
                tracing::debug!("Host key verified for {}:{}", self.host, self.port);
                Ok(true)
            }
            Ok(false) => {
                tracing::warn!(
                    "Host {}:{} not in known_hosts; accepting {}",
                    self.host,
                    self.port,
                    fingerprint
                );
                Ok(true)
            }
            Err(e) => {
                tracing::warn!(
                    "HOST KEY MISMATCH for {}:{} - {} ({})",
                    self.host,
                    self.port,
                    fingerprint,
                    e
                );
                Err(SshError::HostKeyVerification(format!(
                    "{}:{}: {}",
                    self.host, self.port, e
                )))
            }
        }
    }

    async fn disconnected(
        &mut self,
        reason: DisconnectReason<Self::Error>,
    ) -> Result<(), Self::Error> {
        match reason {
            DisconnectReason::ReceivedDisconnect(info) => {
                tracing::debug!("{}:{} disconnected: {:?}", self.host, self.port, info);
                self.record_end(SessionEnd::Clean);
                Ok(())
            }
            DisconnectReason::Error(e) => {
                self.record_end(SessionEnd::Lost(e.to_string()));
                Err(e)
            }
        }
    }
}

impl Drop for ClientHandler {
    fn drop(&mut self) {
        // The session task is gone; make sure watchers wake up.
        self.record_end(SessionEnd::Lost("session ended".to_string()));
    }
}
