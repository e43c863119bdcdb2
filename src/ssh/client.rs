use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use russh::client::{self, Config, Handle, Msg};
use russh::{ChannelStream, Disconnect};
use tokio::net::TcpStream;
use tokio::sync::watch;

use crate::config::EngineSettings;
use crate::error::SshError;
use crate::route::HopDescriptor;

use super::auth;
use super::handler::ClientHandler;
use super::transport::{Connector, SessionEnd, Transport};

/// Opens russh sessions, directly or through a parent hop
pub struct RusshConnector {
    config: Arc<Config>,
    known_hosts: Option<PathBuf>,
}

impl RusshConnector {
    pub fn new(keepalive: Option<Duration>, known_hosts: Option<PathBuf>) -> Self {
        let config = Config {
            inactivity_timeout: Some(Duration::from_secs(3600)),
            keepalive_interval: keepalive,
            keepalive_max: 3,
            ..Default::default()
        };

        Self {
            config: Arc::new(config),
            known_hosts,
        }
    }

    pub fn from_settings(settings: &EngineSettings) -> Self {
        Self::new(settings.keepalive, Some(settings.known_hosts_file.clone()))
    }

    async fn handshake(
        &self,
        hop: &HopDescriptor,
        via: Option<&RusshSession>,
    ) -> Result<RusshSession, SshError> {
        let (end_tx, end_rx) = watch::channel(None);
        let handler = ClientHandler::new(
            hop.host.clone(),
            hop.port,
            self.known_hosts.clone(),
            end_tx,
        );

        let connect_failed = |reason: String| SshError::ConnectionFailed {
            host: hop.host.clone(),
            port: hop.port,
            reason,
        };

        let mut handle = match via {
            None => {
                let stream = TcpStream::connect((hop.host.as_str(), hop.port))
                    .await
                    .map_err(|e| connect_failed(e.to_string()))?;
                client::connect_stream(self.config.clone(), stream, handler)
                    .await
                    .map_err(|e| connect_failed(e.to_string()))?
            }
            Some(parent) => {
                tracing::debug!("Tunnelling to {} through {}", hop, parent.label);
                let channel = parent
                    .handle
                    .channel_open_direct_tcpip(hop.host.as_str(), u32::from(hop.port), "127.0.0.1", 0)
                    .await
                    .map_err(|e| {
                        SshError::Channel(format!(
                            "Failed to open tunnel to {}:{} through {}: {}",
                            hop.host, hop.port, parent.label, e
                        ))
                    })?;
                client::connect_stream(self.config.clone(), channel.into_stream(), handler)
                    .await
                    .map_err(|e| connect_failed(e.to_string()))?
            }
        };

        auth::authenticate(&mut handle, hop).await?;

        Ok(RusshSession {
            label: hop.to_string(),
            handle,
            end_rx,
        })
    }
}

impl Connector for RusshConnector {
    type Session = RusshSession;

    fn connect(
        &self,
        hop: &HopDescriptor,
        via: Option<&Self::Session>,
    ) -> impl Future<Output = Result<Self::Session, SshError>> + Send {
        self.handshake(hop, via)
    }
}

/// An authenticated russh session for one hop
pub struct RusshSession {
    label: String,
    handle: Handle<ClientHandler>,
    end_rx: watch::Receiver<Option<SessionEnd>>,
}

impl std::fmt::Debug for RusshSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RusshSession")
            .field("label", &self.label)
            .field("handle", &"<handle>")
            .finish()
    }
}

impl Transport for RusshSession {
    type Stream = ChannelStream<Msg>;

    async fn open_forward(
        &self,
        host: &str,
        port: u16,
        originator: SocketAddr,
    ) -> Result<Self::Stream, SshError> {
        let channel = self
            .handle
            .channel_open_direct_tcpip(
                host,
                u32::from(port),
                originator.ip().to_string(),
                u32::from(originator.port()),
            )
            .await
            .map_err(|e| SshError::Channel(format!("Failed to forward to {}:{}: {}", host, port, e)))?;
        Ok(channel.into_stream())
    }

    async fn closed(&self) -> SessionEnd {
        let mut end_rx = self.end_rx.clone();
        // The handler records an end before its sender goes away
        let _ = end_rx.wait_for(|end| end.is_some()).await;
        let end = end_rx.borrow().clone();
        end.unwrap_or_else(|| SessionEnd::Lost("session ended".to_string()))
    }

    async fn close(&self) -> Result<(), SshError> {
        if self.handle.is_closed() {
            return Ok(());
        }
        self.handle
            .disconnect(Disconnect::ByApplication, "keymaster closing", "en")
            .await
            .map_err(SshError::from)
    }
}
