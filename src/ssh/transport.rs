use std::fmt;
use std::future::Future;
use std::net::SocketAddr;

use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::SshError;
use crate::route::HopDescriptor;

/// How a transport session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEnd {
    /// The remote side disconnected cleanly.
    Clean,
    /// The session died with an error.
    Lost(String),
}

impl fmt::Display for SessionEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionEnd::Clean => f.write_str("closed"),
            SessionEnd::Lost(reason) => write!(f, "lost: {reason}"),
        }
    }
}

/// An authenticated SSH session that channels can be opened over.
pub trait Transport: Send + Sync + 'static {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// Open a forwarded (direct-tcpip) channel to `host:port`.
    fn open_forward(
        &self,
        host: &str,
        port: u16,
        originator: SocketAddr,
    ) -> impl Future<Output = Result<Self::Stream, SshError>> + Send;

    /// Resolves once the session is gone, however that happened.
    fn closed(&self) -> impl Future<Output = SessionEnd> + Send;

    fn close(&self) -> impl Future<Output = Result<(), SshError>> + Send;
}

/// Opens transport sessions for hops.
pub trait Connector: Send + Sync + 'static {
    type Session: Transport;

    /// Connect and authenticate to `hop`: directly when `via` is `None`,
    /// otherwise over a forwarded channel through the `via` session.
    fn connect(
        &self,
        hop: &HopDescriptor,
        via: Option<&Self::Session>,
    ) -> impl Future<Output = Result<Self::Session, SshError>> + Send;
}
