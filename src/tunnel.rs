//! Local port forwarding for an established hop.
//!
//! ```text
//! [client] -> [loopback listener] -> [forwarded channel] -> [remote_host:remote_port]
//! ```
//!
//! Every listener runs its own accept loop, and every accepted socket is
//! spliced in a task owned by that loop. Dropping the multiplexer aborts the
//! loops, which closes the listening sockets and every stream they spawned.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};

use crate::error::ConnectionError;
use crate::route::LocalForwardSpec;
use crate::ssh::Transport;

/// The listeners bound for one hop's `LocalForward` directives.
#[derive(Debug, Default)]
pub struct TunnelMultiplexer {
    tunnels: Vec<TunnelListener>,
}

#[derive(Debug)]
struct TunnelListener {
    spec: LocalForwardSpec,
    local_addr: SocketAddr,
    accept_task: JoinHandle<()>,
}

impl Drop for TunnelListener {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

impl TunnelMultiplexer {
    /// Bind a listener per forward. If any bind fails, listeners bound so
    /// far are closed before the error is returned.
    pub async fn bind<T: Transport>(
        session: Arc<T>,
        forwards: &[LocalForwardSpec],
        failures: mpsc::UnboundedSender<ConnectionError>,
    ) -> Result<Self, ConnectionError> {
        let mut mux = Self::default();

        for spec in forwards {
            let bind_err = |source| ConnectionError::Bind {
                port: spec.local_port,
                source,
            };
            let listener = TcpListener::bind((spec.bind_addr, spec.local_port))
                .await
                .map_err(bind_err)?;
            let local_addr = listener.local_addr().map_err(bind_err)?;

            tracing::debug!("Listening on {} for {}", local_addr, spec.remote());
            let accept_task = tokio::spawn(accept_loop(
                listener,
                session.clone(),
                spec.clone(),
                failures.clone(),
            ));
            mux.tunnels.push(TunnelListener {
                spec: spec.clone(),
                local_addr,
                accept_task,
            });
        }

        Ok(mux)
    }

    /// Bound address and forward of every listener, in directive order.
    pub fn listeners(&self) -> impl Iterator<Item = (SocketAddr, &LocalForwardSpec)> {
        self.tunnels.iter().map(|t| (t.local_addr, &t.spec))
    }

    pub fn len(&self) -> usize {
        self.tunnels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tunnels.is_empty()
    }

    /// Close every listener and the streams it is serving.
    pub async fn close(mut self) {
        for mut tunnel in self.tunnels.drain(..) {
            tunnel.accept_task.abort();
            if let Err(e) = (&mut tunnel.accept_task).await {
                if e.is_panic() {
                    tracing::warn!("Tunnel {} panicked: {}", tunnel.local_addr, e);
                }
            }
            tracing::debug!("Closed tunnel {}", tunnel.local_addr);
        }
    }
}

/// Pause after a failed accept. Errors such as running out of file
/// descriptors persist, and retrying at once would spin the loop.
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

async fn accept_loop<T: Transport>(
    listener: TcpListener,
    session: Arc<T>,
    spec: LocalForwardSpec,
    failures: mpsc::UnboundedSender<ConnectionError>,
) {
    let mut streams = JoinSet::new();

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((socket, peer)) => {
                    tracing::trace!("Accepted {} on {}", peer, spec);
                    streams.spawn(serve(
                        socket,
                        peer,
                        session.clone(),
                        spec.clone(),
                        failures.clone(),
                    ));
                }
                Err(e) => accept_failed(&spec, e).await,
            },
            Some(_) = streams.join_next(), if !streams.is_empty() => {}
        }
    }
}

async fn accept_failed(spec: &LocalForwardSpec, e: std::io::Error) {
    tracing::warn!("Accept failed on {}: {}", spec, e);
    tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
}

async fn serve<T: Transport>(
    mut socket: TcpStream,
    peer: SocketAddr,
    session: Arc<T>,
    spec: LocalForwardSpec,
    failures: mpsc::UnboundedSender<ConnectionError>,
) {
    let mut channel = match session
        .open_forward(&spec.remote_host, spec.remote_port, peer)
        .await
    {
        Ok(channel) => channel,
        Err(e) => {
            drop(socket);
            // A hop that cannot forward is unhealthy as a whole.
            let _ = failures.send(ConnectionError::Forward {
                local_port: spec.local_port,
                remote: spec.remote(),
                reason: e.to_string(),
            });
            return;
        }
    };

    match tokio::io::copy_bidirectional(&mut socket, &mut channel).await {
        Ok((sent, received)) => {
            tracing::trace!(
                "Stream {} -> {} done: {} bytes out, {} bytes in",
                peer,
                spec.remote(),
                sent,
                received
            );
        }
        Err(e) => {
            tracing::debug!("Stream {} -> {} ended: {}", peer, spec.remote(), e);
        }
    }
}
