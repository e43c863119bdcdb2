use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::ConnectionError;
use crate::ssh::{SessionEnd, Transport};
use crate::tunnel::TunnelMultiplexer;

/// One established hop: its session and, once bound, its tunnels.
pub(crate) struct HopState<S> {
    pub label: String,
    pub session: Arc<S>,
    pub tunnels: Option<TunnelMultiplexer>,
    watcher: JoinHandle<()>,
}

impl<S> HopState<S> {
    /// Stop reporting this hop's session end. Called before the hop is
    /// closed on purpose.
    pub fn unwatch(&self) {
        self.watcher.abort();
    }
}

impl<S> Drop for HopState<S> {
    fn drop(&mut self) {
        self.watcher.abort();
    }
}

/// Teardown list for a connection attempt, outermost hop first.
///
/// A hop is only pushed once its session exists, so unwinding never touches
/// a resource that was not acquired. Every hop-level failure is sent on
/// `failures_tx`; the receiving end stays with the caller so it can be
/// polled while hops are still being pushed.
pub(crate) struct HopStack<S> {
    hops: Vec<HopState<S>>,
    failures_tx: mpsc::UnboundedSender<ConnectionError>,
}

impl<S: Transport> HopStack<S> {
    pub fn new(failures_tx: mpsc::UnboundedSender<ConnectionError>) -> Self {
        Self {
            hops: Vec::new(),
            failures_tx,
        }
    }

    /// Session the next hop must be opened through.
    pub fn innermost_session(&self) -> Option<&S> {
        self.hops.last().map(|hop| hop.session.as_ref())
    }

    pub fn failure_sender(&self) -> mpsc::UnboundedSender<ConnectionError> {
        self.failures_tx.clone()
    }

    /// Record a freshly opened session and start watching for its end.
    pub fn push_session(&mut self, label: String, host: String, session: Arc<S>) {
        let watcher = tokio::spawn({
            let session = session.clone();
            let failures = self.failures_tx.clone();
            async move {
                let failure = match session.closed().await {
                    SessionEnd::Clean => ConnectionError::SessionClosed { host },
                    SessionEnd::Lost(reason) => ConnectionError::SessionLost { host, reason },
                };
                let _ = failures.send(failure);
            }
        });

        self.hops.push(HopState {
            label,
            session,
            tunnels: None,
            watcher,
        });
    }

    /// Attach tunnels to the most recently pushed hop.
    pub fn attach_tunnels(&mut self, tunnels: TunnelMultiplexer) {
        if let Some(hop) = self.hops.last_mut() {
            hop.tunnels = Some(tunnels);
        }
    }

    /// Innermost hop, removed from the list.
    pub fn pop(&mut self) -> Option<HopState<S>> {
        self.hops.pop()
    }

}

/// Next failure reported by any hop or tunnel. Pending forever once every
/// sender is gone.
pub(crate) async fn next_failure(
    failures: &mut mpsc::UnboundedReceiver<ConnectionError>,
) -> ConnectionError {
    match failures.recv().await {
        Some(failure) => failure,
        None => std::future::pending().await,
    }
}

/// Drop failures left over from hops that have already been torn down.
pub(crate) fn clear_failures(failures: &mut mpsc::UnboundedReceiver<ConnectionError>) {
    while failures.try_recv().is_ok() {}
}
