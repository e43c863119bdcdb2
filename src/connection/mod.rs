//! One named route, kept up until it is destroyed.
//!
//! A [`Connection`] owns a supervisor task that runs the
//! connect / fail / back off / retry loop. The phase lives on a `watch`
//! channel and only moves along the edges allowed by [`Phase`], so a
//! destroyed connection can never be brought back.

mod hook;
mod hops;
mod phase;

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;

use crate::config::{EngineSettings, load_ssh_config};
use crate::error::ConnectionError;
use crate::keymaster::KeymasterEvent;
use crate::route;
use crate::ssh::{Connector, Transport};
use crate::tunnel::TunnelMultiplexer;

use hops::HopStack;
pub use phase::Phase;

/// Handle to a named connection. Clones share the same connection.
pub struct Connection<C: Connector> {
    inner: Arc<Inner<C>>,
}

impl<C: Connector> Clone for Connection<C> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<C: Connector> std::fmt::Debug for Connection<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("name", &self.inner.name)
            .field("phase", &self.phase())
            .field("error_count", &self.error_count())
            .finish()
    }
}

struct Inner<C: Connector> {
    name: String,
    connector: Arc<C>,
    settings: Arc<EngineSettings>,
    events: broadcast::Sender<KeymasterEvent>,
    phase: watch::Sender<Phase>,
    error_count: AtomicU32,
    shutdown: watch::Sender<bool>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl<C: Connector> Connection<C> {
    /// Log lines are published on `events` with `name` attached.
    pub fn new(
        name: impl Into<String>,
        connector: Arc<C>,
        settings: Arc<EngineSettings>,
        events: broadcast::Sender<KeymasterEvent>,
    ) -> Self {
        let (phase, _) = watch::channel(Phase::Idle);
        let (shutdown, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                connector,
                settings,
                events,
                phase,
                error_count: AtomicU32::new(0),
                shutdown,
                supervisor: Mutex::new(None),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn phase(&self) -> Phase {
        *self.inner.phase.borrow()
    }

    /// Consecutive failures since the last time the connection was active.
    pub fn error_count(&self) -> u32 {
        self.inner.error_count.load(Ordering::SeqCst)
    }

    pub fn subscribe_phase(&self) -> watch::Receiver<Phase> {
        self.inner.phase.subscribe()
    }

    /// Start connecting. Ignored unless the connection is idle with no
    /// attempt or backoff in progress.
    pub fn activate(&self) {
        let mut supervisor = self.inner.supervisor.lock();
        if *self.inner.shutdown.borrow() {
            return;
        }
        if supervisor.as_ref().is_some_and(|task| !task.is_finished()) {
            return;
        }
        if self.phase() != Phase::Idle {
            return;
        }
        tracing::debug!("Activating {}", self.inner.name);
        *supervisor = Some(tokio::spawn(self.inner.clone().supervise()));
    }

    /// Tear the connection down for good. Safe to call in any phase and
    /// more than once; resources are released exactly once.
    pub fn destroy(&self) {
        if self.inner.shutdown.send_replace(true) {
            return;
        }
        let supervisor = self.inner.supervisor.lock();
        let running = supervisor.as_ref().is_some_and(|task| !task.is_finished());

        self.inner.transition(Phase::Destroying);
        if !running {
            // Nothing was ever acquired.
            self.inner.transition(Phase::Destroyed);
        }
    }

    /// Resolves once teardown has finished.
    pub async fn destroyed(&self) {
        let mut phase = self.inner.phase.subscribe();
        let _ = phase.wait_for(|p| p.is_terminal()).await;
    }
}

impl<C: Connector> Inner<C> {
    fn transition(&self, next: Phase) -> bool {
        self.phase.send_if_modified(|current| {
            if !current.can_transition_to(next) {
                return false;
            }
            tracing::debug!("{}: {} -> {}", self.name, current, next);
            *current = next;
            true
        })
    }

    fn broadcast(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::info!(connection = %self.name, "{}", message);
        // No subscribers is fine.
        let _ = self.events.send(KeymasterEvent::ConnectionMessage {
            name: self.name.clone(),
            message,
        });
    }

    async fn supervise(self: Arc<Self>) {
        let mut shutdown = self.shutdown.subscribe();
        let (failures_tx, mut failures) = mpsc::unbounded_channel();
        let mut stack = HopStack::new(failures_tx);

        loop {
            if !self.transition(Phase::Connecting) {
                break;
            }
            self.broadcast("Connecting.");
            hops::clear_failures(&mut failures);

            // A hop already up can fail while a later one is still
            // handshaking; that failure ends the attempt.
            let attempt = tokio::select! {
                biased;
                _ = shutdown_requested(&mut shutdown) => None,
                failure = hops::next_failure(&mut failures) => Some(Err(failure)),
                result = self.attempt(&mut stack) => Some(result),
            };

            let failure = match attempt {
                None => break,
                Some(Err(failure)) => failure,
                Some(Ok(())) => {
                    if !self.transition(Phase::Active) {
                        break;
                    }
                    self.error_count.store(0, Ordering::SeqCst);
                    self.broadcast("Connected.");

                    tokio::select! {
                        biased;
                        _ = shutdown_requested(&mut shutdown) => break,
                        failure = hops::next_failure(&mut failures) => failure,
                    }
                }
            };

            let error_count = self.error_count.fetch_add(1, Ordering::SeqCst) + 1;
            match &failure {
                ConnectionError::SessionClosed { .. } => self.broadcast("Connection closed."),
                other => self.broadcast(format!("Connection error: {}", other)),
            }

            if !self.transition(Phase::Destroying) {
                break;
            }
            self.teardown(&mut stack).await;
            if *shutdown.borrow() || !self.transition(Phase::Idle) {
                break;
            }

            let delay = self.settings.backoff.delay(failure.backoff_kind(), error_count);
            self.broadcast(format!(
                "Reconnecting in {}s (attempt {}).",
                delay.as_secs(),
                error_count + 1
            ));
            tokio::select! {
                biased;
                _ = shutdown_requested(&mut shutdown) => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        self.transition(Phase::Destroying);
        self.teardown(&mut stack).await;
        self.transition(Phase::Destroyed);
        tracing::debug!("{} destroyed", self.name);
    }

    /// One pass through hook, route resolution and hop establishment.
    /// Hops that come up are left on `stack` whether or not the pass
    /// succeeds.
    async fn attempt(&self, stack: &mut HopStack<C::Session>) -> Result<(), ConnectionError> {
        hook::run_preconnect_hook(&self.settings.preconnect_hook, |line| self.broadcast(line))
            .await;

        let config = load_ssh_config(&self.settings.ssh_config_file)?;
        let chain = route::resolve(&self.name, &config, &self.settings.paths)?;
        tracing::debug!("{} resolved to {} hop(s)", self.name, chain.len());

        for hop in chain.establishment_order() {
            let session = self.connector.connect(hop, stack.innermost_session()).await?;
            let session = Arc::new(session);
            stack.push_session(hop.to_string(), hop.host.clone(), session.clone());

            if hop.local_forwards.is_empty() {
                continue;
            }
            let tunnels =
                TunnelMultiplexer::bind(session, &hop.local_forwards, stack.failure_sender())
                    .await?;
            for (addr, spec) in tunnels.listeners() {
                self.broadcast(format!(
                    "Tunnel created: {} -> {} via {}.",
                    addr,
                    spec.remote(),
                    hop
                ));
            }
            stack.attach_tunnels(tunnels);
        }

        Ok(())
    }

    /// Close hops innermost first: tunnels, then the session. Close errors
    /// are logged and never stop the unwind.
    async fn teardown(&self, stack: &mut HopStack<C::Session>) {
        while let Some(mut hop) = stack.pop() {
            hop.unwatch();

            if let Some(tunnels) = hop.tunnels.take() {
                let count = tunnels.len();
                tunnels.close().await;
                self.broadcast(format!("Closed {} tunnel(s) on {}.", count, hop.label));
            }

            match hop.session.close().await {
                Ok(()) => self.broadcast(format!("Disconnected from {}.", hop.label)),
                Err(e) => {
                    tracing::warn!("Closing session {} failed: {}", hop.label, e);
                    self.broadcast(format!("Error disconnecting from {}: {}", hop.label, e));
                }
            }
        }
    }
}

async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|requested| *requested).await;
}
