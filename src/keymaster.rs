//! The process-wide table of active connections.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast;

use crate::config::EngineSettings;
use crate::connection::{Connection, Phase};
use crate::ssh::Connector;

const EVENT_CAPACITY: usize = 256;

/// Everything a UI needs to render connection state and logs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeymasterEvent {
    Activating(String),
    Deactivating(String),
    ConnectionMessage { name: String, message: String },
}

/// Activates and deactivates named connections.
pub struct Keymaster<C: Connector> {
    connector: Arc<C>,
    settings: Arc<EngineSettings>,
    connections: Mutex<HashMap<String, Connection<C>>>,
    /// Deactivated connections that may still be tearing down.
    retiring: Mutex<Vec<Connection<C>>>,
    events: broadcast::Sender<KeymasterEvent>,
}

impl<C: Connector> Keymaster<C> {
    pub fn new(connector: C, settings: EngineSettings) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            connector: Arc::new(connector),
            settings: Arc::new(settings),
            connections: Mutex::new(HashMap::new()),
            retiring: Mutex::new(Vec::new()),
            events,
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn subscribe(&self) -> broadcast::Receiver<KeymasterEvent> {
        self.events.subscribe()
    }

    /// Start a connection for `name` unless one already exists.
    pub fn activate(&self, name: &str) {
        let mut connections = self.connections.lock();
        if connections.contains_key(name) {
            return;
        }

        let _ = self.events.send(KeymasterEvent::Activating(name.to_string()));
        let connection = Connection::new(
            name,
            self.connector.clone(),
            self.settings.clone(),
            self.events.clone(),
        );
        connection.activate();
        connections.insert(name.to_string(), connection);
    }

    /// Destroy and forget the connection for `name`, if any. Returns
    /// without waiting for its teardown.
    pub fn deactivate(&self, name: &str) {
        let Some(connection) = self.connections.lock().remove(name) else {
            return;
        };

        let _ = self.events.send(KeymasterEvent::Deactivating(name.to_string()));
        connection.destroy();

        let mut retiring = self.retiring.lock();
        retiring.retain(|c| c.phase() != Phase::Destroyed);
        retiring.push(connection);
    }

    pub fn is_active(&self, name: &str) -> bool {
        self.connections.lock().contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<Connection<C>> {
        self.connections.lock().get(name).cloned()
    }

    /// Names with a live connection, sorted.
    pub fn active_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.connections.lock().keys().cloned().collect();
        names.sort();
        names
    }

    /// Deactivate everything and wait until every connection has finished
    /// tearing down.
    pub async fn shutdown(&self) {
        for name in self.active_names() {
            self.deactivate(&name);
        }

        let retiring = std::mem::take(&mut *self.retiring.lock());
        tracing::debug!("Waiting for {} connection(s) to close", retiring.len());
        futures::future::join_all(retiring.iter().map(|c| c.destroyed())).await;
    }
}
