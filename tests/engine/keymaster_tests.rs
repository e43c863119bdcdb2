//! Registry behaviour: activation, deactivation and shutdown

use std::sync::Arc;

use tokio::sync::broadcast::error::TryRecvError;

use keymaster::ssh::SessionEnd;
use keymaster::{Keymaster, KeymasterEvent, Phase};

use super::fixtures::{EngineEnv, FakeConnector, messages_until};

const HOSTS: &str = "
Host web
  HostName web.internal
  ProxyJump bastion

Host db
  HostName db.internal

Host bastion
  HostName bastion.example
";

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_activate_creates_one_connection() {
    let env = EngineEnv::new(HOSTS);
    let connector = FakeConnector::new();
    let keymaster = Arc::new(Keymaster::new(connector.clone(), env.settings.clone()));
    let mut rx = keymaster.subscribe();

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let keymaster = keymaster.clone();
            tokio::spawn(async move { keymaster.activate("db") })
        })
        .collect();
    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(keymaster.active_names(), vec!["db"]);
    messages_until(&mut rx, "db", "Connected.").await;
    assert_eq!(connector.count("connect db.internal"), 1);

    keymaster.shutdown().await;
    assert_eq!(connector.count("close db.internal"), 1);
}

#[tokio::test]
async fn test_activate_emits_activating_once() {
    let env = EngineEnv::new(HOSTS);
    let keymaster = Keymaster::new(FakeConnector::new(), env.settings.clone());
    let mut rx = keymaster.subscribe();

    keymaster.activate("db");
    keymaster.activate("db");

    // Registry events are sent synchronously, before the connection runs.
    assert_eq!(rx.try_recv().unwrap(), KeymasterEvent::Activating("db".to_string()));
    assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));

    messages_until(&mut rx, "db", "Connected.").await;
    keymaster.deactivate("db");
    keymaster.deactivate("db");

    let mut deactivating = 0;
    loop {
        match rx.try_recv() {
            Ok(KeymasterEvent::Deactivating(name)) => {
                assert_eq!(name, "db");
                deactivating += 1;
            }
            Ok(_) | Err(TryRecvError::Lagged(_)) => continue,
            Err(_) => break,
        }
    }
    assert_eq!(deactivating, 1);

    keymaster.shutdown().await;
}

#[tokio::test]
async fn test_deactivate_unknown_name_is_noop() {
    let env = EngineEnv::new(HOSTS);
    let connector = FakeConnector::new();
    let keymaster = Keymaster::new(connector.clone(), env.settings.clone());
    let mut rx = keymaster.subscribe();

    keymaster.deactivate("web");

    assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
    assert!(keymaster.active_names().is_empty());
    assert!(connector.calls().is_empty());
}

#[tokio::test]
async fn test_messages_carry_connection_name() {
    let env = EngineEnv::new(HOSTS);
    let connector = FakeConnector::new();
    let keymaster = Keymaster::new(connector.clone(), env.settings.clone());
    let mut web_rx = keymaster.subscribe();
    let mut db_rx = keymaster.subscribe();

    keymaster.activate("web");
    keymaster.activate("db");
    assert_eq!(keymaster.active_names(), vec!["db", "web"]);

    let web = messages_until(&mut web_rx, "web", "Connected.").await;
    let db = messages_until(&mut db_rx, "db", "Connected.").await;
    assert_eq!(web.first().map(String::as_str), Some("Connecting."));
    assert_eq!(db.first().map(String::as_str), Some("Connecting."));

    // One connection's failure leaves the other alone.
    connector.fail("bastion.example");
    connector.end_session("bastion.example", SessionEnd::Clean);
    messages_until(&mut web_rx, "web", "Reconnecting").await;
    assert_eq!(
        keymaster.get("db").map(|c| c.phase()),
        Some(Phase::Active)
    );

    keymaster.shutdown().await;
}

#[tokio::test]
async fn test_deactivate_removes_before_teardown_finishes() {
    let env = EngineEnv::new(HOSTS);
    let connector = FakeConnector::new();
    let keymaster = Keymaster::new(connector.clone(), env.settings.clone());
    let mut rx = keymaster.subscribe();

    keymaster.activate("web");
    messages_until(&mut rx, "web", "Connected.").await;
    let web = keymaster.get("web").expect("connection");

    keymaster.deactivate("web");
    assert!(!keymaster.is_active("web"));
    assert!(keymaster.active_names().is_empty());

    web.destroyed().await;
    assert_eq!(
        connector.calls(),
        vec![
            "connect bastion.example",
            "connect web.internal via bastion.example",
            "close web.internal",
            "close bastion.example",
        ]
    );

    // The name can be reused with a fresh connection.
    keymaster.activate("web");
    messages_until(&mut rx, "web", "Connected.").await;
    assert_ne!(keymaster.get("web").map(|c| c.phase()), Some(Phase::Destroyed));

    keymaster.shutdown().await;
    assert_eq!(web.phase(), Phase::Destroyed);
}

#[tokio::test]
async fn test_shutdown_waits_for_every_connection() {
    let env = EngineEnv::new(HOSTS);
    let connector = FakeConnector::new();
    let keymaster = Keymaster::new(connector.clone(), env.settings.clone());
    let mut rx = keymaster.subscribe();

    keymaster.activate("web");
    keymaster.activate("db");
    messages_until(&mut rx, "web", "Connected.").await;
    let web = keymaster.get("web").expect("web");
    let db = keymaster.get("db").expect("db");

    keymaster.shutdown().await;

    assert_eq!(web.phase(), Phase::Destroyed);
    assert_eq!(db.phase(), Phase::Destroyed);
    assert!(keymaster.active_names().is_empty());
    assert_eq!(
        connector.count("connect"),
        connector.count("close"),
        "{:?}",
        connector.calls()
    );
}
