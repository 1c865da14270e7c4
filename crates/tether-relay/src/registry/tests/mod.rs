use super::*;
use crate::device::DeviceCapabilities;
use crate::transport::{Transport, TransportCommand};

fn registry() -> DeviceRegistry {
    DeviceRegistry::new(RelayConfig::default())
}

fn record(id: &str, state: DeviceState) -> (DeviceRecord, tokio::sync::mpsc::Receiver<TransportCommand>) {
    let (transport, rx) = Transport::channel();
    (
        DeviceRecord::new(id, DeviceCapabilities::default(), transport, state, 10),
        rx,
    )
}

#[tokio::test]
async fn test_register_from_connecting() {
    let registry = registry();
    let (rec, _rx) = record("dev-1", DeviceState::Connecting);
    let installed = registry.register(rec).await.unwrap();
    assert_eq!(installed.id(), "dev-1");
    assert!(registry.get("dev-1").is_some());
}

#[tokio::test]
async fn test_register_from_authenticating() {
    let registry = registry();
    let (rec, _rx) = record("dev-1", DeviceState::Authenticating);
    assert!(registry.register(rec).await.is_ok());
}

#[tokio::test]
async fn test_register_rejects_active_record() {
    let registry = registry();
    let (rec, _rx) = record("dev-1", DeviceState::Active);
    let err = registry.register(rec).await.unwrap_err();
    assert_eq!(err.code(), "INVALID_REGISTRATION_STATE");
    assert!(registry.get("dev-1").is_none());
}

#[tokio::test]
async fn test_duplicate_registration_keeps_one_record_and_closes_old_with_1001() {
    let registry = registry();
    let (first, mut first_rx) = record("dev-1", DeviceState::Connecting);
    let installed = registry.register(first).await.unwrap();
    registry
        .update_state("dev-1", DeviceState::Authenticating)
        .await
        .unwrap();
    registry
        .update_state("dev-1", DeviceState::Registered)
        .await
        .unwrap();
    registry.update_state("dev-1", DeviceState::Active).await.unwrap();
    let first_transport_id = installed.transport().id();

    let mut events = registry.subscribe();
    let (second, _second_rx) = record("dev-1", DeviceState::Connecting);
    registry.register(second).await.unwrap();

    // Exactly one record, bound to the new transport.
    assert_eq!(registry.get_all().len(), 1);
    let current = registry.get("dev-1").unwrap();
    assert_ne!(current.transport().id(), first_transport_id);
    assert_eq!(current.metrics.reconnects.load(Ordering::Relaxed), 1);

    // Old transport saw a 1001 close.
    match first_rx.recv().await {
        Some(TransportCommand::Close { code, reason }) => {
            assert_eq!(code, close_codes::GOING_AWAY);
            assert_eq!(reason, "new connection established");
        }
        other => panic!("expected close, got {other:?}"),
    }

    // Conflict then registered events, in order.
    assert!(matches!(
        events.recv().await.unwrap(),
        RegistryEvent::Conflict { device_id } if device_id == "dev-1"
    ));
    assert!(matches!(
        events.recv().await.unwrap(),
        RegistryEvent::Registered { device_id } if device_id == "dev-1"
    ));
}

#[tokio::test]
async fn test_update_state_validates_edges() {
    let registry = registry();
    let (rec, _rx) = record("dev-1", DeviceState::Connecting);
    registry.register(rec).await.unwrap();

    let err = registry
        .update_state("dev-1", DeviceState::Active)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "INVALID_STATE_TRANSITION");

    registry
        .update_state("dev-1", DeviceState::Authenticating)
        .await
        .unwrap();
    registry
        .update_state("dev-1", DeviceState::Registered)
        .await
        .unwrap();
    registry.update_state("dev-1", DeviceState::Active).await.unwrap();
    assert_eq!(registry.get("dev-1").unwrap().state(), DeviceState::Active);
}

#[tokio::test]
async fn test_update_state_emits_event() {
    let registry = registry();
    let (rec, _rx) = record("dev-1", DeviceState::Connecting);
    registry.register(rec).await.unwrap();
    let mut events = registry.subscribe();
    registry
        .update_state("dev-1", DeviceState::Authenticating)
        .await
        .unwrap();
    match events.recv().await.unwrap() {
        RegistryEvent::StateChanged { device_id, old, new } => {
            assert_eq!(device_id, "dev-1");
            assert_eq!(old, DeviceState::Connecting);
            assert_eq!(new, DeviceState::Authenticating);
        }
        other => panic!("expected state change, got {other:?}"),
    }
}

#[tokio::test]
async fn test_update_state_unknown_device() {
    let registry = registry();
    let err = registry
        .update_state("ghost", DeviceState::Active)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "DEVICE_NOT_FOUND");
}

#[tokio::test]
async fn test_update_last_seen_is_idempotent() {
    let registry = registry();
    let (rec, _rx) = record("dev-1", DeviceState::Connecting);
    registry.register(rec).await.unwrap();
    for _ in 0..5 {
        registry.update_last_seen("dev-1").unwrap();
    }
    assert_eq!(registry.get_all().len(), 1);
    assert!(registry.get("dev-1").unwrap().idle() < Duration::from_secs(1));
}

#[tokio::test]
async fn test_unregister_removes_and_closes_with_1000() {
    let registry = registry();
    let (rec, mut rx) = record("dev-1", DeviceState::Connecting);
    registry.register(rec).await.unwrap();
    let transport_id = registry.get("dev-1").unwrap().transport().id();
    let mut events = registry.subscribe();

    registry.unregister("dev-1").await.unwrap();

    assert!(registry.get("dev-1").is_none());
    assert!(registry.get_by_connection_id(transport_id).is_none());
    match rx.recv().await {
        Some(TransportCommand::Close { code, .. }) => assert_eq!(code, close_codes::NORMAL),
        other => panic!("expected close, got {other:?}"),
    }
    assert!(matches!(
        events.recv().await.unwrap(),
        RegistryEvent::Unregistered { device_id } if device_id == "dev-1"
    ));
}

#[tokio::test]
async fn test_unregister_unknown_device() {
    let registry = registry();
    let err = registry.unregister("ghost").await.unwrap_err();
    assert_eq!(err.code(), "DEVICE_NOT_FOUND");
}

#[tokio::test]
async fn test_get_by_connection_id() {
    let registry = registry();
    let (rec, _rx) = record("dev-1", DeviceState::Connecting);
    let installed = registry.register(rec).await.unwrap();
    let found = registry
        .get_by_connection_id(installed.transport().id())
        .unwrap();
    assert_eq!(found.id(), "dev-1");
}

#[tokio::test]
async fn test_get_by_state() {
    let registry = registry();
    let (a, _rx_a) = record("dev-a", DeviceState::Connecting);
    let (b, _rx_b) = record("dev-b", DeviceState::Connecting);
    registry.register(a).await.unwrap();
    registry.register(b).await.unwrap();
    registry
        .update_state("dev-a", DeviceState::Authenticating)
        .await
        .unwrap();

    let connecting = registry.get_by_state(DeviceState::Connecting);
    assert_eq!(connecting.len(), 1);
    assert_eq!(connecting[0].id(), "dev-b");
}

#[tokio::test]
async fn test_stats_by_state() {
    let registry = registry();
    let (a, _rx_a) = record("dev-a", DeviceState::Connecting);
    let (b, _rx_b) = record("dev-b", DeviceState::Connecting);
    registry.register(a).await.unwrap();
    registry.register(b).await.unwrap();

    let stats = registry.stats();
    assert_eq!(stats.total, 2);
    assert_eq!(stats.by_state.get("CONNECTING"), Some(&2));
    assert_eq!(stats.total_messages, 0);
}

#[tokio::test]
async fn test_sweep_evicts_stale_device() {
    let config = RelayConfig {
        // Stale bound 3 x 10ms = 30ms.
        heartbeat_interval_ms: 10,
        ..RelayConfig::default()
    };
    let registry = DeviceRegistry::new(config);
    let (rec, _rx) = record("dev-1", DeviceState::Connecting);
    registry.register(rec).await.unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    registry.sweep().await;
    assert!(registry.get("dev-1").is_none());
}

#[tokio::test]
async fn test_sweep_spares_fresh_device() {
    let config = RelayConfig {
        heartbeat_interval_ms: 10_000,
        ..RelayConfig::default()
    };
    let registry = DeviceRegistry::new(config);
    let (rec, _rx) = record("dev-1", DeviceState::Connecting);
    registry.register(rec).await.unwrap();
    registry.sweep().await;
    assert!(registry.get("dev-1").is_some());
}
