use super::*;
use tether_cdp::MessageId;

#[test]
fn test_device_not_found_display() {
    let err = RelayError::DeviceNotFound("dev-1".to_string());
    assert_eq!(err.to_string(), "no device with id dev-1");
    assert_eq!(err.code(), "DEVICE_NOT_FOUND");
    assert_eq!(err.kind(), ErrorKind::State);
    assert!(!err.recoverable());
    assert_eq!(err.device_id(), Some("dev-1"));
}

#[test]
fn test_device_not_active_display() {
    let err = RelayError::DeviceNotActive {
        device_id: "dev-2".to_string(),
        state: DeviceState::Registered,
    };
    assert_eq!(err.to_string(), "device dev-2 is REGISTERED, not ACTIVE");
    assert_eq!(err.code(), "DEVICE_NOT_ACTIVE");
    assert!(err.recoverable());
}

#[test]
fn test_invalid_transition_display() {
    let err = RelayError::InvalidStateTransition {
        device_id: "dev-3".to_string(),
        from: DeviceState::Closed,
        to: DeviceState::Active,
    };
    assert_eq!(
        err.to_string(),
        "invalid state transition for device dev-3: CLOSED -> ACTIVE"
    );
    assert_eq!(err.kind(), ErrorKind::State);
}

#[test]
fn test_queue_full_is_resource() {
    let err = RelayError::QueueFull {
        device_id: "dev-4".to_string(),
        limit: 100,
    };
    assert_eq!(err.kind(), ErrorKind::Resource);
    assert_eq!(err.code(), "QUEUE_FULL");
    assert!(err.recoverable());
}

#[test]
fn test_lock_timeout_is_resource() {
    let err = RelayError::LockTimeout {
        device_id: "dev-5".to_string(),
    };
    assert_eq!(err.kind(), ErrorKind::Resource);
    assert_eq!(err.code(), "LOCK_TIMEOUT");
}

#[test]
fn test_message_timeout_is_timeout_kind() {
    let err = RelayError::MessageTimeout(Duration::from_secs(5));
    assert_eq!(err.kind(), ErrorKind::Timeout);
    assert_eq!(err.code(), "MESSAGE_TIMEOUT");
    assert!(err.recoverable());
}

#[test]
fn test_malformed_is_protocol_and_recoverable() {
    let err = RelayError::Malformed("bad json".to_string());
    assert_eq!(err.kind(), ErrorKind::Protocol);
    assert!(err.recoverable());
}

#[test]
fn test_device_unavailable_is_business() {
    let err = RelayError::DeviceUnavailable {
        device_id: "dev-6".to_string(),
        reason: "extension socket closed".to_string(),
    };
    assert_eq!(err.kind(), ErrorKind::Business);
    assert!(err.recoverable());
    assert_eq!(err.device_id(), Some("dev-6"));
}

#[test]
fn test_to_cdp_frame_shape() {
    let err = RelayError::DeviceNotFound("dev-7".to_string());
    let frame = err.to_cdp_frame(MessageId::Number(7));
    let json = frame.to_text();
    assert!(json.contains(r#""id":7"#));
    assert!(json.contains(r#""code":-32000"#));
    assert!(json.contains("DEVICE_NOT_FOUND: no device with id dev-7"));
}

#[test]
fn test_to_payload_shape() {
    let err = RelayError::QueueFull {
        device_id: "dev-8".to_string(),
        limit: 10,
    };
    let payload = err.to_payload();
    assert_eq!(payload["code"], "QUEUE_FULL");
    assert_eq!(payload["deviceId"], "dev-8");
    assert_eq!(payload["recoverable"], true);
}

#[test]
fn test_error_is_send_sync() {
    fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<RelayError>();
}
