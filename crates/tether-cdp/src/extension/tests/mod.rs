use super::*;

#[test]
fn test_parse_device_register() {
    let frame = ExtensionFrame::parse(
        r#"{"type":"device_register","deviceId":"dev-1","deviceInfo":{"name":"bridge","version":"1.2.0","userAgent":"Mozilla/5.0","timestamp":1700000000000}}"#,
    )
    .unwrap();
    match frame {
        ExtensionFrame::Control(ExtensionMessage::DeviceRegister { device_id, device_info }) => {
            assert_eq!(device_id, "dev-1");
            assert_eq!(device_info.name, "bridge");
            assert_eq!(device_info.user_agent, "Mozilla/5.0");
            assert_eq!(device_info.timestamp, Some(1_700_000_000_000));
        }
        other => panic!("expected device_register, got {other:?}"),
    }
}

#[test]
fn test_parse_register_with_sparse_device_info() {
    let frame =
        ExtensionFrame::parse(r#"{"type":"device_register","deviceId":"dev-2","deviceInfo":{}}"#)
            .unwrap();
    match frame {
        ExtensionFrame::Control(ExtensionMessage::DeviceRegister { device_info, .. }) => {
            assert!(device_info.name.is_empty());
            assert!(device_info.timestamp.is_none());
        }
        other => panic!("expected device_register, got {other:?}"),
    }
}

#[test]
fn test_parse_ping() {
    let frame = ExtensionFrame::parse(r#"{"type":"ping","deviceId":"dev-1"}"#).unwrap();
    assert!(matches!(
        frame,
        ExtensionFrame::Control(ExtensionMessage::Ping { .. })
    ));
}

#[test]
fn test_pong_serialization() {
    let pong = ExtensionMessage::pong("dev-1", 1_700_000_000_123);
    let json = pong.to_text();
    assert!(json.contains(r#""type":"pong""#));
    assert!(json.contains(r#""deviceId":"dev-1""#));
    assert!(json.contains("1700000000123"));
}

#[test]
fn test_parse_connection_info() {
    let frame = ExtensionFrame::parse(
        r#"{"type":"connection_info","sessionId":"S1","targetInfo":{"targetId":"T1","type":"page","title":"Example","url":"https://example.com","attached":true}}"#,
    )
    .unwrap();
    match frame {
        ExtensionFrame::Control(ExtensionMessage::ConnectionInfo {
            device_id,
            session_id,
            target_info,
        }) => {
            assert!(device_id.is_none());
            assert_eq!(session_id, "S1");
            assert_eq!(target_info.target_id, "T1");
            assert_eq!(target_info.target_type, "page");
            assert_eq!(target_info.attached, Some(true));
        }
        other => panic!("expected connection_info, got {other:?}"),
    }
}

#[test]
fn test_parse_cdp_response_frame() {
    let frame = ExtensionFrame::parse(r#"{"id":12,"result":{"value":1}}"#).unwrap();
    match frame {
        ExtensionFrame::Cdp(cdp) => assert!(cdp.is_response()),
        other => panic!("expected CDP frame, got {other:?}"),
    }
}

#[test]
fn test_parse_cdp_event_frame() {
    let frame = ExtensionFrame::parse(r#"{"method":"Page.loadEventFired","params":{}}"#).unwrap();
    match frame {
        ExtensionFrame::Cdp(cdp) => assert!(cdp.is_event()),
        other => panic!("expected CDP frame, got {other:?}"),
    }
}

#[test]
fn test_parse_unknown_type() {
    let result = ExtensionFrame::parse(r#"{"type":"device_explode","deviceId":"dev-1"}"#);
    assert!(matches!(result, Err(CodecError::UnknownType(t)) if t == "device_explode"));
}

#[test]
fn test_parse_malformed_json() {
    assert!(matches!(
        ExtensionFrame::parse("{"),
        Err(CodecError::MalformedJson(_))
    ));
}

#[test]
fn test_parse_anonymous_object() {
    assert!(matches!(
        ExtensionFrame::parse(r#"{"foo":1}"#),
        Err(CodecError::MissingField(_))
    ));
}

#[test]
fn test_target_info_rename_roundtrip() {
    let info = TargetInfo {
        target_id: "T9".to_string(),
        target_type: "page".to_string(),
        title: "t".to_string(),
        url: "about:blank".to_string(),
        attached: None,
    };
    let json = serde_json::to_string(&info).unwrap();
    assert!(json.contains(r#""targetId":"T9""#));
    assert!(json.contains(r#""type":"page""#));
    assert!(!json.contains("attached"));
    let back: TargetInfo = serde_json::from_str(&json).unwrap();
    assert_eq!(back.target_id, "T9");
}
