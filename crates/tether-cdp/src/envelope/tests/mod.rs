use super::*;

#[test]
fn test_envelope_parse_full() {
    let env = Envelope::parse(
        r#"{"type":"device:register","id":"e1","timestamp":"2025-01-01T00:00:00Z","data":{"deviceInfo":{}},"metadata":{"v":2}}"#,
    )
    .unwrap();
    assert_eq!(env.kind, types::DEVICE_REGISTER);
    assert_eq!(env.id.as_deref(), Some("e1"));
    assert!(env.metadata.is_some());
}

#[test]
fn test_envelope_parse_defaults_timestamp() {
    let env = Envelope::parse(r#"{"type":"device:heartbeat","data":{}}"#).unwrap();
    assert_eq!(env.kind, types::DEVICE_HEARTBEAT);
    assert!(env.id.is_none());
}

#[test]
fn test_envelope_parse_missing_type() {
    let result = Envelope::parse(r#"{"data":{}}"#);
    assert!(matches!(result, Err(CodecError::MissingField("type"))));
}

#[test]
fn test_envelope_parse_missing_data() {
    let result = Envelope::parse(r#"{"type":"device:heartbeat"}"#);
    assert!(matches!(result, Err(CodecError::MissingField("data"))));
}

#[test]
fn test_envelope_parse_malformed() {
    let result = Envelope::parse("{nope");
    assert!(matches!(result, Err(CodecError::MalformedJson(_))));
}

#[test]
fn test_envelope_new_assigns_id_and_timestamp() {
    let env = Envelope::new(types::DEVICE_REGISTER_ACK, serde_json::json!({"state":"ACTIVE"}));
    assert!(env.id.is_some());
    let json = env.to_text();
    assert!(json.contains(r#""type":"device:register:ack""#));
    assert!(json.contains("timestamp"));
}

#[test]
fn test_envelope_reply_echoes_request_id() {
    let request = Envelope::parse(r#"{"type":"control:status","id":"req-9","data":{}}"#).unwrap();
    let reply = Envelope::reply_to(&request, types::CONTROL_STATUS_ACK, serde_json::json!({}));
    assert_eq!(reply.id.as_deref(), Some("req-9"));
    assert_eq!(reply.kind, types::CONTROL_STATUS_ACK);
}

#[test]
fn test_envelope_timestamp_rfc3339() {
    let env = Envelope::new(types::DEVICE_HEARTBEAT_ACK, serde_json::json!({}));
    let value: serde_json::Value = serde_json::from_str(&env.to_text()).unwrap();
    let ts = value["timestamp"].as_str().unwrap();
    assert!(ts.contains('T'));
    chrono::DateTime::parse_from_rfc3339(ts).unwrap();
}

#[test]
fn test_error_envelope_shape() {
    let env = Envelope::error("DEVICE_NOT_FOUND", "no device with id dev-1");
    assert_eq!(env.kind, types::ERROR);
    assert_eq!(env.data["code"], "DEVICE_NOT_FOUND");
    assert_eq!(env.data["message"], "no device with id dev-1");
}

#[test]
fn test_envelope_roundtrip() {
    let env = Envelope::new(types::CONTROL_COMMAND, serde_json::json!({"command":"listDevices"}));
    let parsed = Envelope::parse(&env.to_text()).unwrap();
    assert_eq!(parsed.kind, env.kind);
    assert_eq!(parsed.id, env.id);
    assert_eq!(parsed.data, env.data);
}
