use super::*;

fn transport() -> Transport {
    Transport::channel().0
}

fn valid_caps() -> DeviceCapabilities {
    DeviceCapabilities {
        browser_name: "Chrome".to_string(),
        browser_version: "126.0".to_string(),
        platform: "linux".to_string(),
        user_agent: "Mozilla/5.0".to_string(),
        ..DeviceCapabilities::default()
    }
}

// State machine tests
#[test]
fn test_permitted_transitions() {
    use DeviceState::*;
    let permitted = [
        (Connecting, Authenticating),
        (Connecting, Error),
        (Connecting, Closed),
        (Authenticating, Registered),
        (Authenticating, Error),
        (Authenticating, Closed),
        (Registered, Active),
        (Registered, Disconnecting),
        (Registered, Error),
        (Active, Disconnecting),
        (Active, Error),
        (Active, Registered),
        (Disconnecting, Closed),
        (Error, Connecting),
        (Error, Closed),
        (Error, Active),
    ];
    for (from, to) in permitted {
        assert!(from.can_transition_to(to), "{from} -> {to} should be permitted");
    }
}

#[test]
fn test_rejected_transitions() {
    use DeviceState::*;
    let rejected = [
        (Connecting, Active),
        (Connecting, Registered),
        (Authenticating, Active),
        (Registered, Closed),
        (Active, Closed),
        (Active, Connecting),
        (Disconnecting, Active),
        (Disconnecting, Error),
        (Closed, Connecting),
        (Closed, Active),
        (Closed, Error),
    ];
    for (from, to) in rejected {
        assert!(!from.can_transition_to(to), "{from} -> {to} should be rejected");
    }
}

#[test]
fn test_closed_is_terminal() {
    use DeviceState::*;
    assert!(Closed.is_terminal());
    for next in [Connecting, Authenticating, Registered, Active, Disconnecting, Closed, Error] {
        assert!(!Closed.can_transition_to(next));
    }
}

#[test]
fn test_only_active_accepts_routing() {
    use DeviceState::*;
    assert!(Active.accepts_routing());
    for state in [Connecting, Authenticating, Registered, Disconnecting, Closed, Error] {
        assert!(!state.accepts_routing());
    }
}

#[test]
fn test_state_serde_screaming_case() {
    let json = serde_json::to_string(&DeviceState::Authenticating).unwrap();
    assert_eq!(json, r#""AUTHENTICATING""#);
    let back: DeviceState = serde_json::from_str(r#""ACTIVE""#).unwrap();
    assert_eq!(back, DeviceState::Active);
}

// Capability validation tests
#[test]
fn test_valid_capabilities_pass() {
    assert!(valid_caps().validate().is_ok());
}

#[test]
fn test_capabilities_reject_empty_browser_name() {
    let mut caps = valid_caps();
    caps.browser_name = "  ".to_string();
    let err = caps.validate().unwrap_err();
    assert_eq!(err.code(), "INVALID_CAPABILITIES");
    assert!(err.to_string().contains("browserName"));
}

#[test]
fn test_capabilities_reject_zero_concurrency() {
    let mut caps = valid_caps();
    caps.max_concurrent_requests = 0;
    assert!(caps.validate().is_err());
}

#[test]
fn test_capabilities_from_device_info() {
    let info = tether_cdp::DeviceInfo {
        name: "bridge".to_string(),
        version: "1.0.0".to_string(),
        user_agent: "UA".to_string(),
        timestamp: None,
    };
    let caps = DeviceCapabilities::from_device_info(&info);
    assert_eq!(caps.name, "bridge");
    assert_eq!(caps.user_agent, "UA");
    assert!(caps.browser_name.is_empty());
}

#[test]
fn test_capabilities_deserialize_camel_case() {
    let caps: DeviceCapabilities = serde_json::from_str(
        r#"{"browserName":"Chrome","browserVersion":"126","platform":"mac","userAgent":"UA","supportedDomains":["Page","Runtime"],"maxConcurrentRequests":4}"#,
    )
    .unwrap();
    assert_eq!(caps.browser_name, "Chrome");
    assert_eq!(caps.supported_domains.len(), 2);
    assert_eq!(caps.max_concurrent_requests, 4);
}

// Metrics tests
#[test]
fn test_latency_ewma_first_sample_is_exact() {
    let metrics = DeviceMetrics::default();
    metrics.record_latency(100.0);
    assert!((metrics.average_latency_ms() - 100.0).abs() < f64::EPSILON);
    assert!((metrics.last_latency_ms() - 100.0).abs() < f64::EPSILON);
}

#[test]
fn test_latency_ewma_weighting() {
    let metrics = DeviceMetrics::default();
    metrics.record_latency(100.0);
    metrics.record_latency(200.0);
    // 0.1 * 200 + 0.9 * 100
    assert!((metrics.average_latency_ms() - 110.0).abs() < 1e-9);
    assert!((metrics.last_latency_ms() - 200.0).abs() < f64::EPSILON);
}

#[test]
fn test_metrics_snapshot_carries_counters() {
    let metrics = DeviceMetrics::default();
    metrics.messages_in.fetch_add(3, Ordering::Relaxed);
    metrics.requests.fetch_add(2, Ordering::Relaxed);
    metrics.record_latency(50.0);
    let snap = metrics.snapshot();
    assert_eq!(snap.messages_in, 3);
    assert_eq!(snap.requests, 2);
    assert!((snap.average_response_ms - 50.0).abs() < f64::EPSILON);
}

// Record tests
#[test]
fn test_record_touch_seen_refreshes_idle() {
    let record = DeviceRecord::new("dev-1", valid_caps(), transport(), DeviceState::Active, 10);
    std::thread::sleep(std::time::Duration::from_millis(5));
    assert!(record.idle() >= std::time::Duration::from_millis(5));
    record.touch_seen();
    assert!(record.idle() < std::time::Duration::from_millis(5));
}

#[test]
fn test_record_heartbeat_refreshes_both_marks() {
    let record = DeviceRecord::new("dev-1", valid_caps(), transport(), DeviceState::Active, 10);
    std::thread::sleep(std::time::Duration::from_millis(5));
    record.touch_heartbeat();
    assert!(record.idle() < std::time::Duration::from_millis(5));
    assert!(record.heartbeat_idle() < std::time::Duration::from_millis(5));
}

#[test]
fn test_record_connection_info_install() {
    let record = DeviceRecord::new("dev-1", valid_caps(), transport(), DeviceState::Active, 10);
    assert!(record.connection_info().is_none());
    record.set_connection_info(ConnectionInfo {
        session_id: "S1".to_string(),
        target_info: tether_cdp::TargetInfo {
            target_id: "T1".to_string(),
            target_type: "page".to_string(),
            title: "t".to_string(),
            url: "https://example.com".to_string(),
            attached: Some(true),
        },
    });
    let info = record.connection_info().unwrap();
    assert_eq!(info.session_id, "S1");
    assert_eq!(info.target_info.target_id, "T1");
}

#[test]
fn test_record_replace_transport_returns_old() {
    let old = transport();
    let old_id = old.id();
    let record = DeviceRecord::new("dev-1", valid_caps(), old, DeviceState::Active, 10);
    let next = transport();
    let next_id = next.id();
    let replaced = record.replace_transport(next);
    assert_eq!(replaced.id(), old_id);
    assert_eq!(record.transport().id(), next_id);
}

#[test]
fn test_record_summary_shape() {
    let record = DeviceRecord::new("dev-9", valid_caps(), transport(), DeviceState::Registered, 10);
    let summary = record.summary();
    assert_eq!(summary.id, "dev-9");
    assert_eq!(summary.state, DeviceState::Registered);
    assert_eq!(summary.queued, 0);
    assert!(summary.target_url.is_none());
    let json = serde_json::to_string(&summary).unwrap();
    assert!(json.contains(r#""state":"REGISTERED""#));
    assert!(json.contains(r#""uptimeSeconds""#));
}
