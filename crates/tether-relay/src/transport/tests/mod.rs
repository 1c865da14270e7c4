use super::*;

#[tokio::test]
async fn test_send_text_delivers_command() {
    let (transport, mut rx) = Transport::channel();
    transport.send_text("hello").await.unwrap();
    match rx.recv().await {
        Some(TransportCommand::Text(text)) => assert_eq!(text, "hello"),
        other => panic!("expected text command, got {other:?}"),
    }
}

#[tokio::test]
async fn test_try_send_fails_after_receiver_drop() {
    let (transport, rx) = Transport::channel();
    drop(rx);
    let err = transport.try_send_text("x").unwrap_err();
    assert_eq!(err.code(), "TRANSPORT_FAILURE");
    assert!(transport.is_closed());
}

#[tokio::test]
async fn test_close_sends_close_command() {
    let (transport, mut rx) = Transport::channel();
    transport.close(1001, "new connection established");
    match rx.recv().await {
        Some(TransportCommand::Close { code, reason }) => {
            assert_eq!(code, 1001);
            assert_eq!(reason, "new connection established");
        }
        other => panic!("expected close command, got {other:?}"),
    }
}

#[tokio::test]
async fn test_clones_share_identity() {
    let (transport, _rx) = Transport::channel();
    let clone = transport.clone();
    assert_eq!(transport.id(), clone.id());
    let (other, _rx2) = Transport::channel();
    assert_ne!(transport.id(), other.id());
}
