use super::*;

#[tokio::test]
async fn test_server_assembles_and_stops() {
    let server = RelayServer::new(RelayConfig::default(), ServerConfig::default());
    let _app = server.app();
    server.start_background();
    // Idempotent: a second call must not spawn duplicates.
    server.start_background();
    server.stop().await;
    assert_eq!(server.router().connection_count(), 0);
    assert!(server.registry().get_all().is_empty());
}

#[tokio::test]
async fn test_serve_and_graceful_shutdown() {
    let server = RelayServer::new(RelayConfig::default(), ServerConfig::default());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    let handle = {
        let server = server.clone();
        tokio::spawn(async move {
            server
                .serve(listener, async {
                    let _ = shutdown_rx.await;
                })
                .await
        })
    };

    shutdown_tx.send(()).unwrap();
    handle.await.unwrap().unwrap();
}
