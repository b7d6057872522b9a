//! Upgrade pipeline behavior with pluggable upgraders

mod common;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use common::*;
use mquic::prelude::*;
use parking_lot::Mutex;
use tokio::time::{timeout, Duration};

/// Delegates to the QUIC upgrader but refuses every muxer negotiation
struct FailingMuxer;

#[async_trait]
impl ConnectionUpgrader for FailingMuxer {
    async fn establish_secure_session(&self, connection: &Connection) -> Result<SecureSession> {
        QuicUpgrader.establish_secure_session(connection).await
    }

    async fn establish_muxer_session(&self, _connection: &Connection) -> Result<MuxerSession> {
        Err(TransportError::MuxerNegotiation("no common muxer".to_string()))
    }
}

/// Records the order in which stages run
#[derive(Default)]
struct Recording {
    events: Arc<Mutex<Vec<&'static str>>>,
}

#[async_trait]
impl ConnectionUpgrader for Recording {
    async fn establish_secure_session(&self, connection: &Connection) -> Result<SecureSession> {
        self.events.lock().push("secure");
        QuicUpgrader.establish_secure_session(connection).await
    }

    async fn establish_muxer_session(&self, connection: &Connection) -> Result<MuxerSession> {
        assert!(connection.secure_session().is_some());
        self.events.lock().push("muxer");
        QuicUpgrader.establish_muxer_session(connection).await
    }
}

/// Counts the call, then stays busy until its task is torn down
struct Lingering {
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl ConnectionHandler for Lingering {
    async fn handle_connection(&self, _connection: Connection) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(3600)).await;
    }
}

fn transport_with(upgrader: Arc<dyn ConnectionUpgrader>) -> Transport {
    Transport::builder()
        .with_config(test_config())
        .with_upgrader(upgrader)
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_muxer_failure_skips_handler_and_closes_channel() {
    let server = transport();
    let client = transport_with(Arc::new(FailingMuxer));

    let (server_handler, _) = counting_handler();
    let addr = listen_loopback(&server, server_handler).await;

    let (handler, calls) = counting_handler();
    let err = client.dial(&addr, handler).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MuxerNegotiationFailure);
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    // the raw channel closes and unregisters itself on both ends
    wait_until(|| client.active_connections() == 0).await;
    wait_until(|| server.active_connections() == 0).await;

    client.close().await;
    server.close().await;
}

#[tokio::test]
async fn test_inbound_muxer_failure_closes_remote() {
    let server = transport_with(Arc::new(FailingMuxer));
    let client = transport();

    let (server_handler, server_calls) = counting_handler();
    let addr = listen_loopback(&server, server_handler).await;

    // the dialer may finish its own upgrade before the refusal arrives
    let (handler, _) = counting_handler();
    match client.dial(&addr, handler).await {
        Ok(connection) => {
            let reason = timeout(Duration::from_secs(5), connection.closed()).await.unwrap();
            assert_eq!(reason.kind(), ErrorKind::ConnectionClosed);
            assert!(connection.is_closed());
        }
        Err(e) => assert_eq!(e.kind(), ErrorKind::ConnectionClosed),
    }
    assert_eq!(server_calls.load(Ordering::SeqCst), 0);
    wait_until(|| server.active_connections() == 0).await;

    client.close().await;
    server.close().await;
}

#[tokio::test]
async fn test_stages_run_in_order_before_completion() {
    let server = transport();
    let recording = Recording::default();
    let events = recording.events.clone();
    let client = transport_with(Arc::new(recording));

    let (server_handler, _) = counting_handler();
    let addr = listen_loopback(&server, server_handler).await;

    let handled = Arc::new(AtomicBool::new(false));
    let flag = handled.clone();
    let handler_events = events.clone();
    let connection = client
        .dial(
            &addr,
            Arc::new(move |connection: Connection| {
                assert!(connection.muxer_session().is_some());
                handler_events.lock().push("handler");
                flag.store(true, Ordering::SeqCst);
            }),
        )
        .await
        .unwrap();

    // the handler has already run when the future resolves
    assert!(handled.load(Ordering::SeqCst));
    assert_eq!(*events.lock(), vec!["secure", "muxer", "handler"]);
    assert!(connection.secure_session().is_some());

    client.close().await;
    server.close().await;
}

#[tokio::test]
async fn test_close_during_upgrade_fails_future() {
    /// Muxer step that never finishes on its own
    struct Stalled;

    #[async_trait]
    impl ConnectionUpgrader for Stalled {
        async fn establish_secure_session(&self, connection: &Connection) -> Result<SecureSession> {
            QuicUpgrader.establish_secure_session(connection).await
        }

        async fn establish_muxer_session(&self, _connection: &Connection) -> Result<MuxerSession> {
            futures::future::pending().await
        }
    }

    let server = transport();
    let client = transport_with(Arc::new(Stalled));

    let (server_handler, _) = counting_handler();
    let addr = listen_loopback(&server, server_handler).await;

    let (handler, calls) = counting_handler();
    let dialer = client.clone();
    let pending = tokio::spawn(async move { dialer.dial(&addr, handler).await });

    wait_until(|| client.active_connections() == 1).await;
    client.close().await;

    let outcome = timeout(Duration::from_secs(5), pending).await.unwrap().unwrap();
    assert!(outcome.is_err());
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(client.active_connections(), 0);

    server.close().await;
}

#[tokio::test]
async fn test_close_inside_handler_still_reports_success() {
    let server = transport();
    let client = transport();

    let (server_handler, _) = counting_handler();
    let addr = listen_loopback(&server, server_handler).await;

    let calls = Arc::new(AtomicUsize::new(0));
    let handler = Arc::new(Lingering {
        calls: calls.clone(),
    });
    let dialer = client.clone();
    let pending = tokio::spawn(async move { dialer.dial(&addr, handler).await });

    wait_until(|| calls.load(Ordering::SeqCst) == 1).await;
    timeout(Duration::from_secs(10), client.close()).await.unwrap();

    // the handler ran, so the upgrade reports success even though its task was aborted
    let connection = timeout(Duration::from_secs(5), pending)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert!(connection.is_closed());
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    server.close().await;
}
