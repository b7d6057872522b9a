#![allow(dead_code)]

use std::net::UdpSocket;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use mquic::prelude::*;
use tokio::time::{sleep, timeout, Duration};

pub fn test_config() -> TransportConfig {
    TransportConfig::default()
        .with_token_policy(TokenPolicy::Insecure)
        .with_connect_timeout(Duration::from_secs(5))
}

pub fn transport() -> Transport {
    Transport::builder().with_config(test_config()).build().unwrap()
}

/// Loopback address on a port that was free a moment ago
pub fn loopback_addr() -> Multiaddr {
    let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
    let port = socket.local_addr().unwrap().port();
    format!("/ip4/127.0.0.1/udp/{}/quic-v1", port).parse().unwrap()
}

/// Handler that only counts invocations
pub fn counting_handler() -> (Arc<dyn ConnectionHandler>, Arc<AtomicUsize>) {
    let count = Arc::new(AtomicUsize::new(0));
    let counter = count.clone();
    let handler: Arc<dyn ConnectionHandler> = Arc::new(move |_: Connection| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    (handler, count)
}

pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    timeout(Duration::from_secs(10), async {
        while !condition() {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

/// Listens on a fresh loopback port and returns the dialable address
pub async fn listen_loopback(transport: &Transport, handler: Arc<dyn ConnectionHandler>) -> Multiaddr {
    let addr = loopback_addr();
    transport.listen(&addr, handler).await.unwrap();
    addr
}
