//! TCP+SNI frontend behaviour across a drain.

use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

mod common;

async fn wait_for_in_flight(router: &common::TestRouter, n: u64) {
    for _ in 0..100 {
        if router.shutdown.in_flight() == n {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("in-flight count never reached {}", n);
}

#[tokio::test]
async fn accepted_connection_completes_while_new_ones_are_refused() {
    let echo = common::start_echo_backend().await;
    let router = common::start_router(&format!("route add tls secure.example.com/ tcp://{}", echo), "").await;
    // No HTTP route to poll; give the reconciler a moment to publish.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let mut a = TcpStream::connect(router.tcp_sni).await.unwrap();
    wait_for_in_flight(&router, 1).await;

    assert!(router.shutdown.request_shutdown());
    tokio::time::sleep(Duration::from_millis(100)).await;

    // B arrives after the listener closed.
    let refused = match TcpStream::connect(router.tcp_sni).await {
        Err(_) => true,
        Ok(mut b) => {
            let mut buf = [0u8; 1];
            matches!(
                tokio::time::timeout(Duration::from_secs(1), b.read(&mut buf)).await,
                Ok(Ok(0)) | Ok(Err(_))
            )
        }
    };
    assert!(refused, "connection accepted while draining");

    // A still gets its lookup and a full round trip.
    let hello = common::client_hello(Some("secure.example.com"));
    a.write_all(&hello).await.unwrap();
    let mut echoed = vec![0u8; hello.len()];
    a.read_exact(&mut echoed).await.unwrap();
    assert_eq!(echoed, hello);

    a.write_all(b"application data").await.unwrap();
    let mut reply = [0u8; 16];
    a.read_exact(&mut reply).await.unwrap();
    assert_eq!(&reply, b"application data");

    drop(a);
    tokio::time::timeout(Duration::from_secs(5), router.task)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn unknown_server_name_is_closed() {
    let echo = common::start_echo_backend().await;
    let router = common::start_router(&format!("route add tls secure.example.com/ tcp://{}", echo), "").await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let mut conn = TcpStream::connect(router.tcp_sni).await.unwrap();
    conn.write_all(&common::client_hello(Some("other.example.com"))).await.unwrap();
    let mut buf = [0u8; 8];
    let read = tokio::time::timeout(Duration::from_secs(2), conn.read(&mut buf)).await;
    assert!(matches!(read, Ok(Ok(0)) | Ok(Err(_))));

    router.shutdown.request_shutdown();
}
