//! Shared utilities for integration tests.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use edge_router::config::ProxyConfig;
use edge_router::lifecycle::{self, Listeners, Shutdown, StartupError};
use edge_router::net::Listener;
use edge_router::registry::{Backend, StaticBackend};

/// Start a mock HTTP backend. Every response body is `"<name> <path>"`; the
/// `X-Forwarded-For` it saw comes back as `x-seen-forwarded-for`.
pub async fn start_mock_backend(name: &'static str) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    tokio::spawn(async move {
                        let head = read_request_head(&mut socket).await;
                        let path = head
                            .lines()
                            .next()
                            .and_then(|line| line.split_whitespace().nth(1))
                            .unwrap_or("")
                            .to_string();
                        let forwarded_for = head
                            .lines()
                            .find_map(|line| {
                                let (key, value) = line.split_once(':')?;
                                key.eq_ignore_ascii_case("x-forwarded-for")
                                    .then(|| value.trim().to_string())
                            })
                            .unwrap_or_default();

                        let body = format!("{} {}", name, path);
                        let response = format!(
                            "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nx-seen-forwarded-for: {}\r\nConnection: close\r\n\r\n{}",
                            body.len(),
                            forwarded_for,
                            body
                        );
                        let _ = socket.write_all(response.as_bytes()).await;
                        let _ = socket.shutdown().await;
                    });
                }
                Err(_) => break,
            }
        }
    });
    addr
}

async fn read_request_head(socket: &mut tokio::net::TcpStream) -> String {
    let mut head = Vec::new();
    let mut buf = [0u8; 1024];
    while !head.windows(4).any(|w| w == b"\r\n\r\n") {
        match socket.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => head.extend_from_slice(&buf[..n]),
        }
    }
    String::from_utf8_lossy(&head).into_owned()
}

/// Start an HTTP backend whose body is `body`, written one byte per
/// `interval` after the headers have gone out.
pub async fn start_slow_backend(body: &'static [u8], interval: Duration) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                read_request_head(&mut socket).await;
                let head = format!(
                    "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    body.len()
                );
                if socket.write_all(head.as_bytes()).await.is_err() {
                    return;
                }
                for byte in body {
                    tokio::time::sleep(interval).await;
                    if socket.write_all(&[*byte]).await.is_err() {
                        return;
                    }
                }
                let _ = socket.shutdown().await;
            });
        }
    });
    addr
}

/// Start a TCP backend that echoes every byte back.
pub async fn start_echo_backend() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let (mut reader, mut writer) = socket.split();
                let _ = tokio::io::copy(&mut reader, &mut writer).await;
            });
        }
    });
    addr
}

/// A running router on ephemeral ports.
pub struct TestRouter {
    pub http: SocketAddr,
    pub tcp_sni: SocketAddr,
    pub shutdown: Shutdown,
    pub task: JoinHandle<Result<(), StartupError>>,
}

/// Start the router with `backend` as its registry.
pub async fn start_router_with(config: ProxyConfig, backend: Arc<dyn Backend>) -> TestRouter {
    let http = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let tcp_sni = Listener::bind("127.0.0.1:0", 64).await.unwrap();
    let http_addr = http.local_addr().unwrap();
    let tcp_addr = tcp_sni.local_addr().unwrap();

    let shutdown = Shutdown::new();
    let listeners = Listeners {
        http,
        tcp_sni: Some(tcp_sni),
    };
    let task = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            lifecycle::serve(&config, listeners, move || Ok(backend.clone()), shutdown).await
        })
    };

    TestRouter {
        http: http_addr,
        tcp_sni: tcp_addr,
        shutdown,
        task,
    }
}

/// Start the router with static service and manual route text.
pub async fn start_router(routes: &str, manual: &str) -> TestRouter {
    let mut config = ProxyConfig::default();
    config.proxy.shutdown_wait_secs = 5;
    start_router_with(config, Arc::new(StaticBackend::new(routes, manual))).await
}

/// Poll `url` until it stops answering 404, i.e. the routes are live.
pub async fn wait_for_route(client: &reqwest::Client, url: &str) {
    for _ in 0..100 {
        if let Ok(resp) = client.get(url).send().await {
            if resp.status() != reqwest::StatusCode::NOT_FOUND {
                return;
            }
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("route for {} never became live", url);
}

/// Minimal TLS 1.2 ClientHello, optionally carrying a server_name extension.
///
/// Same layout as the builder in the `net::sni` unit tests: an unrelated
/// supported_groups extension comes before server_name.
pub fn client_hello(server_name: Option<&str>) -> Vec<u8> {
    const EXTENSION_SERVER_NAME: u16 = 0x0000;
    const NAME_TYPE_HOST_NAME: u8 = 0x00;

    let mut extensions = Vec::new();
    extensions.extend_from_slice(&[0x00, 0x0a, 0x00, 0x04, 0x00, 0x02, 0x00, 0x1d]);
    if let Some(name) = server_name {
        let name = name.as_bytes();
        let entry_len = 1 + 2 + name.len();
        extensions.extend_from_slice(&EXTENSION_SERVER_NAME.to_be_bytes());
        extensions.extend_from_slice(&((2 + entry_len) as u16).to_be_bytes());
        extensions.extend_from_slice(&(entry_len as u16).to_be_bytes());
        extensions.push(NAME_TYPE_HOST_NAME);
        extensions.extend_from_slice(&(name.len() as u16).to_be_bytes());
        extensions.extend_from_slice(name);
    }

    let mut body = vec![0x03, 0x03];
    body.extend_from_slice(&[0x42; 32]);
    body.push(0); // session id
    body.extend_from_slice(&[0x00, 0x02, 0x13, 0x01]);
    body.extend_from_slice(&[0x01, 0x00]);
    body.extend_from_slice(&(extensions.len() as u16).to_be_bytes());
    body.extend_from_slice(&extensions);

    let mut handshake = vec![0x01];
    handshake.extend_from_slice(&(body.len() as u32).to_be_bytes()[1..]);
    handshake.extend_from_slice(&body);

    let mut record = vec![0x16, 0x03, 0x01];
    record.extend_from_slice(&(handshake.len() as u16).to_be_bytes());
    record.extend_from_slice(&handshake);
    record
}
