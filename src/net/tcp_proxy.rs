//! TCP+SNI passthrough frontend.
//!
//! # Data Flow
//! ```text
//! accept (bounded) → track in-flight
//!     → read ClientHello (timeout, one record)
//!     → Dispatcher::lookup_host(server name)
//!     → dial target host:port (timeout)
//!     → replay ClientHello bytes → copy both directions until either side closes
//! ```
//!
//! On drain the listener is dropped, so new connections are refused while
//! accepted ones run to completion.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

use crate::dispatch::Dispatcher;
use crate::lifecycle::Shutdown;
use crate::net::listener::{Listener, ListenerError};
use crate::net::sni::{read_client_hello, SniError};

#[derive(Debug, Error)]
pub enum TcpProxyError {
    #[error("no ClientHello within {0:?}")]
    HelloTimeout(Duration),

    #[error(transparent)]
    Sni(#[from] SniError),

    #[error("no route for server name {0:?}")]
    NoRoute(String),

    #[error("target {0} has no host:port to dial")]
    InvalidTarget(String),

    #[error("dialing {addr} timed out")]
    DialTimeout { addr: String },

    #[error("dialing {addr} failed: {source}")]
    Dial {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("connection error: {0}")]
    Io(#[from] std::io::Error),
}

pub struct TcpSniProxy {
    dispatcher: Dispatcher,
    shutdown: Shutdown,
    hello_timeout: Duration,
    dial_timeout: Duration,
}

impl TcpSniProxy {
    pub fn new(
        dispatcher: Dispatcher,
        shutdown: Shutdown,
        hello_timeout: Duration,
        dial_timeout: Duration,
    ) -> Self {
        Self {
            dispatcher,
            shutdown,
            hello_timeout,
            dial_timeout,
        }
    }

    /// Accept connections until shutdown is requested.
    pub async fn serve(self: Arc<Self>, listener: Listener) -> Result<(), ListenerError> {
        let addr = listener.local_addr().ok();
        tracing::info!(address = ?addr, "TCP+SNI proxy starting");

        loop {
            let accepted = tokio::select! {
                biased;
                _ = self.shutdown.draining() => break,
                accepted = listener.accept() => accepted,
            };

            let (stream, peer, permit) = match accepted {
                Ok(conn) => conn,
                Err(ListenerError::Accept(e)) => {
                    tracing::warn!(error = %e, "Accept failed");
                    continue;
                }
                Err(e) => return Err(e),
            };

            let guard = self.shutdown.track();
            let proxy = self.clone();
            tokio::spawn(async move {
                let _permit = permit;
                let id = guard.id();
                match proxy.handle(stream, peer).await {
                    Ok(()) => tracing::debug!(conn = %id, peer = %peer, "Connection closed"),
                    Err(e) => tracing::warn!(conn = %id, peer = %peer, error = %e, "TCP+SNI connection failed"),
                }
                drop(guard);
            });
        }

        drop(listener);
        tracing::info!(address = ?addr, "TCP+SNI listener closed");
        Ok(())
    }

    async fn handle(&self, mut client: TcpStream, peer: SocketAddr) -> Result<(), TcpProxyError> {
        let hello = tokio::time::timeout(self.hello_timeout, read_client_hello(&mut client))
            .await
            .map_err(|_| TcpProxyError::HelloTimeout(self.hello_timeout))??;

        let target = self
            .dispatcher
            .lookup_host(&hello.server_name)
            .ok_or_else(|| TcpProxyError::NoRoute(hello.server_name.clone()))?;
        let addr = target
            .authority()
            .ok_or_else(|| TcpProxyError::InvalidTarget(target.url.to_string()))?;

        let mut upstream = tokio::time::timeout(self.dial_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| TcpProxyError::DialTimeout { addr: addr.clone() })?
            .map_err(|source| TcpProxyError::Dial {
                addr: addr.clone(),
                source,
            })?;

        tracing::debug!(
            peer = %peer,
            server_name = %hello.server_name,
            target = %addr,
            "Forwarding TCP+SNI connection"
        );

        upstream.write_all(&hello.bytes).await?;
        let (sent, received) = tokio::io::copy_bidirectional(&mut client, &mut upstream).await?;
        tracing::debug!(peer = %peer, target = %addr, sent, received, "TCP+SNI stream finished");
        Ok(())
    }
}
