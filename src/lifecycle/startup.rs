//! Startup orchestration.
//!
//! # Responsibilities
//! - Resolve strategies and bind listeners
//! - Register with the registry backend (retried until the deadline)
//! - Start the reconciler and the frontends
//! - On drain: deregister once, wait for the frontends and in-flight work
//!   within `shutdown_wait`, stop
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Listeners bind before registering so bind errors never leave a
//!   registration behind; they accept only after routes are watched
//! - Deregistration happens here and nowhere else

use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::{ListenerConfig, ProxyConfig};
use crate::dispatch::Dispatcher;
use crate::http::HttpServer;
use crate::lifecycle::{signals, Shutdown};
use crate::net::{Listener, ListenerError, TcpSniProxy};
use crate::reconcile::{Reconciler, RouteLogFormat};
use crate::registry::{self, Backend, RegistryError};
use crate::routing::{StrategyError, TableStore};

#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Strategy(#[from] StrategyError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Listener(#[from] ListenerError),
}

/// Bound but not yet accepting.
pub struct Listeners {
    pub http: TcpListener,
    pub tcp_sni: Option<Listener>,
}

impl Listeners {
    pub async fn bind(config: &ListenerConfig) -> Result<Self, StartupError> {
        let http = TcpListener::bind(&config.bind_address)
            .await
            .map_err(|source| StartupError::Bind {
                addr: config.bind_address.clone(),
                source,
            })?;
        let tcp_sni = match &config.tcp_sni_address {
            Some(addr) => Some(Listener::bind(addr, config.max_connections).await?),
            None => None,
        };
        Ok(Self { http, tcp_sni })
    }
}

/// Run the router with the configured registry backend until a signal
/// requests shutdown.
pub async fn run(config: ProxyConfig) -> Result<(), StartupError> {
    let shutdown = Shutdown::new();
    tokio::spawn(signals::listen(shutdown.clone()));

    let listeners = Listeners::bind(&config.listener).await?;
    let registry_config = config.registry.clone();
    serve(&config, listeners, || registry::connect(&registry_config), shutdown).await
}

/// Register, watch routes and serve on `listeners` until `shutdown` is
/// requested, then drain.
pub async fn serve<F>(
    config: &ProxyConfig,
    listeners: Listeners,
    connect: F,
    shutdown: Shutdown,
) -> Result<(), StartupError>
where
    F: FnMut() -> Result<Arc<dyn Backend>, RegistryError>,
{
    let store = Arc::new(TableStore::default());
    let dispatcher = Dispatcher::from_settings(store.clone(), &config.proxy)?;
    let log_format = RouteLogFormat::from_name(&config.proxy.log_routes);

    let backend = match registry::register_with_retry(
        connect,
        config.registry.retry(),
        config.registry.timeout(),
        &shutdown,
    )
    .await
    {
        Ok(backend) => backend,
        Err(RegistryError::Interrupted) => {
            tracing::info!("Shutdown requested before registration completed");
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    let reconciler = Reconciler::new(store, log_format);
    let reconcile_task = tokio::spawn(reconciler.run(
        backend.watch_services(),
        backend.watch_manual(),
        shutdown.subscribe(),
    ));

    let http = HttpServer::new(
        dispatcher.clone(),
        shutdown.clone(),
        &config.proxy,
        config.listener.max_connections,
    );
    let mut tasks = vec![spawn_frontend("http", shutdown.clone(), http.run(listeners.http))];

    if let Some(listener) = listeners.tcp_sni {
        let proxy = Arc::new(TcpSniProxy::new(
            dispatcher,
            shutdown.clone(),
            config.proxy.client_hello_timeout(),
            config.proxy.dial_timeout(),
        ));
        tasks.push(spawn_frontend("tcp+sni", shutdown.clone(), proxy.serve(listener)));
    }

    shutdown.draining().await;

    tracing::info!(backend = backend.name(), "Deregistering");
    if let Err(e) = backend.deregister().await {
        tracing::warn!(error = %e, "Deregistration failed");
    }

    // Frontends and in-flight work share one drain budget.
    let wait = config.proxy.shutdown_wait();
    let deadline = Instant::now() + wait;
    for mut task in tasks {
        if tokio::time::timeout_at(deadline, &mut task).await.is_err() {
            tracing::warn!("Frontend still serving at drain deadline");
            task.abort();
        }
    }

    let remaining = deadline.saturating_duration_since(Instant::now());
    if !shutdown.await_stopped(remaining).await {
        tracing::warn!(in_flight = shutdown.in_flight(), wait = ?wait, "Drain timed out");
    }

    if !reconcile_task.is_finished() {
        reconcile_task.abort();
    }
    tracing::info!("Down");
    Ok(())
}

/// Run a frontend; a frontend that fails takes the router down with it.
fn spawn_frontend<E>(
    name: &'static str,
    shutdown: Shutdown,
    frontend: impl std::future::Future<Output = Result<(), E>> + Send + 'static,
) -> JoinHandle<()>
where
    E: std::fmt::Display + Send + 'static,
{
    tokio::spawn(async move {
        if let Err(e) = frontend.await {
            tracing::error!(frontend = name, error = %e, "Frontend failed");
            shutdown.request_shutdown();
        }
    })
}
