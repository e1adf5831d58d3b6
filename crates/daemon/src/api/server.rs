/// Hidden-service protocol server

use super::cors::cors;
use super::handlers::*;
use anyhow::Result;
use async_trait::async_trait;
use axum::{
    extract::DefaultBodyLimit,
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use darkmsg_common::config::protocol::MAX_BODY_BYTES;
use darkmsg_core::{EventSink, ServiceLauncher, SettingsStore};
use std::any::Any;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tower::ServiceBuilder;
use tower_http::{catch_panic::CatchPanicLayer, trace::TraceLayer};
use tracing::{debug, error, info, warn};

/// How long `stop` waits for in-flight requests before aborting the server
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Build the protocol router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root).fallback(not_found))
        .route("/wcdyu", get(wcdyu).fallback(not_found))
        .route("/crypto", get(crypto).fallback(not_found))
        .route("/addme", post(add_me).fallback(not_found))
        .route("/send", post(send).fallback(not_found))
        .fallback(not_found)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(middleware::from_fn(cors))
                .layer(CatchPanicLayer::custom(handler_panicked))
                .layer(DefaultBodyLimit::max(MAX_BODY_BYTES)),
        )
        .with_state(state)
}

/// A panicking handler or event sink still gets the peer a 500
fn handler_panicked(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    error!("Request handler panicked: {}", detail);
    (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response()
}

struct RunningServer {
    addr: SocketAddr,
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

/// Serves the peer protocol on the port the hidden service forwards to.
///
/// Bound to localhost only; peers reach it through the onion address.
pub struct HiddenServiceServer {
    port: u16,
    state: AppState,
    running: Mutex<Option<RunningServer>>,
}

impl HiddenServiceServer {
    pub fn new(port: u16, settings: Arc<dyn SettingsStore>, events: Arc<dyn EventSink>) -> Self {
        Self {
            port,
            state: AppState { settings, events },
            running: Mutex::new(None),
        }
    }

    /// Bind and serve in the background. Returns the bound address; a second
    /// call while running returns the existing one.
    pub async fn start(&self) -> Result<SocketAddr> {
        let mut running = self.running.lock().await;
        if let Some(server) = running.as_ref() {
            if !server.handle.is_finished() {
                debug!("Hidden service server already running on {}", server.addr);
                return Ok(server.addr);
            }
        }

        let listener =
            tokio::net::TcpListener::bind(SocketAddr::from((Ipv4Addr::LOCALHOST, self.port)))
                .await?;
        let addr = listener.local_addr()?;
        let app = router(self.state.clone());
        let (shutdown, signal) = oneshot::channel::<()>();

        let handle = tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = signal.await;
                })
                .await;
            if let Err(e) = result {
                error!("Hidden service server error: {}", e);
            }
        });

        info!("Hidden service server started on {}", addr);
        *running = Some(RunningServer {
            addr,
            shutdown,
            handle,
        });
        Ok(addr)
    }

    /// Shut down gracefully. No-op when not running.
    pub async fn stop(&self) {
        let server = self.running.lock().await.take();
        let Some(server) = server else {
            return;
        };

        let _ = server.shutdown.send(());
        let mut handle = server.handle;
        if tokio::time::timeout(SHUTDOWN_GRACE, &mut handle).await.is_err() {
            warn!("Hidden service server did not shut down in time, aborting");
            handle.abort();
        }
        info!("Hidden service server stopped");
    }

    pub async fn is_running(&self) -> bool {
        self.running
            .lock()
            .await
            .as_ref()
            .map_or(false, |server| !server.handle.is_finished())
    }

    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.running.lock().await.as_ref().map(|server| server.addr)
    }
}

#[async_trait]
impl ServiceLauncher for HiddenServiceServer {
    async fn start_service(&self) -> bool {
        match self.start().await {
            Ok(_) => true,
            Err(e) => {
                error!("Error starting hidden service server: {}", e);
                false
            }
        }
    }

    async fn stop_service(&self) {
        self.stop().await;
    }
}
