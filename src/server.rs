use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, Method, Uri},
    Router,
};
use tokio::{net::TcpListener, sync::oneshot, task::JoinHandle};
use tower_http::trace::TraceLayer;

use crate::config::MockConfig;
use crate::error::MockError;
use crate::expectation::ExpectationRegistry;
use crate::handler::RequestHandler;
use crate::request::MockRequest;
use crate::response::MockResponse;

/// A running test double. Every method and path is routed to the same handler.
pub struct MockServer {
    addr: SocketAddr,
    handler: Arc<RequestHandler>,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<std::io::Result<()>>>,
}

impl MockServer {
    pub async fn start(registry: ExpectationRegistry) -> Result<Self, MockError> {
        Self::start_with_config(registry, MockConfig::default()).await
    }

    pub async fn start_with_config(
        registry: ExpectationRegistry,
        config: MockConfig,
    ) -> Result<Self, MockError> {
        let handler = Arc::new(RequestHandler::new(registry, &config));
        let listener = TcpListener::bind(config.bind_addr).await?;
        let addr = listener.local_addr()?;
        let (shutdown, signal) = oneshot::channel::<()>();

        let app = router(Arc::clone(&handler));
        let task = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = signal.await;
                })
                .await
        });

        tracing::info!(%addr, "mock server started");

        Ok(Self {
            addr,
            handler,
            shutdown: Some(shutdown),
            task: Some(task),
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Base URL with a trailing slash, e.g. `http://127.0.0.1:41234/`.
    pub fn base_url(&self) -> String {
        format!("http://{}/", self.addr)
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url(), path.trim_start_matches('/'))
    }

    pub fn expectations(&self) -> &ExpectationRegistry {
        self.handler.registry()
    }

    pub fn request_count(&self) -> usize {
        self.handler.handled()
    }

    pub async fn shutdown(mut self) -> Result<(), MockError> {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(task) = self.task.take() {
            match task.await {
                Ok(result) => result?,
                Err(error) => tracing::warn!(%error, "mock server task did not finish cleanly"),
            }
        }
        tracing::info!(addr = %self.addr, "mock server shut down");
        Ok(())
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }
}

/// Router sending every request to `handler`.
pub fn router(handler: Arc<RequestHandler>) -> Router {
    Router::new()
        .fallback(dispatch)
        .layer(TraceLayer::new_for_http())
        .with_state(handler)
}

async fn dispatch(
    State(handler): State<Arc<RequestHandler>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> MockResponse {
    let request = MockRequest {
        method,
        path: uri.path().to_string(),
        headers,
        body: String::from_utf8_lossy(&body).into_owned(),
    };
    handler.handle_request(&request)
}
