//! HTTP surface and connection bootstrap for the Chorus server.
//!
//! An upgrade request must carry exactly one identity parameter. Once the
//! socket is upgraded it becomes a [`Client`]: registered with the hub first,
//! then handed to its reader and writer pumps.

use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard};
use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{WebSocket, WebSocketUpgrade},
        ConnectInfo, Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use chorus_core::{Client, ClientConfig, Hub, HubHandle};
use chorus_transport::websocket;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

/// Shared server state.
pub struct AppState {
    /// Front door to the broadcast hub.
    pub hub: HubHandle,
    /// Server configuration.
    pub config: Config,
    client_config: ClientConfig,
}

impl AppState {
    /// Create new app state around a running hub.
    #[must_use]
    pub fn new(config: Config, hub: HubHandle) -> Self {
        Self {
            hub,
            client_config: config.client_config(),
            config,
        }
    }
}

/// Why an upgrade request was turned away.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BootstrapError {
    /// The identity parameter is absent.
    #[error("Missing `{0}` query parameter")]
    MissingIdentity(String),

    /// The identity parameter appears more than once.
    #[error("Query parameter `{0}` given {1} times, expected exactly one")]
    DuplicateIdentity(String, usize),
}

impl BootstrapError {
    fn reason(&self) -> &'static str {
        match self {
            Self::MissingIdentity(_) => "missing_identity",
            Self::DuplicateIdentity(..) => "duplicate_identity",
        }
    }
}

impl IntoResponse for BootstrapError {
    fn into_response(self) -> Response {
        (StatusCode::BAD_REQUEST, self.to_string()).into_response()
    }
}

/// Pick the single value of `name` out of the query parameters.
///
/// An empty value is accepted; only absence and repetition are rejected.
pub fn extract_identity(
    params: &[(String, String)],
    name: &str,
) -> Result<String, BootstrapError> {
    let mut values = params
        .iter()
        .filter(|(key, _)| key == name)
        .map(|(_, value)| value);

    match (values.next(), values.count()) {
        (None, _) => Err(BootstrapError::MissingIdentity(name.to_string())),
        (Some(value), 0) => Ok(value.clone()),
        (Some(_), rest) => Err(BootstrapError::DuplicateIdentity(name.to_string(), rest + 1)),
    }
}

/// Build the HTTP router.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route(&state.config.transport.websocket_path, get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Serve the router on `listener` until `shutdown` resolves.
///
/// # Errors
///
/// Returns an error if the server fails while accepting connections.
pub async fn serve<F>(listener: TcpListener, state: Arc<AppState>, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(
        listener,
        app(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await
    .context("Server error")
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    let (hub, hub_task) = Hub::spawn(config.hub_config());

    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {:#}", e);
        }
    }

    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("Chorus server listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}?{}=<name>",
        addr, config.transport.websocket_path, config.transport.identity_param
    );

    let state = Arc::new(AppState::new(config, hub));
    serve(listener, state, shutdown_signal()).await?;

    // Upgraded connections outlive the listener and keep the hub alive.
    hub_task.abort();
    if let Err(e) = hub_task.await {
        if e.is_panic() {
            warn!("Hub task panicked");
        }
    }
    info!("Chorus server stopped");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.hub.stats().await {
        Ok(stats) => axum::Json(serde_json::json!({
            "status": "ok",
            "version": env!("CARGO_PKG_VERSION"),
            "clients": stats.clients,
        }))
        .into_response(),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            axum::Json(serde_json::json!({
                "status": "unavailable",
                "version": env!("CARGO_PKG_VERSION"),
                "error": e.to_string(),
            })),
        )
            .into_response(),
    }
}

/// WebSocket upgrade handler.
async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    Query(params): Query<Vec<(String, String)>>,
    State(state): State<Arc<AppState>>,
) -> Response {
    let identity = match extract_identity(&params, &state.config.transport.identity_param) {
        Ok(identity) => identity,
        Err(e) => {
            debug!(remote = %remote, error = %e, "Rejected upgrade");
            metrics::record_rejection(e.reason());
            return e.into_response();
        }
    };

    ws.max_message_size(state.config.limits.max_message_size)
        .on_upgrade(move |socket| handle_websocket(socket, identity, remote, state))
}

/// Drive an upgraded connection until both of its pumps are done.
async fn handle_websocket(
    socket: WebSocket,
    identity: String,
    remote: SocketAddr,
    state: Arc<AppState>,
) {
    let _metrics_guard = ConnectionMetricsGuard::new();

    let max_message_size = state.config.limits.max_message_size;
    let (reader, writer) = websocket::split(socket, max_message_size, Some(remote));
    let client = Client::new(
        identity,
        Box::new(reader),
        Box::new(writer),
        state.hub.clone(),
        state.client_config.clone(),
    );
    let id = client.id().clone();

    info!(client = %id, identity = %client.identity(), remote = %remote, "Client connected");

    let tasks = match client.start().await {
        Ok(tasks) => tasks,
        Err(e) => {
            error!(client = %id, error = %e, "Could not register client");
            metrics::record_error("hub_closed");
            return;
        }
    };

    let (reader_exit, writer_exit) = tasks.join().await;
    metrics::record_exit(reader_exit.as_ref(), writer_exit.as_ref());

    info!(client = %id, reader = ?reader_exit, writer = ?writer_exit, "Client disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::{SinkExt, StreamExt};
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;
    use tokio_tungstenite::tungstenite::{self, Message as WsMessage};
    use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

    type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

    fn params(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_extract_identity() {
        assert_eq!(
            extract_identity(&params(&[("nickname", "alice")]), "nickname"),
            Ok("alice".to_string())
        );
        assert_eq!(
            extract_identity(&params(&[("room", "1"), ("nickname", "")]), "nickname"),
            Ok(String::new())
        );
    }

    #[test]
    fn test_extract_identity_missing() {
        assert_eq!(
            extract_identity(&params(&[("name", "alice")]), "nickname"),
            Err(BootstrapError::MissingIdentity("nickname".into()))
        );
        assert_eq!(
            extract_identity(&[], "nickname"),
            Err(BootstrapError::MissingIdentity("nickname".into()))
        );
    }

    #[test]
    fn test_extract_identity_duplicate() {
        let query = params(&[("nickname", "a"), ("nickname", "b"), ("nickname", "c")]);
        let err = extract_identity(&query, "nickname").unwrap_err();
        assert_eq!(err, BootstrapError::DuplicateIdentity("nickname".into(), 3));
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
    }

    struct TestServer {
        addr: SocketAddr,
        hub: HubHandle,
        _shutdown: tokio::sync::oneshot::Sender<()>,
    }

    async fn start_server() -> TestServer {
        let mut config = Config::default();
        config.metrics.enabled = false;

        let (hub, _task) = Hub::spawn(config.hub_config());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(AppState::new(config, hub.clone()));

        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        tokio::spawn(serve(listener, state, async move {
            let _ = rx.await;
        }));

        TestServer {
            addr,
            hub,
            _shutdown: tx,
        }
    }

    async fn connect(addr: SocketAddr, nickname: &str) -> Socket {
        let url = format!("ws://{}/ws?nickname={}", addr, nickname);
        let (socket, _) = connect_async(url).await.unwrap();
        socket
    }

    async fn wait_for_clients(hub: &HubHandle, expected: usize) {
        for _ in 0..200 {
            if hub.stats().await.unwrap().clients == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("Hub never reached {} clients", expected);
    }

    async fn next_json(socket: &mut Socket) -> serde_json::Value {
        let read = async {
            loop {
                match socket.next().await {
                    Some(Ok(WsMessage::Text(text))) => return serde_json::from_str(&text).unwrap(),
                    Some(Ok(_)) => continue,
                    other => panic!("Connection ended: {:?}", other),
                }
            }
        };
        tokio::time::timeout(Duration::from_secs(5), read).await.unwrap()
    }

    #[tokio::test]
    async fn test_broadcast_reaches_every_client() {
        let server = start_server().await;
        let mut alice = connect(server.addr, "alice").await;
        let mut bob = connect(server.addr, "bob").await;
        wait_for_clients(&server.hub, 2).await;

        alice
            .send(WsMessage::Text(r#"{"content":"hi"}"#.into()))
            .await
            .unwrap();

        let expected = serde_json::json!({"nickname": "alice", "content": "hi"});
        assert_eq!(next_json(&mut alice).await, expected);
        assert_eq!(next_json(&mut bob).await, expected);
    }

    #[tokio::test]
    async fn test_departed_client_no_longer_receives() {
        let server = start_server().await;
        let mut alice = connect(server.addr, "alice").await;
        let mut bob = connect(server.addr, "bob").await;
        wait_for_clients(&server.hub, 2).await;

        alice.close(None).await.unwrap();
        wait_for_clients(&server.hub, 1).await;

        bob.send(WsMessage::Text(r#"{"content":"anyone?"}"#.into()))
            .await
            .unwrap();
        assert_eq!(
            next_json(&mut bob).await,
            serde_json::json!({"nickname": "bob", "content": "anyone?"})
        );

        let clients = server.hub.clients().await.unwrap();
        assert_eq!(clients.len(), 1);
        assert_eq!(clients[0].identity, "bob");
        assert_eq!(server.hub.stats().await.unwrap().deliveries, 1);
    }

    #[tokio::test]
    async fn test_missing_identity_is_rejected() {
        let server = start_server().await;

        let url = format!("ws://{}/ws", server.addr);
        match connect_async(url).await {
            Err(tungstenite::Error::Http(response)) => {
                assert_eq!(response.status(), StatusCode::BAD_REQUEST.as_u16());
            }
            other => panic!("Expected HTTP 400, got {:?}", other.map(|_| ())),
        }

        let url = format!("ws://{}/ws?nickname=a&nickname=b", server.addr);
        assert!(connect_async(url).await.is_err());

        assert_eq!(server.hub.stats().await.unwrap().clients, 0);
    }

    #[tokio::test]
    async fn test_health_reports_clients() {
        let server = start_server().await;
        let _alice = connect(server.addr, "alice").await;
        wait_for_clients(&server.hub, 1).await;

        let mut stream = TcpStream::connect(server.addr).await.unwrap();
        stream
            .write_all(b"GET /health HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();

        assert!(response.starts_with("HTTP/1.1 200"));
        let body = response.split("\r\n\r\n").nth(1).unwrap();
        let health: serde_json::Value = serde_json::from_str(body).unwrap();
        assert_eq!(health["status"], "ok");
        assert_eq!(health["clients"], 1);
    }
}
