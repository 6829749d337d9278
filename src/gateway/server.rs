//! Relay HTTP + WebSocket server using axum.

use crate::config::RelayConfig;
use crate::gateway::broadcast::Broadcaster;
use crate::gateway::callback::callback_handler;
use crate::gateway::client_mgr::{ClientManager, ClientMessage, Registration};
use crate::gateway::ingest::message_handler;
use crate::gateway::relay::{ProcessorClient, Relay};
use crate::gateway::uploads::UploadStore;
use crate::protocol::client::ClientEvent;
use anyhow::Context;
use axum::{
    extract::{
        ws::{Message, WebSocket},
        DefaultBodyLimit, State, WebSocketUpgrade,
    },
    http::{HeaderValue, Method},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

/// Extra time granted to in-flight relays at shutdown beyond the relay timeout
const DRAIN_GRACE: Duration = Duration::from_secs(5);

/// How long a closing connection may take to flush queued frames
const WRITER_FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared state for the relay server
pub struct RelayState {
    pub config: RelayConfig,
    pub clients: Arc<ClientManager>,
    pub broadcaster: Broadcaster,
    pub uploads: UploadStore,
    pub relay: Arc<dyn Relay>,
    /// Background relay tasks, awaited at shutdown
    pub tasks: TaskTracker,
    pub shutdown: CancellationToken,
}

impl RelayState {
    /// State wired to the configured HTTP processor
    pub async fn new(config: RelayConfig) -> anyhow::Result<Arc<Self>> {
        let client = ProcessorClient::new(
            &config.processor_url,
            &config.chat_id,
            config.relay_timeout,
        )
        .context("failed to build processor HTTP client")?;
        Self::with_relay(config, Arc::new(client)).await
    }

    pub async fn with_relay(config: RelayConfig, relay: Arc<dyn Relay>) -> anyhow::Result<Arc<Self>> {
        let uploads = UploadStore::open(&config.upload_dir, config.max_upload_bytes)
            .await
            .with_context(|| {
                format!("failed to create upload dir {}", config.upload_dir.display())
            })?;
        let clients = ClientManager::new();

        Ok(Arc::new(Self {
            broadcaster: Broadcaster::new(clients.clone()),
            clients,
            uploads,
            relay,
            config,
            tasks: TaskTracker::new(),
            shutdown: CancellationToken::new(),
        }))
    }
}

/// Build the router for the given state
pub fn router(state: Arc<RelayState>) -> Router {
    let config = &state.config;

    let mut app = Router::new()
        .route("/health", get(health_handler))
        .route("/ws", get(ws_handler))
        .route(
            "/api/message",
            post(message_handler).layer(DefaultBodyLimit::max(config.max_body_bytes())),
        )
        .route(&config.callback_route(), post(callback_handler));

    if let Some(dir) = config.static_dir.as_ref().filter(|d| d.is_dir()) {
        info!(dir = %dir.display(), "serving static files");
        app = app.fallback_service(ServeDir::new(dir));
    }

    app.layer(cors_layer(&config.cors_origin))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(origin: &str) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);
    if origin == "*" {
        return layer.allow_origin(Any);
    }
    match HeaderValue::from_str(origin) {
        Ok(value) => layer.allow_origin(value),
        Err(e) => {
            warn!(origin, error = %e, "ignoring invalid CORS origin");
            layer
        }
    }
}

/// Run the relay server until `shutdown` resolves, then drain and clean up
pub async fn run(
    config: RelayConfig,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let bind_addr = config.bind_addr();
    let state = RelayState::new(config).await?;
    let listener = TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", bind_addr))?;

    info!(
        addr = %bind_addr,
        processor = %state.config.processor_url,
        callback = %state.config.callback_route(),
        "relay listening"
    );

    serve(listener, state, shutdown).await
}

/// Serve on an already bound listener. Returns after shutdown cleanup.
pub async fn serve(
    listener: TcpListener,
    state: Arc<RelayState>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let app = router(state.clone());

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown.await;
            info!("shutting down");
        })
        .await?;

    drain(&state).await;
    Ok(())
}

/// Let in-flight relays broadcast to the still-open sockets, then close the
/// sockets and sweep the upload directory.
pub async fn drain(state: &RelayState) {
    state.tasks.close();
    let grace = state.config.relay_timeout + DRAIN_GRACE;
    if tokio::time::timeout(grace, state.tasks.wait()).await.is_err() {
        warn!(pending = state.tasks.len(), "relays still running at shutdown");
    }

    state.shutdown.cancel();
    state.clients.clear();

    match state.uploads.sweep().await {
        Ok(removed) => info!(removed, "swept upload directory"),
        Err(e) => warn!(error = %e, "failed to sweep upload directory"),
    }
}

async fn health_handler(State(state): State<Arc<RelayState>>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "connections": state.clients.count(),
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<RelayState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_websocket(socket, state))
}

async fn handle_websocket(socket: WebSocket, state: Arc<RelayState>) {
    let (mut sender, mut receiver) = socket.split();

    // Create channel for sending messages to this client
    let (tx, mut rx) = mpsc::unbounded_channel::<ClientMessage>();
    // The greeting is queued before the connection can receive broadcasts.
    let registration = Registration::with_greeting(state.clients.clone(), tx, |id| {
        match serde_json::to_string(&ClientEvent::connected(id)) {
            Ok(json) => Some(json),
            Err(e) => {
                warn!(error = %e, "failed to serialize greeting");
                None
            }
        }
    });
    let conn_id = registration.id().to_string();

    // Forward queued frames to the socket; ends once the registration drops
    let mut send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sender.send(Message::Text(msg.json.into())).await.is_err() {
                return;
            }
        }
        let _ = sender.send(Message::Close(None)).await;
    });

    info!(conn_id = %conn_id, connections = state.clients.count(), "client connected");

    loop {
        tokio::select! {
            _ = state.shutdown.cancelled() => break,
            msg = receiver.next() => match msg {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(e)) => {
                    debug!(conn_id = %conn_id, error = %e, "websocket error");
                    break;
                }
                // Clients submit over HTTP; anything they send here is ignored.
                Some(Ok(_)) => {}
            },
        }
    }

    drop(registration);
    if tokio::time::timeout(WRITER_FLUSH_TIMEOUT, &mut send_task)
        .await
        .is_err()
    {
        send_task.abort();
    }
    info!(conn_id = %conn_id, "client disconnected");
}
