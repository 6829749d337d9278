//! Test helpers: a scriptable relay, a server on an ephemeral port, and a
//! WebSocket client that reads push frames.

use crate::config::RelayConfig;
use crate::gateway::relay::{InboundMessage, Relay};
use crate::gateway::server::{serve, RelayState};
use crate::gateway::uploads::Attachment;
use crate::protocol::client::ReplyPayload;
use async_trait::async_trait;
use futures_util::StreamExt;
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

/// Small limit so oversize tests stay fast
pub const TEST_MAX_UPLOAD_BYTES: u64 = 64 * 1024;

const WAIT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct SeenAttachment {
    pub original_name: String,
    pub mime_type: String,
    pub size_bytes: u64,
    pub existed_during_relay: bool,
}

impl From<&Attachment> for SeenAttachment {
    fn from(a: &Attachment) -> Self {
        Self {
            original_name: a.original_name.clone(),
            mime_type: a.mime_type.clone(),
            size_bytes: a.size_bytes,
            existed_during_relay: a.temp_path.exists(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SeenMessage {
    pub text: Option<String>,
    pub audio: Option<SeenAttachment>,
    pub image: Option<SeenAttachment>,
}

/// Relay that records what it was given and answers with a canned payload
#[derive(Clone)]
pub struct MockRelay {
    reply: Option<ReplyPayload>,
    delay: Duration,
    calls: Arc<Mutex<Vec<SeenMessage>>>,
    completed: Arc<AtomicUsize>,
}

impl MockRelay {
    pub fn replying(reply: ReplyPayload) -> Self {
        Self {
            reply: Some(reply),
            delay: Duration::ZERO,
            calls: Arc::new(Mutex::new(Vec::new())),
            completed: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn panicking() -> Self {
        Self {
            reply: None,
            ..Self::replying(ReplyPayload::fallback())
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> Vec<SeenMessage> {
        self.calls.lock().expect("calls lock").clone()
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Relay for MockRelay {
    async fn relay(&self, message: &InboundMessage) -> ReplyPayload {
        self.calls.lock().expect("calls lock").push(SeenMessage {
            text: message.text.clone(),
            audio: message.audio.as_ref().map(SeenAttachment::from),
            image: message.image.as_ref().map(SeenAttachment::from),
        });
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let reply = match &self.reply {
            Some(reply) => reply.clone(),
            None => panic!("mock relay asked to panic"),
        };
        self.completed.fetch_add(1, Ordering::SeqCst);
        reply
    }
}

/// A relay server bound to 127.0.0.1 on an ephemeral port
pub struct TestApp {
    pub addr: SocketAddr,
    pub state: Arc<RelayState>,
    shutdown_tx: Mutex<Option<oneshot::Sender<()>>>,
    server: Mutex<Option<JoinHandle<anyhow::Result<()>>>>,
    _dir: TempDir,
}

pub async fn spawn_app(relay: impl Relay + 'static) -> TestApp {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = RelayConfig {
        bind: "127.0.0.1".to_string(),
        port: 0,
        processor_url: "http://127.0.0.1:9/unused".to_string(),
        upload_dir: dir.path().join("uploads"),
        max_upload_bytes: TEST_MAX_UPLOAD_BYTES,
        static_dir: None,
        ..Default::default()
    };
    let state = RelayState::with_relay(config, Arc::new(relay))
        .await
        .expect("relay state");

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let server = tokio::spawn(serve(listener, state.clone(), async move {
        let _ = shutdown_rx.await;
    }));

    TestApp {
        addr,
        state,
        shutdown_tx: Mutex::new(Some(shutdown_tx)),
        server: Mutex::new(Some(server)),
        _dir: dir,
    }
}

impl TestApp {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn max_upload_bytes(&self) -> u64 {
        self.state.config.max_upload_bytes
    }

    pub async fn post_message(&self, form: reqwest::multipart::Form) -> reqwest::Response {
        reqwest::Client::new()
            .post(self.url("/api/message"))
            .multipart(form)
            .send()
            .await
            .expect("post /api/message")
    }

    /// Files currently in the upload directory
    pub fn upload_files(&self) -> usize {
        std::fs::read_dir(self.state.uploads.dir())
            .map(|entries| entries.count())
            .unwrap_or(0)
    }

    pub async fn wait_for_relays(&self) {
        self.wait_until(|| self.state.tasks.is_empty()).await;
    }

    pub async fn wait_until(&self, cond: impl Fn() -> bool) {
        let deadline = tokio::time::Instant::now() + WAIT;
        while !cond() {
            assert!(
                tokio::time::Instant::now() < deadline,
                "condition not met in time"
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Trigger graceful shutdown and wait for the server to finish cleanup
    pub async fn shutdown(&self) {
        let tx = self.shutdown_tx.lock().expect("shutdown lock").take();
        if let Some(tx) = tx {
            let _ = tx.send(());
        }
        let server = self.server.lock().expect("server lock").take();
        if let Some(server) = server {
            server.await.expect("server task").expect("serve");
        }
    }
}

/// WebSocket client that has already received its `connected` greeting
pub struct TestClient {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    pub connection_id: String,
}

impl TestClient {
    pub async fn connect(app: &TestApp) -> Self {
        let (mut ws, _) = connect_async(format!("ws://{}/ws", app.addr))
            .await
            .expect("websocket connect");
        let greeting = next_frame(&mut ws, WAIT).await.expect("greeting frame");
        assert_eq!(greeting["event"], "connected");
        let connection_id = greeting["data"]["connection_id"]
            .as_str()
            .expect("connection id")
            .to_string();
        Self { ws, connection_id }
    }

    /// Data of the next `ai_response` frame; panics if none arrives
    pub async fn next_reply(&mut self) -> Value {
        self.try_next_reply(WAIT)
            .await
            .expect("no ai_response received")
    }

    pub async fn try_next_reply(&mut self, wait: Duration) -> Option<Value> {
        loop {
            let frame = next_frame(&mut self.ws, wait).await?;
            if frame["event"] == "ai_response" {
                return Some(frame["data"].clone());
            }
        }
    }

    pub async fn close(mut self) {
        let _ = self.ws.close(None).await;
        while let Some(Ok(_)) = self.ws.next().await {}
    }
}

async fn next_frame(
    ws: &mut WebSocketStream<MaybeTlsStream<TcpStream>>,
    wait: Duration,
) -> Option<Value> {
    let deadline = tokio::time::Instant::now() + wait;
    loop {
        let msg = tokio::time::timeout_at(deadline, ws.next())
            .await
            .ok()??
            .ok()?;
        match msg {
            Message::Text(text) => return serde_json::from_str(&text).ok(),
            Message::Close(_) => return None,
            _ => continue,
        }
    }
}
