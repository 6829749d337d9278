//! Client manager - tracks live WebSocket connections.

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Information about a connected client
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub id: String,
    pub opened_at: DateTime<Utc>,
}

/// Message to send to a client
#[derive(Debug, Clone)]
pub struct ClientMessage {
    pub json: String,
}

/// Handle for sending messages to a client
pub type ClientSender = mpsc::UnboundedSender<ClientMessage>;

/// A push to one connection could not be queued.
#[derive(Debug, thiserror::Error)]
pub enum PushError {
    #[error("connection {0} is not registered")]
    UnknownConnection(String),
    #[error("connection {0} is closed")]
    Closed(String),
}

/// Metadata and sender live in one entry so no reader sees half a registration.
struct Slot {
    info: ConnectionInfo,
    sender: ClientSender,
}

/// Registry of live connections, shared by the WebSocket handler (writer)
/// and the broadcaster (reader).
pub struct ClientManager {
    clients: DashMap<String, Slot>,
}

impl ClientManager {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register a new connection and return its id
    pub fn register(&self, sender: ClientSender) -> String {
        self.register_with(sender, |_| None)
    }

    /// Register a new connection, queueing `greeting(id)` on its sender
    /// before any broadcast can see the entry.
    pub fn register_with(
        &self,
        sender: ClientSender,
        greeting: impl FnOnce(&str) -> Option<String>,
    ) -> String {
        loop {
            let id = uuid::Uuid::new_v4().to_string();
            if let Entry::Vacant(vacant) = self.clients.entry(id.clone()) {
                if let Some(json) = greeting(&id) {
                    let _ = sender.send(ClientMessage { json });
                }
                vacant.insert(Slot {
                    info: ConnectionInfo {
                        id: id.clone(),
                        opened_at: Utc::now(),
                    },
                    sender,
                });
                return id;
            }
        }
    }

    /// Unregister a connection. Returns false if it was already gone.
    pub fn unregister(&self, id: &str) -> bool {
        self.clients.remove(id).is_some()
    }

    /// Ids of every connection live at the moment of the call
    pub fn snapshot(&self) -> Vec<String> {
        self.clients.iter().map(|r| r.key().clone()).collect()
    }

    /// Queue a frame for one connection
    pub fn send_to(&self, id: &str, json: &str) -> Result<(), PushError> {
        let entry = self
            .clients
            .get(id)
            .ok_or_else(|| PushError::UnknownConnection(id.to_string()))?;
        entry
            .sender
            .send(ClientMessage {
                json: json.to_string(),
            })
            .map_err(|_| PushError::Closed(id.to_string()))
    }

    pub fn get(&self, id: &str) -> Option<ConnectionInfo> {
        self.clients.get(id).map(|r| r.info.clone())
    }

    /// Get count of connected clients
    pub fn count(&self) -> usize {
        self.clients.len()
    }

    /// Drop every entry. Only used once the server has stopped.
    pub fn clear(&self) {
        self.clients.clear();
    }
}

impl Default for ClientManager {
    fn default() -> Self {
        Self {
            clients: DashMap::new(),
        }
    }
}

/// Unregisters its connection when dropped, covering task cancellation
/// as well as normal and abnormal socket closes.
pub struct Registration {
    clients: Arc<ClientManager>,
    id: String,
}

impl Registration {
    pub fn new(clients: Arc<ClientManager>, sender: ClientSender) -> Self {
        Self::with_greeting(clients, sender, |_| None)
    }

    /// See [`ClientManager::register_with`]
    pub fn with_greeting(
        clients: Arc<ClientManager>,
        sender: ClientSender,
        greeting: impl FnOnce(&str) -> Option<String>,
    ) -> Self {
        let id = clients.register_with(sender, greeting);
        Self { clients, id }
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.clients.unregister(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_register_and_unregister() {
        let mgr = ClientManager::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let id = mgr.register(tx);

        assert_eq!(mgr.count(), 1);
        assert!(mgr.get(&id).is_some());
        assert!(mgr.unregister(&id));
        assert!(!mgr.unregister(&id));
        assert_eq!(mgr.count(), 0);
    }

    #[test]
    fn test_ids_are_unique() {
        let mgr = ClientManager::new();
        let mut receivers = Vec::new();
        let mut ids = HashSet::new();
        for _ in 0..200 {
            let (tx, rx) = mpsc::unbounded_channel();
            receivers.push(rx);
            ids.insert(mgr.register(tx));
        }
        assert_eq!(ids.len(), 200);
        assert_eq!(mgr.snapshot().len(), 200);
    }

    #[test]
    fn test_send_to() {
        let mgr = ClientManager::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = mgr.register(tx);

        mgr.send_to(&id, "{\"a\":1}").unwrap();
        assert_eq!(rx.try_recv().unwrap().json, "{\"a\":1}");

        drop(rx);
        assert!(matches!(mgr.send_to(&id, "x"), Err(PushError::Closed(_))));
        assert!(matches!(
            mgr.send_to("missing", "x"),
            Err(PushError::UnknownConnection(_))
        ));
    }

    #[test]
    fn test_registration_guard_unregisters_on_drop() {
        let mgr = ClientManager::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let guard = Registration::new(mgr.clone(), tx);
        let id = guard.id().to_string();
        assert!(mgr.get(&id).is_some());

        drop(guard);
        assert!(mgr.get(&id).is_none());
        assert_eq!(mgr.count(), 0);
    }

    #[test]
    fn test_greeting_is_queued_first() {
        let mgr = ClientManager::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = mgr.register_with(tx, |id| Some(format!("hello {id}")));

        mgr.send_to(&id, "reply").unwrap();
        assert_eq!(rx.try_recv().unwrap().json, format!("hello {id}"));
        assert_eq!(rx.try_recv().unwrap().json, "reply");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_greeting_precedes_concurrent_broadcasts() {
        let mgr = ClientManager::new();
        let stop = Arc::new(std::sync::atomic::AtomicBool::new(false));

        let pusher = {
            let mgr = mgr.clone();
            let stop = stop.clone();
            tokio::spawn(async move {
                while !stop.load(std::sync::atomic::Ordering::Relaxed) {
                    for id in mgr.snapshot() {
                        let _ = mgr.send_to(&id, "reply");
                    }
                    tokio::task::yield_now().await;
                }
            })
        };

        let mut receivers = Vec::new();
        for _ in 0..200 {
            let (tx, rx) = mpsc::unbounded_channel();
            let guard = Registration::with_greeting(mgr.clone(), tx, |_| Some("hello".into()));
            receivers.push((guard, rx));
            tokio::task::yield_now().await;
        }
        stop.store(true, std::sync::atomic::Ordering::Relaxed);
        pusher.await.unwrap();

        for (_guard, mut rx) in receivers {
            assert_eq!(rx.try_recv().unwrap().json, "hello");
        }
    }

    #[tokio::test]
    async fn test_concurrent_register_unregister() {
        let mgr = ClientManager::new();
        let mut handles = Vec::new();
        for _ in 0..16 {
            let mgr = mgr.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..50 {
                    let (tx, _rx) = mpsc::unbounded_channel();
                    let id = mgr.register(tx);
                    let _ = mgr.snapshot();
                    assert!(mgr.unregister(&id));
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(mgr.count(), 0);
    }
}
