//! Fan-out of replies to every live connection.

use crate::gateway::client_mgr::ClientManager;
use crate::protocol::client::{ClientEvent, ReplyPayload};
use std::sync::Arc;
use tracing::{debug, warn};

/// Outcome of one broadcast
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub failed: usize,
}

/// Pushes `ai_response` frames to the registry snapshot taken at call time.
#[derive(Clone)]
pub struct Broadcaster {
    clients: Arc<ClientManager>,
}

impl Broadcaster {
    pub fn new(clients: Arc<ClientManager>) -> Self {
        Self { clients }
    }

    /// Connections that join after the snapshot miss this payload; a failed
    /// push to one connection never stops delivery to the rest.
    pub fn broadcast(&self, payload: &ReplyPayload) -> BroadcastReport {
        let json = match ClientEvent::ai_response(payload).and_then(|e| serde_json::to_string(&e))
        {
            Ok(j) => j,
            Err(e) => {
                warn!(error = %e, "failed to serialize reply payload");
                return BroadcastReport::default();
            }
        };

        let mut report = BroadcastReport::default();
        for id in self.clients.snapshot() {
            match self.clients.send_to(&id, &json) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    warn!(conn_id = %id, error = %e, "failed to push reply");
                    report.failed += 1;
                }
            }
        }

        debug!(
            delivered = report.delivered,
            failed = report.failed,
            error = payload.error,
            "broadcast reply"
        );
        report
    }
}
