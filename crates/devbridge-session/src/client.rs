//! Browser-facing duplex endpoint, independent of the hosting transport.

use crossbeam_channel::{Receiver, Sender};
use serde_json::Value;
use tracing::debug;

/// Session side of a browser connection.
///
/// `inbound` disconnects when the browser goes away; dropping every clone of
/// `outbound` tells the hosting layer the session is over.
#[derive(Debug, Clone)]
pub struct ClientLink {
    inbound: Receiver<String>,
    outbound: Sender<String>,
}

/// Hosting-layer side of a browser connection (WebSocket pump, tests).
#[derive(Debug)]
pub struct ClientEnd {
    pub to_session: Sender<String>,
    pub from_session: Receiver<String>,
}

impl ClientLink {
    #[must_use]
    pub fn new(inbound: Receiver<String>, outbound: Sender<String>) -> Self {
        Self { inbound, outbound }
    }

    /// Creates a connected link/end pair over unbounded channels.
    #[must_use]
    pub fn pair() -> (ClientLink, ClientEnd) {
        let (to_session, inbound) = crossbeam_channel::unbounded();
        let (outbound, from_session) = crossbeam_channel::unbounded();
        (
            ClientLink { inbound, outbound },
            ClientEnd {
                to_session,
                from_session,
            },
        )
    }

    #[must_use]
    pub fn inbound(&self) -> &Receiver<String> {
        &self.inbound
    }

    /// Sends a raw message; false once the browser is gone.
    pub fn send_text(&self, text: String) -> bool {
        self.outbound.send(text).is_ok()
    }

    pub fn send_json(&self, value: &Value) -> bool {
        let delivered = self.send_text(value.to_string());
        if !delivered {
            debug!("browser gone, dropping message");
        }
        delivered
    }
}

impl ClientEnd {
    /// Sends a JSON message towards the session.
    pub fn send_json(&self, value: &Value) -> bool {
        self.to_session.send(value.to_string()).is_ok()
    }
}
