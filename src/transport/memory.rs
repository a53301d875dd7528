use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

use super::{Connection, Connector, Transport, TransportEvent};
use crate::error::TransportError;

/// In-process connector: every `open` hands a [`MemoryPeer`] to whoever holds
/// the peer receiver, and that peer plays the server side.
#[derive(Clone)]
pub struct MemoryConnector {
    peers: mpsc::UnboundedSender<MemoryPeer>,
    fail_next: Arc<AtomicUsize>,
    opened: Arc<AtomicUsize>,
}

impl MemoryConnector {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<MemoryPeer>) {
        let (peers, rx) = mpsc::unbounded_channel();
        let connector = Self {
            peers,
            fail_next: Arc::new(AtomicUsize::new(0)),
            opened: Arc::new(AtomicUsize::new(0)),
        };
        (connector, rx)
    }

    /// Makes the next `n` calls to `open` fail as if the socket could not be built.
    pub fn fail_next(&self, n: usize) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    /// Number of transports successfully created so far.
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

impl Connector for MemoryConnector {
    fn open(&self, url: &str) -> Result<Connection, TransportError> {
        let failing = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(TransportError::Refused(format!("memory transport refused {url}")));
        }

        let (event_tx, events) = mpsc::unbounded_channel();
        let (sent_tx, sent_rx) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));

        let peer = MemoryPeer {
            url: url.to_string(),
            events: event_tx,
            sent: sent_rx,
            closed: closed.clone(),
        };
        self.opened.fetch_add(1, Ordering::SeqCst);
        let _ = self.peers.send(peer);

        Ok(Connection {
            transport: Box::new(MemoryTransport { sent: sent_tx, closed }),
            events,
        })
    }
}

struct MemoryTransport {
    sent: mpsc::UnboundedSender<String>,
    closed: Arc<AtomicBool>,
}

impl Transport for MemoryTransport {
    fn send(&mut self, frame: &str) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        self.sent
            .send(frame.to_string())
            .map_err(|_| TransportError::Closed)
    }

    fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Server side of one in-memory connection.
pub struct MemoryPeer {
    url: String,
    events: mpsc::UnboundedSender<TransportEvent>,
    sent: mpsc::UnboundedReceiver<String>,
    closed: Arc<AtomicBool>,
}

impl MemoryPeer {
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Emits an event towards the client. Returns `false` once the client
    /// stopped listening.
    pub fn emit(&self, event: TransportEvent) -> bool {
        self.events.send(event).is_ok()
    }

    pub fn open(&self) -> bool {
        self.emit(TransportEvent::Open)
    }

    pub fn message(&self, text: impl Into<String>) -> bool {
        self.emit(TransportEvent::Message(text.into()))
    }

    pub fn close(&self, code: u16) -> bool {
        self.emit(TransportEvent::Close {
            code,
            reason: String::new(),
        })
    }

    pub fn error(&self, reason: impl Into<String>) -> bool {
        self.emit(TransportEvent::Error(reason.into()))
    }

    /// Waits for the next frame the client sent.
    pub async fn next_sent(&mut self) -> Option<String> {
        self.sent.recv().await
    }

    /// Frames sent by the client that have not been read yet.
    pub fn drain_sent(&mut self) -> Vec<String> {
        std::iter::from_fn(|| self.sent.try_recv().ok()).collect()
    }

    pub fn is_closed_by_client(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Whether the client dropped its event listeners for this connection.
    pub fn is_detached(&self) -> bool {
        self.events.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn open_hands_peer_to_server_side() {
        let (connector, mut peers) = MemoryConnector::new();
        let mut conn = connector.open("ws://test").unwrap();
        let mut peer = peers.recv().await.unwrap();
        assert_eq!(peer.url(), "ws://test");
        assert_eq!(connector.opened(), 1);

        assert!(peer.open());
        assert_eq!(conn.events.recv().await, Some(TransportEvent::Open));

        conn.transport.send("hello").unwrap();
        assert_eq!(peer.next_sent().await.as_deref(), Some("hello"));

        conn.transport.close();
        assert!(peer.is_closed_by_client());
        assert_eq!(conn.transport.send("late"), Err(TransportError::Closed));
        assert!(peer.drain_sent().is_empty());
    }

    #[tokio::test]
    async fn fail_next_refuses_then_recovers() {
        let (connector, _peers) = MemoryConnector::new();
        connector.fail_next(1);
        assert!(matches!(
            connector.open("ws://test"),
            Err(TransportError::Refused(_))
        ));
        assert!(connector.open("ws://test").is_ok());
        assert_eq!(connector.opened(), 1);
    }

    #[tokio::test]
    async fn dropping_events_detaches_peer() {
        let (connector, mut peers) = MemoryConnector::new();
        let conn = connector.open("ws://test").unwrap();
        let peer = peers.recv().await.unwrap();
        drop(conn);
        assert!(peer.is_detached());
        assert!(!peer.message("{}"));
    }
}
