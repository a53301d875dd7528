//! Socket abstraction the connection manager is built on.
//!
//! A [`Connector`] turns a URL into a [`Connection`]: a [`Transport`] used for
//! outbound frames plus a channel of [`TransportEvent`]s. Dropping the event
//! receiver detaches every listener; implementations must stop emitting once
//! it is gone.

mod memory;
mod ws;

pub use memory::{MemoryConnector, MemoryPeer};
pub use ws::WsConnector;

use tokio::sync::mpsc;

use crate::error::TransportError;

/// Close code used when the socket vanished without a close frame.
pub const CLOSE_ABNORMAL: u16 = 1006;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Open,
    Message(String),
    Close { code: u16, reason: String },
    Error(String),
}

pub trait Transport: Send {
    fn send(&mut self, frame: &str) -> Result<(), TransportError>;

    /// Starts a graceful close. No further events are expected afterwards.
    fn close(&mut self);
}

pub struct Connection {
    pub transport: Box<dyn Transport>,
    pub events: mpsc::UnboundedReceiver<TransportEvent>,
}

pub trait Connector: Send + Sync + 'static {
    fn open(&self, url: &str) -> Result<Connection, TransportError>;
}

impl<F> Connector for F
where
    F: Fn(&str) -> Result<Connection, TransportError> + Send + Sync + 'static,
{
    fn open(&self, url: &str) -> Result<Connection, TransportError> {
        self(url)
    }
}
