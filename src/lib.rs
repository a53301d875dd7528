//! Realtime task-progress connection manager.
//!
//! [`ConnectionManager`] keeps one WebSocket-style connection alive with a
//! heartbeat, bounded fixed-interval reconnection and a send queue, and fans
//! inbound progress/log/status/error messages out to subscribers keyed by task.

pub mod config;
pub mod dashboard;
pub mod error;
pub mod manager;
pub mod options;
pub mod protocol;
pub mod queue;
pub mod state;
pub mod store;
pub mod subscribers;
pub mod timers;
pub mod transport;
pub mod utils;

pub use error::{ManagerError, TransportError};
pub use manager::{ConnectionManager, SendOutcome, Subscription};
pub use options::ConnectionOptions;
pub use protocol::{MessageKind, RealtimeData};
pub use state::{ConnectionMetrics, ConnectionState, Snapshot};
