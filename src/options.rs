use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ManagerError, Result};

pub const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_secs(3);
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;
pub const DEFAULT_CONNECTION_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_MESSAGE_QUEUE_SIZE: usize = 100;

/// Construction options for a [`crate::ConnectionManager`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionOptions {
    pub url: String,
    pub auto_reconnect: bool,
    /// Fixed delay between automatic attempts (no exponential growth).
    pub reconnect_interval: Duration,
    pub max_reconnect_attempts: u32,
    pub connection_timeout: Duration,
    /// Inactivity window after which a ping is sent.
    pub heartbeat_interval: Duration,
    /// How long to wait for the pong before declaring the link stalled.
    pub heartbeat_timeout: Duration,
    pub message_queue_size: usize,
    /// Log per-frame traces at info instead of debug.
    pub debug: bool,
    /// Whether a forced `reconnect()` restarts the attempt budget from zero.
    pub reset_attempts_on_reconnect: bool,
}

impl ConnectionOptions {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            auto_reconnect: true,
            reconnect_interval: DEFAULT_RECONNECT_INTERVAL,
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            connection_timeout: DEFAULT_CONNECTION_TIMEOUT,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            heartbeat_timeout: DEFAULT_HEARTBEAT_TIMEOUT,
            message_queue_size: DEFAULT_MESSAGE_QUEUE_SIZE,
            debug: false,
            reset_attempts_on_reconnect: true,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.url.trim().is_empty() {
            return Err(ManagerError::InvalidOptions("url is empty".into()));
        }
        if self.reconnect_interval.is_zero() {
            return Err(ManagerError::InvalidOptions(
                "reconnect_interval must be > 0".into(),
            ));
        }
        if self.connection_timeout.is_zero() {
            return Err(ManagerError::InvalidOptions(
                "connection_timeout must be > 0".into(),
            ));
        }
        if self.heartbeat_interval.is_zero() || self.heartbeat_timeout.is_zero() {
            return Err(ManagerError::InvalidOptions(format!(
                "heartbeat_interval and heartbeat_timeout must be > 0 (got {:?} / {:?})",
                self.heartbeat_interval, self.heartbeat_timeout
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let opts = ConnectionOptions::new("ws://localhost:9000/ws");
        assert!(opts.validate().is_ok());
        assert!(opts.auto_reconnect);
        assert_eq!(opts.max_reconnect_attempts, 5);
        assert_eq!(opts.message_queue_size, 100);
    }

    #[test]
    fn rejects_blank_url_and_zero_timers() {
        assert!(ConnectionOptions::new("  ").validate().is_err());

        let mut opts = ConnectionOptions::new("ws://x");
        opts.reconnect_interval = Duration::ZERO;
        assert!(matches!(opts.validate(), Err(ManagerError::InvalidOptions(_))));

        let mut opts = ConnectionOptions::new("ws://x");
        opts.heartbeat_timeout = Duration::ZERO;
        assert!(opts.validate().is_err());
    }

    #[test]
    fn zero_queue_and_zero_attempts_are_allowed() {
        let mut opts = ConnectionOptions::new("ws://x");
        opts.message_queue_size = 0;
        opts.max_reconnect_attempts = 0;
        assert!(opts.validate().is_ok());
    }
}
