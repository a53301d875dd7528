use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Error,
    Timeout,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Error => "error",
            Self::Timeout => "timeout",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConnectionMetrics {
    pub message_count: u64,
    pub error_count: u64,
    pub reconnect_count: u64,
    /// Outbound messages discarded because the pending queue was full.
    pub dropped_count: u64,
    /// Unix millis of the last successful open.
    pub connect_time: Option<i64>,
    /// Unix millis of the last inbound data frame.
    pub last_message_time: Option<i64>,
}

/// Everything a consumer can observe about a manager, published on every change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Snapshot {
    pub state: ConnectionState,
    pub metrics: ConnectionMetrics,
    pub current_task_id: Option<String>,
    pub connection_id: Option<String>,
    pub queued: usize,
    pub active_timers: usize,
}

impl Default for Snapshot {
    fn default() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            metrics: ConnectionMetrics::default(),
            current_task_id: None,
            connection_id: None,
            queued: 0,
            active_timers: 0,
        }
    }
}
