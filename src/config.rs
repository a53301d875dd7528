use std::{env, time::Duration};

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use crate::options::{
    ConnectionOptions, DEFAULT_CONNECTION_TIMEOUT, DEFAULT_HEARTBEAT_INTERVAL,
    DEFAULT_HEARTBEAT_TIMEOUT, DEFAULT_MAX_RECONNECT_ATTEMPTS, DEFAULT_MESSAGE_QUEUE_SIZE,
    DEFAULT_RECONNECT_INTERVAL,
};
use crate::utils::millis;

type Lookup<'a> = &'a dyn Fn(&str) -> Option<String>;

fn get_env(get: Lookup<'_>, key: &str) -> Option<String> {
    get(key)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn get_env_bool(get: Lookup<'_>, key: &str, default: bool) -> bool {
    match get_env(get, key) {
        None => default,
        Some(v) => matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "y" | "on"),
    }
}

fn get_env_u64(get: Lookup<'_>, key: &str, default: u64) -> Result<u64> {
    match get_env(get, key) {
        None => Ok(default),
        Some(v) => Ok(v
            .parse::<u64>()
            .map_err(|e| anyhow!("{key} invalid int: {e}"))?),
    }
}

fn get_env_usize(get: Lookup<'_>, key: &str, default: usize) -> Result<usize> {
    match get_env(get, key) {
        None => Ok(default),
        Some(v) => Ok(v
            .parse::<usize>()
            .map_err(|e| anyhow!("{key} invalid int: {e}"))?),
    }
}

fn get_env_string(get: Lookup<'_>, key: &str, default: &str) -> String {
    get_env(get, key).unwrap_or_else(|| default.to_string())
}

fn get_env_list(get: Lookup<'_>, key: &str) -> Vec<String> {
    get_env(get, key)
        .map(|v| {
            v.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    // Realtime connection
    pub realtime_url: String,
    pub auto_reconnect: bool,
    pub reconnect_interval_ms: u64,
    pub max_reconnect_attempts: u32,
    pub connection_timeout_ms: u64,
    pub heartbeat_interval_ms: u64,
    pub heartbeat_timeout_ms: u64,
    pub message_queue_size: usize,
    pub realtime_debug: bool,
    pub reconnect_resets_attempts: bool,

    // Tasks to follow on startup
    pub task_ids: Vec<String>,

    // Journal / dashboard
    pub sqlite_path: String,
    pub dashboard_enabled: bool,
    pub dashboard_host: String,
    pub dashboard_port: u16,
}

impl Settings {
    pub fn load() -> Result<Self> {
        Self::from_lookup(&|key| env::var(key).ok())
    }

    pub fn from_lookup(get: Lookup<'_>) -> Result<Self> {
        let max_reconnect_attempts = get_env_u64(
            get,
            "MAX_RECONNECT_ATTEMPTS",
            u64::from(DEFAULT_MAX_RECONNECT_ATTEMPTS),
        )?;
        let dashboard_port = get_env_u64(get, "DASHBOARD_PORT", 8080)?;

        let s = Self {
            realtime_url: get_env_string(get, "REALTIME_URL", "ws://127.0.0.1:8000/ws/progress"),
            auto_reconnect: get_env_bool(get, "AUTO_RECONNECT", true),
            reconnect_interval_ms: get_env_u64(
                get,
                "RECONNECT_INTERVAL_MS",
                millis(DEFAULT_RECONNECT_INTERVAL),
            )?,
            max_reconnect_attempts: u32::try_from(max_reconnect_attempts)
                .map_err(|_| anyhow!("MAX_RECONNECT_ATTEMPTS out of range (got {max_reconnect_attempts})"))?,
            connection_timeout_ms: get_env_u64(
                get,
                "CONNECTION_TIMEOUT_MS",
                millis(DEFAULT_CONNECTION_TIMEOUT),
            )?,
            heartbeat_interval_ms: get_env_u64(
                get,
                "HEARTBEAT_INTERVAL_MS",
                millis(DEFAULT_HEARTBEAT_INTERVAL),
            )?,
            heartbeat_timeout_ms: get_env_u64(
                get,
                "HEARTBEAT_TIMEOUT_MS",
                millis(DEFAULT_HEARTBEAT_TIMEOUT),
            )?,
            message_queue_size: get_env_usize(get, "MESSAGE_QUEUE_SIZE", DEFAULT_MESSAGE_QUEUE_SIZE)?,
            realtime_debug: get_env_bool(get, "REALTIME_DEBUG", false),
            reconnect_resets_attempts: get_env_bool(get, "RECONNECT_RESETS_ATTEMPTS", true),
            task_ids: get_env_list(get, "TASK_IDS"),
            sqlite_path: get_env_string(get, "SQLITE_PATH", "./data/taskwire.sqlite"),
            dashboard_enabled: get_env_bool(get, "DASHBOARD_ENABLED", true),
            dashboard_host: get_env_string(get, "DASHBOARD_HOST", "127.0.0.1"),
            dashboard_port: u16::try_from(dashboard_port)
                .map_err(|_| anyhow!("DASHBOARD_PORT out of range (got {dashboard_port})"))?,
        };

        s.validate()?;
        Ok(s)
    }

    pub fn validate(&self) -> Result<()> {
        let url = self.realtime_url.trim();
        if !(url.starts_with("ws://") || url.starts_with("wss://")) {
            return Err(anyhow!(
                "REALTIME_URL must start with ws:// or wss:// (got {})",
                self.realtime_url
            ));
        }
        if self.reconnect_interval_ms < 1 {
            return Err(anyhow!(
                "RECONNECT_INTERVAL_MS must be >= 1 (got {})",
                self.reconnect_interval_ms
            ));
        }
        if self.connection_timeout_ms < 1 {
            return Err(anyhow!(
                "CONNECTION_TIMEOUT_MS must be >= 1 (got {})",
                self.connection_timeout_ms
            ));
        }
        if self.heartbeat_interval_ms < 1 || self.heartbeat_timeout_ms < 1 {
            return Err(anyhow!(
                "HEARTBEAT_INTERVAL_MS and HEARTBEAT_TIMEOUT_MS must be >= 1 (got {} / {})",
                self.heartbeat_interval_ms,
                self.heartbeat_timeout_ms
            ));
        }
        if self.dashboard_enabled && self.dashboard_port == 0 {
            return Err(anyhow!("DASHBOARD_PORT must be > 0 when the dashboard is enabled"));
        }
        Ok(())
    }

    pub fn connection_options(&self) -> ConnectionOptions {
        let mut opts = ConnectionOptions::new(self.realtime_url.trim());
        opts.auto_reconnect = self.auto_reconnect;
        opts.reconnect_interval = Duration::from_millis(self.reconnect_interval_ms);
        opts.max_reconnect_attempts = self.max_reconnect_attempts;
        opts.connection_timeout = Duration::from_millis(self.connection_timeout_ms);
        opts.heartbeat_interval = Duration::from_millis(self.heartbeat_interval_ms);
        opts.heartbeat_timeout = Duration::from_millis(self.heartbeat_timeout_ms);
        opts.message_queue_size = self.message_queue_size;
        opts.debug = self.realtime_debug;
        opts.reset_attempts_on_reconnect = self.reconnect_resets_attempts;
        opts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings_from(pairs: &[(&str, &str)]) -> Result<Settings> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Settings::from_lookup(&|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_match_connection_options() {
        let s = settings_from(&[]).unwrap();
        let opts = s.connection_options();
        assert!(opts.validate().is_ok());
        assert_eq!(opts.reconnect_interval, DEFAULT_RECONNECT_INTERVAL);
        assert_eq!(opts.heartbeat_timeout, DEFAULT_HEARTBEAT_TIMEOUT);
        assert_eq!(opts.max_reconnect_attempts, DEFAULT_MAX_RECONNECT_ATTEMPTS);
        assert!(s.task_ids.is_empty());
    }

    #[test]
    fn overrides_are_applied() {
        let s = settings_from(&[
            ("REALTIME_URL", " wss://skills.example/ws "),
            ("AUTO_RECONNECT", "off"),
            ("RECONNECT_INTERVAL_MS", "250"),
            ("MESSAGE_QUEUE_SIZE", "7"),
            ("REALTIME_DEBUG", "yes"),
            ("TASK_IDS", "a, b,,c"),
        ])
        .unwrap();
        assert_eq!(s.task_ids, vec!["a", "b", "c"]);

        let opts = s.connection_options();
        assert_eq!(opts.url, "wss://skills.example/ws");
        assert!(!opts.auto_reconnect);
        assert!(opts.debug);
        assert_eq!(opts.reconnect_interval, Duration::from_millis(250));
        assert_eq!(opts.message_queue_size, 7);
    }

    #[test]
    fn rejects_bad_values() {
        assert!(settings_from(&[("REALTIME_URL", "http://nope")]).is_err());
        assert!(settings_from(&[("RECONNECT_INTERVAL_MS", "0")]).is_err());
        assert!(settings_from(&[("HEARTBEAT_TIMEOUT_MS", "abc")]).is_err());
        assert!(settings_from(&[("DASHBOARD_PORT", "70000")]).is_err());
        assert!(settings_from(&[("MAX_RECONNECT_ATTEMPTS", "99999999999")]).is_err());
    }
}
