//! Configuration handling for the comm node.
//!
//! This module reads configuration from the shared config file and
//! environment variables, providing a unified configuration interface.

use anyhow::Result;
use comm_transport::SessionConfig;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

/// Comm node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CommConfig {
    /// Node name used in logs
    pub node_id: String,
    /// Listen address for inbound sessions
    pub listen_addr: SocketAddr,
    /// Clients idle longer than this are evicted (milliseconds)
    pub idle_timeout_ms: u64,
    /// Interval between idle sweeps (milliseconds)
    pub sweep_interval_ms: u64,
    /// Outbound connect timeout (milliseconds)
    pub connect_timeout_ms: u64,
    /// Session settings
    pub session: SessionConfig,
}

impl Default for CommConfig {
    fn default() -> Self {
        Self {
            node_id: "comm-node".to_string(),
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 47100)),
            idle_timeout_ms: 30_000,
            sweep_interval_ms: 1_000,
            connect_timeout_ms: 5_000,
            session: SessionConfig::default(),
        }
    }
}

/// Root configuration structure (matches the YAML structure)
#[derive(Debug, Deserialize)]
struct RootConfig {
    services: Option<ServicesConfig>,
}

#[derive(Debug, Deserialize)]
struct ServicesConfig {
    comm: Option<CommConfig>,
}

impl CommConfig {
    /// Load configuration from file and environment variables
    pub fn load_from_file<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        let mut config = Self::default();

        match std::fs::read_to_string(&config_path) {
            Ok(content) => match serde_yaml::from_str::<RootConfig>(&content) {
                Ok(root) => {
                    if let Some(comm) = root.services.and_then(|s| s.comm) {
                        config = comm;
                    }
                    info!("Loaded configuration from {:?}", config_path.as_ref());
                }
                Err(e) => {
                    warn!("Failed to parse config file {:?} ({}), using defaults", config_path.as_ref(), e);
                }
            },
            Err(_) => {
                warn!("Config file {:?} not found, using defaults", config_path.as_ref());
            }
        }

        config.apply_environment_overrides();

        info!(
            "Final comm configuration: node_id={}, listen={}, idle_timeout={:?}, max_frame_size={}",
            config.node_id,
            config.listen_addr,
            config.idle_timeout(),
            config.session.max_frame_size
        );

        Ok(config)
    }

    /// Idle eviction threshold
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    /// Idle sweep interval
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    /// Outbound connect timeout
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Apply environment variable overrides
    fn apply_environment_overrides(&mut self) {
        if let Ok(node_id) = std::env::var("COMM_NODE_ID") {
            self.node_id = node_id;
            info!("Node ID overridden by environment: {}", self.node_id);
        }

        if let Ok(listen) = std::env::var("COMM_LISTEN_ADDR") {
            match listen.parse::<SocketAddr>() {
                Ok(addr) => {
                    self.listen_addr = addr;
                    info!("Listen address overridden by environment: {}", addr);
                }
                Err(e) => warn!("Ignoring invalid COMM_LISTEN_ADDR {:?}: {}", listen, e),
            }
        }

        if let Ok(timeout) = std::env::var("COMM_IDLE_TIMEOUT_MS") {
            if let Ok(ms) = timeout.parse::<u64>() {
                self.idle_timeout_ms = ms;
                info!("Idle timeout overridden by environment: {}ms", ms);
            }
        }

        if let Ok(size) = std::env::var("COMM_MAX_FRAME_SIZE") {
            if let Ok(bytes) = size.parse::<usize>() {
                self.session.max_frame_size = bytes;
                info!("Max frame size overridden by environment: {}", bytes);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = CommConfig::default();
        assert_eq!(config.node_id, "comm-node");
        assert_eq!(config.listen_addr.port(), 47100);
        assert_eq!(config.idle_timeout(), Duration::from_secs(30));
        assert_eq!(config.session.max_frame_size, comm_transport::DEFAULT_MAX_FRAME_SIZE);
    }

    #[test]
    fn test_load_from_file() {
        let yaml_content = r#"
services:
  comm:
    node_id: "node-a"
    listen_addr: "127.0.0.1:47200"
    idle_timeout_ms: 2500
    session:
      max_frame_size: 4096
      tcp_nodelay: false
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(yaml_content.as_bytes()).unwrap();

        let config = CommConfig::load_from_file(temp_file.path()).unwrap();

        assert_eq!(config.listen_addr.port(), 47200);
        assert_eq!(config.idle_timeout(), Duration::from_millis(2500));
        assert_eq!(config.sweep_interval(), Duration::from_secs(1));
        assert_eq!(config.session.max_frame_size, 4096);
        assert!(!config.session.tcp_nodelay);
        assert_eq!(config.session.read_buffer_size, 64 * 1024);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = CommConfig::load_from_file("/nonexistent/comm.yaml").unwrap();
        assert_eq!(config.connect_timeout(), Duration::from_secs(5));
    }
}
