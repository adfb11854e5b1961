//! # Server Configuration
//!
//! Ports and TLS material for the health/metrics listener and the admission webhooks.

use super::env_var_or_default;
use std::path::PathBuf;

/// Listener settings for both HTTP servers
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP server port for metrics and health checks
    pub metrics_port: u16,
    /// HTTPS port for the admission webhooks
    pub webhook_port: u16,
    /// PEM serving certificate for the admission webhooks
    pub webhook_cert_path: PathBuf,
    /// PEM private key for the admission webhooks
    pub webhook_key_path: PathBuf,
    /// Server startup timeout (seconds)
    /// How long to wait for server to be ready before giving up
    pub startup_timeout_secs: u64,
    /// Server readiness poll interval (milliseconds)
    /// How often to check if server is ready during startup
    pub poll_interval_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        use crate::constants::*;
        Self {
            metrics_port: DEFAULT_METRICS_PORT,
            webhook_port: DEFAULT_WEBHOOK_PORT,
            webhook_cert_path: PathBuf::from(DEFAULT_WEBHOOK_CERT_PATH),
            webhook_key_path: PathBuf::from(DEFAULT_WEBHOOK_KEY_PATH),
            startup_timeout_secs: DEFAULT_SERVER_STARTUP_TIMEOUT_SECS,
            poll_interval_ms: DEFAULT_SERVER_POLL_INTERVAL_MS,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults
    pub fn from_env() -> Self {
        use crate::constants::*;
        Self {
            metrics_port: env_var_or_default("METRICS_PORT", DEFAULT_METRICS_PORT),
            webhook_port: env_var_or_default("WEBHOOK_PORT", DEFAULT_WEBHOOK_PORT),
            webhook_cert_path: env_var_or_default(
                "WEBHOOK_CERT_PATH",
                PathBuf::from(DEFAULT_WEBHOOK_CERT_PATH),
            ),
            webhook_key_path: env_var_or_default(
                "WEBHOOK_KEY_PATH",
                PathBuf::from(DEFAULT_WEBHOOK_KEY_PATH),
            ),
            startup_timeout_secs: env_var_or_default(
                "SERVER_STARTUP_TIMEOUT_SECS",
                DEFAULT_SERVER_STARTUP_TIMEOUT_SECS,
            ),
            poll_interval_ms: env_var_or_default(
                "SERVER_POLL_INTERVAL_MS",
                DEFAULT_SERVER_POLL_INTERVAL_MS,
            ),
        }
    }
}
