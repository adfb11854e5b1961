//! # Constants
//!
//! Default values for controller and server configuration.

/// Field manager name used for status and annotation writes
pub const FIELD_MANAGER: &str = "certificate-controller";

/// Periodic re-arm interval; renewal-by-time is evaluated at least this often
pub const DEFAULT_RECONCILE_INTERVAL_SECS: u64 = 300;

/// Upper bound of the jitter subtracted from the periodic re-arm interval
pub const DEFAULT_REQUEUE_JITTER_SECS: u64 = 30;

/// Attempts for re-fetch-and-retry writes that hit an optimistic concurrency conflict
pub const DEFAULT_STATUS_UPDATE_MAX_ATTEMPTS: u32 = 3;

/// Fibonacci backoff bounds for failed reconciliations (minutes)
pub const DEFAULT_BACKOFF_MIN_MINUTES: u64 = 1;
pub const DEFAULT_BACKOFF_MAX_MINUTES: u64 = 5;

/// RSA modulus size for issued keys
pub const DEFAULT_RSA_KEY_BITS: u32 = 2048;

/// Minimum key strength accepted from configuration
pub const MIN_RSA_KEY_BITS: u32 = 2048;

/// Default `renewBefore` applied by the defaulting stage
pub const DEFAULT_RENEW_BEFORE: &str = "5m";

/// Smallest accepted `renewBefore`
pub const MIN_RENEW_BEFORE_SECS: u64 = 5 * 60;

/// Latest year an X.509 validity time can encode
pub const MAX_NOT_AFTER_YEAR: i32 = 9999;

/// Serial number used when the random source fails during defaulting
pub const FALLBACK_SERIAL_NUMBER: &str = "123456789123456789123456789";

/// Bit length of randomly generated serial numbers
pub const SERIAL_NUMBER_BITS: i32 = 128;

/// Secret data keys
pub const TLS_CERT_KEY: &str = "tls.crt";
pub const TLS_PRIVATE_KEY_KEY: &str = "tls.key";

/// Secret type for issued credentials
pub const TLS_SECRET_TYPE: &str = "kubernetes.io/tls";

/// HTTP server defaults
pub const DEFAULT_METRICS_PORT: u16 = 8080;
pub const DEFAULT_WEBHOOK_PORT: u16 = 9443;
pub const DEFAULT_WEBHOOK_CERT_PATH: &str = "/tmp/k8s-webhook-server/serving-certs/tls.crt";
pub const DEFAULT_WEBHOOK_KEY_PATH: &str = "/tmp/k8s-webhook-server/serving-certs/tls.key";
pub const DEFAULT_SERVER_STARTUP_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_SERVER_POLL_INTERVAL_MS: u64 = 50;

/// Delay before restarting the watch after an unclassified stream error
pub const DEFAULT_WATCH_RESTART_DELAY_SECS: u64 = 5;
