//! Configuration loading and constants.
//!
//! Settings come from three layers, highest priority first: command-line flags,
//! an optional TOML file, and the built-in defaults below. The merged
//! `AppConfig` produces the immutable `ServerConfig` consumed by the server.

use std::path::{Path, PathBuf};
use std::time::Duration;

use const_format::formatcp;
use serde::Deserialize;

// =============================================================================
// Server Defaults
// =============================================================================

/// Directory containing OTA images (the firmware build output)
pub const DEFAULT_OTA_IMAGE_DIR: &str = "../../build_app/";

/// Address the listener binds to
pub const DEFAULT_SERVER_IP: &str = "0.0.0.0";

/// Port the listener binds to
pub const DEFAULT_SERVER_PORT: u16 = 8070;

/// Server certificate chain (PEM)
pub const DEFAULT_SERVER_CERT: &str = "./ca_cert.pem";

/// Server private key (PEM)
pub const DEFAULT_SERVER_KEY: &str = "./ca_key.pem";

/// Files served in place of a directory listing, in order of preference
pub const INDEX_FILES: [&str; 2] = ["index.html", "index.htm"];

// =============================================================================
// Connection Limits
// =============================================================================

/// Time allowed for a client to send complete request headers
pub const DEFAULT_HEADER_READ_TIMEOUT_SECS: u64 = 30;

/// Time allowed for a client to complete the TLS handshake
pub const DEFAULT_TLS_HANDSHAKE_TIMEOUT_SECS: u64 = 10;

/// Time in-flight connections get to finish after stop is requested
pub const DEFAULT_SHUTDOWN_GRACE_SECS: u64 = 10;

// =============================================================================
// HTTP Response Headers
// =============================================================================

/// Devices must always revalidate so a rebuilt image is never served stale
pub const CACHE_CONTROL_IMAGES: &str = "no-cache";

pub const SERVER_HEADER: &str = formatcp!("ota-server/{}", env!("CARGO_PKG_VERSION"));

// =============================================================================
// Logging
// =============================================================================

/// Default log filter when neither --log_level nor RUST_LOG is set
pub const DEFAULT_LOG_FILTER: &str = "ota_server=info";

/// Default log format (text or json)
pub const DEFAULT_LOG_FORMAT: &str = "text";

/// How the server terminates connections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TlsMode {
    /// Plain HTTP
    Plain,
    /// HTTPS with an operator-supplied certificate chain and private key
    Tls { cert_path: PathBuf, key_path: PathBuf },
}

impl TlsMode {
    pub fn is_tls(&self) -> bool {
        matches!(self, TlsMode::Tls { .. })
    }
}

/// Validated, immutable server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    root_dir: PathBuf,
    bind_host: String,
    bind_port: u16,
    tls: TlsMode,
}

impl ServerConfig {
    /// Validate the inputs and build a configuration.
    ///
    /// `root_dir` must be a readable directory; it is stored canonicalized so
    /// every request path can be checked against it by prefix. Supplying only
    /// one of `cert_path` / `key_path` is an error.
    pub fn new(
        root_dir: impl AsRef<Path>,
        bind_host: impl Into<String>,
        bind_port: u16,
        cert_path: Option<PathBuf>,
        key_path: Option<PathBuf>,
    ) -> Result<Self, ConfigError> {
        let root_dir = root_dir.as_ref();
        let root_error = |reason: String| ConfigError::RootDir {
            path: root_dir.to_path_buf(),
            reason,
        };

        let metadata = std::fs::metadata(root_dir).map_err(|e| root_error(e.to_string()))?;
        if !metadata.is_dir() {
            return Err(root_error("not a directory".to_string()));
        }
        std::fs::read_dir(root_dir).map_err(|e| root_error(e.to_string()))?;
        let root_dir = std::fs::canonicalize(root_dir).map_err(|e| root_error(e.to_string()))?;

        let bind_host = bind_host.into();
        if bind_host.trim().is_empty() {
            return Err(ConfigError::Validation(
                "server_ip must not be empty".to_string(),
            ));
        }

        let tls = match (cert_path, key_path) {
            (None, None) => TlsMode::Plain,
            (Some(cert_path), Some(key_path)) => TlsMode::Tls {
                cert_path,
                key_path,
            },
            (Some(_), None) => {
                return Err(ConfigError::IncompleteTls {
                    missing: "private key",
                })
            }
            (None, Some(_)) => {
                return Err(ConfigError::IncompleteTls {
                    missing: "certificate",
                })
            }
        };

        Ok(Self {
            root_dir,
            bind_host,
            bind_port,
            tls,
        })
    }

    /// Canonical directory that all served files must live under.
    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    pub fn bind_host(&self) -> &str {
        &self.bind_host
    }

    pub fn bind_port(&self) -> u16 {
        self.bind_port
    }

    pub fn tls(&self) -> &TlsMode {
        &self.tls
    }
}

/// Timeouts bounding connection lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerLimits {
    pub header_read_timeout: Duration,
    pub tls_handshake_timeout: Duration,
    pub shutdown_grace: Duration,
}

impl Default for ServerLimits {
    fn default() -> Self {
        Self {
            header_read_timeout: Duration::from_secs(DEFAULT_HEADER_READ_TIMEOUT_SECS),
            tls_handshake_timeout: Duration::from_secs(DEFAULT_TLS_HANDSHAKE_TIMEOUT_SECS),
            shutdown_grace: Duration::from_secs(DEFAULT_SHUTDOWN_GRACE_SECS),
        }
    }
}

/// Root of the TOML configuration file. Every section is optional.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server settings. Field names match the command-line flags.
///
/// An empty `server_cert` or `server_key` disables that half of the TLS pair.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct ServerSection {
    pub ota_image_dir: Option<PathBuf>,
    pub server_ip: Option<String>,
    pub server_port: Option<u16>,
    pub server_cert: Option<PathBuf>,
    pub server_key: Option<PathBuf>,
}

impl ServerSection {
    /// Layer `overrides` on top of `self`; values set in `overrides` win.
    pub fn overlay(self, overrides: ServerSection) -> ServerSection {
        ServerSection {
            ota_image_dir: overrides.ota_image_dir.or(self.ota_image_dir),
            server_ip: overrides.server_ip.or(self.server_ip),
            server_port: overrides.server_port.or(self.server_port),
            server_cert: overrides.server_cert.or(self.server_cert),
            server_key: overrides.server_key.or(self.server_key),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "LimitsConfig::default_header_read_timeout")]
    pub header_read_timeout_seconds: u64,
    #[serde(default = "LimitsConfig::default_tls_handshake_timeout")]
    pub tls_handshake_timeout_seconds: u64,
    #[serde(default = "LimitsConfig::default_shutdown_grace")]
    pub shutdown_grace_seconds: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            header_read_timeout_seconds: Self::default_header_read_timeout(),
            tls_handshake_timeout_seconds: Self::default_tls_handshake_timeout(),
            shutdown_grace_seconds: Self::default_shutdown_grace(),
        }
    }
}

impl LimitsConfig {
    fn default_header_read_timeout() -> u64 {
        DEFAULT_HEADER_READ_TIMEOUT_SECS
    }

    fn default_tls_handshake_timeout() -> u64 {
        DEFAULT_TLS_HANDSHAKE_TIMEOUT_SECS
    }

    fn default_shutdown_grace() -> u64 {
        DEFAULT_SHUTDOWN_GRACE_SECS
    }

    /// Convert to durations. Zero timeouts are rejected.
    pub fn limits(&self) -> Result<ServerLimits, ConfigError> {
        if self.header_read_timeout_seconds == 0 || self.tls_handshake_timeout_seconds == 0 {
            return Err(ConfigError::Validation(
                "limits timeouts must be greater than zero".to_string(),
            ));
        }

        Ok(ServerLimits {
            header_read_timeout: Duration::from_secs(self.header_read_timeout_seconds),
            tls_handshake_timeout: Duration::from_secs(self.tls_handshake_timeout_seconds),
            shutdown_grace: Duration::from_secs(self.shutdown_grace_seconds),
        })
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log format: "text" (human-readable, default) or "json" (structured)
    #[serde(default = "LoggingConfig::default_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: DEFAULT_LOG_FORMAT.to_string(),
        }
    }
}

impl LoggingConfig {
    fn default_format() -> String {
        DEFAULT_LOG_FORMAT.to_string()
    }

    pub fn is_json(&self) -> bool {
        self.format.eq_ignore_ascii_case("json")
    }
}

impl AppConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&contents)?;

        match config.logging.format.to_ascii_lowercase().as_str() {
            "text" | "json" => {}
            other => {
                return Err(ConfigError::Validation(format!(
                    "Unknown logging.format '{other}', expected \"text\" or \"json\""
                )))
            }
        }

        Ok(config)
    }

    /// Apply defaults to unset fields and validate into a `ServerConfig`.
    pub fn server_config(&self) -> Result<ServerConfig, ConfigError> {
        let server = &self.server;
        let root_dir = server
            .ota_image_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_OTA_IMAGE_DIR));
        let bind_host = server
            .server_ip
            .clone()
            .unwrap_or_else(|| DEFAULT_SERVER_IP.to_string());
        let bind_port = server.server_port.unwrap_or(DEFAULT_SERVER_PORT);
        let cert_path = enabled_path(server.server_cert.as_deref(), DEFAULT_SERVER_CERT);
        let key_path = enabled_path(server.server_key.as_deref(), DEFAULT_SERVER_KEY);

        ServerConfig::new(root_dir, bind_host, bind_port, cert_path, key_path)
    }
}

/// Unset falls back to `default`; an explicitly empty path means disabled.
fn enabled_path(value: Option<&Path>, default: &str) -> Option<PathBuf> {
    match value {
        None => Some(PathBuf::from(default)),
        Some(path) if path.as_os_str().is_empty() => None,
        Some(path) => Some(path.to_path_buf()),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid OTA image directory '{}': {reason}", path.display())]
    RootDir { path: PathBuf, reason: String },
    #[error("TLS needs both a certificate and a private key, but no {missing} was given")]
    IncompleteTls { missing: &'static str },
    #[error("Configuration error: {0}")]
    Validation(String),
}
