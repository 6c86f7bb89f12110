//! ota-server: serves firmware images to devices performing an OTA update.
//!
//! Files under a single root directory are published over HTTP or, given a
//! certificate and private key, HTTPS. Path resolution never leaves the root.

pub mod config;
pub mod error;
pub mod http;
pub mod middleware;
pub mod routes;
pub mod state;

pub use config::{AppConfig, ConfigError, ServerConfig, ServerLimits, TlsMode};
pub use error::RequestError;
pub use crate::http::{ServerError, ServerHandle, ServerState, StaticTlsServer};
