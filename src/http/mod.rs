//! HTTP server module with optional TLS.
//!
//! - **TLS**: operator-supplied certificate chain and private key
//! - **Plain**: HTTP only, when no certificate/key pair is configured
//!
//! The server includes:
//! - Static file serving rooted at the OTA image directory
//! - Graceful shutdown on SIGTERM/SIGINT or via `ServerHandle::stop`

mod server;
mod shutdown;
pub mod static_files;
mod tls;

pub use server::{ServerError, ServerHandle, ServerState, StaticTlsServer};
pub use shutdown::setup_shutdown_handler;
pub use tls::load_tls_context;
