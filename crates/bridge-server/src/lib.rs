//! Socket front end for the serial adapter.
//!
//! A client sends fixed-size command headers over TCP; each is turned into
//! an [`bridge_core::SpiCommand`], executed against a simulated device
//! stepped on its own thread, and answered with a fixed-size response.

/// Environment-driven server settings.
pub mod config;
pub use config::{ConfigError, ServerConfig};

/// Request and response records.
pub mod wire;
pub use wire::{CommandHeader, CommandKind, Request, Response, WireError};

/// Connection loop and stepping thread.
pub mod server;
pub use server::{run_server, serve_connection, serve_one, ServerError, Stepper};

use env_logger as _;
#[cfg(test)]
use proptest as _;
