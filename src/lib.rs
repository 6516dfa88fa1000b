//! tftpd: a concurrent TFTP-class file server over UDP.
//!
//! One UDP socket serves many clients at once. Each client endpoint gets an
//! independent transfer session; a single readiness-driven event loop
//! decodes each datagram, looks up (or creates) the matching session, and
//! advances that session's state machine by exactly one step, retransmitting
//! on timeout. A slow client never stalls another beyond the duration of a
//! single dispatched step.
//!
//! # Example
//!
//! ```no_run
//! use tftpd::{Config, TftpServer};
//!
//! # async fn serve() -> Result<(), tftpd::TftpError> {
//! let config = Config::load_or_create(&"tftpd.toml".into())?;
//! let server = TftpServer::bind(&config.server).await?;
//! server.run().await?;
//! # Ok(())
//! # }
//! ```
//!
//! Each module has a single responsibility:
//! - [`packet`]: wire format (decode / encode)
//! - [`options`]: large-file option negotiation and block wraparound
//! - [`retry`]: timeout and bounded-retry state for in-flight packets
//! - [`registry`]: endpoint-keyed session registry
//! - [`session`]: per-transfer read/write state machines
//! - [`server`]: the multiplexer event loop
//! - [`file_io`]: file access for transfers
//! - [`config`]: TOML configuration
//! - [`error`]: error types

pub mod config;
pub mod error;
pub mod file_io;
pub mod options;
pub mod packet;
pub mod registry;
pub mod retry;
pub mod server;
pub mod session;

pub use config::Config;
pub use error::TftpError;
pub use server::TftpServer;

// Re-export commonly used crates for downstream callers.
pub use bytes;
pub use tokio;
