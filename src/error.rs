//! Error types for the TFTP server.
//!
//! One enum covers everything that can go wrong, from malformed datagrams to
//! file I/O failures. Session-scoped conditions (a rejected request, a timed
//! out transfer) are reported to the offending client as ERROR packets and
//! never surface here; this type is for failures the server itself has to
//! handle or propagate.

use std::io;
use std::net::SocketAddr;
use thiserror::Error;

/// Errors that can occur while serving transfers.
#[derive(Debug, Error)]
pub enum TftpError {
    /// An I/O error from the socket or the filesystem.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A datagram too short to carry an opcode, or a body too short for its
    /// opcode's fixed fields.
    #[error("datagram too short: {0} bytes")]
    Truncated(usize),

    /// The first two bytes named no known packet type.
    #[error("unknown opcode {0}")]
    UnknownOpcode(u16),

    /// An RRQ/WRQ string field had no NUL terminator.
    #[error("request field missing its NUL terminator")]
    MissingTerminator,

    /// A string field was not valid UTF-8.
    #[error("request field is not valid UTF-8")]
    InvalidString,

    /// A datagram longer than any legal packet.
    #[error("datagram of {0} bytes exceeds the 516-byte maximum")]
    Oversized(usize),

    /// A session already exists for this endpoint; the new request must be
    /// rejected rather than replace it.
    #[error("a transfer is already in progress for {0}")]
    DuplicateSession(SocketAddr),

    /// Failed to serialize configuration to TOML.
    #[error("TOML serialization error: {0}")]
    TomlSerialization(#[from] toml::ser::Error),

    /// Failed to deserialize configuration from TOML.
    #[error("TOML deserialization error: {0}")]
    TomlDeserialization(#[from] toml::de::Error),
}
