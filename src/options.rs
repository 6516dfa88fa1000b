//! Large-file option negotiation and block-number wraparound.
//!
//! Block numbers occupy 16 bits on the wire, which limits a plain transfer
//! to 65_535 addressable blocks (~32 MiB). The `bigfile` option lets a
//! client opt into counter wraparound: the server confirms it with an OACK
//! before any DATA/ACK, and the session's block counter then cycles instead
//! of running out.
//!
//! Unrecognized options fall back gracefully by default: the server ignores
//! them and answers with the plain non-extended reply. A strict mode that
//! rejects unsupported requests outright (ERROR code 8) is available for
//! clients that treat a missing echo as fatal.

use crate::packet::{ErrorCode, Packet};

/// Option name a client sends to request large-file transfers.
pub const LARGE_FILE_OPTION: &str = "bigfile";

/// Modulus for block-number arithmetic: the natural 16-bit boundary.
/// Large-file sessions wrap to block 1 rather than 0, because block 0 is
/// reserved for the WRQ handshake ACK.
pub const WRAP_BOUNDARY: u32 = 65_536;

/// A session's 16-bit block counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockCounter {
    current: u16,
    large_file: bool,
}

impl BlockCounter {
    pub fn new(start: u16, large_file: bool) -> Self {
        BlockCounter {
            current: start,
            large_file,
        }
    }

    /// The block currently in flight (read sessions) or expected next
    /// (write sessions).
    pub fn current(&self) -> u16 {
        self.current
    }

    /// Advance by exactly one modulo [`WRAP_BOUNDARY`].
    pub fn advance(&mut self) {
        self.current = if self.large_file && self.current == u16::MAX {
            1
        } else {
            self.current.wrapping_add(1)
        };
    }
}

/// What the negotiator decided for one RRQ/WRQ.
#[derive(Debug, Clone, PartialEq)]
pub enum Negotiation {
    /// Nothing recognized was requested; reply with the plain ACK 0 or
    /// first DATA.
    Plain,
    /// The large-file option was accepted; `oack` must be sent before any
    /// DATA/ACK.
    LargeFile { oack: Packet },
    /// Strict mode only: the request carried options and none could be
    /// honored.
    Rejected { error: Packet },
}

/// Scan a request's option list and decide the server's opening move.
pub fn negotiate(options: &[(String, String)], strict: bool) -> Negotiation {
    let large_file = options.iter().any(|(name, _)| name == LARGE_FILE_OPTION);
    if large_file {
        Negotiation::LargeFile {
            oack: Packet::Oack {
                options: vec![(LARGE_FILE_OPTION.to_string(), WRAP_BOUNDARY)],
            },
        }
    } else if strict && !options.is_empty() {
        Negotiation::Rejected {
            error: Packet::Error {
                code: ErrorCode::OptionNegotiation,
                message: "unsupported option".to_string(),
            },
        }
    } else {
        Negotiation::Plain
    }
}
