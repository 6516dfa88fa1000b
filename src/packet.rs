//! TFTP wire format: packet decode and encode.
//!
//! Every datagram carries exactly one packet, tagged by a big-endian 16-bit
//! opcode in its first two bytes. This module turns raw buffers into a
//! [`Packet`] variant and back; no I/O happens here.
//!
//! # Wire layout
//!
//! ```text
//! RRQ/WRQ : | 01/02 | filename \0 | mode \0 | (opt-name \0 opt-value \0)* |
//! DATA    : | 03    | block (2)   | payload (0..=512)                     |
//! ACK     : | 04    | block (2)   |                                       |
//! ERROR   : | 05    | code (2)    | message \0                            |
//! OACK    : | 06    | (opt-name \0 + 4-byte block-count hint)*            |
//! ```
//!
//! A DATA payload shorter than [`BLOCK_SIZE`] marks the end of a transfer,
//! so the largest datagram the server ever sees is [`MAX_DATAGRAM`] bytes.
//! Decoding only ever allocates from the received bytes, never from a length
//! field the peer controls.

use bytes::Bytes;

use crate::error::TftpError;

/// Number of payload bytes in every non-final DATA packet.
pub const BLOCK_SIZE: usize = 512;

/// Largest datagram on the wire: 2-byte opcode + 2-byte block + full payload.
pub const MAX_DATAGRAM: usize = 4 + BLOCK_SIZE;

/// Cap on the encoded option area of a request or OACK.
pub const OPTION_AREA_CAP: usize = 512;

mod opcode {
    pub const RRQ: u16 = 1;
    pub const WRQ: u16 = 2;
    pub const DATA: u16 = 3;
    pub const ACK: u16 = 4;
    pub const ERROR: u16 = 5;
    pub const OACK: u16 = 6;
}

/// TFTP error codes carried by ERROR packets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    Undefined,
    FileNotFound,
    AccessViolation,
    DiskFull,
    IllegalOperation,
    UnknownTransferId,
    FileExists,
    NoSuchUser,
    OptionNegotiation,
}

impl ErrorCode {
    /// The on-wire numeric code.
    pub fn code(self) -> u16 {
        match self {
            ErrorCode::Undefined => 0,
            ErrorCode::FileNotFound => 1,
            ErrorCode::AccessViolation => 2,
            ErrorCode::DiskFull => 3,
            ErrorCode::IllegalOperation => 4,
            ErrorCode::UnknownTransferId => 5,
            ErrorCode::FileExists => 6,
            ErrorCode::NoSuchUser => 7,
            ErrorCode::OptionNegotiation => 8,
        }
    }

    /// Codes outside the defined range decode as [`ErrorCode::Undefined`].
    pub fn from_code(code: u16) -> Self {
        match code {
            1 => ErrorCode::FileNotFound,
            2 => ErrorCode::AccessViolation,
            3 => ErrorCode::DiskFull,
            4 => ErrorCode::IllegalOperation,
            5 => ErrorCode::UnknownTransferId,
            6 => ErrorCode::FileExists,
            7 => ErrorCode::NoSuchUser,
            8 => ErrorCode::OptionNegotiation,
            _ => ErrorCode::Undefined,
        }
    }
}

/// The body shared by RRQ and WRQ packets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub filename: String,
    /// Transfer mode; clients send `octet`.
    pub mode: String,
    /// Requested options, in wire order. A name with no value decodes with
    /// an empty value.
    pub options: Vec<(String, String)>,
}

impl Request {
    /// Look up a requested option by name.
    pub fn option(&self, name: &str) -> Option<&str> {
        self.options
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }
}

/// One decoded TFTP packet.
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    /// Read request: the client wants the server to send `filename`.
    Rrq(Request),
    /// Write request: the client wants to send `filename` to the server.
    Wrq(Request),
    /// One block of file content. A payload under [`BLOCK_SIZE`] bytes is
    /// the last block of the transfer.
    Data { block: u16, payload: Bytes },
    /// Acknowledges receipt of `block`.
    Ack { block: u16 },
    /// Terminal error notification; the sender gives up on the transfer.
    Error { code: ErrorCode, message: String },
    /// Option acknowledgment: each accepted option name with its 4-byte
    /// block-count hint.
    Oack { options: Vec<(String, u32)> },
}

impl Packet {
    /// Decode a raw datagram into exactly one packet.
    ///
    /// # Errors
    ///
    /// Fails on buffers shorter than the opcode, buffers longer than
    /// [`MAX_DATAGRAM`], unknown opcodes, request fields missing their NUL
    /// terminator, and non-UTF-8 strings. The length cap is what rejects a
    /// DATA payload over [`BLOCK_SIZE`] bytes.
    pub fn decode(buf: &[u8]) -> Result<Packet, TftpError> {
        if buf.len() < 2 {
            return Err(TftpError::Truncated(buf.len()));
        }
        if buf.len() > MAX_DATAGRAM {
            return Err(TftpError::Oversized(buf.len()));
        }
        let op = u16::from_be_bytes([buf[0], buf[1]]);
        let body = &buf[2..];
        match op {
            opcode::RRQ => Ok(Packet::Rrq(parse_request(body)?)),
            opcode::WRQ => Ok(Packet::Wrq(parse_request(body)?)),
            opcode::DATA => {
                if body.len() < 2 {
                    return Err(TftpError::Truncated(buf.len()));
                }
                // The length cap above bounds the payload at BLOCK_SIZE.
                Ok(Packet::Data {
                    block: u16::from_be_bytes([body[0], body[1]]),
                    payload: Bytes::copy_from_slice(&body[2..]),
                })
            }
            opcode::ACK => {
                if body.len() < 2 {
                    return Err(TftpError::Truncated(buf.len()));
                }
                Ok(Packet::Ack {
                    block: u16::from_be_bytes([body[0], body[1]]),
                })
            }
            opcode::ERROR => {
                if body.len() < 2 {
                    return Err(TftpError::Truncated(buf.len()));
                }
                let raw = &body[2..];
                // Lenient: accept a message without its trailing NUL.
                let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
                let message = std::str::from_utf8(&raw[..end])
                    .map_err(|_| TftpError::InvalidString)?
                    .to_string();
                Ok(Packet::Error {
                    code: ErrorCode::from_code(u16::from_be_bytes([body[0], body[1]])),
                    message,
                })
            }
            opcode::OACK => {
                let mut options = Vec::new();
                let mut rest = body;
                while !rest.is_empty() {
                    let (name, after) = take_cstr(rest)?;
                    if after.len() < 4 {
                        return Err(TftpError::Truncated(buf.len()));
                    }
                    let hint = u32::from_be_bytes([after[0], after[1], after[2], after[3]]);
                    options.push((name, hint));
                    rest = &after[4..];
                }
                Ok(Packet::Oack { options })
            }
            other => Err(TftpError::UnknownOpcode(other)),
        }
    }

    /// Encode this packet into a fresh buffer with the exact inverse layout
    /// of [`Packet::decode`].
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(MAX_DATAGRAM);
        match self {
            Packet::Rrq(request) => {
                out.extend_from_slice(&opcode::RRQ.to_be_bytes());
                emit_request(&mut out, request);
            }
            Packet::Wrq(request) => {
                out.extend_from_slice(&opcode::WRQ.to_be_bytes());
                emit_request(&mut out, request);
            }
            Packet::Data { block, payload } => {
                debug_assert!(payload.len() <= BLOCK_SIZE);
                out.extend_from_slice(&opcode::DATA.to_be_bytes());
                out.extend_from_slice(&block.to_be_bytes());
                out.extend_from_slice(payload);
            }
            Packet::Ack { block } => {
                out.extend_from_slice(&opcode::ACK.to_be_bytes());
                out.extend_from_slice(&block.to_be_bytes());
            }
            Packet::Error { code, message } => {
                out.extend_from_slice(&opcode::ERROR.to_be_bytes());
                out.extend_from_slice(&code.code().to_be_bytes());
                out.extend_from_slice(message.as_bytes());
                out.push(0);
            }
            Packet::Oack { options } => {
                out.extend_from_slice(&opcode::OACK.to_be_bytes());
                for (name, hint) in options {
                    out.extend_from_slice(name.as_bytes());
                    out.push(0);
                    out.extend_from_slice(&hint.to_be_bytes());
                }
                debug_assert!(out.len() <= 2 + OPTION_AREA_CAP);
            }
        }
        out
    }
}

/// Split the next NUL-terminated UTF-8 string off the front of `buf`.
fn take_cstr(buf: &[u8]) -> Result<(String, &[u8]), TftpError> {
    let nul = buf
        .iter()
        .position(|&b| b == 0)
        .ok_or(TftpError::MissingTerminator)?;
    let s = std::str::from_utf8(&buf[..nul]).map_err(|_| TftpError::InvalidString)?;
    Ok((s.to_string(), &buf[nul + 1..]))
}

fn parse_request(body: &[u8]) -> Result<Request, TftpError> {
    let (filename, rest) = take_cstr(body)?;
    let (mode, mut rest) = take_cstr(rest)?;

    // Option strings after the mode. Some clients omit the final NUL on
    // their last option, so a trailing unterminated token is accepted.
    let mut tokens = Vec::new();
    while !rest.is_empty() {
        match rest.iter().position(|&b| b == 0) {
            Some(nul) => {
                let s = std::str::from_utf8(&rest[..nul]).map_err(|_| TftpError::InvalidString)?;
                tokens.push(s.to_string());
                rest = &rest[nul + 1..];
            }
            None => {
                let s = std::str::from_utf8(rest).map_err(|_| TftpError::InvalidString)?;
                tokens.push(s.to_string());
                break;
            }
        }
    }

    let mut options = Vec::new();
    let mut tokens = tokens.into_iter();
    while let Some(name) = tokens.next() {
        if name.is_empty() {
            // Stray padding NUL; skip it.
            continue;
        }
        let value = tokens.next().unwrap_or_default();
        options.push((name, value));
    }

    Ok(Request {
        filename,
        mode,
        options,
    })
}

fn emit_request(out: &mut Vec<u8>, request: &Request) {
    out.extend_from_slice(request.filename.as_bytes());
    out.push(0);
    out.extend_from_slice(request.mode.as_bytes());
    out.push(0);
    for (name, value) in &request.options {
        out.extend_from_slice(name.as_bytes());
        out.push(0);
        out.extend_from_slice(value.as_bytes());
        out.push(0);
    }
}
