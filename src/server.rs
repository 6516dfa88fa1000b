//! The session multiplexer: one UDP socket, one event loop, many transfers.
//!
//! All clients talk to the same socket. The loop waits for whichever comes
//! first, the next datagram or the earliest retransmit deadline, and then
//! either dispatches the datagram to its session's state machine or fires
//! the expired timers. Each dispatched step runs to completion before the
//! next datagram is picked up, so a slow file read for one session delays
//! dispatch for the others for that duration; this is the documented
//! trade-off of the single-loop design.
//!
//! Guard rails on dispatch:
//! - ACK/DATA with no matching session is dropped silently, so spoofed or
//!   stray traffic never gets a reply to amplify.
//! - RRQ/WRQ from an endpoint that already has a live session is rejected
//!   with an ERROR; the existing transfer is untouched.
//! - Decode failures and session-scoped I/O errors are logged and contained
//!   to the offending client; only transport errors on the socket itself
//!   end the serve loop.

use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;

use tokio::net::UdpSocket;
use tokio::time::{self, Instant};
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::error::TftpError;
use crate::file_io;
use crate::options::{self, Negotiation};
use crate::packet::{ErrorCode, Packet, Request, MAX_DATAGRAM};
use crate::registry::SessionRegistry;
use crate::retry::RetryPolicy;
use crate::session::{Direction, Session, Step, TimeoutStep};

/// The TFTP server: socket, configuration, and all live sessions.
pub struct TftpServer {
    socket: UdpSocket,
    root: PathBuf,
    policy: RetryPolicy,
    strict_options: bool,
    registry: SessionRegistry,
}

impl TftpServer {
    /// Bind the listening socket described by `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound.
    pub async fn bind(config: &ServerConfig) -> Result<Self, TftpError> {
        let addr = format!("{}:{}", config.address, config.port);
        let socket = UdpSocket::bind(&addr).await?;
        info!(address = %socket.local_addr()?, root = %config.root_directory, "TFTP server listening");
        Ok(TftpServer {
            socket,
            root: PathBuf::from(&config.root_directory),
            policy: config.retry_policy(),
            strict_options: config.strict_options,
            registry: SessionRegistry::new(),
        })
    }

    /// The address the socket actually bound to (resolves port 0).
    pub fn local_addr(&self) -> Result<SocketAddr, TftpError> {
        Ok(self.socket.local_addr()?)
    }

    /// Run the serve loop until a fatal transport error.
    ///
    /// The loop has exactly one suspension point: waiting for the next
    /// ready datagram, bounded by the earliest retransmit deadline across
    /// all sessions.
    pub async fn run(mut self) -> Result<(), TftpError> {
        // One byte of headroom: recv_from truncates datagrams to the buffer
        // length, so an exactly sized buffer would turn an overlong DATA into
        // a full block that decodes cleanly. With the extra byte the decoder
        // sees the overflow and rejects the datagram.
        let mut buf = vec![0u8; MAX_DATAGRAM + 1];
        loop {
            let received = match self.registry.earliest_deadline() {
                Some(deadline) => tokio::select! {
                    result = self.socket.recv_from(&mut buf) => Some(result?),
                    _ = time::sleep_until(deadline) => None,
                },
                None => Some(self.socket.recv_from(&mut buf).await?),
            };
            match received {
                Some((len, peer)) => self.dispatch(&buf[..len], peer).await?,
                None => self.fire_timeouts().await?,
            }
        }
    }

    /// Decode one datagram and advance the matching session by one step.
    async fn dispatch(&mut self, datagram: &[u8], peer: SocketAddr) -> Result<(), TftpError> {
        let packet = match Packet::decode(datagram) {
            Ok(packet) => packet,
            Err(e) => {
                warn!(peer = %peer, error = %e, "dropping malformed datagram");
                return Ok(());
            }
        };
        match packet {
            Packet::Rrq(request) => self.start_session(peer, request, Direction::Read).await,
            Packet::Wrq(request) => self.start_session(peer, request, Direction::Write).await,
            Packet::Ack { .. } | Packet::Data { .. } => self.advance_session(peer, packet).await,
            Packet::Error { code, message } => {
                if self.registry.remove(&peer).is_some() {
                    warn!(peer = %peer, code = code.code(), message = %message, "client aborted transfer");
                } else {
                    debug!(peer = %peer, "ERROR from unknown endpoint dropped");
                }
                Ok(())
            }
            Packet::Oack { .. } => {
                debug!(peer = %peer, "unexpected OACK dropped");
                Ok(())
            }
        }
    }

    /// Handle an RRQ/WRQ: negotiate options, open the file, create the
    /// session, and send the opening reply.
    async fn start_session(
        &mut self,
        peer: SocketAddr,
        request: Request,
        direction: Direction,
    ) -> Result<(), TftpError> {
        if self.registry.contains(&peer) {
            warn!(peer = %peer, "new request while a transfer is already in progress");
            return self
                .send_error(peer, ErrorCode::Undefined, "transfer already in progress")
                .await;
        }
        info!(
            peer = %peer,
            filename = %request.filename,
            direction = ?direction,
            "transfer requested"
        );

        let (large_file, oack) = match options::negotiate(&request.options, self.strict_options) {
            Negotiation::Plain => (false, None),
            Negotiation::LargeFile { oack } => (true, Some(oack)),
            Negotiation::Rejected { error } => {
                warn!(peer = %peer, "option negotiation rejected");
                self.send_packet(peer, &error).await?;
                return Ok(());
            }
        };

        let path = self.root.join(&request.filename);
        let opened = match direction {
            Direction::Read => file_io::open_for_read(&path).await,
            Direction::Write => file_io::create_exclusive(&path).await,
        };
        let file = match opened {
            Ok(file) => file,
            Err(e) => {
                let code = request_error_code(direction, &e);
                warn!(peer = %peer, path = %path.display(), error = %e, "rejecting request");
                return self.send_error(peer, code, &e.to_string()).await;
            }
        };

        let started = match direction {
            Direction::Read => {
                Session::start_read(peer, file, large_file, oack, self.policy).await
            }
            Direction::Write => Session::start_write(peer, file, large_file, oack, self.policy),
        };
        let (session, step) = match started {
            Ok(v) => v,
            Err(e) => {
                error!(peer = %peer, error = %e, "failed to start transfer");
                return self
                    .send_error(peer, ErrorCode::AccessViolation, "server i/o error")
                    .await;
            }
        };

        self.registry.insert(session)?;
        self.apply_step(peer, step).await
    }

    /// Feed an ACK/DATA to the session it belongs to, if any.
    async fn advance_session(&mut self, peer: SocketAddr, packet: Packet) -> Result<(), TftpError> {
        let Some(session) = self.registry.find_mut(&peer) else {
            debug!(peer = %peer, "ACK/DATA with no matching session dropped");
            return Ok(());
        };
        let step = match session.handle(&packet).await {
            Ok(step) => step,
            Err(e) => {
                // Session-scoped failure: this transfer dies, the rest live on.
                error!(peer = %peer, error = %e, "session i/o failure");
                self.registry.remove(&peer);
                return self
                    .send_error(peer, ErrorCode::AccessViolation, "server i/o error")
                    .await;
            }
        };
        self.apply_step(peer, step).await
    }

    /// Send a step's reply and update retransmission/registry state.
    async fn apply_step(&mut self, peer: SocketAddr, step: Step) -> Result<(), TftpError> {
        match step {
            Step::Reply { packet, expect } => {
                let wire = self.send_packet(peer, &packet).await?;
                if let Some(expect) = expect {
                    if let Some(session) = self.registry.find_mut(&peer) {
                        session.arm(wire, expect);
                    }
                }
            }
            Step::Done { reply } => {
                if let Some(reply) = reply {
                    self.send_packet(peer, &reply).await?;
                }
                if self.registry.remove(&peer).is_some() {
                    info!(peer = %peer, "transfer complete");
                }
            }
            Step::Ignored => {}
        }
        Ok(())
    }

    /// Resend or expire every session whose retransmit deadline has passed.
    async fn fire_timeouts(&mut self) -> Result<(), TftpError> {
        let now = Instant::now();
        for peer in self.registry.expired(now) {
            let Some(session) = self.registry.find_mut(&peer) else {
                continue;
            };
            match session.on_timeout() {
                TimeoutStep::Resend(wire) => {
                    debug!(peer = %peer, "no reply before deadline, retransmitting");
                    self.socket.send_to(&wire, peer).await?;
                }
                TimeoutStep::Expired => {
                    warn!(peer = %peer, "retries exhausted, terminating session");
                    self.registry.remove(&peer);
                    self.send_error(peer, ErrorCode::Undefined, "transfer timed out")
                        .await?;
                }
            }
        }
        Ok(())
    }

    /// Encode and send one packet, returning the wire image for retransmit
    /// arming.
    async fn send_packet(&self, peer: SocketAddr, packet: &Packet) -> Result<Vec<u8>, TftpError> {
        let wire = packet.encode();
        self.socket.send_to(&wire, peer).await?;
        Ok(wire)
    }

    async fn send_error(
        &self,
        peer: SocketAddr,
        code: ErrorCode,
        message: &str,
    ) -> Result<(), TftpError> {
        let packet = Packet::Error {
            code,
            message: message.to_string(),
        };
        self.send_packet(peer, &packet).await?;
        Ok(())
    }
}

/// Map a request-time file open failure to the TFTP error code the client
/// should see.
fn request_error_code(direction: Direction, err: &io::Error) -> ErrorCode {
    match (direction, err.kind()) {
        (Direction::Read, io::ErrorKind::NotFound) => ErrorCode::FileNotFound,
        (Direction::Write, io::ErrorKind::AlreadyExists) => ErrorCode::FileExists,
        _ => ErrorCode::AccessViolation,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_failures_map_to_protocol_codes() {
        let not_found = io::Error::new(io::ErrorKind::NotFound, "missing");
        assert_eq!(
            request_error_code(Direction::Read, &not_found),
            ErrorCode::FileNotFound
        );

        let exists = io::Error::new(io::ErrorKind::AlreadyExists, "present");
        assert_eq!(
            request_error_code(Direction::Write, &exists),
            ErrorCode::FileExists
        );

        let denied = io::Error::new(io::ErrorKind::PermissionDenied, "nope");
        assert_eq!(
            request_error_code(Direction::Read, &denied),
            ErrorCode::AccessViolation
        );
        assert_eq!(
            request_error_code(Direction::Write, &denied),
            ErrorCode::AccessViolation
        );
    }
}
