//! Per-transfer state machines.
//!
//! A [`Session`] tracks one in-progress transfer with one client endpoint.
//! Read sessions send the file block by block and wait for ACKs; write
//! sessions acknowledge incoming DATA and append it to the file. Feeding a
//! datagram to [`Session::handle`] advances the machine by at most one step
//! and tells the caller what, if anything, to send back.
//!
//! ```text
//! Read:   RRQ ──▶ [Negotiating] ──ACK 0──▶ AwaitingAck(1) ──ACK n──▶ ...
//!                     (OACK)                   (DATA n)        final ──▶ Complete
//! Write:  WRQ ──▶ AwaitingData(1) ──DATA n──▶ AwaitingData(n+1)
//!                  (ACK 0 / OACK)    (ACK n)        final ──▶ Complete
//! ```
//!
//! Terminal transitions (`Complete`, `Failed`) close the file by dropping
//! the session; the registry entry is removed by the multiplexer at the
//! same moment.

use std::net::SocketAddr;

use bytes::Bytes;
use tokio::fs::File;
use tokio::time::Instant;
use tracing::debug;

use crate::error::TftpError;
use crate::file_io;
use crate::options::BlockCounter;
use crate::packet::{Packet, BLOCK_SIZE};
use crate::retry::{Expected, Retransmit, RetryPolicy, TimeoutAction};

/// Which side of the transfer the server is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Server sends the file (created by RRQ).
    Read,
    /// Server receives the file (created by WRQ).
    Write,
}

/// Where a session is in its transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// An OACK went out on a read session; the first DATA waits for the
    /// client's ACK of block 0.
    Negotiating,
    /// A DATA packet is in flight; `final_block` marks the under-512-byte
    /// chunk that ends the transfer.
    AwaitingAck { final_block: bool },
    /// Expecting DATA for the counter's current block.
    AwaitingData,
    /// Transfer finished; the session is about to be dropped.
    Complete,
    /// Retries exhausted or aborted; the session is about to be dropped.
    Failed,
}

/// Outcome of feeding one datagram to a session.
#[derive(Debug)]
pub enum Step {
    /// Send `packet`; when `expect` is set the packet awaits a reply and the
    /// caller must arm retransmission for it.
    Reply {
        packet: Packet,
        expect: Option<Expected>,
    },
    /// Terminal transition: send `reply` first if present, then remove the
    /// session.
    Done { reply: Option<Packet> },
    /// The datagram was stale, duplicated, or otherwise unexpected; drop it.
    Ignored,
}

/// Outcome of an expired retransmit deadline.
#[derive(Debug)]
pub enum TimeoutStep {
    /// Resend this wire image; the session stays alive.
    Resend(Vec<u8>),
    /// Retry budget spent; the session has transitioned to `Failed`.
    Expired,
}

/// One in-progress transfer with one client endpoint.
#[derive(Debug)]
pub struct Session {
    peer: SocketAddr,
    direction: Direction,
    file: File,
    state: SessionState,
    counter: BlockCounter,
    policy: RetryPolicy,
    retransmit: Option<Retransmit>,
}

impl Session {
    /// Start a read session over an already-opened file.
    ///
    /// The returned [`Step`] is the opening reply: the negotiated OACK when
    /// present, otherwise the first DATA block.
    pub async fn start_read(
        peer: SocketAddr,
        file: File,
        large_file: bool,
        oack: Option<Packet>,
        policy: RetryPolicy,
    ) -> Result<(Self, Step), TftpError> {
        let mut session = Session {
            peer,
            direction: Direction::Read,
            file,
            state: SessionState::Negotiating,
            counter: BlockCounter::new(0, large_file),
            policy,
            retransmit: None,
        };
        let step = if let Some(oack) = oack {
            Step::Reply {
                packet: oack,
                expect: Some(Expected::Ack { block: 0 }),
            }
        } else {
            session.next_data().await?
        };
        Ok((session, step))
    }

    /// Start a write session over a freshly created file.
    ///
    /// The opening reply is ACK 0, or the negotiated OACK in its place.
    pub fn start_write(
        peer: SocketAddr,
        file: File,
        large_file: bool,
        oack: Option<Packet>,
        policy: RetryPolicy,
    ) -> Result<(Self, Step), TftpError> {
        let session = Session {
            peer,
            direction: Direction::Write,
            file,
            state: SessionState::AwaitingData,
            counter: BlockCounter::new(1, large_file),
            policy,
            retransmit: None,
        };
        let packet = oack.unwrap_or(Packet::Ack { block: 0 });
        let step = Step::Reply {
            packet,
            expect: Some(Expected::Data { block: 1 }),
        };
        Ok((session, step))
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Advance the state machine by one step for an incoming datagram.
    ///
    /// # Errors
    ///
    /// File I/O failures propagate; the caller terminates the session and
    /// reports them to the client as a session-scoped ERROR.
    pub async fn handle(&mut self, packet: &Packet) -> Result<Step, TftpError> {
        // The armed retransmit names the only reply that may advance the
        // machine; anything else is a duplicate or a stray from a lossy
        // network and must not reset the clock.
        if let Some(retransmit) = &self.retransmit {
            if !retransmit.matches(packet) {
                debug!(peer = %self.peer, "reply does not match the in-flight expectation, dropped");
                return Ok(Step::Ignored);
            }
        }
        match (self.direction, packet) {
            (Direction::Read, Packet::Ack { block }) => self.on_ack(*block).await,
            (Direction::Write, Packet::Data { block, payload }) => {
                self.on_data(*block, payload).await
            }
            _ => {
                debug!(peer = %self.peer, "packet kind does not fit the session, dropped");
                Ok(Step::Ignored)
            }
        }
    }

    async fn on_ack(&mut self, block: u16) -> Result<Step, TftpError> {
        match self.state {
            SessionState::Negotiating if block == 0 => self.next_data().await,
            SessionState::AwaitingAck { final_block } if block == self.counter.current() => {
                if final_block {
                    self.state = SessionState::Complete;
                    Ok(Step::Done { reply: None })
                } else {
                    self.next_data().await
                }
            }
            _ => {
                debug!(peer = %self.peer, block, "stale or duplicate ACK dropped");
                Ok(Step::Ignored)
            }
        }
    }

    async fn on_data(&mut self, block: u16, payload: &[u8]) -> Result<Step, TftpError> {
        match self.state {
            SessionState::AwaitingData if block == self.counter.current() => {
                file_io::write_chunk(&mut self.file, payload).await?;
                let ack = Packet::Ack { block };
                if payload.len() < BLOCK_SIZE {
                    file_io::finish(&mut self.file).await?;
                    self.state = SessionState::Complete;
                    // Final ACK gets no retransmit: the session ends here.
                    Ok(Step::Done { reply: Some(ack) })
                } else {
                    self.counter.advance();
                    Ok(Step::Reply {
                        packet: ack,
                        expect: Some(Expected::Data {
                            block: self.counter.current(),
                        }),
                    })
                }
            }
            _ => {
                debug!(peer = %self.peer, block, "out-of-sequence DATA dropped");
                Ok(Step::Ignored)
            }
        }
    }

    /// Read the next chunk and wrap it in a DATA packet.
    async fn next_data(&mut self) -> Result<Step, TftpError> {
        self.counter.advance();
        let mut buf = [0u8; BLOCK_SIZE];
        let n = file_io::read_chunk(&mut self.file, &mut buf).await?;
        let final_block = n < BLOCK_SIZE;
        self.state = SessionState::AwaitingAck { final_block };
        let block = self.counter.current();
        Ok(Step::Reply {
            packet: Packet::Data {
                block,
                payload: Bytes::copy_from_slice(&buf[..n]),
            },
            expect: Some(Expected::Ack { block }),
        })
    }

    /// Arm retransmission for the wire image that was just sent.
    pub fn arm(&mut self, wire: Vec<u8>, expect: Expected) {
        self.retransmit = Some(Retransmit::arm(self.policy, wire, expect));
    }

    /// Deadline of the in-flight packet, if one is armed.
    pub fn deadline(&self) -> Option<Instant> {
        self.retransmit.as_ref().map(|r| r.deadline())
    }

    /// React to an expired deadline: resend or give up.
    pub fn on_timeout(&mut self) -> TimeoutStep {
        match self.retransmit.as_mut() {
            Some(retransmit) => match retransmit.on_timeout() {
                TimeoutAction::Resend(wire) => TimeoutStep::Resend(wire.to_vec()),
                TimeoutAction::GiveUp => {
                    self.state = SessionState::Failed;
                    self.retransmit = None;
                    TimeoutStep::Expired
                }
            },
            None => TimeoutStep::Expired,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const PEER: &str = "127.0.0.1:40000";

    fn peer() -> SocketAddr {
        PEER.parse().unwrap()
    }

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    async fn read_session_over(content: &[u8]) -> (tempfile::TempDir, Session) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("src.bin");
        tokio::fs::write(&path, content).await.unwrap();
        let file = file_io::open_for_read(&path).await.unwrap();
        let (session, step) = Session::start_read(peer(), file, false, None, RetryPolicy::default())
            .await
            .unwrap();
        match step {
            Step::Reply {
                packet: Packet::Data { block, .. },
                expect: Some(Expected::Ack { block: expected }),
            } => {
                assert_eq!(block, 1);
                assert_eq!(expected, 1);
            }
            other => panic!("expected opening DATA 1, got {:?}", other),
        }
        (dir, session)
    }

    #[tokio::test]
    async fn read_session_walks_blocks_to_completion() {
        let content = pattern(1050);
        let (_dir, mut session) = read_session_over(&content).await;

        // ACK 1 -> DATA 2 (512 bytes)
        match session.handle(&Packet::Ack { block: 1 }).await.unwrap() {
            Step::Reply {
                packet: Packet::Data { block, payload },
                ..
            } => {
                assert_eq!(block, 2);
                assert_eq!(payload.len(), 512);
                assert_eq!(&payload[..], &content[512..1024]);
            }
            other => panic!("expected DATA 2, got {:?}", other),
        }

        // ACK 2 -> DATA 3, the 26-byte final block
        match session.handle(&Packet::Ack { block: 2 }).await.unwrap() {
            Step::Reply {
                packet: Packet::Data { block, payload },
                ..
            } => {
                assert_eq!(block, 3);
                assert_eq!(payload.len(), 26);
            }
            other => panic!("expected DATA 3, got {:?}", other),
        }

        // ACK 3 ends the session.
        assert!(matches!(
            session.handle(&Packet::Ack { block: 3 }).await.unwrap(),
            Step::Done { reply: None }
        ));
        assert_eq!(session.state(), SessionState::Complete);
    }

    #[tokio::test]
    async fn duplicate_ack_is_ignored() {
        let (_dir, mut session) = read_session_over(&pattern(1050)).await;

        assert!(matches!(
            session.handle(&Packet::Ack { block: 1 }).await.unwrap(),
            Step::Reply { .. }
        ));
        // The same ACK again must not advance or resend anything.
        assert!(matches!(
            session.handle(&Packet::Ack { block: 1 }).await.unwrap(),
            Step::Ignored
        ));
        assert!(matches!(
            session.handle(&Packet::Ack { block: 9 }).await.unwrap(),
            Step::Ignored
        ));
    }

    #[tokio::test]
    async fn exact_multiple_file_ends_with_empty_block() {
        let (_dir, mut session) = read_session_over(&pattern(1024)).await;

        match session.handle(&Packet::Ack { block: 1 }).await.unwrap() {
            Step::Reply {
                packet: Packet::Data { block: 2, payload },
                ..
            } => assert_eq!(payload.len(), 512),
            other => panic!("expected DATA 2, got {:?}", other),
        }
        match session.handle(&Packet::Ack { block: 2 }).await.unwrap() {
            Step::Reply {
                packet: Packet::Data { block: 3, payload },
                ..
            } => assert!(payload.is_empty()),
            other => panic!("expected empty DATA 3, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn negotiated_read_waits_for_ack_zero() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("src.bin");
        tokio::fs::write(&path, pattern(100)).await.unwrap();
        let file = file_io::open_for_read(&path).await.unwrap();

        let oack = Packet::Oack {
            options: vec![("bigfile".to_string(), 65_536)],
        };
        let (mut session, step) =
            Session::start_read(peer(), file, true, Some(oack.clone()), RetryPolicy::default())
                .await
                .unwrap();
        match step {
            Step::Reply { packet, expect } => {
                assert_eq!(packet, oack);
                assert_eq!(expect, Some(Expected::Ack { block: 0 }));
            }
            other => panic!("expected OACK reply, got {:?}", other),
        }
        assert_eq!(session.state(), SessionState::Negotiating);

        // A premature non-zero ACK stays ignored; ACK 0 releases DATA 1.
        assert!(matches!(
            session.handle(&Packet::Ack { block: 1 }).await.unwrap(),
            Step::Ignored
        ));
        match session.handle(&Packet::Ack { block: 0 }).await.unwrap() {
            Step::Reply {
                packet: Packet::Data { block: 1, payload },
                ..
            } => assert_eq!(payload.len(), 100),
            other => panic!("expected DATA 1, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn write_session_acks_and_stores_blocks() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("dst.bin");
        let file = file_io::create_exclusive(&path).await.unwrap();

        let (mut session, step) =
            Session::start_write(peer(), file, false, None, RetryPolicy::default()).unwrap();
        match step {
            Step::Reply { packet, expect } => {
                assert_eq!(packet, Packet::Ack { block: 0 });
                assert_eq!(expect, Some(Expected::Data { block: 1 }));
            }
            other => panic!("expected ACK 0, got {:?}", other),
        }

        let first = pattern(512);
        match session
            .handle(&Packet::Data {
                block: 1,
                payload: Bytes::from(first.clone()),
            })
            .await
            .unwrap()
        {
            Step::Reply { packet, expect } => {
                assert_eq!(packet, Packet::Ack { block: 1 });
                assert_eq!(expect, Some(Expected::Data { block: 2 }));
            }
            other => panic!("expected ACK 1, got {:?}", other),
        }

        // Out-of-sequence DATA is dropped without an ACK.
        assert!(matches!(
            session
                .handle(&Packet::Data {
                    block: 5,
                    payload: Bytes::from_static(b"nope"),
                })
                .await
                .unwrap(),
            Step::Ignored
        ));

        // The short block completes the transfer.
        match session
            .handle(&Packet::Data {
                block: 2,
                payload: Bytes::from_static(b"tail"),
            })
            .await
            .unwrap()
        {
            Step::Done { reply } => assert_eq!(reply, Some(Packet::Ack { block: 2 })),
            other => panic!("expected terminal ACK 2, got {:?}", other),
        }
        assert_eq!(session.state(), SessionState::Complete);
        drop(session);

        let written = tokio::fs::read(&path).await.unwrap();
        assert_eq!(written.len(), 516);
        assert_eq!(&written[..512], &first[..]);
        assert_eq!(&written[512..], b"tail");
    }

    #[tokio::test]
    async fn exhausted_retries_fail_the_session() {
        let (_dir, mut session) = read_session_over(&pattern(10)).await;
        session.arm(vec![0, 3, 0, 1], Expected::Ack { block: 1 });

        for _ in 0..crate::retry::DEFAULT_MAX_RETRIES {
            assert!(matches!(session.on_timeout(), TimeoutStep::Resend(_)));
        }
        assert!(matches!(session.on_timeout(), TimeoutStep::Expired));
        assert_eq!(session.state(), SessionState::Failed);
        assert!(session.deadline().is_none());
    }
}
