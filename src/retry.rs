//! Timeout and bounded-retry state for packets that expect a reply.
//!
//! Every DATA awaiting its ACK, and every ACK/OACK awaiting the next DATA,
//! is tracked by a [`Retransmit`]: the exact wire image last sent, a matcher
//! describing the only reply that satisfies it, a deadline, and a retry
//! budget. The multiplexer's event loop sleeps until the earliest deadline
//! across all sessions; an expired one either resends the stored image or
//! signals that the budget is spent.
//!
//! A reply that does not match the expectation is a duplicate or a stale
//! packet from a lossy network. It neither advances state nor resets the
//! clock; the caller drops it and keeps waiting.

use std::time::Duration;

use tokio::time::Instant;

use crate::packet::Packet;

/// How long to wait for a reply before retransmitting.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Resend budget per in-flight packet before the session is abandoned.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Timeout and retry limits applied to every in-flight packet.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub timeout: Duration,
    pub max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            timeout: DEFAULT_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

/// The one reply that satisfies an armed retransmit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expected {
    /// An ACK for exactly this block.
    Ack { block: u16 },
    /// A DATA packet carrying exactly this block.
    Data { block: u16 },
}

impl Expected {
    pub fn matches(&self, packet: &Packet) -> bool {
        match (self, packet) {
            (Expected::Ack { block }, Packet::Ack { block: got }) => block == got,
            (Expected::Data { block }, Packet::Data { block: got, .. }) => block == got,
            _ => false,
        }
    }
}

/// What to do about an expired deadline.
#[derive(Debug)]
pub enum TimeoutAction<'a> {
    /// Resend this wire image; the deadline has been re-armed.
    Resend(&'a [u8]),
    /// The retry budget is exhausted; terminate the session.
    GiveUp,
}

/// One in-flight packet awaiting its reply.
#[derive(Debug)]
pub struct Retransmit {
    wire: Vec<u8>,
    expect: Expected,
    deadline: Instant,
    attempts_left: u32,
    timeout: Duration,
}

impl Retransmit {
    /// Arm the clock for a packet that was just sent.
    pub fn arm(policy: RetryPolicy, wire: Vec<u8>, expect: Expected) -> Self {
        Retransmit {
            wire,
            expect,
            deadline: Instant::now() + policy.timeout,
            attempts_left: policy.max_retries,
            timeout: policy.timeout,
        }
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Whether `packet` is the reply this retransmit is waiting for.
    pub fn matches(&self, packet: &Packet) -> bool {
        self.expect.matches(packet)
    }

    /// Consume one retry. Must only be called once the deadline has passed.
    pub fn on_timeout(&mut self) -> TimeoutAction<'_> {
        if self.attempts_left == 0 {
            TimeoutAction::GiveUp
        } else {
            self.attempts_left -= 1;
            self.deadline = Instant::now() + self.timeout;
            TimeoutAction::Resend(&self.wire)
        }
    }
}
