//! Attempt lifecycle.
//!
//! ```text
//! IDLE -> CONNECTING -> AWAITING_RESPONSE | AWAITING_READY -> COMPLETED
//! ```
//!
//! COMPLETED is terminal and reachable from every other phase. The harness
//! owns the only commit point: whichever of {probe outcome, deadline} calls
//! [`Attempt::commit`] first decides the cause, every later caller is told
//! it lost and must not touch the result.

use crate::error::ProbeError;
use std::fmt;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU8, Ordering};

/// Where an attempt currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Phase {
    Idle = 0,
    Connecting = 1,
    AwaitingResponse = 2,
    AwaitingReady = 3,
    Completed = 4,
}

impl Phase {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Phase::Idle,
            1 => Phase::Connecting,
            2 => Phase::AwaitingResponse,
            3 => Phase::AwaitingReady,
            _ => Phase::Completed,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Idle => write!(f, "IDLE"),
            Phase::Connecting => write!(f, "CONNECTING"),
            Phase::AwaitingResponse => write!(f, "AWAITING_RESPONSE"),
            Phase::AwaitingReady => write!(f, "AWAITING_READY"),
            Phase::Completed => write!(f, "COMPLETED"),
        }
    }
}

/// Why an attempt completed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cause {
    Success,
    ProtocolError,
    ConnectionError,
    Timeout,
}

impl Cause {
    /// Cause matching a probe's own outcome
    pub fn of<T>(outcome: &Result<T, ProbeError>) -> Self {
        match outcome {
            Ok(_) => Cause::Success,
            Err(ProbeError::Protocol(_)) => Cause::ProtocolError,
            Err(ProbeError::Connection(_)) => Cause::ConnectionError,
            Err(ProbeError::Timeout(_)) => Cause::Timeout,
        }
    }
}

/// State shared between the harness and the probe for one attempt
#[derive(Debug)]
pub struct Attempt {
    phase: AtomicU8,
    cause: Mutex<Option<Cause>>,
}

impl Default for Attempt {
    fn default() -> Self {
        Self::new()
    }
}

impl Attempt {
    pub fn new() -> Self {
        Self {
            phase: AtomicU8::new(Phase::Idle as u8),
            cause: Mutex::new(None),
        }
    }

    /// Record that the probe reached a suspension point.
    ///
    /// Ignored once the attempt has completed, and `Completed` itself can
    /// only be entered through [`Attempt::commit`].
    pub fn enter(&self, phase: Phase) {
        if phase == Phase::Completed {
            return;
        }
        let _ = self
            .phase
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current != Phase::Completed as u8).then_some(phase as u8)
            });
    }

    /// Current phase
    pub fn phase(&self) -> Phase {
        Phase::from_u8(self.phase.load(Ordering::Acquire))
    }

    /// Cause the attempt completed with, if it has
    pub fn cause(&self) -> Option<Cause> {
        *self.cause.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_completed(&self) -> bool {
        self.phase() == Phase::Completed
    }

    /// Commit the terminal cause. Returns false if another cause already won.
    pub fn commit(&self, cause: Cause) -> bool {
        let mut slot = self.cause.lock().unwrap_or_else(|e| e.into_inner());
        if slot.is_some() {
            return false;
        }
        *slot = Some(cause);
        self.phase.store(Phase::Completed as u8, Ordering::Release);
        true
    }
}
