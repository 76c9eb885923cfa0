//! Standby states and the STOP-mode knock sequence.

use num_derive::FromPrimitive;
use num_traits::FromPrimitive;
use std::sync::atomic::{AtomicU8, Ordering};

/// Execution state of the core. `Halted` and `Stopped` suspend fetch and
/// execute until an interrupt (or a peripheral wake) returns the state to
/// `Running`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, FromPrimitive)]
#[repr(u8)]
pub enum StandbyState {
    Running = 0,
    Halted = 1,
    Stopped = 2,
}

/// Shared standby cell. The core thread enters standby through SFR writes;
/// both the core and the periodic thread may wake it.
pub struct Standby {
    state: AtomicU8,
}

impl Standby {
    pub const fn new() -> Self {
        Self {
            state: AtomicU8::new(StandbyState::Running as u8),
        }
    }

    pub fn state(&self) -> StandbyState {
        StandbyState::from_u8(self.state.load(Ordering::Acquire)).unwrap_or(StandbyState::Running)
    }

    /// Whether fetch/execute is currently suspended.
    pub fn is_active(&self) -> bool {
        self.state() != StandbyState::Running
    }

    pub fn wake(&self) {
        if self.state.swap(StandbyState::Running as u8, Ordering::AcqRel)
            != StandbyState::Running as u8
        {
            log::debug!("woken from standby");
        }
    }

    pub(crate) fn enter_halt(&self) {
        self.state
            .store(StandbyState::Halted as u8, Ordering::Release);
        log::debug!("entered HALT mode");
    }

    pub(crate) fn enter_stop(&self) {
        self.state
            .store(StandbyState::Stopped as u8, Ordering::Release);
        log::debug!("entered STOP mode");
    }
}

impl Default for Standby {
    fn default() -> Self {
        Self::new()
    }
}

/// The STPACP write sequence: a `0x5X` byte followed by a `0xAX` byte arms
/// STOP-mode entry; anything else resets the latch. Core thread only.
pub(crate) struct StopAcceptor(u8);

impl StopAcceptor {
    pub(crate) const fn new() -> Self {
        Self(0)
    }

    pub(crate) fn write(&mut self, data: u8) {
        self.0 = match (self.0, data & 0xF0) {
            (0, 0x50) => 1,
            (1, 0xA0) => 2,
            _ => 0,
        };
    }

    pub(crate) fn armed(&self) -> bool {
        self.0 == 2
    }

    pub(crate) fn reset(&mut self) {
        self.0 = 0;
    }
}
