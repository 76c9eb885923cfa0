//! The interrupt request mailbox.
//!
//! The architecture defines at most one pending external interrupt at a time,
//! so this is a single-slot cell, not a queue. The peripheral side is the
//! only producer and the core thread the only consumer; the `checked` flag
//! carries the release-acquire handshake between them.

use num_derive::FromPrimitive;
use num_traits::FromPrimitive;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

/// Kind of a pending interrupt request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, FromPrimitive)]
#[repr(u8)]
pub enum IrqKind {
    /// Nothing pending
    None = 0,
    /// Non-maskable interrupt
    Nmi = 1,
    /// Maskable interrupt
    Mi = 2,
}

/// Single-slot pending-interrupt cell shared between the peripheral side and
/// the core thread.
pub struct IrqMailbox {
    kind: AtomicU8,
    index: AtomicU8,
    checked: AtomicBool,
}

impl IrqMailbox {
    pub const fn new() -> Self {
        Self {
            kind: AtomicU8::new(IrqKind::None as u8),
            index: AtomicU8::new(0),
            checked: AtomicBool::new(true),
        }
    }

    /// Posts an interrupt request. A previous unconsumed request is
    /// overwritten; the architecture never has more than one outstanding.
    pub fn send(&self, kind: IrqKind, index: u8) {
        self.index.store(index, Ordering::Relaxed);
        self.kind.store(kind as u8, Ordering::Release);
        self.checked.store(false, Ordering::Release);
    }

    /// Reads the pending request without consuming it.
    pub fn pending(&self) -> (IrqKind, u8) {
        let kind =
            IrqKind::from_u8(self.kind.load(Ordering::Acquire)).unwrap_or(IrqKind::None);
        (kind, self.index.load(Ordering::Relaxed))
    }

    /// Marks the slot as having been looked at by the consumer.
    pub fn mark_checked(&self) {
        self.checked.store(true, Ordering::Release);
    }

    /// Whether the core has looked at the slot since the last `send`.
    pub fn is_checked(&self) -> bool {
        self.checked.load(Ordering::Acquire)
    }

    /// Empties the slot after a request has been delivered.
    pub fn clear(&self) {
        self.kind.store(IrqKind::None as u8, Ordering::Release);
    }
}

impl Default for IrqMailbox {
    fn default() -> Self {
        Self::new()
    }
}
