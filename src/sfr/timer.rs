//! The timer counter.

use super::{SfrPage, SFR_IE0, SFR_IRQ0, SFR_TM0C, SFR_TM0D, SFR_TMSTR0};
use crate::interrupt::{IrqKind, IrqMailbox};
use crate::sfr::standby::Standby;
use std::sync::Arc;

/// Maskable interrupt index of the timer.
pub const TIMER_INT_INDEX: u8 = 4;

/// Counter increment per `update` call. Sized for a host driving roughly a
/// thousand ticks per second.
pub const TIMER_STEP: u16 = 16;

const TIMER_IRQ_BIT: u8 = 0x20;

/// Single-channel timer. `update` belongs to the periodic thread; the other
/// entry points to the core thread.
pub struct Timer {
    page: Arc<SfrPage>,
    standby: Arc<Standby>,
    mailbox: Arc<IrqMailbox>,
}

impl Timer {
    pub(crate) fn new(page: Arc<SfrPage>, standby: Arc<Standby>, mailbox: Arc<IrqMailbox>) -> Self {
        Self {
            page,
            standby,
            mailbox,
        }
    }

    /// Advances the counter by [`TIMER_STEP`] when started. Reaching the
    /// reload value resets the counter, raises IRQ0 bit 5 and, if that
    /// interrupt is enabled, wakes the core from standby.
    pub fn update(&self) {
        if self.page.load(SFR_TMSTR0) & 0x01 == 0 {
            return;
        }
        let reload = self.page.load_word(SFR_TM0D);
        let counter = self.page.load_word(SFR_TM0C).wrapping_add(TIMER_STEP);
        if counter >= reload {
            self.page.store_word(SFR_TM0C, 0);
            self.page.fetch_or(SFR_IRQ0, TIMER_IRQ_BIT);
            if self.page.load(SFR_IE0) & TIMER_IRQ_BIT != 0 {
                self.standby.wake();
            }
        } else {
            self.page.store_word(SFR_TM0C, counter);
        }
    }

    /// Posts a maskable request when the timer IRQ is raised and enabled.
    pub fn check_interrupt(&self) {
        if self.page.load(SFR_IRQ0) & self.page.load(SFR_IE0) & TIMER_IRQ_BIT != 0 {
            self.mailbox.send(IrqKind::Mi, TIMER_INT_INDEX);
        }
    }

    /// Clears the timer bit in IRQ0.
    pub fn clear_irq(&self) {
        self.page.fetch_and(SFR_IRQ0, !TIMER_IRQ_BIT);
    }
}
