//! The keyboard matrix scanner.

use super::{SfrPage, SFR_IE0, SFR_IRQ0, SFR_KI0, SFR_KIM0, SFR_KO0, SFR_KOM0};
use crate::interrupt::{IrqKind, IrqMailbox};
use crate::sfr::standby::Standby;
use std::sync::Arc;

/// Maskable interrupt index of the keyboard.
pub const KEYBOARD_INT_INDEX: u8 = 0;

const KEYBOARD_IRQ_BIT: u8 = 0x02;

/// Source of the `KI` input lines. Given the scanned output lines
/// (`KO AND NOT KOM`), returns the input lines; active-low, so a zero bit
/// means a key connects that input to a scanned output. Implementations must
/// be reentrant: the core thread and the periodic thread both scan.
pub trait KeySource: Send + Sync {
    fn ki(&self, masked_ko: u16) -> u16;
}

/// The matrix scanner. `update` belongs to the periodic thread; `scan` is
/// triggered on the core thread by writes to `KO`.
pub struct Keyboard {
    page: Arc<SfrPage>,
    standby: Arc<Standby>,
    mailbox: Arc<IrqMailbox>,
    source: Box<dyn KeySource>,
}

impl Keyboard {
    pub(crate) fn new(
        page: Arc<SfrPage>,
        standby: Arc<Standby>,
        mailbox: Arc<IrqMailbox>,
        source: Box<dyn KeySource>,
    ) -> Self {
        Self {
            page,
            standby,
            mailbox,
            source,
        }
    }

    /// Consults the key source with the masked output lines, latches `KI`,
    /// and raises IRQ0 bit 1 when an unmasked key is down. Returns whether a
    /// key was seen.
    fn latch(&self) -> bool {
        let ko = self.page.load_word(SFR_KO0);
        let kom = self.page.load_word(SFR_KOM0);
        let ki = self.source.ki(ko & !kom);
        self.page.store_word(SFR_KI0, ki);

        let pressed = !ki & self.page.load_word(SFR_KIM0) != 0;
        if pressed {
            self.page.fetch_or(SFR_IRQ0, KEYBOARD_IRQ_BIT);
        }
        pressed
    }

    /// Synchronous scan on the core thread, from a `KO` write.
    pub(crate) fn scan(&self) {
        self.latch();
    }

    /// Periodic scan; additionally wakes the core when a key is down.
    pub fn update(&self) {
        if self.latch() {
            self.standby.wake();
        }
    }

    /// Posts a maskable request when the keyboard IRQ is raised and enabled.
    pub fn check_interrupt(&self) {
        if self.page.load(SFR_IRQ0) & self.page.load(SFR_IE0) & KEYBOARD_IRQ_BIT != 0 {
            self.mailbox.send(IrqKind::Mi, KEYBOARD_INT_INDEX);
        }
    }

    /// Clears the keyboard bit in IRQ0.
    pub fn clear_irq(&self) {
        self.page.fetch_and(SFR_IRQ0, !KEYBOARD_IRQ_BIT);
    }
}
