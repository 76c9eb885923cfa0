//! Special function registers.
//!
//! The SFR page is the top 4 KiB of data segment 0. Its backing bytes are
//! per-byte atomics because the host's periodic thread shares a handful of
//! them (`IRQ0`, `KI`, `TM0C`) with the core thread; bit set/clear traffic on
//! `IRQ0` goes through `fetch_or`/`fetch_and` so neither side loses updates.
//!
//! Dispatch works like the rest of the memory map: the MMU routes every byte
//! of the page here, and a switch on the offset gives each register its read
//! and write semantics. Offsets without special behavior act as plain RAM.

pub mod keyboard;
pub mod standby;
pub mod timer;

use self::keyboard::{KeySource, Keyboard, KEYBOARD_INT_INDEX};
use self::standby::{Standby, StopAcceptor};
use self::timer::{Timer, TIMER_INT_INDEX};
use crate::interrupt::IrqMailbox;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// Data segment register (canonical storage; the core reads it from here)
pub const SFR_DSR: u16 = 0xF000;
/// STOP acceptor knock register
pub const SFR_STPACP: u16 = 0xF008;
/// Standby control
pub const SFR_SBYCON: u16 = 0xF009;
/// Interrupt enable 0
pub const SFR_IE0: u16 = 0xF010;
/// Interrupt request 0
pub const SFR_IRQ0: u16 = 0xF014;
/// Timer 0 reload value (16-bit)
pub const SFR_TM0D: u16 = 0xF020;
/// Timer 0 counter (16-bit; writes clear it)
pub const SFR_TM0C: u16 = 0xF022;
/// Timer 0 start
pub const SFR_TMSTR0: u16 = 0xF025;
/// Keyboard input lines (latched by scans)
pub const SFR_KI0: u16 = 0xF040;
pub const SFR_KI1: u16 = 0xF041;
/// Keyboard input mask
pub const SFR_KIM0: u16 = 0xF042;
/// Keyboard output mask
pub const SFR_KOM0: u16 = 0xF044;
/// Keyboard output lines (writes trigger a scan)
pub const SFR_KO0: u16 = 0xF046;
pub const SFR_KO1: u16 = 0xF047;

/// Size of the SFR page in bytes.
pub const SFR_PAGE_SIZE: usize = 0x1000;

/// The shared backing bytes of the SFR page.
pub struct SfrPage {
    bytes: [AtomicU8; SFR_PAGE_SIZE],
}

impl SfrPage {
    pub fn new() -> Self {
        Self {
            bytes: std::array::from_fn(|_| AtomicU8::new(0)),
        }
    }

    fn slot(&self, offset: u16) -> &AtomicU8 {
        &self.bytes[usize::from(offset) & (SFR_PAGE_SIZE - 1)]
    }

    pub fn load(&self, offset: u16) -> u8 {
        self.slot(offset).load(Ordering::Relaxed)
    }

    pub fn store(&self, offset: u16, value: u8) {
        self.slot(offset).store(value, Ordering::Relaxed);
    }

    /// Atomically sets bits; both threads use this for `IRQ0`.
    pub fn fetch_or(&self, offset: u16, mask: u8) -> u8 {
        self.slot(offset).fetch_or(mask, Ordering::AcqRel)
    }

    /// Atomically clears bits.
    pub fn fetch_and(&self, offset: u16, mask: u8) -> u8 {
        self.slot(offset).fetch_and(mask, Ordering::AcqRel)
    }

    /// Reads a 16-bit register as two byte loads, low byte first. The pair is
    /// not read atomically; the sharing discipline only guarantees
    /// step-boundary visibility.
    pub fn load_word(&self, offset: u16) -> u16 {
        u16::from_le_bytes([self.load(offset), self.load(offset.wrapping_add(1))])
    }

    pub fn store_word(&self, offset: u16, value: u16) {
        let [lo, hi] = value.to_le_bytes();
        self.store(offset, lo);
        self.store(offset.wrapping_add(1), hi);
    }
}

impl Default for SfrPage {
    fn default() -> Self {
        Self::new()
    }
}

/// Host-registered SFR behavior. Called before the built-in dispatch; a
/// `Some` return value overrides it entirely for that access.
pub type SfrHook = Box<dyn FnMut(u16, u8, bool) -> Option<u8> + Send>;

/// The timer and keyboard bundled behind one handle. `tick` is the periodic
/// thread's entry point; everything else runs on the core thread.
pub struct Peripherals {
    pub timer: Timer,
    pub keyboard: Keyboard,
}

impl Peripherals {
    pub(crate) fn new(
        page: &Arc<SfrPage>,
        standby: &Arc<Standby>,
        mailbox: &Arc<IrqMailbox>,
        keys: Box<dyn KeySource>,
    ) -> Self {
        Self {
            timer: Timer::new(Arc::clone(page), Arc::clone(standby), Arc::clone(mailbox)),
            keyboard: Keyboard::new(
                Arc::clone(page),
                Arc::clone(standby),
                Arc::clone(mailbox),
                keys,
            ),
        }
    }

    /// Advances both peripherals by one period. Safe to call from a thread
    /// other than the core's; only the shared SFR bytes are touched.
    pub fn tick(&self) {
        self.timer.update();
        self.keyboard.update();
    }

    /// Turns raised-and-enabled IRQ bits into mailbox requests. Core thread,
    /// between steps.
    pub fn check_pending(&self) {
        self.timer.check_interrupt();
        self.keyboard.check_interrupt();
    }

    /// Drops the IRQ0 bit of a delivered interrupt.
    pub fn clear_irq(&self, index: u8) {
        match index {
            TIMER_INT_INDEX => self.timer.clear_irq(),
            KEYBOARD_INT_INDEX => self.keyboard.clear_irq(),
            _ => {}
        }
    }

    pub(crate) fn scan_keyboard(&self) {
        self.keyboard.scan();
    }
}

/// The SFR dispatcher. Owned by the MMU; all accesses to the SFR page land
/// in [`Sfr::handle`].
pub struct Sfr {
    page: Arc<SfrPage>,
    standby: Arc<Standby>,
    peripherals: Arc<Peripherals>,
    acceptor: StopAcceptor,
    hook: Option<SfrHook>,
}

impl Sfr {
    pub fn new(page: Arc<SfrPage>, standby: Arc<Standby>, peripherals: Arc<Peripherals>) -> Self {
        Self {
            page,
            standby,
            peripherals,
            acceptor: StopAcceptor::new(),
            hook: None,
        }
    }

    /// Registers a host SFR handler consulted ahead of the built-in table.
    pub fn set_hook(&mut self, hook: SfrHook) {
        self.hook = Some(hook);
    }

    pub fn page(&self) -> &Arc<SfrPage> {
        &self.page
    }

    pub(crate) fn dsr(&self) -> u8 {
        self.page.load(SFR_DSR)
    }

    pub(crate) fn set_dsr(&self, value: u8) {
        self.page.store(SFR_DSR, value);
    }

    /// Per-byte read/write semantics of the page.
    pub(crate) fn handle(&mut self, offset: u16, data: u8, is_write: bool) -> u8 {
        if let Some(hook) = self.hook.as_mut() {
            if let Some(value) = hook(offset, data, is_write) {
                return value;
            }
        }

        match offset {
            SFR_DSR => {
                if is_write {
                    self.page.store(SFR_DSR, data);
                }
                self.page.load(SFR_DSR)
            }
            SFR_STPACP => {
                if is_write {
                    self.acceptor.write(data);
                }
                0
            }
            SFR_SBYCON => {
                if is_write {
                    if data & 0x01 != 0 {
                        self.standby.enter_halt();
                    }
                    if data & 0x02 != 0 && self.acceptor.armed() {
                        self.standby.enter_stop();
                        self.acceptor.reset();
                    }
                }
                0
            }
            // any write resets the counter, both bytes
            SFR_TM0C => {
                if is_write {
                    self.page.store(offset, 0);
                }
                self.page.load(offset)
            }
            o if o == SFR_TM0C + 1 => {
                if is_write {
                    self.page.store(offset, 0);
                }
                self.page.load(offset)
            }
            SFR_TMSTR0 => {
                if is_write {
                    self.page.store(offset, data & 0x01);
                }
                0
            }
            // input latches; instruction-side writes are ignored
            SFR_KI0 | SFR_KI1 => self.page.load(offset),
            SFR_KO0 | SFR_KO1 => {
                if is_write {
                    self.page.store(offset, data);
                    self.peripherals.scan_keyboard();
                }
                self.page.load(offset)
            }
            // IE0/IRQ0, TM0D, KIM/KOM and everything else: plain RAM
            _ => {
                if is_write {
                    self.page.store(offset, data);
                }
                self.page.load(offset)
            }
        }
    }
}
