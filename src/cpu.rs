//! The core itself: fetch/execute stepping, reset, standby coordination and
//! interrupt delivery.
//!
//! A step runs to completion on the core thread; interrupt delivery is only
//! checked between instructions, through [`Core::handle_interrupt`]. The DSR
//! prefix instructions arm a one-shot segment selector for the following
//! instruction and hold maskable delivery off until it has run.

mod execute;

use crate::interrupt::{IrqKind, IrqMailbox};
use crate::mmu::Mmu;
use crate::registers::{Psw, Registers};
use crate::sfr::keyboard::KeySource;
use crate::sfr::standby::Standby;
use crate::sfr::{Peripherals, Sfr, SfrPage};
use derive_more::Display;
use std::fmt;
use std::sync::Arc;

/// Vector taken by NMI and by BRK promotion.
const NMI_VECTOR: u16 = 0x0004;
/// First maskable vector; index `n` vectors through `0x0008 + n * 4`.
const MI_VECTOR_BASE: u16 = 0x0008;

/// Outcome of a core operation. None of these abort the host; it decides
/// whether to keep stepping.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display)]
pub enum CoreStatus {
    #[display(fmt = "ok")]
    Ok,
    #[display(fmt = "a write to read-only memory was discarded")]
    ReadOnly,
    #[display(fmt = "unimplemented instruction")]
    Unimplemented,
    #[display(fmt = "illegal instruction")]
    IllegalInstruction,
    #[display(fmt = "memory is not initialized")]
    MemoryUninitialized,
}

/// Which segment the next data access selects: page 0, or the DSR value
/// armed by a prefix instruction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum DataAccessPage {
    Page0,
    Dsr,
}

/// The emulated core. Owns the register file and the MMU; shares the SFR
/// page, standby cell and interrupt mailbox with the peripherals.
pub struct Core {
    pub regs: Registers,
    pub mmu: Mmu,
    mailbox: Arc<IrqMailbox>,
    standby: Arc<Standby>,
    /// Cycles taken by the last instruction
    cycle_count: u32,
    /// Remaining cycles during which maskable delivery is held off
    int_mask_cycle: u32,
    /// One-shot segment selector armed by the DSR prefix
    next_access: DataAccessPage,
    /// One-cycle bus-conflict stall after an `[EA+]` post-increment
    ea_inc_delay: u32,
}

impl Core {
    /// Builds a core together with its peripherals. The returned handle is
    /// what the host's periodic thread drives; memory still has to be
    /// attached through [`Mmu::init`] before the core can run.
    pub fn new(keys: Box<dyn KeySource>) -> (Self, Arc<Peripherals>) {
        let page = Arc::new(SfrPage::new());
        let standby = Arc::new(Standby::new());
        let mailbox = Arc::new(IrqMailbox::new());
        let peripherals = Arc::new(Peripherals::new(&page, &standby, &mailbox, keys));
        let sfr = Sfr::new(page, Arc::clone(&standby), Arc::clone(&peripherals));
        let core = Self {
            regs: Registers::new(),
            mmu: Mmu::new(sfr),
            mailbox,
            standby,
            cycle_count: 0,
            int_mask_cycle: 0,
            next_access: DataAccessPage::Page0,
            ea_inc_delay: 0,
        };
        (core, peripherals)
    }

    /// The shared interrupt mailbox; external interrupt sources post here.
    pub fn mailbox(&self) -> Arc<IrqMailbox> {
        Arc::clone(&self.mailbox)
    }

    /// The shared standby cell. While it is active the host should skip
    /// stepping until a wake hook clears it.
    pub fn standby(&self) -> Arc<Standby> {
        Arc::clone(&self.standby)
    }

    /// Cycles taken by the most recently executed instruction.
    pub fn cycle_count(&self) -> u32 {
        self.cycle_count
    }

    /// The data segment register, read through its canonical SFR byte.
    pub fn dsr(&self) -> u8 {
        self.mmu.sfr().dsr()
    }

    pub fn set_dsr(&self, value: u8) {
        self.mmu.sfr().set_dsr(value);
    }

    /// Zeroes every architectural register.
    pub fn zero(&mut self) {
        self.regs.zero();
        self.set_dsr(0);
    }

    /// Resets the core: clears PSW, CSR and DSR, then loads the initial SP
    /// and PC from the reset vectors at code address 0.
    pub fn reset(&mut self) -> CoreStatus {
        if !self.mmu.is_inited() {
            return CoreStatus::MemoryUninitialized;
        }
        self.regs.psw = Psw::new();
        self.regs.csr = 0;
        self.set_dsr(0);

        let (sp, _) = self.mmu.code_word(0, 0x0000);
        self.regs.sp = sp;
        let (pc, _) = self.mmu.code_word(0, 0x0002);
        self.regs.pc = pc & 0xFFFE;

        self.int_mask_cycle = 0;
        self.next_access = DataAccessPage::Page0;
        self.ea_inc_delay = 0;
        self.cycle_count = 0;
        CoreStatus::Ok
    }

    /// Executes one instruction: fetch, decode, execute, and the post-step
    /// bookkeeping that drives the DSR prefix and interrupt-mask windows.
    pub fn step(&mut self) -> CoreStatus {
        self.cycle_count = 0;
        if !self.mmu.is_inited() {
            return CoreStatus::MemoryUninitialized;
        }

        let word = self.fetch_word();
        let executed = self.execute(word);

        // an instruction that completed commits the one-shot state, even if
        // one of its writes bounced off read-only memory
        if matches!(executed.status, CoreStatus::Ok | CoreStatus::ReadOnly) {
            self.ea_inc_delay = u32::from(executed.ea_increment);
            self.next_access = if executed.dsr_prefix {
                DataAccessPage::Dsr
            } else {
                DataAccessPage::Page0
            };
            self.int_mask_cycle = self.int_mask_cycle.saturating_sub(self.cycle_count);
            if executed.dsr_prefix && self.int_mask_cycle == 0 {
                self.int_mask_cycle = 1;
            }
        }
        executed.status
    }

    /// Reads the interrupt mailbox between instructions. An NMI is delivered
    /// unconditionally to tier 2; a maskable request is delivered to tier 1
    /// when every gating condition holds, and is left pending otherwise.
    /// Returns the index of an accepted maskable interrupt.
    pub fn handle_interrupt(&mut self) -> Option<u8> {
        self.mailbox.mark_checked();
        let (kind, index) = self.mailbox.pending();
        match kind {
            IrqKind::Nmi => {
                self.enter_exception(2, NMI_VECTOR);
                self.mailbox.clear();
                None
            }
            IrqKind::Mi => {
                if self.accepts_maskable() {
                    self.enter_exception(1, MI_VECTOR_BASE + u16::from(index) * 4);
                    self.mailbox.clear();
                    log::trace!("maskable interrupt {index} delivered");
                    Some(index)
                } else {
                    None
                }
            }
            IrqKind::None => None,
        }
    }

    /// Maskable gating: interrupts enabled, no DSR-prefix window open, and
    /// the current tier interruptible by a tier-1 source.
    fn accepts_maskable(&self) -> bool {
        self.regs.psw.mie() && self.int_mask_cycle == 0 && self.regs.psw.elevel() < 2
    }

    /// Commits an exception entry: saves `(PC, CSR, PSW)` into the target
    /// tier's shadow set and vectors through code segment 0.
    fn enter_exception(&mut self, tier: u8, vector: u16) {
        let shadow = usize::from(tier - 1);
        self.regs.elr[shadow] = self.regs.pc;
        self.regs.ecsr[shadow] = self.regs.csr;
        self.regs.epsw[shadow] = self.regs.psw;
        self.regs.psw.set_elevel(tier);
        self.regs.psw.set_mie(false);

        let (target, _) = self.mmu.code_word(0, vector);
        self.regs.pc = target & 0xFFFE;
        self.regs.csr = 0;
        self.standby.wake();
    }

    /// Fetches the code word at `CSR:PC` and advances PC, keeping it even.
    fn fetch_word(&mut self) -> u16 {
        let (word, _) = self.mmu.code_word(self.regs.csr, self.regs.pc);
        self.regs.pc = self.regs.pc.wrapping_add(2) & 0xFFFE;
        word
    }

    /// Segment for the next data access: 0, or DSR under an armed prefix.
    fn data_seg(&self) -> u8 {
        match self.next_access {
            DataAccessPage::Dsr => self.dsr(),
            DataAccessPage::Page0 => 0,
        }
    }
}

impl fmt::Display for Core {
    /// Register dump in the debugger format.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "======== Register values ========")?;
        writeln!(f, " General registers:")?;
        for i in 0..16 {
            let value = self.regs.r(i);
            writeln!(f, "\tR{i:<2} = {value:02X}h ({value:3})")?;
        }
        writeln!(f)?;
        for i in (0..16).step_by(2) {
            writeln!(f, "\tER{i:<2} = {:04X}h", self.regs.er(i as u8))?;
        }
        writeln!(f, "\n Control registers:")?;
        writeln!(f, "\tCSR:PC = {:01X}:{:04X}h", self.regs.csr, self.regs.pc)?;
        writeln!(
            f,
            "\t\tCode words at CSR:PC: {:04X} {:04X}",
            self.mmu.peek_code_word(self.regs.csr, self.regs.pc),
            self.mmu
                .peek_code_word(self.regs.csr, self.regs.pc.wrapping_add(2)),
        )?;
        writeln!(f, "\tSP = {:04X}h", self.regs.sp)?;
        writeln!(f, "\tDSR = {:02X}h", self.dsr())?;
        writeln!(f, "\tEA = {:04X}h", self.regs.ea)?;
        let psw = self.regs.psw;
        writeln!(f, "\tPSW = {:02X}h", u8::from(psw))?;
        writeln!(
            f,
            "\t\tC Z S V I H ELevel\n\t\t{} {} {} {} {} {}  {}",
            u8::from(psw.c()),
            u8::from(psw.z()),
            u8::from(psw.s()),
            u8::from(psw.ov()),
            u8::from(psw.mie()),
            u8::from(psw.hc()),
            psw.elevel(),
        )?;
        writeln!(
            f,
            "\n\tLCSR:LR = {:01X}:{:04X}h",
            self.regs.lcsr, self.regs.lr
        )?;
        for i in 0..3 {
            writeln!(
                f,
                "\tECSR{n}:ELR{n} = {:01X}:{:04X}h",
                self.regs.ecsr[i],
                self.regs.elr[i],
                n = i + 1,
            )?;
        }
        writeln!(f)?;
        for i in 0..3 {
            writeln!(f, "\tEPSW{} = {:02X}h", i + 1, u8::from(self.regs.epsw[i]))?;
        }
        write!(f, "========       End       ========")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoKeys;

    impl KeySource for NoKeys {
        fn ki(&self, _masked_ko: u16) -> u16 {
            0xFFFF
        }
    }

    #[test]
    fn operations_without_memory_report_uninitialized() {
        let (mut core, _peripherals) = Core::new(Box::new(NoKeys));
        assert_eq!(core.reset(), CoreStatus::MemoryUninitialized);
        assert_eq!(core.step(), CoreStatus::MemoryUninitialized);
    }

    #[test]
    fn zero_clears_registers_and_dsr() {
        let (mut core, _peripherals) = Core::new(Box::new(NoKeys));
        core.regs.set_qr(0, u64::MAX);
        core.regs.sp = 0x1234;
        core.set_dsr(0x0F);

        core.zero();
        assert_eq!(core.regs.qr(0), 0);
        assert_eq!(core.regs.sp, 0);
        assert_eq!(core.dsr(), 0);
    }
}
