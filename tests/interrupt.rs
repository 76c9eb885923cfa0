//! Interrupt delivery, DSR masking, standby and peripheral scenarios.

mod common;

use common::{machine, machine_with_keys, rom, set_word, step_ok, SharedKeys, PROGRAM_BASE};
use std::thread;
use std::time::Duration;
use u8core::sfr::timer::TIMER_INT_INDEX;
use u8core::sfr::{SFR_IE0, SFR_KIM0, SFR_KO0, SFR_SBYCON, SFR_STPACP, SFR_TM0D, SFR_TMSTR0};
use u8core::{CoreStatus, IrqKind, StandbyState};

const TIMER_HANDLER: u16 = 0x0100;
const NMI_HANDLER: u16 = 0x0200;

/// ROM with the timer vector (index 4) and the NMI vector populated, an EI
/// at the entry point followed by NOPs, and RTI at the timer handler.
fn rom_with_handlers(program: &[u16]) -> Vec<u8> {
    let mut image = rom(program);
    set_word(&mut image, 0x0004, NMI_HANDLER);
    set_word(&mut image, 0x0008 + 4 * 4, TIMER_HANDLER);
    set_word(&mut image, usize::from(TIMER_HANDLER), 0xFE0F); // RTI
    set_word(&mut image, usize::from(NMI_HANDLER), 0xFE8F); // NOP
    image
}

#[test]
fn timer_interrupt_is_delivered_and_returns() {
    // EI; NOP; NOP
    let (mut core, peripherals) = machine(rom_with_handlers(&[0xED08, 0xFE8F, 0xFE8F]));
    core.mmu.data_write(0, SFR_IE0, 1, 0x20);
    core.mmu.data_write(0, SFR_TM0D, 2, u64::from(u8core::sfr::timer::TIMER_STEP));
    core.mmu.data_write(0, SFR_TMSTR0, 1, 1);

    step_ok(&mut core); // EI
    assert!(core.regs.psw.mie());

    peripherals.tick(); // counter reaches TM0D, IRQ0 bit 5 rises
    peripherals.check_pending();
    assert_eq!(core.mailbox().pending(), (IrqKind::Mi, TIMER_INT_INDEX));

    let pc_before = core.regs.pc;
    assert_eq!(core.handle_interrupt(), Some(TIMER_INT_INDEX));
    peripherals.clear_irq(TIMER_INT_INDEX);

    assert_eq!(core.regs.pc, TIMER_HANDLER);
    assert_eq!(core.regs.csr, 0);
    assert_eq!(core.regs.psw.elevel(), 1);
    assert!(!core.regs.psw.mie(), "acceptance clears MIE");
    assert_eq!(core.regs.elr[0], pc_before);
    assert!(core.regs.epsw[0].mie(), "the shadow keeps the old PSW");
    assert_eq!(core.mailbox().pending().0, IrqKind::None, "slot cleared");

    step_ok(&mut core); // RTI
    assert_eq!(core.regs.pc, pc_before);
    assert_eq!(core.regs.psw.elevel(), 0);
    assert!(core.regs.psw.mie(), "RTI restores the interrupted PSW");
}

#[test]
fn maskable_delivery_is_gated() {
    let (mut core, _p) = machine(rom_with_handlers(&[0xFE8F; 4]));

    // MIE clear: nothing happens, the request stays pending
    core.mailbox().send(IrqKind::Mi, TIMER_INT_INDEX);
    assert_eq!(core.handle_interrupt(), None);
    assert_eq!(core.mailbox().pending().0, IrqKind::Mi);
    assert!(core.mailbox().is_checked(), "the core did look");

    // ELevel 2 blocks maskable delivery even with MIE set
    core.regs.psw.set_mie(true);
    core.regs.psw.set_elevel(2);
    assert_eq!(core.handle_interrupt(), None);

    // back at level 0 the pending request goes through
    core.regs.psw.set_elevel(0);
    assert_eq!(core.handle_interrupt(), Some(TIMER_INT_INDEX));
    assert_eq!(core.regs.pc, TIMER_HANDLER);
}

#[test]
fn nmi_preempts_unconditionally() {
    let (mut core, _p) = machine(rom_with_handlers(&[0xFE8F; 2]));
    core.regs.psw.set_elevel(1);
    let pc_before = core.regs.pc;

    core.mailbox().send(IrqKind::Nmi, 0);
    assert_eq!(core.handle_interrupt(), None, "NMI reports no maskable index");

    assert_eq!(core.regs.pc, NMI_HANDLER);
    assert_eq!(core.regs.psw.elevel(), 2);
    assert_eq!(core.regs.elr[1], pc_before, "tier-2 shadow set");
    assert_eq!(core.mailbox().pending().0, IrqKind::None);
}

#[test]
fn dsr_prefix_masks_delivery_for_one_instruction() {
    // _LDSR R0; MOV R5, R6
    let (mut core, _p) = machine(rom_with_handlers(&[0x900F, 0x8560]));
    core.regs.set_r(0, 2);
    core.regs.psw.set_mie(true);
    core.mailbox().send(IrqKind::Mi, TIMER_INT_INDEX);

    step_ok(&mut core); // _LDSR R0
    assert_eq!(core.dsr(), 2);
    assert_eq!(
        core.handle_interrupt(),
        None,
        "no delivery between the prefix and its successor"
    );
    assert_eq!(core.mailbox().pending().0, IrqKind::Mi, "still pending");

    step_ok(&mut core); // MOV R5, R6
    assert_eq!(core.handle_interrupt(), Some(TIMER_INT_INDEX));
}

#[test]
fn brk_promotes_to_tier_2_and_resets_above() {
    let mut image = rom_with_handlers(&[0xFFFF]); // BRK
    set_word(&mut image, usize::from(NMI_HANDLER), 0xFFFF); // BRK again
    let (mut core, _p) = machine(image);

    step_ok(&mut core);
    assert_eq!(core.regs.psw.elevel(), 2);
    assert_eq!(core.regs.pc, NMI_HANDLER);
    assert_eq!(core.regs.elr[1], PROGRAM_BASE + 2);

    // a second BRK at tier 2 resets the core
    step_ok(&mut core);
    assert_eq!(core.regs.pc, PROGRAM_BASE);
    assert_eq!(u8::from(core.regs.psw), 0);
    assert_eq!(core.regs.csr, 0);
}

#[test]
fn halt_requires_no_knock_and_wakes_on_timer() {
    let (mut core, peripherals) = machine(rom_with_handlers(&[0xFE8F]));
    core.mmu.data_write(0, SFR_IE0, 1, 0x20);
    core.mmu.data_write(0, SFR_TM0D, 2, 0);
    core.mmu.data_write(0, SFR_TMSTR0, 1, 1);

    core.mmu.data_write(0, SFR_SBYCON, 1, 0x01);
    assert_eq!(core.standby().state(), StandbyState::Halted);

    peripherals.tick();
    assert_eq!(core.standby().state(), StandbyState::Running);
}

#[test]
fn stop_needs_the_stpacp_knock() {
    let (mut core, _p) = machine(rom_with_handlers(&[0xFE8F]));

    core.mmu.data_write(0, SFR_SBYCON, 1, 0x02);
    assert_eq!(core.standby().state(), StandbyState::Running, "no knock yet");

    core.mmu.data_write(0, SFR_STPACP, 1, 0x50);
    core.mmu.data_write(0, SFR_STPACP, 1, 0xA0);
    core.mmu.data_write(0, SFR_SBYCON, 1, 0x02);
    assert_eq!(core.standby().state(), StandbyState::Stopped);
}

#[test]
fn delivery_wakes_a_stopped_core() {
    let (mut core, _p) = machine(rom_with_handlers(&[0xFE8F]));
    core.mmu.data_write(0, SFR_STPACP, 1, 0x50);
    core.mmu.data_write(0, SFR_STPACP, 1, 0xA0);
    core.mmu.data_write(0, SFR_SBYCON, 1, 0x02);
    assert_eq!(core.standby().state(), StandbyState::Stopped);

    core.mailbox().send(IrqKind::Nmi, 0);
    core.handle_interrupt();
    assert_eq!(core.standby().state(), StandbyState::Running);
}

#[test]
fn keyboard_scan_from_a_ko_write_raises_the_irq() {
    let keys = SharedKeys::released();
    // ST R0, [EA] aimed at KO0
    let (mut core, _p) = machine_with_keys(
        rom_with_handlers(&[0x9031]),
        Box::new(keys.clone()),
    );
    core.mmu.data_write(0, SFR_KIM0, 2, 0x0008);
    keys.press(0x0008);

    core.regs.ea = SFR_KO0;
    core.regs.set_r(0, 0x01);
    step_ok(&mut core);

    let (irq0, _) = core.mmu.data_read(0, u8core::sfr::SFR_IRQ0, 1);
    assert_ne!(irq0 & 0x02, 0, "keyboard IRQ raised by the synchronous scan");
}

#[test]
fn periodic_thread_wakes_a_halted_core() {
    let keys = SharedKeys::released();
    let (mut core, peripherals) = machine_with_keys(
        rom_with_handlers(&[0xFE8F]),
        Box::new(keys.clone()),
    );
    core.mmu.data_write(0, SFR_KO0, 2, 0x0001);
    core.mmu.data_write(0, SFR_KIM0, 2, 0x0008);
    core.mmu.data_write(0, SFR_SBYCON, 1, 0x01);
    assert_eq!(core.standby().state(), StandbyState::Halted);

    keys.press(0x0008);
    let ticker = thread::spawn(move || {
        for _ in 0..16 {
            peripherals.tick();
            thread::sleep(Duration::from_millis(1));
        }
    });
    ticker.join().expect("ticker thread must finish");

    assert_eq!(core.standby().state(), StandbyState::Running);
}

#[test]
fn illegal_and_unimplemented_do_not_commit_prefix_state() {
    // _LDSR #1 then an illegal word: the DSR window must survive the
    // illegal instruction (its bookkeeping is skipped), so the following
    // load still reads through DSR
    let mut image = rom(&[0xE301, 0xCF00, 0x9030]);
    set_word(&mut image, 0x1_0000, 0x0055);
    let (mut core, _p) = machine(image);
    core.regs.set_r(0, 0);
    core.regs.ea = 0;

    step_ok(&mut core);
    core.regs.set_r(0, 0); // make the later assert unambiguous
    assert_eq!(core.step(), CoreStatus::IllegalInstruction);
    step_ok(&mut core);
    assert_eq!(core.regs.r(0), 0x55, "prefix still armed after the illegal word");
}
