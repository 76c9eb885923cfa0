//! Instruction decode and execution.
//!
//! The primary dispatch index folds the opcode nibbles of the fetched word
//! as `((word >> 8) & 0xF0) | (word & 0x0F)`; families with sub-opcodes run a
//! secondary dispatch on masks of the full word. Operand fields are the
//! destination nibble, the source nibble, and the low byte as an immediate.
//!
//! Cycle accounting mirrors the hardware model: loads pay one extra cycle
//! per ROM-window byte they touched, and instructions following an `[EA+]`
//! post-increment pay the one-cycle bus stall recorded in the core state.

use super::{Core, CoreStatus, NMI_VECTOR};
use crate::alu;
use crate::mmu::MemoryStatus;
use crate::registers::Psw;
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;

/// What one executed instruction reports back to the step loop.
pub(super) struct Executed {
    pub status: CoreStatus,
    /// The instruction used an `[EA+]` post-increment
    pub ea_increment: bool,
    /// The instruction was a DSR prefix (`_LDSR` / `_UDSR`)
    pub dsr_prefix: bool,
}

/// Condition codes of the conditional branch family. Code 0xF has no
/// encoding; decoding it fails and the instruction is illegal.
#[derive(Clone, Copy, Debug, FromPrimitive)]
enum Cond {
    Ge = 0x0,
    Lt = 0x1,
    Gt = 0x2,
    Le = 0x3,
    Ges = 0x4,
    Lts = 0x5,
    Gts = 0x6,
    Les = 0x7,
    Ne = 0x8,
    Eq = 0x9,
    Nv = 0xA,
    Ov = 0xB,
    Ps = 0xC,
    Ns = 0xD,
    Al = 0xE,
}

impl Cond {
    fn holds(self, psw: Psw) -> bool {
        match self {
            Cond::Ge => !psw.c(),
            Cond::Lt => psw.c(),
            Cond::Gt => !(psw.c() || psw.z()),
            Cond::Le => psw.c() || psw.z(),
            Cond::Ges => psw.ov() == psw.s(),
            Cond::Lts => psw.ov() != psw.s(),
            Cond::Gts => !((psw.ov() != psw.s()) || psw.z()),
            Cond::Les => (psw.ov() != psw.s()) || psw.z(),
            Cond::Ne => !psw.z(),
            Cond::Eq => psw.z(),
            Cond::Nv => !psw.ov(),
            Cond::Ov => psw.ov(),
            Cond::Ps => !psw.s(),
            Cond::Ns => psw.s(),
            Cond::Al => true,
        }
    }
}

/// Sign extends the low `bits` bits of `value`.
fn sign_extend(value: u16, bits: u8) -> u16 {
    let shift = 16 - bits;
    (((value << shift) as i16) >> shift) as u16
}

fn sign8(value: u8) -> bool {
    value & 0x80 != 0
}

impl Core {
    pub(super) fn execute(&mut self, word: u16) -> Executed {
        let index = (((word >> 8) & 0xF0) | (word & 0x0F)) as u8;
        let dst = ((word >> 8) & 0x0F) as u8;
        let src = ((word >> 4) & 0x0F) as u8;
        let imm8 = (word & 0xFF) as u8;
        let delay = self.ea_inc_delay;

        let mut status = CoreStatus::Ok;
        let mut ea_increment = false;
        let mut dsr_prefix = false;
        let mut read_only = false;

        match index {
            // MOV Rn, #imm8
            0x00..=0x0F => {
                self.cycle_count = 1;
                self.regs.set_r(dst, imm8);
                self.regs.psw = self.regs.psw.with_z(imm8 == 0).with_s(sign8(imm8));
            }

            // ADD Rn, #imm8
            0x10..=0x1F => {
                self.cycle_count = 1;
                let (value, psw) = alu::add(self.regs.r(dst), imm8, self.regs.psw);
                self.regs.set_r(dst, value);
                self.regs.psw = psw;
            }

            // AND Rn, #imm8
            0x20..=0x2F => {
                self.cycle_count = 1;
                let (value, psw) = alu::and(self.regs.r(dst), imm8, self.regs.psw);
                self.regs.set_r(dst, value);
                self.regs.psw = psw;
            }

            // OR Rn, #imm8
            0x30..=0x3F => {
                self.cycle_count = 1;
                let (value, psw) = alu::or(self.regs.r(dst), imm8, self.regs.psw);
                self.regs.set_r(dst, value);
                self.regs.psw = psw;
            }

            // XOR Rn, #imm8
            0x40..=0x4F => {
                self.cycle_count = 1;
                let (value, psw) = alu::xor(self.regs.r(dst), imm8, self.regs.psw);
                self.regs.set_r(dst, value);
                self.regs.psw = psw;
            }

            // CMPC Rn, #imm8
            0x50..=0x5F => {
                self.cycle_count = 1;
                let (_, psw) = alu::subc(self.regs.r(dst), imm8, self.regs.psw);
                self.regs.psw = psw;
            }

            // ADDC Rn, #imm8
            0x60..=0x6F => {
                self.cycle_count = 1;
                let (value, psw) = alu::addc(self.regs.r(dst), imm8, self.regs.psw);
                self.regs.set_r(dst, value);
                self.regs.psw = psw;
            }

            // CMP Rn, #imm8
            0x70..=0x7F => {
                self.cycle_count = 1;
                let (_, psw) = alu::sub(self.regs.r(dst), imm8, self.regs.psw);
                self.regs.psw = psw;
            }

            // MOV Rn, Rm
            0x80 => {
                self.cycle_count = 1;
                let value = self.regs.r(src);
                self.regs.psw = self.regs.psw.with_z(value == 0).with_s(sign8(value));
                self.regs.set_r(dst, value);
            }

            // ADD Rn, Rm
            0x81 => {
                self.cycle_count = 1;
                let (value, psw) = alu::add(self.regs.r(dst), self.regs.r(src), self.regs.psw);
                self.regs.set_r(dst, value);
                self.regs.psw = psw;
            }

            // AND Rn, Rm
            0x82 => {
                self.cycle_count = 1;
                let (value, psw) = alu::and(self.regs.r(dst), self.regs.r(src), self.regs.psw);
                self.regs.set_r(dst, value);
                self.regs.psw = psw;
            }

            // OR Rn, Rm
            0x83 => {
                self.cycle_count = 1;
                let (value, psw) = alu::or(self.regs.r(dst), self.regs.r(src), self.regs.psw);
                self.regs.set_r(dst, value);
                self.regs.psw = psw;
            }

            // XOR Rn, Rm
            0x84 => {
                self.cycle_count = 1;
                let (value, psw) = alu::xor(self.regs.r(dst), self.regs.r(src), self.regs.psw);
                self.regs.set_r(dst, value);
                self.regs.psw = psw;
            }

            // CMPC Rn, Rm
            0x85 => {
                self.cycle_count = 1;
                let (_, psw) = alu::subc(self.regs.r(dst), self.regs.r(src), self.regs.psw);
                self.regs.psw = psw;
            }

            // ADDC Rn, Rm
            0x86 => {
                self.cycle_count = 1;
                let (value, psw) = alu::addc(self.regs.r(dst), self.regs.r(src), self.regs.psw);
                self.regs.set_r(dst, value);
                self.regs.psw = psw;
            }

            // CMP Rn, Rm
            0x87 => {
                self.cycle_count = 1;
                let (_, psw) = alu::sub(self.regs.r(dst), self.regs.r(src), self.regs.psw);
                self.regs.psw = psw;
            }

            // SUB Rn, Rm
            0x88 => {
                self.cycle_count = 1;
                let (value, psw) = alu::sub(self.regs.r(dst), self.regs.r(src), self.regs.psw);
                self.regs.set_r(dst, value);
                self.regs.psw = psw;
            }

            // SUBC Rn, Rm
            0x89 => {
                self.cycle_count = 1;
                let (value, psw) = alu::subc(self.regs.r(dst), self.regs.r(src), self.regs.psw);
                self.regs.set_r(dst, value);
                self.regs.psw = psw;
            }

            // SLL Rn, Rm
            0x8A => {
                self.cycle_count = 1 + delay;
                let (value, psw) = alu::sll(self.regs.r(dst), self.regs.r(src), self.regs.psw);
                self.regs.set_r(dst, value);
                self.regs.psw = psw;
            }

            // SLLC Rn, Rm
            0x8B => {
                self.cycle_count = 1 + delay;
                let (value, psw) = alu::sllc(
                    self.regs.r(dst),
                    self.regs.r(dst.wrapping_sub(1) & 0x0F),
                    self.regs.r(src),
                    self.regs.psw,
                );
                self.regs.set_r(dst, value);
                self.regs.psw = psw;
            }

            // SRL Rn, Rm
            0x8C => {
                self.cycle_count = 1 + delay;
                let (value, psw) = alu::srl(self.regs.r(dst), self.regs.r(src), self.regs.psw);
                self.regs.set_r(dst, value);
                self.regs.psw = psw;
            }

            // SRLC Rn, Rm
            0x8D => {
                self.cycle_count = 1 + delay;
                let (value, psw) = alu::srlc(
                    self.regs.r(dst),
                    self.regs.r((dst + 1) & 0x0F),
                    self.regs.r(src),
                    self.regs.psw,
                );
                self.regs.set_r(dst, value);
                self.regs.psw = psw;
            }

            // SRA Rn, Rm
            0x8E => {
                self.cycle_count = 1 + delay;
                let (value, psw) = alu::sra(self.regs.r(dst), self.regs.r(src), self.regs.psw);
                self.regs.set_r(dst, value);
                self.regs.psw = psw;
            }

            // unary nibble: EXTBW, DAA, DAS, NEG
            0x8F => {
                if word & 0xF11F == 0x810F {
                    // EXTBW ERn: sign-fill the odd register from the even one
                    self.cycle_count = 1;
                    let value = self.regs.r(src);
                    let negative = sign8(value);
                    self.regs.set_r(dst, if negative { 0xFF } else { 0x00 });
                    self.regs.psw = self.regs.psw.with_s(negative).with_z(value == 0);
                } else {
                    match word & 0xF0FF {
                        0x801F => {
                            // DAA Rn
                            self.cycle_count = 1;
                            let (value, psw) = alu::daa(self.regs.r(dst), self.regs.psw);
                            self.regs.set_r(dst, value);
                            self.regs.psw = psw;
                        }
                        0x803F => {
                            // DAS Rn
                            self.cycle_count = 1;
                            let (value, psw) = alu::das(self.regs.r(dst), self.regs.psw);
                            self.regs.set_r(dst, value);
                            self.regs.psw = psw;
                        }
                        0x805F => {
                            // NEG Rn
                            self.cycle_count = 1;
                            let (value, psw) = alu::neg(self.regs.r(dst), self.regs.psw);
                            self.regs.set_r(dst, value);
                            self.regs.psw = psw;
                        }
                        _ => status = CoreStatus::IllegalInstruction,
                    }
                }
            }

            // L Rn, [ERm] / [adr] / [EA] / [EA+]
            0x90 => {
                let address = if word & 0x0010 == 0 {
                    self.cycle_count += delay;
                    Some(self.regs.er(src))
                } else {
                    match word & 0xF0FF {
                        0x9010 => {
                            self.cycle_count += delay;
                            Some(self.fetch_word())
                        }
                        0x9030 => Some(self.regs.ea),
                        0x9050 => {
                            let address = self.regs.ea;
                            self.regs.ea = self.regs.ea.wrapping_add(1);
                            ea_increment = true;
                            Some(address)
                        }
                        _ => None,
                    }
                };
                if let Some(address) = address {
                    let segment = self.data_seg();
                    let value = self.read_data(segment, address, 1) as u8;
                    self.cycle_count += 1 + self.mmu.rom_window_hits();
                    self.regs.psw = self.regs.psw.with_z(value == 0).with_s(sign8(value));
                    self.regs.set_r(dst, value);
                } else {
                    status = CoreStatus::IllegalInstruction;
                }
            }

            // ST Rn, [ERm] / [adr] / [EA] / [EA+]
            0x91 => {
                let address = if word & 0x0010 == 0 {
                    self.cycle_count += delay;
                    Some(self.regs.er(src))
                } else {
                    match word & 0xF0FF {
                        0x9011 => {
                            self.cycle_count += delay;
                            Some(self.fetch_word())
                        }
                        0x9031 => Some(self.regs.ea),
                        0x9051 => {
                            let address = self.regs.ea;
                            self.regs.ea = self.regs.ea.wrapping_add(1);
                            ea_increment = true;
                            Some(address)
                        }
                        _ => None,
                    }
                };
                if let Some(address) = address {
                    let segment = self.data_seg();
                    read_only |= self.write_data(segment, address, 1, self.regs.r(dst).into());
                    self.cycle_count += 1;
                } else {
                    status = CoreStatus::IllegalInstruction;
                }
            }

            // L ERn, [ERm] / [adr] / [EA] / [EA+]
            0x92 => {
                let address = if word & 0x0110 == 0 {
                    self.cycle_count += delay;
                    Some(self.regs.er(src))
                } else {
                    match word & 0xF1FF {
                        0x9012 => {
                            self.cycle_count += delay;
                            Some(self.fetch_word())
                        }
                        0x9032 => Some(self.regs.ea),
                        0x9052 => {
                            let address = self.regs.ea;
                            self.regs.ea = self.regs.ea.wrapping_add(2) & 0xFFFE;
                            ea_increment = true;
                            Some(address)
                        }
                        _ => None,
                    }
                };
                if let Some(address) = address {
                    let segment = self.data_seg();
                    let value = self.read_data(segment, address, 2) as u16;
                    self.cycle_count += 2 + self.mmu.rom_window_hits();
                    self.regs.psw = self
                        .regs
                        .psw
                        .with_z(value == 0)
                        .with_s(value & 0x8000 != 0);
                    self.regs.set_er(dst, value);
                } else {
                    status = CoreStatus::IllegalInstruction;
                }
            }

            // ST ERn, [ERm] / [adr] / [EA] / [EA+]
            0x93 => {
                let address = if word & 0x0110 == 0 {
                    self.cycle_count += delay;
                    Some(self.regs.er(src))
                } else {
                    match word & 0xF1FF {
                        0x9013 => {
                            self.cycle_count += delay;
                            Some(self.fetch_word())
                        }
                        0x9033 => Some(self.regs.ea),
                        0x9053 => {
                            let address = self.regs.ea;
                            self.regs.ea = self.regs.ea.wrapping_add(2) & 0xFFFE;
                            ea_increment = true;
                            Some(address)
                        }
                        _ => None,
                    }
                };
                if let Some(address) = address {
                    let segment = self.data_seg();
                    read_only |= self.write_data(segment, address, 2, self.regs.er(dst).into());
                    self.cycle_count += 2;
                } else {
                    status = CoreStatus::IllegalInstruction;
                }
            }

            // L XRn, [EA] / [EA+]
            0x94 => {
                let address = self.regs.ea;
                match word & 0xF3FF {
                    0x9034 => {}
                    0x9054 => {
                        self.regs.ea = self.regs.ea.wrapping_add(4) & 0xFFFE;
                        ea_increment = true;
                    }
                    _ => {
                        status = CoreStatus::IllegalInstruction;
                    }
                }
                if status == CoreStatus::Ok {
                    let segment = self.data_seg();
                    let value = self.read_data(segment, address, 4) as u32;
                    self.cycle_count = 4 + self.mmu.rom_window_hits();
                    self.regs.psw = self
                        .regs
                        .psw
                        .with_z(value == 0)
                        .with_s(value & 0x8000_0000 != 0);
                    self.regs.set_xr(dst, value);
                }
            }

            // ST XRn, [EA] / [EA+]
            0x95 => {
                let address = self.regs.ea;
                match word & 0xF3FF {
                    0x9035 => {}
                    0x9055 => {
                        self.regs.ea = self.regs.ea.wrapping_add(4) & 0xFFFE;
                        ea_increment = true;
                    }
                    _ => {
                        status = CoreStatus::IllegalInstruction;
                    }
                }
                if status == CoreStatus::Ok {
                    let segment = self.data_seg();
                    read_only |= self.write_data(segment, address, 4, self.regs.xr(dst).into());
                    self.cycle_count = 4;
                }
            }

            // L QRn, [EA] / [EA+]
            0x96 => {
                let address = self.regs.ea;
                match word & 0xF7FF {
                    0x9036 => {}
                    0x9056 => {
                        self.regs.ea = self.regs.ea.wrapping_add(8) & 0xFFFE;
                        ea_increment = true;
                    }
                    _ => {
                        status = CoreStatus::IllegalInstruction;
                    }
                }
                if status == CoreStatus::Ok {
                    let segment = self.data_seg();
                    let value = self.read_data(segment, address, 8);
                    self.cycle_count = 8 + self.mmu.rom_window_hits();
                    self.regs.psw = self
                        .regs
                        .psw
                        .with_z(value == 0)
                        .with_s(value & 0x8000_0000_0000_0000 != 0);
                    self.regs.set_qr(dst, value);
                }
            }

            // ST QRn, [EA] / [EA+]
            0x97 => {
                let address = self.regs.ea;
                match word & 0xF7FF {
                    0x9037 => {}
                    0x9057 => {
                        self.regs.ea = self.regs.ea.wrapping_add(8) & 0xFFFE;
                        ea_increment = true;
                    }
                    _ => {
                        status = CoreStatus::IllegalInstruction;
                    }
                }
                if status == CoreStatus::Ok {
                    let segment = self.data_seg();
                    read_only |= self.write_data(segment, address, 8, self.regs.qr(dst));
                    self.cycle_count = 8;
                }
            }

            // L Rn, d16[ERm]
            0x98 => {
                if word & 0xF01F != 0x9008 {
                    status = CoreStatus::IllegalInstruction;
                } else {
                    let displacement = self.fetch_word();
                    let address = self.regs.er(src).wrapping_add(displacement);
                    let segment = self.data_seg();
                    let value = self.read_data(segment, address, 1) as u8;
                    self.regs.set_r(dst, value);
                    self.cycle_count = 2 + self.mmu.rom_window_hits() + delay;
                }
            }

            // ST Rn, d16[ERm]
            0x99 => {
                if word & 0xF01F != 0x9009 {
                    status = CoreStatus::IllegalInstruction;
                } else {
                    let displacement = self.fetch_word();
                    let address = self.regs.er(src).wrapping_add(displacement);
                    let segment = self.data_seg();
                    read_only |= self.write_data(segment, address, 1, self.regs.r(dst).into());
                    self.cycle_count = 2 + delay;
                }
            }

            // SLL Rn, #width
            0x9A => {
                if word & 0x0080 != 0 {
                    status = CoreStatus::IllegalInstruction;
                } else {
                    self.cycle_count = 1 + delay;
                    let (value, psw) = alu::sll(self.regs.r(dst), src, self.regs.psw);
                    self.regs.set_r(dst, value);
                    self.regs.psw = psw;
                }
            }

            // SLLC Rn, #width
            0x9B => {
                if word & 0x0080 != 0 {
                    status = CoreStatus::IllegalInstruction;
                } else {
                    self.cycle_count = 1 + delay;
                    let (value, psw) = alu::sllc(
                        self.regs.r(dst),
                        self.regs.r(dst.wrapping_sub(1) & 0x0F),
                        src,
                        self.regs.psw,
                    );
                    self.regs.set_r(dst, value);
                    self.regs.psw = psw;
                }
            }

            // SRL Rn, #width
            0x9C => {
                if word & 0x0080 != 0 {
                    status = CoreStatus::IllegalInstruction;
                } else {
                    self.cycle_count = 1 + delay;
                    let (value, psw) = alu::srl(self.regs.r(dst), src, self.regs.psw);
                    self.regs.set_r(dst, value);
                    self.regs.psw = psw;
                }
            }

            // SRLC Rn, #width
            0x9D => {
                if word & 0x0080 != 0 {
                    status = CoreStatus::IllegalInstruction;
                } else {
                    self.cycle_count = 1 + delay;
                    let (value, psw) = alu::srlc(
                        self.regs.r(dst),
                        self.regs.r((dst + 1) & 0x0F),
                        src,
                        self.regs.psw,
                    );
                    self.regs.set_r(dst, value);
                    self.regs.psw = psw;
                }
            }

            // SRA Rn, #width
            0x9E => {
                if word & 0x0080 != 0 {
                    status = CoreStatus::IllegalInstruction;
                } else {
                    self.cycle_count = 1 + delay;
                    let (value, psw) = alu::sra(self.regs.r(dst), src, self.regs.psw);
                    self.regs.set_r(dst, value);
                    self.regs.psw = psw;
                }
            }

            // _LDSR Rd
            0x9F => {
                if word & 0x0F00 != 0 {
                    status = CoreStatus::IllegalInstruction;
                } else {
                    self.cycle_count = 1;
                    self.set_dsr(self.regs.r(src));
                    dsr_prefix = true;
                }
            }

            // SB Rn.b / SB Dbitadr.b
            0xA0 => {
                let bit = src & 0x07;
                if word & 0x0080 != 0 {
                    if word & 0x0F80 != 0x0080 {
                        status = CoreStatus::IllegalInstruction;
                    } else {
                        let address = self.fetch_word();
                        let segment = self.data_seg();
                        let value = self.read_data(segment, address, 1) as u8;
                        let (value, psw) = alu::sb(value, bit, self.regs.psw);
                        self.regs.psw = psw;
                        read_only |= self.write_data(segment, address, 1, value.into());
                        self.cycle_count = 2 + delay;
                    }
                } else {
                    let (value, psw) = alu::sb(self.regs.r(dst), bit, self.regs.psw);
                    self.regs.set_r(dst, value);
                    self.regs.psw = psw;
                    self.cycle_count = 1;
                }
            }

            // TB Rn.b / TB Dbitadr.b
            0xA1 => {
                let bit = src & 0x07;
                if word & 0x0080 != 0 {
                    if word & 0x0F80 != 0x0080 {
                        status = CoreStatus::IllegalInstruction;
                    } else {
                        let address = self.fetch_word();
                        let segment = self.data_seg();
                        let value = self.read_data(segment, address, 1) as u8;
                        self.regs.psw = alu::tb(value, bit, self.regs.psw);
                        self.cycle_count = 2 + self.mmu.rom_window_hits() + delay;
                    }
                } else {
                    self.regs.psw = alu::tb(self.regs.r(dst), bit, self.regs.psw);
                    self.cycle_count = 1;
                }
            }

            // RB Rn.b / RB Dbitadr.b
            0xA2 => {
                let bit = src & 0x07;
                if word & 0x0080 != 0 {
                    if word & 0x0F80 != 0x0080 {
                        status = CoreStatus::IllegalInstruction;
                    } else {
                        let address = self.fetch_word();
                        let segment = self.data_seg();
                        let value = self.read_data(segment, address, 1) as u8;
                        let (value, psw) = alu::rb(value, bit, self.regs.psw);
                        self.regs.psw = psw;
                        read_only |= self.write_data(segment, address, 1, value.into());
                        self.cycle_count = 2 + delay;
                    }
                } else {
                    let (value, psw) = alu::rb(self.regs.r(dst), bit, self.regs.psw);
                    self.regs.set_r(dst, value);
                    self.regs.psw = psw;
                    self.cycle_count = 1;
                }
            }

            // MOV Rn, PSW
            0xA3 => {
                if word & 0x00F0 != 0 {
                    status = CoreStatus::IllegalInstruction;
                } else {
                    self.regs.set_r(dst, u8::from(self.regs.psw));
                    self.cycle_count = 1;
                }
            }

            // MOV Rn, EPSW
            0xA4 => {
                if word & 0x00F0 != 0 {
                    status = CoreStatus::IllegalInstruction;
                } else {
                    if self.regs.psw.elevel() != 0 {
                        self.regs.set_r(dst, u8::from(self.regs.current_epsw()));
                    }
                    self.cycle_count = 2;
                }
            }

            // MOV ERn, ELR
            0xA5 => {
                if word & 0x01F0 != 0 {
                    status = CoreStatus::IllegalInstruction;
                } else {
                    self.regs.set_er(dst, self.regs.current_elr());
                    self.cycle_count = 3;
                }
            }

            // MOV Rn, CRm
            0xA6 => status = CoreStatus::Unimplemented,

            // MOV Rn, ECSR
            0xA7 => {
                if word & 0x00F0 != 0 {
                    status = CoreStatus::IllegalInstruction;
                } else {
                    self.regs.set_r(dst, self.regs.current_ecsr());
                    self.cycle_count = 2;
                }
            }

            // L ERn, d16[ERm]
            0xA8 => {
                if word & 0xF11F != 0xA008 {
                    status = CoreStatus::IllegalInstruction;
                } else {
                    let displacement = self.fetch_word();
                    let address = self.regs.er(src).wrapping_add(displacement);
                    let segment = self.data_seg();
                    let value = self.read_data(segment, address, 2) as u16;
                    self.regs.set_er(dst, value);
                    self.cycle_count = 3 + self.mmu.rom_window_hits() + delay;
                }
            }

            // ST ERn, d16[ERm]
            0xA9 => {
                if word & 0xF11F != 0xA009 {
                    status = CoreStatus::IllegalInstruction;
                } else {
                    let displacement = self.fetch_word();
                    let address = self.regs.er(src).wrapping_add(displacement);
                    let segment = self.data_seg();
                    read_only |= self.write_data(segment, address, 2, self.regs.er(dst).into());
                    self.cycle_count = 3 + delay;
                }
            }

            // MOV ERn, SP / MOV SP, ERm
            0xAA => {
                if word & 0x01F0 == 0x0010 {
                    self.regs.set_er(dst, self.regs.sp);
                    self.cycle_count = 1;
                } else if word & 0x0F10 == 0x0100 {
                    self.regs.sp = self.regs.er(src);
                    self.cycle_count = 1;
                } else {
                    status = CoreStatus::IllegalInstruction;
                }
            }

            // MOV PSW, Rm
            0xAB => {
                if word & 0x0F00 != 0 {
                    status = CoreStatus::IllegalInstruction;
                } else {
                    self.regs.psw = Psw::from(self.regs.r(src));
                    self.cycle_count = 1;
                }
            }

            // MOV EPSW, Rm
            0xAC => {
                if word & 0x0F00 != 0 {
                    status = CoreStatus::IllegalInstruction;
                } else {
                    self.regs.set_current_epsw(Psw::from(self.regs.r(src)));
                    self.cycle_count = 2;
                }
            }

            // MOV ELR, ERm
            0xAD => {
                if word & 0x01F0 != 0 {
                    status = CoreStatus::IllegalInstruction;
                } else {
                    self.regs.set_current_elr(self.regs.er(dst));
                    self.cycle_count = 3;
                }
            }

            // MOV CRn, Rm
            0xAE => status = CoreStatus::Unimplemented,

            // MOV ECSR, Rm
            0xAF => {
                if word & 0x0F00 != 0 {
                    status = CoreStatus::IllegalInstruction;
                } else {
                    self.regs.set_current_ecsr(self.regs.r(src));
                    self.cycle_count = 2;
                }
            }

            // L/ST ERn, disp6[BP] / disp6[FP]
            0xB0..=0xBF => {
                let displacement = sign_extend(word & 0x003F, 6);
                match word & 0x01C0 {
                    mode @ (0x0000 | 0x0040) => {
                        let base = if mode == 0 { 12 } else { 14 };
                        let address = self.regs.er(base).wrapping_add(displacement);
                        let segment = self.data_seg();
                        let value = self.read_data(segment, address, 2) as u16;
                        self.regs.set_er(dst, value);
                        self.cycle_count += self.mmu.rom_window_hits();
                        self.cycle_count += 3 + delay;
                    }
                    mode @ (0x0080 | 0x00C0) => {
                        let base = if mode == 0x0080 { 12 } else { 14 };
                        let address = self.regs.er(base).wrapping_add(displacement);
                        let segment = self.data_seg();
                        read_only |= self.write_data(segment, address, 2, self.regs.er(dst).into());
                        self.cycle_count += 3 + delay;
                    }
                    _ => status = CoreStatus::IllegalInstruction,
                }
            }

            // conditional 8-bit relative branches
            0xC0..=0xCF => match Cond::from_u16((word >> 8) & 0x0F) {
                Some(cond) => {
                    self.cycle_count = 1;
                    if cond.holds(self.regs.psw) {
                        let displacement = sign_extend(u16::from(imm8), 8).wrapping_shl(1);
                        self.regs.pc = self.regs.pc.wrapping_add(displacement);
                        self.cycle_count = 3;
                    }
                }
                None => status = CoreStatus::IllegalInstruction,
            },

            // L/ST Rn, disp6[BP] / disp6[FP]
            0xD0..=0xDF => {
                let displacement = sign_extend(word & 0x003F, 6);
                let mode = word & 0x00C0;
                let base = if mode & 0x0040 == 0 { 12 } else { 14 };
                let address = self.regs.er(base).wrapping_add(displacement);
                let segment = self.data_seg();
                if mode & 0x0080 == 0 {
                    let value = self.read_data(segment, address, 1) as u8;
                    self.regs.set_r(dst, value);
                    self.cycle_count += self.mmu.rom_window_hits();
                } else {
                    read_only |= self.write_data(segment, address, 1, self.regs.r(dst).into());
                }
                self.cycle_count += 3 + delay;
            }

            // register-word immediates and flag/interrupt controls
            0xE0..=0xEF => {
                if word & 0x0180 == 0x0000 {
                    // MOV ERn, #imm7
                    let value = sign_extend(word & 0x007F, 7);
                    self.regs.set_er(dst, value);
                    self.regs.psw = self
                        .regs
                        .psw
                        .with_z(value == 0)
                        .with_s(value & 0x8000 != 0);
                    self.cycle_count = 2;
                } else if word & 0x0180 == 0x0080 {
                    // ADD ERn, #imm7
                    let (value, psw) = alu::add_w(
                        self.regs.er(dst),
                        sign_extend(word & 0x007F, 7),
                        self.regs.psw,
                    );
                    self.regs.set_er(dst, value);
                    self.regs.psw = psw;
                    self.cycle_count = 2;
                } else {
                    match word & 0x0F00 {
                        0x0100 => {
                            // ADD SP, #signed8
                            self.regs.sp = self.regs.sp.wrapping_add(sign_extend(imm8.into(), 8));
                            self.cycle_count = 2;
                        }
                        0x0300 => {
                            // _LDSR #imm8
                            self.set_dsr(imm8);
                            dsr_prefix = true;
                            self.cycle_count = 1;
                        }
                        0x0500 => status = CoreStatus::Unimplemented, // SWI #snum
                        0x0900 => {
                            // MOV PSW, #unsigned8
                            self.regs.psw = Psw::from(imm8);
                            self.cycle_count = 1;
                        }
                        0x0B00 => match word {
                            0xEB7F => {
                                // RC
                                self.regs.psw.set_c(false);
                                self.cycle_count = 1;
                            }
                            0xEBF7 => {
                                // DI
                                self.regs.psw.set_mie(false);
                                self.cycle_count = 3;
                            }
                            _ => status = CoreStatus::IllegalInstruction,
                        },
                        0x0D00 => match word {
                            0xED08 => {
                                // EI
                                self.regs.psw.set_mie(true);
                                self.cycle_count = 1;
                            }
                            0xED80 => {
                                // SC
                                self.regs.psw.set_c(true);
                                self.cycle_count = 1;
                            }
                            _ => status = CoreStatus::IllegalInstruction,
                        },
                        _ => status = CoreStatus::IllegalInstruction,
                    }
                }
            }

            // B Cadr
            0xF0 => {
                if word & 0x00F0 != 0 {
                    status = CoreStatus::IllegalInstruction;
                } else {
                    let target = self.fetch_word();
                    self.regs.pc = target & 0xFFFE;
                    self.regs.csr = dst;
                    self.cycle_count = 2 + delay;
                }
            }

            // BL Cadr
            0xF1 => {
                if word & 0x00F0 != 0 {
                    status = CoreStatus::IllegalInstruction;
                } else {
                    let target = self.fetch_word();
                    self.regs.lr = self.regs.pc;
                    self.regs.lcsr = self.regs.csr;
                    self.regs.pc = target & 0xFFFE;
                    self.regs.csr = dst;
                    self.cycle_count = 2 + delay;
                }
            }

            // B ERn
            0xF2 => {
                if word & 0x0F10 != 0 {
                    status = CoreStatus::IllegalInstruction;
                } else {
                    self.regs.pc = self.regs.er(src) & 0xFFFE;
                    self.cycle_count = 2 + delay;
                }
            }

            // BL ERn
            0xF3 => {
                if word & 0x0F10 != 0 {
                    status = CoreStatus::IllegalInstruction;
                } else {
                    self.regs.lr = self.regs.pc;
                    self.regs.lcsr = self.regs.csr;
                    self.regs.pc = self.regs.er(src) & 0xFFFE;
                    self.cycle_count = 2 + delay;
                }
            }

            // MUL ERn, Rm
            0xF4 => {
                if word & 0x0100 != 0 {
                    status = CoreStatus::IllegalInstruction;
                } else {
                    self.cycle_count = 8;
                    let product = u16::from(self.regs.r(dst)) * u16::from(self.regs.r(src));
                    self.regs.psw.set_z(product == 0);
                    self.regs.set_er(dst, product);
                }
            }

            // MOV ERn, ERm
            0xF5 => {
                if word & 0x0110 != 0 {
                    status = CoreStatus::IllegalInstruction;
                } else {
                    self.cycle_count = 2;
                    let value = self.regs.er(src);
                    self.regs.psw = self
                        .regs
                        .psw
                        .with_z(value == 0)
                        .with_s(value & 0x8000 != 0);
                    self.regs.set_er(dst, value);
                }
            }

            // ADD ERn, ERm
            0xF6 => {
                if word & 0x0110 != 0 {
                    status = CoreStatus::IllegalInstruction;
                } else {
                    self.cycle_count = 2;
                    let (value, psw) =
                        alu::add_w(self.regs.er(dst), self.regs.er(src), self.regs.psw);
                    self.regs.set_er(dst, value);
                    self.regs.psw = psw;
                }
            }

            // CMP ERn, ERm
            0xF7 => {
                if word & 0x0110 != 0 {
                    status = CoreStatus::IllegalInstruction;
                } else {
                    self.cycle_count = 2;
                    self.regs.psw = alu::cmp_w(self.regs.er(dst), self.regs.er(src), self.regs.psw);
                }
            }

            // DIV ERn, Rm
            0xF9 => {
                if word & 0x0100 != 0 {
                    status = CoreStatus::IllegalInstruction;
                } else {
                    self.cycle_count = 16;
                    let dividend = self.regs.er(dst);
                    let divisor = u16::from(self.regs.r(src));
                    self.regs.psw.set_z(dividend == 0);
                    if divisor == 0 {
                        self.regs.psw.set_c(true);
                        self.regs.set_r(src, dividend as u8);
                        self.regs.set_er(dst, 0xFFFF);
                    } else {
                        self.regs.psw.set_c(false);
                        self.regs.set_r(src, (dividend % divisor) as u8);
                        self.regs.set_er(dst, dividend / divisor);
                    }
                }
            }

            // LEA [ERm]
            0xFA => {
                if word & 0x0010 != 0 {
                    status = CoreStatus::IllegalInstruction;
                } else {
                    self.regs.ea = self.regs.er(src);
                    self.cycle_count = 1;
                }
            }

            // LEA disp16[ERm]
            0xFB => {
                if word & 0x0010 != 0 {
                    status = CoreStatus::IllegalInstruction;
                } else {
                    let base = self.regs.er(src);
                    let displacement = self.fetch_word();
                    self.regs.ea = base.wrapping_add(displacement);
                    self.cycle_count = 2;
                }
            }

            // LEA Dadr
            0xFC => {
                if word & 0x0010 != 0 {
                    status = CoreStatus::IllegalInstruction;
                } else {
                    self.regs.ea = self.fetch_word();
                    self.cycle_count = 2;
                }
            }

            // coprocessor moves through [EA]
            0xFD => status = CoreStatus::Unimplemented,

            // PUSH / POP
            0xFE => match word & 0x00F0 {
                0x0000 => {
                    // POP Rn
                    let value = self.pop_value(1) as u8;
                    self.regs.set_r(dst, value);
                    self.cycle_count = 2 + delay;
                }
                0x0010 => {
                    // POP ERn
                    if dst & 0x01 != 0 {
                        status = CoreStatus::IllegalInstruction;
                    } else {
                        let value = self.pop_value(2) as u16;
                        self.regs.set_er(dst, value);
                        self.cycle_count = 2 + delay;
                    }
                }
                0x0020 => {
                    // POP XRn
                    if dst & 0x03 != 0 {
                        status = CoreStatus::IllegalInstruction;
                    } else {
                        let value = self.pop_value(4) as u32;
                        self.regs.set_xr(dst, value);
                        self.cycle_count = 4 + delay;
                    }
                }
                0x0030 => {
                    // POP QRn
                    if dst & 0x07 != 0 {
                        status = CoreStatus::IllegalInstruction;
                    } else {
                        let value = self.pop_value(8);
                        self.regs.set_qr(dst, value);
                        self.cycle_count = 8 + delay;
                    }
                }
                0x0040 => {
                    // PUSH Rn
                    self.push_value(self.regs.r(dst).into(), 1);
                    self.cycle_count = 2 + delay;
                }
                0x0050 => {
                    // PUSH ERn
                    if dst & 0x01 != 0 {
                        status = CoreStatus::IllegalInstruction;
                    } else {
                        self.push_value(self.regs.er(dst).into(), 2);
                        self.cycle_count = 2 + delay;
                    }
                }
                0x0060 => {
                    // PUSH XRn
                    if dst & 0x03 != 0 {
                        status = CoreStatus::IllegalInstruction;
                    } else {
                        self.push_value(self.regs.xr(dst).into(), 4);
                        self.cycle_count = 4 + delay;
                    }
                }
                0x0070 => {
                    // PUSH QRn
                    if dst & 0x07 != 0 {
                        status = CoreStatus::IllegalInstruction;
                    } else {
                        self.push_value(self.regs.qr(dst), 8);
                        self.cycle_count = 8 + delay;
                    }
                }
                0x0080 => self.pop_register_list(dst),
                0x00C0 => self.push_register_list(dst),
                _ => status = CoreStatus::IllegalInstruction,
            },

            // single-word miscellaneous
            0xFF => match word {
                0xFE0F => {
                    // RTI
                    self.regs.csr = self.regs.current_ecsr();
                    self.regs.pc = self.regs.current_elr();
                    self.regs.psw = self.regs.current_epsw();
                    self.cycle_count = 2 + delay;
                }
                0xFE1F => {
                    // RT
                    self.regs.csr = self.regs.lcsr;
                    self.regs.pc = self.regs.lr;
                    self.cycle_count = 2 + delay;
                }
                0xFE2F => {
                    // INC [EA]; the carry survives unchanged
                    let segment = self.data_seg();
                    let value = self.read_data(segment, self.regs.ea, 1) as u8;
                    let carry = self.regs.psw.c();
                    let (value, psw) = alu::add(value, 1, self.regs.psw);
                    self.regs.psw = psw.with_c(carry);
                    read_only |= self.write_data(segment, self.regs.ea, 1, value.into());
                    self.cycle_count = 2 + delay;
                }
                0xFE3F => {
                    // DEC [EA]; the carry survives unchanged
                    let segment = self.data_seg();
                    let value = self.read_data(segment, self.regs.ea, 1) as u8;
                    let carry = self.regs.psw.c();
                    let (value, psw) = alu::sub(value, 1, self.regs.psw);
                    self.regs.psw = psw.with_c(carry);
                    read_only |= self.write_data(segment, self.regs.ea, 1, value.into());
                    self.cycle_count = 2 + delay;
                }
                0xFE8F => {
                    // NOP
                    self.cycle_count = 1;
                }
                0xFE9F => {
                    // _UDSR: keep the current DSR for the next access
                    dsr_prefix = true;
                    self.cycle_count = 1;
                }
                0xFECF => {
                    // CPLC
                    let carry = self.regs.psw.c();
                    self.regs.psw.set_c(!carry);
                    self.cycle_count = 1;
                }
                0xFFFF => {
                    // BRK: reset from tier 2 and above, otherwise promote to
                    // tier 2 through the NMI vector
                    if self.regs.psw.elevel() >= 2 {
                        let _ = self.reset();
                    } else {
                        self.enter_exception(2, NMI_VECTOR);
                    }
                    self.cycle_count = 2;
                }
                _ => status = CoreStatus::IllegalInstruction,
            },

            _ => status = CoreStatus::IllegalInstruction,
        }

        if read_only && status == CoreStatus::Ok {
            status = CoreStatus::ReadOnly;
        }
        Executed {
            status,
            ea_increment,
            dsr_prefix,
        }
    }

    fn read_data(&mut self, segment: u8, offset: u16, size: usize) -> u64 {
        self.mmu.data_read(segment, offset, size).0
    }

    /// Writes through the MMU, reporting whether the write was discarded by
    /// a read-only region.
    fn write_data(&mut self, segment: u8, offset: u16, size: usize, value: u64) -> bool {
        self.mmu.data_write(segment, offset, size, value) == MemoryStatus::ReadOnly
    }

    /// Pushes a value onto the stack. An odd byte count pre-decrements SP by
    /// one extra byte so SP always moves by an even amount.
    fn push_value(&mut self, value: u64, bytes: u16) {
        let mut sp = self.regs.sp;
        if bytes & 1 != 0 {
            sp = sp.wrapping_sub(1);
        }
        sp = sp.wrapping_sub(bytes);
        for i in 0..bytes {
            self.mmu
                .data_write(0, sp.wrapping_add(i), 1, (value >> (8 * i)) & 0xFF);
        }
        self.regs.sp = sp;
    }

    /// Pops a value from the stack, advancing SP by the byte count rounded
    /// up to even.
    fn pop_value(&mut self, bytes: u16) -> u64 {
        let sp = self.regs.sp;
        let mut value = 0;
        for i in 0..bytes {
            let (byte, _) = self.mmu.data_read(0, sp.wrapping_add(i), 1);
            value |= byte << (8 * i);
        }
        self.regs.sp = sp.wrapping_add((bytes + 1) & 0xFFFE);
        value
    }

    fn pop_byte(&mut self) -> u8 {
        let (byte, _) = self.mmu.data_read(0, self.regs.sp, 1);
        self.regs.sp = self.regs.sp.wrapping_add(1);
        byte as u8
    }

    fn pop_word_packed(&mut self) -> u16 {
        let lo = self.pop_byte();
        let hi = self.pop_byte();
        u16::from_le_bytes([lo, hi])
    }

    fn push_byte(&mut self, value: u8) {
        self.regs.sp = self.regs.sp.wrapping_sub(1);
        self.mmu.data_write(0, self.regs.sp, 1, value.into());
    }

    fn push_word_packed(&mut self, value: u16) {
        let [lo, hi] = value.to_le_bytes();
        self.push_byte(hi);
        self.push_byte(lo);
    }

    /// POP of the {EA, PC+CSR, PSW, LR+LCSR} subset. The frame is packed
    /// (words two bytes, PSW and segment bytes one); SP is re-aligned
    /// upward once the whole list has been popped.
    fn pop_register_list(&mut self, mask: u8) {
        let mut cycles = 0;
        if mask & 0x01 != 0 {
            self.regs.ea = self.pop_word_packed();
            cycles += 2;
        }
        if mask & 0x08 != 0 {
            self.regs.lr = self.pop_word_packed();
            self.regs.lcsr = self.pop_byte();
            cycles += 4;
        }
        if mask & 0x04 != 0 {
            self.regs.psw = Psw::from(self.pop_byte());
            cycles += 2;
        }
        if mask & 0x02 != 0 {
            self.regs.pc = self.pop_word_packed() & 0xFFFE;
            self.regs.csr = self.pop_byte();
            cycles += 7;
        }
        self.cycle_count = if cycles == 0 {
            1
        } else {
            self.regs.sp = self.regs.sp.wrapping_add(self.regs.sp & 1);
            cycles + self.ea_inc_delay
        };
    }

    /// PUSH of the {EA, ELR+ECSR, EPSW, LR+LCSR} subset, the mirror image of
    /// [`Core::pop_register_list`]: an odd-sized frame pre-decrements SP by
    /// one, then the groups go down packed, segment byte above its word.
    fn push_register_list(&mut self, mask: u8) {
        let mut total: u16 = 0;
        if mask & 0x02 != 0 {
            total += 3;
        }
        if mask & 0x04 != 0 {
            total += 1;
        }
        if mask & 0x08 != 0 {
            total += 3;
        }
        if mask & 0x01 != 0 {
            total += 2;
        }
        if total & 1 != 0 {
            self.regs.sp = self.regs.sp.wrapping_sub(1);
        }

        let mut cycles = 0;
        if mask & 0x02 != 0 {
            self.push_byte(self.regs.current_ecsr());
            self.push_word_packed(self.regs.current_elr());
            cycles += 4;
        }
        if mask & 0x04 != 0 {
            self.push_byte(u8::from(self.regs.current_epsw()));
            cycles += 2;
        }
        if mask & 0x08 != 0 {
            self.push_byte(self.regs.lcsr);
            self.push_word_packed(self.regs.lr);
            cycles += 4;
        }
        if mask & 0x01 != 0 {
            self.push_word_packed(self.regs.ea);
            cycles += 2;
        }
        self.cycle_count = if cycles == 0 {
            1
        } else {
            cycles + self.ea_inc_delay
        };
    }
}
