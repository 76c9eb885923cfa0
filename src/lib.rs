//! An interpreting emulator core for the nX-U8/U16 family of 16-bit
//! microcontrollers, as used in several scientific calculators.
//!
//! The crate models the architectural state (register file with its overlay
//! views, PSW and shadow registers), the segmented memory map (ROM window,
//! data RAM, SFR page, mirrored code segments), the documented instruction
//! set with its flag semantics and cycle accounting, the DSR prefix
//! interaction, and the interrupt/standby machinery with a timer and a
//! keyboard matrix as peripherals.
//!
//! The host supplies the outside world: ROM/RAM images through the
//! [`mmu::Storage`] trait, the key matrix through
//! [`sfr::keyboard::KeySource`], a periodic thread that drives
//! [`sfr::Peripherals::tick`], and whatever renders the frame buffer at
//! [`lcd::VRAM_BASE`]. The core itself runs entirely on the caller's thread,
//! one instruction per [`Core::step`], with interrupt delivery polled
//! between steps.
//!
//! # Example
//!
//! ```
//! use u8core::mmu::CODE_MEMORY_SIZE;
//! use u8core::{Core, CoreStatus, KeySource, MemoryConfig, MemoryStatus, Storage, StorageError};
//!
//! struct NoKeys;
//!
//! impl KeySource for NoKeys {
//!     fn ki(&self, _masked_ko: u16) -> u16 {
//!         0xFFFF // active-low: nothing pressed
//!     }
//! }
//!
//! struct RomOnly(Vec<u8>);
//!
//! impl Storage for RomOnly {
//!     fn init_code_memory(&mut self, _cfg: &MemoryConfig) -> Option<Box<[u8]>> {
//!         let mut image = vec![0xFF; CODE_MEMORY_SIZE];
//!         image[..self.0.len()].copy_from_slice(&self.0);
//!         Some(image.into_boxed_slice())
//!     }
//!     fn init_data_memory(&mut self, _cfg: &MemoryConfig) -> Option<Box<[u8]>> {
//!         None // zero-filled by the MMU
//!     }
//!     fn load_code_memory(&mut self, _c: &MemoryConfig, _b: &mut [u8]) -> Result<(), StorageError> {
//!         Ok(())
//!     }
//!     fn load_data_memory(&mut self, _c: &MemoryConfig, _b: &mut [u8]) -> Result<(), StorageError> {
//!         Ok(())
//!     }
//!     fn save_data_memory(&mut self, _c: &MemoryConfig, _b: &[u8]) -> Result<(), StorageError> {
//!         Ok(())
//!     }
//! }
//!
//! // reset vectors SP = 0x8DE0 and PC = 0x0004, then `MOV R0, #0x42`
//! // followed by a branch back to 0:0004
//! let rom = [
//!     0xE0, 0x8D, 0x04, 0x00, // vectors
//!     0x42, 0x00, // MOV R0, #0x42
//!     0x00, 0xF0, 0x04, 0x00, // B 0:0004
//! ];
//!
//! let (mut core, peripherals) = Core::new(Box::new(NoKeys));
//! let cfg = MemoryConfig::new("rom.bin", "ram.bin");
//! let status = core.mmu.init(&mut RomOnly(rom.to_vec()), &cfg);
//! assert_eq!(status, MemoryStatus::Ok);
//! core.reset();
//!
//! for _ in 0..2 {
//!     assert_eq!(core.step(), CoreStatus::Ok);
//!     peripherals.check_pending();
//!     core.handle_interrupt();
//! }
//! assert_eq!(core.regs.r(0), 0x42);
//! assert_eq!(core.regs.pc, 0x0004);
//! ```

mod alu;
pub mod cpu;
pub mod interrupt;
pub mod lcd;
pub mod mmu;
pub mod registers;
pub mod sfr;

pub use cpu::{Core, CoreStatus};
pub use interrupt::{IrqKind, IrqMailbox};
pub use mmu::{MemoryConfig, MemoryStatus, Mmu, Storage, StorageError};
pub use registers::{Psw, Registers};
pub use sfr::keyboard::KeySource;
pub use sfr::standby::StandbyState;
pub use sfr::Peripherals;
