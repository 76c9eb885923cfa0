//! Shared scaffolding for the integration tests: an in-memory storage
//! implementation, a scriptable key matrix, and a small ROM builder.

#![allow(dead_code)]

use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use u8core::mmu::CODE_MEMORY_SIZE;
use u8core::sfr::Peripherals;
use u8core::{Core, CoreStatus, KeySource, MemoryConfig, MemoryStatus, Storage, StorageError};

/// Entry point of the test programs built by [`rom`].
pub const PROGRAM_BASE: u16 = 0x0010;

/// Initial stack pointer of the test programs; inside data RAM.
pub const STACK_TOP: u16 = 0xE000;

pub struct TestStorage {
    pub code: Vec<u8>,
    pub data: Option<Vec<u8>>,
}

impl Storage for TestStorage {
    fn init_code_memory(&mut self, _cfg: &MemoryConfig) -> Option<Box<[u8]>> {
        let mut image = vec![0xFF; CODE_MEMORY_SIZE];
        image[..self.code.len()].copy_from_slice(&self.code);
        Some(image.into_boxed_slice())
    }

    fn init_data_memory(&mut self, cfg: &MemoryConfig) -> Option<Box<[u8]>> {
        self.data.as_ref().map(|data| {
            let mut image = vec![0; cfg.data_size];
            image[..data.len()].copy_from_slice(data);
            image.into_boxed_slice()
        })
    }

    fn load_code_memory(&mut self, _cfg: &MemoryConfig, _buf: &mut [u8]) -> Result<(), StorageError> {
        Ok(())
    }

    fn load_data_memory(&mut self, _cfg: &MemoryConfig, _buf: &mut [u8]) -> Result<(), StorageError> {
        Ok(())
    }

    fn save_data_memory(&mut self, _cfg: &MemoryConfig, _buf: &[u8]) -> Result<(), StorageError> {
        Ok(())
    }
}

/// A matrix with no keys down.
pub struct NoKeys;

impl KeySource for NoKeys {
    fn ki(&self, _masked_ko: u16) -> u16 {
        0xFFFF
    }
}

/// A matrix whose pressed KI lines can be changed from the test body; the
/// stored mask is pulled low whenever any output line is scanned.
#[derive(Clone)]
pub struct SharedKeys(pub Arc<AtomicU16>);

impl SharedKeys {
    pub fn released() -> Self {
        Self(Arc::new(AtomicU16::new(0)))
    }

    pub fn press(&self, ki_mask: u16) {
        self.0.store(ki_mask, Ordering::Relaxed);
    }
}

impl KeySource for SharedKeys {
    fn ki(&self, masked_ko: u16) -> u16 {
        if masked_ko != 0 {
            !self.0.load(Ordering::Relaxed)
        } else {
            !0
        }
    }
}

/// Stores a little-endian word into a byte image.
pub fn set_word(image: &mut Vec<u8>, address: usize, word: u16) {
    if image.len() < address + 2 {
        image.resize(address + 2, 0xFF);
    }
    image[address..address + 2].copy_from_slice(&word.to_le_bytes());
}

/// Builds a ROM image: reset vectors pointing SP at [`STACK_TOP`] and PC at
/// [`PROGRAM_BASE`], with `program` laid out from there. The vector table
/// region stays free for interrupt handler addresses.
pub fn rom(program: &[u16]) -> Vec<u8> {
    let mut image = vec![0xFF; usize::from(PROGRAM_BASE)];
    set_word(&mut image, 0x0000, STACK_TOP);
    set_word(&mut image, 0x0002, PROGRAM_BASE);
    for (i, word) in program.iter().enumerate() {
        set_word(&mut image, usize::from(PROGRAM_BASE) + 2 * i, *word);
    }
    image
}

/// Boots a core on the given code image with no keys pressed.
pub fn machine(code: Vec<u8>) -> (Core, Arc<Peripherals>) {
    machine_with_keys(code, Box::new(NoKeys))
}

pub fn machine_with_keys(code: Vec<u8>, keys: Box<dyn KeySource>) -> (Core, Arc<Peripherals>) {
    let (mut core, peripherals) = Core::new(keys);
    let cfg = MemoryConfig::new("rom.bin", "ram.bin");
    let status = core.mmu.init(&mut TestStorage { code, data: None }, &cfg);
    assert_eq!(status, MemoryStatus::Ok, "test memory must initialize");
    assert_eq!(core.reset(), CoreStatus::Ok);
    (core, peripherals)
}

/// Steps once and asserts the instruction executed cleanly.
pub fn step_ok(core: &mut Core) {
    assert_eq!(core.step(), CoreStatus::Ok);
}
