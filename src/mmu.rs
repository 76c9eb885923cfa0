//! The memory management unit.
//!
//! Routes segmented code and data accesses to their backing stores: code
//! memory, data RAM, the ROM window (a read-only alias of code segment 0)
//! and the SFR page. Every operation returns a [`MemoryStatus`] alongside its
//! value; the most recent status is additionally recorded in
//! [`Mmu::last_status`] so a host can diagnose which access raised a
//! condition.

pub mod map;

use self::map::{region_for, RegionKind, CODE_MIRROW_MASK, CODE_PAGE_COUNT, DATA_MIRROW_MASK};
use crate::sfr::Sfr;
use derive_more::Display;

/// Total bytes of code memory.
pub const CODE_MEMORY_SIZE: usize = CODE_PAGE_COUNT as usize * 0x1_0000;

/// Bytes of data RAM (segment 0 between the ROM window and the SFR page).
pub const DATA_MEMORY_SIZE: usize = (map::SFR_BASE - map::ROM_WINDOW_SIZE) as usize;

/// Outcome of a memory operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display)]
pub enum MemoryStatus {
    #[display(fmt = "ok")]
    Ok,
    #[display(fmt = "memory is not initialized")]
    Uninitialized,
    #[display(fmt = "backing allocation failed")]
    AllocationFailed,
    #[display(fmt = "ROM image is missing")]
    RomMissing,
    #[display(fmt = "saving data memory failed")]
    SavingFailed,
    #[display(fmt = "loading data memory failed")]
    LoadingFailed,
    #[display(fmt = "address is unmapped")]
    Unmapped,
    #[display(fmt = "access went through the ROM window")]
    RomWindow,
    #[display(fmt = "segment is a mirror of a real bank")]
    MirrowedBank,
    #[display(fmt = "unaligned access")]
    Unaligned,
    #[display(fmt = "write to read-only memory")]
    ReadOnly,
}

/// Identifies the images backing code and data memory. The identifiers are
/// opaque to the core; only the host's [`Storage`] interprets them.
#[derive(Clone, Debug)]
pub struct MemoryConfig {
    pub code_id: String,
    pub data_id: String,
    pub code_size: usize,
    pub data_size: usize,
}

impl MemoryConfig {
    /// A configuration with the platform's standard sizes.
    pub fn new(code_id: impl Into<String>, data_id: impl Into<String>) -> Self {
        Self {
            code_id: code_id.into(),
            data_id: data_id.into(),
            code_size: CODE_MEMORY_SIZE,
            data_size: DATA_MEMORY_SIZE,
        }
    }
}

/// Error type of the host storage operations.
#[derive(Clone, Copy, Debug)]
pub struct StorageError;

/// Host-side persistence for the memory images. Buffer release is dropping
/// the returned boxes, so there is no explicit free operation.
pub trait Storage {
    /// Produces the code memory image, `cfg.code_size` bytes. `None` when
    /// the ROM cannot be provided.
    fn init_code_memory(&mut self, cfg: &MemoryConfig) -> Option<Box<[u8]>>;

    /// Produces the initial data memory image. `None` is tolerated; the MMU
    /// zero-fills instead.
    fn init_data_memory(&mut self, cfg: &MemoryConfig) -> Option<Box<[u8]>>;

    /// Re-reads the code image into an existing buffer.
    fn load_code_memory(&mut self, cfg: &MemoryConfig, buf: &mut [u8]) -> Result<(), StorageError>;

    /// Re-reads the data image into an existing buffer.
    fn load_data_memory(&mut self, cfg: &MemoryConfig, buf: &mut [u8]) -> Result<(), StorageError>;

    /// Persists the data image.
    fn save_data_memory(&mut self, cfg: &MemoryConfig, buf: &[u8]) -> Result<(), StorageError>;
}

/// The memory management unit: both memories, the SFR dispatcher, and the
/// access bookkeeping.
pub struct Mmu {
    code: Box<[u8]>,
    ram: Box<[u8]>,
    sfr: Sfr,
    inited: bool,
    status: MemoryStatus,
    rom_win_access_count: u32,
}

impl Mmu {
    /// An MMU with no memory attached yet; every access reports
    /// `Uninitialized` until [`Mmu::init`] succeeds.
    pub fn new(sfr: Sfr) -> Self {
        Self {
            code: Box::from([]),
            ram: Box::from([]),
            sfr,
            inited: false,
            status: MemoryStatus::Uninitialized,
            rom_win_access_count: 0,
        }
    }

    /// Obtains both memory images from the host storage. The data image is
    /// optional and zero-filled when absent.
    pub fn init(&mut self, storage: &mut dyn Storage, cfg: &MemoryConfig) -> MemoryStatus {
        let Some(code) = storage.init_code_memory(cfg) else {
            log::error!("code memory image {:?} is unavailable", cfg.code_id);
            self.status = MemoryStatus::RomMissing;
            return self.status;
        };
        if code.len() < CODE_MEMORY_SIZE {
            self.status = MemoryStatus::AllocationFailed;
            return self.status;
        }

        let ram = match storage.init_data_memory(cfg) {
            Some(data) if data.len() >= DATA_MEMORY_SIZE => data,
            Some(_) => {
                self.status = MemoryStatus::AllocationFailed;
                return self.status;
            }
            None => vec![0; DATA_MEMORY_SIZE].into_boxed_slice(),
        };

        self.code = code;
        self.ram = ram;
        self.inited = true;
        self.status = MemoryStatus::Ok;
        log::debug!("memory initialized, {} code bytes", self.code.len());
        self.status
    }

    /// Releases both memories; accesses report `Uninitialized` again.
    pub fn free(&mut self) -> MemoryStatus {
        if !self.inited {
            return MemoryStatus::Uninitialized;
        }
        self.code = Box::from([]);
        self.ram = Box::from([]);
        self.inited = false;
        self.status = MemoryStatus::Uninitialized;
        MemoryStatus::Ok
    }

    /// Overwrites data RAM from the host image.
    pub fn load_data(&mut self, storage: &mut dyn Storage, cfg: &MemoryConfig) -> MemoryStatus {
        if !self.inited {
            return MemoryStatus::Uninitialized;
        }
        match storage.load_data_memory(cfg, &mut self.ram) {
            Ok(()) => MemoryStatus::Ok,
            Err(StorageError) => MemoryStatus::LoadingFailed,
        }
    }

    /// Persists data RAM through the host image.
    pub fn save_data(&mut self, storage: &mut dyn Storage, cfg: &MemoryConfig) -> MemoryStatus {
        if !self.inited {
            return MemoryStatus::Uninitialized;
        }
        match storage.save_data_memory(cfg, &self.ram) {
            Ok(()) => MemoryStatus::Ok,
            Err(StorageError) => MemoryStatus::SavingFailed,
        }
    }

    pub fn is_inited(&self) -> bool {
        self.inited
    }

    /// Status of the most recent memory operation.
    pub fn last_status(&self) -> MemoryStatus {
        self.status
    }

    /// ROM-window bytes touched by the most recent data read. The executor
    /// adds this to the cycle cost of loads, modeling bus contention with
    /// instruction fetch.
    pub fn rom_window_hits(&self) -> u32 {
        self.rom_win_access_count
    }

    pub fn sfr(&self) -> &Sfr {
        &self.sfr
    }

    pub fn sfr_mut(&mut self) -> &mut Sfr {
        &mut self.sfr
    }

    /// Fetches one code word. The offset is aligned down to a word boundary;
    /// mirrored segments read the real page and report it, segments outside
    /// the real range read `0xFFFF`.
    pub fn code_word(&mut self, segment: u8, offset: u16) -> (u16, MemoryStatus) {
        if !self.inited {
            self.status = MemoryStatus::Uninitialized;
            return (0, self.status);
        }
        self.status = MemoryStatus::Ok;

        let mut segment = segment & 0x0F;
        let offset = offset & 0xFFFE;

        if u32::from(segment & CODE_MIRROW_MASK) >= CODE_PAGE_COUNT {
            self.status = MemoryStatus::Unmapped;
            return (0xFFFF, self.status);
        }
        if segment > CODE_MIRROW_MASK {
            segment &= CODE_MIRROW_MASK;
            self.status = MemoryStatus::MirrowedBank;
        }

        let base = ((u32::from(segment) << 16) | u32::from(offset)) as usize;
        let word = u16::from_le_bytes([self.code[base], self.code[base + 1]]);
        (word, self.status)
    }

    /// Code word peek for diagnostics; no status or accounting side effects.
    pub fn peek_code_word(&self, segment: u8, offset: u16) -> u16 {
        if !self.inited {
            return 0xFFFF;
        }
        let segment = segment & 0x0F & CODE_MIRROW_MASK;
        let base = ((u32::from(segment) << 16) | u32::from(offset & 0xFFFE)) as usize;
        u16::from_le_bytes([self.code[base], self.code[base + 1]])
    }

    /// Reads `size` bytes little-endian from data space. `size` is
    /// normalized to {1, 2, 4, 8}; wide accesses at odd offsets are flagged
    /// `Unaligned` and aligned down before dispatch.
    pub fn data_read(&mut self, segment: u8, offset: u16, size: usize) -> (u64, MemoryStatus) {
        self.rom_win_access_count = 0;
        if !self.inited {
            self.status = MemoryStatus::Uninitialized;
            return (0, self.status);
        }

        let size = normalize_size(size);
        let offset = self.begin_access(offset, size);

        let mut value = 0;
        let base = (u32::from(segment) << 16) | u32::from(offset);
        let contiguous = region_of_whole_access(base, offset, size);
        for i in 0..size {
            let address = (u32::from(segment) << 16) | u32::from(offset.wrapping_add(i as u16));
            let byte = match contiguous {
                Some(kind) => self.run_handler(kind, address, 0, false),
                None => {
                    let kind = region_for(address).kind;
                    self.run_handler(kind, address, 0, false)
                }
            };
            value |= u64::from(byte) << (8 * i);
        }
        (value, self.status)
    }

    /// Writes `size` bytes little-endian into data space, under the same
    /// normalization and alignment rules as [`Mmu::data_read`].
    pub fn data_write(&mut self, segment: u8, offset: u16, size: usize, value: u64) -> MemoryStatus {
        if !self.inited {
            self.status = MemoryStatus::Uninitialized;
            return self.status;
        }

        let size = normalize_size(size);
        let offset = self.begin_access(offset, size);

        let base = (u32::from(segment) << 16) | u32::from(offset);
        let contiguous = region_of_whole_access(base, offset, size);
        for i in 0..size {
            let address = (u32::from(segment) << 16) | u32::from(offset.wrapping_add(i as u16));
            let byte = (value >> (8 * i)) as u8;
            match contiguous {
                Some(kind) => {
                    self.run_handler(kind, address, byte, true);
                }
                None => {
                    let kind = region_for(address).kind;
                    self.run_handler(kind, address, byte, true);
                }
            }
        }
        self.status
    }

    /// Resets the status and applies the alignment rule, returning the
    /// possibly aligned-down offset.
    fn begin_access(&mut self, offset: u16, size: usize) -> u16 {
        self.status = MemoryStatus::Ok;
        if size > 1 {
            if offset & 1 != 0 {
                self.status = MemoryStatus::Unaligned;
            }
            offset & 0xFFFE
        } else {
            offset
        }
    }

    /// Executes one region handler for a single byte.
    fn run_handler(&mut self, kind: RegionKind, address: u32, data: u8, is_write: bool) -> u8 {
        match kind {
            RegionKind::RomWindow => {
                self.rom_win_access_count += 1;
                self.status = MemoryStatus::RomWindow;
                if is_write {
                    self.status = MemoryStatus::ReadOnly;
                    return 0;
                }
                self.code[address as usize]
            }
            RegionKind::Ram => {
                let index = (address - map::ROM_WINDOW_SIZE) as usize;
                if is_write {
                    self.ram[index] = data;
                    0
                } else {
                    self.ram[index]
                }
            }
            RegionKind::Sfr => self.sfr.handle(address as u16, data, is_write),
            RegionKind::CodeSegments => {
                if is_write {
                    self.status = MemoryStatus::ReadOnly;
                    return 0;
                }
                let mut segment = (address >> 16) as u8;
                if segment > DATA_MIRROW_MASK {
                    segment &= DATA_MIRROW_MASK;
                    self.status = MemoryStatus::MirrowedBank;
                }
                if u32::from(segment) >= CODE_PAGE_COUNT {
                    self.status = MemoryStatus::Unmapped;
                    return 0;
                }
                let base = ((u32::from(segment) << 16) | (address & 0xFFFF)) as usize;
                self.code[base]
            }
            RegionKind::Unmapped => {
                self.status = MemoryStatus::Unmapped;
                0
            }
        }
    }
}

/// Constrains an access size to {1, 2, 4, 8}.
fn normalize_size(size: usize) -> usize {
    match size {
        0 | 1 => 1,
        2 => 2,
        3 | 4 => 4,
        _ => 8,
    }
}

/// When the whole `[base, base + size)` range stays inside one region (and
/// inside the 16-bit offset space), every byte can reuse that region's
/// handler; otherwise each byte re-runs the lookup.
fn region_of_whole_access(base: u32, offset: u16, size: usize) -> Option<RegionKind> {
    let region = region_for(base);
    let no_wrap = usize::from(offset) + size <= 0x1_0000;
    (no_wrap && base + size as u32 <= region.end).then_some(region.kind)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interrupt::IrqMailbox;
    use crate::sfr::keyboard::KeySource;
    use crate::sfr::standby::Standby;
    use crate::sfr::{Peripherals, SfrPage};
    use std::sync::Arc;

    struct NoKeys;

    impl KeySource for NoKeys {
        fn ki(&self, _masked_ko: u16) -> u16 {
            0xFFFF
        }
    }

    struct TestStorage {
        code: Vec<u8>,
    }

    impl Storage for TestStorage {
        fn init_code_memory(&mut self, _cfg: &MemoryConfig) -> Option<Box<[u8]>> {
            let mut image = vec![0xFF; CODE_MEMORY_SIZE];
            image[..self.code.len()].copy_from_slice(&self.code);
            Some(image.into_boxed_slice())
        }

        fn init_data_memory(&mut self, _cfg: &MemoryConfig) -> Option<Box<[u8]>> {
            None
        }

        fn load_code_memory(
            &mut self,
            _cfg: &MemoryConfig,
            _buf: &mut [u8],
        ) -> Result<(), StorageError> {
            Ok(())
        }

        fn load_data_memory(
            &mut self,
            _cfg: &MemoryConfig,
            _buf: &mut [u8],
        ) -> Result<(), StorageError> {
            Err(StorageError)
        }

        fn save_data_memory(
            &mut self,
            _cfg: &MemoryConfig,
            _buf: &[u8],
        ) -> Result<(), StorageError> {
            Ok(())
        }
    }

    fn mmu_with_code(code: Vec<u8>) -> Mmu {
        let page = Arc::new(SfrPage::new());
        let standby = Arc::new(Standby::new());
        let mailbox = Arc::new(IrqMailbox::new());
        let peripherals = Arc::new(Peripherals::new(
            &page,
            &standby,
            &mailbox,
            Box::new(NoKeys),
        ));
        let mut mmu = Mmu::new(Sfr::new(page, standby, peripherals));
        let status = mmu.init(
            &mut TestStorage { code },
            &MemoryConfig::new("rom.bin", "ram.bin"),
        );
        assert_eq!(status, MemoryStatus::Ok);
        mmu
    }

    #[test]
    fn uninitialized_accesses_report_it() {
        let page = Arc::new(SfrPage::new());
        let standby = Arc::new(Standby::new());
        let mailbox = Arc::new(IrqMailbox::new());
        let peripherals = Arc::new(Peripherals::new(
            &page,
            &standby,
            &mailbox,
            Box::new(NoKeys),
        ));
        let mut mmu = Mmu::new(Sfr::new(page, standby, peripherals));

        assert_eq!(mmu.code_word(0, 0), (0, MemoryStatus::Uninitialized));
        assert_eq!(mmu.data_read(0, 0x9000, 1), (0, MemoryStatus::Uninitialized));
        assert_eq!(
            mmu.data_write(0, 0x9000, 1, 0),
            MemoryStatus::Uninitialized
        );
        assert_eq!(mmu.free(), MemoryStatus::Uninitialized);
    }

    #[test]
    fn code_words_are_little_endian_and_aligned() {
        let mut mmu = mmu_with_code(vec![0xAA, 0x55, 0x04, 0x80]);
        assert_eq!(mmu.code_word(0, 0x0000), (0x55AA, MemoryStatus::Ok));
        assert_eq!(mmu.code_word(0, 0x0003).0, 0x8004, "bit 0 is dropped");
    }

    #[test]
    fn code_segment_mirroring() {
        let mut code = vec![0x11, 0x22];
        code.resize(0x1_0000, 0);
        code.extend_from_slice(&[0x33, 0x44]);
        let mut mmu = mmu_with_code(code);

        assert_eq!(mmu.code_word(1, 0), (0x4433, MemoryStatus::Ok));
        for segment in 2..16 {
            let (word, status) = mmu.code_word(segment, 0);
            let expected = if segment & 1 == 0 { 0x2211 } else { 0x4433 };
            assert_eq!(word, expected, "segment {segment} mirrors its real page");
            assert_eq!(status, MemoryStatus::MirrowedBank);
        }
    }

    #[test]
    fn rom_window_aliases_code_and_counts() {
        let mut mmu = mmu_with_code(vec![0xAA, 0x55, 0x04, 0x80]);
        for offset in 0..4u16 {
            let (value, status) = mmu.data_read(0, offset, 1);
            let word = mmu.peek_code_word(0, offset & 0xFFFE);
            assert_eq!(value as u8, (word >> (8 * (offset & 1))) as u8);
            assert_eq!(status, MemoryStatus::RomWindow);
            assert_eq!(mmu.rom_window_hits(), 1);
        }

        let (_, status) = mmu.data_read(0, 0x0000, 8);
        assert_eq!(status, MemoryStatus::RomWindow);
        assert_eq!(mmu.rom_window_hits(), 8, "one count per byte");
    }

    #[test]
    fn ram_round_trips_and_resets_the_window_count() {
        let mut mmu = mmu_with_code(vec![]);
        assert_eq!(
            mmu.data_write(0, 0x9100, 8, 0x0102_0304_0506_0708),
            MemoryStatus::Ok
        );
        assert_eq!(
            mmu.data_read(0, 0x9100, 8),
            (0x0102_0304_0506_0708, MemoryStatus::Ok)
        );
        assert_eq!(mmu.rom_window_hits(), 0);
        assert_eq!(mmu.data_read(0, 0x9104, 4).0, 0x0102_0304);
    }

    #[test]
    fn wide_odd_accesses_are_flagged_and_aligned_down() {
        let mut mmu = mmu_with_code(vec![]);
        mmu.data_write(0, 0x9200, 2, 0xBEEF);
        let (value, status) = mmu.data_read(0, 0x9201, 2);
        assert_eq!(status, MemoryStatus::Unaligned);
        assert_eq!(value, 0xBEEF, "offset is rounded down to the word");

        assert_eq!(
            mmu.data_write(0, 0x9203, 2, 0x1234),
            MemoryStatus::Unaligned
        );
        assert_eq!(mmu.data_read(0, 0x9202, 2).0, 0x1234);

        let (_, status) = mmu.data_read(0, 0x9201, 1);
        assert_eq!(status, MemoryStatus::Ok, "byte accesses have no alignment");
    }

    #[test]
    fn size_normalization() {
        let mut mmu = mmu_with_code(vec![]);
        mmu.data_write(0, 0x9300, 8, 0x1122_3344_5566_7788);
        assert_eq!(mmu.data_read(0, 0x9300, 0).0, 0x88, "0 reads one byte");
        assert_eq!(mmu.data_read(0, 0x9300, 3).0, 0x5566_7788, "3 becomes 4");
        for size in 5..=7 {
            assert_eq!(
                mmu.data_read(0, 0x9300, size).0,
                0x1122_3344_5566_7788,
                "{size} becomes 8"
            );
        }
    }

    #[test]
    fn writes_to_code_backed_regions_are_discarded() {
        let mut mmu = mmu_with_code(vec![0xAA, 0x55]);
        assert_eq!(mmu.data_write(0, 0x0000, 1, 0x00), MemoryStatus::ReadOnly);
        assert_eq!(mmu.data_read(0, 0x0000, 1).0, 0xAA);

        assert_eq!(mmu.data_write(1, 0x0000, 2, 0x1234), MemoryStatus::ReadOnly);
        assert_eq!(mmu.data_write(4, 0x2000, 1, 0x12), MemoryStatus::ReadOnly);
    }

    #[test]
    fn data_segments_view_code_memory() {
        let mut code = vec![0; 0x1_0000];
        code.extend_from_slice(&[0xDE, 0xC0]);
        let mut mmu = mmu_with_code(code);

        assert_eq!(mmu.data_read(1, 0x0000, 2), (0xC0DE, MemoryStatus::Ok));
        // segment 9 mirrors down to segment 1
        assert_eq!(
            mmu.data_read(9, 0x0000, 2),
            (0xC0DE, MemoryStatus::MirrowedBank)
        );
        // segments 2..=7 name no real page
        assert_eq!(mmu.data_read(5, 0x0000, 1), (0, MemoryStatus::Unmapped));
    }

    #[test]
    fn boundary_crossing_access_is_deterministic() {
        let mut mmu = mmu_with_code(vec![]);
        // two bytes below the SFR page, two inside it
        mmu.data_write(0, 0xEFFE, 4, 0xAABB_CCDD);
        let (value, _) = mmu.data_read(0, 0xEFFE, 4);
        assert_eq!(value, 0xAABB_CCDD, "RAM and SFR halves both hold their bytes");
        assert_eq!(mmu.sfr().page().load(0xF000), 0xBB, "byte 2 landed in the SFR page");
    }

    #[test]
    fn snapshot_statuses() {
        let mut mmu = mmu_with_code(vec![]);
        let cfg = MemoryConfig::new("rom.bin", "ram.bin");
        let mut storage = TestStorage { code: vec![] };
        assert_eq!(mmu.save_data(&mut storage, &cfg), MemoryStatus::Ok);
        assert_eq!(
            mmu.load_data(&mut storage, &cfg),
            MemoryStatus::LoadingFailed
        );
        assert_eq!(mmu.free(), MemoryStatus::Ok);
        assert_eq!(mmu.save_data(&mut storage, &cfg), MemoryStatus::Uninitialized);
    }
}
