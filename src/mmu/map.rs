//! The data memory map of the reference platform.
//!
//! Data accesses are routed by the 24-bit flat address `(segment << 16) |
//! offset` through an ordered region table; the first matching entry wins and
//! a catch-all marks everything else unmapped.

/// Number of real 64 KiB code pages.
pub const CODE_PAGE_COUNT: u32 = 2;

/// Code segments above this mask mirror back into the real pages.
pub const CODE_MIRROW_MASK: u8 = 0x01;

/// Data segments above this mask mirror back before the page check.
pub const DATA_MIRROW_MASK: u8 = 0x07;

/// Size of the ROM window: data-segment-0 offsets below this alias code
/// segment 0.
pub const ROM_WINDOW_SIZE: u32 = 0x9000;

/// First offset of the SFR page in data segment 0.
pub const SFR_BASE: u32 = 0xF000;

/// How a region's bytes are backed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum RegionKind {
    /// Read-only alias of code segment 0, with access accounting
    RomWindow,
    /// Plain data RAM
    Ram,
    /// Special function registers, dispatched per offset
    Sfr,
    /// Read-only view of code memory for data segments 1 and above
    CodeSegments,
    /// Nothing there; reads return 0, writes are discarded
    Unmapped,
}

/// One entry of the region table; `end` is exclusive.
pub(crate) struct Region {
    pub start: u32,
    pub end: u32,
    pub kind: RegionKind,
}

/// The ordered region table. Mismatched addresses fall through to the final
/// catch-all.
pub(crate) const DATA_MEMORY_MAP: [Region; 5] = [
    Region {
        start: 0x00_0000,
        end: ROM_WINDOW_SIZE,
        kind: RegionKind::RomWindow,
    },
    Region {
        start: ROM_WINDOW_SIZE,
        end: SFR_BASE,
        kind: RegionKind::Ram,
    },
    Region {
        start: SFR_BASE,
        end: 0x01_0000,
        kind: RegionKind::Sfr,
    },
    Region {
        start: 0x01_0000,
        end: 0x10_0000,
        kind: RegionKind::CodeSegments,
    },
    Region {
        start: 0x00_0000,
        end: 0x100_0000,
        kind: RegionKind::Unmapped,
    },
];

/// First-match lookup over the table.
pub(crate) fn region_for(address: u32) -> &'static Region {
    DATA_MEMORY_MAP
        .iter()
        .find(|region| address >= region.start && address < region.end)
        .unwrap_or(&DATA_MEMORY_MAP[DATA_MEMORY_MAP.len() - 1])
}
