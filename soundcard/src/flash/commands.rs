//! NAND command opcodes, identification codes and status bits.
//!
//! Values follow the ONFI command set used by 2/4 Gbit x8 SLC parts with
//! 2048 + 64 byte pages. Multi-cycle commands list both cycles.

// A few codes are kept for reference and only used by the simulator.
#![allow(dead_code)]

// ── Page read ──────────────────────────────────────────────────────────────

/// Page read, first cycle. Followed by 2 column and 3 row address bytes.
pub const PAGE_READ: u8 = 0x00;

/// Page read, confirm cycle. The chip goes busy for tR.
pub const PAGE_READ_CONFIRM: u8 = 0x30;

// ── Page program ───────────────────────────────────────────────────────────

/// Page program, first cycle. Followed by 5 address bytes and the data.
pub const PAGE_PROGRAM: u8 = 0x80;

/// Page program, confirm cycle. The chip goes busy for tPROG.
pub const PAGE_PROGRAM_CONFIRM: u8 = 0x10;

// ── Block erase ────────────────────────────────────────────────────────────

/// Block erase, first cycle. Followed by 3 row address bytes.
pub const BLOCK_ERASE: u8 = 0x60;

/// Block erase, confirm cycle. The chip goes busy for tBERS.
pub const BLOCK_ERASE_CONFIRM: u8 = 0xD0;

// ── Status and identification ──────────────────────────────────────────────

/// Read status register. One data byte follows.
pub const READ_STATUS: u8 = 0x70;

/// Read ID. One address byte (0x00) then 5 data bytes.
pub const READ_ID: u8 = 0x90;

/// Address byte for the JEDEC manufacturer/device ID.
pub const READ_ID_ADDRESS: u8 = 0x00;

/// Bytes returned by [`READ_ID`].
pub const ID_LENGTH: usize = 5;

/// Micron manufacturer code (first ID byte).
pub const MAKER_MICRON: u8 = 0x2C;

/// Device code of a 2 Gbit x8 part (second ID byte).
pub const DEVICE_2GBIT: u8 = 0xDA;

/// Device code of a 4 Gbit x8 part.
pub const DEVICE_4GBIT: u8 = 0xDC;

// ── Status register ────────────────────────────────────────────────────────

/// Status bits the driver reports.
/// - Bit 0: FAIL (last program/erase failed)
/// - Bit 1: FAILC (previous cached operation failed)
pub const STATUS_RESULT_MASK: u8 = 0x03;

/// Status bit 6: RDY (array ready).
pub const STATUS_READY: u8 = 0x40;

/// Status bit 7: WP# (1 = not write protected).
pub const STATUS_NOT_PROTECTED: u8 = 0x80;

// ── Addressing ─────────────────────────────────────────────────────────────

/// Column address cycles for page read/program.
pub const COLUMN_CYCLES: usize = 2;

/// Row address cycles for all array operations.
pub const ROW_CYCLES: usize = 3;

/// Split a page index into its little-endian row address bytes.
pub const fn row_address(page: u32) -> [u8; ROW_CYCLES] {
    [page as u8, (page >> 8) as u8, (page >> 16) as u8]
}

/// Full 5-cycle address for a page operation starting at column 0.
pub const fn page_address(page: u32) -> [u8; COLUMN_CYCLES + ROW_CYCLES] {
    page_address_at(page, 0)
}

/// Full 5-cycle address for a page operation starting at byte `column`.
/// Column 2048 is the first spare byte.
pub const fn page_address_at(page: u32, column: u16) -> [u8; COLUMN_CYCLES + ROW_CYCLES] {
    let row = row_address(page);
    [column as u8, (column >> 8) as u8, row[0], row[1], row[2]]
}
