//! In-memory NAND chip speaking the real command protocol.
//!
//! Decodes the same latch sequence a parallel bus drives into a physical
//! part: command and address cycles, a page register, an R/B# countdown and
//! a status register. Programming can only clear bits, erase sets a whole
//! block back to `0xFF`. Protocol misuse (array commands while busy, data
//! phases without a preceding command, accesses without CE#) is reported as
//! an error so driver bugs surface in tests instead of silently working.
//!
//! Pages are stored sparsely; untouched pages read as erased.

use std::boxed::Box;
use std::collections::HashMap;
use std::vec::Vec;

use super::bus::NandBus;
use super::commands as cmd;
use crate::constants::{PAGES_2GBIT, PAGES_4GBIT, PAGES_PER_BLOCK, PAGE_SIZE, PAGE_TOTAL_SIZE};

/// Protocol violation detected by [`SimNand`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimError {
    /// Bus access with CE# released.
    NotSelected,
    /// Array access while R/B# is low.
    Busy,
    /// Unknown command, wrong number of address cycles, or data overrun.
    Protocol,
    /// Row address beyond the device.
    AddressOutOfRange(u32),
    /// Injected read fault on this row.
    ReadFault(u32),
}

/// Operation counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimStats {
    pub page_reads: u32,
    pub page_programs: u32,
    pub block_erases: u32,
    pub ready_polls: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Idle,
    ReadIdSetup,
    ReadId,
    ReadSetup,
    Read,
    ProgramSetup,
    EraseSetup,
    Status,
}

/// Simulated x8 SLC NAND part.
pub struct SimNand {
    pages: HashMap<u32, Box<[u8; PAGE_TOTAL_SIZE]>>,
    total_pages: u32,
    id: [u8; cmd::ID_LENGTH],
    selected: bool,
    mode: Mode,
    address: Vec<u8>,
    register: Box<[u8; PAGE_TOTAL_SIZE]>,
    column: usize,
    status: u8,
    busy_remaining: u32,
    read_busy: u32,
    program_busy: u32,
    erase_busy: u32,
    fail_program_page: Option<u32>,
    fail_erase_block: Option<u32>,
    fail_read_page: Option<u32>,
    stats: SimStats,
}

impl SimNand {
    fn with_geometry(total_pages: u32, device_code: u8) -> Self {
        SimNand {
            pages: HashMap::new(),
            total_pages,
            id: [cmd::MAKER_MICRON, device_code, 0x90, 0x95, 0x06],
            selected: false,
            mode: Mode::Idle,
            address: Vec::new(),
            register: Box::new([0xFF; PAGE_TOTAL_SIZE]),
            column: 0,
            status: 0,
            busy_remaining: 0,
            read_busy: 1,
            program_busy: 2,
            erase_busy: 4,
            fail_program_page: None,
            fail_erase_block: None,
            fail_read_page: None,
            stats: SimStats::default(),
        }
    }

    /// A blank 2 Gbit part.
    pub fn new_2gbit() -> Self {
        Self::with_geometry(PAGES_2GBIT, cmd::DEVICE_2GBIT)
    }

    /// A blank 4 Gbit part.
    pub fn new_4gbit() -> Self {
        Self::with_geometry(PAGES_4GBIT, cmd::DEVICE_4GBIT)
    }

    /// A part answering read-ID with an arbitrary device code.
    pub fn with_device_code(code: u8) -> Self {
        Self::with_geometry(PAGES_2GBIT, code)
    }

    /// Ready polls that report busy after read, program and erase.
    /// `u32::MAX` models a part whose R/B# never returns high.
    pub fn set_busy_polls(&mut self, read: u32, program: u32, erase: u32) {
        self.read_busy = read;
        self.program_busy = program;
        self.erase_busy = erase;
    }

    /// Make the program of `page` report FAIL and leave the page untouched.
    pub fn fail_program_at(&mut self, page: Option<u32>) {
        self.fail_program_page = page;
    }

    /// Make the erase of `block` report FAIL and leave the block untouched.
    pub fn fail_erase_at(&mut self, block: Option<u32>) {
        self.fail_erase_block = block;
    }

    /// Make the read confirm of `page` fail on the bus.
    pub fn fail_read_at(&mut self, page: Option<u32>) {
        self.fail_read_page = page;
    }

    pub fn stats(&self) -> SimStats {
        self.stats
    }

    pub fn reset_stats(&mut self) {
        self.stats = SimStats::default();
    }

    pub fn is_busy(&self) -> bool {
        self.busy_remaining > 0
    }

    /// Payload and spare of `page`, `None` if it is erased.
    pub fn page(&self, page: u32) -> Option<&[u8; PAGE_TOTAL_SIZE]> {
        self.pages.get(&page).map(|p| &**p)
    }

    /// Whether every byte of `page` reads `0xFF`.
    pub fn is_erased(&self, page: u32) -> bool {
        self.pages
            .get(&page)
            .map_or(true, |p| p.iter().all(|&b| b == 0xFF))
    }

    /// Store a page directly, bypassing the bus. For seeding test fixtures.
    pub fn write_raw(&mut self, page: u32, data: &[u8], spare: &[u8]) {
        let mut buf = Box::new([0xFF; PAGE_TOTAL_SIZE]);
        buf[..data.len()].copy_from_slice(data);
        buf[PAGE_SIZE..PAGE_SIZE + spare.len()].copy_from_slice(spare);
        self.pages.insert(page, buf);
    }

    fn guard(&self) -> Result<(), SimError> {
        if self.selected {
            Ok(())
        } else {
            Err(SimError::NotSelected)
        }
    }

    fn row(&self, offset: usize) -> Result<u32, SimError> {
        let a = self.address.get(offset..offset + cmd::ROW_CYCLES).ok_or(SimError::Protocol)?;
        let row = u32::from(a[0]) | (u32::from(a[1]) << 8) | (u32::from(a[2]) << 16);
        if row >= self.total_pages {
            return Err(SimError::AddressOutOfRange(row));
        }
        Ok(row)
    }

    fn expect_address_cycles(&self, n: usize) -> Result<(), SimError> {
        if self.address.len() == n {
            Ok(())
        } else {
            Err(SimError::Protocol)
        }
    }

    fn confirm_read(&mut self) -> Result<(), SimError> {
        self.expect_address_cycles(cmd::COLUMN_CYCLES + cmd::ROW_CYCLES)?;
        let row = self.row(cmd::COLUMN_CYCLES)?;
        let column = usize::from(self.address[0]) | (usize::from(self.address[1]) << 8);
        if column >= PAGE_TOTAL_SIZE {
            return Err(SimError::Protocol);
        }
        if self.fail_read_page == Some(row) {
            self.mode = Mode::Idle;
            return Err(SimError::ReadFault(row));
        }
        *self.register = match self.pages.get(&row) {
            Some(p) => **p,
            None => [0xFF; PAGE_TOTAL_SIZE],
        };
        self.column = column;
        self.busy_remaining = self.read_busy;
        self.stats.page_reads += 1;
        self.mode = Mode::Read;
        Ok(())
    }

    fn confirm_program(&mut self) -> Result<(), SimError> {
        self.expect_address_cycles(cmd::COLUMN_CYCLES + cmd::ROW_CYCLES)?;
        let row = self.row(cmd::COLUMN_CYCLES)?;
        self.stats.page_programs += 1;
        self.busy_remaining = self.program_busy;
        self.mode = Mode::Idle;

        if self.fail_program_page == Some(row) {
            self.status = 0x01;
            return Ok(());
        }
        let stored = self
            .pages
            .entry(row)
            .or_insert_with(|| Box::new([0xFF; PAGE_TOTAL_SIZE]));
        for (cell, new) in stored.iter_mut().zip(self.register.iter()) {
            *cell &= *new;
        }
        self.status = 0;
        Ok(())
    }

    fn confirm_erase(&mut self) -> Result<(), SimError> {
        self.expect_address_cycles(cmd::ROW_CYCLES)?;
        let row = self.row(0)?;
        if row % PAGES_PER_BLOCK != 0 {
            return Err(SimError::Protocol);
        }
        let block = row / PAGES_PER_BLOCK;
        self.stats.block_erases += 1;
        self.busy_remaining = self.erase_busy;
        self.mode = Mode::Idle;

        if self.fail_erase_block == Some(block) {
            self.status = 0x01;
            return Ok(());
        }
        for page in row..row + PAGES_PER_BLOCK {
            self.pages.remove(&page);
        }
        self.status = 0;
        Ok(())
    }
}

impl NandBus for SimNand {
    type Error = SimError;

    fn select(&mut self) -> Result<(), SimError> {
        self.selected = true;
        Ok(())
    }

    fn deselect(&mut self) -> Result<(), SimError> {
        self.selected = false;
        Ok(())
    }

    fn command(&mut self, c: u8) -> Result<(), SimError> {
        self.guard()?;
        if c != cmd::READ_STATUS && self.is_busy() {
            return Err(SimError::Busy);
        }
        match (c, self.mode) {
            (cmd::READ_STATUS, _) => self.mode = Mode::Status,
            (cmd::READ_ID, _) => {
                self.address.clear();
                self.mode = Mode::ReadIdSetup;
            }
            (cmd::PAGE_READ, _) => {
                self.address.clear();
                self.mode = Mode::ReadSetup;
            }
            (cmd::PAGE_READ_CONFIRM, Mode::ReadSetup) => self.confirm_read()?,
            (cmd::PAGE_PROGRAM, _) => {
                self.address.clear();
                self.register.fill(0xFF);
                self.column = 0;
                self.mode = Mode::ProgramSetup;
            }
            (cmd::PAGE_PROGRAM_CONFIRM, Mode::ProgramSetup) => self.confirm_program()?,
            (cmd::BLOCK_ERASE, _) => {
                self.address.clear();
                self.mode = Mode::EraseSetup;
            }
            (cmd::BLOCK_ERASE_CONFIRM, Mode::EraseSetup) => self.confirm_erase()?,
            _ => return Err(SimError::Protocol),
        }
        Ok(())
    }

    fn address(&mut self, bytes: &[u8]) -> Result<(), SimError> {
        self.guard()?;
        match self.mode {
            Mode::ReadIdSetup => {
                if bytes != [cmd::READ_ID_ADDRESS] {
                    return Err(SimError::Protocol);
                }
                self.column = 0;
                self.mode = Mode::ReadId;
            }
            Mode::ReadSetup | Mode::ProgramSetup | Mode::EraseSetup => {
                self.address.extend_from_slice(bytes)
            }
            _ => return Err(SimError::Protocol),
        }
        Ok(())
    }

    fn write_data(&mut self, data: &[u8]) -> Result<(), SimError> {
        self.guard()?;
        if self.mode != Mode::ProgramSetup {
            return Err(SimError::Protocol);
        }
        let end = self.column + data.len();
        let dst = self.register.get_mut(self.column..end).ok_or(SimError::Protocol)?;
        dst.copy_from_slice(data);
        self.column = end;
        Ok(())
    }

    fn read_data(&mut self, buf: &mut [u8]) -> Result<(), SimError> {
        self.guard()?;
        match self.mode {
            Mode::Status => {
                let ready = if self.is_busy() { 0 } else { cmd::STATUS_READY };
                buf.fill(self.status | ready | cmd::STATUS_NOT_PROTECTED);
            }
            Mode::ReadId => {
                let end = self.column + buf.len();
                let src = self.id.get(self.column..end).ok_or(SimError::Protocol)?;
                buf.copy_from_slice(src);
                self.column = end;
            }
            Mode::Read => {
                if self.is_busy() {
                    return Err(SimError::Busy);
                }
                let end = self.column + buf.len();
                let src = self.register.get(self.column..end).ok_or(SimError::Protocol)?;
                buf.copy_from_slice(src);
                self.column = end;
            }
            _ => return Err(SimError::Protocol),
        }
        Ok(())
    }

    fn is_ready(&mut self) -> Result<bool, SimError> {
        self.stats.ready_polls += 1;
        if self.busy_remaining > 0 {
            self.busy_remaining -= 1;
            return Ok(false);
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn program(sim: &mut SimNand, page: u32, data: &[u8], spare: &[u8]) {
        sim.select().unwrap();
        sim.command(cmd::PAGE_PROGRAM).unwrap();
        sim.address(&cmd::page_address(page)).unwrap();
        sim.write_data(data).unwrap();
        sim.write_data(spare).unwrap();
        sim.command(cmd::PAGE_PROGRAM_CONFIRM).unwrap();
        while !sim.is_ready().unwrap() {}
        sim.deselect().unwrap();
    }

    #[test]
    fn unprogrammed_pages_read_erased() {
        let sim = SimNand::new_2gbit();
        assert!(sim.is_erased(0));
        assert!(sim.page(12).is_none());
    }

    #[test]
    fn program_only_clears_bits() {
        let mut sim = SimNand::new_2gbit();
        program(&mut sim, 3, &[0xF0; PAGE_SIZE], &[]);
        program(&mut sim, 3, &[0x3C; PAGE_SIZE], &[]);
        let page = sim.page(3).unwrap();
        assert_eq!(page[0], 0x30);
        assert_eq!(page[PAGE_SIZE], 0xFF, "spare untouched");
    }

    #[test]
    fn array_command_while_busy_is_rejected() {
        let mut sim = SimNand::new_2gbit();
        sim.set_busy_polls(0, 0, 3);
        sim.select().unwrap();
        sim.command(cmd::BLOCK_ERASE).unwrap();
        sim.address(&cmd::row_address(64)).unwrap();
        sim.command(cmd::BLOCK_ERASE_CONFIRM).unwrap();
        assert_eq!(sim.command(cmd::PAGE_READ), Err(SimError::Busy));
        // Status is always allowed.
        sim.command(cmd::READ_STATUS).unwrap();
        let mut st = [0u8];
        sim.read_data(&mut st).unwrap();
        assert_eq!(st[0] & cmd::STATUS_READY, 0);
    }

    #[test]
    fn erase_requires_block_aligned_row() {
        let mut sim = SimNand::new_2gbit();
        sim.select().unwrap();
        sim.command(cmd::BLOCK_ERASE).unwrap();
        sim.address(&cmd::row_address(65)).unwrap();
        assert_eq!(sim.command(cmd::BLOCK_ERASE_CONFIRM), Err(SimError::Protocol));
    }

    #[test]
    fn read_honours_column_address() {
        let mut sim = SimNand::new_2gbit();
        sim.write_raw(2, &[0x11; PAGE_SIZE], &[0x22, 0x33]);
        sim.select().unwrap();
        sim.command(cmd::PAGE_READ).unwrap();
        sim.address(&cmd::page_address_at(2, PAGE_SIZE as u16)).unwrap();
        sim.command(cmd::PAGE_READ_CONFIRM).unwrap();
        while !sim.is_ready().unwrap() {}
        let mut spare = [0u8; 2];
        sim.read_data(&mut spare).unwrap();
        assert_eq!(spare, [0x22, 0x33]);
    }

    #[test]
    fn access_without_chip_select_fails() {
        let mut sim = SimNand::new_2gbit();
        assert_eq!(sim.command(cmd::READ_ID), Err(SimError::NotSelected));
    }

    #[test]
    fn row_beyond_device_is_rejected() {
        let mut sim = SimNand::new_2gbit();
        sim.select().unwrap();
        sim.command(cmd::PAGE_READ).unwrap();
        sim.address(&cmd::page_address(PAGES_2GBIT)).unwrap();
        assert_eq!(
            sim.command(cmd::PAGE_READ_CONFIRM),
            Err(SimError::AddressOutOfRange(PAGES_2GBIT))
        );
    }
}
