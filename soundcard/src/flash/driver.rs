//! Page/block driver for x8 SLC NAND.
//!
//! All synchronous operations poll the ready line with a ceiling and fail
//! with [`FlashError::Timeout`] instead of hanging. Block erase is also
//! available as a start/poll/finish split so it can be spread over many
//! main-loop iterations.
//!
//! # Example
//!
//! ```ignore
//! let mut flash = FlashStorage::new(bus);
//! let capacity = flash.identify()?;
//! flash.erase_block(3)?.erase_result()?;
//! flash.program_page(3 * 64, &payload, &spare)?.program_result()?;
//! flash.read_page(3 * 64, &mut payload, &mut spare)?;
//! ```

use super::bus::NandBus;
use super::commands as cmd;
use crate::constants::{
    BUSY_POLL_LIMIT, PAGES_2GBIT, PAGES_4GBIT, PAGES_PER_BLOCK, PAGES_PER_SOUND, PAGE_SIZE,
    PAGE_WORDS, SPARE_SIZE,
};
use crate::error::FlashError;

/// Device size reported by the read-ID sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Capacity {
    /// 2 Gbit, 131072 pages.
    Gbit2,
    /// 4 Gbit, 262144 pages.
    Gbit4,
}

impl Capacity {
    /// Map a device code (second ID byte) to a capacity.
    pub const fn from_device_code(code: u8) -> Option<Self> {
        match code {
            cmd::DEVICE_2GBIT => Some(Capacity::Gbit2),
            cmd::DEVICE_4GBIT => Some(Capacity::Gbit4),
            _ => None,
        }
    }

    /// Total pages on the device.
    pub const fn pages(self) -> u32 {
        match self {
            Capacity::Gbit2 => PAGES_2GBIT,
            Capacity::Gbit4 => PAGES_4GBIT,
        }
    }

    /// Total erase blocks on the device.
    pub const fn blocks(self) -> u32 {
        self.pages() / PAGES_PER_BLOCK
    }

    /// Number of sound slots the device holds: 32 or 64.
    pub const fn slot_count(self) -> u32 {
        self.pages() / PAGES_PER_SOUND
    }

    /// Size in gigabits, as reported to the host.
    pub const fn gigabits(self) -> u8 {
        match self {
            Capacity::Gbit2 => 2,
            Capacity::Gbit4 => 4,
        }
    }
}

/// Masked status register value (`FAIL | FAILC`). Zero means success.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Status(u8);

impl Status {
    /// Build from a raw status register read.
    pub const fn from_register(raw: u8) -> Self {
        Status(raw & cmd::STATUS_RESULT_MASK)
    }

    /// The two result bits.
    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn is_ok(self) -> bool {
        self.0 == 0
    }

    /// `Ok` for a successful program, otherwise [`FlashError::ProgramFailed`].
    pub const fn program_result(self) -> Result<(), FlashError> {
        if self.is_ok() {
            Ok(())
        } else {
            Err(FlashError::ProgramFailed(self.0))
        }
    }

    /// `Ok` for a successful erase, otherwise [`FlashError::EraseFailed`].
    pub const fn erase_result(self) -> Result<(), FlashError> {
        if self.is_ok() {
            Ok(())
        } else {
            Err(FlashError::EraseFailed(self.0))
        }
    }
}

/// NAND flash driver.
///
/// Owns the bus. Nothing here retries: a failed status is returned to the
/// caller and a stuck ready line becomes [`FlashError::Timeout`].
pub struct FlashStorage<B> {
    bus: B,
    capacity: Option<Capacity>,
    /// Ready-line polls allowed per synchronous wait.
    poll_limit: u32,
    /// A non-blocking erase was started and not yet finished.
    erase_in_flight: bool,
}

impl<B: NandBus> FlashStorage<B> {
    /// Create a driver with the default busy poll ceiling.
    pub fn new(bus: B) -> Self {
        Self::with_poll_limit(bus, BUSY_POLL_LIMIT)
    }

    /// Create a driver with a custom busy poll ceiling.
    pub fn with_poll_limit(bus: B, poll_limit: u32) -> Self {
        Self {
            bus,
            capacity: None,
            poll_limit,
            erase_in_flight: false,
        }
    }

    /// Give the bus back.
    pub fn release(self) -> B {
        self.bus
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }

    /// Capacity found by the last successful [`identify`](Self::identify).
    pub fn capacity(&self) -> Option<Capacity> {
        self.capacity
    }

    /// Whether a non-blocking erase is outstanding.
    pub fn erase_in_flight(&self) -> bool {
        self.erase_in_flight
    }

    // ── Identification ─────────────────────────────────────────────────

    /// Run the read-ID sequence and cache the capacity.
    pub fn identify(&mut self) -> Result<Capacity, FlashError> {
        self.settle()?;

        let mut id = [0u8; cmd::ID_LENGTH];
        self.transaction(|bus| {
            bus.command(cmd::READ_ID)?;
            bus.address(&[cmd::READ_ID_ADDRESS])?;
            bus.read_data(&mut id)
        })?;

        match Capacity::from_device_code(id[1]) {
            Some(capacity) => {
                info!(
                    "flash: maker {:#x} device {:#x}, {} Gbit",
                    id[0],
                    id[1],
                    capacity.gigabits()
                );
                self.capacity = Some(capacity);
                Ok(capacity)
            }
            None => {
                error!("flash: unknown device code {:#x}", id[1]);
                Err(FlashError::UnknownDevice(id[1]))
            }
        }
    }

    // ── Page read ──────────────────────────────────────────────────────

    /// Read payload and spare of `page`.
    pub fn read_page(
        &mut self,
        page: u32,
        data: &mut [u8; PAGE_SIZE],
        spare: &mut [u8; SPARE_SIZE],
    ) -> Result<(), FlashError> {
        self.read_with(page, 0, |bus| {
            bus.read_data(data)?;
            bus.read_data(spare)
        })
    }

    /// Read only the payload of `page`. The spare bytes are not clocked out.
    pub fn read_page_data(&mut self, page: u32, data: &mut [u8; PAGE_SIZE]) -> Result<(), FlashError> {
        self.read_with(page, 0, |bus| bus.read_data(data))
    }

    /// Payload of `page` as little-endian 32-bit words.
    pub fn read_page_words(&mut self, page: u32, words: &mut [u32]) -> Result<(), FlashError> {
        self.read_with(page, 0, |bus| read_words(bus, words))
    }

    /// Payload as words plus the spare area, in one page read.
    pub fn read_page_words_and_spare(
        &mut self,
        page: u32,
        words: &mut [u32; PAGE_WORDS],
        spare: &mut [u8; SPARE_SIZE],
    ) -> Result<(), FlashError> {
        self.read_with(page, 0, |bus| {
            read_words(bus, words)?;
            bus.read_data(spare)
        })
    }

    /// Only the spare area of `page`, starting the read at column 2048.
    pub fn read_spare(&mut self, page: u32, spare: &mut [u8; SPARE_SIZE]) -> Result<(), FlashError> {
        self.read_with(page, PAGE_SIZE as u16, |bus| bus.read_data(spare))
    }

    /// Load `page` into the chip's page register and stream it out with `f`.
    /// CE# stays asserted from the command through the data phase.
    fn read_with<F>(&mut self, page: u32, column: u16, f: F) -> Result<(), FlashError>
    where
        F: FnOnce(&mut B) -> Result<(), B::Error>,
    {
        self.check_page(page)?;
        self.settle()?;

        self.bus.select().map_err(|_| FlashError::Bus)?;
        let result = self.read_sequence(page, column, f);
        let released = self.bus.deselect().map_err(|_| FlashError::Bus);
        result.and(released)
    }

    fn read_sequence<F>(&mut self, page: u32, column: u16, f: F) -> Result<(), FlashError>
    where
        F: FnOnce(&mut B) -> Result<(), B::Error>,
    {
        self.bus.command(cmd::PAGE_READ).map_err(|_| FlashError::Bus)?;
        self.bus
            .address(&cmd::page_address_at(page, column))
            .map_err(|_| FlashError::Bus)?;
        self.bus
            .command(cmd::PAGE_READ_CONFIRM)
            .map_err(|_| FlashError::Bus)?;
        self.wait_ready()?;
        f(&mut self.bus).map_err(|_| FlashError::Bus)
    }

    // ── Page program ───────────────────────────────────────────────────

    /// Program payload and spare of `page` and return the masked status.
    pub fn program_page(
        &mut self,
        page: u32,
        data: &[u8; PAGE_SIZE],
        spare: &[u8; SPARE_SIZE],
    ) -> Result<Status, FlashError> {
        self.program(page, data, spare)
    }

    /// Program `page` with a zeroed spare area.
    pub fn program_page_data(&mut self, page: u32, data: &[u8; PAGE_SIZE]) -> Result<Status, FlashError> {
        self.program(page, data, &[0u8; SPARE_SIZE])
    }

    fn program(&mut self, page: u32, data: &[u8], spare: &[u8]) -> Result<Status, FlashError> {
        self.check_page(page)?;
        self.settle()?;

        self.transaction(|bus| {
            bus.command(cmd::PAGE_PROGRAM)?;
            bus.address(&cmd::page_address(page))?;
            bus.write_data(data)?;
            bus.write_data(spare)?;
            bus.command(cmd::PAGE_PROGRAM_CONFIRM)
        })?;
        self.wait_ready()?;

        let status = self.read_status()?;
        if !status.is_ok() {
            warn!("flash: program of page {} failed, status {}", page, status.bits());
        }
        Ok(status)
    }

    // ── Block erase ────────────────────────────────────────────────────

    /// Erase `block` and wait for completion. Not for the real-time path.
    pub fn erase_block(&mut self, block: u32) -> Result<Status, FlashError> {
        self.erase_start(block)?;
        self.wait_ready()?;
        self.erase_finish()
    }

    /// Issue the erase of `block` without waiting.
    pub fn erase_start(&mut self, block: u32) -> Result<(), FlashError> {
        self.check_block(block)?;
        self.settle()?;

        let row = cmd::row_address(block * PAGES_PER_BLOCK);
        self.transaction(|bus| {
            bus.command(cmd::BLOCK_ERASE)?;
            bus.address(&row)?;
            bus.command(cmd::BLOCK_ERASE_CONFIRM)
        })?;
        self.erase_in_flight = true;
        trace!("flash: erase of block {} started", block);
        Ok(())
    }

    /// One ready-line sample. `true` once the erase has completed.
    pub fn erase_poll(&mut self) -> Result<bool, FlashError> {
        self.bus.is_ready().map_err(|_| FlashError::Bus)
    }

    /// Read the erase result and clear the in-flight marker.
    pub fn erase_finish(&mut self) -> Result<Status, FlashError> {
        let status = self.read_status()?;
        self.erase_in_flight = false;
        if !status.is_ok() {
            warn!("flash: erase failed, status {}", status.bits());
        }
        Ok(status)
    }

    // ── Helpers ────────────────────────────────────────────────────────

    fn read_status(&mut self) -> Result<Status, FlashError> {
        let mut raw = [0u8];
        self.transaction(|bus| {
            bus.command(cmd::READ_STATUS)?;
            bus.read_data(&mut raw)
        })?;
        Ok(Status::from_register(raw[0]))
    }

    /// Poll R/B# up to the ceiling.
    fn wait_ready(&mut self) -> Result<(), FlashError> {
        for _ in 0..self.poll_limit {
            if self.bus.is_ready().map_err(|_| FlashError::Bus)? {
                return Ok(());
            }
        }
        error!("flash: busy after {} polls", self.poll_limit);
        Err(FlashError::Timeout)
    }

    /// Wait out a pending non-blocking erase before touching the array. The
    /// erase status is not read; whoever started the erase has given it up.
    fn settle(&mut self) -> Result<(), FlashError> {
        if self.erase_in_flight {
            debug!("flash: waiting for in-flight erase");
            self.wait_ready()?;
            self.erase_in_flight = false;
        }
        Ok(())
    }

    /// Run `f` with CE# asserted. CE# is released even if `f` fails.
    fn transaction<F>(&mut self, f: F) -> Result<(), FlashError>
    where
        F: FnOnce(&mut B) -> Result<(), B::Error>,
    {
        self.bus.select().map_err(|_| FlashError::Bus)?;
        let result = f(&mut self.bus).map_err(|_| FlashError::Bus);
        let released = self.bus.deselect().map_err(|_| FlashError::Bus);
        result.and(released)
    }

    fn check_page(&self, page: u32) -> Result<(), FlashError> {
        match self.capacity {
            Some(c) if page >= c.pages() => Err(FlashError::OutOfRange(page)),
            _ => Ok(()),
        }
    }

    fn check_block(&self, block: u32) -> Result<(), FlashError> {
        match self.capacity {
            Some(c) if block >= c.blocks() => Err(FlashError::OutOfRange(block)),
            _ => Ok(()),
        }
    }
}

/// Clock out little-endian words, 4 bytes at a time.
fn read_words<B: NandBus>(bus: &mut B, words: &mut [u32]) -> Result<(), B::Error> {
    let mut raw = [0u8; 4];
    for w in words.iter_mut() {
        bus.read_data(&mut raw)?;
        *w = u32::from_le_bytes(raw);
    }
    Ok(())
}
