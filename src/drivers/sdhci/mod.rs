//! SDHCI (SD Host Controller Interface) Driver
//!
//! Driver for SD/SDHC memory cards behind an SDHCI 3.0 host controller.
//! [`SdhciController`] brings the controller and card from reset to a
//! selected, data-transfer ready card and then serves single-block reads and
//! writes using PIO through the buffer data port.
//!
//! The controller is generic over its register access ([`RegisterAccess`])
//! and time source ([`Clock`]), so the same protocol code runs over an MMIO
//! mapping or a simulation.

pub mod card;
pub mod clock;
pub mod command;
pub mod regs;
pub mod transaction;

#[cfg(test)]
mod sim;

use core::fmt;

use spin::{Mutex, RwLock};

use crate::time::{Clock, delay_us, nanos_to_ms};
use card::{
    ACMD41_ARGUMENT, BusWidth, CardStatus, Cid, Csd, Ocr, SD_BLOCK_SIZE, SEND_IF_COND_PATTERN, Scr,
    SdMemoryCard,
};
use command::CommandIndex;
use regs::{MmioRegisters, RegisterAccess};
use transaction::{TransactionEngine, TransferBuffer};

/// Specification version field value of an SDHCI 3.0 controller
const SDHCI_SPEC_300: u8 = 2;

/// SDHCI error type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdhciError {
    /// A polled condition did not become true in time
    Timeout,
    /// Controller is not SDHCI 3.0 compatible
    UnsupportedHostVersion,
    /// Card did not answer SEND_IF_COND (SD 1.x or not an SD memory card)
    UnsupportedCard,
    /// Card answered but rejected the requested voltage or interface
    UnusableCard,
    /// Card or controller reported an error
    IoError,
    /// No card inserted or attached
    NoCard,
    /// Register block could not be mapped
    NotInitialized,
    /// Request does not fit the card or the buffer
    InvalidParameter,
}

impl fmt::Display for SdhciError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            SdhciError::Timeout => "operation timed out",
            SdhciError::UnsupportedHostVersion => "unsupported host controller version",
            SdhciError::UnsupportedCard => "unsupported card",
            SdhciError::UnusableCard => "card rejected the requested operating conditions",
            SdhciError::IoError => "I/O error",
            SdhciError::NoCard => "no card",
            SdhciError::NotInitialized => "controller not initialized",
            SdhciError::InvalidParameter => "invalid parameter",
        };
        f.write_str(msg)
    }
}

/// Clock frequencies and time budgets of the driver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SdhciConfig {
    /// Card identification clock (PLSS 4.2)
    pub identification_clock_hz: u32,
    /// Default speed clock used after identification
    pub default_clock_hz: u32,
    /// Base clock used when the capabilities register does not report one
    pub fallback_base_clock_hz: u32,
    pub command_timeout_ms: u64,
    pub data_timeout_ms: u64,
    pub reset_timeout_ms: u64,
    pub clock_stable_timeout_ms: u64,
    /// Longest R1b busy signal
    pub busy_timeout_ms: u64,
    /// Budget of the whole ACMD41 power up loop
    pub op_cond_timeout_ms: u64,
    pub op_cond_retry_interval_us: u64,
    /// Settle time after switching SD bus power on
    pub power_stable_delay_ms: u64,
}

impl Default for SdhciConfig {
    fn default() -> Self {
        Self {
            identification_clock_hz: 400_000,
            default_clock_hz: 25_000_000,
            // Raspberry Pi EMMC clock
            fallback_base_clock_hz: 41_666_666,
            command_timeout_ms: 1000,
            data_timeout_ms: 5000,
            reset_timeout_ms: 100,
            clock_stable_timeout_ms: 20,
            busy_timeout_ms: 1000,
            op_cond_timeout_ms: 1000,
            op_cond_retry_interval_us: 1000,
            power_stable_delay_ms: 50,
        }
    }
}

/// SDHCI Controller
///
/// All register traffic goes through the engine lock, held for a whole
/// request. The attached card is replaced as a unit on (re)initialization.
pub struct SdhciController<R: RegisterAccess, C: Clock> {
    engine: Mutex<TransactionEngine<R, C>>,
    card: RwLock<Option<SdMemoryCard>>,
}

impl<C: Clock> SdhciController<MmioRegisters, C> {
    /// Create a controller over the register block mapped at `base`.
    ///
    /// # Safety
    ///
    /// Same contract as [`MmioRegisters::new`].
    pub unsafe fn from_mmio(
        base: *mut u8,
        clock: C,
        config: SdhciConfig,
    ) -> Result<Self, SdhciError> {
        // SAFETY: forwarded to the caller
        let regs = unsafe { MmioRegisters::new(base) }.ok_or(SdhciError::NotInitialized)?;
        Ok(Self::new(regs, clock, config))
    }
}

impl<R: RegisterAccess, C: Clock> SdhciController<R, C> {
    pub fn new(regs: R, clock: C, config: SdhciConfig) -> Self {
        Self {
            engine: Mutex::new(TransactionEngine::new(regs, clock, config)),
            card: RwLock::new(None),
        }
    }

    /// Reset the controller and identify the inserted card.
    ///
    /// Any previously attached card is dropped first; on failure no card is
    /// attached.
    pub fn initialize(&self) -> Result<SdMemoryCard, SdhciError> {
        let mut engine = self.engine.lock();
        *self.card.write() = None;

        let version = engine.host_version();
        if version < SDHCI_SPEC_300 {
            log::error!("SDHCI: Unsupported host controller version {}", version);
            return Err(SdhciError::UnsupportedHostVersion);
        }
        log::info!("SDHCI: Host controller version {}.00", version + 1);

        engine.reset_host_controller()?;
        engine.set_bus_power();
        engine.enable_interrupts();

        if !engine.card_inserted() {
            log::info!("SDHCI: No card detected");
            return Err(SdhciError::NoCard);
        }

        let card = match Self::initialize_inserted_card(&mut engine) {
            Ok(card) => card,
            Err(e) => {
                log::error!("SDHCI: Failed to initialize card: {:?}", e);
                return Err(e);
            }
        };

        *self.card.write() = Some(card);
        Ok(card)
    }

    /// Card identification flow (PLSS 4.2.3, Figure 4-2)
    fn initialize_inserted_card(
        engine: &mut TransactionEngine<R, C>,
    ) -> Result<SdMemoryCard, SdhciError> {
        let config = *engine.config();

        engine.sd_clock_supply(config.identification_clock_hz)?;

        log::debug!("SDHCI: Sending CMD0 (GO_IDLE_STATE)");
        engine.send_command(CommandIndex::GoIdleState, 0)?;

        log::debug!("SDHCI: Sending CMD8 (SEND_IF_COND)");
        match engine.send_command(CommandIndex::SendIfCond, SEND_IF_COND_PATTERN) {
            Ok(resp) if resp[0] == SEND_IF_COND_PATTERN => {
                log::debug!("SDHCI: SD 2.0+ card detected");
            }
            Ok(resp) => {
                log::debug!("SDHCI: CMD8 response mismatch: {:#x}", resp[0]);
                return Err(SdhciError::UnusableCard);
            }
            Err(SdhciError::Timeout) => {
                log::debug!("SDHCI: CMD8 not answered, not an SD 2.0 card");
                return Err(SdhciError::UnsupportedCard);
            }
            Err(e) => return Err(e),
        }

        let ocr = Self::wait_card_power_up(engine)?;
        log::info!(
            "SDHCI: Card ready, OCR={:#010x} ({})",
            ocr.bits(),
            if ocr.is_high_capacity() { "SDHC/SDXC" } else { "SDSC" }
        );

        log::debug!("SDHCI: Sending CMD2 (ALL_SEND_CID)");
        let cid = Cid::from_response(&engine.send_command(CommandIndex::AllSendCid, 0)?);
        log::debug!(
            "SDHCI: CID manufacturer={:#04x} product={} serial={:#010x}",
            cid.manufacturer_id(),
            cid.product_name(),
            cid.serial_number()
        );

        log::debug!("SDHCI: Sending CMD3 (SEND_RELATIVE_ADDR)");
        let resp = engine.send_command(CommandIndex::SendRelativeAddr, 0)?;
        let rca = (resp[0] >> 16) as u16;
        let rca_argument = u32::from(rca) << 16;
        log::debug!("SDHCI: RCA={:#06x}", rca);

        log::debug!("SDHCI: Sending CMD9 (SEND_CSD)");
        let csd = Csd::from_response(&engine.send_command(CommandIndex::SendCsd, rca_argument)?);
        let capacity_in_blocks = csd.capacity_in_blocks();
        log::debug!(
            "SDHCI: CSD structure={}, capacity={} blocks ({} MB)",
            csd.structure(),
            capacity_in_blocks,
            csd.capacity_bytes() / (1024 * 1024)
        );

        engine.sd_clock_frequency_change(config.default_clock_hz)?;

        log::debug!("SDHCI: Sending CMD7 (SELECT_CARD)");
        engine.send_command(CommandIndex::SelectCard, rca_argument)?;

        if !ocr.is_high_capacity() {
            log::debug!("SDHCI: Sending CMD16 (SET_BLOCKLEN)");
            engine.send_command(CommandIndex::SetBlockLen, SD_BLOCK_SIZE as u32)?;
        }

        log::debug!("SDHCI: Sending ACMD51 (SEND_SCR)");
        engine.send_command(CommandIndex::AppCmd, rca_argument)?;
        let mut scr_bytes = [0u8; 8];
        engine.sync_block_transfer(
            CommandIndex::AppSendScr,
            0,
            1,
            scr_bytes.len() as u16,
            TransferBuffer::Read(&mut scr_bytes),
        )?;
        let scr = Scr::from_bytes(scr_bytes);
        log::debug!("SDHCI: SCR={:#018x}", scr.bits());

        let bus_width = if scr.supports_4bit_bus() {
            log::debug!("SDHCI: Switching to 4-bit mode");
            engine.send_command(CommandIndex::AppCmd, rca_argument)?;
            engine.send_command(CommandIndex::AppSetBusWidth, BusWidth::FourBit.acmd6_argument())?;
            engine.set_host_bus_width(BusWidth::FourBit);
            BusWidth::FourBit
        } else {
            log::warn!("SDHCI: Card does not support a 4-bit bus, staying in 1-bit mode");
            BusWidth::OneBit
        };

        let card = SdMemoryCard {
            rca,
            ocr,
            cid,
            scr,
            capacity_in_blocks,
            bus_width,
        };

        log::info!(
            "SDHCI: Card initialized: {} blocks x {} bytes = {} MB",
            card.capacity_in_blocks,
            card.block_size(),
            card.capacity_bytes() / (1024 * 1024)
        );

        Ok(card)
    }

    /// ACMD41 loop: repeat until the card reports power up complete
    fn wait_card_power_up(engine: &mut TransactionEngine<R, C>) -> Result<Ocr, SdhciError> {
        let config = *engine.config();
        log::debug!("SDHCI: Starting ACMD41 loop");

        let start = engine.clock().now_nanoseconds();
        loop {
            let response = engine
                .send_command(CommandIndex::AppCmd, 0)
                .and_then(|_| engine.send_command(CommandIndex::AppSendOpCond, ACMD41_ARGUMENT));

            match response {
                Ok(resp) => {
                    let ocr = Ocr::from_bits(resp[0]);
                    if !ocr.supports_voltage_window() {
                        log::error!(
                            "SDHCI: Card declined the voltage window, OCR={:#010x}",
                            ocr.bits()
                        );
                        return Err(SdhciError::UnusableCard);
                    }
                    if ocr.is_powered_up() {
                        return Ok(ocr);
                    }
                }
                Err(e) => log::debug!("SDHCI: ACMD41 failed: {:?}", e),
            }

            let elapsed = engine.clock().now_nanoseconds().saturating_sub(start);
            if nanos_to_ms(elapsed) >= config.op_cond_timeout_ms {
                log::error!("SDHCI: Card initialization timeout");
                return Err(SdhciError::Timeout);
            }
            delay_us(engine.clock(), config.op_cond_retry_interval_us);
        }
    }

    /// Snapshot of the attached card
    pub fn card(&self) -> Option<SdMemoryCard> {
        *self.card.read()
    }

    pub fn is_card_inserted(&self) -> bool {
        self.engine.lock().card_inserted()
    }

    /// Forget the attached card
    pub fn detach(&self) {
        let _engine = self.engine.lock();
        if self.card.write().take().is_some() {
            log::info!("SDHCI: Card detached");
        }
    }

    /// Capacity of the attached card in blocks, 0 without a card
    pub fn num_blocks(&self) -> u64 {
        self.card().map_or(0, |card| card.capacity_in_blocks)
    }

    pub fn block_size(&self) -> usize {
        SD_BLOCK_SIZE
    }

    /// Take the engine lock for a request to the attached card
    fn lock_card(
        &self,
    ) -> Result<(spin::MutexGuard<'_, TransactionEngine<R, C>>, SdMemoryCard), SdhciError> {
        let engine = self.engine.lock();
        let card = self.card().ok_or(SdhciError::NoCard)?;
        if !engine.card_inserted() {
            log::warn!("SDHCI: Card removed");
            return Err(SdhciError::NoCard);
        }
        Ok((engine, card))
    }

    fn check_request(
        card: &SdMemoryCard,
        block_index: u64,
        block_count: u32,
        buffer_len: usize,
    ) -> Result<(), SdhciError> {
        if buffer_len != block_count as usize * SD_BLOCK_SIZE {
            return Err(SdhciError::InvalidParameter);
        }
        let end = block_index
            .checked_add(u64::from(block_count))
            .ok_or(SdhciError::InvalidParameter)?;
        if end > card.capacity_in_blocks {
            log::debug!(
                "SDHCI: Request {}+{} beyond {} blocks",
                block_index,
                block_count,
                card.capacity_in_blocks
            );
            return Err(SdhciError::InvalidParameter);
        }
        Ok(())
    }

    /// Read `block_count` blocks starting at `block_index`, one READ_SINGLE_BLOCK
    /// per block
    pub fn read(
        &self,
        block_index: u64,
        block_count: u32,
        buffer: &mut [u8],
    ) -> Result<(), SdhciError> {
        let (mut engine, card) = self.lock_card()?;
        Self::check_request(&card, block_index, block_count, buffer.len())?;

        for (block, chunk) in (block_index..).zip(buffer.chunks_mut(SD_BLOCK_SIZE)) {
            let argument = card.block_argument(block)?;
            if let Err(e) = engine.sync_block_transfer(
                CommandIndex::ReadSingleBlock,
                argument,
                1,
                SD_BLOCK_SIZE as u16,
                TransferBuffer::Read(chunk),
            ) {
                log::error!("SDHCI: Read failed at block {}: {:?}", block, e);
                return Err(e);
            }
        }

        Ok(())
    }

    /// Write `block_count` blocks starting at `block_index`, one
    /// WRITE_SINGLE_BLOCK per block
    pub fn write(
        &self,
        block_index: u64,
        block_count: u32,
        buffer: &[u8],
    ) -> Result<(), SdhciError> {
        let (mut engine, card) = self.lock_card()?;
        Self::check_request(&card, block_index, block_count, buffer.len())?;

        for (block, chunk) in (block_index..).zip(buffer.chunks(SD_BLOCK_SIZE)) {
            let argument = card.block_argument(block)?;
            if let Err(e) = engine.sync_block_transfer(
                CommandIndex::WriteSingleBlock,
                argument,
                1,
                SD_BLOCK_SIZE as u16,
                TransferBuffer::Write(chunk),
            ) {
                log::error!("SDHCI: Write failed at block {}: {:?}", block, e);
                return Err(e);
            }
        }

        Ok(())
    }

    /// Read a single block
    pub fn read_block(&self, block_index: u64, buffer: &mut [u8]) -> Result<(), SdhciError> {
        self.read(block_index, 1, buffer)
    }

    /// Write a single block
    pub fn write_block(&self, block_index: u64, buffer: &[u8]) -> Result<(), SdhciError> {
        self.write(block_index, 1, buffer)
    }

    /// Query the attached card's status with SEND_STATUS
    pub fn card_status(&self) -> Result<CardStatus, SdhciError> {
        let (mut engine, card) = self.lock_card()?;
        let resp = engine.send_command(CommandIndex::SendStatus, card.rca_argument())?;
        Ok(CardStatus::from_response(resp[0]))
    }
}
