//! SD card registers and the logical card object
//!
//! Decoders for the registers a card reports during identification (OCR, CID,
//! CSD, SCR), the card status word returned with R1/R6 responses, and the
//! per-command status classification.

use bitflags::bitflags;
use tock_registers::{LocalRegisterCopy, register_bitfields};

use super::SdhciError;
use super::command::CommandIndex;

/// Logical block size exposed to callers
pub const SD_BLOCK_SIZE: usize = 512;

/// CMD8 argument: 2.7-3.6V window (bits 11:8) and check pattern (bits 7:0)
pub const SEND_IF_COND_PATTERN: u32 = 0x1AA;

// ============================================================================
// Operating Conditions Register
// ============================================================================

register_bitfields! [
    u32,
    /// OCR as returned by ACMD41 (PLSS 5.1)
    pub OCR [
        /// 2.7-3.6V voltage window, one bit per 100 mV step
        VDD_WINDOW OFFSET(15) NUMBITS(9) [],
        /// Switching to 1.8V accepted (S18A) / requested (S18R)
        SWITCH_1V8 OFFSET(24) NUMBITS(1) [],
        /// Over 2TB support (SDUC)
        OVER_2TB OFFSET(27) NUMBITS(1) [],
        /// SDXC power control (XPC, argument only)
        POWER_CONTROL OFFSET(28) NUMBITS(1) [],
        /// UHS-II card status
        UHS2 OFFSET(29) NUMBITS(1) [],
        /// Card Capacity Status (CCS) / Host Capacity Support (HCS)
        CARD_CAPACITY_STATUS OFFSET(30) NUMBITS(1) [],
        /// Card power up status (0 while the card is busy)
        POWER_UP_STATUS OFFSET(31) NUMBITS(1) []
    ]
];

/// Every voltage window bit of the OCR
const OCR_VDD_WINDOW_MASK: u32 = 0x00FF_8000;

/// ACMD41 argument: high capacity support, maximum performance and every
/// voltage window
pub const ACMD41_ARGUMENT: u32 = 0x50FF_8000;

/// Operating Conditions Register
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ocr(u32);

impl Ocr {
    pub const fn from_bits(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn bits(&self) -> u32 {
        self.0
    }

    fn reg(&self) -> LocalRegisterCopy<u32, OCR::Register> {
        LocalRegisterCopy::new(self.0)
    }

    /// Card finished its power up routine
    pub fn is_powered_up(&self) -> bool {
        self.reg().is_set(OCR::POWER_UP_STATUS)
    }

    /// SDHC/SDXC card using block addressing
    pub fn is_high_capacity(&self) -> bool {
        self.reg().is_set(OCR::CARD_CAPACITY_STATUS)
    }

    pub fn voltage_window(&self) -> u32 {
        self.reg().read(OCR::VDD_WINDOW)
    }

    /// The card accepts every voltage window the host asked for.
    ///
    /// A card that answers ACMD41 with any window bit cleared cannot run at
    /// the host's supply voltage.
    pub fn supports_voltage_window(&self) -> bool {
        self.0 & OCR_VDD_WINDOW_MASK == OCR_VDD_WINDOW_MASK
    }

    pub fn accepts_1v8(&self) -> bool {
        self.reg().is_set(OCR::SWITCH_1V8)
    }

    pub fn is_uhs2(&self) -> bool {
        self.reg().is_set(OCR::UHS2)
    }
}

// ============================================================================
// CID / CSD
// ============================================================================

/// Extract bits `hi..=lo` of a 128-bit register
const fn bits128(raw: u128, hi: u32, lo: u32) -> u128 {
    (raw >> lo) & ((1u128 << (hi - lo + 1)) - 1)
}

/// Assemble a 128-bit register from an R2 response.
///
/// The controller strips the CRC byte, so response bits [119:0] hold register
/// bits [127:8]; bits [7:0] come back as zero.
pub fn r2_register(response: &[u32; 4]) -> u128 {
    let raw = u128::from(response[0])
        | (u128::from(response[1]) << 32)
        | (u128::from(response[2]) << 64)
        | (u128::from(response[3]) << 96);
    raw << 8
}

/// Card Identification register (PLSS 5.2)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cid(u128);

impl Cid {
    pub const fn from_bits(raw: u128) -> Self {
        Self(raw)
    }

    pub fn from_response(response: &[u32; 4]) -> Self {
        Self(r2_register(response))
    }

    pub const fn bits(&self) -> u128 {
        self.0
    }

    /// MID, bits [127:120]
    pub const fn manufacturer_id(&self) -> u8 {
        bits128(self.0, 127, 120) as u8
    }

    /// OID, bits [119:104], two ASCII characters
    pub const fn oem_id(&self) -> [u8; 2] {
        (bits128(self.0, 119, 104) as u16).to_be_bytes()
    }

    /// PNM, bits [103:64], five ASCII characters
    pub fn product_name(&self) -> heapless::String<5> {
        let raw = bits128(self.0, 103, 64) as u64;
        raw.to_be_bytes()[3..]
            .iter()
            .map(|&b| if b.is_ascii_graphic() || b == b' ' { b as char } else { '?' })
            .collect()
    }

    /// PRV, bits [63:56], BCD `major.minor`
    pub const fn product_revision(&self) -> (u8, u8) {
        let prv = bits128(self.0, 63, 56) as u8;
        (prv >> 4, prv & 0xF)
    }

    /// PSN, bits [55:24]
    pub const fn serial_number(&self) -> u32 {
        bits128(self.0, 55, 24) as u32
    }

    /// MDT, bits [19:8]: `(year, month)`
    pub const fn manufacturing_date(&self) -> (u16, u8) {
        let mdt = bits128(self.0, 19, 8) as u16;
        (2000 + (mdt >> 4), (mdt & 0xF) as u8)
    }

    /// CRC7, bits [7:1]; zero when read back through the controller
    pub const fn crc(&self) -> u8 {
        bits128(self.0, 7, 1) as u8
    }
}

/// Card Specific Data register (PLSS 5.3)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Csd(u128);

impl Csd {
    pub const fn from_bits(raw: u128) -> Self {
        Self(raw)
    }

    pub fn from_response(response: &[u32; 4]) -> Self {
        Self(r2_register(response))
    }

    pub const fn bits(&self) -> u128 {
        self.0
    }

    /// CSD_STRUCTURE, bits [127:126]: 0 = v1.0, 1 = v2.0, 2 = v3.0
    pub const fn structure(&self) -> u8 {
        bits128(self.0, 127, 126) as u8
    }

    /// READ_BL_LEN, bits [83:80]
    pub const fn max_read_data_block_length(&self) -> u8 {
        bits128(self.0, 83, 80) as u8
    }

    /// C_SIZE: bits [73:62] for v1.0, [69:48] for v2.0 and later
    pub const fn device_size(&self) -> u32 {
        if self.structure() == 0 {
            bits128(self.0, 73, 62) as u32
        } else {
            bits128(self.0, 69, 48) as u32
        }
    }

    /// C_SIZE_MULT, bits [49:47] (v1.0 only)
    pub const fn device_size_multiplier(&self) -> u8 {
        bits128(self.0, 49, 47) as u8
    }

    /// Card capacity in bytes
    pub const fn capacity_bytes(&self) -> u64 {
        if self.structure() == 0 {
            let block_count =
                ((self.device_size() as u64) + 1) << (self.device_size_multiplier() + 2);
            let block_size = 1u64 << self.max_read_data_block_length();
            block_count * block_size
        } else {
            ((self.device_size() as u64) + 1) * 512 * 1024
        }
    }

    /// Capacity in [`SD_BLOCK_SIZE`] units
    pub const fn capacity_in_blocks(&self) -> u64 {
        self.capacity_bytes() / SD_BLOCK_SIZE as u64
    }
}

// ============================================================================
// SD Configuration Register
// ============================================================================

/// SD Configuration Register (PLSS 5.6)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Scr(u64);

impl Scr {
    pub const fn from_bits(raw: u64) -> Self {
        Self(raw)
    }

    /// Decode the 8 bytes returned by ACMD51, most significant byte first
    pub const fn from_bytes(bytes: [u8; 8]) -> Self {
        Self(u64::from_be_bytes(bytes))
    }

    pub const fn bits(&self) -> u64 {
        self.0
    }

    const fn field(&self, hi: u32, lo: u32) -> u8 {
        ((self.0 >> lo) & ((1u64 << (hi - lo + 1)) - 1)) as u8
    }

    /// SCR_STRUCTURE, bits [63:60]
    pub const fn structure(&self) -> u8 {
        self.field(63, 60)
    }

    /// SD_SPEC, bits [59:56]
    pub const fn sd_spec(&self) -> u8 {
        self.field(59, 56)
    }

    /// DATA_STAT_AFTER_ERASE, bit 55
    pub const fn data_stat_after_erase(&self) -> bool {
        self.field(55, 55) != 0
    }

    /// SD_SECURITY, bits [54:52]
    pub const fn sd_security(&self) -> u8 {
        self.field(54, 52)
    }

    /// SD_BUS_WIDTHS, bits [51:48]
    pub const fn bus_widths(&self) -> u8 {
        self.field(51, 48)
    }

    pub const fn supports_4bit_bus(&self) -> bool {
        self.bus_widths() & 0b0100 != 0
    }

    /// SD_SPEC3, bit 47
    pub const fn sd_spec3(&self) -> bool {
        self.field(47, 47) != 0
    }

    /// EX_SECURITY, bits [46:43]
    pub const fn ex_security(&self) -> u8 {
        self.field(46, 43)
    }

    /// SD_SPEC4, bit 42
    pub const fn sd_spec4(&self) -> bool {
        self.field(42, 42) != 0
    }

    /// SD_SPECX, bits [41:38]
    pub const fn sd_specx(&self) -> u8 {
        self.field(41, 38)
    }

    /// CMD_SUPPORT, bits [35:32]
    pub const fn command_support(&self) -> u8 {
        self.field(35, 32)
    }

    /// Physical layer version as `(major, minor)`
    pub const fn physical_layer_version(&self) -> (u8, u8) {
        match (self.sd_spec(), self.sd_spec3(), self.sd_spec4(), self.sd_specx()) {
            (0, _, _, _) => (1, 0),
            (1, _, _, _) => (1, 10),
            (2, false, _, _) => (2, 0),
            (2, true, false, 0) => (3, 0),
            (2, true, true, 0) => (4, 0),
            (2, true, _, 1) => (5, 0),
            (2, true, _, 2) => (6, 0),
            (2, true, _, 3) => (7, 0),
            (2, true, _, _) => (8, 0),
            _ => (0, 0),
        }
    }
}

// ============================================================================
// Card Status
// ============================================================================

bitflags! {
    /// Card status returned in R1 responses (PLSS 4.10.1)
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CardStatus: u32 {
        const OUT_OF_RANGE = 1 << 31;
        const ADDRESS_ERROR = 1 << 30;
        const BLOCK_LEN_ERROR = 1 << 29;
        const ERASE_SEQ_ERROR = 1 << 28;
        const ERASE_PARAM = 1 << 27;
        const WP_VIOLATION = 1 << 26;
        const CARD_IS_LOCKED = 1 << 25;
        const LOCK_UNLOCK_FAILED = 1 << 24;
        const COM_CRC_ERROR = 1 << 23;
        const ILLEGAL_COMMAND = 1 << 22;
        const CARD_ECC_FAILED = 1 << 21;
        const CC_ERROR = 1 << 20;
        const ERROR = 1 << 19;
        const CSD_OVERWRITE = 1 << 16;
        const WP_ERASE_SKIP = 1 << 15;
        const CARD_ECC_DISABLED = 1 << 14;
        const ERASE_RESET = 1 << 13;
        const READY_FOR_DATA = 1 << 8;
        const FX_EVENT = 1 << 6;
        const APP_CMD = 1 << 5;
        const AKE_SEQ_ERROR = 1 << 3;
    }
}

/// CURRENT_STATE field of the card status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardState {
    Idle,
    Ready,
    Identification,
    StandBy,
    Transfer,
    SendingData,
    ReceiveData,
    Programming,
    Disconnect,
    Reserved(u8),
}

impl CardStatus {
    /// Decode a raw R1 status word, keeping the CURRENT_STATE bits
    pub const fn from_response(raw: u32) -> Self {
        Self::from_bits_retain(raw)
    }

    /// CURRENT_STATE, bits [12:9]
    pub const fn current_state(&self) -> CardState {
        match (self.bits() >> 9) & 0xF {
            0 => CardState::Idle,
            1 => CardState::Ready,
            2 => CardState::Identification,
            3 => CardState::StandBy,
            4 => CardState::Transfer,
            5 => CardState::SendingData,
            6 => CardState::ReceiveData,
            7 => CardState::Programming,
            8 => CardState::Disconnect,
            other => CardState::Reserved(other as u8),
        }
    }
}

/// Errors any addressed command may report
const COMMON_ERRORS: CardStatus = CardStatus::ERROR
    .union(CardStatus::CC_ERROR)
    .union(CardStatus::CARD_ECC_FAILED)
    .union(CardStatus::ILLEGAL_COMMAND)
    .union(CardStatus::COM_CRC_ERROR)
    .union(CardStatus::LOCK_UNLOCK_FAILED)
    .union(CardStatus::CARD_IS_LOCKED)
    .union(CardStatus::WP_VIOLATION)
    .union(CardStatus::ERASE_PARAM)
    .union(CardStatus::CSD_OVERWRITE);

/// Only these bits are defined in the R6 status of CMD3
const R6_ERRORS: CardStatus = CardStatus::ERROR
    .union(CardStatus::ILLEGAL_COMMAND)
    .union(CardStatus::COM_CRC_ERROR);

const READ_ERRORS: CardStatus = COMMON_ERRORS
    .union(CardStatus::ADDRESS_ERROR)
    .union(CardStatus::OUT_OF_RANGE);

const WRITE_ERRORS: CardStatus = READ_ERRORS.union(CardStatus::BLOCK_LEN_ERROR);

/// Rebuild a card status from the 16 status bits of an R6 response.
///
/// Bits 12:0 map directly; bits 13, 14 and 15 carry status bits 19, 22 and
/// 23. The upper half of the response (the RCA) is discarded.
pub const fn r6_status(response: u32) -> CardStatus {
    let raw = (response & 0x1FFF)
        | ((response & 0x2000) << 6)
        | ((response & 0x4000) << 8)
        | ((response & 0x8000) << 8);
    CardStatus::from_bits_retain(raw)
}

/// Error bits that matter for `index`, or `None` for unchecked commands
fn checked_errors(index: CommandIndex) -> Option<CardStatus> {
    use CommandIndex::*;

    match index {
        SendRelativeAddr => Some(R6_ERRORS),
        SelectCard | AppSendScr | AppCmd => Some(COMMON_ERRORS),
        SetBlockLen => Some(COMMON_ERRORS.union(CardStatus::BLOCK_LEN_ERROR)),
        ReadSingleBlock | ReadMultipleBlock => Some(READ_ERRORS),
        WriteSingleBlock | WriteMultipleBlock => Some(WRITE_ERRORS),
        _ => None,
    }
}

/// Whether the first response word of `index` reports a card error
pub fn card_status_contains_errors(index: CommandIndex, response: u32) -> bool {
    let Some(errors) = checked_errors(index) else {
        return false;
    };
    let status = if index == CommandIndex::SendRelativeAddr {
        r6_status(response)
    } else {
        CardStatus::from_response(response)
    };

    let found = status.intersection(errors);
    if !found.is_empty() {
        log::debug!("SDHCI: CMD{} card status error: {:?}", index as u8, found);
    }
    !found.is_empty()
}

// ============================================================================
// Logical Card
// ============================================================================

/// How a block index becomes a command argument
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardAddressingMode {
    /// SDSC: argument is a byte offset
    Byte,
    /// SDHC/SDXC: argument is the block index
    Block,
}

impl CardAddressingMode {
    pub fn from_ocr(ocr: Ocr) -> Self {
        if ocr.is_high_capacity() {
            CardAddressingMode::Block
        } else {
            CardAddressingMode::Byte
        }
    }

    /// Command argument for block `index`
    pub fn block_argument(self, index: u64) -> Result<u32, SdhciError> {
        let address = match self {
            CardAddressingMode::Block => index,
            CardAddressingMode::Byte => index
                .checked_mul(SD_BLOCK_SIZE as u64)
                .ok_or(SdhciError::InvalidParameter)?,
        };
        u32::try_from(address).map_err(|_| SdhciError::InvalidParameter)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusWidth {
    OneBit,
    FourBit,
}

impl BusWidth {
    /// ACMD6 argument
    pub const fn acmd6_argument(self) -> u32 {
        match self {
            BusWidth::OneBit => 0b00,
            BusWidth::FourBit => 0b10,
        }
    }
}

/// An identified, selected card ready for block transfers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SdMemoryCard {
    /// Relative Card Address published by CMD3
    pub rca: u16,
    pub ocr: Ocr,
    pub cid: Cid,
    pub scr: Scr,
    pub capacity_in_blocks: u64,
    pub bus_width: BusWidth,
}

impl SdMemoryCard {
    /// Argument for commands addressed to this card
    pub const fn rca_argument(&self) -> u32 {
        (self.rca as u32) << 16
    }

    pub fn addressing_mode(&self) -> CardAddressingMode {
        CardAddressingMode::from_ocr(self.ocr)
    }

    pub fn block_argument(&self, index: u64) -> Result<u32, SdhciError> {
        self.addressing_mode().block_argument(index)
    }

    pub const fn block_size(&self) -> usize {
        SD_BLOCK_SIZE
    }

    pub const fn capacity_bytes(&self) -> u64 {
        self.capacity_in_blocks * SD_BLOCK_SIZE as u64
    }
}
