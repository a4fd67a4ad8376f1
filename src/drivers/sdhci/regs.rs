//! SDHCI Register Definitions
//!
//! Register map and bitfields of the SD Host Controller Simplified
//! Specification Version 3.00, in the all-32-bit layout used by the
//! BCM2835/BCM2837 EMMC block (16-bit and 8-bit sub-registers are accessed
//! through the 32-bit word that contains them).
//!
//! Bit-level layouts are described with tock-registers so that decoding never
//! depends on the in-memory layout of bitfields. Register I/O goes through the
//! [`RegisterAccess`] capability, which the platform implements over its MMIO
//! mapping ([`MmioRegisters`]) and tests implement over a simulation.

use core::ptr::NonNull;

use tock_registers::interfaces::{Readable, Writeable};
use tock_registers::registers::{ReadOnly, ReadWrite};
use tock_registers::{register_bitfields, register_structs};

// ============================================================================
// Register Offsets
// ============================================================================

/// A 32-bit register of the host controller, identified by its byte offset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum Reg {
    /// Argument 2 / SDMA System Address
    Argument2 = 0x00,
    /// Block Size (bits 15:0) and Block Count (bits 31:16)
    BlockSizeAndBlockCount = 0x04,
    /// Argument 1
    Argument1 = 0x08,
    /// Transfer Mode (bits 15:0) and Command (bits 31:16)
    TransferModeAndCommand = 0x0C,
    /// Response bits [39:8]
    Response0 = 0x10,
    /// Response bits [71:40]
    Response1 = 0x14,
    /// Response bits [103:72]
    Response2 = 0x18,
    /// Response bits [127:104]
    Response3 = 0x1C,
    /// Buffer Data Port
    BufferDataPort = 0x20,
    /// Present State
    PresentState = 0x24,
    /// Host Control 1, Power Control, Block Gap Control, Wakeup Control
    HostConfiguration0 = 0x28,
    /// Clock Control, Timeout Control, Software Reset
    HostConfiguration1 = 0x2C,
    /// Normal and Error Interrupt Status
    InterruptStatus = 0x30,
    /// Normal and Error Interrupt Status Enable
    InterruptStatusEnable = 0x34,
    /// Normal and Error Interrupt Signal Enable
    InterruptSignalEnable = 0x38,
    /// Auto CMD Error Status and Host Control 2
    HostConfiguration2 = 0x3C,
    /// Capabilities bits [31:0]
    Capabilities0 = 0x40,
    /// Capabilities bits [63:32]
    Capabilities1 = 0x44,
    /// Maximum Current Capabilities
    MaximumCurrentCapabilities = 0x48,
    /// Force Event for Auto CMD Error Status / Error Interrupt Status
    ForceEventForAutoCmdErrorStatus = 0x50,
    /// ADMA Error Status
    AdmaErrorStatus = 0x54,
    /// ADMA System Address bits [31:0]
    AdmaSystemAddress0 = 0x58,
    /// ADMA System Address bits [63:32]
    AdmaSystemAddress1 = 0x5C,
    /// Preset Value for initialization / default speed
    PresetValue0 = 0x60,
    /// Preset Value for high speed / SDR12
    PresetValue1 = 0x64,
    /// Preset Value for SDR25 / SDR50
    PresetValue2 = 0x68,
    /// Preset Value for SDR104 / DDR50
    PresetValue3 = 0x6C,
    /// Shared Bus Control
    SharedBusControl = 0xE0,
    /// Slot Interrupt Status (bits 15:0) and Host Controller Version (bits 31:16)
    SlotInterruptStatusAndVersion = 0xFC,
}

impl Reg {
    /// Byte offset from the controller base
    pub const fn offset(self) -> usize {
        self as usize
    }

    /// Response register `n` (0..=3)
    pub const fn response(n: usize) -> Self {
        match n {
            0 => Reg::Response0,
            1 => Reg::Response1,
            2 => Reg::Response2,
            3 => Reg::Response3,
            _ => panic!("SDHCI has four response registers"),
        }
    }
}

/// Size of the mapped register block in bytes
pub const SDHCI_REGISTER_BLOCK_SIZE: usize = 0x100;

// ============================================================================
// Register Bitfield Definitions
// ============================================================================

register_bitfields! [
    u32,
    /// Block Size and Block Count (0x04)
    pub BLOCK_SIZE_AND_COUNT [
        /// Transfer Block Size in bytes
        TRANSFER_BLOCK_SIZE OFFSET(0) NUMBITS(12) [],
        /// SDMA Buffer Boundary
        SDMA_BUFFER_BOUNDARY OFFSET(12) NUMBITS(3) [],
        /// Blocks Count For Current Transfer
        BLOCK_COUNT OFFSET(16) NUMBITS(16) []
    ],

    /// Transfer Mode and Command (0x0C)
    pub TRANSFER_MODE_AND_COMMAND [
        /// Transfer Mode bit 0 (DMA Enable on standard SDHCI)
        RESP_A OFFSET(0) NUMBITS(1) [],
        /// Block Count Enable
        BLOCK_COUNT_ENABLE OFFSET(1) NUMBITS(1) [],
        /// Auto Command Enable
        AUTO_COMMAND OFFSET(2) NUMBITS(2) [
            Disabled = 0,
            Cmd12 = 1,
            Cmd23 = 2,
            Reserved = 3
        ],
        /// Data Transfer Direction Select (1 = card to host)
        DIRECTION OFFSET(4) NUMBITS(1) [],
        /// Multi / Single Block Select
        MULTIBLOCK OFFSET(5) NUMBITS(1) [],
        /// Remaining Transfer Mode bits
        RESP_B OFFSET(6) NUMBITS(10) [],
        /// Response Type Select
        RESPONSE_TYPE OFFSET(16) NUMBITS(2) [
            NoResponse = 0,
            Bits136 = 1,
            Bits48 = 2,
            Bits48Busy = 3
        ],
        /// Command CRC Check Enable
        CRC_ENABLE OFFSET(19) NUMBITS(1) [],
        /// Command Index Check Enable
        INDEX_ENABLE OFFSET(20) NUMBITS(1) [],
        /// Data Present Select
        IS_DATA OFFSET(21) NUMBITS(1) [],
        /// Command Type
        COMMAND_TYPE OFFSET(22) NUMBITS(2) [
            Normal = 0,
            Suspend = 1,
            Resume = 2,
            Abort = 3
        ],
        /// Command Index
        COMMAND_INDEX OFFSET(24) NUMBITS(6) []
    ],

    /// Present State (0x24)
    pub PRESENT_STATE [
        /// Command Inhibit (CMD)
        COMMAND_INHIBIT OFFSET(1) NUMBITS(1) [],
        /// Command Inhibit (DAT)
        DATA_INHIBIT OFFSET(2) NUMBITS(1) [],
        /// Write Transfer Active
        WRITE_TRANSFER_ACTIVE OFFSET(8) NUMBITS(1) [],
        /// Read Transfer Active
        READ_TRANSFER_ACTIVE OFFSET(9) NUMBITS(1) [],
        /// Buffer Write Enable
        BUFFER_WRITE_ENABLE OFFSET(10) NUMBITS(1) [],
        /// Buffer Read Enable
        BUFFER_READ_ENABLE OFFSET(11) NUMBITS(1) [],
        /// Card Inserted
        CARD_INSERTED OFFSET(16) NUMBITS(1) [],
        /// Card State Stable
        CARD_STATE_STABLE OFFSET(17) NUMBITS(1) [],
        /// Card Detect Pin Level
        CARD_DETECT_PIN_LEVEL OFFSET(18) NUMBITS(1) [],
        /// Write Protect Switch Pin Level
        WRITE_PROTECT_PIN_LEVEL OFFSET(19) NUMBITS(1) [],
        /// DAT[0] Line Signal Level (low while the card signals busy)
        DAT0_LEVEL OFFSET(20) NUMBITS(1) [],
        /// DAT[3:0] Line Signal Level
        DAT_LEVEL OFFSET(20) NUMBITS(4) [],
        /// CMD Line Signal Level
        CMD_LEVEL OFFSET(24) NUMBITS(1) []
    ],

    /// Host Control 1, Power Control, Block Gap, Wakeup (0x28)
    pub HOST_CONFIGURATION_0 [
        /// LED Control
        LED OFFSET(0) NUMBITS(1) [],
        /// Data Transfer Width (1 = 4-bit mode)
        DATA_WIDTH_4BIT OFFSET(1) NUMBITS(1) [],
        /// High Speed Enable
        HIGH_SPEED OFFSET(2) NUMBITS(1) [],
        /// DMA Select
        DMA_SELECT OFFSET(3) NUMBITS(2) [],
        /// Extended Data Transfer Width (1 = 8-bit mode)
        DATA_WIDTH_8BIT OFFSET(5) NUMBITS(1) [],
        /// SD Bus Power
        BUS_POWER OFFSET(8) NUMBITS(1) [],
        /// SD Bus Voltage Select
        BUS_VOLTAGE OFFSET(9) NUMBITS(3) [
            V1_8 = 0b101,
            V3_0 = 0b110,
            V3_3 = 0b111
        ]
    ],

    /// Clock Control, Timeout Control, Software Reset (0x2C)
    pub HOST_CONFIGURATION_1 [
        /// Internal Clock Enable
        INTERNAL_CLOCK_ENABLE OFFSET(0) NUMBITS(1) [],
        /// Internal Clock Stable
        INTERNAL_CLOCK_STABLE OFFSET(1) NUMBITS(1) [],
        /// SD Clock Enable
        SD_CLOCK_ENABLE OFFSET(2) NUMBITS(1) [],
        /// Clock Generator Select (programmable clock mode)
        CLOCK_GENERATOR_SELECT OFFSET(5) NUMBITS(1) [],
        /// Upper Bits of SDCLK Frequency Select
        FREQUENCY_SELECT_HI OFFSET(6) NUMBITS(2) [],
        /// SDCLK Frequency Select
        FREQUENCY_SELECT OFFSET(8) NUMBITS(8) [],
        /// Data Timeout Counter Value
        DATA_TIMEOUT_COUNTER OFFSET(16) NUMBITS(4) [],
        /// Software Reset For All
        SOFTWARE_RESET_ALL OFFSET(24) NUMBITS(1) [],
        /// Software Reset For CMD Line
        SOFTWARE_RESET_CMD OFFSET(25) NUMBITS(1) [],
        /// Software Reset For DAT Line
        SOFTWARE_RESET_DAT OFFSET(26) NUMBITS(1) []
    ],

    /// Interrupt Status / Status Enable / Signal Enable (0x30, 0x34, 0x38)
    pub INTERRUPT [
        /// Command Complete
        COMMAND_COMPLETE OFFSET(0) NUMBITS(1) [],
        /// Transfer Complete
        TRANSFER_COMPLETE OFFSET(1) NUMBITS(1) [],
        /// Block Gap Event
        BLOCK_GAP_EVENT OFFSET(2) NUMBITS(1) [],
        /// DMA Interrupt
        DMA_INTERRUPT OFFSET(3) NUMBITS(1) [],
        /// Buffer Write Ready
        BUFFER_WRITE_READY OFFSET(4) NUMBITS(1) [],
        /// Buffer Read Ready
        BUFFER_READ_READY OFFSET(5) NUMBITS(1) [],
        /// Card Insertion
        CARD_INSERTION OFFSET(6) NUMBITS(1) [],
        /// Card Removal
        CARD_REMOVAL OFFSET(7) NUMBITS(1) [],
        /// Card Interrupt
        CARD_INTERRUPT OFFSET(8) NUMBITS(1) [],
        /// Error Interrupt (any bit of the error half is set)
        ERROR_INTERRUPT OFFSET(15) NUMBITS(1) [],
        /// Command Timeout Error
        COMMAND_TIMEOUT_ERROR OFFSET(16) NUMBITS(1) [],
        /// Command CRC Error
        COMMAND_CRC_ERROR OFFSET(17) NUMBITS(1) [],
        /// Command End Bit Error
        COMMAND_END_BIT_ERROR OFFSET(18) NUMBITS(1) [],
        /// Command Index Error
        COMMAND_INDEX_ERROR OFFSET(19) NUMBITS(1) [],
        /// Data Timeout Error
        DATA_TIMEOUT_ERROR OFFSET(20) NUMBITS(1) [],
        /// Data CRC Error
        DATA_CRC_ERROR OFFSET(21) NUMBITS(1) [],
        /// Data End Bit Error
        DATA_END_BIT_ERROR OFFSET(22) NUMBITS(1) [],
        /// Current Limit Error
        CURRENT_LIMIT_ERROR OFFSET(23) NUMBITS(1) [],
        /// Auto CMD Error
        AUTO_CMD_ERROR OFFSET(24) NUMBITS(1) [],
        /// ADMA Error
        ADMA_ERROR OFFSET(25) NUMBITS(1) []
    ],

    /// Capabilities bits [31:0] (0x40)
    pub CAPABILITIES_0 [
        /// Timeout Clock Frequency
        TIMEOUT_CLOCK_FREQUENCY OFFSET(0) NUMBITS(6) [],
        /// Timeout Clock Unit (0 = kHz, 1 = MHz)
        TIMEOUT_CLOCK_UNIT OFFSET(7) NUMBITS(1) [],
        /// Base Clock Frequency For SD Clock, in MHz (SDHCI 3.0 width)
        BASE_CLOCK_FREQUENCY OFFSET(8) NUMBITS(8) [],
        /// Max Block Length (0 = 512, 1 = 1024, 2 = 2048)
        MAX_BLOCK_LENGTH OFFSET(16) NUMBITS(2) [],
        /// 8-bit Support for Embedded Device
        SUPPORT_8BIT OFFSET(18) NUMBITS(1) [],
        /// High Speed Support
        SUPPORT_HIGH_SPEED OFFSET(21) NUMBITS(1) [],
        /// SDMA Support
        SUPPORT_SDMA OFFSET(22) NUMBITS(1) [],
        /// Voltage Support 3.3V
        SUPPORT_3V3 OFFSET(24) NUMBITS(1) [],
        /// Voltage Support 3.0V
        SUPPORT_3V0 OFFSET(25) NUMBITS(1) [],
        /// Voltage Support 1.8V
        SUPPORT_1V8 OFFSET(26) NUMBITS(1) []
    ],

    /// Slot Interrupt Status and Host Controller Version (0xFC)
    pub SLOT_INTERRUPT_STATUS_AND_VERSION [
        /// Interrupt Signal For Each Slot
        SLOT_INTERRUPT_STATUS OFFSET(0) NUMBITS(8) [],
        /// Specification Version Number
        SPECIFICATION_VERSION OFFSET(16) NUMBITS(8) [
            Version1 = 0,
            Version2 = 1,
            Version3 = 2
        ],
        /// Vendor Version Number
        VENDOR_VERSION OFFSET(24) NUMBITS(8) []
    ]
];

/// Every interrupt status bit, used to enable and to clear all of them
pub const ALL_INTERRUPTS: u32 = 0xFFFF_FFFF;

// ============================================================================
// Register Access
// ============================================================================

/// Raw 32-bit access to the host controller's register block.
///
/// Implementations perform exactly one bus access per call; the driver never
/// relies on read-modify-write atomicity.
pub trait RegisterAccess {
    fn read_register(&self, reg: Reg) -> u32;
    fn write_register(&self, reg: Reg, value: u32);
}

impl<R: RegisterAccess + ?Sized> RegisterAccess for &R {
    fn read_register(&self, reg: Reg) -> u32 {
        (**self).read_register(reg)
    }

    fn write_register(&self, reg: Reg, value: u32) {
        (**self).write_register(reg, value)
    }
}

register_structs! {
    /// Memory-mapped SDHCI register block
    pub SdRegisterBlock {
        (0x00 => argument_2: ReadWrite<u32>),
        (0x04 => block_size_and_block_count: ReadWrite<u32, BLOCK_SIZE_AND_COUNT::Register>),
        (0x08 => argument_1: ReadWrite<u32>),
        (0x0C => transfer_mode_and_command: ReadWrite<u32, TRANSFER_MODE_AND_COMMAND::Register>),
        (0x10 => response: [ReadOnly<u32>; 4]),
        (0x20 => buffer_data_port: ReadWrite<u32>),
        (0x24 => present_state: ReadOnly<u32, PRESENT_STATE::Register>),
        (0x28 => host_configuration_0: ReadWrite<u32, HOST_CONFIGURATION_0::Register>),
        (0x2C => host_configuration_1: ReadWrite<u32, HOST_CONFIGURATION_1::Register>),
        (0x30 => interrupt_status: ReadWrite<u32, INTERRUPT::Register>),
        (0x34 => interrupt_status_enable: ReadWrite<u32, INTERRUPT::Register>),
        (0x38 => interrupt_signal_enable: ReadWrite<u32, INTERRUPT::Register>),
        (0x3C => host_configuration_2: ReadWrite<u32>),
        (0x40 => capabilities_0: ReadOnly<u32, CAPABILITIES_0::Register>),
        (0x44 => capabilities_1: ReadOnly<u32>),
        (0x48 => maximum_current_capabilities: ReadOnly<u32>),
        (0x4C => _reserved0),
        (0x50 => force_event_for_auto_cmd_error_status: ReadWrite<u32>),
        (0x54 => adma_error_status: ReadOnly<u32>),
        (0x58 => adma_system_address: [ReadWrite<u32>; 2]),
        (0x60 => preset_value: [ReadOnly<u32>; 4]),
        (0x70 => _reserved1),
        (0xE0 => shared_bus_control: ReadOnly<u32>),
        (0xE4 => _reserved2),
        (0xFC => slot_interrupt_status_and_version:
            ReadOnly<u32, SLOT_INTERRUPT_STATUS_AND_VERSION::Register>),
        (0x100 => @END),
    }
}

/// [`RegisterAccess`] over a memory-mapped register block
pub struct MmioRegisters {
    block: NonNull<SdRegisterBlock>,
}

// SAFETY: The block is a device mapping, not shared Rust data. The controller
// serialises all access behind its transaction lock.
unsafe impl Send for MmioRegisters {}

impl MmioRegisters {
    /// Wrap the register block mapped at `base`.
    ///
    /// Returns `None` when the platform could not map the block (null base).
    ///
    /// # Safety
    ///
    /// `base` must point to a mapping of at least [`SDHCI_REGISTER_BLOCK_SIZE`]
    /// bytes of SDHCI registers that stays valid for the lifetime of the
    /// returned value and is not accessed through any other path.
    pub unsafe fn new(base: *mut u8) -> Option<Self> {
        NonNull::new(base.cast::<SdRegisterBlock>()).map(|block| Self { block })
    }

    #[inline]
    fn block(&self) -> &SdRegisterBlock {
        // SAFETY: validity of the mapping is the contract of `new`
        unsafe { self.block.as_ref() }
    }
}

impl RegisterAccess for MmioRegisters {
    fn read_register(&self, reg: Reg) -> u32 {
        let b = self.block();
        match reg {
            Reg::Argument2 => b.argument_2.get(),
            Reg::BlockSizeAndBlockCount => b.block_size_and_block_count.get(),
            Reg::Argument1 => b.argument_1.get(),
            Reg::TransferModeAndCommand => b.transfer_mode_and_command.get(),
            Reg::Response0 => b.response[0].get(),
            Reg::Response1 => b.response[1].get(),
            Reg::Response2 => b.response[2].get(),
            Reg::Response3 => b.response[3].get(),
            Reg::BufferDataPort => b.buffer_data_port.get(),
            Reg::PresentState => b.present_state.get(),
            Reg::HostConfiguration0 => b.host_configuration_0.get(),
            Reg::HostConfiguration1 => b.host_configuration_1.get(),
            Reg::InterruptStatus => b.interrupt_status.get(),
            Reg::InterruptStatusEnable => b.interrupt_status_enable.get(),
            Reg::InterruptSignalEnable => b.interrupt_signal_enable.get(),
            Reg::HostConfiguration2 => b.host_configuration_2.get(),
            Reg::Capabilities0 => b.capabilities_0.get(),
            Reg::Capabilities1 => b.capabilities_1.get(),
            Reg::MaximumCurrentCapabilities => b.maximum_current_capabilities.get(),
            Reg::ForceEventForAutoCmdErrorStatus => b.force_event_for_auto_cmd_error_status.get(),
            Reg::AdmaErrorStatus => b.adma_error_status.get(),
            Reg::AdmaSystemAddress0 => b.adma_system_address[0].get(),
            Reg::AdmaSystemAddress1 => b.adma_system_address[1].get(),
            Reg::PresetValue0 => b.preset_value[0].get(),
            Reg::PresetValue1 => b.preset_value[1].get(),
            Reg::PresetValue2 => b.preset_value[2].get(),
            Reg::PresetValue3 => b.preset_value[3].get(),
            Reg::SharedBusControl => b.shared_bus_control.get(),
            Reg::SlotInterruptStatusAndVersion => b.slot_interrupt_status_and_version.get(),
        }
    }

    fn write_register(&self, reg: Reg, value: u32) {
        let b = self.block();
        match reg {
            Reg::Argument2 => b.argument_2.set(value),
            Reg::BlockSizeAndBlockCount => b.block_size_and_block_count.set(value),
            Reg::Argument1 => b.argument_1.set(value),
            Reg::TransferModeAndCommand => b.transfer_mode_and_command.set(value),
            Reg::BufferDataPort => b.buffer_data_port.set(value),
            Reg::HostConfiguration0 => b.host_configuration_0.set(value),
            Reg::HostConfiguration1 => b.host_configuration_1.set(value),
            Reg::InterruptStatus => b.interrupt_status.set(value),
            Reg::InterruptStatusEnable => b.interrupt_status_enable.set(value),
            Reg::InterruptSignalEnable => b.interrupt_signal_enable.set(value),
            Reg::HostConfiguration2 => b.host_configuration_2.set(value),
            Reg::ForceEventForAutoCmdErrorStatus => {
                b.force_event_for_auto_cmd_error_status.set(value)
            }
            Reg::AdmaSystemAddress0 => b.adma_system_address[0].set(value),
            Reg::AdmaSystemAddress1 => b.adma_system_address[1].set(value),
            // Read-only registers
            Reg::Response0
            | Reg::Response1
            | Reg::Response2
            | Reg::Response3
            | Reg::PresentState
            | Reg::Capabilities0
            | Reg::Capabilities1
            | Reg::MaximumCurrentCapabilities
            | Reg::AdmaErrorStatus
            | Reg::PresetValue0
            | Reg::PresetValue1
            | Reg::PresetValue2
            | Reg::PresetValue3
            | Reg::SharedBusControl
            | Reg::SlotInterruptStatusAndVersion => {
                log::warn!("SDHCI: ignoring write to read-only register {:?}", reg);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tock_registers::LocalRegisterCopy;

    #[test]
    fn test_register_block_layout() {
        assert_eq!(core::mem::size_of::<SdRegisterBlock>(), SDHCI_REGISTER_BLOCK_SIZE);
        assert_eq!(Reg::PresentState.offset(), 0x24);
        assert_eq!(Reg::HostConfiguration1.offset(), 0x2C);
        assert_eq!(Reg::SlotInterruptStatusAndVersion.offset(), 0xFC);
        assert_eq!(Reg::response(3), Reg::Response3);
    }

    #[test]
    fn test_bit_contracts() {
        let state = LocalRegisterCopy::<u32, PRESENT_STATE::Register>::new(0b110);
        assert!(state.is_set(PRESENT_STATE::COMMAND_INHIBIT));
        assert!(state.is_set(PRESENT_STATE::DATA_INHIBIT));

        let state = LocalRegisterCopy::<u32, PRESENT_STATE::Register>::new(1 << 16);
        assert!(state.is_set(PRESENT_STATE::CARD_INSERTED));

        let hc1 = LocalRegisterCopy::<u32, HOST_CONFIGURATION_1::Register>::new(0x0100_0000);
        assert!(hc1.is_set(HOST_CONFIGURATION_1::SOFTWARE_RESET_ALL));

        let irq = LocalRegisterCopy::<u32, INTERRUPT::Register>::new(0b10_0011);
        assert!(irq.is_set(INTERRUPT::COMMAND_COMPLETE));
        assert!(irq.is_set(INTERRUPT::TRANSFER_COMPLETE));
        assert!(irq.is_set(INTERRUPT::BUFFER_READ_READY));
        assert!(!irq.is_set(INTERRUPT::BUFFER_WRITE_READY));
    }

    #[test]
    fn test_mmio_roundtrip_over_memory() {
        let mut backing = [0u32; SDHCI_REGISTER_BLOCK_SIZE / 4];
        let regs = unsafe { MmioRegisters::new(backing.as_mut_ptr().cast()) }.unwrap();

        regs.write_register(Reg::Argument1, 0x1AA);
        regs.write_register(Reg::InterruptStatusEnable, ALL_INTERRUPTS);
        assert_eq!(regs.read_register(Reg::Argument1), 0x1AA);
        assert_eq!(regs.read_register(Reg::InterruptStatusEnable), ALL_INTERRUPTS);

        // Writes to read-only registers are dropped
        regs.write_register(Reg::PresentState, 0xFFFF_FFFF);
        assert_eq!(regs.read_register(Reg::PresentState), 0);

        drop(regs);
        assert_eq!(backing[Reg::Argument1.offset() / 4], 0x1AA);
    }

    #[test]
    fn test_null_mapping_is_rejected() {
        assert!(unsafe { MmioRegisters::new(core::ptr::null_mut()) }.is_none());
    }
}
