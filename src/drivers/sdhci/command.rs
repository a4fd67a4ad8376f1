//! SD command catalog
//!
//! Every command the driver issues is described by a [`Command`], a decoded
//! view of the SDHCI "Transfer Mode and Command" register word. The table is
//! built at compile time; [`get_command`] is the only way to obtain one.

use tock_registers::LocalRegisterCopy;

use super::regs::TRANSFER_MODE_AND_COMMAND as CMD;

/// Commands supported by the driver (PLSS 4.7.4)
///
/// Application commands (`App*`) must be preceded by [`CommandIndex::AppCmd`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CommandIndex {
    /// CMD0 - Reset the card to idle state
    GoIdleState = 0,
    /// CMD2 - Ask the card to send its CID
    AllSendCid = 2,
    /// CMD3 - Ask the card to publish a new RCA
    SendRelativeAddr = 3,
    /// ACMD6 - Select the data bus width
    AppSetBusWidth = 6,
    /// CMD7 - Toggle the card between stand-by and transfer state
    SelectCard = 7,
    /// CMD8 - Send interface condition
    SendIfCond = 8,
    /// CMD9 - Ask the card to send its CSD
    SendCsd = 9,
    /// CMD12 - Stop a multiple block transfer
    StopTransmission = 12,
    /// CMD13 - Ask the card to send its status
    SendStatus = 13,
    /// CMD16 - Set the block length for SDSC cards
    SetBlockLen = 16,
    /// CMD17 - Read one block
    ReadSingleBlock = 17,
    /// CMD18 - Read blocks until stopped
    ReadMultipleBlock = 18,
    /// CMD24 - Write one block
    WriteSingleBlock = 24,
    /// CMD25 - Write blocks until stopped
    WriteMultipleBlock = 25,
    /// ACMD41 - Send host capacity support and voltage window
    AppSendOpCond = 41,
    /// ACMD51 - Read the SD Configuration Register
    AppSendScr = 51,
    /// CMD55 - Next command is an application command
    AppCmd = 55,
}

impl CommandIndex {
    /// Every supported command
    pub const ALL: [CommandIndex; 17] = [
        CommandIndex::GoIdleState,
        CommandIndex::AllSendCid,
        CommandIndex::SendRelativeAddr,
        CommandIndex::AppSetBusWidth,
        CommandIndex::SelectCard,
        CommandIndex::SendIfCond,
        CommandIndex::SendCsd,
        CommandIndex::StopTransmission,
        CommandIndex::SendStatus,
        CommandIndex::SetBlockLen,
        CommandIndex::ReadSingleBlock,
        CommandIndex::ReadMultipleBlock,
        CommandIndex::WriteSingleBlock,
        CommandIndex::WriteMultipleBlock,
        CommandIndex::AppSendOpCond,
        CommandIndex::AppSendScr,
        CommandIndex::AppCmd,
    ];

    /// Look up a supported command by its raw index
    pub fn from_raw(index: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|c| *c as u8 == index)
    }
}

/// Response Type Select
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseType {
    NoResponse,
    /// R2
    ResponseOf136Bits,
    /// R1, R3, R6, R7
    ResponseOf48Bits,
    /// R1b
    ResponseOf48BitsWithBusy,
}

impl ResponseType {
    const fn to_bits(self) -> u32 {
        match self {
            ResponseType::NoResponse => 0,
            ResponseType::ResponseOf136Bits => 1,
            ResponseType::ResponseOf48Bits => 2,
            ResponseType::ResponseOf48BitsWithBusy => 3,
        }
    }

    const fn from_bits(bits: u32) -> Self {
        match bits & 0x3 {
            0 => ResponseType::NoResponse,
            1 => ResponseType::ResponseOf136Bits,
            2 => ResponseType::ResponseOf48Bits,
            _ => ResponseType::ResponseOf48BitsWithBusy,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandType {
    Normal,
    Suspend,
    Resume,
    Abort,
}

impl CommandType {
    const fn to_bits(self) -> u32 {
        match self {
            CommandType::Normal => 0,
            CommandType::Suspend => 1,
            CommandType::Resume => 2,
            CommandType::Abort => 3,
        }
    }

    const fn from_bits(bits: u32) -> Self {
        match bits & 0x3 {
            0 => CommandType::Normal,
            1 => CommandType::Suspend,
            2 => CommandType::Resume,
            _ => CommandType::Abort,
        }
    }
}

/// Data Transfer Direction Select
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataDirection {
    HostToCard,
    CardToHost,
}

/// Auto Command Enable
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoCommand {
    Disabled,
    /// Issue CMD12 after the last block
    Cmd12,
    /// Issue CMD23 before the transfer
    Cmd23,
    Reserved,
}

impl AutoCommand {
    const fn to_bits(self) -> u32 {
        match self {
            AutoCommand::Disabled => 0,
            AutoCommand::Cmd12 => 1,
            AutoCommand::Cmd23 => 2,
            AutoCommand::Reserved => 3,
        }
    }

    const fn from_bits(bits: u32) -> Self {
        match bits & 0x3 {
            0 => AutoCommand::Disabled,
            1 => AutoCommand::Cmd12,
            2 => AutoCommand::Cmd23,
            _ => AutoCommand::Reserved,
        }
    }
}

/// Decoded "Transfer Mode and Command" register word
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Command {
    /// Command index, 0..=63
    pub index: u8,
    pub response_type: ResponseType,
    /// The command transfers data over the DAT lines
    pub is_data: bool,
    pub crc_enable: bool,
    pub idx_enable: bool,
    pub direction: DataDirection,
    pub multiblock: bool,
    pub block_count_enable: bool,
    pub auto_command: AutoCommand,
    pub command_type: CommandType,
    /// Transfer mode bit 0
    pub resp_a: bool,
    /// Transfer mode bits 15:6
    pub resp_b: u16,
}

impl Command {
    const fn new(index: CommandIndex, response_type: ResponseType) -> Self {
        Self {
            index: index as u8,
            response_type,
            is_data: false,
            crc_enable: false,
            idx_enable: false,
            direction: DataDirection::HostToCard,
            multiblock: false,
            block_count_enable: false,
            auto_command: AutoCommand::Disabled,
            command_type: CommandType::Normal,
            resp_a: false,
            resp_b: 0,
        }
    }

    /// Hardware checks both CRC and echoed index (R1, R1b, R6, R7)
    const fn checked(mut self) -> Self {
        self.crc_enable = true;
        self.idx_enable = true;
        self
    }

    /// Hardware checks the CRC only (R2)
    const fn crc_checked(mut self) -> Self {
        self.crc_enable = true;
        self
    }

    const fn data(mut self, direction: DataDirection) -> Self {
        self.is_data = true;
        self.direction = direction;
        self
    }

    /// Multiple block transfer terminated by an automatic CMD12
    const fn multiblock_auto_stop(mut self) -> Self {
        self.multiblock = true;
        self.block_count_enable = true;
        self.auto_command = AutoCommand::Cmd12;
        self
    }

    const fn abort(mut self) -> Self {
        self.command_type = CommandType::Abort;
        self
    }

    /// The typed index, when this is a supported command
    pub fn command_index(&self) -> Option<CommandIndex> {
        CommandIndex::from_raw(self.index)
    }

    /// Encode as the 32-bit register word
    pub fn to_bits(&self) -> u32 {
        let mut word = LocalRegisterCopy::<u32, CMD::Register>::new(0);
        word.modify(
            CMD::RESP_A.val(self.resp_a as u32)
                + CMD::BLOCK_COUNT_ENABLE.val(self.block_count_enable as u32)
                + CMD::AUTO_COMMAND.val(self.auto_command.to_bits())
                + CMD::DIRECTION.val((self.direction == DataDirection::CardToHost) as u32)
                + CMD::MULTIBLOCK.val(self.multiblock as u32)
                + CMD::RESP_B.val(u32::from(self.resp_b))
                + CMD::RESPONSE_TYPE.val(self.response_type.to_bits())
                + CMD::CRC_ENABLE.val(self.crc_enable as u32)
                + CMD::INDEX_ENABLE.val(self.idx_enable as u32)
                + CMD::IS_DATA.val(self.is_data as u32)
                + CMD::COMMAND_TYPE.val(self.command_type.to_bits())
                + CMD::COMMAND_INDEX.val(u32::from(self.index)),
        );
        word.get()
    }

    /// Decode a register word; reserved bits 18, 30 and 31 are ignored
    pub fn from_bits(bits: u32) -> Self {
        let word = LocalRegisterCopy::<u32, CMD::Register>::new(bits);
        Self {
            index: word.read(CMD::COMMAND_INDEX) as u8,
            response_type: ResponseType::from_bits(word.read(CMD::RESPONSE_TYPE)),
            is_data: word.is_set(CMD::IS_DATA),
            crc_enable: word.is_set(CMD::CRC_ENABLE),
            idx_enable: word.is_set(CMD::INDEX_ENABLE),
            direction: if word.is_set(CMD::DIRECTION) {
                DataDirection::CardToHost
            } else {
                DataDirection::HostToCard
            },
            multiblock: word.is_set(CMD::MULTIBLOCK),
            block_count_enable: word.is_set(CMD::BLOCK_COUNT_ENABLE),
            auto_command: AutoCommand::from_bits(word.read(CMD::AUTO_COMMAND)),
            command_type: CommandType::from_bits(word.read(CMD::COMMAND_TYPE)),
            resp_a: word.is_set(CMD::RESP_A),
            resp_b: word.read(CMD::RESP_B) as u16,
        }
    }

    /// SDHCI 3.7.1.1: the command uses the DAT lines, either for data or for
    /// the busy signal
    pub fn requires_dat_line(&self) -> bool {
        self.is_data || self.response_type == ResponseType::ResponseOf48BitsWithBusy
    }

    pub fn is_abort(&self) -> bool {
        self.command_type == CommandType::Abort
    }
}

use CommandIndex as I;
use DataDirection::{CardToHost, HostToCard};
use ResponseType::*;

static COMMAND_TABLE: [Command; 17] = [
    Command::new(I::GoIdleState, NoResponse),
    Command::new(I::AllSendCid, ResponseOf136Bits).crc_checked(),
    Command::new(I::SendRelativeAddr, ResponseOf48Bits).checked(),
    Command::new(I::AppSetBusWidth, ResponseOf48Bits).checked(),
    Command::new(I::SelectCard, ResponseOf48BitsWithBusy).checked(),
    Command::new(I::SendIfCond, ResponseOf48Bits).checked(),
    Command::new(I::SendCsd, ResponseOf136Bits).crc_checked(),
    Command::new(I::StopTransmission, ResponseOf48BitsWithBusy)
        .checked()
        .abort(),
    Command::new(I::SendStatus, ResponseOf48Bits).checked(),
    Command::new(I::SetBlockLen, ResponseOf48Bits).checked(),
    Command::new(I::ReadSingleBlock, ResponseOf48Bits)
        .checked()
        .data(CardToHost),
    Command::new(I::ReadMultipleBlock, ResponseOf48Bits)
        .checked()
        .data(CardToHost)
        .multiblock_auto_stop(),
    Command::new(I::WriteSingleBlock, ResponseOf48Bits)
        .checked()
        .data(HostToCard),
    Command::new(I::WriteMultipleBlock, ResponseOf48Bits)
        .checked()
        .data(HostToCard)
        .multiblock_auto_stop(),
    // R3 carries neither a valid CRC nor the command index
    Command::new(I::AppSendOpCond, ResponseOf48Bits),
    Command::new(I::AppSendScr, ResponseOf48Bits)
        .checked()
        .data(CardToHost),
    Command::new(I::AppCmd, ResponseOf48Bits).checked(),
];

/// The pre-built command word for `index`
pub fn get_command(index: CommandIndex) -> &'static Command {
    COMMAND_TABLE
        .iter()
        .find(|cmd| cmd.index == index as u8)
        .unwrap_or_else(|| unreachable!("CMD{} missing from the command table", index as u8))
}
