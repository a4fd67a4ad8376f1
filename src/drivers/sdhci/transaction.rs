//! Command/response transactions
//!
//! The [`TransactionEngine`] owns the register block and drives one
//! transaction at a time: wait for the inhibit bits, write argument and
//! command word, poll for completion, read the response, and move block data
//! through the buffer data port. Completion is detected purely by polling
//! interrupt status bits against wall-clock deadlines.

use tock_registers::LocalRegisterCopy;
use tock_registers::fields::Field;

use super::SdhciConfig;
use super::SdhciError;
use super::card::{BusWidth, card_status_contains_errors};
use super::command::{Command, CommandIndex, DataDirection, ResponseType, get_command};
use super::regs::*;
use crate::time::{Clock, Timeout, delay_us, wait_for};

/// Raw response words; 48-bit responses only fill the first
pub type Response = [u32; 4];

/// Caller buffer of a block transfer, tagged with its direction
pub enum TransferBuffer<'a> {
    /// Card to host
    Read(&'a mut [u8]),
    /// Host to card
    Write(&'a [u8]),
}

impl TransferBuffer<'_> {
    fn len(&self) -> usize {
        match self {
            TransferBuffer::Read(buf) => buf.len(),
            TransferBuffer::Write(buf) => buf.len(),
        }
    }

    fn direction(&self) -> DataDirection {
        match self {
            TransferBuffer::Read(_) => DataDirection::CardToHost,
            TransferBuffer::Write(_) => DataDirection::HostToCard,
        }
    }
}

/// Status word with only `flag` set, for write-1-to-clear
fn interrupt_mask(flag: Field<u32, INTERRUPT::Register>) -> u32 {
    let mut word = LocalRegisterCopy::<u32, INTERRUPT::Register>::new(0);
    word.modify(flag.val(1));
    word.get()
}

/// Protocol engine over one host controller's registers
pub struct TransactionEngine<R: RegisterAccess, C: Clock> {
    regs: R,
    clock: C,
    config: SdhciConfig,
    /// Command whose response has not been collected yet
    last_command: Option<&'static Command>,
}

impl<R: RegisterAccess, C: Clock> TransactionEngine<R, C> {
    pub fn new(regs: R, clock: C, config: SdhciConfig) -> Self {
        Self {
            regs,
            clock,
            config,
            last_command: None,
        }
    }

    pub fn config(&self) -> &SdhciConfig {
        &self.config
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    // ========================================================================
    // Register helpers
    // ========================================================================

    pub(super) fn read(&self, reg: Reg) -> u32 {
        self.regs.read_register(reg)
    }

    pub(super) fn write(&self, reg: Reg, value: u32) {
        self.regs.write_register(reg, value)
    }

    pub(super) fn present_state(&self) -> LocalRegisterCopy<u32, PRESENT_STATE::Register> {
        LocalRegisterCopy::new(self.read(Reg::PresentState))
    }

    pub(super) fn interrupt_status(&self) -> LocalRegisterCopy<u32, INTERRUPT::Register> {
        LocalRegisterCopy::new(self.read(Reg::InterruptStatus))
    }

    pub(super) fn host_configuration_1(
        &self,
    ) -> LocalRegisterCopy<u32, HOST_CONFIGURATION_1::Register> {
        LocalRegisterCopy::new(self.read(Reg::HostConfiguration1))
    }

    fn clear_interrupts(&self, mask: u32) {
        self.write(Reg::InterruptStatus, mask);
    }

    // ========================================================================
    // Controller setup
    // ========================================================================

    /// Specification version field of the controller (2 = SDHCI 3.0)
    pub fn host_version(&self) -> u8 {
        let reg = LocalRegisterCopy::<u32, SLOT_INTERRUPT_STATUS_AND_VERSION::Register>::new(
            self.read(Reg::SlotInterruptStatusAndVersion),
        );
        reg.read(SLOT_INTERRUPT_STATUS_AND_VERSION::SPECIFICATION_VERSION) as u8
    }

    pub fn card_inserted(&self) -> bool {
        self.present_state().is_set(PRESENT_STATE::CARD_INSERTED)
    }

    /// Reset the whole controller and wait for the reset to complete
    pub fn reset_host_controller(&mut self) -> Result<(), SdhciError> {
        self.last_command = None;
        self.write(Reg::HostConfiguration0, 0);

        let mut hc1 = self.host_configuration_1();
        hc1.modify(HOST_CONFIGURATION_1::SOFTWARE_RESET_ALL::SET);
        self.write(Reg::HostConfiguration1, hc1.get());

        let done = wait_for(&self.clock, self.config.reset_timeout_ms, 0, || {
            !self
                .host_configuration_1()
                .is_set(HOST_CONFIGURATION_1::SOFTWARE_RESET_ALL)
        });
        if !done {
            log::error!("SDHCI: Reset timeout");
            return Err(SdhciError::Timeout);
        }

        Ok(())
    }

    /// Soft-reset the CMD and/or DAT state machines after an error
    fn reset_lines(&self, cmd: bool, dat: bool) {
        let mut hc1 = self.host_configuration_1();
        hc1.modify(
            HOST_CONFIGURATION_1::SOFTWARE_RESET_CMD.val(cmd as u32)
                + HOST_CONFIGURATION_1::SOFTWARE_RESET_DAT.val(dat as u32),
        );
        self.write(Reg::HostConfiguration1, hc1.get());

        let done = wait_for(&self.clock, self.config.reset_timeout_ms, 0, || {
            let hc1 = self.host_configuration_1();
            !hc1.is_set(HOST_CONFIGURATION_1::SOFTWARE_RESET_CMD)
                && !hc1.is_set(HOST_CONFIGURATION_1::SOFTWARE_RESET_DAT)
        });
        if !done {
            log::warn!("SDHCI: Line reset did not complete (cmd={}, dat={})", cmd, dat);
        }
    }

    /// Enable every interrupt status and signal bit and clear pending ones
    pub fn enable_interrupts(&self) {
        self.write(Reg::InterruptStatusEnable, ALL_INTERRUPTS);
        self.write(Reg::InterruptSignalEnable, ALL_INTERRUPTS);
        self.clear_interrupts(ALL_INTERRUPTS);
    }

    /// Power the SD bus at 3.3V
    ///
    /// Power is dropped first so the voltage select never changes under a
    /// powered bus.
    pub fn set_bus_power(&self) {
        let mut hc0 = LocalRegisterCopy::<u32, HOST_CONFIGURATION_0::Register>::new(
            self.read(Reg::HostConfiguration0),
        );
        hc0.modify(HOST_CONFIGURATION_0::BUS_POWER::CLEAR);
        self.write(Reg::HostConfiguration0, hc0.get());

        hc0.modify(HOST_CONFIGURATION_0::BUS_VOLTAGE::V3_3);
        self.write(Reg::HostConfiguration0, hc0.get());
        hc0.modify(HOST_CONFIGURATION_0::BUS_POWER::SET);
        self.write(Reg::HostConfiguration0, hc0.get());

        delay_us(&self.clock, self.config.power_stable_delay_ms.saturating_mul(1000));
    }

    /// Program the host side data transfer width
    pub fn set_host_bus_width(&self, width: BusWidth) {
        let mut hc0 = LocalRegisterCopy::<u32, HOST_CONFIGURATION_0::Register>::new(
            self.read(Reg::HostConfiguration0),
        );
        hc0.modify(
            HOST_CONFIGURATION_0::DATA_WIDTH_4BIT.val((width == BusWidth::FourBit) as u32)
                + HOST_CONFIGURATION_0::DATA_WIDTH_8BIT::CLEAR,
        );
        self.write(Reg::HostConfiguration0, hc0.get());
    }

    // ========================================================================
    // Commands
    // ========================================================================

    /// Wait until the controller may accept `command`
    fn wait_inhibit(&self, command: &Command) -> Result<(), SdhciError> {
        let timeout_ms = self.config.command_timeout_ms;

        let cmd_free = wait_for(&self.clock, timeout_ms, 0, || {
            !self.present_state().is_set(PRESENT_STATE::COMMAND_INHIBIT)
        });
        if !cmd_free {
            log::debug!("SDHCI: CMD{} timeout waiting for CMD line", command.index);
            return Err(SdhciError::Timeout);
        }

        if command.requires_dat_line() && !command.is_abort() {
            let dat_free = wait_for(&self.clock, timeout_ms, 0, || {
                !self.present_state().is_set(PRESENT_STATE::DATA_INHIBIT)
            });
            if !dat_free {
                log::debug!("SDHCI: CMD{} timeout waiting for DAT line", command.index);
                return Err(SdhciError::Timeout);
            }
        }

        Ok(())
    }

    fn start_command(&mut self, command: &'static Command, argument: u32) {
        self.clear_interrupts(ALL_INTERRUPTS);
        self.write(Reg::Argument1, argument);
        self.write(Reg::TransferModeAndCommand, command.to_bits());
        self.last_command = Some(command);
    }

    /// Send `index` with `argument` once the CMD (and, for commands that use
    /// it, the DAT) line is free.
    ///
    /// Nothing is written to the controller when the inhibit wait times out.
    pub fn issue_command(&mut self, index: CommandIndex, argument: u32) -> Result<(), SdhciError> {
        let command = get_command(index);
        self.wait_inhibit(command)?;

        log::trace!("SDHCI: CMD{} arg={:#010x}", command.index, argument);
        self.start_command(command, argument);
        Ok(())
    }

    /// Poll until `flag` is raised, then clear it.
    ///
    /// An error interrupt ends the wait with the classified error.
    fn wait_for_interrupt(
        &self,
        flag: Field<u32, INTERRUPT::Register>,
        timeout_ms: u64,
    ) -> Result<(), SdhciError> {
        let timeout = Timeout::from_ms(&self.clock, timeout_ms);
        loop {
            let status = self.interrupt_status();

            if status.is_set(INTERRUPT::ERROR_INTERRUPT) {
                return Err(self.recover_from_error(status));
            }

            if status.is_set(flag) {
                self.clear_interrupts(interrupt_mask(flag));
                return Ok(());
            }

            if timeout.is_expired() {
                log::debug!("SDHCI: Timeout waiting for interrupt {:#x}", interrupt_mask(flag));
                self.reset_lines(true, true);
                return Err(SdhciError::Timeout);
            }

            core::hint::spin_loop();
        }
    }

    /// Clear a raised error interrupt and reset the affected lines
    fn recover_from_error(
        &self,
        status: LocalRegisterCopy<u32, INTERRUPT::Register>,
    ) -> SdhciError {
        log::debug!("SDHCI: Error interrupt: {:#010x}", status.get());
        self.clear_interrupts(status.get());

        let cmd_error = status.is_set(INTERRUPT::COMMAND_TIMEOUT_ERROR)
            || status.is_set(INTERRUPT::COMMAND_CRC_ERROR)
            || status.is_set(INTERRUPT::COMMAND_END_BIT_ERROR)
            || status.is_set(INTERRUPT::COMMAND_INDEX_ERROR);
        let dat_error = status.is_set(INTERRUPT::DATA_TIMEOUT_ERROR)
            || status.is_set(INTERRUPT::DATA_CRC_ERROR)
            || status.is_set(INTERRUPT::DATA_END_BIT_ERROR)
            || status.is_set(INTERRUPT::AUTO_CMD_ERROR)
            || status.is_set(INTERRUPT::ADMA_ERROR);
        // Unknown error source: reset both
        let (cmd, dat) = if cmd_error || dat_error {
            (cmd_error, dat_error)
        } else {
            (true, true)
        };
        self.reset_lines(cmd, dat);

        if status.is_set(INTERRUPT::COMMAND_TIMEOUT_ERROR)
            || status.is_set(INTERRUPT::DATA_TIMEOUT_ERROR)
        {
            SdhciError::Timeout
        } else {
            SdhciError::IoError
        }
    }

    /// Wait for the card busy signal on DAT0 to end
    fn wait_busy_release(&self) -> Result<(), SdhciError> {
        let released = wait_for(&self.clock, self.config.busy_timeout_ms, 0, || {
            self.present_state().is_set(PRESENT_STATE::DAT0_LEVEL)
        });
        if !released {
            log::debug!("SDHCI: Card still busy after {} ms", self.config.busy_timeout_ms);
            self.reset_lines(false, true);
            return Err(SdhciError::Timeout);
        }

        // The controller flags the end of busy as a transfer completion
        self.clear_interrupts(interrupt_mask(INTERRUPT::TRANSFER_COMPLETE));
        Ok(())
    }

    /// Collect the response of the last issued command.
    ///
    /// Reads one or four response words depending on the response type,
    /// waits out the busy signal of R1b commands and checks the card status
    /// of short responses.
    ///
    /// # Panics
    ///
    /// If no command is outstanding.
    pub fn wait_for_response(&mut self) -> Result<Response, SdhciError> {
        let Some(command) = self.last_command.take() else {
            panic!("SDHCI: waiting for a response without an issued command");
        };

        if let Err(e) =
            self.wait_for_interrupt(INTERRUPT::COMMAND_COMPLETE, self.config.command_timeout_ms)
        {
            log::debug!("SDHCI: CMD{} failed: {:?}", command.index, e);
            return Err(e);
        }

        let mut response = [0u32; 4];
        match command.response_type {
            ResponseType::NoResponse => {}
            ResponseType::ResponseOf136Bits => {
                for (n, word) in response.iter_mut().enumerate() {
                    *word = self.read(Reg::response(n));
                }
            }
            ResponseType::ResponseOf48Bits | ResponseType::ResponseOf48BitsWithBusy => {
                response[0] = self.read(Reg::Response0);
            }
        }

        if command.response_type == ResponseType::ResponseOf48BitsWithBusy {
            self.wait_busy_release()?;
        }

        if matches!(
            command.response_type,
            ResponseType::ResponseOf48Bits | ResponseType::ResponseOf48BitsWithBusy
        ) {
            if let Some(index) = command.command_index() {
                if card_status_contains_errors(index, response[0]) {
                    return Err(SdhciError::IoError);
                }
            }
        }

        Ok(response)
    }

    /// Issue a command and wait for its response
    pub fn send_command(
        &mut self,
        index: CommandIndex,
        argument: u32,
    ) -> Result<Response, SdhciError> {
        self.issue_command(index, argument)?;
        self.wait_for_response()
    }

    // ========================================================================
    // Data transfers
    // ========================================================================

    /// Run a data command and move `block_count` blocks of `block_size` bytes
    /// through the buffer data port.
    ///
    /// # Panics
    ///
    /// If the transfer is not a whole number of 32-bit words, if the buffer
    /// does not hold exactly the transfer, or if the buffer direction does not
    /// match the command.
    pub fn sync_block_transfer(
        &mut self,
        index: CommandIndex,
        argument: u32,
        block_count: u16,
        block_size: u16,
        buffer: TransferBuffer<'_>,
    ) -> Result<Response, SdhciError> {
        let command = get_command(index);
        let block_size = usize::from(block_size);
        let total = block_size * usize::from(block_count);

        assert!(command.is_data, "CMD{} does not transfer data", command.index);
        assert!(total % 4 == 0, "transfer of {} bytes is not word sized", total);
        assert_eq!(buffer.len(), total, "buffer does not match the transfer size");
        assert_eq!(
            buffer.direction(),
            command.direction,
            "buffer direction does not match CMD{}",
            command.index
        );

        self.wait_inhibit(command)?;

        let mut blocks = LocalRegisterCopy::<u32, BLOCK_SIZE_AND_COUNT::Register>::new(0);
        blocks.modify(
            BLOCK_SIZE_AND_COUNT::TRANSFER_BLOCK_SIZE.val(block_size as u32)
                + BLOCK_SIZE_AND_COUNT::BLOCK_COUNT.val(u32::from(block_count)),
        );
        self.write(Reg::BlockSizeAndBlockCount, blocks.get());

        log::trace!(
            "SDHCI: CMD{} arg={:#010x} blocks={}x{}",
            command.index,
            argument,
            block_count,
            block_size
        );
        self.start_command(command, argument);

        let result = self.complete_block_transfer(block_size, buffer);
        if result.is_err() {
            // Never leave a data phase armed behind a failed request
            self.reset_lines(true, true);
        }
        result
    }

    /// Response, PIO data and transfer completion of a started data command
    fn complete_block_transfer(
        &mut self,
        block_size: usize,
        mut buffer: TransferBuffer<'_>,
    ) -> Result<Response, SdhciError> {
        let response = self.wait_for_response()?;

        let data_timeout_ms = self.config.data_timeout_ms;
        if block_size > 0 {
            match &mut buffer {
                TransferBuffer::Read(buf) => {
                    for block in buf.chunks_mut(block_size) {
                        self.wait_for_interrupt(INTERRUPT::BUFFER_READ_READY, data_timeout_ms)?;
                        for chunk in block.chunks_mut(4) {
                            let word = self.read(Reg::BufferDataPort).to_le_bytes();
                            chunk.copy_from_slice(&word[..chunk.len()]);
                        }
                    }
                }
                TransferBuffer::Write(buf) => {
                    for block in buf.chunks(block_size) {
                        self.wait_for_interrupt(INTERRUPT::BUFFER_WRITE_READY, data_timeout_ms)?;
                        for chunk in block.chunks(4) {
                            let mut word = [0u8; 4];
                            word[..chunk.len()].copy_from_slice(chunk);
                            self.write(Reg::BufferDataPort, u32::from_le_bytes(word));
                        }
                    }
                }
            }
        }

        self.wait_for_interrupt(INTERRUPT::TRANSFER_COMPLETE, data_timeout_ms)?;

        Ok(response)
    }
}
