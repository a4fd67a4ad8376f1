//! SD clock control (SDHCI 3.2)
//!
//! Supply, stop and frequency change sequences for the SD clock, plus the
//! divided clock mode divisor computation.

use tock_registers::LocalRegisterCopy;

use super::SdhciError;
use super::regs::*;
use super::transaction::TransactionEngine;
use crate::time::{Clock, wait_for};

/// Largest value of the 10-bit SDCLK frequency select field
const MAX_FREQUENCY_SELECT: u32 = 0x3FF;

/// Frequency select value for `target_hz` derived from `base_hz`.
///
/// The divisor is the smallest `base / target` (at least 2), bumped by one
/// when that would still run at or above the target, then biased by -2 to
/// the value the controller expects.
pub fn sd_clock_divisor(base_hz: u32, target_hz: u32) -> u32 {
    assert!(target_hz > 0, "SD clock target must be non-zero");

    let mut divisor = core::cmp::max(base_hz / target_hz, 2);
    if base_hz / divisor >= target_hz {
        divisor += 1;
    }
    core::cmp::min(divisor - 2, MAX_FREQUENCY_SELECT)
}

/// Frequency the card sees for a frequency select value
pub fn effective_frequency(base_hz: u32, frequency_select: u32) -> u32 {
    base_hz / (frequency_select + 2)
}

/// Place a frequency select value into a Clock Control word: bits 7:0 of
/// the divisor go to bits 15:8, bits 9:8 to bits 7:6. Every other bit of
/// `hc1` is preserved.
pub fn encode_frequency_select(
    hc1: u32,
    frequency_select: u32,
) -> LocalRegisterCopy<u32, HOST_CONFIGURATION_1::Register> {
    let mut reg = LocalRegisterCopy::<u32, HOST_CONFIGURATION_1::Register>::new(hc1);
    reg.modify(
        HOST_CONFIGURATION_1::FREQUENCY_SELECT.val(frequency_select & 0xFF)
            + HOST_CONFIGURATION_1::FREQUENCY_SELECT_HI.val((frequency_select >> 8) & 0x3),
    );
    reg
}

impl<R: RegisterAccess, C: Clock> TransactionEngine<R, C> {
    /// Base clock of the divider in Hz.
    ///
    /// Taken from the capabilities register; controllers that leave the field
    /// at zero run from the configured platform clock.
    pub fn base_clock_frequency(&self) -> u32 {
        let caps = LocalRegisterCopy::<u32, CAPABILITIES_0::Register>::new(
            self.read(Reg::Capabilities0),
        );
        match caps.read(CAPABILITIES_0::BASE_CLOCK_FREQUENCY) {
            0 => {
                let fallback = self.config().fallback_base_clock_hz;
                log::debug!("SDHCI: No base clock in capabilities, using {} Hz", fallback);
                fallback
            }
            mhz => mhz * 1_000_000,
        }
    }

    /// SD Clock Supply Sequence (SDHCI 3.2.1)
    ///
    /// # Panics
    ///
    /// If the SD clock is still enabled.
    pub fn sd_clock_supply(&self, frequency_hz: u32) -> Result<(), SdhciError> {
        let hc1 = self.host_configuration_1();
        assert!(
            !hc1.is_set(HOST_CONFIGURATION_1::SD_CLOCK_ENABLE),
            "SD clock must be stopped before a new divisor is set"
        );

        let base = self.base_clock_frequency();
        let select = sd_clock_divisor(base, frequency_hz);
        log::debug!(
            "SDHCI: Setting clock to {} Hz (base={}, select={}, actual={})",
            frequency_hz,
            base,
            select,
            effective_frequency(base, select)
        );

        let mut hc1 = encode_frequency_select(hc1.get(), select);
        hc1.modify(HOST_CONFIGURATION_1::INTERNAL_CLOCK_ENABLE::SET);
        self.write(Reg::HostConfiguration1, hc1.get());

        let stable = wait_for(self.clock(), self.config().clock_stable_timeout_ms, 0, || {
            self.host_configuration_1()
                .is_set(HOST_CONFIGURATION_1::INTERNAL_CLOCK_STABLE)
        });
        if !stable {
            log::error!("SDHCI: Internal clock not stable");
            return Err(SdhciError::Timeout);
        }

        let mut hc1 = self.host_configuration_1();
        hc1.modify(HOST_CONFIGURATION_1::SD_CLOCK_ENABLE::SET);
        self.write(Reg::HostConfiguration1, hc1.get());

        Ok(())
    }

    /// SD Clock Stop Sequence (SDHCI 3.2.2)
    pub fn sd_clock_stop(&self) {
        let mut hc1 = self.host_configuration_1();
        hc1.modify(HOST_CONFIGURATION_1::SD_CLOCK_ENABLE::CLEAR);
        self.write(Reg::HostConfiguration1, hc1.get());
    }

    /// SD Clock Frequency Change Sequence (SDHCI 3.2.3)
    pub fn sd_clock_frequency_change(&self, frequency_hz: u32) -> Result<(), SdhciError> {
        self.sd_clock_stop();
        self.sd_clock_supply(frequency_hz)
    }
}
