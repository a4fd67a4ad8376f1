//! CrabSD - SD/SDHC card driver for SDHCI 3.0 host controllers
//!
//! This library brings an SD host controller and the inserted memory card from
//! power-on to a ready block device and serves block reads and writes. It is
//! `no_std` and takes its register access and time source from the platform.

#![cfg_attr(not(test), no_std)]

pub mod drivers;
pub mod logger;
pub mod time;

pub use drivers::sdhci::card::SdMemoryCard;
pub use drivers::sdhci::regs::{MmioRegisters, Reg, RegisterAccess};
pub use drivers::sdhci::{SdhciConfig, SdhciController, SdhciError};
pub use time::Clock;
