//! Hardware drivers for CrabSD
//!
//! This module contains the SD host controller driver.

pub mod sdhci;
