#![cfg_attr(not(test), no_std)]
//! # Battery Fuel Gauge Driver
//!
//! This crate provides an embedded driver for I2C battery fuel gauges of the
//! BQ34Z100 family. It supports:
//! - Telemetry (voltage, current, temperature, state of charge and health)
//! - Range-checked reads with best-effort sentinels
//! - Config-mode bracketed writes of non-volatile settings
//! - Data-flash block access with checksum commit
//! - Calibration, chemistry selection and self-discharge compensation
//! - Power modes, sleep / wake and factory reset
//! - Alarm thresholds and alarm status
//! - Bounded retry of bus transactions and exclusive, time-bounded bus access
//!
//! ## Example
//!
//! ```no_run
//! use bms_gauge::{Bms, Error};
//! # use embedded_hal::{delay::DelayNs, i2c::I2c};
//! # fn example<I: I2c, D: DelayNs>(i2c: I, delay: D) -> Result<(), Error<I::Error>> {
//! let gauge = Bms::new(i2c, delay);
//!
//! // Verify the gauge answers
//! gauge.init()?;
//!
//! // Limit charging to 4.2 V
//! gauge.set_charge_voltage(4200)?;
//!
//! // Best-effort telemetry
//! let soc = gauge.read_state_of_charge();
//! let volts = gauge.read_voltage_volts();
//! # Ok(())
//! # }
//! ```
//!
//! ## Sharing between threads
//!
//! With the `std` feature, [`Bms::new_shared`] builds a driver whose bus
//! access is serialized by a mutex with a bounded wait, so it can be shared
//! behind an `Arc`.

mod bus;
mod config_mode;
mod driver;
mod error;
mod flash;
mod guard;
mod registers;
mod retry;
mod session;
mod types;
mod units;
mod validate;

#[cfg(test)]
mod testing;

// Re-export main types
pub use config_mode::ConfigMode;
pub use driver::{
    Bms, DriverConfig, DEFAULT_LOCK_TIMEOUT, DEFAULT_POWER_DOWN_MS, DEFAULT_SETTLE_MS,
};
pub use error::{Error, ErrorKind};
pub use flash::{checksum, DataFlashAddress};
#[cfg(feature = "std")]
pub use guard::TimedMutex;
pub use guard::{AccessGuard, NoopGuard};
pub use registers::*;
pub use retry::RetryPolicy;
pub use session::Session;
pub use types::*;
pub use units::*;
pub use validate::{validate, Quantity, Rejected};
