//! Physical range checks for raw register values
//!
//! Ranges are expressed in the gauge's native units: millivolts, milliamps
//! and tenths of a kelvin.

use core::ops::RangeInclusive;

/// Lowest accepted cell voltage (mV)
pub const MIN_VOLTAGE: u16 = 2000;
/// Highest accepted cell voltage (mV)
pub const MAX_VOLTAGE: u16 = 4500;
/// Largest accepted current magnitude (mA)
pub const MAX_CURRENT: i16 = 5000;
/// Lowest accepted temperature, 0 °C (0.1 K)
pub const MIN_TEMPERATURE: u16 = 2731;
/// Highest accepted temperature, 70 °C (0.1 K)
pub const MAX_TEMPERATURE: u16 = 3430;
/// Highest accepted charge voltage limit (mV)
pub const MAX_CHARGE_VOLTAGE: u16 = 4400;
/// Highest accepted charge current limit (mA)
pub const MAX_CHARGE_CURRENT: u16 = 3000;
/// Highest state of charge / health (%)
pub const MAX_PERCENT: u16 = 100;

/// Kind of value being checked
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quantity {
    Voltage,
    Current,
    Temperature,
    ChargeVoltage,
    ChargeCurrent,
    StateOfCharge,
}

impl Quantity {
    /// Accepted range, bounds included
    pub const fn range(self) -> RangeInclusive<i32> {
        match self {
            Quantity::Voltage => MIN_VOLTAGE as i32..=MAX_VOLTAGE as i32,
            Quantity::Current => -(MAX_CURRENT as i32)..=MAX_CURRENT as i32,
            Quantity::Temperature => MIN_TEMPERATURE as i32..=MAX_TEMPERATURE as i32,
            Quantity::ChargeVoltage => MIN_VOLTAGE as i32..=MAX_CHARGE_VOLTAGE as i32,
            Quantity::ChargeCurrent => 0..=MAX_CHARGE_CURRENT as i32,
            Quantity::StateOfCharge => 0..=MAX_PERCENT as i32,
        }
    }
}

/// A value that failed its range check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rejected {
    pub quantity: Quantity,
    pub value: i32,
}

/// Check `value` against the range of `quantity`
pub fn validate(quantity: Quantity, value: impl Into<i32>) -> Result<(), Rejected> {
    let value = value.into();
    if quantity.range().contains(&value) {
        Ok(())
    } else {
        Err(Rejected { quantity, value })
    }
}
