//! Conversions from the gauge's fixed-point units

/// Reference temperature for voltage compensation (°C)
pub const REFERENCE_TEMPERATURE_C: f32 = 25.0;

/// Default voltage temperature coefficient (1/°C)
pub const DEFAULT_TEMPERATURE_COEFFICIENT: f32 = 0.0001;

/// mV to V
#[inline]
pub fn millivolts_to_volts(mv: u16) -> f32 {
    mv as f32 / 1000.0
}

/// mA to A
#[inline]
pub fn milliamps_to_amps(ma: i16) -> f32 {
    ma as f32 / 1000.0
}

/// mAh to Ah
#[inline]
pub fn milliamp_hours_to_amp_hours(mah: u16) -> f32 {
    mah as f32 / 1000.0
}

/// 10 mWh units to Wh
#[inline]
pub fn energy_to_watt_hours(raw: u16) -> f32 {
    raw as f32 / 100.0
}

/// mW to W
#[inline]
pub fn milliwatts_to_watts(mw: u16) -> f32 {
    mw as f32 / 1000.0
}

/// 0.1 K to °C
#[inline]
pub fn decikelvin_to_celsius(dk: u16) -> f32 {
    dk as f32 / 10.0 - 273.15
}

/// Scale `volts` for the deviation of `temperature_c` from 25 °C
#[inline]
pub fn compensate_voltage(volts: f32, temperature_c: f32, coefficient: f32) -> f32 {
    volts * (1.0 + (temperature_c - REFERENCE_TEMPERATURE_C) * coefficient)
}
