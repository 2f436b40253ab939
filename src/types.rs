//! Type definitions for gauge configuration and status
//!
//! This module provides strongly-typed records for the values the gauge
//! stores in its registers and data flash, together with their packed
//! register / block encodings.

use bitflags::bitflags;

use crate::error::Error;

/// Battery chemistry selector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum BatteryChemistry {
    LiIon = 0x0100,
    LiFePo4 = 0x0200,
    NiMh = 0x0300,
    NiCd = 0x0400,
    PbAcid = 0x0500,
}

impl TryFrom<u16> for BatteryChemistry {
    type Error = u16;

    fn try_from(raw: u16) -> Result<Self, u16> {
        Ok(match raw {
            0x0100 => BatteryChemistry::LiIon,
            0x0200 => BatteryChemistry::LiFePo4,
            0x0300 => BatteryChemistry::NiMh,
            0x0400 => BatteryChemistry::NiCd,
            0x0500 => BatteryChemistry::PbAcid,
            other => return Err(other),
        })
    }
}

/// Power mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum PowerMode {
    Normal = 0x00,
    Sleep = 0x01,
    DeepSleep = 0x02,
    Shutdown = 0x03,
}

impl TryFrom<u16> for PowerMode {
    type Error = u16;

    fn try_from(raw: u16) -> Result<Self, u16> {
        Ok(match raw {
            0x00 => PowerMode::Normal,
            0x01 => PowerMode::Sleep,
            0x02 => PowerMode::DeepSleep,
            0x03 => PowerMode::Shutdown,
            other => return Err(other),
        })
    }
}

bitflags! {
    /// Safety status word
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SafetyStatus: u16 {
        const OVER_VOLTAGE = 0x0001;
        const UNDER_VOLTAGE = 0x0002;
        const OVER_CURRENT = 0x0004;
        const OVER_TEMPERATURE = 0x0008;
    }
}

bitflags! {
    /// Alarm status and alarm enable words share this layout
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct AlarmFlags: u16 {
        const OVER_VOLTAGE = 0x0001;
        const UNDER_VOLTAGE = 0x0002;
        const OVER_CURRENT = 0x0004;
        const OVER_TEMPERATURE = 0x0008;
        const UNDER_TEMPERATURE = 0x0010;
        const LOW_SOC = 0x0020;
        const DISCHARGING = 0x0040;
        const CHARGING = 0x0080;
    }
}

bitflags! {
    /// Gauge flags register
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct GaugeFlags: u16 {
        const CHARGING = 0x0001;
        const DISCHARGING = 0x0002;
        const BALANCING = 0x0004;
        const FULL = 0x0008;
        const CALIBRATED = 0x0010;
        const NEEDS_UPDATE = 0x0020;
        const SLEEP_ENABLED = 0x0040;
        const SHUTDOWN_REQUESTED = 0x0080;
    }
}

// ========================================
// Calibration
// ========================================

/// Reference and gauge-reported pack voltage (mV)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoltageCalibration {
    pub actual_mv: u16,
    pub measured_mv: u16,
}

/// Reference and gauge-reported current (mA) plus the sense resistor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CurrentCalibration {
    pub actual_ma: i16,
    pub measured_ma: i16,
    /// Shunt resistance in micro-ohms
    pub shunt_micro_ohms: u16,
}

/// Reference and gauge-reported temperature (0.1 K)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TemperatureCalibration {
    pub actual_dk: u16,
    pub measured_dk: u16,
}

/// Gain `actual / measured` in the x1000 fixed-point format.
///
/// Fails for a zero or negative ratio and for a gain that does not fit the
/// 16-bit register.
pub fn calibration_gain<E>(actual: i32, measured: i32) -> Result<u16, Error<E>> {
    if measured == 0 {
        return Err(Error::InvalidParameter);
    }
    actual
        .checked_mul(1000)
        .map(|scaled| scaled / measured)
        .and_then(|gain| u16::try_from(gain).ok())
        .filter(|g| *g != 0)
        .ok_or(Error::InvalidParameter)
}

// ========================================
// Timestamps and statistics
// ========================================

/// Date and time as stored by the gauge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DateTime {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
}

impl DateTime {
    /// Decode a packed date (years since 1980 / month / day) and a time in
    /// minutes since midnight
    pub fn from_packed(date: u16, time: u16) -> Self {
        Self {
            year: (date >> 9) + 1980,
            month: ((date >> 5) & 0x0F) as u8,
            day: (date & 0x1F) as u8,
            hour: (time / 60) as u8,
            minute: (time % 60) as u8,
        }
    }
}

/// Lifetime extremes recorded by the gauge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LifetimeStats {
    /// Highest temperature seen (0.1 K)
    pub max_temp: u16,
    /// Lowest temperature seen (0.1 K)
    pub min_temp: u16,
    pub max_charge_current: i16,
    pub max_discharge_current: i16,
    pub max_pack_voltage: u16,
    pub min_pack_voltage: u16,
    pub update_count: u16,
    pub last_update: DateTime,
}

impl LifetimeStats {
    /// Decode the 32-byte lifetime data block
    pub fn from_block(block: &[u8; 32]) -> Self {
        let word = |i: usize| u16::from_le_bytes([block[i], block[i + 1]]);
        Self {
            max_temp: word(0),
            min_temp: word(2),
            max_charge_current: word(4) as i16,
            max_discharge_current: word(6) as i16,
            max_pack_voltage: word(8),
            min_pack_voltage: word(10),
            update_count: word(12),
            last_update: DateTime::from_packed(word(14), word(16)),
        }
    }
}

/// Decoded status snapshot
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetailedStatus {
    pub flags: GaugeFlags,
    pub safety: SafetyStatus,
    /// High byte of the control status word
    pub error_code: u8,
    pub state_of_charge: u16,
    pub state_of_health: u16,
    pub remaining_capacity: u16,
    pub full_capacity: u16,
    pub current: i16,
    /// 0.1 K
    pub temperature: u16,
}

impl DetailedStatus {
    /// Check if the gauge reports charging
    pub fn is_charging(&self) -> bool {
        self.flags.contains(GaugeFlags::CHARGING)
    }

    /// Check if the gauge reports discharging
    pub fn is_discharging(&self) -> bool {
        self.flags.contains(GaugeFlags::DISCHARGING)
    }

    /// Check if the gauge reports a completed calibration
    pub fn is_calibrated(&self) -> bool {
        self.flags.contains(GaugeFlags::CALIBRATED)
    }
}

/// Battery snapshot in SI units
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatteryStatus {
    /// Temperature-compensated voltage (V)
    pub voltage: f32,
    /// Current (A), positive while charging
    pub current: f32,
    /// Temperature (°C)
    pub temperature: f32,
    pub soc: u16,
    pub soh: u16,
    pub safety: SafetyStatus,
    pub cycle_count: u16,
    /// Remaining capacity (Ah)
    pub remaining_capacity: f32,
    /// Full charge capacity (Ah)
    pub full_charge_capacity: f32,
}

impl BatteryStatus {
    /// Check if current flows into the battery
    pub fn is_charging(&self) -> bool {
        self.current > 0.0
    }

    /// Check if current flows out of the battery
    pub fn is_discharging(&self) -> bool {
        self.current < 0.0
    }

    /// Check if any safety bit is set
    pub fn has_error(&self) -> bool {
        !self.safety.is_empty()
    }
}

// ========================================
// Configuration records
// ========================================

/// Self-discharge compensation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SelfDischargeConfig {
    /// Rate in 0.1 % per day (10 bits)
    pub rate: u16,
    /// Temperature coefficient in % per °C (5 bits)
    pub temperature_coef: u16,
    pub enabled: bool,
}

impl SelfDischargeConfig {
    pub const MAX_RATE: u16 = 0x03FF;
    pub const MAX_TEMPERATURE_COEF: u16 = 0x1F;

    /// Register encoding; `None` if a field does not fit its bit width
    pub fn to_word(&self) -> Option<u16> {
        if self.rate > Self::MAX_RATE || self.temperature_coef > Self::MAX_TEMPERATURE_COEF {
            return None;
        }
        Some(self.rate | (self.temperature_coef << 10) | ((self.enabled as u16) << 15))
    }

    /// Decode the register word
    pub fn from_word(word: u16) -> Self {
        Self {
            rate: word & Self::MAX_RATE,
            temperature_coef: (word >> 10) & Self::MAX_TEMPERATURE_COEF,
            enabled: word & 0x8000 != 0,
        }
    }

    /// Expected loss in % per day at `temperature_c`
    pub fn daily_loss_percent(&self, temperature_c: f32) -> f32 {
        if !self.enabled {
            return 0.0;
        }
        let coef = 1.0 + (self.temperature_coef as f32 / 100.0) * (temperature_c - 25.0);
        (self.rate as f32 / 10.0) * coef
    }
}

/// Power-saving thresholds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PowerConfig {
    /// Sleep entry current threshold (mA)
    pub sleep_current: u16,
    /// Shutdown voltage (mV)
    pub shutdown_voltage: u16,
    /// Wake-up voltage (mV), 16 mV resolution
    pub wake_voltage: u16,
    /// Delay before entering sleep (s), 0-15
    pub sleep_delay: u8,
}

impl PowerConfig {
    /// Packed wake voltage and sleep delay word
    pub fn wake_word(&self) -> u16 {
        (self.wake_voltage & 0xFFF0) | (self.sleep_delay as u16 & 0x0F)
    }

    /// Unpack the wake voltage and sleep delay word
    pub fn set_wake_word(&mut self, word: u16) {
        self.wake_voltage = word & 0xFFF0;
        self.sleep_delay = (word & 0x0F) as u8;
    }
}

/// Capacity configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CapacityConfig {
    /// mAh
    pub design_capacity: u16,
    /// mWh
    pub design_energy: u16,
    /// mAh
    pub cycle_count_threshold: u16,
    /// %
    pub charge_termination: u8,
    /// %
    pub reserve_capacity: u8,
}

impl CapacityConfig {
    /// Data-flash bytes of everything but the design capacity
    pub fn to_block(&self) -> [u8; 8] {
        let [e0, e1] = self.design_energy.to_le_bytes();
        let [c0, c1] = self.cycle_count_threshold.to_le_bytes();
        [
            e0,
            e1,
            c0,
            c1,
            self.charge_termination,
            self.reserve_capacity,
            0,
            0,
        ]
    }

    /// Decode the record read back from data flash
    pub fn from_block(design_capacity: u16, block: &[u8; 8]) -> Self {
        Self {
            design_capacity,
            design_energy: u16::from_le_bytes([block[0], block[1]]),
            cycle_count_threshold: u16::from_le_bytes([block[2], block[3]]),
            charge_termination: block[4],
            reserve_capacity: block[5],
        }
    }
}

/// Alarm enables and thresholds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AlarmConfig {
    pub enabled: AlarmFlags,
    /// %
    pub soc_low: u16,
    /// 0.1 K
    pub temp_high: u16,
    /// mV
    pub volt_low: u16,
    /// mV
    pub volt_high: u16,
    /// mA
    pub current: i16,
}

/// Protection thresholds stored as one data-flash record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtectionConfig {
    /// mA
    pub overcurrent_threshold: i16,
    /// mV
    pub overvoltage_threshold: u16,
    /// mV
    pub undervoltage_threshold: u16,
    /// 0.1 K
    pub temperature_limit: u16,
    /// mAh
    pub design_capacity: u16,
    pub chemistry: BatteryChemistry,
}

impl ProtectionConfig {
    /// Data-flash address of the record (class 0x00, offset 0x10)
    pub const ADDRESS: u16 = 0x0010;

    /// Data-flash bytes of the record
    pub fn to_block(&self) -> [u8; 12] {
        let mut block = [0u8; 12];
        block[0..2].copy_from_slice(&self.overcurrent_threshold.to_le_bytes());
        block[2..4].copy_from_slice(&self.overvoltage_threshold.to_le_bytes());
        block[4..6].copy_from_slice(&self.undervoltage_threshold.to_le_bytes());
        block[6..8].copy_from_slice(&self.temperature_limit.to_le_bytes());
        block[8..10].copy_from_slice(&self.design_capacity.to_le_bytes());
        block[10..12].copy_from_slice(&(self.chemistry as u16).to_le_bytes());
        block
    }

    /// `None` if the stored chemistry code is unknown
    pub fn from_block(block: &[u8; 12]) -> Option<Self> {
        let word = |i: usize| u16::from_le_bytes([block[i], block[i + 1]]);
        Some(Self {
            overcurrent_threshold: word(0) as i16,
            overvoltage_threshold: word(2),
            undervoltage_threshold: word(4),
            temperature_limit: word(6),
            design_capacity: word(8),
            chemistry: BatteryChemistry::try_from(word(10)).ok()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unity_gain() {
        assert_eq!(calibration_gain::<()>(4000, 4000), Ok(1000));
        assert_eq!(calibration_gain::<()>(4100, 4000), Ok(1025));
    }

    #[test]
    fn gain_rejects_zero_denominator_and_negative_ratio() {
        assert_eq!(calibration_gain::<()>(4000, 0), Err(Error::InvalidParameter));
        assert_eq!(calibration_gain::<()>(-500, 500), Err(Error::InvalidParameter));
        assert_eq!(calibration_gain::<()>(-500, -1000), Ok(500));
    }

    #[test]
    fn gain_rejects_overflowing_inputs() {
        assert_eq!(
            calibration_gain::<()>(i32::MAX, 1),
            Err(Error::InvalidParameter)
        );
        assert_eq!(
            calibration_gain::<()>(i32::MIN, -1),
            Err(Error::InvalidParameter)
        );
        // Scales fine but does not fit the register
        assert_eq!(calibration_gain::<()>(70, 1), Err(Error::InvalidParameter));
    }

    #[test]
    fn packed_date_time() {
        // 2024-03-15, 14:37
        let date = ((2024 - 1980) << 9) | (3 << 5) | 15;
        let dt = DateTime::from_packed(date, 14 * 60 + 37);
        assert_eq!(
            dt,
            DateTime {
                year: 2024,
                month: 3,
                day: 15,
                hour: 14,
                minute: 37
            }
        );
    }

    #[test]
    fn self_discharge_word_layout() {
        let config = SelfDischargeConfig {
            rate: 25,
            temperature_coef: 3,
            enabled: true,
        };
        let word = config.to_word().unwrap();
        assert_eq!(word, 25 | (3 << 10) | 0x8000);
        assert_eq!(SelfDischargeConfig::from_word(word), config);

        let too_fast = SelfDischargeConfig {
            rate: 0x400,
            ..config
        };
        assert_eq!(too_fast.to_word(), None);
    }

    #[test]
    fn self_discharge_estimate() {
        let config = SelfDischargeConfig {
            rate: 20,
            temperature_coef: 10,
            enabled: true,
        };
        assert!((config.daily_loss_percent(25.0) - 2.0).abs() < 1e-6);
        assert!((config.daily_loss_percent(35.0) - 4.0).abs() < 1e-6);
        let disabled = SelfDischargeConfig {
            enabled: false,
            ..config
        };
        assert_eq!(disabled.daily_loss_percent(35.0), 0.0);
    }

    #[test]
    fn wake_word_keeps_high_bits_and_delay_nibble() {
        let mut config = PowerConfig {
            wake_voltage: 3412,
            sleep_delay: 0x1A,
            ..Default::default()
        };
        let word = config.wake_word();
        assert_eq!(word, 0x0D50 | 0x0A);
        config.set_wake_word(word);
        assert_eq!(config.wake_voltage, 0x0D50);
        assert_eq!(config.sleep_delay, 0x0A);
    }

    #[test]
    fn protection_record_layout() {
        let config = ProtectionConfig {
            overcurrent_threshold: -3000,
            overvoltage_threshold: 4250,
            undervoltage_threshold: 2800,
            temperature_limit: 3280,
            design_capacity: 2600,
            chemistry: BatteryChemistry::LiFePo4,
        };
        let block = config.to_block();
        assert_eq!(&block[0..2], &(-3000i16).to_le_bytes());
        assert_eq!(&block[10..12], &[0x00, 0x02]);
        assert_eq!(ProtectionConfig::from_block(&block), Some(config));
    }

    #[test]
    fn lifetime_block_decoding() {
        let mut block = [0u8; 32];
        block[0..2].copy_from_slice(&3100u16.to_le_bytes());
        block[2..4].copy_from_slice(&2750u16.to_le_bytes());
        block[6..8].copy_from_slice(&(-4200i16).to_le_bytes());
        block[12..14].copy_from_slice(&17u16.to_le_bytes());
        let stats = LifetimeStats::from_block(&block);
        assert_eq!(stats.max_temp, 3100);
        assert_eq!(stats.min_temp, 2750);
        assert_eq!(stats.max_discharge_current, -4200);
        assert_eq!(stats.update_count, 17);
        assert_eq!(stats.last_update.year, 1980);
    }

    #[test]
    fn chemistry_codes() {
        assert_eq!(BatteryChemistry::try_from(0x0300), Ok(BatteryChemistry::NiMh));
        assert_eq!(BatteryChemistry::try_from(0x0600), Err(0x0600));
        assert_eq!(PowerMode::try_from(2), Ok(PowerMode::DeepSleep));
    }
}
