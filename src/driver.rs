//! Fuel gauge driver implementation

use core::marker::PhantomData;
use core::sync::atomic::{AtomicU8, Ordering};
use core::time::Duration;

use embedded_hal::{delay::DelayNs, i2c::I2c};
use log::{info, warn};

use crate::{
    bus::Bus,
    config_mode::ConfigMode,
    error::{Error, ErrorKind},
    flash::DataFlashAddress,
    guard::{AccessGuard, NoopGuard},
    registers::*,
    retry::RetryPolicy,
    session::Session,
    types::*,
    units::*,
    validate::{validate, Quantity, MAX_PERCENT},
};

#[cfg(feature = "std")]
use crate::guard::TimedMutex;

/// Default bound on the wait for bus access
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_millis(100);
/// Default wait after mode and wake commands (ms)
pub const DEFAULT_SETTLE_MS: u32 = 100;
/// Default wait after shutdown and factory reset (ms)
pub const DEFAULT_POWER_DOWN_MS: u32 = 500;

/// Room temperature written when lifetime data is reset (0.1 K)
const ROOM_TEMPERATURE_DK: u16 = 2981;

/// Driver settings
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DriverConfig {
    /// 7-bit I2C address
    pub address: u8,
    /// Register table of the gauge revision
    pub register_map: RegisterMap,
    /// Retry policy for single bus transactions
    pub retry: RetryPolicy,
    /// Bound on the wait for bus access
    pub lock_timeout: Duration,
    /// Wait after config-mode, chemistry, power-mode and wake commands (ms)
    pub settle_ms: u32,
    /// Wait after shutdown and factory reset (ms)
    pub power_down_ms: u32,
    /// Voltage temperature coefficient (1/°C)
    pub temperature_coefficient: f32,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            address: BMS_I2C_ADDRESS,
            register_map: RegisterMap::default(),
            retry: RetryPolicy::default(),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            settle_ms: DEFAULT_SETTLE_MS,
            power_down_ms: DEFAULT_POWER_DOWN_MS,
            temperature_coefficient: DEFAULT_TEMPERATURE_COEFFICIENT,
        }
    }
}

/// Fuel gauge driver
///
/// All operations take `&self`: bus access is serialized by the guard `G`,
/// which is held for the whole of each operation, including config-mode
/// brackets around data-flash sequences.
///
/// Reads come in two flavors. `get_*` methods return a `Result`; `read_*`
/// methods return a documented sentinel instead of an error, for callers
/// that only want best-effort telemetry. Either way a failure is recorded
/// and can be inspected through [`Bms::last_error`].
pub struct Bms<I, D, G = NoopGuard<Session<I, D>>> {
    session: G,
    lock_timeout: Duration,
    power_down_ms: u32,
    temperature_coefficient: f32,
    last_error: AtomicU8,
    _bus: PhantomData<fn() -> (I, D)>,
}

impl<I, D> Bms<I, D, NoopGuard<Session<I, D>>>
where
    I: I2c,
    D: DelayNs,
{
    /// Create a driver for a single execution context with default settings
    ///
    /// # Example
    /// ```no_run
    /// # use bms_gauge::Bms;
    /// # use embedded_hal::{delay::DelayNs, i2c::I2c};
    /// # fn example<I: I2c, D: DelayNs>(i2c: I, delay: D) {
    /// let gauge = Bms::new(i2c, delay);
    /// let millivolts = gauge.read_voltage();
    /// # }
    /// ```
    pub fn new(i2c: I, delay: D) -> Self {
        Self::with_config(i2c, delay, DriverConfig::default())
    }

    /// Create a driver for a single execution context
    pub fn with_config(i2c: I, delay: D, config: DriverConfig) -> Self {
        Self::with_guard(i2c, delay, config)
    }
}

#[cfg(feature = "std")]
impl<I, D> Bms<I, D, TimedMutex<Session<I, D>>>
where
    I: I2c,
    D: DelayNs,
{
    /// Create a driver that can be shared between threads (for example
    /// behind an `Arc`)
    pub fn new_shared(i2c: I, delay: D, config: DriverConfig) -> Self {
        Self::with_guard(i2c, delay, config)
    }
}

impl<I, D, G> Bms<I, D, G>
where
    I: I2c,
    D: DelayNs,
    G: AccessGuard<Session<I, D>>,
{
    /// Create a driver with an explicit access guard strategy
    pub fn with_guard(i2c: I, delay: D, config: DriverConfig) -> Self {
        let session = Session::new(
            Bus::new(i2c, config.address),
            delay,
            config.register_map,
            config.retry,
            config.settle_ms,
        );
        Self {
            session: G::new(session),
            lock_timeout: config.lock_timeout,
            power_down_ms: config.power_down_ms,
            temperature_coefficient: config.temperature_coefficient,
            last_error: AtomicU8::new(0),
            _bus: PhantomData,
        }
    }

    /// Consume the driver and return the I2C peripheral and delay
    pub fn release(self) -> (I, D) {
        self.session.into_inner().release()
    }

    // ========================================
    // Session plumbing
    // ========================================

    /// Run `f` with exclusive bus access, recording any failure
    fn access<T, F>(&self, f: F) -> Result<T, Error<I::Error>>
    where
        F: FnOnce(&mut Session<I, D>) -> Result<T, Error<I::Error>>,
    {
        let result = match self.session.with_access(self.lock_timeout, f) {
            Some(result) => result,
            None => {
                warn!("bus access not granted within {:?}", self.lock_timeout);
                Err(Error::Timeout)
            }
        };
        if let Err(e) = &result {
            self.record(e.kind());
        }
        result
    }

    /// Run `f` with exclusive bus access inside a config-mode bracket
    fn configure<T, F>(&self, f: F) -> Result<T, Error<I::Error>>
    where
        F: FnOnce(&mut Session<I, D>) -> Result<T, Error<I::Error>>,
    {
        self.access(|s| s.in_config_mode(f))
    }

    /// Range-check a value before it is trusted or written
    fn check(&self, quantity: Quantity, value: impl Into<i32>) -> Result<(), Error<I::Error>> {
        checked(quantity, value).inspect_err(|e| self.record(e.kind()))
    }

    fn record(&self, kind: ErrorKind) {
        self.last_error.store(kind as u8, Ordering::Relaxed);
    }

    /// Most recent failure seen by any operation
    pub fn last_error(&self) -> Option<ErrorKind> {
        ErrorKind::from_raw(self.last_error.load(Ordering::Relaxed))
    }

    /// Forget the recorded failure
    pub fn clear_last_error(&self) {
        self.last_error.store(0, Ordering::Relaxed);
    }

    // ========================================
    // Lifecycle
    // ========================================

    /// Wait for the bus to settle, verify the gauge answers (and identifies
    /// as expected when the register map names an identity), then reset its
    /// watchdog.
    ///
    /// Returns `Error::Initialization` for any failure other than a lock
    /// timeout.
    pub fn init(&self) -> Result<(), Error<I::Error>> {
        let result = self.access(|s| {
            s.settle();
            let control = s.read_word(s.map.control)?;
            if let Some(expected) = s.map.device_id {
                if control != expected {
                    warn!(
                        "unexpected device id {:#06x}, expected {:#06x}",
                        control, expected
                    );
                    return Err(Error::Initialization);
                }
            }
            s.control(s.map.commands.watchdog_reset)?;
            Ok(s.bus.address())
        });
        match result {
            Ok(address) => {
                info!("gauge initialized at {:#04x}", address);
                Ok(())
            }
            Err(Error::Timeout) => Err(Error::Timeout),
            Err(_) => {
                self.record(ErrorKind::Initialization);
                Err(Error::Initialization)
            }
        }
    }

    /// Check whether the gauge answers on the bus
    pub fn is_online(&self) -> bool {
        self.access(|s| s.read_word(s.map.control)).is_ok()
    }

    /// Config-mode state as last driven by this driver
    pub fn config_mode(&self) -> Result<ConfigMode, Error<I::Error>> {
        self.access(|s| Ok(s.mode()))
    }

    /// Enter config mode; succeeds immediately if already entered
    pub fn enter_config_mode(&self) -> Result<(), Error<I::Error>> {
        self.access(|s| s.enter_config())
    }

    /// Leave config mode; succeeds immediately if already left
    pub fn exit_config_mode(&self) -> Result<(), Error<I::Error>> {
        self.access(|s| s.exit_config())
    }

    // ========================================
    // Telemetry
    // ========================================

    /// Get battery voltage in mV
    pub fn get_voltage(&self) -> Result<u16, Error<I::Error>> {
        self.access(read_voltage)
    }

    /// Battery voltage in mV, `0` if unavailable or out of range
    pub fn read_voltage(&self) -> u16 {
        self.get_voltage().unwrap_or(0)
    }

    /// Get current in mA, positive while charging
    pub fn get_current(&self) -> Result<i16, Error<I::Error>> {
        self.access(read_current)
    }

    /// Current in mA, `0` if unavailable or out of range
    pub fn read_current(&self) -> i16 {
        self.get_current().unwrap_or(0)
    }

    /// Get temperature in 0.1 K
    pub fn get_temperature(&self) -> Result<u16, Error<I::Error>> {
        self.access(read_temperature)
    }

    /// Temperature in 0.1 K, `0` if unavailable or out of range
    pub fn read_temperature(&self) -> u16 {
        self.get_temperature().unwrap_or(0)
    }

    /// Get state of charge in percent, clamped to 100
    pub fn get_state_of_charge(&self) -> Result<u16, Error<I::Error>> {
        self.access(|s| s.read_word(s.map.state_of_charge))
            .map(|v| v.min(MAX_PERCENT))
    }

    /// State of charge in percent, `0` if unavailable
    pub fn read_state_of_charge(&self) -> u16 {
        self.get_state_of_charge().unwrap_or(0)
    }

    /// Get state of health in percent, clamped to 100
    pub fn get_state_of_health(&self) -> Result<u16, Error<I::Error>> {
        self.access(|s| s.read_word(s.map.state_of_health))
            .map(|v| v.min(MAX_PERCENT))
    }

    /// State of health in percent, `0` if unavailable
    pub fn read_state_of_health(&self) -> u16 {
        self.get_state_of_health().unwrap_or(0)
    }

    /// Get charge/discharge cycle count
    pub fn get_cycle_count(&self) -> Result<u16, Error<I::Error>> {
        self.access(|s| s.read_word(s.map.cycle_count))
    }

    /// Cycle count, `0` if unavailable
    pub fn read_cycle_count(&self) -> u16 {
        self.get_cycle_count().unwrap_or(0)
    }

    /// Get design capacity in mAh
    pub fn get_design_capacity(&self) -> Result<u16, Error<I::Error>> {
        self.access(|s| s.read_word(s.map.design_capacity))
    }

    /// Design capacity in mAh, `0` if unavailable
    pub fn read_design_capacity(&self) -> u16 {
        self.get_design_capacity().unwrap_or(0)
    }

    /// Get full charge capacity in mAh
    pub fn get_full_charge_capacity(&self) -> Result<u16, Error<I::Error>> {
        self.access(|s| s.read_word(s.map.full_charge_capacity))
    }

    /// Full charge capacity in mAh, `0` if unavailable
    pub fn read_full_charge_capacity(&self) -> u16 {
        self.get_full_charge_capacity().unwrap_or(0)
    }

    /// Get remaining capacity in mAh
    pub fn get_remaining_capacity(&self) -> Result<u16, Error<I::Error>> {
        self.access(|s| s.read_word(s.map.remaining_capacity))
    }

    /// Remaining capacity in mAh, `0` if unavailable
    pub fn read_remaining_capacity(&self) -> u16 {
        self.get_remaining_capacity().unwrap_or(0)
    }

    /// Get safety status flags
    pub fn get_safety_status(&self) -> Result<SafetyStatus, Error<I::Error>> {
        self.access(|s| s.read_word(s.map.safety_status))
            .map(SafetyStatus::from_bits_truncate)
    }

    /// Safety status flags, empty if unavailable
    pub fn read_safety_status(&self) -> SafetyStatus {
        self.get_safety_status().unwrap_or(SafetyStatus::empty())
    }

    /// Check if the over-voltage safety bit is set
    pub fn is_over_voltage(&self) -> bool {
        self.read_safety_status()
            .contains(SafetyStatus::OVER_VOLTAGE)
    }

    /// Check if the under-voltage safety bit is set
    pub fn is_under_voltage(&self) -> bool {
        self.read_safety_status()
            .contains(SafetyStatus::UNDER_VOLTAGE)
    }

    /// Check if the over-current safety bit is set
    pub fn is_over_current(&self) -> bool {
        self.read_safety_status()
            .contains(SafetyStatus::OVER_CURRENT)
    }

    /// Check if the over-temperature safety bit is set
    pub fn is_over_temperature(&self) -> bool {
        self.read_safety_status()
            .contains(SafetyStatus::OVER_TEMPERATURE)
    }

    /// Average time to empty in minutes, `65535` if unknown
    pub fn read_average_time_to_empty(&self) -> u16 {
        self.access(|s| s.read_word(s.map.average_time_to_empty))
            .unwrap_or(u16::MAX)
    }

    /// Average time to full in minutes, `65535` if unknown
    pub fn read_average_time_to_full(&self) -> u16 {
        self.access(|s| s.read_word(s.map.average_time_to_full))
            .unwrap_or(u16::MAX)
    }

    /// Available energy in 10 mWh, `0` if unavailable
    pub fn read_available_energy(&self) -> u16 {
        self.access(|s| s.read_word(s.map.available_energy))
            .unwrap_or(0)
    }

    /// Average power in mW, `0` if unavailable
    pub fn read_average_power(&self) -> u16 {
        self.access(|s| s.read_word(s.map.average_power))
            .unwrap_or(0)
    }

    /// State-of-charge error margin in percent, `100` if unavailable
    pub fn read_max_error(&self) -> u8 {
        self.access(|s| s.read_word(s.map.max_error))
            .map(|v| v.min(MAX_PERCENT) as u8)
            .unwrap_or(100)
    }

    /// Get the charge voltage the gauge requests, in mV
    pub fn get_charge_voltage(&self) -> Result<u16, Error<I::Error>> {
        self.access(|s| s.read_word(s.map.charge_voltage))
    }

    /// Get the charge current the gauge requests, in mA
    pub fn get_charge_current(&self) -> Result<u16, Error<I::Error>> {
        self.access(|s| s.read_word(s.map.charge_current))
    }

    /// Pack power drawn right now in mW, from voltage and current
    pub fn read_power_consumption(&self) -> u16 {
        let mv = self.read_voltage() as u32;
        let ma = self.read_current().unsigned_abs() as u32;
        (mv * ma / 1000) as u16
    }

    /// Check the sleep bit of the control status word
    pub fn is_in_sleep_mode(&self) -> bool {
        self.access(|s| s.read_word(s.map.control))
            .map(|status| status & CONTROL_STATUS_SLEEP != 0)
            .unwrap_or(false)
    }

    // ========================================
    // Unit conversion
    // ========================================

    /// Get the temperature-compensated battery voltage in V.
    ///
    /// Voltage and temperature are read under one bus access and must both
    /// be in range.
    pub fn get_voltage_volts(&self) -> Result<f32, Error<I::Error>> {
        let (mv, dk) = self.access(|s| Ok((read_voltage(s)?, read_temperature(s)?)))?;
        Ok(compensate_voltage(
            millivolts_to_volts(mv),
            decikelvin_to_celsius(dk),
            self.temperature_coefficient,
        ))
    }

    /// Compensated battery voltage in V, `0.0` if unavailable
    pub fn read_voltage_volts(&self) -> f32 {
        self.get_voltage_volts().unwrap_or(0.0)
    }

    /// Current in A, `0.0` if unavailable
    pub fn read_current_amps(&self) -> f32 {
        milliamps_to_amps(self.read_current())
    }

    /// Temperature in °C; an unavailable reading converts to -273.15
    pub fn read_temperature_celsius(&self) -> f32 {
        decikelvin_to_celsius(self.read_temperature())
    }

    /// Full charge capacity in Ah
    pub fn read_full_charge_capacity_amp_hours(&self) -> f32 {
        milliamp_hours_to_amp_hours(self.read_full_charge_capacity())
    }

    /// Remaining capacity in Ah
    pub fn read_remaining_capacity_amp_hours(&self) -> f32 {
        milliamp_hours_to_amp_hours(self.read_remaining_capacity())
    }

    /// Available energy in Wh
    pub fn read_available_energy_watt_hours(&self) -> f32 {
        energy_to_watt_hours(self.read_available_energy())
    }

    /// Average power in W
    pub fn read_average_power_watts(&self) -> f32 {
        milliwatts_to_watts(self.read_average_power())
    }

    /// Requested charge voltage in V, `0.0` if unavailable
    pub fn read_charge_voltage_volts(&self) -> f32 {
        millivolts_to_volts(self.get_charge_voltage().unwrap_or(0))
    }

    /// Requested charge current in A, `0.0` if unavailable
    pub fn read_charge_current_amps(&self) -> f32 {
        self.get_charge_current().unwrap_or(0) as f32 / 1000.0
    }

    // ========================================
    // Status snapshots
    // ========================================

    /// Decode the flags register and collect the main readings.
    ///
    /// Fails only if the flags or control words cannot be read; the other
    /// fields fall back to their sentinels.
    pub fn get_detailed_status(&self) -> Result<DetailedStatus, Error<I::Error>> {
        let (flags, control) =
            self.access(|s| Ok((s.read_word(s.map.flags)?, s.read_word(s.map.control)?)))?;
        Ok(DetailedStatus {
            flags: GaugeFlags::from_bits_truncate(flags),
            safety: self.read_safety_status(),
            error_code: (control >> 8) as u8,
            state_of_charge: self.read_state_of_charge(),
            state_of_health: self.read_state_of_health(),
            remaining_capacity: self.read_remaining_capacity(),
            full_capacity: self.read_full_charge_capacity(),
            current: self.read_current(),
            temperature: self.read_temperature(),
        })
    }

    /// Collect a snapshot in SI units.
    ///
    /// Fails with `Error::InvalidParameter` when the voltage is unavailable
    /// or the temperature is outside -40..=85 °C.
    pub fn get_battery_status(&self) -> Result<BatteryStatus, Error<I::Error>> {
        let status = BatteryStatus {
            voltage: self.read_voltage_volts(),
            current: self.read_current_amps(),
            temperature: self.read_temperature_celsius(),
            soc: self.read_state_of_charge(),
            soh: self.read_state_of_health(),
            safety: self.read_safety_status(),
            cycle_count: self.read_cycle_count(),
            remaining_capacity: self.read_remaining_capacity_amp_hours(),
            full_charge_capacity: self.read_full_charge_capacity_amp_hours(),
        };
        if status.voltage == 0.0 || !(-40.0..=85.0).contains(&status.temperature) {
            self.record(ErrorKind::InvalidParameter);
            return Err(Error::InvalidParameter);
        }
        Ok(status)
    }

    // ========================================
    // Charge limits and capacity
    // ========================================

    /// Set the charge voltage limit in mV
    pub fn set_charge_voltage(&self, millivolts: u16) -> Result<(), Error<I::Error>> {
        self.check(Quantity::ChargeVoltage, millivolts)?;
        self.configure(|s| s.write_word(s.map.charge_voltage, millivolts))
    }

    /// Set the charge current limit in mA
    pub fn set_charge_current(&self, milliamps: u16) -> Result<(), Error<I::Error>> {
        self.check(Quantity::ChargeCurrent, milliamps)?;
        self.configure(|s| s.write_word(s.map.charge_current, milliamps))
    }

    /// Set design capacity in mAh
    pub fn set_design_capacity(&self, capacity_mah: u16) -> Result<(), Error<I::Error>> {
        self.configure(|s| s.write_word(s.map.design_capacity, capacity_mah))
    }

    /// Set full charge capacity in mAh
    pub fn set_full_charge_capacity(&self, capacity_mah: u16) -> Result<(), Error<I::Error>> {
        self.configure(|s| s.write_word(s.map.full_charge_capacity, capacity_mah))
    }

    /// Write design capacity and the capacity data-flash record
    pub fn set_capacity_config(&self, config: &CapacityConfig) -> Result<(), Error<I::Error>> {
        let block = config.to_block();
        self.configure(|s| {
            s.write_word(s.map.design_capacity, config.design_capacity)?;
            s.write_block(capacity_address(), &block)
        })
    }

    /// Read design capacity and the capacity data-flash record
    pub fn get_capacity_config(&self) -> Result<CapacityConfig, Error<I::Error>> {
        self.configure(|s| {
            let design_capacity = s.read_word(s.map.design_capacity)?;
            let mut block = [0u8; 8];
            s.read_block(capacity_address(), &mut block)?;
            Ok(CapacityConfig::from_block(design_capacity, &block))
        })
    }

    /// Write the protection thresholds record
    pub fn set_protection_config(
        &self,
        config: &ProtectionConfig,
    ) -> Result<(), Error<I::Error>> {
        self.check(Quantity::ChargeVoltage, config.overvoltage_threshold)?;
        self.check(Quantity::Voltage, config.undervoltage_threshold)?;
        self.check(Quantity::Current, config.overcurrent_threshold)?;
        self.check(Quantity::Temperature, config.temperature_limit)?;
        let block = config.to_block();
        self.configure(|s| s.write_block(ProtectionConfig::ADDRESS.into(), &block))
    }

    /// Read the protection thresholds record
    pub fn get_protection_config(&self) -> Result<ProtectionConfig, Error<I::Error>> {
        self.configure(|s| {
            let mut block = [0u8; 12];
            s.read_block(ProtectionConfig::ADDRESS.into(), &mut block)?;
            ProtectionConfig::from_block(&block).ok_or(Error::InvalidParameter)
        })
    }

    // ========================================
    // History
    // ========================================

    /// Get the timestamp of the last full charge
    pub fn get_last_charge_time(&self) -> Result<DateTime, Error<I::Error>> {
        self.configure(|s| {
            let mut raw = [0u8; 4];
            s.read_block(DataFlashAddress::new(class::STATE, 14), &mut raw)?;
            Ok(DateTime::from_packed(
                u16::from_le_bytes([raw[0], raw[1]]),
                u16::from_le_bytes([raw[2], raw[3]]),
            ))
        })
    }

    /// Get lifetime extremes
    pub fn get_lifetime_stats(&self) -> Result<LifetimeStats, Error<I::Error>> {
        self.configure(|s| {
            let mut block = [0u8; DATA_FLASH_BLOCK_SIZE];
            s.read_block(DataFlashAddress::new(class::LIFETIME, 0), &mut block)?;
            Ok(LifetimeStats::from_block(&block))
        })
    }

    /// Clear lifetime data; temperature extremes restart at room temperature
    pub fn reset_lifetime_stats(&self) -> Result<(), Error<I::Error>> {
        let mut block = [0u8; DATA_FLASH_BLOCK_SIZE];
        let room = ROOM_TEMPERATURE_DK.to_le_bytes();
        block[0..2].copy_from_slice(&room);
        block[2..4].copy_from_slice(&room);
        self.configure(|s| s.write_block(DataFlashAddress::new(class::LIFETIME, 0), &block))
    }

    // ========================================
    // Calibration
    // ========================================

    /// Derive and store the voltage gain
    pub fn calibrate_voltage(&self, cal: &VoltageCalibration) -> Result<(), Error<I::Error>> {
        let gain = self.voltage_gain(cal)?;
        self.configure(|s| s.write_word(s.map.voltage_calibration, gain))
    }

    /// Derive and store the current gain and the shunt resistance
    pub fn calibrate_current(&self, cal: &CurrentCalibration) -> Result<(), Error<I::Error>> {
        let gain = self.current_gain(cal)?;
        self.configure(|s| {
            s.write_word(s.map.current_calibration, gain)?;
            s.write_word(s.map.shunt_resistance, cal.shunt_micro_ohms)
        })
    }

    /// Derive and store the temperature gain
    pub fn calibrate_temperature(
        &self,
        cal: &TemperatureCalibration,
    ) -> Result<(), Error<I::Error>> {
        let gain = self.temperature_gain(cal)?;
        self.configure(|s| s.write_word(s.map.temperature_calibration, gain))
    }

    /// Store all three gains and mark the gauge calibrated, in one config
    /// mode session. Nothing is written unless all inputs are valid.
    pub fn perform_full_calibration(
        &self,
        voltage: &VoltageCalibration,
        current: &CurrentCalibration,
        temperature: &TemperatureCalibration,
    ) -> Result<(), Error<I::Error>> {
        let voltage_gain = self.voltage_gain(voltage)?;
        let current_gain = self.current_gain(current)?;
        let temperature_gain = self.temperature_gain(temperature)?;
        self.configure(|s| {
            s.write_word(s.map.voltage_calibration, voltage_gain)?;
            s.write_word(s.map.current_calibration, current_gain)?;
            s.write_word(s.map.shunt_resistance, current.shunt_micro_ohms)?;
            s.write_word(s.map.temperature_calibration, temperature_gain)?;
            s.write_word(s.map.calibration_status, CALIBRATION_COMPLETE_MARKER)
        })
    }

    /// Check for the calibration-complete marker
    pub fn is_calibrated(&self) -> bool {
        self.access(|s| s.read_word(s.map.calibration_status))
            .map(|status| status == CALIBRATION_COMPLETE_MARKER)
            .unwrap_or(false)
    }

    /// Reset all gains to unity and clear the calibration marker
    pub fn clear_calibration(&self) -> Result<(), Error<I::Error>> {
        self.configure(|s| {
            s.write_word(s.map.voltage_calibration, UNITY_GAIN)?;
            s.write_word(s.map.current_calibration, UNITY_GAIN)?;
            s.write_word(s.map.temperature_calibration, UNITY_GAIN)?;
            s.write_word(s.map.calibration_status, 0x0000)
        })
    }

    fn voltage_gain(&self, cal: &VoltageCalibration) -> Result<u16, Error<I::Error>> {
        self.check(Quantity::Voltage, cal.actual_mv)?;
        self.check(Quantity::Voltage, cal.measured_mv)?;
        self.gain(cal.actual_mv as i32, cal.measured_mv as i32)
    }

    fn current_gain(&self, cal: &CurrentCalibration) -> Result<u16, Error<I::Error>> {
        self.check(Quantity::Current, cal.actual_ma)?;
        self.check(Quantity::Current, cal.measured_ma)?;
        if cal.shunt_micro_ohms == 0 {
            warn!("current calibration with zero shunt resistance");
            self.record(ErrorKind::InvalidParameter);
            return Err(Error::InvalidParameter);
        }
        self.gain(cal.actual_ma as i32, cal.measured_ma as i32)
    }

    fn temperature_gain(&self, cal: &TemperatureCalibration) -> Result<u16, Error<I::Error>> {
        self.check(Quantity::Temperature, cal.actual_dk)?;
        self.check(Quantity::Temperature, cal.measured_dk)?;
        self.gain(cal.actual_dk as i32, cal.measured_dk as i32)
    }

    fn gain(&self, actual: i32, measured: i32) -> Result<u16, Error<I::Error>> {
        calibration_gain(actual, measured).inspect_err(|e| {
            warn!("no usable calibration gain for {} / {}", actual, measured);
            self.record(e.kind());
        })
    }

    // ========================================
    // Chemistry and self-discharge
    // ========================================

    /// Select the battery chemistry profile
    pub fn set_battery_chemistry(
        &self,
        chemistry: BatteryChemistry,
    ) -> Result<(), Error<I::Error>> {
        self.configure(|s| {
            s.write_word(s.map.chemistry, chemistry as u16)?;
            s.settle();
            Ok(())
        })
    }

    /// Get the selected battery chemistry profile
    pub fn get_battery_chemistry(&self) -> Result<BatteryChemistry, Error<I::Error>> {
        self.access(|s| {
            let raw = s.read_word(s.map.chemistry)?;
            BatteryChemistry::try_from(raw).map_err(|code| {
                warn!("unknown chemistry code {:#06x}", code);
                Error::InvalidParameter
            })
        })
    }

    /// Store the self-discharge compensation settings
    pub fn configure_self_discharge(
        &self,
        config: &SelfDischargeConfig,
    ) -> Result<(), Error<I::Error>> {
        let Some(word) = config.to_word() else {
            warn!("self-discharge settings exceed their field widths");
            self.record(ErrorKind::InvalidParameter);
            return Err(Error::InvalidParameter);
        };
        self.configure(|s| s.write_word(s.map.self_discharge, word))
    }

    /// Get the self-discharge compensation settings
    pub fn get_self_discharge_config(&self) -> Result<SelfDischargeConfig, Error<I::Error>> {
        self.access(|s| s.read_word(s.map.self_discharge))
            .map(SelfDischargeConfig::from_word)
    }

    /// Estimated self-discharge in % per day at the current temperature,
    /// `0.0` if compensation is disabled or unavailable
    pub fn read_estimated_self_discharge(&self) -> f32 {
        match self.get_self_discharge_config() {
            Ok(config) => config.daily_loss_percent(self.read_temperature_celsius()),
            Err(_) => 0.0,
        }
    }

    // ========================================
    // Power management
    // ========================================

    /// Change the power mode.
    ///
    /// Shutdown is issued in normal mode followed by the power-down wait;
    /// every other mode is written from config mode.
    pub fn set_power_mode(&self, mode: PowerMode) -> Result<(), Error<I::Error>> {
        if mode == PowerMode::Shutdown {
            let wait = self.power_down_ms;
            return self.access(|s| {
                s.force_normal()?;
                s.write_word(s.map.power_mode, mode as u16)?;
                s.pause(wait);
                Ok(())
            });
        }
        self.configure(|s| {
            s.write_word(s.map.power_mode, mode as u16)?;
            s.settle();
            Ok(())
        })
    }

    /// Get the current power mode
    pub fn get_power_mode(&self) -> Result<PowerMode, Error<I::Error>> {
        self.access(|s| {
            let raw = s.read_word(s.map.power_mode)?;
            PowerMode::try_from(raw).map_err(|_| Error::InvalidParameter)
        })
    }

    /// Store sleep / shutdown / wake thresholds
    pub fn configure_power_saving(&self, config: &PowerConfig) -> Result<(), Error<I::Error>> {
        self.configure(|s| {
            s.write_word(s.map.sleep_current, config.sleep_current)?;
            s.write_word(s.map.shutdown_voltage, config.shutdown_voltage)?;
            s.write_word(s.map.wake_config, config.wake_word())
        })
    }

    /// Read sleep / shutdown / wake thresholds
    pub fn get_power_config(&self) -> Result<PowerConfig, Error<I::Error>> {
        self.configure(|s| {
            let mut config = PowerConfig {
                sleep_current: s.read_word(s.map.sleep_current)?,
                shutdown_voltage: s.read_word(s.map.shutdown_voltage)?,
                ..PowerConfig::default()
            };
            config.set_wake_word(s.read_word(s.map.wake_config)?);
            Ok(config)
        })
    }

    /// Put the gauge to sleep, leaving config mode first if needed
    pub fn sleep(&self) -> Result<(), Error<I::Error>> {
        self.access(|s| {
            s.force_normal()?;
            s.control(s.map.commands.sleep)
        })
    }

    /// Wake the gauge and wait for it to settle
    pub fn wake(&self) -> Result<(), Error<I::Error>> {
        self.access(|s| {
            s.control(s.map.commands.wake)?;
            s.settle();
            Ok(())
        })
    }

    /// Reset the gauge watchdog
    pub fn reset_watchdog(&self) -> Result<(), Error<I::Error>> {
        self.access(|s| s.control(s.map.commands.watchdog_reset))
    }

    /// Restore factory defaults and wait until the gauge answers again
    pub fn factory_reset(&self) -> Result<(), Error<I::Error>> {
        let wait = self.power_down_ms;
        self.access(|s| {
            s.force_normal()?;
            s.control(s.map.commands.factory_reset)?;
            info!("factory reset issued");
            s.pause(wait);
            s.read_word(s.map.control).map(|_| ())
        })
    }

    // ========================================
    // Alarms
    // ========================================

    /// Store alarm enables and thresholds
    pub fn set_alarm_config(&self, config: &AlarmConfig) -> Result<(), Error<I::Error>> {
        self.check(Quantity::StateOfCharge, config.soc_low)?;
        self.check(Quantity::Temperature, config.temp_high)?;
        self.check(Quantity::Voltage, config.volt_low)?;
        self.check(Quantity::Voltage, config.volt_high)?;
        self.check(Quantity::Current, config.current)?;
        self.configure(|s| {
            s.write_word(s.map.alarm_enable, config.enabled.bits())?;
            s.write_word(s.map.alarm_soc_low, config.soc_low)?;
            s.write_word(s.map.alarm_temp_high, config.temp_high)?;
            s.write_word(s.map.alarm_volt_low, config.volt_low)?;
            s.write_word(s.map.alarm_volt_high, config.volt_high)?;
            s.write_word(s.map.alarm_current, config.current as u16)
        })
    }

    /// Read alarm enables and thresholds
    pub fn get_alarm_config(&self) -> Result<AlarmConfig, Error<I::Error>> {
        self.configure(|s| {
            Ok(AlarmConfig {
                enabled: AlarmFlags::from_bits_truncate(s.read_word(s.map.alarm_enable)?),
                soc_low: s.read_word(s.map.alarm_soc_low)?,
                temp_high: s.read_word(s.map.alarm_temp_high)?,
                volt_low: s.read_word(s.map.alarm_volt_low)?,
                volt_high: s.read_word(s.map.alarm_volt_high)?,
                current: s.read_word(s.map.alarm_current)? as i16,
            })
        })
    }

    /// Get triggered alarms
    pub fn get_alarm_status(&self) -> Result<AlarmFlags, Error<I::Error>> {
        self.access(|s| s.read_word(s.map.alarm_status))
            .map(AlarmFlags::from_bits_truncate)
    }

    /// Triggered alarms, empty if unavailable
    pub fn read_alarm_status(&self) -> AlarmFlags {
        self.get_alarm_status().unwrap_or(AlarmFlags::empty())
    }

    /// Check whether every alarm in `alarm` is triggered
    pub fn is_alarm_active(&self, alarm: AlarmFlags) -> bool {
        self.read_alarm_status().contains(alarm)
    }

    /// Acknowledge all triggered alarms
    pub fn clear_alarms(&self) -> Result<(), Error<I::Error>> {
        self.access(|s| s.write_word(s.map.alarm_status, 0x0000))
    }

    /// Set the low state-of-charge alarm threshold in percent
    pub fn set_low_soc_alarm(&self, percent: u8) -> Result<(), Error<I::Error>> {
        self.check(Quantity::StateOfCharge, percent)?;
        self.configure(|s| s.write_word(s.map.alarm_soc_low, percent as u16))
    }

    /// Set the high temperature alarm threshold in 0.1 K
    pub fn set_high_temperature_alarm(&self, decikelvin: u16) -> Result<(), Error<I::Error>> {
        self.check(Quantity::Temperature, decikelvin)?;
        self.configure(|s| s.write_word(s.map.alarm_temp_high, decikelvin))
    }

    /// Set the low temperature alarm threshold in 0.1 K.
    ///
    /// Register maps without a dedicated low threshold register write the
    /// high threshold register, as the reference firmware does.
    pub fn set_low_temperature_alarm(&self, decikelvin: u16) -> Result<(), Error<I::Error>> {
        self.check(Quantity::Temperature, decikelvin)?;
        self.configure(|s| {
            let reg = match s.map.alarm_temp_low {
                Some(reg) => reg,
                None => {
                    warn!("no low temperature alarm register, writing the high threshold");
                    s.map.alarm_temp_high
                }
            };
            s.write_word(reg, decikelvin)
        })
    }

    /// Set the low voltage alarm threshold in mV
    pub fn set_low_voltage_alarm(&self, millivolts: u16) -> Result<(), Error<I::Error>> {
        self.check(Quantity::Voltage, millivolts)?;
        self.configure(|s| s.write_word(s.map.alarm_volt_low, millivolts))
    }

    /// Set the high voltage alarm threshold in mV
    pub fn set_high_voltage_alarm(&self, millivolts: u16) -> Result<(), Error<I::Error>> {
        self.check(Quantity::Voltage, millivolts)?;
        self.configure(|s| s.write_word(s.map.alarm_volt_high, millivolts))
    }

    /// Set the current alarm threshold in mA
    pub fn set_current_alarm(&self, milliamps: i16) -> Result<(), Error<I::Error>> {
        self.check(Quantity::Current, milliamps)?;
        self.configure(|s| s.write_word(s.map.alarm_current, milliamps as u16))
    }
}

fn checked<E>(quantity: Quantity, value: impl Into<i32>) -> Result<(), Error<E>> {
    validate(quantity, value).map_err(|rejected| {
        warn!(
            "{:?} value {} out of range",
            rejected.quantity, rejected.value
        );
        Error::InvalidParameter
    })
}

fn read_voltage<I: I2c, D: DelayNs>(s: &mut Session<I, D>) -> Result<u16, Error<I::Error>> {
    let raw = s.read_word(s.map.voltage)?;
    checked(Quantity::Voltage, raw)?;
    Ok(raw)
}

fn read_current<I: I2c, D: DelayNs>(s: &mut Session<I, D>) -> Result<i16, Error<I::Error>> {
    let raw = s.read_word(s.map.current)? as i16;
    checked(Quantity::Current, raw)?;
    Ok(raw)
}

fn read_temperature<I: I2c, D: DelayNs>(s: &mut Session<I, D>) -> Result<u16, Error<I::Error>> {
    let raw = s.read_word(s.map.temperature)?;
    checked(Quantity::Temperature, raw)?;
    Ok(raw)
}

fn capacity_address() -> DataFlashAddress {
    DataFlashAddress::new(class::CAPACITY, 13)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeGauge;
    use core::cell::RefCell;
    use embedded_hal::i2c::ErrorKind as I2cErrorKind;
    use embedded_hal_mock::eh1::{
        delay::{CheckedDelay, NoopDelay, Transaction as Wait},
        i2c::{Mock, Transaction},
    };

    const ADDR: u8 = 0x55;
    const ENTER: (u8, [u8; 2]) = (0x00, [0x55, 0x55]);
    const EXIT: (u8, [u8; 2]) = (0x00, [0xAA, 0xAA]);

    fn gauge(fake: &FakeGauge) -> Bms<FakeGauge, NoopDelay> {
        Bms::new(fake.clone(), NoopDelay::new())
    }

    /// Driver whose delay expects exactly `waits` (ms), in order
    fn timed_gauge(fake: &FakeGauge, waits: &[u32]) -> Bms<FakeGauge, CheckedDelay> {
        let expectations: Vec<Wait> = waits.iter().map(|ms| Wait::delay_ms(*ms)).collect();
        Bms::new(fake.clone(), CheckedDelay::new(&expectations))
    }

    fn w(entry: (u8, [u8; 2])) -> (u8, Vec<u8>) {
        (entry.0, entry.1.to_vec())
    }

    /// Guard that never grants access
    struct Contended<T>(RefCell<T>);

    impl<T> AccessGuard<T> for Contended<T> {
        fn new(value: T) -> Self {
            Contended(RefCell::new(value))
        }

        fn with_access<R, F>(&self, _timeout: Duration, _f: F) -> Option<R>
        where
            F: FnOnce(&mut T) -> R,
        {
            None
        }

        fn into_inner(self) -> T {
            self.0.into_inner()
        }
    }

    #[test]
    fn telemetry_reads() {
        let fake = FakeGauge::new();
        fake.set_word(0x08, 3700);
        fake.set_word(0x10, (-1250i16) as u16);
        fake.set_word(0x0C, 2982);
        fake.set_word(0x02, 150);
        fake.set_word(0x2C, 42);
        let bms = gauge(&fake);

        assert_eq!(bms.get_voltage(), Ok(3700));
        assert_eq!(bms.read_current(), -1250);
        assert_eq!(bms.read_temperature(), 2982);
        assert_eq!(bms.read_state_of_charge(), 100);
        assert_eq!(bms.read_cycle_count(), 42);
        assert_eq!(bms.last_error(), None);
        assert!((bms.read_temperature_celsius() - 25.05).abs() < 1e-3);
        assert!((bms.read_current_amps() + 1.25).abs() < 1e-4);
    }

    #[test]
    fn safety_predicates_follow_status_bits() {
        let fake = FakeGauge::new();
        fake.set_word(
            0x0E,
            (SafetyStatus::OVER_VOLTAGE | SafetyStatus::OVER_TEMPERATURE).bits(),
        );
        let bms = gauge(&fake);

        assert!(bms.is_over_voltage());
        assert!(!bms.is_under_voltage());
        assert!(!bms.is_over_current());
        assert!(bms.is_over_temperature());
    }

    #[test]
    fn out_of_range_temperature_gives_sentinel() {
        let fake = FakeGauge::new();
        fake.set_word(0x0C, 2730);
        let bms = gauge(&fake);

        assert_eq!(bms.read_temperature(), 0);
        assert_eq!(bms.last_error(), Some(ErrorKind::InvalidParameter));
        assert_eq!(bms.get_temperature(), Err(Error::InvalidParameter));

        bms.clear_last_error();
        assert_eq!(bms.last_error(), None);
    }

    #[test]
    fn compensated_voltage_needs_valid_temperature() {
        let fake = FakeGauge::new();
        fake.set_word(0x08, 3700);
        fake.set_word(0x0C, 2982);
        let bms = gauge(&fake);
        assert!((bms.read_voltage_volts() - 3.7).abs() < 1e-3);

        fake.set_word(0x0C, 0);
        assert_eq!(bms.read_voltage_volts(), 0.0);
    }

    #[test]
    fn bus_failure_is_recorded() {
        let failing =
            Transaction::write_read(ADDR, vec![0x08], vec![0, 0]).with_error(I2cErrorKind::Other);
        let expectations = [failing.clone(), failing.clone(), failing];
        let bms = Bms::new(Mock::new(&expectations), NoopDelay::new());

        assert_eq!(bms.read_voltage(), 0);
        assert_eq!(bms.last_error(), Some(ErrorKind::Communication));

        bms.release().0.done();
    }

    #[test]
    fn denied_access_times_out_without_bus_traffic() {
        let fake = FakeGauge::new();
        let bms: Bms<FakeGauge, NoopDelay, Contended<Session<FakeGauge, NoopDelay>>> =
            Bms::with_guard(fake.clone(), NoopDelay::new(), DriverConfig::default());

        assert_eq!(bms.get_voltage(), Err(Error::Timeout));
        assert_eq!(bms.set_charge_current(1000), Err(Error::Timeout));
        assert_eq!(bms.last_error(), Some(ErrorKind::Timeout));
        assert_eq!(fake.transactions(), 0);
    }

    /// Bus that parks inside every transaction until released, answering
    /// reads with 3700
    #[cfg(feature = "std")]
    struct StallingBus {
        entered: std::sync::mpsc::Sender<()>,
        release: std::sync::mpsc::Receiver<()>,
        calls: std::sync::Arc<std::sync::atomic::AtomicUsize>,
    }

    #[cfg(feature = "std")]
    impl embedded_hal::i2c::ErrorType for StallingBus {
        type Error = I2cErrorKind;
    }

    #[cfg(feature = "std")]
    impl I2c for StallingBus {
        fn transaction(
            &mut self,
            _address: u8,
            operations: &mut [embedded_hal::i2c::Operation<'_>],
        ) -> Result<(), Self::Error> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let _ = self.entered.send(());
            let _ = self.release.recv();
            for op in operations {
                if let embedded_hal::i2c::Operation::Read(buf) = op {
                    buf.copy_from_slice(&3700u16.to_le_bytes()[..buf.len()]);
                }
            }
            Ok(())
        }
    }

    #[cfg(feature = "std")]
    #[test]
    fn shared_driver_times_out_while_another_thread_holds_the_bus() {
        use std::sync::{atomic::AtomicUsize, mpsc, Arc};
        use std::thread;

        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let calls = Arc::new(AtomicUsize::new(0));
        let bus = StallingBus {
            entered: entered_tx,
            release: release_rx,
            calls: Arc::clone(&calls),
        };
        let config = DriverConfig {
            lock_timeout: Duration::from_millis(20),
            ..DriverConfig::default()
        };
        let bms = Arc::new(Bms::new_shared(bus, NoopDelay::new(), config));

        let holder = {
            let bms = Arc::clone(&bms);
            thread::spawn(move || bms.get_voltage())
        };
        entered_rx.recv().unwrap();

        assert_eq!(bms.get_voltage(), Err(Error::Timeout));
        assert_eq!(bms.last_error(), Some(ErrorKind::Timeout));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        release_tx.send(()).unwrap();
        assert_eq!(holder.join().unwrap(), Ok(3700));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn init_resets_watchdog() {
        let fake = FakeGauge::new();
        let bms = timed_gauge(&fake, &[100]);

        assert_eq!(bms.init(), Ok(()));
        assert_eq!(fake.writes(), vec![(0x00, vec![0x33, 0xCC])]);
        bms.release().1.done();
    }

    #[test]
    fn init_checks_device_id() {
        let fake = FakeGauge::new();
        fake.set_word(0x00, 0x0200);
        let config = DriverConfig {
            register_map: RegisterMap::BQ34Z100,
            ..DriverConfig::default()
        };
        let bms = Bms::with_config(fake.clone(), NoopDelay::new(), config);

        assert_eq!(bms.init(), Err(Error::Initialization));
        assert_eq!(bms.last_error(), Some(ErrorKind::Initialization));
        assert!(fake.writes().is_empty());
    }

    #[test]
    fn init_fails_when_gauge_is_silent() {
        let failing =
            Transaction::write_read(ADDR, vec![0x00], vec![0, 0]).with_error(I2cErrorKind::Other);
        let expectations = [failing.clone(), failing.clone(), failing];
        let bms = Bms::new(Mock::new(&expectations), NoopDelay::new());

        assert_eq!(bms.init(), Err(Error::Initialization));
        assert_eq!(bms.last_error(), Some(ErrorKind::Initialization));

        bms.release().0.done();
    }

    #[test]
    fn charge_limits_are_validated_before_config_mode() {
        let fake = FakeGauge::new();
        let bms = gauge(&fake);

        assert_eq!(bms.set_charge_voltage(4500), Err(Error::InvalidParameter));
        assert_eq!(bms.set_charge_current(3001), Err(Error::InvalidParameter));
        assert_eq!(fake.transactions(), 0);

        assert_eq!(bms.set_charge_voltage(4200), Ok(()));
        assert_eq!(
            fake.writes(),
            vec![w(ENTER), (0x30, vec![0x68, 0x10]), w(EXIT)]
        );
        assert_eq!(bms.config_mode(), Ok(ConfigMode::Normal));
    }

    #[test]
    fn unity_voltage_calibration() {
        let fake = FakeGauge::new();
        let bms = gauge(&fake);

        let cal = VoltageCalibration {
            actual_mv: 4000,
            measured_mv: 4000,
        };
        assert_eq!(bms.calibrate_voltage(&cal), Ok(()));
        assert_eq!(
            fake.writes(),
            vec![w(ENTER), (0x0D, vec![0xE8, 0x03]), w(EXIT)]
        );
    }

    #[test]
    fn zero_measured_current_writes_nothing() {
        let fake = FakeGauge::new();
        let bms = gauge(&fake);

        let cal = CurrentCalibration {
            actual_ma: 1000,
            measured_ma: 0,
            shunt_micro_ohms: 10_000,
        };
        assert_eq!(bms.calibrate_current(&cal), Err(Error::InvalidParameter));
        assert_eq!(fake.transactions(), 0);
    }

    #[test]
    fn full_calibration_marks_gauge_calibrated() {
        let fake = FakeGauge::new();
        let bms = gauge(&fake);
        assert!(!bms.is_calibrated());

        let voltage = VoltageCalibration {
            actual_mv: 3700,
            measured_mv: 3650,
        };
        let current = CurrentCalibration {
            actual_ma: 1000,
            measured_ma: 990,
            shunt_micro_ohms: 10_000,
        };
        let temperature = TemperatureCalibration {
            actual_dk: 2982,
            measured_dk: 2982,
        };
        assert_eq!(
            bms.perform_full_calibration(&voltage, &current, &temperature),
            Ok(())
        );
        assert_eq!(
            fake.written_registers(),
            vec![0x00, 0x0D, 0x0E, 0x10, 0x0F, 0x11, 0x00]
        );
        assert!(bms.is_calibrated());

        assert_eq!(bms.clear_calibration(), Ok(()));
        assert!(!bms.is_calibrated());
    }

    #[test]
    fn sleep_leaves_config_mode_first() {
        let fake = FakeGauge::new();
        let bms = gauge(&fake);

        assert_eq!(bms.enter_config_mode(), Ok(()));
        assert_eq!(bms.config_mode(), Ok(ConfigMode::Config));
        assert_eq!(bms.sleep(), Ok(()));

        assert_eq!(
            fake.writes(),
            vec![w(ENTER), w(EXIT), (0x00, vec![0x5A, 0xA5])]
        );
        assert_eq!(bms.config_mode(), Ok(ConfigMode::Normal));
    }

    #[test]
    fn shutdown_skips_config_mode_and_waits() {
        let fake = FakeGauge::new();
        let bms = timed_gauge(&fake, &[500]);

        assert_eq!(bms.set_power_mode(PowerMode::Shutdown), Ok(()));
        assert_eq!(fake.writes(), vec![(0x42, vec![0x03, 0x00])]);
        bms.release().1.done();
    }

    #[test]
    fn sleep_power_mode_is_written_in_config_mode() {
        let fake = FakeGauge::new();
        let bms = gauge(&fake);

        assert_eq!(bms.set_power_mode(PowerMode::Sleep), Ok(()));
        assert_eq!(
            fake.writes(),
            vec![w(ENTER), (0x42, vec![0x01, 0x00]), w(EXIT)]
        );
        assert_eq!(bms.get_power_mode(), Ok(PowerMode::Sleep));
    }

    #[test]
    fn factory_reset_waits_for_gauge() {
        let fake = FakeGauge::new();
        let bms = timed_gauge(&fake, &[500]);

        assert_eq!(bms.factory_reset(), Ok(()));
        assert_eq!(fake.writes(), vec![(0x00, vec![0x0F, 0x0F])]);
        bms.release().1.done();
    }

    #[test]
    fn capacity_config_round_trip() {
        let fake = FakeGauge::new();
        let bms = gauge(&fake);

        let config = CapacityConfig {
            design_capacity: 2600,
            design_energy: 9620,
            cycle_count_threshold: 2340,
            charge_termination: 95,
            reserve_capacity: 5,
        };
        assert_eq!(bms.set_capacity_config(&config), Ok(()));
        assert_eq!(bms.get_capacity_config(), Ok(config));

        let writes = fake.writes();
        assert_eq!(writes.first(), Some(&w(ENTER)));
        assert_eq!(writes[1], (0x3C, vec![0x28, 0x0A]));
        assert_eq!(writes[3], (0x3E, vec![48]));
    }

    #[test]
    fn chemistry_is_stored_and_decoded() {
        let fake = FakeGauge::new();
        // enter, chemistry settle, exit
        let bms = timed_gauge(&fake, &[100, 100, 100]);

        assert_eq!(bms.set_battery_chemistry(BatteryChemistry::LiFePo4), Ok(()));
        assert_eq!(bms.get_battery_chemistry(), Ok(BatteryChemistry::LiFePo4));

        fake.set_word(0x40, 0x0900);
        assert_eq!(bms.get_battery_chemistry(), Err(Error::InvalidParameter));
        bms.release().1.done();
    }

    #[test]
    fn low_temperature_alarm_without_register_uses_high_threshold() {
        let fake = FakeGauge::new();
        let bms = gauge(&fake);

        assert_eq!(bms.set_low_temperature_alarm(2831), Ok(()));
        assert_eq!(fake.word(0x6A), 2831);

        assert_eq!(bms.set_low_soc_alarm(101), Err(Error::InvalidParameter));
    }

    #[test]
    fn alarm_status_and_clear() {
        let fake = FakeGauge::new();
        fake.set_word(0x64, (AlarmFlags::UNDER_VOLTAGE | AlarmFlags::LOW_SOC).bits());
        let bms = gauge(&fake);

        assert!(bms.is_alarm_active(AlarmFlags::LOW_SOC));
        assert!(!bms.is_alarm_active(AlarmFlags::OVER_TEMPERATURE));

        assert_eq!(bms.clear_alarms(), Ok(()));
        assert_eq!(bms.read_alarm_status(), AlarmFlags::empty());
    }

    #[test]
    fn battery_status_rejects_missing_voltage() {
        let fake = FakeGauge::new();
        fake.set_word(0x0C, 2982);
        let bms = gauge(&fake);

        assert!(bms.get_battery_status().is_err());

        fake.set_word(0x08, 3800);
        fake.set_word(0x02, 80);
        let status = bms.get_battery_status().unwrap();
        assert_eq!(status.soc, 80);
        assert!((status.voltage - 3.8).abs() < 1e-3);
    }

    #[test]
    fn detailed_status_decodes_flags() {
        let fake = FakeGauge::new();
        fake.set_word(0x00, 0x0300);
        fake.set_word(0x0E, (GaugeFlags::CHARGING | GaugeFlags::CALIBRATED).bits());
        fake.set_word(0x02, 64);
        fake.set_word(0x0C, 2982);
        let bms = gauge(&fake);

        let status = bms.get_detailed_status().unwrap();
        assert!(status.is_charging());
        assert!(!status.is_discharging());
        assert!(status.is_calibrated());
        assert_eq!(status.error_code, 3);
        assert_eq!(status.state_of_charge, 64);
        assert_eq!(status.temperature, 2982);
    }

    #[test]
    fn lifetime_reset_starts_at_room_temperature() {
        let fake = FakeGauge::new();
        let bms = gauge(&fake);

        assert_eq!(bms.reset_lifetime_stats(), Ok(()));
        let stats = bms.get_lifetime_stats().unwrap();
        assert_eq!(stats.max_temp, 2981);
        assert_eq!(stats.min_temp, 2981);
        assert_eq!(stats.update_count, 0);
    }

    #[test]
    fn self_discharge_settings_are_range_checked() {
        let fake = FakeGauge::new();
        let bms = gauge(&fake);

        let too_fast = SelfDischargeConfig {
            rate: 0x400,
            temperature_coef: 0,
            enabled: true,
        };
        assert_eq!(
            bms.configure_self_discharge(&too_fast),
            Err(Error::InvalidParameter)
        );
        assert_eq!(fake.transactions(), 0);

        let config = SelfDischargeConfig {
            rate: 20,
            temperature_coef: 0,
            enabled: true,
        };
        assert_eq!(bms.configure_self_discharge(&config), Ok(()));
        assert_eq!(bms.get_self_discharge_config(), Ok(config));
    }
}
