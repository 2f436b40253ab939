//! Register addresses and command words for supported gauge revisions
//!
//! The gauge family ships in revisions that differ in command encodings and
//! in a handful of register addresses. Rather than one driver per revision,
//! the driver reads every address and command from a [`RegisterMap`] table.
//! Two tables are provided; a board with a different revision builds its own
//! from the datasheet.

/// Default 7-bit I2C address
pub const BMS_I2C_ADDRESS: u8 = 0x55;

/// Size of one data-flash block in bytes
pub const DATA_FLASH_BLOCK_SIZE: usize = 32;

/// Marker written to the calibration status register after a full calibration
pub const CALIBRATION_COMPLETE_MARKER: u16 = 0xAA55;

/// Neutral calibration gain (1.000 in the x1000 fixed-point format)
pub const UNITY_GAIN: u16 = 1000;

/// Sleep bit in the control status word
pub const CONTROL_STATUS_SLEEP: u16 = 0x0002;

/// Data-flash classes used by the driver
pub mod class {
    /// Capacity configuration (design energy, cycle threshold, ...)
    pub const CAPACITY: u8 = 48;
    /// Lifetime data (temperature / current / voltage extremes)
    pub const LIFETIME: u8 = 59;
    /// State data (last charge timestamp)
    pub const STATE: u8 = 82;
}

/// Words written to the control register
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Commands {
    pub sleep: u16,
    pub wake: u16,
    pub watchdog_reset: u16,
    pub config_enter: u16,
    pub config_exit: u16,
    pub factory_reset: u16,
}

/// Address and command table for one gauge revision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterMap {
    // Standard commands
    pub control: u8,
    pub state_of_charge: u8,
    pub max_error: u8,
    pub remaining_capacity: u8,
    pub full_charge_capacity: u8,
    pub voltage: u8,
    pub temperature: u8,
    pub flags: u8,
    pub current: u8,

    // Extended commands
    pub average_time_to_empty: u8,
    pub average_time_to_full: u8,
    pub available_energy: u8,
    pub average_power: u8,
    pub cycle_count: u8,
    pub state_of_health: u8,
    pub charge_voltage: u8,
    pub charge_current: u8,
    pub design_capacity: u8,

    /// Register holding the safety status bits
    pub safety_status: u8,

    // Data-flash access window
    pub data_flash_class: u8,
    pub data_flash_block: u8,
    pub block_data: u8,
    pub block_data_checksum: u8,
    pub block_data_control: u8,

    // Calibration
    pub voltage_calibration: u8,
    pub current_calibration: u8,
    pub temperature_calibration: u8,
    pub shunt_resistance: u8,
    pub calibration_status: u8,

    // Chemistry and power management
    pub chemistry: u8,
    pub self_discharge: u8,
    pub power_mode: u8,
    pub sleep_current: u8,
    pub shutdown_voltage: u8,
    /// Packed wake voltage / sleep delay word
    pub wake_config: u8,

    // Alarms
    pub alarm_status: u8,
    pub alarm_enable: u8,
    pub alarm_soc_low: u8,
    pub alarm_temp_high: u8,
    /// Low temperature threshold. `None` writes the high threshold register,
    /// which is what the reference firmware does.
    pub alarm_temp_low: Option<u8>,
    pub alarm_volt_low: u8,
    pub alarm_volt_high: u8,
    pub alarm_current: u8,

    /// Word the control register must read back during `init`, if any
    pub device_id: Option<u16>,

    pub commands: Commands,
}

const COMMANDS: Commands = Commands {
    sleep: 0xA55A,
    wake: 0x5AA5,
    watchdog_reset: 0xCC33,
    config_enter: 0x5555,
    config_exit: 0xAAAA,
    factory_reset: 0x0F0F,
};

impl RegisterMap {
    /// Generic BMS gauge with calibration and power registers in the
    /// 0x0D-0x11 / 0x40-0x44 ranges
    pub const BMSLIB: RegisterMap = RegisterMap {
        control: 0x00,
        state_of_charge: 0x02,
        max_error: 0x03,
        remaining_capacity: 0x04,
        full_charge_capacity: 0x06,
        voltage: 0x08,
        temperature: 0x0C,
        flags: 0x0E,
        current: 0x10,

        average_time_to_empty: 0x18,
        average_time_to_full: 0x1A,
        available_energy: 0x24,
        average_power: 0x26,
        cycle_count: 0x2C,
        state_of_health: 0x2E,
        charge_voltage: 0x30,
        charge_current: 0x32,
        design_capacity: 0x3C,

        safety_status: 0x0E,

        data_flash_class: 0x3E,
        data_flash_block: 0x3F,
        block_data: 0x40,
        block_data_checksum: 0x60,
        block_data_control: 0x61,

        voltage_calibration: 0x0D,
        current_calibration: 0x0E,
        temperature_calibration: 0x0F,
        shunt_resistance: 0x10,
        calibration_status: 0x11,

        chemistry: 0x40,
        self_discharge: 0x41,
        power_mode: 0x42,
        sleep_current: 0x43,
        shutdown_voltage: 0x44,
        // Power mode + 1, shared with sleep_current on this revision
        wake_config: 0x43,

        alarm_status: 0x64,
        alarm_enable: 0x66,
        alarm_soc_low: 0x68,
        alarm_temp_high: 0x6A,
        alarm_temp_low: None,
        alarm_volt_low: 0x6C,
        alarm_volt_high: 0x6E,
        alarm_current: 0x70,

        device_id: None,

        commands: COMMANDS,
    };

    /// BQ34Z100-style gauge: same standard and extended commands, identity
    /// check on init, calibration and power registers moved out of the
    /// block-data window
    pub const BQ34Z100: RegisterMap = RegisterMap {
        voltage_calibration: 0x72,
        current_calibration: 0x74,
        temperature_calibration: 0x76,
        shunt_resistance: 0x78,
        calibration_status: 0x7A,

        chemistry: 0x7C,
        self_discharge: 0x7E,
        power_mode: 0x80,
        sleep_current: 0x82,
        shutdown_voltage: 0x84,
        wake_config: 0x86,

        device_id: Some(0x0100),

        ..RegisterMap::BMSLIB
    };
}

impl Default for RegisterMap {
    fn default() -> Self {
        RegisterMap::BMSLIB
    }
}
