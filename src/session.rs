//! Bus session owned by the access guard
//!
//! A [`Session`] bundles everything that must only be touched by one caller
//! at a time: the bus, the delay provider, the register map and the
//! config-mode state. The driver hands it out through its guard; the
//! config-mode and data-flash layers extend it in their own modules.

use embedded_hal::{delay::DelayNs, i2c::I2c};

use crate::{
    bus::Bus, config_mode::ConfigMode, error::Error, registers::RegisterMap, retry::RetryPolicy,
};

/// Exclusive bus session for one gauge
pub struct Session<I, D> {
    pub(crate) bus: Bus<I>,
    pub(crate) delay: D,
    pub(crate) map: RegisterMap,
    pub(crate) retry: RetryPolicy,
    pub(crate) mode: ConfigMode,
    pub(crate) settle_ms: u32,
}

impl<I, D> Session<I, D>
where
    I: I2c,
    D: DelayNs,
{
    pub(crate) fn new(
        bus: Bus<I>,
        delay: D,
        map: RegisterMap,
        retry: RetryPolicy,
        settle_ms: u32,
    ) -> Self {
        Self {
            bus,
            delay,
            map,
            retry,
            mode: ConfigMode::Normal,
            settle_ms,
        }
    }

    /// Register table in use
    pub fn map(&self) -> &RegisterMap {
        &self.map
    }

    /// Current config-mode state as last driven by this session
    pub fn mode(&self) -> ConfigMode {
        self.mode
    }

    /// Read a word register, retrying transient failures
    pub fn read_word(&mut self, reg: u8) -> Result<u16, Error<I::Error>> {
        let bus = &mut self.bus;
        self.retry
            .run(&mut self.delay, || bus.read_word(reg))
            .map_err(Error::Communication)
    }

    /// Write a word register, retrying transient failures
    pub fn write_word(&mut self, reg: u8, value: u16) -> Result<(), Error<I::Error>> {
        let bus = &mut self.bus;
        self.retry
            .run(&mut self.delay, || bus.write_word(reg, value))
            .map_err(Error::Communication)
    }

    /// Read a byte register, retrying transient failures
    pub fn read_byte(&mut self, reg: u8) -> Result<u8, Error<I::Error>> {
        let bus = &mut self.bus;
        self.retry
            .run(&mut self.delay, || bus.read_byte(reg))
            .map_err(Error::Communication)
    }

    /// Write a byte register, retrying transient failures
    pub fn write_byte(&mut self, reg: u8, value: u8) -> Result<(), Error<I::Error>> {
        let bus = &mut self.bus;
        self.retry
            .run(&mut self.delay, || bus.write_byte(reg, value))
            .map_err(Error::Communication)
    }

    /// Write a command word to the control register
    pub fn control(&mut self, command: u16) -> Result<(), Error<I::Error>> {
        self.write_word(self.map.control, command)
    }

    /// Block for `ms` milliseconds
    pub fn pause(&mut self, ms: u32) {
        self.delay.delay_ms(ms);
    }

    /// Wait for the device to settle after a mode or power command
    pub fn settle(&mut self) {
        self.delay.delay_ms(self.settle_ms);
    }

    pub(crate) fn release(self) -> (I, D) {
        (self.bus.release(), self.delay)
    }
}
