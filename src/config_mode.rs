//! Config-mode state machine
//!
//! Non-volatile fields may only be written while the gauge is in config
//! mode. Entering and leaving are idempotent: a request for the state the
//! session is already in succeeds without touching the bus.

use embedded_hal::{delay::DelayNs, i2c::I2c};
use log::{debug, warn};

use crate::{error::Error, session::Session};

/// Device mode as driven by the session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConfigMode {
    #[default]
    Normal,
    Config,
}

impl<I, D> Session<I, D>
where
    I: I2c,
    D: DelayNs,
{
    /// Switch the device into config mode.
    ///
    /// On a failed command write the state stays [`ConfigMode::Normal`].
    pub fn enter_config(&mut self) -> Result<(), Error<I::Error>> {
        if self.mode == ConfigMode::Config {
            return Ok(());
        }
        let command = self.map.commands.config_enter;
        if let Err(e) = self.control(command) {
            warn!("entering config mode failed: {:?}", e.kind());
            return Err(Error::Configuration);
        }
        self.settle();
        self.mode = ConfigMode::Config;
        debug!("config mode entered");
        Ok(())
    }

    /// Return the device to normal mode
    pub fn exit_config(&mut self) -> Result<(), Error<I::Error>> {
        if self.mode == ConfigMode::Normal {
            return Ok(());
        }
        let command = self.map.commands.config_exit;
        if let Err(e) = self.control(command) {
            warn!("leaving config mode failed: {:?}", e.kind());
            return Err(Error::Configuration);
        }
        self.settle();
        self.mode = ConfigMode::Normal;
        debug!("config mode left");
        Ok(())
    }

    /// Run `f` between `enter_config` and `exit_config`.
    ///
    /// The exit is attempted even when `f` fails; the error of `f` takes
    /// precedence over an exit failure.
    pub fn in_config_mode<T, F>(&mut self, f: F) -> Result<T, Error<I::Error>>
    where
        F: FnOnce(&mut Self) -> Result<T, Error<I::Error>>,
    {
        self.enter_config()?;
        let result = f(self);
        let exit = self.exit_config();
        let value = result?;
        exit?;
        Ok(value)
    }

    /// Commands that are only valid in normal mode call this first
    pub(crate) fn force_normal(&mut self) -> Result<(), Error<I::Error>> {
        if self.mode == ConfigMode::Config {
            debug!("leaving config mode before power command");
        }
        self.exit_config()
    }
}
