//! Error types for fuel gauge operations
//!
//! This module defines the error types that can occur when using the driver,
//! plus the payload-free [`ErrorKind`] the driver records as its last error.

use core::fmt;

/// Error types for fuel gauge operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error<E> {
    /// Bus transaction failed on every retry attempt
    Communication(E),
    /// Exclusive bus access was not granted within the configured timeout
    Timeout,
    /// A read or write value is outside its physical range
    InvalidParameter,
    /// Entering or leaving config mode failed, or config mode was required
    Configuration,
    /// The device did not answer or did not identify as expected
    Initialization,
}

impl<E> Error<E> {
    /// Kind of this error without the bus payload
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Communication(_) => ErrorKind::Communication,
            Error::Timeout => ErrorKind::Timeout,
            Error::InvalidParameter => ErrorKind::InvalidParameter,
            Error::Configuration => ErrorKind::Configuration,
            Error::Initialization => ErrorKind::Initialization,
        }
    }
}

impl<E> From<E> for Error<E> {
    fn from(error: E) -> Self {
        Error::Communication(error)
    }
}

impl<E: fmt::Debug> fmt::Display for Error<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Communication(e) => write!(f, "bus communication failed: {:?}", e),
            Error::Timeout => f.write_str("timed out waiting for bus access"),
            Error::InvalidParameter => f.write_str("value out of range"),
            Error::Configuration => f.write_str("config mode transition failed"),
            Error::Initialization => f.write_str("device initialization failed"),
        }
    }
}

/// Error kind recorded by the driver for later inspection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ErrorKind {
    Communication = 1,
    Timeout = 2,
    InvalidParameter = 3,
    Configuration = 4,
    Initialization = 5,
}

impl ErrorKind {
    pub(crate) fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            1 => Some(ErrorKind::Communication),
            2 => Some(ErrorKind::Timeout),
            3 => Some(ErrorKind::InvalidParameter),
            4 => Some(ErrorKind::Configuration),
            5 => Some(ErrorKind::Initialization),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_survives_raw_round_trip() {
        for kind in [
            ErrorKind::Communication,
            ErrorKind::Timeout,
            ErrorKind::InvalidParameter,
            ErrorKind::Configuration,
            ErrorKind::Initialization,
        ] {
            assert_eq!(ErrorKind::from_raw(kind as u8), Some(kind));
        }
        assert_eq!(ErrorKind::from_raw(0), None);
    }

    #[test]
    fn bus_errors_convert_to_communication() {
        let err: Error<u8> = 7u8.into();
        assert_eq!(err, Error::Communication(7));
        assert_eq!(err.kind(), ErrorKind::Communication);
    }
}
