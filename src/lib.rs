/// Connect to an ESC/POS receipt printer over USB and print with it.
pub mod printer;

/// Driver configuration from TOML files.
pub mod config;

/// Errors of the printer driver.
pub mod error;

/// Tracing subscriber setup for binaries.
pub mod logging;

/// An in-memory USB host for tests.
pub mod test_utils;

pub use error::{Error, Result, TransferFailure};
