//! Error types of the printer driver.

use crate::printer::JobReport;

use rusb::Error as USBError;
use thiserror::Error;

/// A single bulk write did not go through completely.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Error)]
pub enum TransferFailure {
    #[error("The bulk transfer has failed: {0}")]
    Usb(USBError),

    #[error("The bulk transfer was short (expected {expected} bytes, wrote {written}).")]
    Short { expected: usize, written: usize },

    #[error("The connection has been closed.")]
    Closed,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error("The USB subsystem has not been initialized.")]
    ManagerUnavailable,

    #[error("No printer with vendor ID {vendor_id:#06x} and product ID {product_id:#06x} is attached.")]
    DeviceNotFound { vendor_id: u16, product_id: u16 },

    #[error("Failed to open the USB device: {0}")]
    OpenFailed(USBError),

    #[error("The USB interface for the printer offers no bulk output endpoint.")]
    NoSuitableEndpoint,

    #[error("Failed to claim the USB interface: {0}")]
    ClaimFailed(USBError),

    /// A job stopped early. `report` covers what happened up to the failure.
    #[error("The print job has been aborted after {} bytes: {failure}", .report.bytes_written)]
    JobAborted {
        failure: TransferFailure,
        report: JobReport,
    },

    #[error("Access to the USB device has been denied.")]
    PermissionDenied,

    #[error("The USB device has been detached.")]
    DeviceDetached,

    #[error("The selection has been replaced by a newer one.")]
    Superseded,

    #[error("No printer is connected.")]
    NotConnected,

    #[error("image not found")]
    ImageNotFound,

    #[error("The pixel data has the wrong size (expected {expected} pixels, got {actual}).")]
    WrongPixelCount { expected: usize, actual: usize },

    #[error("An USB error has occurred: {0}")]
    Usb(#[from] USBError),
}

pub type Result<T> = std::result::Result<T, Error>;
