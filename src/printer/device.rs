use super::host::UsbHost;
use crate::error::{Error, Result};

use std::fmt::Display;

use tracing::debug;

/// A USB device as seen during enumeration.
/// It stays valid as long as the device remains attached.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceIdentity {
    pub vendor_id: u16,
    pub product_id: u16,
    pub system_name: String,
}

impl DeviceIdentity {
    pub fn new(vendor_id: u16, product_id: u16, system_name: impl Into<String>) -> Self {
        Self {
            vendor_id,
            product_id,
            system_name: system_name.into(),
        }
    }

    /// Build the libusb style system name for a bus / address pair.
    pub fn system_name_for(bus: u8, address: u8) -> String {
        format!("/dev/bus/usb/{:03}/{:03}", bus, address)
    }

    pub fn matches(&self, id: &PrinterId) -> bool {
        match id {
            PrinterId::Usb {
                vendor_id,
                product_id,
            } => (self.vendor_id == *vendor_id) && (self.product_id == *product_id),
        }
    }

    pub fn printer_id(&self) -> PrinterId {
        PrinterId::Usb {
            vendor_id: self.vendor_id,
            product_id: self.product_id,
        }
    }
}

impl Display for DeviceIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:04x}:{:04x} ({})",
            self.vendor_id, self.product_id, self.system_name
        )
    }
}

/// The identifier a caller selects a printer with, tagged by transport.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum PrinterId {
    Usb { vendor_id: u16, product_id: u16 },
}

impl PrinterId {
    pub fn usb(vendor_id: u16, product_id: u16) -> Self {
        PrinterId::Usb {
            vendor_id,
            product_id,
        }
    }

    pub(super) fn not_found(&self) -> Error {
        match *self {
            PrinterId::Usb {
                vendor_id,
                product_id,
            } => Error::DeviceNotFound {
                vendor_id,
                product_id,
            },
        }
    }
}

impl Display for PrinterId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PrinterId::Usb {
                vendor_id,
                product_id,
            } => write!(f, "usb:{:04x}:{:04x}", vendor_id, product_id),
        }
    }
}

/// Read the current device table of the host.
/// Nothing is cached: every call reflects what is attached right now.
pub(super) fn list_devices(host: Option<&dyn UsbHost>) -> Result<Vec<DeviceIdentity>> {
    let host = host.ok_or(Error::ManagerUnavailable)?;
    let devices = host.devices()?;

    debug!("Enumerated {} USB devices", devices.len());

    Ok(devices)
}

/// Find the first enumerated device matching the given ID.
pub(super) fn find_device(host: &dyn UsbHost, id: &PrinterId) -> Result<DeviceIdentity> {
    list_devices(Some(host))?
        .into_iter()
        .find(|device| device.matches(id))
        .ok_or_else(|| id.not_found())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_name_is_zero_padded() {
        assert_eq!(DeviceIdentity::system_name_for(1, 7), "/dev/bus/usb/001/007");
    }

    #[test]
    fn test_matches_vendor_and_product() {
        let device = DeviceIdentity::new(0x04b8, 0x0202, "/dev/bus/usb/001/002");

        assert!(device.matches(&PrinterId::usb(0x04b8, 0x0202)));
        assert!(!device.matches(&PrinterId::usb(0x04b8, 0x0e15)));
        assert!(!device.matches(&PrinterId::usb(0x0416, 0x0202)));
    }

    #[test]
    fn test_list_without_host_is_unavailable() {
        assert_eq!(list_devices(None), Err(Error::ManagerUnavailable));
    }

    #[test]
    fn test_display() {
        let device = DeviceIdentity::new(0x04b8, 0x0202, "/dev/bus/usb/001/002");
        assert_eq!(device.to_string(), "04b8:0202 (/dev/bus/usb/001/002)");
        assert_eq!(device.printer_id().to_string(), "usb:04b8:0202");
    }
}
