use super::DeviceIdentity;

use std::sync::mpsc::Sender;
use std::time::Duration;

use rusb::{Direction, Error as USBError, TransferType};

/// An endpoint of a USB interface.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct EndpointInfo {
    pub address: u8,
    pub direction: Direction,
    pub transfer_type: TransferType,
    pub max_packet_size: u16,
}

impl EndpointInfo {
    pub fn is_bulk_out(&self) -> bool {
        (self.transfer_type == TransferType::Bulk) && (self.direction == Direction::Out)
    }
}

/// A USB interface together with the endpoints of its first alternate setting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceInfo {
    pub number: u8,
    pub endpoints: Vec<EndpointInfo>,
}

/// Out-of-band notifications from the host.
/// They may arrive on any thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UsbEvent {
    Permission {
        device: DeviceIdentity,
        granted: bool,
    },
    Attached(DeviceIdentity),
    Detached(DeviceIdentity),
}

pub type EventSender = Sender<UsbEvent>;

/// The OS-level USB subsystem.
pub trait UsbHost: Send + Sync {
    /// Enumerate the attached devices.
    fn devices(&self) -> Result<Vec<DeviceIdentity>, USBError>;

    /// Check whether we may currently open the device.
    fn has_permission(&self, device: &DeviceIdentity) -> bool;

    /// Ask for access to the device.
    /// The answer must be delivered as `UsbEvent::Permission` through `events`, never returned.
    fn request_permission(&self, device: &DeviceIdentity, events: &EventSender);

    /// Open a handle to the device.
    fn open(&self, device: &DeviceIdentity) -> Result<Box<dyn UsbHandle>, USBError>;

    /// Start reporting attach and detach events through `events`.
    fn watch(&self, events: EventSender) -> Result<(), USBError> {
        let _ = events;
        Ok(())
    }
}

/// An open device. Dropping it closes the handle.
pub trait UsbHandle: Send + Sync {
    /// The first interface of the active configuration.
    fn first_interface(&self) -> Option<InterfaceInfo>;

    /// Claim the interface. With `force`, kernel drivers are detached first.
    fn claim_interface(&mut self, number: u8, force: bool) -> Result<(), USBError>;

    fn release_interface(&mut self, number: u8) -> Result<(), USBError>;

    /// Perform one blocking bulk write and return the number of bytes written.
    fn write_bulk(&self, endpoint: u8, data: &[u8], timeout: Duration)
        -> Result<usize, USBError>;
}
