//! Test utilities
//!
//! Provides a scriptable in-memory USB host that records what the driver does to it.
//!
//! # Example
//!
//! ```
//! use escpos_usb::printer::{PrinterId, TransferSettings, UsbPrinter};
//! use escpos_usb::test_utils::{printer_device, MockHost};
//! use std::sync::Arc;
//!
//! let host = Arc::new(MockHost::new());
//! let device = host.add_device(printer_device(0x04b8, 0x0202, 2));
//! host.permit(&device);
//!
//! let printer = UsbPrinter::init(TransferSettings::default(), host.clone()).unwrap();
//! let selection = printer.select_device(PrinterId::usb(0x04b8, 0x0202)).unwrap();
//!
//! assert_eq!(selection.wait(), Ok(device));
//! assert_eq!(host.counts().opens, 1);
//! ```

use crate::printer::{
    host::{EndpointInfo, EventSender, InterfaceInfo, UsbEvent, UsbHandle, UsbHost},
    DeviceIdentity,
};

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use rusb::{Direction, Error as USBError, TransferType};

/// Default test timeout (5 seconds)
pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// A device known to the mock host.
#[derive(Debug, Clone)]
pub struct MockDevice {
    pub identity: DeviceIdentity,
    pub interface: Option<InterfaceInfo>,
    pub open_error: Option<USBError>,
    pub claim_error: Option<USBError>,
}

/// A typical receipt printer: one interface with bulk IN 0x81 and bulk OUT 0x02.
pub fn printer_device(vendor_id: u16, product_id: u16, address: u8) -> MockDevice {
    MockDevice {
        identity: DeviceIdentity::new(
            vendor_id,
            product_id,
            DeviceIdentity::system_name_for(1, address),
        ),
        interface: Some(InterfaceInfo {
            number: 0,
            endpoints: vec![
                EndpointInfo {
                    address: 0x81,
                    direction: Direction::In,
                    transfer_type: TransferType::Bulk,
                    max_packet_size: 64,
                },
                EndpointInfo {
                    address: 0x02,
                    direction: Direction::Out,
                    transfer_type: TransferType::Bulk,
                    max_packet_size: 64,
                },
            ],
        }),
        open_error: None,
        claim_error: None,
    }
}

/// How often each host operation was invoked.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct CallCounts {
    pub permission_requests: usize,
    pub opens: usize,
    pub claims: usize,
    pub releases: usize,
    pub closes: usize,
    pub writes: usize,
}

#[derive(Default)]
struct MockState {
    devices: Vec<MockDevice>,
    permitted: HashSet<String>,
    auto_answer: Option<bool>,
    events: Option<EventSender>,
    counts: CallCounts,
    written: Vec<u8>,
    failing_writes: HashSet<usize>,
    write_delay: Duration,
}

pub struct MockHost {
    state: Arc<Mutex<MockState>>,
}

impl Default for MockHost {
    fn default() -> Self {
        Self::new()
    }
}

impl MockHost {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState::default())),
        }
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        lock(&self.state)
    }

    fn send(&self, event: UsbEvent) {
        if let Some(events) = &self.state().events {
            let _ = events.send(event);
        }
    }

    /// Add a device without announcing it.
    pub fn add_device(&self, device: MockDevice) -> DeviceIdentity {
        let identity = device.identity.clone();
        self.state().devices.push(device);
        identity
    }

    /// Add a device and fire an attach event.
    pub fn attach(&self, device: MockDevice) -> DeviceIdentity {
        let identity = self.add_device(device);
        self.send(UsbEvent::Attached(identity.clone()));
        identity
    }

    /// Remove a device and fire a detach event.
    pub fn detach(&self, identity: &DeviceIdentity) {
        self.state()
            .devices
            .retain(|device| device.identity != *identity);
        self.send(UsbEvent::Detached(identity.clone()));
    }

    /// Silently allow access to the device, as if granted earlier.
    pub fn permit(&self, identity: &DeviceIdentity) {
        self.state().permitted.insert(identity.system_name.clone());
    }

    /// Take away a previously held permission without any event.
    pub fn revoke(&self, identity: &DeviceIdentity) {
        self.state().permitted.remove(&identity.system_name);
    }

    /// Answer future permission requests immediately (`Some`) or leave them pending (`None`).
    pub fn set_auto_answer(&self, answer: Option<bool>) {
        self.state().auto_answer = answer;
    }

    /// Answer a pending permission request with a grant.
    pub fn grant(&self, identity: &DeviceIdentity) {
        self.permit(identity);
        self.send(UsbEvent::Permission {
            device: identity.clone(),
            granted: true,
        });
    }

    /// Answer a pending permission request with a denial.
    pub fn deny(&self, identity: &DeviceIdentity) {
        self.send(UsbEvent::Permission {
            device: identity.clone(),
            granted: false,
        });
    }

    /// Let the bulk writes with these (zero-based) indices fail with a timeout.
    pub fn fail_writes(&self, indices: impl IntoIterator<Item = usize>) {
        self.state().failing_writes.extend(indices);
    }

    /// Make every bulk write take at least this long.
    pub fn set_write_delay(&self, delay: Duration) {
        self.state().write_delay = delay;
    }

    pub fn counts(&self) -> CallCounts {
        self.state().counts
    }

    /// All bytes accepted by successful writes, in order.
    pub fn written(&self) -> Vec<u8> {
        self.state().written.clone()
    }
}

impl UsbHost for MockHost {
    fn devices(&self) -> Result<Vec<DeviceIdentity>, USBError> {
        Ok(self
            .state()
            .devices
            .iter()
            .map(|device| device.identity.clone())
            .collect())
    }

    fn has_permission(&self, device: &DeviceIdentity) -> bool {
        self.state().permitted.contains(&device.system_name)
    }

    fn request_permission(&self, device: &DeviceIdentity, events: &EventSender) {
        let mut state = self.state();
        state.counts.permission_requests += 1;
        state.events = Some(events.clone());

        if let Some(granted) = state.auto_answer {
            if granted {
                state.permitted.insert(device.system_name.clone());
            }

            let _ = events.send(UsbEvent::Permission {
                device: device.clone(),
                granted,
            });
        }
    }

    fn open(&self, identity: &DeviceIdentity) -> Result<Box<dyn UsbHandle>, USBError> {
        let mut state = self.state();
        state.counts.opens += 1;

        let device = state
            .devices
            .iter()
            .find(|device| device.identity == *identity)
            .cloned()
            .ok_or(USBError::NoDevice)?;

        if let Some(err) = device.open_error {
            return Err(err);
        }

        Ok(Box::new(MockHandle {
            device,
            state: Arc::clone(&self.state),
        }))
    }

    fn watch(&self, events: EventSender) -> Result<(), USBError> {
        self.state().events = Some(events);
        Ok(())
    }
}

struct MockHandle {
    device: MockDevice,
    state: Arc<Mutex<MockState>>,
}

impl UsbHandle for MockHandle {
    fn first_interface(&self) -> Option<InterfaceInfo> {
        self.device.interface.clone()
    }

    fn claim_interface(&mut self, _number: u8, _force: bool) -> Result<(), USBError> {
        lock(&self.state).counts.claims += 1;
        self.device.claim_error.map_or(Ok(()), Err)
    }

    fn release_interface(&mut self, _number: u8) -> Result<(), USBError> {
        lock(&self.state).counts.releases += 1;
        Ok(())
    }

    fn write_bulk(
        &self,
        _endpoint: u8,
        data: &[u8],
        _timeout: Duration,
    ) -> Result<usize, USBError> {
        let delay = lock(&self.state).write_delay;

        if !delay.is_zero() {
            thread::sleep(delay);
        }

        let mut state = lock(&self.state);
        let index = state.counts.writes;
        state.counts.writes += 1;

        if state.failing_writes.contains(&index) {
            return Err(USBError::Timeout);
        }

        state.written.extend_from_slice(data);
        Ok(data.len())
    }
}

impl Drop for MockHandle {
    fn drop(&mut self) {
        lock(&self.state).counts.closes += 1;
    }
}

fn lock(state: &Mutex<MockState>) -> MutexGuard<'_, MockState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Poll `condition` until it holds or `timeout` has passed.
pub fn wait_until<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = Instant::now() + timeout;

    while Instant::now() < deadline {
        if condition() {
            return true;
        }

        thread::sleep(Duration::from_millis(5));
    }

    condition()
}
