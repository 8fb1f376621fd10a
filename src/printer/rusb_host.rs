use super::{
    host::{EndpointInfo, EventSender, InterfaceInfo, UsbEvent, UsbHandle, UsbHost},
    DeviceIdentity,
};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use rusb::{Context, Device, Error as USBError, Hotplug, HotplugBuilder, UsbContext};
use tracing::{debug, info, warn};

/// How long a single round of libusb event handling may block.
const EVENT_TIMEOUT: Duration = Duration::from_millis(100);

/// Build the identity of a device.
/// Devices that just left may have no readable descriptor anymore; they get zero IDs.
fn identity_of<T: UsbContext>(device: &Device<T>) -> DeviceIdentity {
    let system_name = DeviceIdentity::system_name_for(device.bus_number(), device.address());

    match device.device_descriptor() {
        Ok(desc) => DeviceIdentity::new(desc.vendor_id(), desc.product_id(), system_name),
        Err(_) => DeviceIdentity::new(0, 0, system_name),
    }
}

/// The USB subsystem as provided by libusb.
pub struct RusbHost {
    context: Context,
    stop: Arc<AtomicBool>,
    watcher: Mutex<Option<thread::JoinHandle<()>>>,
}

impl RusbHost {
    pub fn new() -> Result<Self, USBError> {
        Ok(Self {
            context: Context::new()?,
            stop: Arc::new(AtomicBool::new(false)),
            watcher: Mutex::new(None),
        })
    }

    fn find(&self, identity: &DeviceIdentity) -> Result<Device<Context>, USBError> {
        self.context
            .devices()?
            .iter()
            .find(|device| {
                DeviceIdentity::system_name_for(device.bus_number(), device.address())
                    == identity.system_name
            })
            .ok_or(USBError::NoDevice)
    }

    fn runloop(
        context: Context,
        events: EventSender,
        stop: Arc<AtomicBool>,
        ready: mpsc::Sender<Result<(), USBError>>,
    ) {
        // The registration lives as long as this thread.
        let registration = HotplugBuilder::new()
            .enumerate(false)
            .register(&context, Box::new(HotplugCallback { events }));

        let _registration = match registration {
            Ok(registration) => {
                let _ = ready.send(Ok(()));
                registration
            }

            Err(err) => {
                let _ = ready.send(Err(err));
                return;
            }
        };

        while !stop.load(Ordering::Relaxed) {
            match context.handle_events(Some(EVENT_TIMEOUT)) {
                Ok(()) | Err(USBError::Interrupted) => (),

                Err(err) => {
                    warn!("Error handling USB events: {}", err);
                    thread::sleep(EVENT_TIMEOUT);
                }
            }
        }

        debug!("USB hot-plug watcher stopped");
    }
}

impl UsbHost for RusbHost {
    fn devices(&self) -> Result<Vec<DeviceIdentity>, USBError> {
        Ok(self
            .context
            .devices()?
            .iter()
            .filter(|device| device.device_descriptor().is_ok())
            .map(|device| identity_of(&device))
            .collect())
    }

    fn has_permission(&self, device: &DeviceIdentity) -> bool {
        self.find(device)
            .and_then(|device| device.open())
            .is_ok()
    }

    fn request_permission(&self, device: &DeviceIdentity, events: &EventSender) {
        // There is no prompt: access is decided by the device node permissions.
        // Probing an open answers the request right away, but still as an event.
        let granted = match self.find(device).and_then(|device| device.open()) {
            Ok(_) => true,
            Err(USBError::Access) => false,

            Err(err) => {
                warn!("Failed to probe {}: {}", device, err);
                false
            }
        };

        let _ = events.send(UsbEvent::Permission {
            device: device.clone(),
            granted,
        });
    }

    fn open(&self, device: &DeviceIdentity) -> Result<Box<dyn UsbHandle>, USBError> {
        let device = self.find(device)?;
        let handle = device.open()?;

        Ok(Box::new(RusbHandle { device, handle }))
    }

    fn watch(&self, events: EventSender) -> Result<(), USBError> {
        if !rusb::has_hotplug() {
            warn!("USB hot-plug is not supported on this platform");
            return Ok(());
        }

        let mut watcher = self.watcher.lock().unwrap_or_else(PoisonError::into_inner);

        if watcher.is_some() {
            return Ok(());
        }

        let context = self.context.clone();
        let stop = Arc::clone(&self.stop);
        let (ready_tx, ready_rx) = mpsc::channel();

        let handle = thread::spawn(move || Self::runloop(context, events, stop, ready_tx));

        // Wait for the registration to succeed or fail.
        ready_rx.recv().unwrap_or(Err(USBError::Other))?;
        *watcher = Some(handle);

        info!("Watching for USB hot-plug events");

        Ok(())
    }
}

impl Drop for RusbHost {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);

        // Wait for the watcher to come down.
        let watcher = self
            .watcher
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(watcher) = watcher {
            let _ = watcher.join();
        }
    }
}

struct HotplugCallback {
    events: EventSender,
}

impl Hotplug<Context> for HotplugCallback {
    fn device_arrived(&mut self, device: Device<Context>) {
        let identity = identity_of(&device);
        debug!("Hot-plug: {} arrived", identity);

        let _ = self.events.send(UsbEvent::Attached(identity));
    }

    fn device_left(&mut self, device: Device<Context>) {
        let identity = identity_of(&device);
        debug!("Hot-plug: {} left", identity);

        let _ = self.events.send(UsbEvent::Detached(identity));
    }
}

struct RusbHandle {
    device: Device<Context>,
    handle: rusb::DeviceHandle<Context>,
}

impl UsbHandle for RusbHandle {
    fn first_interface(&self) -> Option<InterfaceInfo> {
        // Query the interface from the device.
        let config_desc = self.device.active_config_descriptor().ok()?;
        let interface = config_desc.interfaces().next()?;

        // Only the first alternate setting is looked at.
        let interface_desc = interface.descriptors().next()?;

        let endpoints = interface_desc
            .endpoint_descriptors()
            .map(|endpoint_desc| EndpointInfo {
                address: endpoint_desc.address(),
                direction: endpoint_desc.direction(),
                transfer_type: endpoint_desc.transfer_type(),
                max_packet_size: endpoint_desc.max_packet_size(),
            })
            .collect();

        Some(InterfaceInfo {
            number: interface.number(),
            endpoints,
        })
    }

    fn claim_interface(&mut self, number: u8, force: bool) -> Result<(), USBError> {
        // Ensure that a potential kernel driver is automatically detached and later reattached.
        if force {
            match self.handle.set_auto_detach_kernel_driver(true) {
                Ok(()) | Err(USBError::NotSupported) => (),
                Err(err) => return Err(err),
            }
        }

        self.handle.claim_interface(number)
    }

    fn release_interface(&mut self, number: u8) -> Result<(), USBError> {
        self.handle.release_interface(number)
    }

    fn write_bulk(
        &self,
        endpoint: u8,
        data: &[u8],
        timeout: Duration,
    ) -> Result<usize, USBError> {
        self.handle.write_bulk(endpoint, data, timeout)
    }
}
