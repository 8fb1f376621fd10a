use crate::error::{Error, Result};

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TryRecvError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::thread;
use std::time::Duration;

use tracing::{debug, error, info, warn};

/// Attached USB devices and the IDs to select them by.
mod device;
pub use device::{DeviceIdentity, PrinterId};

/// The seam to the OS-level USB subsystem.
pub mod host;
use host::{EventSender, UsbEvent, UsbHost};

/// The libusb-backed host.
mod rusb_host;
pub use rusb_host::RusbHost;

/// Access requests for the selected device.
mod permission;
pub use permission::PermissionState;
use permission::PermissionBroker;

/// The open handle, its claimed interface and the output endpoint.
mod connection;
pub use connection::ConnectionInfo;
use connection::{open_connection, Connection};

/// Blocking bulk writes to the output endpoint.
mod io;
pub use io::{TransferPolicy, TransferSettings};

/// Raw ESC/POS command bytes.
pub mod command;

/// Conversion of images into bit-image stripes.
pub mod raster;

/// Print jobs running on worker threads.
mod print;
pub use print::{JobReport, PrintJob};

/// Where the single device slot currently stands.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SlotState {
    Idle,
    PermissionRequested,
    Connecting,
    Connected,
}

/// The eventual outcome of `UsbPrinter::select_device()`.
pub struct Selection {
    rx: Receiver<Result<DeviceIdentity>>,
}

impl Selection {
    fn channel() -> (SyncSender<Result<DeviceIdentity>>, Self) {
        let (tx, rx) = mpsc::sync_channel(1);
        (tx, Self { rx })
    }

    /// Block until the selection is resolved.
    pub fn wait(self) -> Result<DeviceIdentity> {
        self.rx.recv().unwrap_or(Err(Error::ManagerUnavailable))
    }

    /// Block for at most `timeout`. Returns `None` if the selection is still pending.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<DeviceIdentity>> {
        match self.rx.recv_timeout(timeout) {
            Ok(result) => Some(result),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => Some(Err(Error::ManagerUnavailable)),
        }
    }

    pub fn try_result(&self) -> Option<Result<DeviceIdentity>> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(Error::ManagerUnavailable)),
        }
    }
}

type AttachListener = Arc<dyn Fn() + Send + Sync>;

/// Everything guarded by the one state lock.
struct Slot {
    state: SlotState,
    selected: Option<DeviceIdentity>,
    broker: PermissionBroker,
    connection: Option<Connection>,
    pending: Option<SyncSender<Result<DeviceIdentity>>>,
}

impl Slot {
    fn new() -> Self {
        Self {
            state: SlotState::Idle,
            selected: None,
            broker: PermissionBroker::default(),
            connection: None,
            pending: None,
        }
    }

    fn close_connection(&mut self) {
        // A running job keeps its reference, but its writes fail from now on.
        // This happens under the slot lock, so no new claim can overlap the old one.
        if let Some(connection) = self.connection.take() {
            info!("Closing the connection to {}", connection.device());
            connection.close();
        }

        if self.state == SlotState::Connected {
            self.state = SlotState::Idle;
        }
    }

    fn connect(&mut self, host: &dyn UsbHost, device: &DeviceIdentity) -> Result<()> {
        if self
            .connection
            .as_ref()
            .is_some_and(|connection| connection.device() == device)
        {
            debug!("USB connection to {} already established", device);
            return Ok(());
        }

        self.close_connection();
        self.state = SlotState::Connecting;

        match open_connection(host, device) {
            Ok(connection) => {
                self.connection = Some(connection);
                self.state = SlotState::Connected;
                Ok(())
            }

            Err(err) => {
                error!("Failed to connect to {}: {}", device, err);
                self.state = SlotState::Idle;
                Err(err)
            }
        }
    }

    /// Connect to the selected device, as long as access to it is held.
    fn open_selected(&mut self, host: &dyn UsbHost) -> Result<()> {
        let device = self.selected.clone().ok_or(Error::NotConnected)?;

        if self.connection.is_some() {
            return Ok(());
        }

        match self.broker.state_of(&device) {
            PermissionState::Granted => (),
            PermissionState::Denied => return Err(Error::PermissionDenied),
            _ if host.has_permission(&device) => (),
            _ => return Err(Error::NotConnected),
        }

        self.connect(host, &device)
    }
}

struct Inner {
    host: Option<Arc<dyn UsbHost>>,
    settings: TransferSettings,
    events: Option<EventSender>,
    slot: Mutex<Slot>,
    attach_listeners: Mutex<Vec<AttachListener>>,
}

impl Inner {
    fn slot(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn dispatch(&self, event: UsbEvent) {
        match event {
            UsbEvent::Permission { device, granted } => self.on_permission(device, granted),
            UsbEvent::Attached(device) => self.on_attached(device),
            UsbEvent::Detached(device) => self.on_detached(device),
        }
    }

    fn on_permission(&self, device: DeviceIdentity, granted: bool) {
        let Some(host) = self.host.as_deref() else {
            return;
        };

        let mut slot = self.slot();

        if slot.broker.on_result(&device, granted).is_none() {
            debug!("Ignoring a stale permission result for {}", device);
            return;
        }

        let result = if granted {
            info!(
                "Permission granted for device {}, vendor_id: {:#06x}, product_id: {:#06x}",
                device.system_name, device.vendor_id, device.product_id
            );
            slot.connect(host, &device).map(|()| device)
        } else {
            warn!("Permission for {} has been denied", device);
            slot.state = SlotState::Idle;
            Err(Error::PermissionDenied)
        };

        let pending = slot.pending.take();
        drop(slot);

        if let Some(tx) = pending {
            let _ = tx.send(result);
        }
    }

    fn on_attached(&self, device: DeviceIdentity) {
        info!("USB device {} has been attached", device);

        // Invoke the listeners without holding any lock.
        let listeners = self
            .attach_listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        for listener in listeners {
            listener();
        }
    }

    fn on_detached(&self, device: DeviceIdentity) {
        let mut slot = self.slot();

        // Detach events may lack descriptors, so only the system name is compared.
        if slot
            .selected
            .as_ref()
            .map_or(true, |selected| selected.system_name != device.system_name)
        {
            debug!("Unselected USB device {} has been detached", device);
            return;
        }

        warn!("The selected printer {} has been detached", device);

        slot.close_connection();
        slot.selected = None;
        slot.broker.forget();
        slot.state = SlotState::Idle;

        let pending = slot.pending.take();
        drop(slot);

        if let Some(tx) = pending {
            let _ = tx.send(Err(Error::DeviceDetached));
        }
    }
}

/// A USB receipt printer driver.
/// It owns the selected device and its connection; clones share the same state.
#[derive(Clone)]
pub struct UsbPrinter {
    inner: Arc<Inner>,
}

/// A reference to a driver that does not keep it alive.
#[derive(Clone)]
pub struct WeakUsbPrinter {
    inner: Weak<Inner>,
}

impl WeakUsbPrinter {
    /// Returns `None` once every `UsbPrinter` clone has been dropped.
    pub fn upgrade(&self) -> Option<UsbPrinter> {
        self.inner.upgrade().map(|inner| UsbPrinter { inner })
    }
}

impl UsbPrinter {
    /// Create a driver without a USB subsystem.
    /// Every device operation fails with `Error::ManagerUnavailable`.
    pub fn uninitialized(settings: TransferSettings) -> Self {
        Self {
            inner: Arc::new(Inner {
                host: None,
                settings,
                events: None,
                slot: Mutex::new(Slot::new()),
                attach_listeners: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Create a driver on top of the given USB subsystem.
    /// This starts the thread that handles permission and hot-plug events.
    pub fn init(settings: TransferSettings, host: Arc<dyn UsbHost>) -> Result<Self> {
        let (events, rx) = mpsc::channel();

        host.watch(events.clone())?;

        let inner = Arc::new(Inner {
            host: Some(host),
            settings,
            events: Some(events),
            slot: Mutex::new(Slot::new()),
            attach_listeners: Mutex::new(Vec::new()),
        });

        let weak = Arc::downgrade(&inner);
        thread::spawn(move || Self::dispatch_loop(weak, rx));

        info!("USB printer driver initialized");

        Ok(Self { inner })
    }

    pub fn downgrade(&self) -> WeakUsbPrinter {
        WeakUsbPrinter {
            inner: Arc::downgrade(&self.inner),
        }
    }

    fn dispatch_loop(inner: Weak<Inner>, rx: Receiver<UsbEvent>) {
        for event in rx {
            // Once the driver is gone, nobody cares about events anymore.
            let Some(inner) = inner.upgrade() else {
                break;
            };

            inner.dispatch(event);
        }

        debug!("USB event dispatcher stopped");
    }

    fn host(&self) -> Result<&dyn UsbHost> {
        self.inner.host.as_deref().ok_or(Error::ManagerUnavailable)
    }

    /// Enumerate the currently attached USB devices.
    pub fn list_devices(&self) -> Result<Vec<DeviceIdentity>> {
        device::list_devices(self.inner.host.as_deref())
    }

    /// Register a callback for newly attached devices.
    /// It carries no payload: listeners should call `list_devices()` again.
    /// The driver owns its listeners, so a listener that needs the driver must capture
    /// `downgrade()` rather than a clone; a clone keeps the driver alive forever.
    pub fn on_attached<F>(&self, listener: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner
            .attach_listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(listener));
    }

    /// Select the printer to use and request access to it.
    /// This does not wait for the answer: the returned `Selection` resolves once the
    /// device is connected or the request has failed.
    pub fn select_device(&self, id: PrinterId) -> Result<Selection> {
        let host = self.host()?;
        let events = self.events()?;
        let mut slot = self.inner.slot();

        // Re-selecting the current device does not need a new scan.
        let device = match slot.selected.clone().filter(|device| device.matches(&id)) {
            Some(device) => {
                info!("{} is already selected", device);
                device
            }

            None => {
                // Scan before tearing anything down, so a missing device changes nothing.
                let device = device::find_device(host, &id)?;

                info!(
                    "Selecting device: vendor_id: {:#06x}, product_id: {:#06x}",
                    device.vendor_id, device.product_id
                );

                // Set the device before requesting permission, so an early answer finds it.
                slot.close_connection();
                slot.selected = Some(device.clone());
                device
            }
        };

        let (tx, selection) = Selection::channel();
        let superseded = slot.pending.take();

        match slot.broker.request_access(host, events, &device) {
            PermissionState::Granted => {
                let result = slot.connect(host, &device).map(|()| device);
                let _ = tx.send(result);
            }

            _ => {
                slot.close_connection();
                slot.state = SlotState::PermissionRequested;
                slot.pending = Some(tx);
            }
        }

        drop(slot);

        if let Some(tx) = superseded {
            let _ = tx.send(Err(Error::Superseded));
        }

        Ok(selection)
    }

    fn events(&self) -> Result<&EventSender> {
        self.inner.events.as_ref().ok_or(Error::ManagerUnavailable)
    }

    /// Establish the connection to the selected device if access is held.
    pub fn open_connection(&self) -> Result<ConnectionInfo> {
        let host = self.host()?;
        let mut slot = self.inner.slot();

        slot.open_selected(host)?;

        slot.connection
            .as_ref()
            .map(Connection::info)
            .ok_or(Error::NotConnected)
    }

    /// Release the interface and close the handle, if there is a connection.
    pub fn close_connection_if_exists(&self) {
        self.inner.slot().close_connection();
    }

    pub fn connection_info(&self) -> Option<ConnectionInfo> {
        self.inner.slot().connection.as_ref().map(Connection::info)
    }

    pub fn state(&self) -> SlotState {
        self.inner.slot().state
    }

    pub fn selected_device(&self) -> Option<DeviceIdentity> {
        self.inner.slot().selected.clone()
    }

    pub fn permission_state(&self) -> PermissionState {
        let slot = self.inner.slot();

        slot.selected
            .as_ref()
            .map_or(PermissionState::Unrequested, |device| {
                slot.broker.state_of(device)
            })
    }

    /// Build a transport for a new job, connecting first if needed.
    fn transport(&self) -> Result<io::Transport> {
        let host = self.host()?;
        let mut slot = self.inner.slot();

        slot.open_selected(host)?;

        let connection = slot.connection.as_ref().ok_or(Error::NotConnected)?;

        Ok(io::Transport::new(
            connection.handle(),
            connection.endpoint(),
            self.inner.settings,
        ))
    }
}
