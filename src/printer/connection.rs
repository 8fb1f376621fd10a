use super::{
    host::{EndpointInfo, InterfaceInfo, UsbHandle, UsbHost},
    DeviceIdentity,
};
use crate::error::{Error, Result, TransferFailure};

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::{debug, info, warn};

/// Job turns on the endpoint: `next` is handed out, `serving` may write.
#[derive(Default)]
struct Turns {
    next: u64,
    serving: u64,
}

/// An open device handle together with its claimed interface.
/// Closing it releases the interface and closes the handle right away; writes after that fail.
/// Jobs take turns on it in the order their tickets were drawn.
pub(super) struct ClaimedHandle {
    handle: Mutex<Option<Box<dyn UsbHandle>>>,
    interface_number: u8,
    turns: Mutex<Turns>,
    turn_done: Condvar,
}

impl ClaimedHandle {
    fn new(handle: Box<dyn UsbHandle>, interface_number: u8) -> Self {
        Self {
            handle: Mutex::new(Some(handle)),
            interface_number,
            turns: Mutex::new(Turns::default()),
            turn_done: Condvar::new(),
        }
    }

    /// Perform one bulk write. Blocks a concurrent `close()` until it returns.
    pub(super) fn write_bulk(
        &self,
        endpoint: u8,
        data: &[u8],
        timeout: Duration,
    ) -> std::result::Result<usize, TransferFailure> {
        let handle = lock(&self.handle);
        let handle = handle.as_ref().ok_or(TransferFailure::Closed)?;

        handle
            .write_bulk(endpoint, data, timeout)
            .map_err(TransferFailure::Usb)
    }

    /// Release the interface and close the handle.
    /// A write in progress is waited for; it cannot be interrupted.
    pub(super) fn close(&self) {
        let Some(mut handle) = lock(&self.handle).take() else {
            return;
        };

        if let Err(err) = handle.release_interface(self.interface_number) {
            warn!(
                "Failed to release interface {}: {}",
                self.interface_number, err
            );
        }

        drop(handle);
        debug!("Closed USB handle (interface {})", self.interface_number);
    }

    /// Draw the ticket for the next job.
    pub(super) fn draw_ticket(&self) -> u64 {
        let mut turns = lock(&self.turns);
        let ticket = turns.next;
        turns.next += 1;
        ticket
    }

    /// Block until every job with an earlier ticket is done.
    pub(super) fn wait_turn(&self, ticket: u64) {
        let turns = lock(&self.turns);

        let _turns = self
            .turn_done
            .wait_while(turns, |turns| turns.serving != ticket)
            .unwrap_or_else(PoisonError::into_inner);
    }

    /// Hand the endpoint to the next ticket. Waits for this ticket's turn first.
    pub(super) fn finish_turn(&self, ticket: u64) {
        let turns = lock(&self.turns);

        let mut turns = self
            .turn_done
            .wait_while(turns, |turns| turns.serving != ticket)
            .unwrap_or_else(PoisonError::into_inner);

        turns.serving += 1;
        drop(turns);

        self.turn_done.notify_all();
    }
}

impl Drop for ClaimedHandle {
    fn drop(&mut self) {
        self.close();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The connection triplet: handle, claimed interface and bulk OUT endpoint.
/// They only ever exist together.
pub(super) struct Connection {
    device: DeviceIdentity,
    handle: Arc<ClaimedHandle>,
    endpoint: EndpointInfo,
}

/// A read-only view of an established connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub device: DeviceIdentity,
    pub interface_number: u8,
    pub endpoint: EndpointInfo,
}

impl Connection {
    pub(super) fn device(&self) -> &DeviceIdentity {
        &self.device
    }

    pub(super) fn endpoint(&self) -> EndpointInfo {
        self.endpoint
    }

    pub(super) fn handle(&self) -> Arc<ClaimedHandle> {
        Arc::clone(&self.handle)
    }

    /// Release the interface and close the handle, even if a job still holds it.
    pub(super) fn close(&self) {
        self.handle.close();
    }

    pub(super) fn info(&self) -> ConnectionInfo {
        ConnectionInfo {
            device: self.device.clone(),
            interface_number: self.handle.interface_number,
            endpoint: self.endpoint,
        }
    }
}

/// Pick the first bulk OUT endpoint of the interface.
fn select_endpoint(interface: &InterfaceInfo) -> Option<EndpointInfo> {
    interface
        .endpoints
        .iter()
        .copied()
        .find(EndpointInfo::is_bulk_out)
}

/// Open the device, find its output endpoint and claim the interface.
/// On failure, everything acquired so far is closed again.
pub(super) fn open_connection(host: &dyn UsbHost, device: &DeviceIdentity) -> Result<Connection> {
    // Try to open the USB device, giving us a handle.
    let mut handle = host.open(device).map_err(Error::OpenFailed)?;

    // Walk the endpoints of the first interface.
    // Returning early drops (and thereby closes) the handle.
    let interface = handle.first_interface().ok_or(Error::NoSuitableEndpoint)?;
    let endpoint = select_endpoint(&interface).ok_or(Error::NoSuitableEndpoint)?;

    // Claim the interface, detaching any kernel driver.
    handle
        .claim_interface(interface.number, true)
        .map_err(Error::ClaimFailed)?;

    info!(
        "Connected to {} (interface {}, endpoint {:#04x}, max packet size {})",
        device, interface.number, endpoint.address, endpoint.max_packet_size
    );

    Ok(Connection {
        device: device.clone(),
        handle: Arc::new(ClaimedHandle::new(handle, interface.number)),
        endpoint,
    })
}
