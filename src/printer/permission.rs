use super::{
    host::{EventSender, UsbHost},
    DeviceIdentity,
};

use tracing::debug;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PermissionState {
    Unrequested,
    Requested,
    Granted,
    Denied,
}

/// Tracks the access request for the single currently selected device.
#[derive(Default)]
pub(super) struct PermissionBroker {
    current: Option<(DeviceIdentity, PermissionState)>,
}

impl PermissionBroker {
    pub(super) fn state_of(&self, device: &DeviceIdentity) -> PermissionState {
        match &self.current {
            Some((current, state)) if current == device => *state,
            _ => PermissionState::Unrequested,
        }
    }

    /// Ask the host for access to `device`, replacing any earlier request.
    /// Access that is already held is reported as granted without prompting again.
    /// Otherwise the answer arrives later as an event.
    pub(super) fn request_access(
        &mut self,
        host: &dyn UsbHost,
        events: &EventSender,
        device: &DeviceIdentity,
    ) -> PermissionState {
        if host.has_permission(device) {
            debug!("Permission for {} is already held", device);
            self.current = Some((device.clone(), PermissionState::Granted));
            return PermissionState::Granted;
        }

        // Record the request before issuing it, so a fast answer finds it.
        self.current = Some((device.clone(), PermissionState::Requested));

        debug!("Requesting permission for {}", device);
        host.request_permission(device, events);

        PermissionState::Requested
    }

    /// Record the answer to an outstanding request.
    /// Answers for other devices or without a pending request yield `None`.
    pub(super) fn on_result(
        &mut self,
        device: &DeviceIdentity,
        granted: bool,
    ) -> Option<PermissionState> {
        match &mut self.current {
            Some((current, state))
                if (current == device) && (*state == PermissionState::Requested) =>
            {
                *state = if granted {
                    PermissionState::Granted
                } else {
                    PermissionState::Denied
                };

                Some(*state)
            }

            _ => None,
        }
    }

    pub(super) fn forget(&mut self) {
        self.current = None;
    }
}
