use super::{connection::ClaimedHandle, host::EndpointInfo};
use crate::error::TransferFailure;

use std::sync::Arc;
use std::time::Duration;

/// The per-transfer timeout used unless configured otherwise.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(100_000);

/// The maximum number of bytes per bulk write unless configured otherwise.
pub const DEFAULT_CHUNK_SIZE: usize = 16384;

/// What a job does when a write fails.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub enum TransferPolicy {
    /// Log the failure and carry on with the rest of the job.
    #[default]
    Lenient,

    /// Abort the job on the first failure.
    Strict,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct TransferSettings {
    pub timeout: Duration,
    pub chunk_size: usize,
    pub policy: TransferPolicy,
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            chunk_size: DEFAULT_CHUNK_SIZE,
            policy: TransferPolicy::Lenient,
        }
    }
}

/// Blocking writes to the bulk OUT endpoint of a connection, on behalf of one job.
/// Its ticket is drawn on creation, so jobs write in the order they were submitted.
pub(super) struct Transport {
    handle: Arc<ClaimedHandle>,
    endpoint: EndpointInfo,
    settings: TransferSettings,
    ticket: u64,
}

impl Transport {
    pub(super) fn new(
        handle: Arc<ClaimedHandle>,
        endpoint: EndpointInfo,
        settings: TransferSettings,
    ) -> Self {
        let ticket = handle.draw_ticket();

        Self {
            handle,
            endpoint,
            settings,
            ticket,
        }
    }

    pub(super) fn settings(&self) -> TransferSettings {
        self.settings
    }

    /// Block until all earlier jobs on this connection are done.
    pub(super) fn wait_turn(&self) {
        self.handle.wait_turn(self.ticket);
    }

    /// Perform a single bulk write. Anything short of the full slice is a failure.
    pub(super) fn write(&self, data: &[u8]) -> Result<usize, TransferFailure> {
        let written_bytes =
            self.handle
                .write_bulk(self.endpoint.address, data, self.settings.timeout)?;

        if written_bytes != data.len() {
            return Err(TransferFailure::Short {
                expected: data.len(),
                written: written_bytes,
            });
        }

        Ok(written_bytes)
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.handle.finish_turn(self.ticket);
    }
}
