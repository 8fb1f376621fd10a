use super::{
    io::Transport,
    raster::{self, PixelGrid},
    TransferPolicy, UsbPrinter,
};
use crate::error::{Error, Result, TransferFailure};

use std::thread::{self, JoinHandle};

use image::DynamicImage;
use tracing::{debug, error, info, warn};

/// What happened during a job.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct JobReport {
    /// The number of bulk writes issued
    pub writes: usize,

    /// The number of bulk writes that failed or came up short
    pub failures: usize,

    /// The number of bytes the device accepted
    pub bytes_written: usize,
}

/// A job running on its own thread.
/// Dropping it detaches the thread; the job still runs to completion.
pub struct PrintJob {
    handle: JoinHandle<Result<JobReport>>,
}

impl PrintJob {
    fn spawn<F>(transport: Transport, job: F) -> Self
    where
        F: FnOnce(&mut JobWriter) -> std::result::Result<(), TransferFailure> + Send + 'static,
    {
        let handle = thread::spawn(move || {
            let mut writer = JobWriter {
                transport,
                report: JobReport::default(),
            };

            // Earlier jobs on this connection go first.
            writer.transport.wait_turn();

            if let Err(failure) = job(&mut writer) {
                return Err(Error::JobAborted {
                    failure,
                    report: writer.report,
                });
            }

            info!(
                "Print job finished: {} writes, {} failed, {} bytes",
                writer.report.writes, writer.report.failures, writer.report.bytes_written
            );

            Ok(writer.report)
        });

        Self { handle }
    }

    /// Wait for the job to finish.
    pub fn join(self) -> Result<JobReport> {
        match self.handle.join() {
            Ok(result) => result,
            Err(payload) => std::panic::resume_unwind(payload),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

struct JobWriter {
    transport: Transport,
    report: JobReport,
}

impl JobWriter {
    /// Send the data in chunks, one bulk write each, strictly in order.
    /// A closed connection ends the job under either policy.
    fn send(&mut self, data: &[u8]) -> std::result::Result<(), TransferFailure> {
        let settings = self.transport.settings();

        for chunk in data.chunks(settings.chunk_size.max(1)) {
            self.report.writes += 1;

            let failure = match self.transport.write(chunk) {
                Ok(written_bytes) => {
                    self.report.bytes_written += written_bytes;
                    continue;
                }

                Err(failure) => failure,
            };

            self.report.failures += 1;

            if let TransferFailure::Short { written, .. } = failure {
                self.report.bytes_written += written;
            }

            match (settings.policy, failure) {
                (TransferPolicy::Strict, _) | (_, TransferFailure::Closed) => {
                    error!("Aborting the print job: {}", failure);
                    return Err(failure);
                }

                (TransferPolicy::Lenient, _) => warn!("{} (continuing)", failure),
            }
        }

        Ok(())
    }
}

impl UsbPrinter {
    /// Send pre-encoded command bytes to the printer.
    /// Only connection problems are reported here; transfer failures end up in the job.
    pub fn print_raw(&self, data: impl Into<Vec<u8>>) -> Result<PrintJob> {
        let data = data.into();
        let transport = self.transport()?;

        debug!("Start to print {} bytes of raw data", data.len());

        Ok(PrintJob::spawn(transport, move |writer| writer.send(&data)))
    }

    /// Print an image scaled to `width` x `height` dots.
    pub fn print_image(
        &self,
        image: Option<&DynamicImage>,
        width: u32,
        height: u32,
    ) -> Result<PrintJob> {
        let image = image.ok_or(Error::ImageNotFound)?;
        let grid = PixelGrid::from_image(image, width, height);

        self.print_grid(grid)
    }

    /// Print an already thresholded grid.
    pub fn print_grid(&self, grid: PixelGrid) -> Result<PrintJob> {
        let transport = self.transport()?;

        debug!(
            "Start to print a {}x{} raster image",
            grid.width(),
            grid.height()
        );

        Ok(PrintJob::spawn(transport, move |writer| {
            let mut wire = Vec::new();

            for frame in raster::frames(grid) {
                wire.clear();
                frame.write_to(&mut wire);
                writer.send(&wire)?;
            }

            Ok(())
        }))
    }
}
