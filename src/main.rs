use escpos_usb::{
    config::Config,
    logging::setup_logging,
    printer::{PrinterId, RusbHost, UsbPrinter},
};

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use image::ImageReader;
use tracing::{info, warn};

/// How long to wait for access to the printer.
const SELECT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Parser)]
#[command(name = "escpos-usb", version, about = "Print to ESC/POS receipt printers over USB")]
struct Cli {
    /// Path to the config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// USB vendor ID of the printer (hex with 0x prefix or decimal)
    #[arg(long, value_parser = parse_id)]
    vendor: Option<u16>,

    /// USB product ID of the printer (hex with 0x prefix or decimal)
    #[arg(long, value_parser = parse_id)]
    product: Option<u16>,

    /// Abort a job on the first failed transfer
    #[arg(long)]
    strict: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List the attached USB devices
    List,

    /// Send a file of pre-encoded command bytes
    Raw { file: PathBuf },

    /// Print an image file
    Image {
        file: PathBuf,

        /// Width in dots
        #[arg(long)]
        width: u32,

        /// Height in dots
        #[arg(long)]
        height: u32,
    },
}

fn parse_id(value: &str) -> Result<u16, String> {
    match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => value.parse(),
    }
    .map_err(|err| format!("Invalid USB ID {}: {}", value, err))
}

fn printer_id(cli: &Cli, config: &Config) -> Result<PrinterId> {
    match (cli.vendor, cli.product) {
        (Some(vendor_id), Some(product_id)) => Ok(PrinterId::usb(vendor_id, product_id)),
        (None, None) => config
            .printer_id()
            .ok_or_else(|| anyhow!("No printer given (use --vendor and --product)")),
        _ => bail!("--vendor and --product must be given together"),
    }
}

fn connect(printer: &UsbPrinter, id: PrinterId) -> Result<()> {
    let selection = printer.select_device(id)?;

    let device = selection
        .wait_timeout(SELECT_TIMEOUT)
        .ok_or_else(|| anyhow!("Timed out waiting for access to {}", id))??;

    info!("Connected to {}", device);

    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load_or_default(cli.config.as_deref())?;

    if cli.strict {
        config.transfer.strict = true;
    }

    setup_logging(&config.logging.level)?;

    let host = RusbHost::new().context("Failed to initialize libusb")?;
    let printer = UsbPrinter::init(config.transfer_settings(), Arc::new(host))?;

    let job = match &cli.command {
        Command::List => {
            for device in printer.list_devices()? {
                println!("{}", device);
            }

            return Ok(());
        }

        Command::Raw { file } => {
            let data = fs::read(file)
                .with_context(|| format!("Failed to read {}", file.display()))?;

            connect(&printer, printer_id(&cli, &config)?)?;
            printer.print_raw(data)?
        }

        Command::Image {
            file,
            width,
            height,
        } => {
            let image = ImageReader::open(file)
                .map_err(image::ImageError::from)
                .and_then(|reader| reader.decode())
                .map_err(|err| warn!("Failed to decode {}: {}", file.display(), err))
                .ok();

            connect(&printer, printer_id(&cli, &config)?)?;
            printer.print_image(image.as_ref(), *width, *height)?
        }
    };

    let report = job.join()?;

    if report.failures > 0 {
        warn!(
            "{} of {} transfers failed",
            report.failures, report.writes
        );
    }

    printer.close_connection_if_exists();

    Ok(())
}
