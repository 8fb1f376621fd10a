//! Driver configuration, read from a TOML file.
//!
//! ```toml
//! [transfer]
//! timeout_ms = 100000
//! chunk_size = 16384
//! strict = false
//!
//! [printer]
//! vendor_id = 0x04b8
//! product_id = 0x0202
//!
//! [logging]
//! level = "info"
//! ```

use crate::printer::{PrinterId, TransferPolicy, TransferSettings};

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub transfer: TransferConfig,
    pub printer: PrinterConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Timeout of a single bulk write in milliseconds
    pub timeout_ms: u64,

    /// Maximum number of bytes per bulk write
    pub chunk_size: usize,

    /// Abort a job on the first failed write instead of logging and continuing
    pub strict: bool,
}

impl Default for TransferConfig {
    fn default() -> Self {
        let settings = TransferSettings::default();

        Self {
            timeout_ms: settings.timeout.as_millis() as u64,
            chunk_size: settings.chunk_size,
            strict: false,
        }
    }
}

/// The printer to select when none is given on the command line.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrinterConfig {
    pub vendor_id: Option<u16>,
    pub product_id: Option<u16>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: String::from("info"),
        }
    }
}

impl Config {
    /// `<config dir>/escpos-usb/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("escpos-usb").join("config.toml"))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
            .with_context(|| format!("Invalid config file: {}", path.display()))
    }

    /// Load the given file, or the default file if it exists, or fall back to defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),

            None => match Self::default_path().filter(|path| path.exists()) {
                Some(path) => Self::load(&path),
                None => Ok(Self::default()),
            },
        }
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).context("Failed to parse config")?;
        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.transfer.timeout_ms == 0 {
            bail!("transfer.timeout_ms must be greater than 0");
        }

        if self.transfer.chunk_size == 0 {
            bail!("transfer.chunk_size must be greater than 0");
        }

        if self.printer.vendor_id.is_some() != self.printer.product_id.is_some() {
            bail!("printer.vendor_id and printer.product_id must be given together");
        }

        Ok(())
    }

    pub fn transfer_settings(&self) -> TransferSettings {
        TransferSettings {
            timeout: Duration::from_millis(self.transfer.timeout_ms),
            chunk_size: self.transfer.chunk_size,
            policy: if self.transfer.strict {
                TransferPolicy::Strict
            } else {
                TransferPolicy::Lenient
            },
        }
    }

    pub fn printer_id(&self) -> Option<PrinterId> {
        Some(PrinterId::usb(
            self.printer.vendor_id?,
            self.printer.product_id?,
        ))
    }
}
