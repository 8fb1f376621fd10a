//! Integration tests for configuration loading

use escpos_usb::config::Config;
use escpos_usb::printer::{PrinterId, TransferPolicy, TransferSettings};

use std::fs;
use std::time::Duration;

use tempfile::TempDir;

#[test]
fn test_empty_config_uses_defaults() {
    let config = Config::parse("").unwrap();

    assert_eq!(config, Config::default());
    assert_eq!(config.transfer.timeout_ms, 100_000);
    assert_eq!(config.transfer.chunk_size, 16384);
    assert!(!config.transfer.strict);
    assert_eq!(config.logging.level, "info");
    assert_eq!(config.printer_id(), None);
    assert_eq!(config.transfer_settings(), TransferSettings::default());
}

#[test]
fn test_full_config() {
    let config = Config::parse(
        r#"
        [transfer]
        timeout_ms = 2500
        chunk_size = 512
        strict = true

        [printer]
        vendor_id = 0x04b8
        product_id = 0x0202

        [logging]
        level = "debug"
        "#,
    )
    .unwrap();

    assert_eq!(
        config.transfer_settings(),
        TransferSettings {
            timeout: Duration::from_millis(2500),
            chunk_size: 512,
            policy: TransferPolicy::Strict,
        }
    );
    assert_eq!(config.printer_id(), Some(PrinterId::usb(0x04b8, 0x0202)));
    assert_eq!(config.logging.level, "debug");
}

#[test]
fn test_partial_section_keeps_other_defaults() {
    let config = Config::parse("[transfer]\nstrict = true\n").unwrap();

    assert_eq!(config.transfer.chunk_size, 16384);
    assert_eq!(config.transfer_settings().policy, TransferPolicy::Strict);
}

#[test]
fn test_zero_chunk_size_is_rejected() {
    let err = Config::parse("[transfer]\nchunk_size = 0\n").unwrap_err();

    assert!(err.to_string().contains("chunk_size"));
}

#[test]
fn test_zero_timeout_is_rejected() {
    assert!(Config::parse("[transfer]\ntimeout_ms = 0\n").is_err());
}

#[test]
fn test_vendor_without_product_is_rejected() {
    let err = Config::parse("[printer]\nvendor_id = 0x04b8\n").unwrap_err();

    assert!(err.to_string().contains("together"));
}

#[test]
fn test_malformed_toml_is_rejected() {
    assert!(Config::parse("[transfer\nstrict = yes").is_err());
}

#[test]
fn test_load_from_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.toml");

    fs::write(&path, "[printer]\nvendor_id = 1046\nproduct_id = 0x5011\n").unwrap();

    let config = Config::load(&path).unwrap();
    assert_eq!(config.printer_id(), Some(PrinterId::usb(0x0416, 0x5011)));

    let config = Config::load_or_default(Some(&path)).unwrap();
    assert_eq!(config.printer_id(), Some(PrinterId::usb(0x0416, 0x5011)));
}

#[test]
fn test_load_missing_file_fails() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("missing.toml");

    let err = Config::load(&path).unwrap_err();

    assert!(format!("{:#}", err).contains("missing.toml"));
}
