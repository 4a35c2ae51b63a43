//! Command-line configuration of the `dumpe` binary.

use std::path::PathBuf;

use clap::Parser;

/// Dump captured data and bss contents into a copy of a portable executable.
///
/// Region contents are read from files holding the raw bytes captured at the given address.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// Source executable
    pub input: PathBuf,

    /// Output executable, `.exe` is appended if missing
    #[arg(short, long)]
    pub output: PathBuf,

    /// Uninitialized data as ADDRESS:FILE
    #[arg(long, value_parser = parse_region_arg)]
    pub bss: RegionArg,

    /// Initialized data as ADDRESS:FILE
    #[arg(long, value_parser = parse_region_arg)]
    pub data: Option<RegionArg>,

    /// Uninitialized static data as ADDRESS:FILE
    #[arg(long, value_parser = parse_region_arg)]
    pub static_bss: Option<RegionArg>,

    /// Load address of the captured image, defaults to the preferred image base
    #[arg(long, value_parser = parse_address)]
    pub image_base: Option<u64>,

    /// Section holding the initialized data
    #[arg(long, default_value = crate::constants::DEFAULT_DATA_SECTION_NAME)]
    pub data_section: String,

    /// Leave the image checksum zero
    #[arg(long)]
    pub no_checksum: bool,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info", help = "Set the logging level")]
    pub log_level: String,
}

/// A captured memory region given on the command line.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct RegionArg {
    pub address: u64,
    pub path:    PathBuf,
}

/// Parse an address as `0x`-prefixed hexadecimal or decimal.
pub fn parse_address(value: &str) -> Result<u64, String> {
    let parsed = match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => value.parse::<u64>(),
    };
    parsed.map_err(|error| format!("invalid address {}: {}", value, error))
}

/// Parse a region as `ADDRESS:FILE`.
pub fn parse_region_arg(value: &str) -> Result<RegionArg, String> {
    let (address, path) =
        value.split_once(':').ok_or_else(|| format!("expected ADDRESS:FILE, got {}", value))?;
    if path.is_empty() {
        return Err(format!("missing file in {}", value));
    }
    Ok(RegionArg {
        address: parse_address(address)?,
        path:    PathBuf::from(path),
    })
}
