//! Entry point for the `dumpe` binary.
//!
//! Reads the captured regions, dumps them into a copy of the input executable and prints the
//! paths involved. Error handling is done via `anyhow`.

use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;

use dumpe::config::{Config, RegionArg};
use dumpe::{dump_file, DumpOptions, Image, RegionKind, Snapshot};

fn read_region(snapshot: &mut Snapshot, kind: RegionKind, region: &RegionArg) -> Result<()> {
    let bytes = std::fs::read(&region.path)
        .with_context(|| format!("failed to read {} from {}", kind, region.path.display()))?;
    snapshot.set_region(kind, region.address, bytes);
    Ok(())
}

fn run(config: Config) -> Result<()> {
    let image_base = match config.image_base {
        Some(image_base) => image_base,
        None => Image::parse_file(&config.input)?.windows_header().image_base(),
    };

    let mut snapshot = Snapshot::new(image_base);
    read_region(&mut snapshot, RegionKind::Bss, &config.bss)?;
    if let Some(region) = &config.data {
        read_region(&mut snapshot, RegionKind::Data, region)?;
    }
    if let Some(region) = &config.static_bss {
        read_region(&mut snapshot, RegionKind::StaticBss, region)?;
    }

    let options = DumpOptions {
        data_section_name: Some(config.data_section).filter(|name| !name.is_empty()),
        checksum:          !config.no_checksum,
    };

    println!("Dumping from {}", config.input.display());
    let output = dump_file(&config.input, &config.output, &snapshot, &options)
        .with_context(|| format!("failed to dump {}", config.input.display()))?;
    println!("          to {}", output.display());
    Ok(())
}

fn main() -> ExitCode {
    let config = Config::parse();

    env_logger::builder()
        .parse_filters(&config.log_level)
        .format_timestamp(None)
        .format_target(false)
        .init();

    match run(config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("error: {:#}", error);
            ExitCode::FAILURE
        }
    }
}
