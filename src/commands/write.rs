//! Write command implementation

use std::path::Path;
use std::sync::atomic::AtomicBool;

use super::CommandResult;
use crate::programmers::Programmer;
use crate::progress::BarProgress;
use milflash_core::program;
use milflash_core::Image;

/// Run the write command
pub fn run_write(
    programmer: &Programmer,
    file: &Path,
    address: Option<u32>,
    verify_only: bool,
    cancel: &AtomicBool,
) -> CommandResult {
    let image = Image::load(file, address)?;
    println!(
        "Loaded {} ({}): {} bytes at 0x{:08X}",
        file.display(),
        image.format,
        image.len(),
        image.base
    );

    let mut progress = BarProgress::new();
    let report = program::write_ram(
        &mut || programmer.connect(),
        &image,
        verify_only,
        &mut progress,
        cancel,
    )?;

    if verify_only {
        println!("Verified {} bytes", report.bytes);
    } else {
        println!(
            "Wrote {} bytes in {:.2?} ({} bytes/sec)",
            report.bytes,
            report.elapsed,
            report.rate()
        );
    }
    Ok(())
}
