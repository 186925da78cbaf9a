//! Program command implementation

use std::path::Path;
use std::sync::atomic::AtomicBool;

use super::CommandResult;
use crate::programmers::Programmer;
use crate::progress::BarProgress;
use milflash_core::program::{self, Policy, ProgramOptions};
use milflash_core::Image;

/// Run the program command
pub fn run_program(
    programmer: &Programmer,
    file: &Path,
    address: Option<u32>,
    opts: ProgramOptions,
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
    let report = program::program(
        &mut || programmer.connect(),
        &image,
        &opts,
        &mut progress,
        cancel,
    )?;

    if opts.verify_only {
        println!("Verified {} bytes of {}", report.bytes, opts.region);
        return Ok(());
    }

    println!(
        "Programmed {} bytes of {} in {:.2?} ({} bytes/sec)",
        report.bytes,
        opts.region,
        report.elapsed,
        report.rate()
    );
    if opts.policy == Policy::Interleaved {
        println!("Retries: {}", report.retries);
    }
    Ok(())
}
