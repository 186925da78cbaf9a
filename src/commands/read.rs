//! Read command implementation

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use std::sync::atomic::AtomicBool;

use super::CommandResult;
use crate::programmers::Programmer;
use crate::progress::BarProgress;
use milflash_core::chip::Region;
use milflash_core::program;

/// Run the read command
pub fn run_read(
    programmer: &Programmer,
    output: &Path,
    address: u32,
    length: u32,
    region: Region,
    cancel: &AtomicBool,
) -> CommandResult {
    let mut file = BufWriter::new(File::create(output)?);
    let mut progress = BarProgress::new();
    let report = program::read_memory(
        &mut || programmer.connect(),
        address,
        length as usize,
        region,
        &mut file,
        &mut progress,
        cancel,
    )?;

    println!(
        "Wrote {} bytes to {:?} in {:.2?} ({} bytes/sec)",
        report.bytes,
        output,
        report.elapsed,
        report.rate()
    );
    Ok(())
}
