//! Probe command implementation

use super::CommandResult;
use crate::programmers::Programmer;
use milflash_core::program;

/// Run the probe command
pub fn run_probe(programmer: &Programmer) -> CommandResult {
    let (chip, idcode) = program::probe(&mut || programmer.connect())?;

    println!("Found: {}", chip.name);
    println!("  IDCODE:     0x{:08X}", idcode);
    println!("  CPUID:      0x{:08X}", chip.cpuid);
    println!(
        "  Main flash: {} KiB at 0x{:08X}",
        chip.main_size / 1024,
        chip.flash_base
    );
    println!("  Info flash: {} KiB", chip.info_size / 1024);

    Ok(())
}
