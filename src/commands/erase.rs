//! Erase command implementation

use super::CommandResult;
use crate::programmers::Programmer;
use milflash_core::chip::Region;
use milflash_core::program;

/// Run the erase command
pub fn run_erase(programmer: &Programmer, region: Region) -> CommandResult {
    program::erase_all(&mut || programmer.connect(), region)?;
    println!("Erased {}", region);
    Ok(())
}
