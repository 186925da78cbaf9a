//! CLI command implementations
//!
//! Every command opens its sessions through a [`Programmer`], so the same
//! code drives real hardware and the simulated target.
//!
//! [`Programmer`]: crate::programmers::Programmer

mod erase;
mod probe;
mod program;
mod read;
mod write;

pub use erase::run_erase;
pub use probe::run_probe;
pub use program::run_program;
pub use read::run_read;
pub use write::run_write;

use milflash_core::chip::Region;

/// Result type of every command
pub type CommandResult = Result<(), Box<dyn std::error::Error>>;

/// Flash array selected by `--info`
pub fn region(info: bool) -> Region {
    if info {
        Region::Info
    } else {
        Region::Main
    }
}
