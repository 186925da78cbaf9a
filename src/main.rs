//! milflash - Flash programmer for Milandr Cortex-M3 microcontrollers
//!
//! Programs, verifies, reads and erases the on-chip flash of 1986BE9x
//! processors through an FTDI MPSSE JTAG adapter, and writes images to RAM.
//!
//! # Architecture
//!
//! - `milflash-core` holds the debug session, flash sequences, policies and
//!   image loaders, and talks to hardware only through its `Adapter` trait
//! - `milflash-mpsse` implements `Adapter` for Olimex ARM-USB-TINY(-H)
//! - `milflash-dummy` implements it for a simulated chip
//!
//! Each command opens its own sessions, so Ctrl-C between blocks still ends
//! with the core resumed and the adapter released.

#[cfg(not(any(feature = "mpsse", feature = "dummy")))]
compile_error!("enable at least one programmer feature: mpsse or dummy");

mod cli;
mod commands;
mod programmers;
mod progress;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::Parser;
use cli::{Cli, Commands};
use milflash_core::program::{Policy, ProgramOptions};
use programmers::Programmer;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let level = match cli.verbosity() {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let cancel = Arc::new(AtomicBool::new(false));
    let flag = cancel.clone();
    ctrlc::set_handler(move || {
        flag.store(true, Ordering::SeqCst);
    })?;

    let programmer = Programmer::from_spec(&cli.programmer)?;

    let result = match cli.command {
        Commands::Probe => commands::run_probe(&programmer),
        Commands::Program {
            file,
            address,
            verify_only,
            two_pass,
            info,
        } => {
            let opts = ProgramOptions {
                policy: if two_pass {
                    Policy::TwoPass
                } else {
                    Policy::Interleaved
                },
                region: commands::region(info),
                verify_only,
            };
            commands::run_program(&programmer, &file, address, opts, &cancel)
        }
        Commands::Write {
            file,
            address,
            verify_only,
        } => commands::run_write(&programmer, &file, address, verify_only, &cancel),
        Commands::Read {
            file,
            address,
            length,
            info,
        } => commands::run_read(
            &programmer,
            &file,
            address,
            length,
            commands::region(info),
            &cancel,
        ),
        Commands::Erase { info } => commands::run_erase(&programmer, commands::region(info)),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
    Ok(())
}
