//! CLI argument parsing

use crate::programmers;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Parse a string as a hex or decimal u32
fn parse_hex_u32(s: &str) -> Result<u32, String> {
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16).map_err(|e| format!("Invalid hex value: {}", e))
    } else {
        s.parse::<u32>().map_err(|e| format!("Invalid number: {}", e))
    }
}

/// Generate dynamic help text for the programmer argument
fn programmer_help() -> String {
    format!(
        "Programmer to use, with options as name:key=value,... [available: {}]",
        programmers::programmer_names_short()
    )
}

#[derive(Parser)]
#[command(name = "milflash")]
#[command(author, version, about = "Flash programmer for Milandr Cortex-M3 over JTAG", long_about = None)]
pub struct Cli {
    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Print debug messages (same as one -v)
    #[arg(short = 'D', long, global = true)]
    pub debug: bool,

    #[arg(short, long, global = true, default_value = programmers::DEFAULT_PROGRAMMER, help = programmer_help())]
    pub programmer: String,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Combined verbosity of -v and -D
    pub fn verbosity(&self) -> u8 {
        self.verbose.saturating_add(self.debug as u8)
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Identify the connected processor
    Probe,

    /// Erase, program and verify flash from an image file
    Program {
        /// S-record, Intel HEX or raw binary image
        file: PathBuf,

        /// Load address; the file is then read as raw binary
        #[arg(value_parser = parse_hex_u32)]
        address: Option<u32>,

        /// Compare flash with the image without erasing or programming
        #[arg(long)]
        verify_only: bool,

        /// Program everything first, then verify in a fresh session
        #[arg(long)]
        two_pass: bool,

        /// Operate on the information block instead of main flash
        #[arg(long)]
        info: bool,
    },

    /// Write an image to RAM and verify it
    Write {
        /// S-record, Intel HEX or raw binary image
        file: PathBuf,

        /// Load address; the file is then read as raw binary
        #[arg(value_parser = parse_hex_u32)]
        address: Option<u32>,

        /// Compare memory with the image without writing
        #[arg(long)]
        verify_only: bool,
    },

    /// Read memory to a file
    Read {
        /// Output file
        file: PathBuf,

        /// Start address (hex or decimal)
        #[arg(value_parser = parse_hex_u32)]
        address: u32,

        /// Number of bytes (hex or decimal)
        #[arg(value_parser = parse_hex_u32)]
        length: u32,

        /// Read the information block instead of the memory bus
        #[arg(long)]
        info: bool,
    },

    /// Erase a whole flash region
    Erase {
        /// Erase the information block instead of main flash
        #[arg(long)]
        info: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_parse_hex_u32() {
        assert_eq!(parse_hex_u32("0x08000000"), Ok(0x0800_0000));
        assert_eq!(parse_hex_u32("0X1f"), Ok(0x1F));
        assert_eq!(parse_hex_u32("4096"), Ok(4096));
        assert!(parse_hex_u32("0xZZ").is_err());
        assert!(parse_hex_u32("ten").is_err());
    }

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_program_arguments() {
        let cli = Cli::parse_from([
            "milflash",
            "-vD",
            "program",
            "fw.bin",
            "0x08001000",
            "--two-pass",
        ]);
        assert_eq!(cli.verbosity(), 2);
        match cli.command {
            Commands::Program {
                address,
                two_pass,
                info,
                verify_only,
                ..
            } => {
                assert_eq!(address, Some(0x0800_1000));
                assert!(two_pass);
                assert!(!info);
                assert!(!verify_only);
            }
            _ => panic!("expected program"),
        }
    }
}
