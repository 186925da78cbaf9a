//! Programmer registration and dispatch
//!
//! Backends are feature-gated. A programmer string names one of them and may
//! carry options: `mpsse:type=tiny-h,divisor=2`.

use milflash_core::Adapter;

/// Programmer used when none is given
#[cfg(feature = "mpsse")]
pub const DEFAULT_PROGRAMMER: &str = "mpsse";
#[cfg(not(feature = "mpsse"))]
pub const DEFAULT_PROGRAMMER: &str = "dummy";

/// Information about a programmer
pub struct ProgrammerInfo {
    /// Primary name (used for matching)
    pub name: &'static str,
    /// Alternative names/aliases
    pub aliases: &'static [&'static str],
    /// Short description
    pub description: &'static str,
}

/// Get information about all available programmers (enabled at compile time)
#[allow(unused_mut, clippy::vec_init_then_push)]
pub fn available_programmers() -> Vec<ProgrammerInfo> {
    let mut programmers = Vec::new();

    #[cfg(feature = "mpsse")]
    programmers.push(ProgrammerInfo {
        name: "mpsse",
        aliases: &["ftdi", "olimex"],
        description: "Olimex ARM-USB-TINY(-H) JTAG (type=tiny|tiny-h,index=N,divisor=N,latency=N)",
    });

    #[cfg(feature = "dummy")]
    programmers.push(ProgrammerInfo {
        name: "dummy",
        aliases: &[],
        description: "Simulated 1986BE9x target for testing",
    });

    programmers
}

/// Generate help text listing all available programmers
pub fn programmer_help() -> String {
    let programmers = available_programmers();

    if programmers.is_empty() {
        return "No programmers available (recompile with programmer features enabled)".to_string();
    }

    let mut help = String::from("Available programmers:\n");
    for p in &programmers {
        help.push_str(&format!("  {:8} - {}\n", p.name, p.description));
    }
    help
}

/// Generate a short list of programmer names for CLI help
pub fn programmer_names_short() -> String {
    let programmers = available_programmers();
    let names: Vec<&str> = programmers.iter().map(|p| p.name).collect();
    names.join(", ")
}

/// A selected backend, able to open any number of sessions
pub enum Programmer {
    /// FTDI MPSSE adapter over USB
    #[cfg(feature = "mpsse")]
    Mpsse(milflash_mpsse::MpsseConfig),
    /// In-memory target; every session sees the same chip
    #[cfg(feature = "dummy")]
    Dummy(milflash_dummy::DummyTarget),
}

impl Programmer {
    /// Select a backend from a programmer string
    pub fn from_spec(spec: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let (name, options) = parse_programmer_string(spec);
        let programmer = available_programmers()
            .into_iter()
            .find(|p| p.name == name || p.aliases.contains(&name))
            .ok_or_else(|| unknown_programmer_error(name))?;

        match programmer.name {
            #[cfg(feature = "mpsse")]
            "mpsse" => {
                let config = milflash_mpsse::parse_options(&options)?;
                log::debug!("MPSSE configuration: {:?}", config);
                Ok(Programmer::Mpsse(config))
            }
            #[cfg(feature = "dummy")]
            "dummy" => {
                for (key, value) in &options {
                    log::warn!("Unknown dummy option: {}={}", key, value);
                }
                Ok(Programmer::Dummy(milflash_dummy::DummyTarget::new_default()))
            }
            _ => Err(unknown_programmer_error(name)),
        }
    }

    /// Open the adapter for a new session
    pub fn connect(&self) -> milflash_core::Result<Box<dyn Adapter>> {
        match self {
            #[cfg(feature = "mpsse")]
            Programmer::Mpsse(config) => Ok(Box::new(milflash_mpsse::open(config)?)),
            #[cfg(feature = "dummy")]
            Programmer::Dummy(target) => Ok(Box::new(target.clone())),
        }
    }
}

/// Parse a programmer string into name and options
///
/// Format: "name" or "name:option1=value1,option2=value2"
pub fn parse_programmer_string(s: &str) -> (&str, Vec<(&str, &str)>) {
    if let Some((name, opts)) = s.split_once(':') {
        let options: Vec<_> = opts
            .split(',')
            .filter_map(|opt| opt.split_once('='))
            .collect();
        (name, options)
    } else {
        (s, Vec::new())
    }
}

fn unknown_programmer_error(name: &str) -> Box<dyn std::error::Error> {
    let mut msg = format!("Unknown programmer: {}\n\n", name);
    msg.push_str(&programmer_help());
    msg.into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_programmer_string() {
        assert_eq!(parse_programmer_string("mpsse"), ("mpsse", vec![]));
        assert_eq!(
            parse_programmer_string("mpsse:type=tiny-h,divisor=2"),
            ("mpsse", vec![("type", "tiny-h"), ("divisor", "2")])
        );
        assert_eq!(parse_programmer_string("mpsse:bogus"), ("mpsse", vec![]));
    }

    #[test]
    fn test_unknown_programmer() {
        assert!(Programmer::from_spec("ch341a").is_err());
    }

    #[cfg(feature = "dummy")]
    #[test]
    fn test_dummy_sessions_share_chip() {
        let programmer = Programmer::from_spec("dummy").unwrap();
        let image = milflash_core::Image::from_bin(&[0x5A; 64], 0x0800_0000).unwrap();
        let cancel = std::sync::atomic::AtomicBool::new(false);
        let mut connect = || programmer.connect();
        milflash_core::program::program(
            &mut connect,
            &image,
            &Default::default(),
            &mut milflash_core::program::NoProgress,
            &cancel,
        )
        .unwrap();

        let mut out = Vec::new();
        milflash_core::program::read_memory(
            &mut connect,
            0x0800_0000,
            64,
            milflash_core::Region::Main,
            &mut out,
            &mut milflash_core::program::NoProgress,
            &cancel,
        )
        .unwrap();
        assert_eq!(out, vec![0x5A; 64]);
    }
}
