//! Progress bars for long-running operations

use indicatif::{ProgressBar, ProgressStyle};
use milflash_core::program::{Phase, Progress};

const TEMPLATE: &str = "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta}) {msg}";

/// Reports progress on stderr with one bar per phase
#[derive(Default)]
pub struct BarProgress {
    bar: Option<ProgressBar>,
}

impl BarProgress {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Progress for BarProgress {
    fn start(&mut self, phase: Phase, total_bytes: usize) {
        let pb = ProgressBar::new(total_bytes as u64);
        let style = ProgressStyle::default_bar()
            .template(TEMPLATE)
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-");
        pb.set_style(style);
        pb.set_message(phase.label());
        if let Some(old) = self.bar.replace(pb) {
            old.abandon();
        }
    }

    fn advance(&mut self, bytes_done: usize) {
        if let Some(pb) = &self.bar {
            pb.set_position(bytes_done as u64);
        }
    }

    fn retry(&mut self, addr: u32, attempt: u32) {
        let msg = format!("Verify failed for block at 0x{:08X}, retry {}", addr, attempt);
        match &self.bar {
            Some(pb) => pb.println(msg),
            None => eprintln!("{}", msg),
        }
    }

    fn finish(&mut self) {
        if let Some(pb) = self.bar.take() {
            pb.finish();
        }
    }
}

impl Drop for BarProgress {
    fn drop(&mut self) {
        // An interrupted phase leaves its bar where it stopped
        if let Some(pb) = self.bar.take() {
            pb.abandon();
        }
    }
}
