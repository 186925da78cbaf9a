//! Program, verify, read and erase operations
//!
//! These drive a [`Target`] block by block over a whole [`Image`]. Each
//! operation opens its own session through a `connect` closure, so that a
//! policy can close the session and reopen it for a clean verify pass.
//! Sessions are always closed in order (core resumed, adapter released), also
//! when the operation fails or is interrupted.

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::adapter::Adapter;
use crate::chip::{ChipInfo, Region};
use crate::error::{Error, Result};
use crate::image::Image;
use crate::target::Target;

/// Bytes handled per program/verify/read step
pub const BLOCK_SIZE: usize = 4096;

/// Erase and reprogram attempts for a block that fails to verify
pub const BLOCK_RETRIES: u32 = 3;

/// Operation phase, reported to [`Progress::start`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Erasing flash
    Erase,
    /// Programming flash
    Program,
    /// Programming flash, verifying each block as it is written
    ProgramVerify,
    /// Writing RAM
    Write,
    /// Reading back and comparing
    Verify,
    /// Reading memory to a file
    Read,
}

impl Phase {
    /// Label for progress output
    pub fn label(self) -> &'static str {
        match self {
            Phase::Erase => "Erase",
            Phase::Program => "Program",
            Phase::ProgramVerify => "Program and verify",
            Phase::Write => "Write",
            Phase::Verify => "Verify",
            Phase::Read => "Read",
        }
    }
}

/// Progress callbacks for long-running operations
pub trait Progress {
    /// A phase covering `total_bytes` starts
    fn start(&mut self, phase: Phase, total_bytes: usize);

    /// `bytes_done` bytes of the current phase are complete
    fn advance(&mut self, bytes_done: usize);

    /// The block at `addr` failed to verify and is being rewritten
    fn retry(&mut self, addr: u32, attempt: u32);

    /// The current phase is complete
    fn finish(&mut self);
}

/// A no-op progress reporter
pub struct NoProgress;

impl Progress for NoProgress {
    fn start(&mut self, _phase: Phase, _total_bytes: usize) {}
    fn advance(&mut self, _bytes_done: usize) {}
    fn retry(&mut self, _addr: u32, _attempt: u32) {}
    fn finish(&mut self) {}
}

/// How programmed flash is verified
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Policy {
    /// Verify each block right after programming it; erase and reprogram
    /// a failing block up to [`BLOCK_RETRIES`] times
    #[default]
    Interleaved,
    /// Program the whole image, reopen the session, then verify it in one
    /// pass, stopping at the first mismatch
    TwoPass,
}

/// Options for [`program`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProgramOptions {
    /// Verification policy
    pub policy: Policy,
    /// Flash array to program
    pub region: Region,
    /// Skip erase and program, only compare
    pub verify_only: bool,
}

/// Outcome of a completed operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Report {
    /// Bytes transferred
    pub bytes: usize,
    /// Block retries consumed by the interleaved policy
    pub retries: u32,
    /// Time spent transferring, excluding erase
    pub elapsed: Duration,
}

impl Report {
    /// Transfer rate in bytes per second
    pub fn rate(&self) -> u64 {
        let ms = self.elapsed.as_millis().max(1) as u64;
        self.bytes as u64 * 1000 / ms
    }
}

/// A word that read back differently from the image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mismatch {
    /// Target address of the word
    pub addr: u32,
    /// Word from the image
    pub expected: u32,
    /// Word read from the target
    pub actual: u32,
}

impl From<Mismatch> for Error {
    fn from(m: Mismatch) -> Self {
        Error::VerifyMismatch {
            addr: m.addr,
            expected: m.expected,
            actual: m.actual,
        }
    }
}

/// Open a session, returning the chip and IDCODE
pub fn probe<A, F>(connect: &mut F) -> Result<(&'static ChipInfo, u32)>
where
    A: Adapter,
    F: FnMut() -> Result<A>,
{
    let target = open(connect)?;
    let found = (target.chip(), target.idcode());
    target.close()?;
    Ok(found)
}

/// Erase the sectors covered by `image`, program it and verify it
pub fn program<A, F, P>(
    connect: &mut F,
    image: &Image,
    opts: &ProgramOptions,
    progress: &mut P,
    cancel: &AtomicBool,
) -> Result<Report>
where
    A: Adapter,
    F: FnMut() -> Result<A>,
    P: Progress + ?Sized,
{
    check_span(image.base, image.len())?;
    let target = open(connect)?;
    let chip = target.chip();
    if !chip.contains(opts.region, image.base, image.len()) {
        let err = Error::OutOfRange {
            addr: image.base,
            len: image.len(),
            region: opts.region.name(),
        };
        return session(target, |_| Err(err));
    }
    log::info!(
        "Memory: {:08X}-{:08X}, total {} bytes",
        image.base,
        image.base as usize + image.len(),
        image.len()
    );

    if opts.verify_only {
        let t0 = Instant::now();
        session(target, |t| verify_all(t, image, opts.region, progress, cancel))?;
        return Ok(report(image, 0, t0));
    }

    match opts.policy {
        Policy::TwoPass => {
            let t0 = session(target, |t| {
                erase_image(t, image, opts.region, progress, cancel)?;
                let t0 = Instant::now();
                program_all(t, image, opts.region, progress, cancel)?;
                Ok(t0)
            })?;
            let target = open(connect)?;
            session(target, |t| verify_all(t, image, opts.region, progress, cancel))?;
            Ok(report(image, 0, t0))
        }
        Policy::Interleaved => session(target, |t| {
            erase_image(t, image, opts.region, progress, cancel)?;
            let t0 = Instant::now();
            let retries = program_verify_all(t, image, opts.region, progress, cancel)?;
            log::info!("Nb of retries: {}", retries);
            Ok(report(image, retries, t0))
        }),
    }
}

/// Write `image` to RAM, reopen the session and verify it
pub fn write_ram<A, F, P>(
    connect: &mut F,
    image: &Image,
    verify_only: bool,
    progress: &mut P,
    cancel: &AtomicBool,
) -> Result<Report>
where
    A: Adapter,
    F: FnMut() -> Result<A>,
    P: Progress + ?Sized,
{
    check_span(image.base, image.len())?;
    let t0 = Instant::now();
    if !verify_only {
        let target = open(connect)?;
        session(target, |t| {
            progress.start(Phase::Write, image.len());
            for_each_block(image.base, image.len(), cancel, |offset, len| {
                let words = image.words(offset, len);
                t.write_block(image.base + offset as u32, &words)?;
                progress.advance(offset + len);
                Ok(())
            })?;
            progress.finish();
            Ok(())
        })?;
    }

    let target = open(connect)?;
    session(target, |t| verify_all(t, image, Region::Main, progress, cancel))?;
    Ok(report(image, 0, t0))
}

/// Read `len` bytes at `addr` into `out`
pub fn read_memory<A, F, P, W>(
    connect: &mut F,
    addr: u32,
    len: usize,
    region: Region,
    out: &mut W,
    progress: &mut P,
    cancel: &AtomicBool,
) -> Result<Report>
where
    A: Adapter,
    F: FnMut() -> Result<A>,
    P: Progress + ?Sized,
    W: Write + ?Sized,
{
    check_span(addr, len)?;
    let target = open(connect)?;
    if region == Region::Info && !target.chip().contains(region, addr, len) {
        let err = Error::OutOfRange {
            addr,
            len,
            region: region.name(),
        };
        return session(target, |_| Err(err));
    }
    log::info!(
        "Memory: {:08X}-{:08X}, total {} bytes",
        addr,
        addr as usize + len,
        len
    );

    let t0 = Instant::now();
    session(target, |t| {
        progress.start(Phase::Read, len);
        let mut words = vec![0u32; BLOCK_SIZE / 4];
        for_each_block(addr, len, cancel, |offset, n| {
            let block = &mut words[..(n + 3) / 4];
            t.read_block(addr + offset as u32, block, region)?;
            let bytes: Vec<u8> = block.iter().flat_map(|w| w.to_le_bytes()).collect();
            out.write_all(&bytes[..n])?;
            progress.advance(offset + n);
            Ok(())
        })?;
        progress.finish();
        Ok(())
    })?;
    out.flush()?;

    Ok(Report {
        bytes: len,
        retries: 0,
        elapsed: t0.elapsed(),
    })
}

/// Erase a whole flash region
pub fn erase_all<A, F>(connect: &mut F, region: Region) -> Result<()>
where
    A: Adapter,
    F: FnMut() -> Result<A>,
{
    let target = open(connect)?;
    let base = target.chip().flash_base;
    session(target, |t| t.erase(base, region))
}

/// Compare `len` bytes of the target at `image.base + offset` with the image
pub fn verify_block<A: Adapter>(
    target: &mut Target<A>,
    image: &Image,
    offset: usize,
    len: usize,
    region: Region,
) -> Result<Option<Mismatch>> {
    let expected = image.words(offset, len);
    let mut actual = vec![0u32; expected.len()];
    let addr = image.base.wrapping_add(offset as u32);
    target.read_block(addr, &mut actual, region)?;

    for (i, (&e, &a)) in expected.iter().zip(&actual).enumerate() {
        let word_addr = addr.wrapping_add(4 * i as u32);
        log::trace!("read word {:08X} at address {:08X}", a, word_addr);
        if e != a {
            return Ok(Some(Mismatch {
                addr: word_addr,
                expected: e,
                actual: a,
            }));
        }
    }
    Ok(None)
}

fn open<A, F>(connect: &mut F) -> Result<Target<A>>
where
    A: Adapter,
    F: FnMut() -> Result<A>,
{
    Target::open(connect()?)
}

/// Run `f` on an open session, then close it whatever the outcome
fn session<A, T>(
    mut target: Target<A>,
    f: impl FnOnce(&mut Target<A>) -> Result<T>,
) -> Result<T>
where
    A: Adapter,
{
    let result = f(&mut target);
    let closed = target.close();
    match result {
        Ok(value) => closed.map(|()| value),
        Err(e) => {
            if let Err(close_err) = closed {
                log::warn!("Failed to close session: {}", close_err);
            }
            Err(e)
        }
    }
}

/// Reject a range that runs past the end of the 32-bit address space
fn check_span(addr: u32, len: usize) -> Result<()> {
    if addr as u64 + len as u64 > 1 << 32 {
        return Err(Error::OutOfRange {
            addr,
            len,
            region: "address space",
        });
    }
    Ok(())
}

/// Call `f(offset, len)` for each block of the `total` bytes at `start`
///
/// Blocks end on [`BLOCK_SIZE`] address boundaries, so with an unaligned
/// start the first and last blocks are short.
fn for_each_block(
    start: u32,
    total: usize,
    cancel: &AtomicBool,
    mut f: impl FnMut(usize, usize) -> Result<()>,
) -> Result<()> {
    let mut offset = 0;
    while offset < total {
        if cancel.load(Ordering::SeqCst) {
            return Err(Error::Interrupted);
        }
        let pos = start as u64 + offset as u64;
        let to_boundary = BLOCK_SIZE - (pos % BLOCK_SIZE as u64) as usize;
        let len = to_boundary.min(total - offset);
        f(offset, len)?;
        offset += len;
    }
    Ok(())
}

/// Start addresses of the `sector`-byte sectors touched by `[addr, addr + len)`
fn sectors(addr: u32, len: usize, sector: u32) -> impl Iterator<Item = u32> {
    let sector = sector.max(1) as u64;
    let first = addr as u64 / sector * sector;
    let end = (addr as u64 + len as u64).div_ceil(sector) * sector;
    (first..end).step_by(sector as usize).map(|a| a as u32)
}

fn report(image: &Image, retries: u32, t0: Instant) -> Report {
    Report {
        bytes: image.len(),
        retries,
        elapsed: t0.elapsed(),
    }
}

fn erase_image<A, P>(
    target: &mut Target<A>,
    image: &Image,
    region: Region,
    progress: &mut P,
    cancel: &AtomicBool,
) -> Result<()>
where
    A: Adapter,
    P: Progress + ?Sized,
{
    if region == Region::Info {
        return target.erase(image.base, region);
    }

    let sector = target.chip().sector_size;
    let covered: Vec<u32> = sectors(image.base, image.len(), sector).collect();
    progress.start(Phase::Erase, covered.len() * sector as usize);
    for (i, &addr) in covered.iter().enumerate() {
        if cancel.load(Ordering::SeqCst) {
            return Err(Error::Interrupted);
        }
        target.erase_block(addr, region)?;
        progress.advance((i + 1) * sector as usize);
    }
    progress.finish();
    Ok(())
}

fn program_all<A, P>(
    target: &mut Target<A>,
    image: &Image,
    region: Region,
    progress: &mut P,
    cancel: &AtomicBool,
) -> Result<()>
where
    A: Adapter,
    P: Progress + ?Sized,
{
    progress.start(Phase::Program, image.len());
    for_each_block(image.base, image.len(), cancel, |offset, len| {
        let words = image.words(offset, len);
        target.program_block(image.base + offset as u32, &words, region)?;
        progress.advance(offset + len);
        Ok(())
    })?;
    progress.finish();
    Ok(())
}

fn verify_all<A, P>(
    target: &mut Target<A>,
    image: &Image,
    region: Region,
    progress: &mut P,
    cancel: &AtomicBool,
) -> Result<()>
where
    A: Adapter,
    P: Progress + ?Sized,
{
    progress.start(Phase::Verify, image.len());
    for_each_block(image.base, image.len(), cancel, |offset, len| {
        if let Some(mismatch) = verify_block(target, image, offset, len, region)? {
            return Err(mismatch.into());
        }
        progress.advance(offset + len);
        Ok(())
    })?;
    progress.finish();
    Ok(())
}

/// Program and verify block by block, returning the retries consumed
fn program_verify_all<A, P>(
    target: &mut Target<A>,
    image: &Image,
    region: Region,
    progress: &mut P,
    cancel: &AtomicBool,
) -> Result<u32>
where
    A: Adapter,
    P: Progress + ?Sized,
{
    let mut retries = 0;
    let sector = target.chip().sector_size;
    progress.start(Phase::ProgramVerify, image.len());
    for_each_block(image.base, image.len(), cancel, |offset, len| {
        let addr = image.base + offset as u32;
        let words = image.words(offset, len);
        target.program_block(addr, &words, region)?;

        let mut attempt = 0;
        while attempt < BLOCK_RETRIES {
            match verify_block(target, image, offset, len, region)? {
                None => break,
                Some(m) => {
                    log::debug!(
                        "Verify failed for block at {:08X} (word {:08X}: file={:08X}, mem={:08X}), retry...",
                        addr,
                        m.addr,
                        m.expected,
                        m.actual
                    );
                }
            }
            attempt += 1;
            progress.retry(addr, attempt);
            for sector_addr in sectors(addr, len, sector) {
                target.erase_block(sector_addr, region)?;
            }
            target.program_block(addr, &words, region)?;
        }

        retries += attempt;
        if attempt == BLOCK_RETRIES {
            return Err(Error::RetriesExhausted { addr, retries });
        }
        progress.advance(offset + len);
        Ok(())
    })?;
    progress.finish();
    Ok(retries)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blocks(start: u32, total: usize) -> Vec<(usize, usize)> {
        let cancel = AtomicBool::new(false);
        let mut out = Vec::new();
        for_each_block(start, total, &cancel, |offset, len| {
            out.push((offset, len));
            Ok(())
        })
        .unwrap();
        out
    }

    #[test]
    fn test_blocks_follow_address_boundaries() {
        assert_eq!(blocks(0x0800_0000, 8192), [(0, 4096), (4096, 4096)]);
        assert_eq!(blocks(0x0800_0800, 6000), [(0, 2048), (2048, 3952)]);
        assert_eq!(
            blocks(0x0800_0800, 8192),
            [(0, 2048), (2048, 4096), (6144, 2048)]
        );
        assert!(blocks(0x0800_0000, 0).is_empty());
    }

    #[test]
    fn test_sectors_cover_unaligned_range() {
        let s: Vec<u32> = sectors(0x0800_0800, 4096, 4096).collect();
        assert_eq!(s, [0x0800_0000, 0x0800_1000]);
        let s: Vec<u32> = sectors(0x0800_1000, 4096, 4096).collect();
        assert_eq!(s, [0x0800_1000]);
        let s: Vec<u32> = sectors(0x0800_0FFC, 8, 4096).collect();
        assert_eq!(s, [0x0800_0000, 0x0800_1000]);
        let s: Vec<u32> = sectors(0xFFFF_F000, 4096, 4096).collect();
        assert_eq!(s, [0xFFFF_F000]);
    }

    #[test]
    fn test_span_past_address_space() {
        assert!(check_span(0xFFFF_F000, 0x1000).is_ok());
        assert!(matches!(
            check_span(0xFFFF_F000, 0x2000),
            Err(Error::OutOfRange {
                addr: 0xFFFF_F000,
                len: 0x2000,
                ..
            })
        ));
    }
}
