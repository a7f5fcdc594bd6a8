//! Stream views bounded to a byte window of a volume.
//!
//! A view exposes exactly `[start, start + length)` of the underlying
//! [`VolumeSet`] and nothing else: reads clamp to the remainder of the
//! window, and the seekable variant refuses to leave it. Views never own
//! the storage — dropping one leaves the volume untouched.

use std::io::{self, Read, Seek, SeekFrom};
use std::sync::Arc;

use crate::result::*;
use crate::volume::{VirtualPosition, VolumeSet};

fn into_io(err: ZipError) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, err)
}

/// `base + delta` for seek arithmetic; `None` on over/underflow.
fn offset_by(base: u64, delta: i64) -> Option<u64> {
    if delta >= 0 {
        base.checked_add(delta as u64)
    } else {
        base.checked_sub(delta.unsigned_abs())
    }
}

/// A sequential, read-only view of one byte window.
pub struct PartialReader {
    volume: Arc<dyn VolumeSet>,
    start: VirtualPosition,
    length: u64,
    consumed: u64,
}

impl PartialReader {
    /// The window must fit the volume up front, not on first read.
    pub fn new(
        volume: Arc<dyn VolumeSet>,
        start: VirtualPosition,
        length: u64,
    ) -> ZipResult<Self> {
        volume.advance(start, length)?;
        Ok(Self {
            volume,
            start,
            length,
            consumed: 0,
        })
    }

    /// Bytes left before the end of the window.
    pub fn remaining(&self) -> u64 {
        self.length - self.consumed
    }
}

impl Read for PartialReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = self.length - self.consumed;
        if remaining == 0 || buf.is_empty() {
            return Ok(0);
        }
        let want = (buf.len() as u64).min(remaining) as usize;
        let pos = self
            .volume
            .advance(self.start, self.consumed)
            .map_err(into_io)?;
        let n = self.volume.read_at(pos, &mut buf[..want])?;
        self.consumed += n as u64;
        Ok(n)
    }
}

/// A random-access view: [`PartialReader`] semantics plus `Seek` over
/// `[0, length]`.
pub struct PartialSeekReader {
    volume: Arc<dyn VolumeSet>,
    start: VirtualPosition,
    length: u64,
    pos: u64,
}

impl PartialSeekReader {
    pub fn new(
        volume: Arc<dyn VolumeSet>,
        start: VirtualPosition,
        length: u64,
    ) -> ZipResult<Self> {
        volume.advance(start, length)?;
        Ok(Self {
            volume,
            start,
            length,
            pos: 0,
        })
    }

    /// Total window length in bytes.
    pub fn len(&self) -> u64 {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }
}

impl Read for PartialSeekReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = self.length - self.pos;
        if remaining == 0 || buf.is_empty() {
            return Ok(0);
        }
        let want = (buf.len() as u64).min(remaining) as usize;
        let pos = self.volume.advance(self.start, self.pos).map_err(into_io)?;
        let n = self.volume.read_at(pos, &mut buf[..want])?;
        self.pos += n as u64;
        Ok(n)
    }
}

impl Seek for PartialSeekReader {
    fn seek(&mut self, from: SeekFrom) -> io::Result<u64> {
        let target = match from {
            SeekFrom::Start(n) => Some(n),
            SeekFrom::End(delta) => offset_by(self.length, delta),
            SeekFrom::Current(delta) => offset_by(self.pos, delta),
        };
        match target {
            // Seeking to the very end is legal; reads there return 0.
            Some(t) if t <= self.length => {
                self.pos = t;
                Ok(t)
            }
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek outside the view window",
            )),
        }
    }
}
