//! spanzip is a ZIP archive reader that works straight from seekable
//! byte storage — no memory map, no whole-file buffer:
//!
//! ```no_run
//! # use std::fs::File;
//! # use std::io;
//! # use spanzip::*;
//! let archive = ZipArchive::new(File::open("foo.zip")?)?;
//!
//! for entry in archive.entries() {
//!     let mut reader = archive.read(entry)?;
//!     let mut save_to = File::create(entry.path.as_str())?;
//!     io::copy(&mut reader, &mut save_to)?;
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! Zip is an interesting archive format: unlike compressed tarballs often
//! seen in Linux land (`*.tar.gz`, `*.tar.zst`, ...), each file in a Zip
//! archive is compressed independently, with a central directory telling
//! us where to find each file. Opening an archive walks that directory,
//! re-reads every entry's local header, and merges the two into an
//! immutable entry list; payloads stream out lazily through whichever
//! codec the entry was stored with. Entry readers are `Send` and
//! independent of each other, so any number of files can be decompressed
//! in parallel.
//!
//! Every offset in the crate is a [`volume::VirtualPosition`] — a
//! (disk, offset) pair — and all position arithmetic goes through the
//! [`volume::VolumeSet`] trait, so a future spanned-archive backend only
//! has to implement that trait. Archives that actually span several
//! disks are detected and rejected with a typed
//! [`result::ZipError::MultiVolume`] carrying the disk count.
//!
//! Compression methods are pluggable through [`codec::CodecRegistry`]:
//! stream-native codecs (Deflate) wrap the entry's bounded view
//! directly, while whole-operation codecs (Zstd) run behind a bounded
//! [`bridge`] on a background thread. Integrity is CRC-32 both ways —
//! entry readers validate at end of stream, and
//! [`ZipArchive::check_entry`](read::ZipArchive::check_entry) drives a
//! full decode against the stored checksum.

pub mod bridge;
pub mod codec;
pub mod read;
pub mod result;
pub mod stream;
pub mod volume;

pub use codec::{CodecRegistry, CompressionMethod};
pub use read::{ArchiveEntry, ZipArchive};
pub use result::{EntryVerdict, ZipError, ZipResult};

mod crc_reader;
mod spec;
