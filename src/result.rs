//! Error types and the related `Result<T>`

use camino::Utf8PathBuf;
use thiserror::Error;

pub type ZipResult<T> = Result<T, ZipError>;

#[derive(Debug, Error)]
pub enum ZipError {
    /// An error from underlying I/O
    #[error("I/O Error")]
    Io(#[from] std::io::Error),

    /// The ZIP archive contained invalid data per the spec.
    #[error("Invalid Zip archive: {0}")]
    InvalidArchive(&'static str),

    /// Decoding a UTF-8 name or comment failed
    #[error("Invalid UTF-8")]
    Encoding(#[from] std::str::Utf8Error),

    /// Position arithmetic tried to leave the volume.
    #[error("Position out of bounds: {0}")]
    PositionOutOfBounds(&'static str),

    /// The archive spans several disks; only single-volume sets are
    /// supported. Carries the disk count so callers can reopen with a
    /// spanning-capable volume set.
    #[error("Archive spans {disks} disks; only single-volume archives are supported")]
    MultiVolume { disks: u32 },

    /// The entry is encrypted (decryption is unsupported).
    #[error("{path} is encrypted")]
    Encrypted { path: Utf8PathBuf },

    /// No codec is registered for the entry's compression method.
    #[error("Unsupported compression method {0}")]
    UnsupportedMethod(u16),

    /// The ZIP archive uses some other unsupported feature.
    #[error("Unsupported Zip archive: {0}")]
    UnsupportedArchive(String),

    /// The decoded content's CRC-32 doesn't match the central directory.
    #[error("CRC mismatch in {path} (entry {index}): stored {stored:#010x}, computed {computed:#010x}")]
    CrcMismatch {
        index: usize,
        path: Utf8PathBuf,
        stored: u32,
        computed: u32,
    },

    /// A codec was registered twice for one method id.
    /// This is a startup-time configuration mistake, not a runtime state.
    #[error("A codec for method {0} is already registered")]
    DuplicateCodec(u16),

    /// The ZIP archive is prepended with some unknown bytes.
    /// (Use [`ZipArchive::with_prepended_data()`] if this is okay.)
    ///
    /// [`ZipArchive::with_prepended_data()`]: ../read/struct.ZipArchive.html#method.with_prepended_data
    #[error("Archive prepended with {0} unknown bytes")]
    PrependedWithUnknownBytes(u64),
}

/// Classification of a per-entry check for integrity sweeps and CLI glue.
///
/// Produced by catching the crate's typed errors at the boundary; callers
/// that want the underlying detail use [`ZipResult`] directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryVerdict {
    Ok,
    Corrupted,
    Encrypted,
    UnsupportedCompressionMethod,
    UnsupportedFunction,
}

impl EntryVerdict {
    pub fn of(result: &ZipResult<()>) -> Self {
        match result {
            Ok(()) => EntryVerdict::Ok,
            Err(ZipError::Encrypted { .. }) => EntryVerdict::Encrypted,
            Err(ZipError::UnsupportedMethod(_)) => EntryVerdict::UnsupportedCompressionMethod,
            Err(ZipError::MultiVolume { .. }) | Err(ZipError::UnsupportedArchive(_)) => {
                EntryVerdict::UnsupportedFunction
            }
            Err(_) => EntryVerdict::Corrupted,
        }
    }
}
