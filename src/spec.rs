//! Code specific to the ZIP file format specification.
//!
//! We try to keep the nitty gritty here,
//! and higher-level stuff in the [`read`] module.
//! (This pattern, like several others, was inspired by the Zip crate.)
//!
//! Most comments quote the ZIP spec, [`APPNOTE.TXT`].
//!
//! Unlike a parser working over a memory-mapped archive, everything here
//! is handed bounded buffers read back from storage, so every
//! variable-length field is length-checked: a truncated record is a
//! format error, never a panic.
//!
//! [`read`]: ../read/index.html
//! [`APPNOTE.TXT`]: https://pkware.cachefly.net/webdocs/APPNOTE/APPNOTE-6.3.6.TXT

use std::convert::TryInto;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use codepage_437::{FromCp437, CP437_CONTROL};
use memchr::memmem;

use crate::result::*;

// Magic numbers denoting various sections of a ZIP archive

/// End of central directory magic number
pub const EOCDR_MAGIC: [u8; 4] = [b'P', b'K', 5, 6];
/// Zip64 end of central directory magic number
pub const ZIP64_EOCDR_MAGIC: [u8; 4] = [b'P', b'K', 6, 6];
/// Zip64 end of central directory locator magic number
pub const ZIP64_EOCDR_LOCATOR_MAGIC: [u8; 4] = [b'P', b'K', 6, 7];
/// Central directory magic number
pub const CENTRAL_DIRECTORY_MAGIC: [u8; 4] = [b'P', b'K', 1, 2];
/// Local file header magic number
pub const LOCAL_FILE_HEADER_MAGIC: [u8; 4] = [b'P', b'K', 3, 4];

/// Longest possible End of central directory record:
/// 22 fixed bytes plus a 65535-byte comment.
pub const MAX_EOCDR_SEARCH: u64 = 22 + 65535;

/// Takes `n` bytes off the front of the provided slice, shrinking it.
fn take<'a>(input: &mut &'a [u8], n: usize) -> ZipResult<&'a [u8]> {
    if input.len() < n {
        return Err(ZipError::InvalidArchive("Truncated record"));
    }
    let (head, rest) = input.split_at(n);
    *input = rest;
    Ok(head)
}

/// Reads a little-endian u64 from the front of the provided slice, shrinking it.
fn read_u64(input: &mut &[u8]) -> ZipResult<u64> {
    let bytes = take(input, std::mem::size_of::<u64>())?;
    Ok(u64::from_le_bytes(bytes.try_into().expect("less than eight bytes for u64")))
}

/// Reads a little-endian u32 from the front of the provided slice, shrinking it.
fn read_u32(input: &mut &[u8]) -> ZipResult<u32> {
    let bytes = take(input, std::mem::size_of::<u32>())?;
    Ok(u32::from_le_bytes(bytes.try_into().expect("less than four bytes for u32")))
}

/// Reads a little-endian u16 from the front of the provided slice, shrinking it.
fn read_u16(input: &mut &[u8]) -> ZipResult<u16> {
    let bytes = take(input, std::mem::size_of::<u16>())?;
    Ok(u16::from_le_bytes(bytes.try_into().expect("less than two bytes for u16")))
}

/// Extracts the "is this text UTF-8?" bit from the 16-bit flags field.
///
/// If false, text is assumed to be CP437.
pub fn is_utf8(flags: u16) -> bool {
    // Bit 11: Language encoding flag (EFS).  If this bit is set,
    //         the filename and comment fields for this file
    //         MUST be encoded using UTF-8. (see APPENDIX D)
    flags & (1 << 11) != 0
}

/// Extracts the "is this file encrypted?" bit from the 16-bit flags field.
pub fn is_encrypted(flags: u16) -> bool {
    // Bit 0: If set, indicates that the file is encrypted
    flags & 1 != 0
}

/// Decodes a name or comment per the entry's flags:
/// UTF-8 when bit 11 says so, CP437 otherwise.
pub fn decode_text(bytes: &[u8], flags: u16) -> ZipResult<String> {
    if is_utf8(flags) {
        Ok(std::str::from_utf8(bytes).map_err(ZipError::Encoding)?.to_owned())
    } else {
        Ok(String::from_cp437(bytes.to_vec(), &CP437_CONTROL))
    }
}

/// The OS a file in the archive was compressed with.
/// Used to decode additional metadata like permissions
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HostSystem {
    Dos,
    Unix,
    Unknown,
}

impl HostSystem {
    pub fn from_source_version(source_version: u16) -> Self {
        // 4.4.2.1 The upper byte indicates the compatibility of the file
        // attribute information.
        //
        // 4.4.2.2 The current mappings include:
        //
        //  0 - MS-DOS and OS/2 (FAT / VFAT / FAT32 file systems)
        //  3 - UNIX
        //  ... (the rest we treat alike)
        match source_version >> 8 {
            0 => HostSystem::Dos,
            3 => HostSystem::Unix,
            _ => HostSystem::Unknown,
        }
    }
}

/// Data from the End of central directory record
///
/// Found at the back of the ZIP archive and provides offsets for finding
/// its central directory, along with the disk bookkeeping left over from
/// archives broken onto multiple floppies.
#[derive(Debug)]
pub struct EndOfCentralDirectory {
    pub disk_number: u16,
    pub disk_with_central_directory: u16,
    pub entries_on_this_disk: u16,
    pub entries: u16,
    pub central_directory_size: u32,
    pub central_directory_offset: u32,
    pub file_comment: Vec<u8>,
}

impl EndOfCentralDirectory {
    pub const FIXED_SIZE: usize = 22;

    pub fn parse(mut eocdr: &[u8]) -> ZipResult<Self> {
        // 4.3.16  End of central directory record:
        //
        // end of central dir signature    4 bytes  (0x06054b50)
        // number of this disk             2 bytes
        // number of the disk with the
        // start of the central directory  2 bytes
        // total number of entries in
        // the central dir on this disk    2 bytes
        // total number of entries in
        // the central dir                 2 bytes
        // size of the central directory   4 bytes
        // offset of start of central
        // directory with respect to
        // the starting disk number        4 bytes
        // zipfile comment length          2 bytes
        if take(&mut eocdr, 4)? != EOCDR_MAGIC {
            return Err(ZipError::InvalidArchive(
                "Bad End Of Central Directory Record signature",
            ));
        }
        let disk_number = read_u16(&mut eocdr)?;
        let disk_with_central_directory = read_u16(&mut eocdr)?;
        let entries_on_this_disk = read_u16(&mut eocdr)?;
        let entries = read_u16(&mut eocdr)?;
        let central_directory_size = read_u32(&mut eocdr)?;
        let central_directory_offset = read_u32(&mut eocdr)?;
        let comment_length = read_u16(&mut eocdr)?;
        let file_comment = take(&mut eocdr, comment_length as usize)?.to_vec();

        Ok(Self {
            disk_number,
            disk_with_central_directory,
            entries_on_this_disk,
            entries,
            central_directory_size,
            central_directory_offset,
            file_comment,
        })
    }

    /// True when any 16/32-bit field carries its format's sentinel max,
    /// meaning the real value lives in the Zip64 extension.
    pub fn requires_zip64(&self) -> bool {
        self.disk_number == u16::MAX
            || self.disk_with_central_directory == u16::MAX
            || self.entries_on_this_disk == u16::MAX
            || self.entries == u16::MAX
            || self.central_directory_size == u32::MAX
            || self.central_directory_offset == u32::MAX
    }
}

/// Searches backward through the tail of the archive for the
/// End of central directory record.
///
/// The trailing comment (0-65535 bytes) makes the record's start
/// variable, and the comment itself can contain the magic, so each
/// candidate is checked against where its comment would have to end
/// before we accept it.
pub fn find_eocdr(tail: &[u8]) -> ZipResult<usize> {
    let mut haystack = tail;
    while let Some(posit) = memmem::rfind(haystack, &EOCDR_MAGIC) {
        let candidate = &tail[posit..];
        if candidate.len() >= EndOfCentralDirectory::FIXED_SIZE {
            let comment_length = u16::from_le_bytes([candidate[20], candidate[21]]) as usize;
            if EndOfCentralDirectory::FIXED_SIZE + comment_length == candidate.len() {
                return Ok(posit);
            }
        }
        haystack = &haystack[..posit];
    }
    Err(ZipError::InvalidArchive(
        "Couldn't find End Of Central Directory Record",
    ))
}

/// Data from the Zip64 end of central directory locator
///
/// This should immediately precede the End of central directory record
/// on Zip64 files and tell us where to find the Zip64 end of central directory record.
#[derive(Debug)]
pub struct Zip64EndOfCentralDirectoryLocator {
    pub disk_with_zip64_eocdr: u32,
    pub zip64_eocdr_offset: u64,
    pub disks: u32,
}

impl Zip64EndOfCentralDirectoryLocator {
    pub const SIZE: usize = 20;

    pub fn parse(mut mapping: &[u8]) -> Option<Self> {
        // 4.3.15 Zip64 end of central directory locator
        //
        // zip64 end of central dir locator
        // signature                       4 bytes  (0x07064b50)
        // number of the disk with the
        // start of the zip64 end of
        // central directory               4 bytes
        // relative offset of the zip64
        // end of central directory record 8 bytes
        // total number of disks           4 bytes
        if mapping.len() < Self::SIZE || mapping[..4] != ZIP64_EOCDR_LOCATOR_MAGIC {
            return None;
        }
        mapping = &mapping[4..];
        let disk_with_zip64_eocdr = read_u32(&mut mapping).ok()?;
        let zip64_eocdr_offset = read_u64(&mut mapping).ok()?;
        let disks = read_u32(&mut mapping).ok()?;

        Some(Self {
            disk_with_zip64_eocdr,
            zip64_eocdr_offset,
            disks,
        })
    }
}

/// Data from the Zip64 end of central directory record
#[derive(Debug)]
pub struct Zip64EndOfCentralDirectory {
    pub source_version: u16,
    pub minimum_extract_version: u16,
    pub disk_number: u32,
    pub disk_with_central_directory: u32,
    pub entries_on_this_disk: u64,
    pub entries: u64,
    pub central_directory_size: u64,
    pub central_directory_offset: u64,
}

impl Zip64EndOfCentralDirectory {
    pub const FIXED_SIZE: usize = 56;

    pub fn parse(mut eocdr: &[u8]) -> ZipResult<Self> {
        // 4.3.14  Zip64 end of central directory record
        //
        // zip64 end of central dir
        // signature                       4 bytes  (0x06064b50)
        // size of zip64 end of central
        // directory record                8 bytes
        // version made by                 2 bytes
        // version needed to extract       2 bytes
        // number of this disk             4 bytes
        // number of the disk with the
        // start of the central directory  4 bytes
        // total number of entries in the
        // central directory on this disk  8 bytes
        // total number of entries in the
        // central directory               8 bytes
        // size of the central directory   8 bytes
        // offset of start of central
        // directory with respect to
        // the starting disk number        8 bytes
        // zip64 extensible data sector    (variable size)
        if take(&mut eocdr, 4)? != ZIP64_EOCDR_MAGIC {
            return Err(ZipError::InvalidArchive(
                "Bad Zip64 End Of Central Directory Record signature",
            ));
        }
        let eocdr_size = read_u64(&mut eocdr)?;
        let source_version = read_u16(&mut eocdr)?;
        let minimum_extract_version = read_u16(&mut eocdr)?;
        let disk_number = read_u32(&mut eocdr)?;
        let disk_with_central_directory = read_u32(&mut eocdr)?;
        let entries_on_this_disk = read_u64(&mut eocdr)?;
        let entries = read_u64(&mut eocdr)?;
        let central_directory_size = read_u64(&mut eocdr)?;
        let central_directory_offset = read_u64(&mut eocdr)?;

        // 4.3.14.1 The value stored into the "size of zip64 end of central
        // directory record" SHOULD be the size of the remaining
        // record and SHOULD NOT include the leading 12 bytes.
        //
        // Size = SizeOfFixedFields + SizeOfVariableData - 12.
        match eocdr_size.checked_add(12) {
            Some(total) if total >= Self::FIXED_SIZE as u64 => {}
            _ => {
                return Err(ZipError::InvalidArchive(
                    "Invalid extensible data length in Zip64 End Of Central Directory Record",
                ))
            }
        }

        Ok(Self {
            source_version,
            minimum_extract_version,
            disk_number,
            disk_with_central_directory,
            entries_on_this_disk,
            entries,
            central_directory_size,
            central_directory_offset,
        })
    }
}

/// Finds the Zip64 end of central directory record in the given slice.
///
/// The slice should start at the Zip64 EOCDR's nominal location,
/// but we might have to do some searching since ZIP archives can have
/// arbitrary junk up front.
pub fn find_zip64_eocdr(window: &[u8]) -> ZipResult<usize> {
    memmem::find(window, &ZIP64_EOCDR_MAGIC).ok_or(ZipError::InvalidArchive(
        "Couldn't find Zip64 End Of Central Directory Record",
    ))
}

/// Data from a central directory record
///
/// Each of these records contains information about a file or folder
/// stored in the ZIP archive.
#[derive(Debug)]
pub struct CentralDirectoryRecord<'a> {
    pub source_version: u16,
    pub minimum_extract_version: u16,
    pub flags: u16,
    pub compression_method: u16,
    pub last_modified_time: u16,
    pub last_modified_date: u16,
    pub crc32: u32,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
    pub disk_number: u16,
    pub internal_file_attributes: u16,
    pub external_file_attributes: u32,
    pub header_offset: u32,
    pub path: &'a [u8],
    pub extra_field: &'a [u8],
    pub file_comment: &'a [u8],
}

impl<'a> CentralDirectoryRecord<'a> {
    pub fn parse_and_consume(entry: &mut &'a [u8]) -> ZipResult<Self> {
        // 4.3.12  Central directory structure:
        //
        //   central file header signature   4 bytes  (0x02014b50)
        //   version made by                 2 bytes
        //   version needed to extract       2 bytes
        //   general purpose bit flag        2 bytes
        //   compression method              2 bytes
        //   last mod file time              2 bytes
        //   last mod file date              2 bytes
        //   crc-32                          4 bytes
        //   compressed size                 4 bytes
        //   uncompressed size               4 bytes
        //   file name length                2 bytes
        //   extra field length              2 bytes
        //   file comment length             2 bytes
        //   disk number start               2 bytes
        //   internal file attributes        2 bytes
        //   external file attributes        4 bytes
        //   relative offset of local header 4 bytes
        //
        //   file name (variable size)
        //   extra field (variable size)
        //   file comment (variable size)
        if take(entry, 4)? != CENTRAL_DIRECTORY_MAGIC {
            return Err(ZipError::InvalidArchive("Invalid central directory entry"));
        }
        let source_version = read_u16(entry)?;
        let minimum_extract_version = read_u16(entry)?;
        let flags = read_u16(entry)?;
        let compression_method = read_u16(entry)?;
        let last_modified_time = read_u16(entry)?;
        let last_modified_date = read_u16(entry)?;
        let crc32 = read_u32(entry)?;
        let compressed_size = read_u32(entry)?;
        let uncompressed_size = read_u32(entry)?;
        let path_length = read_u16(entry)? as usize;
        let extra_field_length = read_u16(entry)? as usize;
        let file_comment_length = read_u16(entry)? as usize;
        let disk_number = read_u16(entry)?;
        let internal_file_attributes = read_u16(entry)?;
        let external_file_attributes = read_u32(entry)?;
        let header_offset = read_u32(entry)?;
        let path = take(entry, path_length)?;
        let extra_field = take(entry, extra_field_length)?;
        let file_comment = take(entry, file_comment_length)?;

        Ok(Self {
            source_version,
            minimum_extract_version,
            flags,
            compression_method,
            last_modified_time,
            last_modified_date,
            crc32,
            compressed_size,
            uncompressed_size,
            disk_number,
            internal_file_attributes,
            external_file_attributes,
            header_offset,
            path,
            extra_field,
            file_comment,
        })
    }
}

/// The fixed fields of a local file header.
///
/// Each file's actual contents is preceded by one of these; the variable
/// name and extra fields follow it, and the payload starts right after
/// those.
#[derive(Debug)]
pub struct LocalFileHeaderFixed {
    pub minimum_extract_version: u16,
    pub flags: u16,
    pub compression_method: u16,
    pub last_modified_time: u16,
    pub last_modified_date: u16,
    pub crc32: u32,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
    pub path_length: u16,
    pub extra_field_length: u16,
}

impl LocalFileHeaderFixed {
    pub const SIZE: usize = 30;

    pub fn parse(mut header: &[u8]) -> ZipResult<Self> {
        // 4.3.7  Local file header:
        //
        // local file header signature     4 bytes  (0x04034b50)
        // version needed to extract       2 bytes
        // general purpose bit flag        2 bytes
        // compression method              2 bytes
        // last mod file time              2 bytes
        // last mod file date              2 bytes
        // crc-32                          4 bytes
        // compressed size                 4 bytes
        // uncompressed size               4 bytes
        // file name length                2 bytes
        // extra field length              2 bytes
        //
        // file name (variable size)
        // extra field (variable size)
        if take(&mut header, 4)? != LOCAL_FILE_HEADER_MAGIC {
            return Err(ZipError::InvalidArchive("Invalid local file header"));
        }
        let minimum_extract_version = read_u16(&mut header)?;
        let flags = read_u16(&mut header)?;
        let compression_method = read_u16(&mut header)?;
        let last_modified_time = read_u16(&mut header)?;
        let last_modified_date = read_u16(&mut header)?;
        let crc32 = read_u32(&mut header)?;
        let compressed_size = read_u32(&mut header)?;
        let uncompressed_size = read_u32(&mut header)?;
        let path_length = read_u16(&mut header)?;
        let extra_field_length = read_u16(&mut header)?;

        Ok(Self {
            minimum_extract_version,
            flags,
            compression_method,
            last_modified_time,
            last_modified_date,
            crc32,
            compressed_size,
            uncompressed_size,
            path_length,
            extra_field_length,
        })
    }

    /// Length of the name and extra fields that follow the fixed part.
    pub fn variable_len(&self) -> u64 {
        self.path_length as u64 + self.extra_field_length as u64
    }

    /// The header's full serialized length; the entry's payload begins
    /// this many bytes after the header's position.
    pub fn serialized_len(&self) -> u64 {
        Self::SIZE as u64 + self.variable_len()
    }
}

/// Overrides pulled out of the "extra fields" found in central directory
/// records and local file headers.
#[derive(Debug, Default)]
pub struct ExtraFields {
    pub uncompressed_size: Option<u64>,
    pub compressed_size: Option<u64>,
    pub header_offset: Option<u64>,
    pub modified: Option<NaiveDateTime>,
}

/// Walks the extra-field records of one header.
///
/// The `*_is_masked` arguments say which 32-bit fields carried their
/// sentinel max, because the Zip64 field only stores values for those.
pub fn parse_extra_field(
    mut extra_field: &[u8],
    size_is_masked: bool,
    compressed_size_is_masked: bool,
    offset_is_masked: bool,
) -> ZipResult<ExtraFields> {
    // 4.5.1 In order to allow different programs and different types
    // of information to be stored in the 'extra' field in .ZIP
    // files, the following structure MUST be used for all
    // programs storing data in this field:
    //
    //     header1+data1 + header2+data2 . . .
    //
    // Each header MUST consist of:
    //
    //     Header ID - 2 bytes
    //     Data Size - 2 bytes
    let mut fields = ExtraFields::default();
    while !extra_field.is_empty() {
        let kind = read_u16(&mut extra_field)?;
        let field_len = read_u16(&mut extra_field)? as usize;
        let mut data = take(&mut extra_field, field_len)?;

        match kind {
            // Zip64 extended information extra field
            0x0001 => {
                if size_is_masked {
                    fields.uncompressed_size = Some(read_u64(&mut data)?);
                }
                if compressed_size_is_masked {
                    fields.compressed_size = Some(read_u64(&mut data)?);
                }
                if offset_is_masked {
                    fields.header_offset = Some(read_u64(&mut data)?);
                }
                match data.len() {
                    0 => {}
                    // A disk start number means the header lives on
                    // another disk of a spanned set.
                    4 => {
                        let disk = read_u32(&mut data)?;
                        if disk != 0 {
                            return Err(ZipError::MultiVolume { disks: disk + 1 });
                        }
                    }
                    _ => {
                        return Err(ZipError::InvalidArchive("Malformed Zip64 extra field"));
                    }
                }
            }
            // Extended timestamp: one flags byte, then the times the
            // flags advertise. Only the modification time is stored in
            // the central directory copy.
            0x5455 => {
                if let Some((&flags, mut times)) = data.split_first() {
                    if flags & 1 != 0 && times.len() >= 4 {
                        let seconds = read_u32(&mut times)? as i64;
                        fields.modified =
                            DateTime::from_timestamp(seconds, 0).map(|dt| dt.naive_utc());
                    }
                }
            }
            _ => {}
        }
    }
    Ok(fields)
}

/// Decodes an MS-DOS packed date and 2-second-precision time.
///
/// Out-of-range fields (they happen in the wild) fall back to the epoch
/// rather than failing the whole entry.
pub fn parse_msdos(time: u16, date: u16) -> NaiveDateTime {
    let seconds = (0b0000_0000_0001_1111 & time) as u32 * 2;
    let minutes = (0b0000_0111_1110_0000 & time) as u32 >> 5;
    let hours = (0b1111_1000_0000_0000 & time) as u32 >> 11;

    let days = (0b0000_0000_0001_1111 & date) as u32;
    let months = (0b0000_0001_1110_0000 & date) as u32 >> 5;
    // MSDOS uses years since 1980; Always interpreted as a positive value
    let years = ((0b1111_1110_0000_0000 & date) >> 9) as i32 + 1980;

    NaiveDate::from_ymd_opt(years, months, days)
        .and_then(|d| d.and_hms_opt(hours, minutes, seconds))
        .unwrap_or_default()
}
