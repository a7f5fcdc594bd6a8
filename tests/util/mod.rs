//! In-memory ZIP fixture builder.
//!
//! Writes just enough of the format to exercise the reader — the test
//! equivalent of producing inputs with an external `zip` binary, except
//! every byte is under the test's control.

// Each test binary uses its own subset of the builder.
#![allow(dead_code)]

use flate2::write::DeflateEncoder;
use flate2::Compression;
use std::io::Write;

const DOS_TIME: u16 = (12 << 11) | (30 << 5); // 12:30:00
const DOS_DATE: u16 = ((2024 - 1980) << 9) | (6 << 5) | 1; // 2024-06-01
const VERSION_MADE_BY: u16 = (3 << 8) | 20; // Unix host
const EXTERNAL_ATTRIBUTES: u32 = 0o100644 << 16;
const UTF8_FLAG: u16 = 1 << 11;

struct Entry {
    name: String,
    data: Vec<u8>,
    method: u16,
    flags: u16,
    local_extra: Vec<u8>,
}

impl Entry {
    fn payload(&self) -> Vec<u8> {
        match self.method {
            8 => {
                let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
                encoder.write_all(&self.data).unwrap();
                encoder.finish().unwrap()
            }
            93 => zstd::encode_all(&self.data[..], 0).unwrap(),
            // Stored, plus anything the reader should treat as opaque.
            _ => self.data.clone(),
        }
    }
}

pub struct Fixture {
    entries: Vec<Entry>,
    comment: Vec<u8>,
    force_zip64: bool,
    reverse_local_order: bool,
    prepend: Vec<u8>,
    eocdr_disks: (u16, u16),
}

impl Fixture {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            comment: Vec::new(),
            force_zip64: false,
            reverse_local_order: false,
            prepend: Vec::new(),
            eocdr_disks: (0, 0),
        }
    }

    fn push(mut self, name: &str, data: &[u8], method: u16, flags: u16) -> Self {
        self.entries.push(Entry {
            name: name.to_owned(),
            data: data.to_vec(),
            method,
            flags,
            local_extra: Vec::new(),
        });
        self
    }

    pub fn stored(self, name: &str, data: &[u8]) -> Self {
        self.push(name, data, 0, UTF8_FLAG)
    }

    pub fn deflated(self, name: &str, data: &[u8]) -> Self {
        self.push(name, data, 8, UTF8_FLAG)
    }

    pub fn zstd(self, name: &str, data: &[u8]) -> Self {
        self.push(name, data, 93, UTF8_FLAG)
    }

    pub fn dir(self, name: &str) -> Self {
        assert!(name.ends_with('/'));
        self.push(name, b"", 0, UTF8_FLAG)
    }

    pub fn encrypted(self, name: &str, data: &[u8]) -> Self {
        self.push(name, data, 0, UTF8_FLAG | 1)
    }

    /// An entry whose payload is stored as-is under an arbitrary method
    /// id, for exercising the unsupported-method path.
    pub fn with_method(self, name: &str, data: &[u8], method: u16) -> Self {
        self.push(name, data, method, UTF8_FLAG)
    }

    /// Attaches an extended-timestamp extra field to the most recently
    /// added entry's local header.
    pub fn with_unix_mtime(mut self, seconds: u32) -> Self {
        let entry = self.entries.last_mut().expect("no entry to stamp");
        entry.local_extra.extend_from_slice(&0x5455u16.to_le_bytes());
        entry.local_extra.extend_from_slice(&5u16.to_le_bytes());
        entry.local_extra.push(1); // mtime present
        entry.local_extra.extend_from_slice(&seconds.to_le_bytes());
        self
    }

    pub fn comment(mut self, comment: &[u8]) -> Self {
        assert!(comment.len() <= 65535);
        self.comment = comment.to_vec();
        self
    }

    /// Store the sentinel values in the EOCDR and carry the real numbers
    /// in a Zip64 record + locator.
    pub fn force_zip64(mut self) -> Self {
        self.force_zip64 = true;
        self
    }

    /// Write the local headers in reverse central-directory order.
    pub fn reverse_local_order(mut self) -> Self {
        self.reverse_local_order = true;
        self
    }

    /// Foreign bytes in front of the archive (self-extractor stub, etc.).
    pub fn prepend(mut self, junk: &[u8]) -> Self {
        self.prepend = junk.to_vec();
        self
    }

    /// Disk fields to claim in the EOCDR, for spanned-set rejection tests.
    pub fn eocdr_disks(mut self, this_disk: u16, cd_disk: u16) -> Self {
        self.eocdr_disks = (this_disk, cd_disk);
        self
    }

    pub fn build(self) -> Vec<u8> {
        let mut out = self.prepend.clone();
        let base = self.prepend.len() as u64;

        let payloads: Vec<Vec<u8>> = self.entries.iter().map(Entry::payload).collect();
        let crcs: Vec<u32> = self.entries.iter().map(|e| crc32fast::hash(&e.data)).collect();
        let mut local_offsets = vec![0u64; self.entries.len()];

        let write_order: Vec<usize> = if self.reverse_local_order {
            (0..self.entries.len()).rev().collect()
        } else {
            (0..self.entries.len()).collect()
        };

        for &i in &write_order {
            let entry = &self.entries[i];
            local_offsets[i] = out.len() as u64;
            out.extend_from_slice(b"PK\x03\x04");
            out.extend_from_slice(&20u16.to_le_bytes()); // version needed
            out.extend_from_slice(&entry.flags.to_le_bytes());
            out.extend_from_slice(&entry.method.to_le_bytes());
            out.extend_from_slice(&DOS_TIME.to_le_bytes());
            out.extend_from_slice(&DOS_DATE.to_le_bytes());
            out.extend_from_slice(&crcs[i].to_le_bytes());
            out.extend_from_slice(&(payloads[i].len() as u32).to_le_bytes());
            out.extend_from_slice(&(entry.data.len() as u32).to_le_bytes());
            out.extend_from_slice(&(entry.name.len() as u16).to_le_bytes());
            out.extend_from_slice(&(entry.local_extra.len() as u16).to_le_bytes());
            out.extend_from_slice(entry.name.as_bytes());
            out.extend_from_slice(&entry.local_extra);
            out.extend_from_slice(&payloads[i]);
        }

        let cd_start = out.len() as u64;
        for (i, entry) in self.entries.iter().enumerate() {
            out.extend_from_slice(b"PK\x01\x02");
            out.extend_from_slice(&VERSION_MADE_BY.to_le_bytes());
            out.extend_from_slice(&20u16.to_le_bytes()); // version needed
            out.extend_from_slice(&entry.flags.to_le_bytes());
            out.extend_from_slice(&entry.method.to_le_bytes());
            out.extend_from_slice(&DOS_TIME.to_le_bytes());
            out.extend_from_slice(&DOS_DATE.to_le_bytes());
            out.extend_from_slice(&crcs[i].to_le_bytes());
            out.extend_from_slice(&(payloads[i].len() as u32).to_le_bytes());
            out.extend_from_slice(&(entry.data.len() as u32).to_le_bytes());
            out.extend_from_slice(&(entry.name.len() as u16).to_le_bytes());
            out.extend_from_slice(&0u16.to_le_bytes()); // extra len
            out.extend_from_slice(&0u16.to_le_bytes()); // comment len
            out.extend_from_slice(&0u16.to_le_bytes()); // disk start
            out.extend_from_slice(&0u16.to_le_bytes()); // internal attrs
            out.extend_from_slice(&EXTERNAL_ATTRIBUTES.to_le_bytes());
            out.extend_from_slice(&((local_offsets[i] - base) as u32).to_le_bytes());
            out.extend_from_slice(entry.name.as_bytes());
        }
        let cd_size = out.len() as u64 - cd_start;
        let cd_offset = cd_start - base;
        let count = self.entries.len() as u64;
        let (this_disk, cd_disk) = self.eocdr_disks;

        if self.force_zip64 {
            let zip64_offset = out.len() as u64;
            out.extend_from_slice(b"PK\x06\x06");
            out.extend_from_slice(&44u64.to_le_bytes()); // remaining record size
            out.extend_from_slice(&VERSION_MADE_BY.to_le_bytes());
            out.extend_from_slice(&45u16.to_le_bytes()); // version needed
            out.extend_from_slice(&0u32.to_le_bytes()); // this disk
            out.extend_from_slice(&0u32.to_le_bytes()); // cd disk
            out.extend_from_slice(&count.to_le_bytes());
            out.extend_from_slice(&count.to_le_bytes());
            out.extend_from_slice(&cd_size.to_le_bytes());
            out.extend_from_slice(&cd_offset.to_le_bytes());

            out.extend_from_slice(b"PK\x06\x07");
            out.extend_from_slice(&0u32.to_le_bytes()); // disk with zip64 eocdr
            out.extend_from_slice(&(zip64_offset - base).to_le_bytes());
            out.extend_from_slice(&1u32.to_le_bytes()); // total disks

            out.extend_from_slice(b"PK\x05\x06");
            out.extend_from_slice(&this_disk.to_le_bytes());
            out.extend_from_slice(&cd_disk.to_le_bytes());
            out.extend_from_slice(&u16::MAX.to_le_bytes());
            out.extend_from_slice(&u16::MAX.to_le_bytes());
            out.extend_from_slice(&u32::MAX.to_le_bytes());
            out.extend_from_slice(&u32::MAX.to_le_bytes());
        } else {
            assert!(count < u16::MAX as u64, "use force_zip64 for huge fixtures");
            out.extend_from_slice(b"PK\x05\x06");
            out.extend_from_slice(&this_disk.to_le_bytes());
            out.extend_from_slice(&cd_disk.to_le_bytes());
            out.extend_from_slice(&(count as u16).to_le_bytes());
            out.extend_from_slice(&(count as u16).to_le_bytes());
            out.extend_from_slice(&(cd_size as u32).to_le_bytes());
            out.extend_from_slice(&(cd_offset as u32).to_le_bytes());
        }
        out.extend_from_slice(&(self.comment.len() as u16).to_le_bytes());
        out.extend_from_slice(&self.comment);
        out
    }
}
