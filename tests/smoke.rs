use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};

use anyhow::{Context, Result};
use rayon::prelude::*;

use spanzip::result::ZipError;
use spanzip::{CompressionMethod, EntryVerdict, ZipArchive};

mod util;
use util::Fixture;

const WAR_AND_PEACE: &str =
    "Well, Prince, so Genoa and Lucca are now just family estates of the Buonapartes. ";

#[test]
fn smoke() -> Result<()> {
    let _ = env_logger::builder().is_test(true).try_init();

    let text = WAR_AND_PEACE.repeat(500);
    let blob: Vec<u8> = (0..100_000u32).map(|i| (i % 241) as u8).collect();

    let bytes = Fixture::new()
        .dir("docs/")
        .stored("docs/hi.txt", b"hello there\n")
        .deflated("docs/war_and_peace.txt", text.as_bytes())
        .zstd("blob.bin", &blob)
        .stored("stamped.txt", b"mtime me")
        .with_unix_mtime(1_000_000_000)
        .encrypted("secret.txt", b"classified")
        .with_method("odd.bin", b"who knows", 98)
        .build();

    // Open through a real file as well as from memory; both views of the
    // same bytes must agree.
    let mut file = tempfile::tempfile().context("couldn't create a temp file")?;
    file.write_all(&bytes)?;
    file.seek(SeekFrom::Start(0))?;
    let archive = ZipArchive::new(file).context("couldn't open the file-backed archive")?;
    let from_memory = ZipArchive::new(Cursor::new(bytes))?;
    assert_eq!(archive.entries(), from_memory.entries());

    let entries = archive.entries();
    assert_eq!(entries.len(), 7);

    let lookup = |name: &str| {
        entries
            .iter()
            .find(|e| e.path.as_str() == name)
            .unwrap_or_else(|| panic!("no entry named {name}"))
    };

    let dir = lookup("docs/");
    assert!(dir.is_dir());
    assert_eq!(dir.method, CompressionMethod::Stored);

    let hi = lookup("docs/hi.txt");
    assert!(hi.is_file());
    assert_eq!(hi.size, 12);
    assert_eq!(hi.unix_mode, Some(0o100644));

    let war = lookup("docs/war_and_peace.txt");
    assert_eq!(war.method, CompressionMethod::Deflate);
    assert_eq!(war.size, text.len() as u64);
    assert!(war.compressed_size < war.size);

    let stamped = lookup("stamped.txt");
    assert_eq!(
        stamped.last_modified,
        chrono::DateTime::from_timestamp(1_000_000_000, 0)
            .unwrap()
            .naive_utc()
    );

    // Contents come back intact, through every codec shape.
    let mut contents = Vec::new();
    archive.read(hi)?.read_to_end(&mut contents)?;
    assert_eq!(contents, b"hello there\n");

    contents.clear();
    archive.read(war)?.read_to_end(&mut contents)?;
    assert_eq!(contents, text.as_bytes());

    contents.clear();
    archive.read(lookup("blob.bin"))?.read_to_end(&mut contents)?;
    assert_eq!(contents, blob);

    // Readers are `Send`; drain everything readable in parallel.
    // (Each reader checks its CRC32 when it reaches the end.)
    entries
        .iter()
        .filter(|e| e.is_file() && !e.encrypted && e.method != CompressionMethod::Ppmd)
        .map(|e| archive.read(e))
        .par_bridge()
        .try_for_each::<_, Result<()>>(|reader| {
            let mut sink = io::sink();
            io::copy(&mut reader?, &mut sink)?;
            Ok(())
        })?;

    // Encryption is detected, typed, and scoped to the entry.
    let secret = lookup("secret.txt");
    assert!(secret.encrypted);
    match archive.read(secret) {
        Err(ZipError::Encrypted { path }) => assert_eq!(path, secret.path),
        other => panic!("expected Encrypted, got {:?}", other.map(|_| ())),
    }
    assert_eq!(archive.verify(secret), EntryVerdict::Encrypted);

    // Same for a method nothing is registered for.
    let odd = lookup("odd.bin");
    assert_eq!(odd.method, CompressionMethod::Ppmd);
    match archive.read(odd) {
        Err(ZipError::UnsupportedMethod(98)) => {}
        other => panic!("expected UnsupportedMethod, got {:?}", other.map(|_| ())),
    }
    assert_eq!(archive.verify(odd), EntryVerdict::UnsupportedCompressionMethod);

    // ...and neither stops the rest of the sweep.
    for entry in entries {
        if entry == secret || entry == odd {
            continue;
        }
        assert_eq!(archive.verify(entry), EntryVerdict::Ok, "{}", entry.path);
    }

    // The raw payload view is random-access over the compressed bytes.
    let mut raw = archive.read_raw(hi)?;
    assert_eq!(raw.len(), hi.compressed_size);
    raw.seek(SeekFrom::Start(6))?;
    let mut tail = String::new();
    raw.read_to_string(&mut tail)?;
    assert_eq!(tail, "there\n");

    Ok(())
}

#[test]
fn empty_archive() -> Result<()> {
    let bytes = Fixture::new().build();
    assert_eq!(bytes.len(), 22);
    let archive = ZipArchive::new(Cursor::new(bytes))?;
    assert!(archive.entries().is_empty());
    assert!(archive.comment().is_empty());
    Ok(())
}
