//! Compression method ids, per-entry codec options, and the registry
//! that dispatches between the two codec shapes.
//!
//! A codec is either *stream-native* — it wraps one stream in another,
//! like flate2's decoder — or *whole-operation* — it exposes a single
//! blocking call that drives both ends itself. The shape is fixed when
//! the codec is registered, and decode dispatch either composes streams
//! directly or runs the blocking call behind a [`bridge`](crate::bridge)
//! on a background thread.

use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::sync::{Arc, OnceLock};
use std::thread;

use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use log::*;

use crate::bridge;
use crate::result::*;

/// The compression method used to store a file
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum CompressionMethod {
    /// The file is uncompressed
    Stored,
    /// The file is [DEFLATE](https://en.wikipedia.org/wiki/DEFLATE)d.
    /// This is the most common format used by ZIP archives.
    Deflate,
    /// Deflate with a 64 KB window ("enhanced deflate")
    Deflate64,
    Bzip2,
    Lzma,
    Ppmd,
    Zstd,
    /// A method this build has no registered codec for.
    /// (The u16 indicates the internal format code.)
    Unsupported(u16),
}

impl CompressionMethod {
    pub fn from_u16(u: u16) -> Self {
        match u {
            0 => CompressionMethod::Stored,
            8 => CompressionMethod::Deflate,
            9 => CompressionMethod::Deflate64,
            12 => CompressionMethod::Bzip2,
            14 => CompressionMethod::Lzma,
            93 => CompressionMethod::Zstd,
            98 => CompressionMethod::Ppmd,
            v => CompressionMethod::Unsupported(v),
        }
    }

    pub fn as_u16(self) -> u16 {
        match self {
            CompressionMethod::Stored => 0,
            CompressionMethod::Deflate => 8,
            CompressionMethod::Deflate64 => 9,
            CompressionMethod::Bzip2 => 12,
            CompressionMethod::Lzma => 14,
            CompressionMethod::Zstd => 93,
            CompressionMethod::Ppmd => 98,
            CompressionMethod::Unsupported(v) => v,
        }
    }
}

/// The Deflate preset the archiver declared in the general-purpose flags.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum DeflateLevel {
    #[default]
    Normal,
    Maximum,
    Fast,
    SuperFast,
}

impl DeflateLevel {
    /// 4.4.4: For Methods 8 and 9, bits 1 and 2 indicate which of the
    /// four presets was used.
    pub fn from_flags(flags: u16) -> Self {
        match (flags >> 1) & 0b11 {
            0b00 => DeflateLevel::Normal,
            0b01 => DeflateLevel::Maximum,
            0b10 => DeflateLevel::Fast,
            _ => DeflateLevel::SuperFast,
        }
    }

    pub fn compression(self) -> Compression {
        match self {
            DeflateLevel::Normal => Compression::new(6),
            DeflateLevel::Maximum => Compression::new(9),
            DeflateLevel::Fast => Compression::new(2),
            DeflateLevel::SuperFast => Compression::new(1),
        }
    }
}

/// The fixed per-entry option value derived from
/// (compression method, general-purpose flags).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CodecOptions {
    None,
    Deflate(DeflateLevel),
    /// For LZMA, bit 1 means the stream carries an end-of-stream marker
    /// instead of relying on the stored size.
    Lzma { eos_marker: bool },
}

impl CodecOptions {
    pub fn for_entry(method: CompressionMethod, flags: u16) -> Self {
        match method {
            CompressionMethod::Deflate | CompressionMethod::Deflate64 => {
                CodecOptions::Deflate(DeflateLevel::from_flags(flags))
            }
            CompressionMethod::Lzma => CodecOptions::Lzma {
                eos_marker: flags & 0b10 != 0,
            },
            _ => CodecOptions::None,
        }
    }
}

/// A codec that composes as a stream transform.
pub trait StreamCodec: Send + Sync {
    /// Wraps `input` in a stream yielding the decoded bytes.
    fn decode_stream(
        &self,
        input: Box<dyn Read + Send>,
        options: CodecOptions,
    ) -> ZipResult<Box<dyn Read + Send>>;

    /// Wraps `output` in a stream accepting raw bytes and writing the
    /// encoded form through.
    fn encode_stream(
        &self,
        output: Box<dyn Write + Send>,
        options: CodecOptions,
    ) -> ZipResult<Box<dyn Write + Send>>;
}

/// A codec exposing only one blocking call over whole streams.
pub trait WholeCodec: Send + Sync {
    fn decode(
        &self,
        input: &mut dyn Read,
        output: &mut dyn Write,
        options: CodecOptions,
    ) -> ZipResult<()>;

    fn encode(
        &self,
        input: &mut dyn Read,
        output: &mut dyn Write,
        options: CodecOptions,
    ) -> ZipResult<()>;
}

/// The two codec shapes, fixed at registration time.
#[derive(Clone)]
pub enum Codec {
    Stream(Arc<dyn StreamCodec>),
    Whole(Arc<dyn WholeCodec>),
}

/// Maps method ids to codec implementations.
///
/// Registration happens at startup; registering two codecs for one id is
/// a configuration error, not something to recover from at read time.
pub struct CodecRegistry {
    codecs: HashMap<u16, Codec>,
    bridge_capacity: usize,
}

impl CodecRegistry {
    /// An empty registry. Useful for callers that want full control over
    /// the codec set.
    pub fn new() -> Self {
        Self {
            codecs: HashMap::new(),
            bridge_capacity: bridge::DEFAULT_CAPACITY,
        }
    }

    /// A registry with the built-in codecs: Stored, Deflate, and Zstd.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry
            .register(CompressionMethod::Stored, Codec::Stream(Arc::new(StoredCodec)))
            .expect("empty registry can't hold Stored yet");
        registry
            .register(CompressionMethod::Deflate, Codec::Stream(Arc::new(DeflateCodec)))
            .expect("empty registry can't hold Deflate yet");
        registry
            .register(CompressionMethod::Zstd, Codec::Whole(Arc::new(ZstdCodec)))
            .expect("empty registry can't hold Zstd yet");
        registry
    }

    /// The process-wide registry used by `ZipArchive::new`.
    pub fn global() -> &'static Arc<CodecRegistry> {
        static GLOBAL: OnceLock<Arc<CodecRegistry>> = OnceLock::new();
        GLOBAL.get_or_init(|| Arc::new(CodecRegistry::with_defaults()))
    }

    /// Registers a codec for a method id.
    pub fn register(&mut self, method: CompressionMethod, codec: Codec) -> ZipResult<()> {
        let id = method.as_u16();
        if self.codecs.contains_key(&id) {
            return Err(ZipError::DuplicateCodec(id));
        }
        self.codecs.insert(id, codec);
        Ok(())
    }

    pub fn is_registered(&self, method: CompressionMethod) -> bool {
        self.codecs.contains_key(&method.as_u16())
    }

    /// Queue capacity used when a whole-operation codec needs a bridge.
    pub fn set_bridge_capacity(&mut self, capacity: usize) {
        self.bridge_capacity = capacity;
    }

    /// Builds the decoding stream for one entry's bounded payload view.
    pub fn decoding_stream(
        &self,
        method: CompressionMethod,
        flags: u16,
        input: Box<dyn Read + Send>,
    ) -> ZipResult<Box<dyn Read + Send>> {
        let options = CodecOptions::for_entry(method, flags);
        match self.codecs.get(&method.as_u16()) {
            None => Err(ZipError::UnsupportedMethod(method.as_u16())),
            Some(Codec::Stream(codec)) => codec.decode_stream(input, options),
            Some(Codec::Whole(codec)) => {
                // The blocking call drives both ends itself; run it behind
                // a bridge so the caller still gets an incremental stream.
                let (mut writer, reader) = bridge::byte_bridge(self.bridge_capacity);
                let codec = Arc::clone(codec);
                let mut input = input;
                thread::Builder::new()
                    .name(format!("spanzip-decode-{}", method.as_u16()))
                    .spawn(move || {
                        // A failure here only starves the bridge: the
                        // consumer sees an early end of stream, and the
                        // CRC/size check reports the real problem.
                        if let Err(err) = codec.decode(&mut input, &mut writer, options) {
                            warn!("background decode failed: {err}");
                        }
                    })
                    .map_err(ZipError::Io)?;
                Ok(Box::new(reader))
            }
        }
    }

    /// Builds the encoding stream writing through to `output`.
    /// Symmetric to [`decoding_stream`](Self::decoding_stream) with the
    /// signals reversed.
    pub fn encoding_stream(
        &self,
        method: CompressionMethod,
        flags: u16,
        output: Box<dyn Write + Send>,
    ) -> ZipResult<Box<dyn Write + Send>> {
        let options = CodecOptions::for_entry(method, flags);
        match self.codecs.get(&method.as_u16()) {
            None => Err(ZipError::UnsupportedMethod(method.as_u16())),
            Some(Codec::Stream(codec)) => codec.encode_stream(output, options),
            Some(Codec::Whole(codec)) => {
                let (writer, mut reader) = bridge::byte_bridge(self.bridge_capacity);
                let codec = Arc::clone(codec);
                let mut output = output;
                thread::Builder::new()
                    .name(format!("spanzip-encode-{}", method.as_u16()))
                    .spawn(move || {
                        if let Err(err) = codec.encode(&mut reader, &mut output, options) {
                            warn!("background encode failed: {err}");
                        }
                    })
                    .map_err(ZipError::Io)?;
                Ok(Box::new(writer))
            }
        }
    }
}

impl Default for CodecRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Method 0: the payload already is the content.
struct StoredCodec;

impl StreamCodec for StoredCodec {
    fn decode_stream(
        &self,
        input: Box<dyn Read + Send>,
        _options: CodecOptions,
    ) -> ZipResult<Box<dyn Read + Send>> {
        Ok(input)
    }

    fn encode_stream(
        &self,
        output: Box<dyn Write + Send>,
        _options: CodecOptions,
    ) -> ZipResult<Box<dyn Write + Send>> {
        Ok(output)
    }
}

/// Method 8: raw deflate streams via flate2.
struct DeflateCodec;

impl StreamCodec for DeflateCodec {
    fn decode_stream(
        &self,
        input: Box<dyn Read + Send>,
        _options: CodecOptions,
    ) -> ZipResult<Box<dyn Read + Send>> {
        Ok(Box::new(DeflateDecoder::new(input)))
    }

    fn encode_stream(
        &self,
        output: Box<dyn Write + Send>,
        options: CodecOptions,
    ) -> ZipResult<Box<dyn Write + Send>> {
        let level = match options {
            CodecOptions::Deflate(level) => level.compression(),
            _ => Compression::default(),
        };
        Ok(Box::new(DeflateEncoder::new(output, level)))
    }
}

/// Method 93: zstd, whose stream copy calls drive both ends themselves.
struct ZstdCodec;

impl WholeCodec for ZstdCodec {
    fn decode(
        &self,
        input: &mut dyn Read,
        output: &mut dyn Write,
        _options: CodecOptions,
    ) -> ZipResult<()> {
        zstd::stream::copy_decode(input, output).map_err(ZipError::Io)
    }

    fn encode(
        &self,
        input: &mut dyn Read,
        output: &mut dyn Write,
        _options: CodecOptions,
    ) -> ZipResult<()> {
        zstd::stream::copy_encode(input, output, 0).map_err(ZipError::Io)
    }
}
