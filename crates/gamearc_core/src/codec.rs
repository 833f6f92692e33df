//! Lazy decryption and decompression of entry data.
//!
//! An entry's [`CodecPipeline`] lists the transforms to undo when its bytes are materialized,
//! decryption first and decompression after. Nothing is decoded while the directory is parsed;
//! [`PipelineReader`] stacks the transforms as [`Read`] adapters over the stored range and pulls
//! bytes through them on demand.

use std::io::{self, Cursor, Read, Write};

use cipher::{consts, KeyInit, KeySizeUser, StreamCipher};
use flate2::{
    read::{DeflateDecoder, ZlibDecoder},
    write::{DeflateEncoder, ZlibEncoder},
    Compression,
};
use tracing::instrument;

use crate::{
    cursor::ByteCursor,
    error::{Error, Result},
};

/// A single reversible transform applied to stored bytes
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum Transform {
    /// XOR with a repeating key, aligned to the first stored byte
    Xor {
        #[cfg_attr(feature = "serde", serde(skip))]
        key: Box<[u8]>,
    },
    /// RC4 keystream
    Rc4 {
        #[cfg_attr(feature = "serde", serde(skip))]
        key: Box<[u8]>,
    },
    /// zlib wrapped deflate
    Zlib,
    /// raw deflate without a zlib header
    Deflate,
}

impl Transform {
    pub fn xor(key: impl Into<Box<[u8]>>) -> Transform {
        Transform::Xor { key: key.into() }
    }

    pub fn rc4(key: impl Into<Box<[u8]>>) -> Transform {
        Transform::Rc4 { key: key.into() }
    }

    /// Whether the transform changes the data length
    pub fn is_compression(&self) -> bool {
        matches!(self, Transform::Zlib | Transform::Deflate)
    }
}

/// The ordered transforms that turn stored bytes into entry content
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct CodecPipeline(Vec<Transform>);

impl CodecPipeline {
    /// The empty pipeline, stored bytes are the content
    pub fn identity() -> CodecPipeline {
        CodecPipeline::default()
    }

    /// Append a transform. Decryption must be added before decompression.
    pub fn then(mut self, transform: Transform) -> CodecPipeline {
        self.0.push(transform);
        self
    }

    pub fn is_identity(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether any step changes the data length
    pub fn is_compressed(&self) -> bool {
        self.0.iter().any(Transform::is_compression)
    }

    pub fn transforms(&self) -> &[Transform] {
        &self.0
    }
}

impl From<Transform> for CodecPipeline {
    fn from(value: Transform) -> Self {
        CodecPipeline(vec![value])
    }
}

/// Repeating-key XOR over a reader
pub struct XorReader<R> {
    inner: R,
    key: Box<[u8]>,
    position: usize,
}

impl<R: Read> XorReader<R> {
    pub fn new(inner: R, key: Box<[u8]>) -> Result<Self> {
        if key.is_empty() {
            return Err(Error::variant("empty xor key"));
        }
        Ok(XorReader {
            inner,
            key,
            position: 0,
        })
    }
}

impl<R: Read> Read for XorReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let read = self.inner.read(buf)?;
        for byte in &mut buf[..read] {
            *byte ^= self.key[self.position % self.key.len()];
            self.position += 1;
        }
        Ok(read)
    }
}

/// Build an [`rc4::Rc4`] for whichever key length `$key` has
macro_rules! keyed_rc4 {
    ($key:expr; $($size:ident)*) => {
        $(
            if $key.len() == <rc4::Rc4<consts::$size> as KeySizeUser>::key_size() {
                let cipher = rc4::Rc4::<consts::$size>::new_from_slice($key)
                    .map_err(|_| Error::variant(format!("{} byte rc4 key", $key.len())))?;
                return Ok(Rc4 { cipher: Box::new(cipher) });
            }
        )*
    };
}

/// RC4 keystream for a key of 1 to 256 bytes
pub struct Rc4 {
    cipher: Box<dyn StreamCipher + Send>,
}

impl Rc4 {
    pub fn new(key: &[u8]) -> Result<Rc4> {
        keyed_rc4!(key;
        U1 U2 U3 U4 U5 U6 U7 U8 U9 U10 U11 U12 U13 U14 U15 U16
        U17 U18 U19 U20 U21 U22 U23 U24 U25 U26 U27 U28 U29 U30 U31 U32
        U33 U34 U35 U36 U37 U38 U39 U40 U41 U42 U43 U44 U45 U46 U47 U48
        U49 U50 U51 U52 U53 U54 U55 U56 U57 U58 U59 U60 U61 U62 U63 U64
        U65 U66 U67 U68 U69 U70 U71 U72 U73 U74 U75 U76 U77 U78 U79 U80
        U81 U82 U83 U84 U85 U86 U87 U88 U89 U90 U91 U92 U93 U94 U95 U96
        U97 U98 U99 U100 U101 U102 U103 U104 U105 U106 U107 U108 U109 U110 U111 U112
        U113 U114 U115 U116 U117 U118 U119 U120 U121 U122 U123 U124 U125 U126 U127 U128
        U129 U130 U131 U132 U133 U134 U135 U136 U137 U138 U139 U140 U141 U142 U143 U144
        U145 U146 U147 U148 U149 U150 U151 U152 U153 U154 U155 U156 U157 U158 U159 U160
        U161 U162 U163 U164 U165 U166 U167 U168 U169 U170 U171 U172 U173 U174 U175 U176
        U177 U178 U179 U180 U181 U182 U183 U184 U185 U186 U187 U188 U189 U190 U191 U192
        U193 U194 U195 U196 U197 U198 U199 U200 U201 U202 U203 U204 U205 U206 U207 U208
        U209 U210 U211 U212 U213 U214 U215 U216 U217 U218 U219 U220 U221 U222 U223 U224
        U225 U226 U227 U228 U229 U230 U231 U232 U233 U234 U235 U236 U237 U238 U239 U240
        U241 U242 U243 U244 U245 U246 U247 U248 U249 U250 U251 U252 U253 U254 U255 U256
        );
        Err(Error::variant(format!("{} byte rc4 key", key.len())))
    }

    /// XOR the keystream into `data`; encryption and decryption are the same operation
    pub fn apply(&mut self, data: &mut [u8]) {
        self.cipher.apply_keystream(data);
    }
}

/// RC4 decryption over a reader
pub struct Rc4Reader<R> {
    inner: R,
    cipher: Rc4,
}

impl<R: Read> Rc4Reader<R> {
    pub fn new(inner: R, key: &[u8]) -> Result<Self> {
        Ok(Rc4Reader {
            inner,
            cipher: Rc4::new(key)?,
        })
    }
}

impl<R: Read> Read for Rc4Reader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let read = self.inner.read(buf)?;
        self.cipher.apply(&mut buf[..read]);
        Ok(read)
    }
}

/// Pull-based reader producing an entry's decoded content
pub struct PipelineReader<'a> {
    inner: io::Take<Box<dyn Read + 'a>>,
}

impl<'a> PipelineReader<'a> {
    /// Wrap `source`, which must already be positioned at the entry's first stored byte
    #[instrument(skip(source))]
    pub fn new<R: Read + 'a>(
        source: R,
        stored_length: u64,
        decoded_length: u64,
        pipeline: &CodecPipeline,
    ) -> Result<PipelineReader<'a>> {
        let mut reader: Box<dyn Read + 'a> = Box::new(source.take(stored_length));
        for transform in pipeline.transforms() {
            reader = match transform {
                Transform::Xor { key } => Box::new(XorReader::new(reader, key.clone())?),
                Transform::Rc4 { key } => Box::new(Rc4Reader::new(reader, key)?),
                Transform::Zlib => Box::new(ZlibDecoder::new(reader)),
                Transform::Deflate => Box::new(DeflateDecoder::new(reader)),
            };
        }
        Ok(PipelineReader {
            inner: reader.take(decoded_length),
        })
    }

    /// Decoded bytes still expected from this reader
    pub fn remaining(&self) -> u64 {
        self.inner.limit()
    }
}

impl Read for PipelineReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let read = self.inner.read(buf)?;
        if read == 0 && !buf.is_empty() && self.inner.limit() > 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("entry data ended {} bytes early", self.inner.limit()),
            ));
        }
        Ok(read)
    }
}

/// Decode a whole block into memory.
///
/// This is how encrypted or compressed directories are read: the returned bytes are wrapped in
/// [`ByteCursor::from_bytes`] and parsed with the same record code as a plain directory.
#[instrument(skip(cursor, pipeline), err)]
pub fn decode_block(
    cursor: &mut ByteCursor,
    offset: u64,
    stored_length: u64,
    decoded_length: u64,
    pipeline: &CodecPipeline,
) -> Result<Vec<u8>> {
    cursor.check_range("block range", offset, stored_length)?;
    if !pipeline.is_compressed() && decoded_length > stored_length {
        return Err(Error::structural(
            "decoded block length",
            decoded_length,
            stored_length,
        ));
    }
    cursor.seek(offset)?;

    let mut reader = PipelineReader::new(cursor.by_ref(), stored_length, decoded_length, pipeline)?;
    let mut block = Vec::new();
    reader.read_to_end(&mut block)?;
    Ok(block)
}

/// Apply a pipeline in the encoding direction: compress first, then encrypt
pub fn encode_block(data: &[u8], pipeline: &CodecPipeline) -> Result<Vec<u8>> {
    let mut block = data.to_vec();
    for transform in pipeline.transforms().iter().rev() {
        block = match transform {
            Transform::Xor { key } => {
                let mut reader = XorReader::new(Cursor::new(block), key.clone())?;
                let mut out = Vec::new();
                reader.read_to_end(&mut out)?;
                out
            }
            Transform::Rc4 { key } => {
                Rc4::new(key)?.apply(&mut block);
                block
            }
            Transform::Zlib => {
                let mut writer = BlockWriter::new(Cursor::new(Vec::new()), BlockEncoding::Zlib);
                writer.write_all(&block)?;
                writer.finalize()?.into_inner()
            }
            Transform::Deflate => {
                let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
                encoder.write_all(&block)?;
                encoder.finish()?
            }
        };
    }
    Ok(block)
}

/// Whether `header` starts with a valid zlib stream header
pub fn looks_like_zlib(header: &[u8]) -> bool {
    let [cmf, flg, ..] = *header else {
        return false;
    };
    let method_is_deflate = (cmf & 0x0F) == 8;
    let window_is_valid = (cmf >> 4) <= 7;
    let check_bits_match = ((u16::from(cmf) << 8) | u16::from(flg)) % 31 == 0;
    method_is_deflate && window_is_valid && check_bits_match
}

/// How a [`BlockWriter`] stores what it is given
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub enum BlockEncoding {
    /// Stores the data as it is
    #[default]
    Stored,

    /// Compress the data using Zlib
    Zlib,
}

/// Streaming writer for one block of an archive being built
pub enum BlockWriter<W: Write> {
    Raw(W, usize),
    Compressed(Box<ZlibEncoder<W>>),
}

impl<W: Write> BlockWriter<W> {
    #[tracing::instrument(skip(writer))]
    pub fn new(writer: W, encoding: BlockEncoding) -> Self {
        match encoding {
            BlockEncoding::Stored => BlockWriter::Raw(writer, 0),
            BlockEncoding::Zlib => BlockWriter::Compressed(Box::new(ZlibEncoder::new(
                writer,
                Compression::default(),
            ))),
        }
    }

    #[instrument(skip(self), err)]
    pub fn finalize(self) -> io::Result<W> {
        match self {
            BlockWriter::Raw(r, _) => Ok(r),
            BlockWriter::Compressed(r) => r.finish(),
        }
    }

    /// Bytes accepted so far, before compression
    pub fn total_in(&self) -> u64 {
        match self {
            BlockWriter::Raw(_, c) => *c as u64,
            BlockWriter::Compressed(r) => r.total_in(),
        }
    }
}

impl<W: Write> Write for BlockWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            BlockWriter::Raw(r, c) => {
                let written = r.write(buf)?;
                *c += written;
                Ok(written)
            }
            BlockWriter::Compressed(r) => r.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            BlockWriter::Raw(r, _) => r.flush(),
            BlockWriter::Compressed(r) => r.flush(),
        }
    }
}
