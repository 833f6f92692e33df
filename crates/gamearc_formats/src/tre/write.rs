//! Types for writing TRE archives
//!

use std::io::{self, Cursor, Seek, Write};

use binrw::{io::NoSeek, BinWrite};
use bon::Builder;
use byteorder::WriteBytesExt;
use gamearc_core::{
    codec::BlockWriter,
    encode::to_u32,
    error::{Error, Result},
};
use md5::{Digest, Md5};
use tracing::{instrument, Level};

use crate::tre::types::{name_checksum, CompressionMethod, TreHeader, TreRecord, HEADER_SIZE, RECORD_SIZE};

/// Options for how the TRE file should be written
#[derive(Debug, Clone, Copy, Builder)]
pub struct TreWriterOptions {
    /// The compression method to use for the record block
    #[builder(default)]
    pub record_compression: CompressionMethod,

    /// The compression method to use for the name block
    #[builder(default)]
    pub name_compression: CompressionMethod,
}

/// TRE archive generator
///
/// ```
/// # fn doit() -> gamearc_core::error::Result<()>
/// # {
/// use std::io::Write;
/// use gamearc_formats::tre::{CompressionMethod, TreWriter, TreWriterOptions};
///
/// let mut tre = TreWriter::new(std::io::Cursor::new(Vec::new()), TreWriterOptions::builder()
///            .name_compression(CompressionMethod::None)
///            .record_compression(CompressionMethod::None)
///            .build());
///
/// tre.start_file("hello_world.txt", CompressionMethod::None)?;
/// tre.write_all(b"Hello, World!")?;
///
/// let bytes = tre.finish()?.into_inner();
/// assert_eq!(&bytes[..4], b"EERT");
/// # Ok(())
/// # }
/// # doit().unwrap();
/// ```
pub struct TreWriter<W: Write + Seek> {
    inner: W,
    record_block: BlockWriter<Cursor<Vec<u8>>>,
    data_block: Vec<u8>,
    name_block: BlockWriter<Cursor<Vec<u8>>>,
    hash_block: Vec<u8>,
    current_file: Option<BlockWriter<Cursor<Vec<u8>>>>,
    header: TreHeader,
    record: TreRecord,
}

impl<W: Write + Seek> TreWriter<W> {
    /// Initializes the archive.
    ///
    /// Before writing to this object, the [`TreWriter::start_file`] function should be called.
    pub fn new(inner: W, options: TreWriterOptions) -> TreWriter<W> {
        TreWriter {
            inner,
            record_block: BlockWriter::new(
                Cursor::new(Vec::new()),
                options.record_compression.encoding(),
            ),
            data_block: Vec::new(),
            name_block: BlockWriter::new(Cursor::new(Vec::new()), options.name_compression.encoding()),
            hash_block: Vec::new(),
            current_file: None,
            header: TreHeader {
                record_compression: options.record_compression,
                name_compression: options.name_compression,
                ..Default::default()
            },
            record: TreRecord::default(),
        }
    }

    /// Returns true if a file is currently open for writing.
    pub const fn is_writing_file(&self) -> bool {
        self.current_file.is_some()
    }

    /// Start a new file with the requested compression.
    #[instrument(skip(self), err)]
    pub fn start_file(&mut self, name: &str, compression: CompressionMethod) -> Result<()> {
        if self.is_writing_file() {
            self.finish_file()?;
        }

        self.current_file = Some(BlockWriter::new(Cursor::new(Vec::new()), compression.encoding()));
        self.header.records += 1;

        self.record.data_compression = compression;
        self.record.checksum = name_checksum(name);
        self.record.data_offset = to_u32("data offset", HEADER_SIZE as u64 + self.data_block.len() as u64)?;
        self.record.name_offset = to_u32("name offset", self.name_block.total_in())?;

        self.name_block.write_all(name.as_bytes())?;
        self.name_block.write_u8(0u8)?;

        Ok(())
    }

    #[instrument(skip(self), err)]
    fn finish_file(&mut self) -> Result<()> {
        let current = self
            .current_file
            .take()
            .ok_or_else(|| Error::CustomError("no file has been started".into()))?;

        let total_in = current.total_in();
        let stored = current.finalize()?.into_inner();

        self.record.data_uncompressed = to_u32("entry size", total_in)?;
        self.record.data_compressed = to_u32("stored entry size", stored.len() as u64)?;
        self.record.write(&mut NoSeek::new(&mut self.record_block))?;

        self.hash_block.extend_from_slice(&Md5::digest(&stored));
        self.data_block.extend_from_slice(&stored);

        Ok(())
    }

    /// Finish the last file and write all other TRE file structures
    ///
    /// This will return the writer, but one should normally not append any data to the end of the file.
    #[instrument(skip(self), err)]
    pub fn finish(mut self) -> Result<W> {
        if self.is_writing_file() {
            self.finish_file()?;
        }

        self.header.record_start = to_u32("record offset", HEADER_SIZE as u64 + self.data_block.len() as u64)?;

        let record_block = self.record_block.finalize()?.into_inner();
        self.header.record_compressed = if self.header.record_compression == CompressionMethod::None {
            self.header.records * RECORD_SIZE
        } else {
            to_u32("record block size", record_block.len() as u64)?
        };

        self.header.name_uncompressed = to_u32("name block size", self.name_block.total_in())?;
        let name_block = self.name_block.finalize()?.into_inner();
        self.header.name_compressed = to_u32("stored name block size", name_block.len() as u64)?;

        self.header.write(&mut self.inner)?;
        self.inner.write_all(&self.data_block)?;
        self.inner.write_all(&record_block)?;
        self.inner.write_all(&name_block)?;
        self.inner.write_all(&self.hash_block)?;

        Ok(self.inner)
    }
}

impl<W: Write + Seek> Write for TreWriter<W> {
    #[instrument(skip_all, err, ret(level = Level::TRACE), fields(size = buf.len()))]
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.current_file.as_mut() {
            Some(file) => file.write(buf),
            None => Err(io::Error::new(io::ErrorKind::Other, "No file has been started")),
        }
    }

    #[instrument(skip(self), err)]
    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_str_eq;
    use tracing_test::traced_test;

    use gamearc_core::error::Result;
    use std::io::{Cursor, Write};

    use crate::tre::{
        types::CompressionMethod,
        write::{TreWriter, TreWriterOptions},
    };

    fn uncompressed() -> TreWriterOptions {
        TreWriterOptions::builder()
            .record_compression(CompressionMethod::None)
            .name_compression(CompressionMethod::None)
            .build()
    }

    #[traced_test]
    #[test]
    fn tre_uncompressed_empty_write() -> Result<()> {
        #[rustfmt::skip]
        let expected = vec![
            // Header
            0x45, 0x45, 0x52, 0x54, 0x35, 0x30, 0x30, 0x30,
            0x00, 0x00, 0x00, 0x00,
            0x24, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00,
        ];

        let result = TreWriter::new(Cursor::new(Vec::new()), uncompressed()).finish()?;
        assert_str_eq!(
            format!("{:02X?}", *result.get_ref()),
            format!("{:02X?}", expected)
        );

        Ok(())
    }

    #[traced_test]
    #[test]
    fn tre_compressed_empty_write() -> Result<()> {
        #[rustfmt::skip]
        let expected = vec![
            // Header
            0x45, 0x45, 0x52, 0x54, 0x35, 0x30, 0x30, 0x30,
            0x00, 0x00, 0x00, 0x00,
            0x24, 0x00, 0x00, 0x00,
            0x02, 0x00, 0x00, 0x00,
            0x08, 0x00, 0x00, 0x00,
            0x02, 0x00, 0x00, 0x00,
            0x08, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00,
            // Records
            0x78, 0x9C, 0x03, 0x00, 0x00, 0x00, 0x00, 0x01,
            // Names
            0x78, 0x9C, 0x03, 0x00, 0x00, 0x00, 0x00, 0x01,
        ];

        let writer = TreWriter::new(
            Cursor::new(Vec::new()),
            TreWriterOptions::builder()
                .record_compression(CompressionMethod::Zlib)
                .name_compression(CompressionMethod::Zlib)
                .build(),
        );
        let result = writer.finish()?;
        assert_str_eq!(
            format!("{:02X?}", *result.get_ref()),
            format!("{:02X?}", expected)
        );

        Ok(())
    }

    #[traced_test]
    #[test]
    fn tre_uncompressed_with_data_write() -> Result<()> {
        #[rustfmt::skip]
        let expected = [
            // Header
            0x45, 0x45, 0x52, 0x54, 0x35, 0x30, 0x30, 0x30,
            0x01, 0x00, 0x00, 0x00,
            0x2F, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00,
            0x18, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00,
            0x0A, 0x00, 0x00, 0x00,
            0x0A, 0x00, 0x00, 0x00,
            // Data
            0x48, 0x65, 0x6C, 0x6C, 0x6F, 0x20, 0x57, 0x6F, 0x72, 0x6C, 0x64,
            // Records
            0xAA, 0x30, 0x7E, 0x52,
            0x0B, 0x00, 0x00, 0x00,
            0x24, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00,
            0x0B, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00,
            // Names
            0x68, 0x65, 0x6C, 0x6C, 0x6F, 0x2E, 0x74, 0x78, 0x74, 0x00,
            // Hashes
            0xB1, 0x0A, 0x8D, 0xB1, 0x64, 0xE0, 0x75, 0x41, 0x05, 0xB7, 0xA9, 0x9B, 0xE7, 0x2E, 0x3F, 0xE5,
        ];

        let mut writer = TreWriter::new(Cursor::new(Vec::new()), uncompressed());
        writer.start_file("hello.txt", CompressionMethod::None)?;
        writer.write_all(b"Hello World")?;
        let result = writer.finish()?;

        assert_str_eq!(
            format!("{:02X?}", *result.get_ref()),
            format!("{:02X?}", expected)
        );

        Ok(())
    }

    #[test]
    fn writing_without_a_file_fails() {
        let mut writer = TreWriter::new(Cursor::new(Vec::new()), uncompressed());
        assert!(writer.write_all(b"orphan").is_err());
    }
}
