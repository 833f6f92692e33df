//! On-disk structures of a TRE archive.

use binrw::{BinRead, BinWrite};
use gamearc_core::codec::{BlockEncoding, CodecPipeline, Transform};

/// Size of [`TreHeader`] on disk, including the magic
pub const HEADER_SIZE: u32 = 36;

/// Size of one [`TreRecord`] on disk
pub const RECORD_SIZE: u32 = 24;

/// Size of one MD5 digest in the trailing hash block
pub const HASH_SIZE: u32 = 16;

/// Identifies the storage format used to compress a block inside the TRE file
#[derive(BinRead, BinWrite, Debug, Copy, Clone, Default, PartialEq, Eq)]
#[brw(repr = u32)]
pub enum CompressionMethod {
    /// Stores the data as it is
    None = 0,

    /// Compress the data using Zlib
    #[default]
    Zlib = 2,
}

impl CompressionMethod {
    /// The pipeline that undoes this compression
    pub fn pipeline(self) -> CodecPipeline {
        match self {
            CompressionMethod::None => CodecPipeline::identity(),
            CompressionMethod::Zlib => Transform::Zlib.into(),
        }
    }

    /// How a block written with this method is encoded
    pub fn encoding(self) -> BlockEncoding {
        match self {
            CompressionMethod::None => BlockEncoding::Stored,
            CompressionMethod::Zlib => BlockEncoding::Zlib,
        }
    }

    /// The method matching an entry's codec
    pub fn for_pipeline(pipeline: &CodecPipeline) -> CompressionMethod {
        if pipeline.is_compressed() {
            CompressionMethod::Zlib
        } else {
            CompressionMethod::None
        }
    }
}

/// TRE file header
///
/// The file starts with "TREE" and the version "0005", both stored byte-reversed.
/// All data is stored in little endian format
#[derive(BinRead, BinWrite, Debug, Copy, Clone, PartialEq)]
#[brw(magic = b"EERT5000", little)]
pub struct TreHeader {
    /// The number of records stored in the file
    pub records: u32,

    /// The offset from the beginning of the file where the record metadata starts
    pub record_start: u32,

    /// The compression type used for compressing the record metadata block
    pub record_compression: CompressionMethod,

    /// The size in the file for the compressed record metadata block
    pub record_compressed: u32,

    /// The compression type used for compressing the block of file names
    pub name_compression: CompressionMethod,

    /// The size of the name block after compression
    pub name_compressed: u32,

    /// The size of the name block before compression
    pub name_uncompressed: u32,
}

impl Default for TreHeader {
    fn default() -> Self {
        Self {
            records: Default::default(),
            record_start: HEADER_SIZE,
            record_compression: Default::default(),
            record_compressed: Default::default(),
            name_compression: Default::default(),
            name_compressed: Default::default(),
            name_uncompressed: Default::default(),
        }
    }
}

impl TreHeader {
    /// Offset of the name block, right after the record block
    pub fn name_start(&self) -> u64 {
        self.record_start as u64 + self.record_compressed as u64
    }

    /// Offset of the MD5 block, right after the name block
    pub fn hash_start(&self) -> u64 {
        self.name_start() + self.name_compressed as u64
    }
}

/// TRE file record
///
/// Defines an entry in the TRE file
#[derive(BinRead, BinWrite, Debug, Default, Copy, Clone, PartialEq)]
#[brw(little)]
pub struct TreRecord {
    /// A [`crc::CRC_32_BZIP2`] checksum of the record's name
    pub checksum: u32,

    /// The size of the data for this record before compression
    pub data_uncompressed: u32,

    /// The offset to the data for this record from the start of the file
    pub data_offset: u32,

    /// The compression type used to compress this record's data
    pub data_compression: CompressionMethod,

    /// The size of this record's data after compression
    pub data_compressed: u32,

    /// The offset from the start of the name block for this record's name
    pub name_offset: u32,
}

/// Checksum stored in [`TreRecord::checksum`]
pub fn name_checksum(name: &str) -> u32 {
    crc::Crc::<u32>::new(&crc::CRC_32_BZIP2).checksum(name.as_bytes())
}

#[cfg(test)]
mod test {
    use std::io::Cursor;

    use binrw::BinRead;
    use binrw::BinWrite;
    use gamearc_core::error::Result;
    use pretty_assertions::assert_eq;

    use crate::tre::types::{name_checksum, CompressionMethod, TreHeader, TreRecord};

    #[test]
    fn read_compressed_header() -> Result<()> {
        #[rustfmt::skip]
        let mut input = Cursor::new(vec![
            0x45, 0x45, 0x52, 0x54, 0x35, 0x30, 0x30, 0x30,
            0x00, 0x00, 0x00, 0x00,
            0x24, 0x00, 0x00, 0x00,
            0x02, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00,
            0x02, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00,
        ]);

        let expected = TreHeader {
            record_start: 36,
            record_compression: CompressionMethod::Zlib,
            name_compression: CompressionMethod::Zlib,
            ..Default::default()
        };

        assert_eq!(TreHeader::read(&mut input)?, expected);

        Ok(())
    }

    #[test]
    fn unknown_compression_is_rejected() {
        #[rustfmt::skip]
        let mut input = Cursor::new(vec![
            0x00, 0x00, 0x00, 0x00,
            0x0B, 0x00, 0x00, 0x00,
            0x24, 0x00, 0x00, 0x00,
            0x07, 0x00, 0x00, 0x00,
            0x0B, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00
        ]);

        assert!(TreRecord::read(&mut input).is_err());
    }

    #[test]
    fn write_record() -> Result<()> {
        #[rustfmt::skip]
        let expected = vec![
            0xAA, 0x30, 0x7E, 0x52,
            0x0B, 0x00, 0x00, 0x00,
            0x24, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00,
            0x0B, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00
        ];

        let record = TreRecord {
            checksum: name_checksum("hello.txt"),
            data_uncompressed: 11,
            data_offset: 36,
            data_compression: CompressionMethod::None,
            data_compressed: 11,
            ..Default::default()
        };

        let mut actual = Vec::new();
        record.write(&mut Cursor::new(&mut actual))?;

        assert_eq!(actual, expected);

        Ok(())
    }
}
