//! TRE archives (version 5).
//!
//! A TRE file consists of a header, the data blocks, a record block, a name block and a block of
//! MD5 digests. Record and name blocks may be zlib compressed as a whole; each entry may be zlib
//! compressed on its own.
//!
//! | Offset (bytes) | Field                  | Description                                                |
//! |----------------|------------------------|------------------------------------------------------------|
//! | 0x0000         | Magic number           | 4 bytes: "EERT" ("TREE" reversed)                          |
//! | 0x0004         | Version                | 4 bytes: "5000" ("0005" reversed)                          |
//! | 0x0008         | Record Count           | 4 bytes: Number of records in the archive                  |
//! | 0x000C         | Record Offset          | 4 bytes: Offset to the record block                        |
//! | 0x0010         | Record Compression     | 4 bytes: Compression method for records                    |
//! | 0x0014         | Record Comp. Size      | 4 bytes: Stored size of the record block                   |
//! | 0x0018         | Name Compression       | 4 bytes: Compression method for names                      |
//! | 0x001C         | Name Comp. Size        | 4 bytes: Stored size of the name block                     |
//! | 0x0020         | Name Uncomp. Size      | 4 bytes: Size of the name block once inflated              |
//!
//! Each record in the (inflated) record block:
//!
//! | Offset (bytes) | Field                  | Description                                             |
//! |----------------|------------------------|---------------------------------------------------------|
//! | 0x0000         | CRC32                  | 4 bytes: CRC-32/BZIP2 of the entry name                 |
//! | 0x0004         | Uncompressed Size      | 4 bytes: Size of the data when uncompressed             |
//! | 0x0008         | Data Offset            | 4 bytes: Offset to the start of the data                |
//! | 0x000C         | Compression            | 4 bytes: `0` none, `2` zlib                             |
//! | 0x0010         | Compressed Size        | 4 bytes: Stored size of the data                        |
//! | 0x0014         | Name Offset            | 4 bytes: Offset of the name within the name block       |
//!
//! Names are NUL terminated. The MD5 block holds one 16 byte digest of the stored data per
//! record, in record order.

use std::io::{Cursor, Write};

use gamearc_core::{
    decode::{check_count, open_meta_directory, read_flat_table, resolve_names_from_blob, RecordAction},
    encode::EditedEntry,
    error::Result,
    signature::leading_bytes,
    ByteCursor, DecodeContext, EntryDescriptor, FormatDecoder, FormatEncoder, PropertyValue,
    ScoreCard, SourceLocation,
};
use tracing::{instrument, warn};

pub mod types;
pub mod write;

pub use types::{CompressionMethod, TreHeader, TreRecord};
pub use write::{TreWriter, TreWriterOptions};

use types::{name_checksum, HASH_SIZE, HEADER_SIZE, RECORD_SIZE};

const MAGIC: &[u8] = b"EERT5000";

/// Decoder and encoder for TRE archives
#[derive(Debug, Default, Clone, Copy)]
pub struct Tre;

impl FormatDecoder for Tre {
    fn id(&self) -> &'static str {
        "tre"
    }

    fn description(&self) -> &'static str {
        "TRE archive, version 5"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["tre"]
    }

    fn rate(&self, cursor: &mut ByteCursor, card: &mut ScoreCard, source: &SourceLocation) -> Result<()> {
        card.extension(source, self.extensions());
        if !card.magic(&leading_bytes(cursor, MAGIC.len())?, MAGIC) {
            return Ok(());
        }
        cursor.seek(0)?;
        let header: TreHeader = cursor.read_struct()?;
        card.plausible(header.record_start >= HEADER_SIZE);
        card.plausible(header.records as u64 * RECORD_SIZE as u64 <= cursor.len());
        card.plausible(header.hash_start() <= cursor.len());
        Ok(())
    }

    #[instrument(skip_all, err)]
    fn decode(
        &self,
        cursor: &mut ByteCursor,
        source: &SourceLocation,
        ctx: &mut DecodeContext,
    ) -> Result<Vec<EntryDescriptor>> {
        let header: TreHeader = cursor.read_struct()?;

        // every record owns at least the NUL of its name
        let count = check_count(ctx, header.records as u64, 1, header.name_uncompressed as u64)?;
        if header.record_compression == CompressionMethod::None {
            check_count(ctx, header.records as u64, RECORD_SIZE as u64, header.record_compressed as u64)?;
        }

        let mut record_block = open_meta_directory(
            cursor,
            header.record_start as u64,
            header.record_compressed as u64,
            header.records as u64 * RECORD_SIZE as u64,
            &header.record_compression.pipeline(),
        )?;
        let records = read_flat_table(&mut record_block, ctx, count, |c, _| {
            Ok(RecordAction::Entry(c.read_struct::<TreRecord>()?))
        })?;

        let mut name_block = open_meta_directory(
            cursor,
            header.name_start(),
            header.name_compressed as u64,
            header.name_uncompressed as u64,
            &header.name_compression.pipeline(),
        )?;
        let name_offsets = records.iter().map(|r| r.name_offset as u64).collect::<Vec<_>>();
        let names = resolve_names_from_blob(&mut name_block, 0, header.name_uncompressed as u64, &name_offsets)?;

        let hash_length = header.records as u64 * HASH_SIZE as u64;
        let hashes = match cursor.check_range("hash block", header.hash_start(), hash_length) {
            Ok(()) => {
                cursor.seek(header.hash_start())?;
                Some(cursor.read_bytes(hash_length)?)
            }
            Err(_) => {
                warn!("hash block missing or truncated");
                None
            }
        };

        let mut entries = Vec::with_capacity(records.len());
        for (index, (record, name)) in records.into_iter().zip(names).enumerate() {
            if name_checksum(&name) != record.checksum {
                warn!(name = %name, stored = record.checksum, "name checksum mismatch");
            }

            let stored = record.data_compressed as u64;
            let decoded = match record.data_compression {
                CompressionMethod::None => stored,
                CompressionMethod::Zlib => record.data_uncompressed as u64,
            };
            let mut entry = EntryDescriptor::builder()
                .source(source.clone())
                .name(name)
                .data_offset(record.data_offset as u64)
                .stored_length(stored)
                .decoded_length(decoded)
                .codec(record.data_compression.pipeline())
                .build()
                .with_property("crc", record.checksum);

            if let Some(hashes) = &hashes {
                let start = index * HASH_SIZE as usize;
                let digest = &hashes[start..start + HASH_SIZE as usize];
                entry.insert_property("md5", PropertyValue::Bytes(digest.into()));
            }
            entries.push(entry);
        }
        Ok(entries)
    }

    fn encoder(&self) -> Option<&dyn FormatEncoder> {
        Some(self)
    }
}

impl FormatEncoder for Tre {
    /// Rewrites every entry, keeping the original block compression settings
    #[instrument(skip_all, fields(entries = entries.len()), err)]
    fn encode(&self, original: &mut ByteCursor, entries: &[EditedEntry]) -> Result<Vec<u8>> {
        original.seek(0)?;
        let header: TreHeader = original.read_struct()?;
        let options = TreWriterOptions::builder()
            .record_compression(header.record_compression)
            .name_compression(header.name_compression)
            .build();

        let mut writer = TreWriter::new(Cursor::new(Vec::new()), options);
        for entry in entries {
            let content = entry.content_bytes(original)?;
            writer.start_file(entry.name()?, CompressionMethod::for_pipeline(entry.descriptor.codec()))?;
            writer.write_all(&content)?;
        }
        Ok(writer.finish()?.into_inner())
    }
}

#[cfg(test)]
mod test {
    use gamearc_core::{
        error::Result, ByteCursor, DecodeContext, FormatDecoder, PropertyValue, SourceLocation,
    };
    use pretty_assertions::assert_eq;
    use tracing_test::traced_test;

    use crate::tre::Tre;

    fn decode(input: &[u8]) -> Result<Vec<gamearc_core::EntryDescriptor>> {
        let mut cursor = ByteCursor::from_bytes(input.to_vec());
        let source = SourceLocation::memory(input.len() as u64);
        Tre.read_directory(&mut cursor, &source, &mut DecodeContext::default())
    }

    #[test]
    fn read_invalid_magic() {
        #[rustfmt::skip]
        let input = [
            0x40, 0x45, 0x52, 0x54, 0x35, 0x30, 0x30, 0x30,
            0x00, 0x00, 0x00, 0x00,
            0x28, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00,
        ];

        assert!(decode(&input).is_err());
        let mut cursor = ByteCursor::from_bytes(input.to_vec());
        assert_eq!(Tre.score(&mut cursor, &SourceLocation::memory(36)).value(), 0);
    }

    #[test]
    fn read_empty_compressed_tre() -> Result<()> {
        #[rustfmt::skip]
        let input = [
            0x45, 0x45, 0x52, 0x54, 0x35, 0x30, 0x30, 0x30,
            0x00, 0x00, 0x00, 0x00,
            0x24, 0x00, 0x00, 0x00,
            0x02, 0x00, 0x00, 0x00,
            0x08, 0x00, 0x00, 0x00,
            0x02, 0x00, 0x00, 0x00,
            0x08, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00,
            0x78, 0x9C, 0x03, 0x00, 0x00, 0x00, 0x00, 0x01,
            0x78, 0x9C, 0x03, 0x00, 0x00, 0x00, 0x00, 0x01,
        ];

        assert!(decode(&input)?.is_empty());

        Ok(())
    }

    #[traced_test]
    #[test]
    fn read_compressed_file_tre_with_entry() -> Result<()> {
        #[rustfmt::skip]
        let input = [
            // Header (36)
            0x45, 0x45, 0x52, 0x54, 0x35, 0x30, 0x30, 0x30,
            0x01, 0x00, 0x00, 0x00,
            0x37, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00,
            0x18, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00,
            0x0A, 0x00, 0x00, 0x00,
            0x0A, 0x00, 0x00, 0x00,
            // Data (19)
            0x78, 0x9C, 0xF3, 0x48, 0xCD, 0xC9, 0xC9, 0x57, 0x08, 0xCF,
            0x2F, 0xCA, 0x49, 0x01, 0x00, 0x18, 0x0B, 0x04, 0x1D,
            // Records (24)
            0xAA, 0x30, 0x7E, 0x52,
            0x0B, 0x00, 0x00, 0x00,
            0x24, 0x00, 0x00, 0x00,
            0x02, 0x00, 0x00, 0x00,
            0x13, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00,
            // Names (10)
            0x68, 0x65, 0x6C, 0x6C, 0x6F, 0x2E, 0x74, 0x78, 0x74, 0x00,
        ];

        let entries = decode(&input)?;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name(), Some("hello.txt"));
        assert_eq!(entries[0].data_offset(), 36);
        assert_eq!(entries[0].stored_length(), 19);
        assert_eq!(entries[0].decoded_length(), 11);
        assert!(entries[0].codec().is_compressed());
        assert_eq!(entries[0].property("crc"), Some(&PropertyValue::Int(0x527E30AA)));
        assert!(logs_contain("hash block missing"));

        Ok(())
    }

    #[test]
    fn record_count_larger_than_name_block_is_rejected() {
        #[rustfmt::skip]
        let input = [
            0x45, 0x45, 0x52, 0x54, 0x35, 0x30, 0x30, 0x30,
            0xFF, 0xFF, 0xFF, 0x0F,
            0x24, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00,
        ];

        assert!(matches!(
            decode(&input),
            Err(gamearc_core::error::Error::StructuralViolation { .. })
        ));
    }
}
