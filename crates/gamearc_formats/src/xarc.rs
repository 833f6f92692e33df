//! XARC: a flat record table followed by a blob of names.
//!
//! | Offset        | Field                                                           |
//! |---------------|-----------------------------------------------------------------|
//! | 0x00          | magic `XARC`                                                    |
//! | 0x04          | u32 entry count                                                 |
//! | 0x08          | `count` records of 16 bytes                                     |
//! | 0x08 + 16n    | name blob: NUL terminated names                                 |
//! | ...           | entry data                                                      |
//!
//! A record is `{u32 offset, u32 length, u32 name_offset, u32 reserved}`, little-endian, with
//! `name_offset` relative to the start of the name blob. The meaning of `reserved` is unknown;
//! it is exposed as the `reserved` property and written back unchanged.

use gamearc_core::{
    decode::{check_count, read_flat_table, resolve_names_from_blob, RecordAction},
    encode::{to_u32, EditedEntry, EntryContent},
    error::Result,
    signature::leading_bytes,
    ByteCursor, ByteWriter, DecodeContext, EntryDescriptor, FormatDecoder, FormatEncoder,
    PropertyValue, ScoreCard, SourceLocation,
};
use tracing::{debug, instrument};

const MAGIC: &[u8; 4] = b"XARC";
const HEADER_SIZE: u64 = 8;
const RECORD_SIZE: u64 = 16;

/// Entry data written by the encoder starts on this boundary
pub const DATA_ALIGNMENT: u64 = 4;

#[derive(Debug)]
struct XarcRecord {
    offset: u32,
    length: u32,
    name_offset: u32,
    reserved: u32,
}

/// Decoder and encoder for XARC archives
#[derive(Debug, Default, Clone, Copy)]
pub struct Xarc;

impl FormatDecoder for Xarc {
    fn id(&self) -> &'static str {
        "xarc"
    }

    fn description(&self) -> &'static str {
        "XARC flat table archive"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["xarc", "xar"]
    }

    fn rate(&self, cursor: &mut ByteCursor, card: &mut ScoreCard, source: &SourceLocation) -> Result<()> {
        card.magic(&leading_bytes(cursor, 4)?, MAGIC);
        card.extension(source, self.extensions());

        let count = cursor.read_u32()? as u64;
        let blob_start = HEADER_SIZE + count * RECORD_SIZE;
        card.plausible(blob_start <= cursor.len());
        if count > 0 && blob_start <= cursor.len() {
            let offset = cursor.read_u32()? as u64;
            let length = cursor.read_u32()? as u64;
            card.plausible(offset >= blob_start && offset + length <= cursor.len());
            card.plausible((cursor.read_u32()? as u64) < cursor.len() - blob_start);
        }
        Ok(())
    }

    #[instrument(skip_all, err)]
    fn decode(
        &self,
        cursor: &mut ByteCursor,
        source: &SourceLocation,
        ctx: &mut DecodeContext,
    ) -> Result<Vec<EntryDescriptor>> {
        cursor.skip(MAGIC.len() as u64)?;
        let declared = cursor.read_u32()? as u64;
        let count = check_count(ctx, declared, RECORD_SIZE, cursor.remaining()?)?;

        let records = read_flat_table(cursor, ctx, count, |c, _| {
            let record = XarcRecord {
                offset: c.read_u32()?,
                length: c.read_u32()?,
                name_offset: c.read_u32()?,
                reserved: c.read_u32()?,
            };
            c.check_range("entry", record.offset as u64, record.length as u64)?;
            Ok(RecordAction::Entry(record))
        })?;

        let blob_start = cursor.offset()?;
        let blob_length = cursor.len() - blob_start;
        let name_offsets = records.iter().map(|r| r.name_offset as u64).collect::<Vec<_>>();
        let names = resolve_names_from_blob(cursor, blob_start, blob_length, &name_offsets)?;

        Ok(records
            .into_iter()
            .zip(names)
            .map(|(record, name)| {
                EntryDescriptor::builder()
                    .source(source.clone())
                    .name(name)
                    .data_offset(record.offset as u64)
                    .stored_length(record.length as u64)
                    .build()
                    .with_property("reserved", record.reserved)
            })
            .collect())
    }

    fn encoder(&self) -> Option<&dyn FormatEncoder> {
        Some(self)
    }
}

impl FormatEncoder for Xarc {
    #[instrument(skip_all, fields(entries = entries.len()), err)]
    fn encode(&self, original: &mut ByteCursor, entries: &[EditedEntry]) -> Result<Vec<u8>> {
        let mut out = ByteWriter::in_memory();

        // header and a zeroed record table, patched once the data is placed
        out.write_bytes(MAGIC)?;
        out.write_u32(to_u32("entry count", entries.len() as u64)?)?;
        let table_start = out.offset()?;
        out.write_bytes(&vec![0u8; entries.len() * RECORD_SIZE as usize])?;

        let blob_start = out.offset()?;
        let mut name_offsets = Vec::with_capacity(entries.len());
        for entry in entries {
            name_offsets.push(to_u32("name offset", out.offset()? - blob_start)?);
            out.write_null_terminated_string(entry.name()?)?;
        }

        let mut placements = Vec::with_capacity(entries.len());
        for entry in entries {
            out.pad_to(DATA_ALIGNMENT, 0)?;
            let offset = out.offset()?;
            let descriptor = &entry.descriptor;
            match &entry.content {
                EntryContent::Original if descriptor.codec().is_identity() && descriptor.source().is_primary() => {
                    out.copy_from(original, descriptor.data_offset(), descriptor.stored_length())?;
                }
                _ => out.write_bytes(&entry.content_bytes(original)?)?,
            }
            placements.push((offset, out.offset()? - offset));
        }

        for (index, ((entry, name_offset), (offset, length))) in
            entries.iter().zip(name_offsets).zip(placements).enumerate()
        {
            let reserved = match entry.descriptor.property("reserved") {
                Some(PropertyValue::Int(value)) => {
                    to_u32("reserved field", u64::try_from(*value).unwrap_or(u64::MAX))?
                }
                _ => 0,
            };
            let at = table_start + index as u64 * RECORD_SIZE;
            out.patch_u32(at, to_u32("data offset", offset)?)?;
            out.patch_u32(at + 4, to_u32("entry length", length)?)?;
            out.patch_u32(at + 8, name_offset)?;
            out.patch_u32(at + 12, reserved)?;
        }

        let bytes = out.into_bytes();
        debug!(length = bytes.len(), "xarc encoded");
        Ok(bytes)
    }
}

#[cfg(test)]
mod test {
    use gamearc_core::{
        encode::EditedEntry,
        error::{Error, Result},
        ByteCursor, DecodeContext, FormatDecoder, FormatEncoder, PropertyValue, SourceLocation,
    };
    use pretty_assertions::assert_eq;

    use crate::xarc::Xarc;

    #[rustfmt::skip]
    const TWO_FILES: [u8; 63] = [
        b'X', b'A', b'R', b'C',
        0x02, 0x00, 0x00, 0x00,
        // records
        0x2C, 0x00, 0x00, 0x00,  0x05, 0x00, 0x00, 0x00,  0x00, 0x00, 0x00, 0x00,  0x07, 0x00, 0x00, 0x00,
        0x31, 0x00, 0x00, 0x00,  0x06, 0x00, 0x00, 0x00,  0x06, 0x00, 0x00, 0x00,  0x00, 0x00, 0x00, 0x00,
        // names
        b'a', b'.', b't', b'x', b't', 0x00,
        b'b', b'.', b'b', b'i', b'n', 0x00,
        // data
        b'h', b'e', b'l', b'l', b'o',
        b'w', b'o', b'r', b'l', b'd', b'!',
    ];

    #[test]
    fn decodes_flat_table() -> Result<()> {
        let mut cursor = ByteCursor::from_bytes(TWO_FILES.to_vec());
        let source = SourceLocation::memory(TWO_FILES.len() as u64);

        let entries = Xarc.read_directory(&mut cursor, &source, &mut DecodeContext::default())?;

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name(), Some("a.txt"));
        assert_eq!((entries[0].data_offset(), entries[0].stored_length()), (44, 5));
        assert_eq!(entries[0].property("reserved"), Some(&PropertyValue::Int(7)));
        assert_eq!(entries[1].name(), Some("b.bin"));
        assert_eq!((entries[1].data_offset(), entries[1].stored_length()), (49, 6));

        Ok(())
    }

    #[test]
    fn entry_past_the_end_fails_fast() {
        let mut data = TWO_FILES.to_vec();
        data[12] = 0x40;
        let mut cursor = ByteCursor::from_bytes(data);
        let source = SourceLocation::memory(TWO_FILES.len() as u64);

        assert!(Xarc
            .read_directory(&mut cursor, &source, &mut DecodeContext::default())
            .is_err());
    }

    #[test]
    fn encoder_keeps_reserved_values() -> Result<()> {
        let mut cursor = ByteCursor::from_bytes(TWO_FILES.to_vec());
        let source = SourceLocation::memory(TWO_FILES.len() as u64);
        let entries = Xarc.read_directory(&mut cursor, &source, &mut DecodeContext::default())?;

        let edited = vec![
            EditedEntry::replaced(entries[1].clone(), b"replaced".to_vec()),
            EditedEntry::original(entries[0].clone()),
        ];
        let bytes = Xarc.encode(&mut cursor, &edited)?;

        let mut reread = ByteCursor::from_bytes(bytes.clone());
        let source = SourceLocation::memory(bytes.len() as u64);
        let entries = Xarc.read_directory(&mut reread, &source, &mut DecodeContext::default())?;

        assert_eq!(entries[0].name(), Some("b.bin"));
        assert_eq!(entries[0].stored_length(), 8);
        assert_eq!(entries[1].name(), Some("a.txt"));
        assert_eq!(entries[1].property("reserved"), Some(&PropertyValue::Int(7)));
        assert_eq!(entries[1].data_offset() % 4, 0);

        Ok(())
    }

    #[test]
    fn encoder_rejects_reserved_values_past_u32() -> Result<()> {
        let mut cursor = ByteCursor::from_bytes(TWO_FILES.to_vec());
        let source = SourceLocation::memory(TWO_FILES.len() as u64);
        let entries = Xarc.read_directory(&mut cursor, &source, &mut DecodeContext::default())?;

        for reserved in [u32::MAX as i64 + 1, -1] {
            let edited = vec![EditedEntry::original(
                entries[0].clone().with_property("reserved", PropertyValue::Int(reserved)),
            )];
            assert!(matches!(
                Xarc.encode(&mut cursor, &edited),
                Err(Error::StructuralViolation { what: "reserved field", .. })
            ));
        }

        Ok(())
    }
}
