//! Headerless offset list.
//!
//! The file starts directly with `N + 1` little-endian u32 offsets. The first offset points just
//! past the table, so it also gives the table size, and `offset[N]` is the length of the file.
//! Entry `i` spans `offset[i]..offset[i + 1]`. Names are not stored; they are generated from the
//! sniffed content type.

use binrw::Endian;
use gamearc_core::{
    decode::{check_count, read_offset_table},
    encode::{to_u32, EditedEntry},
    error::{Error, Result},
    normalize::{derive_lengths_from_offsets, resolve_names_or_generate, sniff_type_hints},
    ByteCursor, ByteWriter, DecodeContext, EntryDescriptor, FormatDecoder, FormatEncoder,
    ScoreCard, SourceLocation,
};
use tracing::{debug, instrument, warn};

const OFFSET_SIZE: u64 = 4;

/// Decoder and encoder for headerless offset lists
#[derive(Debug, Default, Clone, Copy)]
pub struct Ofs;

/// Reads the whole offset table and checks that it describes the stream exactly
fn consistent_table(cursor: &mut ByteCursor) -> Result<bool> {
    cursor.seek(0)?;
    let first = cursor.read_u32()? as u64;
    if first < OFFSET_SIZE || first % OFFSET_SIZE != 0 || first > cursor.len() {
        return Ok(false);
    }
    let mut previous = first;
    for _ in 1..first / OFFSET_SIZE {
        let offset = cursor.read_u32()? as u64;
        if offset < previous {
            return Ok(false);
        }
        previous = offset;
    }
    Ok(previous == cursor.len())
}

impl FormatDecoder for Ofs {
    fn id(&self) -> &'static str {
        "ofs"
    }

    fn description(&self) -> &'static str {
        "headerless offset list"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["ofs"]
    }

    fn rate(&self, cursor: &mut ByteCursor, card: &mut ScoreCard, source: &SourceLocation) -> Result<()> {
        card.extension(source, self.extensions());
        // there is no magic; a table that exactly covers the stream stands in for one
        card.check(consistent_table(cursor)?, gamearc_core::signature::MAGIC_WEIGHT);
        Ok(())
    }

    #[instrument(skip_all, err)]
    fn decode(
        &self,
        cursor: &mut ByteCursor,
        source: &SourceLocation,
        ctx: &mut DecodeContext,
    ) -> Result<Vec<EntryDescriptor>> {
        let first = cursor.read_u32()? as u64;
        if first < OFFSET_SIZE || first % OFFSET_SIZE != 0 {
            return Err(Error::variant(format!("offset table size {first} is not a multiple of 4")));
        }
        let count = check_count(ctx, first / OFFSET_SIZE, OFFSET_SIZE, cursor.len())?;

        cursor.seek(0)?;
        let offsets = read_offset_table(cursor, count, 4, Endian::Little, 1)?;
        let (&end, starts) = offsets
            .split_last()
            .ok_or_else(|| Error::variant("empty offset table"))?;
        if end > cursor.len() {
            return Err(Error::structural("end offset", end, cursor.len()));
        }
        if end < cursor.len() {
            warn!(end, length = cursor.len(), "ignoring trailing bytes after last entry");
        }
        let lengths = derive_lengths_from_offsets(starts, end)?;

        let mut entries = Vec::with_capacity(count.without_sentinels(1).get());
        for (index, (&offset, length)) in starts.iter().zip(lengths).enumerate() {
            entries.push(
                EntryDescriptor::builder()
                    .source(source.clone())
                    .data_offset(offset)
                    .stored_length(length)
                    .build(),
            );
            ctx.progress(index, offset);
        }

        sniff_type_hints(cursor, &mut entries)?;
        resolve_names_or_generate(&mut entries, "bin")?;
        Ok(entries)
    }

    fn encoder(&self) -> Option<&dyn FormatEncoder> {
        Some(self)
    }
}

impl FormatEncoder for Ofs {
    #[instrument(skip_all, fields(entries = entries.len()), err)]
    fn encode(&self, original: &mut ByteCursor, entries: &[EditedEntry]) -> Result<Vec<u8>> {
        let mut out = ByteWriter::in_memory();
        let table_size = (entries.len() as u64 + 1) * OFFSET_SIZE;
        out.write_bytes(&vec![0u8; table_size as usize])?;

        let mut offsets = Vec::with_capacity(entries.len() + 1);
        for entry in entries {
            offsets.push(out.offset()?);
            out.write_bytes(&entry.content_bytes(original)?)?;
        }
        offsets.push(out.offset()?);

        for (index, offset) in offsets.into_iter().enumerate() {
            out.patch_u32(index as u64 * OFFSET_SIZE, to_u32("entry offset", offset)?)?;
        }

        let bytes = out.into_bytes();
        debug!(length = bytes.len(), "ofs encoded");
        Ok(bytes)
    }
}
