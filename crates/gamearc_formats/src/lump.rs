//! LUMP: packed data followed by a directory with no entry count.
//!
//! The header is the magic `LUMP` and the u32 offset of the directory. Entry data is packed
//! from offset 8 in directory order, so offsets are the running sum of the lengths.
//!
//! A directory record is a NUL padded 12 byte name and a u32 length. A record with an empty name
//! and a zero length ends the directory; an empty name with a length is a deleted entry whose
//! data is still in place. Some writers leave garbage after the directory, which is ignored.

use gamearc_core::{
    decode::{read_records_until, RecordAction},
    error::{Error, Result},
    signature::leading_bytes,
    ByteCursor, DecodeContext, EntryDescriptor, FormatDecoder, ScoreCard, SourceLocation,
};
use tracing::{instrument, trace};

const MAGIC: &[u8; 4] = b"LUMP";
const DATA_START: u64 = 8;
const RECORD_SIZE: u64 = 16;
const NAME_SIZE: usize = 12;

/// Decoder for LUMP archives
#[derive(Debug, Default, Clone, Copy)]
pub struct Lump;

impl FormatDecoder for Lump {
    fn id(&self) -> &'static str {
        "lump"
    }

    fn description(&self) -> &'static str {
        "LUMP packed archive"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["lump", "lmp"]
    }

    fn rate(&self, cursor: &mut ByteCursor, card: &mut ScoreCard, source: &SourceLocation) -> Result<()> {
        card.magic(&leading_bytes(cursor, 4)?, MAGIC);
        card.extension(source, self.extensions());

        let directory = cursor.read_u32()? as u64;
        card.plausible(directory >= DATA_START && directory <= cursor.len());
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
        let directory = cursor.read_u32()? as u64;
        if directory < DATA_START || directory > cursor.len() {
            return Err(Error::structural("directory offset", directory, cursor.len()));
        }
        cursor.seek(directory)?;

        let end = cursor.len();
        let mut next_offset = DATA_START;
        read_records_until(cursor, ctx, end, RECORD_SIZE, |c, index| {
            let name = c.read_fixed_string(NAME_SIZE)?;
            let length = c.read_u32()? as u64;
            if name.is_empty() && length == 0 {
                return Ok(RecordAction::End);
            }

            let offset = next_offset;
            if offset + length > directory {
                return Err(Error::structural("entry end", offset + length, directory));
            }
            next_offset += length;
            if name.is_empty() {
                trace!(index, offset, length, "deleted entry");
                return Ok(RecordAction::Skip);
            }

            Ok(RecordAction::Entry(
                EntryDescriptor::builder()
                    .source(source.clone())
                    .name(name)
                    .data_offset(offset)
                    .stored_length(length)
                    .build(),
            ))
        })
    }
}
