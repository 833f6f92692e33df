//! RPAK: an RC4 encrypted directory with per-entry zlib and XOR flags.
//!
//! | Offset | Field                                      |
//! |--------|--------------------------------------------|
//! | 0x00   | magic `RPAK`                               |
//! | 0x04   | u32 version, always 1                      |
//! | 0x08   | u32 entry count                            |
//! | 0x0C   | u32 directory size, `count * 64`           |
//! | 0x10   | directory, RC4 with [`DIRECTORY_KEY`]      |
//!
//! Each 64 byte record holds a NUL padded 48 byte name, then the u32 data offset, stored size,
//! decoded size and flags. Flag bit 0 marks zlib data and bit 1 data XOR-ed with [`ENTRY_KEY`]
//! after compression. Records with an empty name are unused slots.

use gamearc_core::{
    codec::Transform,
    decode::{check_count, open_meta_directory, read_flat_table, RecordAction},
    error::{Error, Result},
    normalize::attach_codec,
    signature::leading_bytes,
    ByteCursor, CodecPipeline, DecodeContext, EntryDescriptor, FormatDecoder, ScoreCard,
    SourceLocation,
};
use tracing::{instrument, trace};

const MAGIC: &[u8; 4] = b"RPAK";
const VERSION: u32 = 1;
const HEADER_SIZE: u64 = 16;
const RECORD_SIZE: u64 = 64;
const NAME_SIZE: usize = 48;

const FLAG_ZLIB: u32 = 1 << 0;
const FLAG_XOR: u32 = 1 << 1;
const KNOWN_FLAGS: u32 = FLAG_ZLIB | FLAG_XOR;

/// RC4 key of the directory block
pub const DIRECTORY_KEY: &[u8] = b"gamearc-rpak";

/// Repeating XOR key of flagged entries
pub const ENTRY_KEY: &[u8] = &[0x5A, 0xC3, 0x3C, 0xA5];

/// Decoder for RPAK archives
#[derive(Debug, Default, Clone, Copy)]
pub struct Rpak;

/// The pipeline that undoes an entry's flags
pub fn entry_pipeline(flags: u32) -> CodecPipeline {
    let mut pipeline = CodecPipeline::identity();
    if flags & FLAG_XOR != 0 {
        pipeline = pipeline.then(Transform::xor(ENTRY_KEY));
    }
    if flags & FLAG_ZLIB != 0 {
        pipeline = pipeline.then(Transform::Zlib);
    }
    pipeline
}

impl FormatDecoder for Rpak {
    fn id(&self) -> &'static str {
        "rpak"
    }

    fn description(&self) -> &'static str {
        "RPAK encrypted archive"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["rpak", "rpk"]
    }

    fn rate(&self, cursor: &mut ByteCursor, card: &mut ScoreCard, source: &SourceLocation) -> Result<()> {
        card.magic(&leading_bytes(cursor, 4)?, MAGIC);
        card.extension(source, self.extensions());

        card.plausible(cursor.read_u32()? == VERSION);
        let count = cursor.read_u32()? as u64;
        let directory = cursor.read_u32()? as u64;
        card.plausible(directory == count * RECORD_SIZE);
        card.plausible(HEADER_SIZE + directory <= cursor.len());
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
        let version = cursor.read_u32()?;
        if version != VERSION {
            return Err(Error::variant(format!("rpak version {version}")));
        }
        let declared = cursor.read_u32()? as u64;
        let directory_size = cursor.read_u32()? as u64;
        let count = check_count(ctx, declared, RECORD_SIZE, cursor.remaining()?)?;
        if directory_size != count.get() as u64 * RECORD_SIZE {
            return Err(Error::structural(
                "directory size",
                directory_size,
                count.get() as u64 * RECORD_SIZE,
            ));
        }

        let mut directory = open_meta_directory(
            cursor,
            HEADER_SIZE,
            directory_size,
            directory_size,
            &Transform::rc4(DIRECTORY_KEY).into(),
        )?;

        read_flat_table(&mut directory, ctx, count, |c, index| {
            let name = c.read_fixed_string(NAME_SIZE)?;
            let offset = c.read_u32()? as u64;
            let stored = c.read_u32()? as u64;
            let decoded = c.read_u32()? as u64;
            let flags = c.read_u32()?;

            if name.is_empty() {
                trace!(index, "unused slot");
                return Ok(RecordAction::Skip);
            }
            if flags & !KNOWN_FLAGS != 0 {
                return Err(Error::variant(format!("entry flags {flags:#x}")));
            }
            if flags & FLAG_ZLIB == 0 && decoded != stored {
                return Err(Error::structural("decoded length", decoded, stored));
            }
            cursor.check_range("entry", offset, stored)?;

            let mut entry = EntryDescriptor::builder()
                .source(source.clone())
                .name(name)
                .data_offset(offset)
                .stored_length(stored)
                .build()
                .with_property("flags", flags);
            attach_codec(&mut entry, entry_pipeline(flags), decoded);
            Ok(RecordAction::Entry(entry))
        })
    }
}
