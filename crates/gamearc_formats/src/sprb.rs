//! SPRB: a sprite bank with shared palettes.
//!
//! | Offset | Field                                           |
//! |--------|-------------------------------------------------|
//! | 0x00   | magic `SPRB`                                    |
//! | 0x04   | u16 sprite slot count                           |
//! | 0x06   | u16 palette count                               |
//! | 0x08   | palettes, 256 RGB triplets each                 |
//! | ...    | one u32 offset per slot, 0 for an empty slot    |
//!
//! The directory has no sizes. Each sprite starts with a 9 byte header
//! `{u32 pixel bytes, u16 width, u16 height, u8 palette}` and the entry covers the header and
//! the pixels.

use binrw::Endian;
use gamearc_core::{
    context::Palette,
    decode::{check_count, read_offset_table},
    error::{Error, Result},
    normalize::{derive_lengths_from_scan, resolve_names_or_generate, sniff_type_hints, LengthField},
    signature::leading_bytes,
    ByteCursor, DecodeContext, EntryDescriptor, FormatDecoder, ScoreCard, SourceLocation,
};
use tracing::{instrument, trace};

const MAGIC: &[u8; 4] = b"SPRB";
const HEADER_SIZE: u64 = 8;
const PALETTE_SIZE: u64 = 256 * 3;
const SPRITE_HEADER_SIZE: u64 = 9;

const SPRITE_LENGTH: LengthField = LengthField {
    position: 0,
    width: 4,
    endian: Endian::Little,
    excluded: SPRITE_HEADER_SIZE,
};

/// Decoder for SPRB sprite banks
#[derive(Debug, Default, Clone, Copy)]
pub struct Sprb;

fn read_palette(cursor: &mut ByteCursor) -> Result<Palette> {
    let raw = cursor.read_bytes(PALETTE_SIZE)?;
    let mut palette: Palette = Box::new([[0u8; 3]; 256]);
    for (color, rgb) in palette.iter_mut().zip(raw.chunks_exact(3)) {
        color.copy_from_slice(rgb);
    }
    Ok(palette)
}

impl FormatDecoder for Sprb {
    fn id(&self) -> &'static str {
        "sprb"
    }

    fn description(&self) -> &'static str {
        "SPRB sprite bank"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["sprb", "spr"]
    }

    fn rate(&self, cursor: &mut ByteCursor, card: &mut ScoreCard, source: &SourceLocation) -> Result<()> {
        card.magic(&leading_bytes(cursor, 4)?, MAGIC);
        card.extension(source, self.extensions());

        let slots = cursor.read_u16()? as u64;
        let palettes = cursor.read_u16()? as u64;
        card.plausible(HEADER_SIZE + palettes * PALETTE_SIZE + slots * 4 <= cursor.len());
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
        let slots = cursor.read_u16()? as u64;
        let palette_count = cursor.read_u16()? as u64;

        let palette_count = check_count(ctx, palette_count, PALETTE_SIZE, cursor.remaining()?)?;
        for index in 0..palette_count.get() {
            let palette = read_palette(cursor)?;
            ctx.palettes.insert(index as u32, palette);
        }

        let slots = check_count(ctx, slots, 4, cursor.remaining()?)?;
        let offsets = read_offset_table(cursor, slots, 4, Endian::Little, 1)?;

        let mut entries = Vec::with_capacity(slots.get());
        for (slot, offset) in offsets.into_iter().enumerate() {
            if offset == 0 {
                trace!(slot, "empty slot");
                continue;
            }
            cursor.check_range("sprite header", offset, SPRITE_HEADER_SIZE)?;
            ctx.progress(entries.len(), offset);
            entries.push(
                EntryDescriptor::builder()
                    .source(source.clone())
                    .data_offset(offset)
                    .build()
                    .with_property("slot", slot as u32),
            );
        }

        derive_lengths_from_scan(cursor, &mut entries, &SPRITE_LENGTH)?;

        for entry in entries.iter_mut() {
            cursor.seek(entry.data_offset() + 4)?;
            let width = cursor.read_u16()?;
            let height = cursor.read_u16()?;
            let palette_index = cursor.read_u8()?;
            let palette = ctx.palettes.get(&(palette_index as u32)).ok_or_else(|| Error::structural(
                "palette index",
                palette_index as u64,
                palette_count.get() as u64,
            ))?;
            let [r, g, b] = palette[0];

            entry.insert_property("width", width as u32);
            entry.insert_property("height", height as u32);
            entry.insert_property("palette", palette_index as u32);
            entry.insert_property("background", format!("#{r:02x}{g:02x}{b:02x}").as_str());
        }

        sniff_type_hints(cursor, &mut entries)?;
        resolve_names_or_generate(&mut entries, "spr")?;
        Ok(entries)
    }
}
