//! SPK: a directory file with its data spread over numbered part files.
//!
//! `name.spk` holds the directory only; the data lives in `name.000`, `name.001` and so on.
//!
//! | Offset | Field                 |
//! |--------|-----------------------|
//! | 0x00   | magic `SPK1`          |
//! | 0x04   | u16 part count        |
//! | 0x06   | u16 folder count      |
//! | 0x08   | u32 file count        |
//! | 0x0C   | folder records        |
//! | ...    | file records          |
//!
//! A folder record is a 32 byte name, an i32 parent index (-1 at the top), the index of its first
//! file and its file count. Parents always come before their children.
//!
//! A file record is the u32 hash of the file name, the u16 part number, u16 flags (bit 0 zlib),
//! then u32 data offset, stored size and decoded size. Names are only stored as hashes, so they
//! come from the external name table and fall back to the hash itself.

use std::path::{Path, PathBuf};

use gamearc_core::{
    codec::Transform,
    decode::{check_count, prefix_folder_ranges, read_flat_table, FolderRange, RecordAction},
    error::{Error, Result},
    normalize::attach_codec,
    signature::leading_bytes,
    ByteCursor, DecodeContext, EntryDescriptor, FormatDecoder, ScoreCard, SourceLocation,
};
use tracing::{debug, instrument};

const MAGIC: &[u8; 4] = b"SPK1";
const HEADER_SIZE: u64 = 12;
const FOLDER_RECORD_SIZE: u64 = 44;
const FILE_RECORD_SIZE: u64 = 20;
const FOLDER_NAME_SIZE: usize = 32;

const FLAG_ZLIB: u16 = 1;

/// Decoder for spanned SPK archives
#[derive(Debug, Default, Clone, Copy)]
pub struct Spk;

/// Path of part `index`, counting from 0
pub fn part_path(index: u16, directory: &Path) -> PathBuf {
    directory.with_extension(format!("{index:03}"))
}

fn open_part(index: u16, directory: &Path) -> Result<SourceLocation> {
    let path = part_path(index, directory);
    let metadata = std::fs::metadata(&path).map_err(|source| Error::ResourceFailure {
        path: path.clone(),
        source,
    })?;
    debug!(part = index, path = %path.display(), length = metadata.len(), "found part");
    Ok(SourceLocation::part(index + 1, path, metadata.len()))
}

struct FileRecord {
    hash: u32,
    part: u16,
    flags: u16,
    offset: u64,
    stored: u64,
    decoded: u64,
}

impl FormatDecoder for Spk {
    fn id(&self) -> &'static str {
        "spk"
    }

    fn description(&self) -> &'static str {
        "SPK spanned archive"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["spk"]
    }

    fn rate(&self, cursor: &mut ByteCursor, card: &mut ScoreCard, source: &SourceLocation) -> Result<()> {
        card.magic(&leading_bytes(cursor, 4)?, MAGIC);
        card.extension(source, self.extensions());

        let parts = cursor.read_u16()?;
        let folders = cursor.read_u16()? as u64;
        let files = cursor.read_u32()? as u64;
        card.plausible(parts > 0);
        card.plausible(HEADER_SIZE + folders * FOLDER_RECORD_SIZE + files * FILE_RECORD_SIZE == cursor.len());
        Ok(())
    }

    #[instrument(skip_all, err)]
    fn decode(
        &self,
        cursor: &mut ByteCursor,
        source: &SourceLocation,
        ctx: &mut DecodeContext,
    ) -> Result<Vec<EntryDescriptor>> {
        let directory = source
            .path()
            .ok_or_else(|| Error::CustomError("spanned archives can only be opened from a file".into()))?;

        cursor.skip(MAGIC.len() as u64)?;
        let part_count = cursor.read_u16()?;
        let folder_count = cursor.read_u16()? as u64;
        let file_count = cursor.read_u32()? as u64;

        let folder_count = check_count(ctx, folder_count, FOLDER_RECORD_SIZE, cursor.remaining()?)?;
        let folders = read_flat_table(cursor, ctx, folder_count, |c, index| {
            let name = c.read_fixed_string(FOLDER_NAME_SIZE)?;
            let parent = c.read_u32()? as i32;
            let parent = match parent {
                -1 => None,
                p if p >= 0 => Some(p as usize),
                p => return Err(Error::variant(format!("folder {index} has parent {p}"))),
            };
            Ok(RecordAction::Entry(FolderRange {
                name,
                parent,
                first_file: c.read_u32()? as usize,
                file_count: c.read_u32()? as usize,
            }))
        })?;

        let file_count = check_count(ctx, file_count, FILE_RECORD_SIZE, cursor.remaining()?)?;
        let files = read_flat_table(cursor, ctx, file_count, |c, _| {
            let record = FileRecord {
                hash: c.read_u32()?,
                part: c.read_u16()?,
                flags: c.read_u16()?,
                offset: c.read_u32()? as u64,
                stored: c.read_u32()? as u64,
                decoded: c.read_u32()? as u64,
            };
            if record.part >= part_count {
                return Err(Error::structural("part number", record.part as u64, part_count as u64));
            }
            if record.flags & !FLAG_ZLIB != 0 {
                return Err(Error::variant(format!("file flags {:#x}", record.flags)));
            }
            Ok(RecordAction::Entry(record))
        })?;

        let parts = (0..part_count)
            .map(|index| open_part(index, directory))
            .collect::<Result<Vec<_>>>()?;

        let mut names = files
            .iter()
            .map(|file| match ctx.names().lookup_u32(file.hash) {
                Some(name) => name.to_string(),
                None => format!("{:08x}.dat", file.hash),
            })
            .collect::<Vec<_>>();
        prefix_folder_ranges(&mut names, &folders)?;

        files
            .into_iter()
            .zip(names)
            .map(|(file, name)| {
                let part = &parts[file.part as usize];
                if file.offset.saturating_add(file.stored) > part.length() {
                    return Err(Error::structural("entry end", file.offset + file.stored, part.length()));
                }
                let mut entry = EntryDescriptor::builder()
                    .source(part.clone())
                    .name(name)
                    .data_offset(file.offset)
                    .stored_length(file.stored)
                    .build()
                    .with_property("hash", file.hash);
                if file.flags & FLAG_ZLIB != 0 {
                    attach_codec(&mut entry, Transform::Zlib.into(), file.decoded);
                } else if file.decoded != file.stored {
                    return Err(Error::structural("decoded length", file.decoded, file.stored));
                }
                Ok(entry)
            })
            .collect()
    }
}
