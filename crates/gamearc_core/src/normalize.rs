//! Post-processing that turns raw directory records into complete [`EntryDescriptor`]s.
//!
//! Decoders call these after the walk: lengths for offset-only directories, names for entries
//! that have none, codecs, type hints, then ordering and bounds validation.

use std::collections::HashSet;

use binrw::Endian;
use tracing::{debug, instrument, trace};

use crate::{
    codec::{looks_like_zlib, CodecPipeline, Transform},
    cursor::ByteCursor,
    entry::EntryDescriptor,
    error::{Error, Result},
    sniff::{sniff_extension, SNIFF_LENGTH},
};

/// Separator used in entry names for nested folders
pub const PATH_SEPARATOR: char = '\\';

/// Lengths from the distance between consecutive offsets.
///
/// The last entry runs to `end`. Offsets must not decrease; equal offsets give zero-length
/// entries.
pub fn derive_lengths_from_offsets(offsets: &[u64], end: u64) -> Result<Vec<u64>> {
    offsets
        .iter()
        .enumerate()
        .map(|(index, &offset)| {
            let next = offsets.get(index + 1).copied().unwrap_or(end);
            next.checked_sub(offset)
                .ok_or(Error::structural("entry offset", offset, next))
        })
        .collect()
}

/// Where an entry stores its own size
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct LengthField {
    /// Position of the field relative to the start of the entry
    pub position: u64,
    /// Width of the field in bytes
    pub width: u8,
    pub endian: Endian,
    /// Bytes the stored value leaves out, typically the entry header
    pub excluded: u64,
}

/// Fill in stored lengths by reading each entry's embedded length field
#[instrument(skip(cursor, entries), err)]
pub fn derive_lengths_from_scan(
    cursor: &mut ByteCursor,
    entries: &mut [EntryDescriptor],
    field: &LengthField,
) -> Result<()> {
    for entry in entries.iter_mut() {
        let at = entry.data_offset().saturating_add(field.position);
        cursor.check_range("length field", at, field.width as u64)?;
        cursor.seek(at)?;
        let value = cursor.read_uint(field.width, field.endian)?;
        let length = value
            .checked_add(field.excluded)
            .ok_or(Error::structural("embedded length", value, u64::MAX - field.excluded))?;
        trace!(offset = entry.data_offset(), length, "scanned entry length");
        entry.set_stored_length(length);
    }
    Ok(())
}

/// Name every unnamed entry `<index>.<ext>`.
///
/// The extension is the entry's type hint, otherwise `default_extension`. Names that clash
/// with an existing name get a `_<n>` suffix so every entry stays addressable.
pub fn resolve_names_or_generate(
    entries: &mut [EntryDescriptor],
    default_extension: &str,
) -> Result<()> {
    let mut taken = entries
        .iter()
        .filter_map(|e| e.name().map(str::to_ascii_lowercase))
        .collect::<HashSet<_>>();

    for (index, entry) in entries.iter_mut().enumerate() {
        if entry.name().is_some() {
            continue;
        }
        let extension = entry.type_hint().unwrap_or(default_extension).to_string();
        let stem = index.to_string();

        let mut name = with_extension(&stem, &extension);
        let mut attempt = 1;
        while !taken.insert(name.to_ascii_lowercase()) {
            name = with_extension(&format!("{stem}_{attempt}"), &extension);
            attempt += 1;
        }
        entry.assign_name(name)?;
    }
    Ok(())
}

fn with_extension(stem: &str, extension: &str) -> String {
    if extension.is_empty() {
        stem.to_string()
    } else {
        format!("{stem}.{extension}")
    }
}

/// Attach a codec pipeline and the decoded size it produces
pub fn attach_codec(entry: &mut EntryDescriptor, pipeline: CodecPipeline, decoded_length: u64) {
    entry.set_codec(pipeline, decoded_length);
}

/// Attach zlib when the entry's stored bytes start with a zlib header.
///
/// Returns whether a codec was attached. Entries that already carry a codec are left alone.
pub fn attach_sniffed_codec(
    cursor: &mut ByteCursor,
    entry: &mut EntryDescriptor,
    decoded_length: u64,
) -> Result<bool> {
    if !entry.codec().is_identity() || entry.stored_length() < 2 {
        return Ok(false);
    }
    cursor.seek(entry.data_offset())?;
    let header = cursor.read_bytes(2)?;
    if !looks_like_zlib(&header) {
        return Ok(false);
    }
    entry.set_codec(Transform::Zlib.into(), decoded_length);
    Ok(true)
}

/// Set a type hint from the leading bytes of every entry that has none.
///
/// Only entries without a codec are sniffed, since their stored bytes are their content.
#[instrument(skip_all, err)]
pub fn sniff_type_hints(cursor: &mut ByteCursor, entries: &mut [EntryDescriptor]) -> Result<()> {
    for entry in entries.iter_mut() {
        if entry.type_hint().is_some() || !entry.codec().is_identity() {
            continue;
        }
        let width = entry.stored_length().min(SNIFF_LENGTH as u64);
        if width == 0 || cursor.check_range("entry", entry.data_offset(), width).is_err() {
            continue;
        }
        cursor.seek(entry.data_offset())?;
        let header = cursor.read_bytes(width)?;
        if let Some(extension) = sniff_extension(&header) {
            entry.set_type_hint(extension);
        }
    }
    Ok(())
}

/// Stable sort by source part, then data offset
pub fn sort_by_offset(entries: &mut [EntryDescriptor]) {
    entries.sort_by_key(|e| (e.source().part_index(), e.data_offset()));
}

/// Every entry's stored range must lie inside its source
pub fn validate(entries: &[EntryDescriptor]) -> Result<()> {
    for entry in entries {
        let source_length = entry.source().length();
        if entry.data_offset() > source_length {
            return Err(Error::structural(
                "entry offset",
                entry.data_offset(),
                source_length,
            ));
        }
        if entry.stored_end() > source_length {
            return Err(Error::structural(
                "entry end",
                entry.stored_end(),
                source_length,
            ));
        }
    }
    Ok(())
}

/// Optionally sort, then validate
pub fn sort_and_validate(entries: &mut [EntryDescriptor], sort: bool) -> Result<()> {
    if sort {
        sort_by_offset(entries);
    }
    validate(entries)?;
    debug!(entries = entries.len(), "entries validated");
    Ok(())
}

/// Remove the first matching prefix and the first matching suffix from a raw name
pub fn strip_affixes<'a>(name: &'a str, prefixes: &[&str], suffixes: &[&str]) -> &'a str {
    let name = prefixes
        .iter()
        .find_map(|p| name.strip_prefix(*p))
        .unwrap_or(name);
    suffixes
        .iter()
        .find_map(|s| name.strip_suffix(*s))
        .unwrap_or(name)
}

/// Replace a name's extension with the one a format-specific type code maps to.
///
/// Unknown codes keep the name as it is.
pub fn substitute_extension(name: &str, type_code: u32, table: &[(u32, &str)]) -> String {
    let Some((_, extension)) = table.iter().find(|(code, _)| *code == type_code) else {
        return name.to_string();
    };
    let stem = match name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => name,
    };
    with_extension(stem, extension)
}

/// Join path components with [`PATH_SEPARATOR`], skipping empty ones
pub fn join_path(parts: &[&str]) -> String {
    let mut path = String::new();
    for part in parts.iter().filter(|p| !p.is_empty()) {
        if !path.is_empty() {
            path.push(PATH_SEPARATOR);
        }
        path.push_str(part);
    }
    path
}
