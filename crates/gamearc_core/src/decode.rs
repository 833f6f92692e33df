//! Reusable directory walking patterns.
//!
//! Format decoders are mostly a byte layout plus one or more of these walks:
//!
//! - [`read_flat_table`]: a counted array of fixed-size records
//! - [`read_offset_table`] followed by [`crate::normalize::derive_lengths_from_offsets`]: offsets
//!   only, lengths from the distance to the next offset
//! - [`resolve_names_from_blob`]: a second pass turning name offsets into strings
//! - [`walk_tree`] and [`prefix_folder_ranges`]: nested folders
//! - [`open_meta_directory`]: a directory that must be decrypted or inflated before it is parsed
//! - [`read_records_until`]: directories without a count, ending at a sentinel or at the first
//!   unreadable record
//!
//! Every declared count goes through [`check_count`] first, which returns the only type the
//! table readers accept.

use std::collections::HashSet;

use binrw::Endian;
use tracing::{debug, instrument, trace, warn};

use crate::{
    codec::{decode_block, CodecPipeline},
    context::DecodeContext,
    cursor::ByteCursor,
    entry::EntryDescriptor,
    error::{Error, Result},
    normalize::join_path,
};

/// An entry count that has passed [`check_count`]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct EntryCount(usize);

impl EntryCount {
    pub fn get(self) -> usize {
        self.0
    }

    /// Remove end-marker records the format counts as entries
    pub fn without_sentinels(self, sentinels: usize) -> EntryCount {
        EntryCount(self.0.saturating_sub(sentinels))
    }
}

/// Validate a declared entry count before anything proportional to it is allocated.
///
/// The count must fit under the configured maximum and `count * min_record_size` must fit in the
/// `available` bytes the records are read from.
pub fn check_count(
    ctx: &DecodeContext,
    count: u64,
    min_record_size: u64,
    available: u64,
) -> Result<EntryCount> {
    let max_entries = ctx.options().max_entries as u64;
    if count > max_entries {
        return Err(Error::structural("entry count", count, max_entries));
    }
    let needed = count.saturating_mul(min_record_size);
    if needed > available {
        return Err(Error::structural("directory size", needed, available));
    }
    Ok(EntryCount(count as usize))
}

/// What a record reader made of one directory record
#[derive(Debug)]
pub enum RecordAction<T> {
    /// A real entry
    Entry(T),
    /// A blank record that does not describe an entry
    Skip,
    /// An end-of-directory sentinel; reading stops successfully
    End,
}

/// Read `count` records, failing on the first record that cannot be read.
///
/// The reader is called with the record index and must leave the cursor at the next record.
#[instrument(skip(cursor, ctx, read_record), err)]
pub fn read_flat_table<T>(
    cursor: &mut ByteCursor,
    ctx: &DecodeContext,
    count: EntryCount,
    mut read_record: impl FnMut(&mut ByteCursor, usize) -> Result<RecordAction<T>>,
) -> Result<Vec<T>> {
    let mut records = Vec::with_capacity(count.get());
    for index in 0..count.get() {
        let offset = cursor.offset()?;
        match read_record(cursor, index)? {
            RecordAction::Entry(record) => records.push(record),
            RecordAction::Skip => trace!(index, offset, "skipping blank record"),
            RecordAction::End => {
                debug!(index, "directory ends at sentinel record");
                break;
            }
        }
        ctx.progress(index, offset);
    }
    Ok(records)
}

/// Read records of `record_size` bytes until `end`, a sentinel, or the first unreadable record.
///
/// For directories with no reliable count. A record that does not parse, or a tail too short to
/// hold a record, ends the walk and keeps what was read; trailing garbage is not an error. I/O
/// failures of the stream itself abort the walk.
#[instrument(skip(cursor, ctx, read_record), err)]
pub fn read_records_until<T>(
    cursor: &mut ByteCursor,
    ctx: &DecodeContext,
    end: u64,
    record_size: u64,
    mut read_record: impl FnMut(&mut ByteCursor, usize) -> Result<RecordAction<T>>,
) -> Result<Vec<T>> {
    let end = end.min(cursor.len());
    let mut records = Vec::new();
    let mut index = 0;
    loop {
        let offset = cursor.offset()?;
        if offset.saturating_add(record_size) > end {
            if offset < end {
                warn!(offset, end, "ignoring trailing bytes after directory");
            }
            break;
        }
        if records.len() >= ctx.options().max_entries {
            return Err(Error::structural(
                "entry count",
                records.len() as u64 + 1,
                ctx.options().max_entries as u64,
            ));
        }
        match read_record(cursor, index) {
            Ok(RecordAction::Entry(record)) => records.push(record),
            Ok(RecordAction::Skip) => trace!(index, offset, "skipping blank record"),
            Ok(RecordAction::End) => {
                debug!(index, "directory ends at sentinel record");
                break;
            }
            Err(e) if is_io_failure(&e) => return Err(e),
            Err(e) => {
                warn!(index, offset, error = %e, "stopping at unreadable record");
                break;
            }
        }
        ctx.progress(index, offset);
        index += 1;
    }
    Ok(records)
}

/// Failures of the underlying storage, as opposed to bytes that do not parse
fn is_io_failure(error: &Error) -> bool {
    matches!(
        error,
        Error::IOError(_) | Error::ResourceFailure { .. } | Error::BinRWError(binrw::Error::Io(_))
    )
}

/// Read `count` offsets of `width` bytes, each multiplied by `scale`.
///
/// Formats that address data in sectors store offsets in units of the sector size; pass it as
/// `scale`, or 1 for byte offsets.
pub fn read_offset_table(
    cursor: &mut ByteCursor,
    count: EntryCount,
    width: u8,
    endian: Endian,
    scale: u64,
) -> Result<Vec<u64>> {
    (0..count.get())
        .map(|_| {
            let raw = cursor.read_uint(width, endian)?;
            raw.checked_mul(scale)
                .ok_or(Error::structural("scaled offset", raw, u64::MAX / scale.max(1)))
        })
        .collect()
}

/// Turn name-table offsets into names.
///
/// `name_offsets` are relative to `blob_offset`; every name must start inside the blob and is
/// read up to its NUL or the blob end.
#[instrument(skip(cursor, name_offsets), err)]
pub fn resolve_names_from_blob(
    cursor: &mut ByteCursor,
    blob_offset: u64,
    blob_length: u64,
    name_offsets: &[u64],
) -> Result<Vec<String>> {
    cursor.check_range("name table", blob_offset, blob_length)?;
    name_offsets
        .iter()
        .map(|&relative| {
            if relative >= blob_length {
                return Err(Error::structural("name offset", relative, blob_length));
            }
            cursor.seek(blob_offset + relative)?;
            cursor.read_null_terminated_string(Some((blob_length - relative) as usize))
        })
        .collect()
}

/// Decode an encrypted or compressed directory block into an in-memory cursor.
///
/// The returned cursor keeps the byte order of `cursor`, so the same record readers work on it.
pub fn open_meta_directory(
    cursor: &mut ByteCursor,
    offset: u64,
    stored_length: u64,
    decoded_length: u64,
    pipeline: &CodecPipeline,
) -> Result<ByteCursor> {
    let block = decode_block(cursor, offset, stored_length, decoded_length, pipeline)?;
    if block.len() as u64 != decoded_length {
        return Err(Error::structural(
            "decoded directory length",
            block.len() as u64,
            decoded_length,
        ));
    }
    Ok(ByteCursor::from_bytes(block).with_endian(cursor.endian()))
}

/// A record found while reading one folder of a tree
#[derive(Debug)]
pub enum TreeNode {
    /// A file, described by an unnamed entry and its own name
    File {
        name: String,
        entry: EntryDescriptor,
    },
    /// A sub-folder whose records start at `offset`
    Folder { name: String, offset: u64 },
}

/// Walk a folder tree where folders point at their children by offset.
///
/// `read_folder` reads the records of the folder at the given offset. Files are named by their
/// folder path joined with `\`. Depth is bounded by `max_depth` and a folder offset that is
/// reached twice fails with [`Error::DirectoryCycle`].
#[instrument(skip(cursor, ctx, read_folder), err)]
pub fn walk_tree(
    cursor: &mut ByteCursor,
    ctx: &DecodeContext,
    root_name: &str,
    root_offset: u64,
    max_depth: usize,
    mut read_folder: impl FnMut(&mut ByteCursor, u64) -> Result<Vec<TreeNode>>,
) -> Result<Vec<EntryDescriptor>> {
    struct Walk<'a, F> {
        read_folder: F,
        ctx: &'a DecodeContext,
        visited: HashSet<u64>,
        max_depth: usize,
        entries: Vec<EntryDescriptor>,
    }

    impl<F> Walk<'_, F>
    where
        F: FnMut(&mut ByteCursor, u64) -> Result<Vec<TreeNode>>,
    {
        fn folder(
            &mut self,
            cursor: &mut ByteCursor,
            path: &str,
            offset: u64,
            depth: usize,
        ) -> Result<()> {
            if depth > self.max_depth {
                return Err(Error::structural("folder depth", depth as u64, self.max_depth as u64));
            }
            if !self.visited.insert(offset) {
                return Err(Error::DirectoryCycle(offset));
            }
            trace!(path, offset, depth, "reading folder");

            for node in (self.read_folder)(cursor, offset)? {
                match node {
                    TreeNode::File { name, mut entry } => {
                        if self.entries.len() >= self.ctx.options().max_entries {
                            return Err(Error::structural(
                                "entry count",
                                self.entries.len() as u64 + 1,
                                self.ctx.options().max_entries as u64,
                            ));
                        }
                        entry.assign_name(join_path(&[path, &name]))?;
                        self.ctx.progress(self.entries.len(), entry.data_offset());
                        self.entries.push(entry);
                    }
                    TreeNode::Folder { name, offset } => {
                        self.folder(cursor, &join_path(&[path, &name]), offset, depth + 1)?;
                    }
                }
            }
            Ok(())
        }
    }

    let mut walk = Walk {
        read_folder: &mut read_folder,
        ctx,
        visited: HashSet::new(),
        max_depth,
        entries: Vec::new(),
    };
    walk.folder(cursor, root_name, root_offset, 0)?;
    Ok(walk.entries)
}

/// A folder that owns a contiguous range of an already-read flat file table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderRange {
    pub name: String,
    /// Index of the parent folder; parents must come before their children
    pub parent: Option<usize>,
    pub first_file: usize,
    pub file_count: usize,
}

/// Prefix file names with the path of the folder whose range contains them.
///
/// Requiring every parent index to be lower than the folder's own index rules out cycles.
pub fn prefix_folder_ranges(names: &mut [String], folders: &[FolderRange]) -> Result<()> {
    let mut paths: Vec<String> = Vec::with_capacity(folders.len());
    for (index, folder) in folders.iter().enumerate() {
        let path = match folder.parent {
            Some(parent) if parent < index => join_path(&[&paths[parent], &folder.name]),
            Some(parent) => return Err(Error::structural("parent folder index", parent as u64, index as u64)),
            None => folder.name.clone(),
        };

        let end = folder.first_file.saturating_add(folder.file_count);
        if end > names.len() {
            return Err(Error::structural("folder file range", end as u64, names.len() as u64));
        }
        for name in &mut names[folder.first_file..end] {
            *name = join_path(&[&path, name]);
        }
        paths.push(path);
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use binrw::Endian;
    use pretty_assertions::assert_eq;
    use tracing_test::traced_test;

    use crate::context::{DecodeContext, DecodeOptions};
    use crate::cursor::ByteCursor;
    use crate::decode::{
        check_count, prefix_folder_ranges, read_flat_table, read_offset_table, read_records_until,
        resolve_names_from_blob, walk_tree, FolderRange, RecordAction, TreeNode,
    };
    use crate::entry::{EntryDescriptor, SourceLocation};
    use crate::error::{Error, Result};

    #[test]
    fn count_guard_rejects_impossible_counts() {
        let ctx = DecodeContext::default();

        assert!(check_count(&ctx, 4, 16, 64).is_ok());
        assert!(matches!(
            check_count(&ctx, 5, 16, 64),
            Err(Error::StructuralViolation { what: "directory size", .. })
        ));
        assert!(matches!(
            check_count(&ctx, u32::MAX as u64, 0, u64::MAX),
            Err(Error::StructuralViolation { what: "entry count", .. })
        ));
    }

    #[test]
    fn count_guard_respects_configured_maximum() {
        let ctx = DecodeContext::new(DecodeOptions::builder().max_entries(2).build());
        assert!(check_count(&ctx, 3, 1, 100).is_err());
    }

    #[test]
    fn flat_table_skips_blanks_and_stops_at_sentinel() -> Result<()> {
        #[rustfmt::skip]
        let mut cursor = ByteCursor::from_bytes(vec![
            0x01, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00,
            0x03, 0x00, 0x00, 0x00,
            0xFF, 0xFF, 0xFF, 0xFF,
            0x05, 0x00, 0x00, 0x00,
        ]);
        let ctx = DecodeContext::default();
        let count = check_count(&ctx, 5, 4, cursor.len())?;

        let values = read_flat_table(&mut cursor, &ctx, count, |c, _| {
            Ok(match c.read_u32()? {
                0 => RecordAction::Skip,
                u32::MAX => RecordAction::End,
                v => RecordAction::Entry(v),
            })
        })?;

        assert_eq!(values, vec![1, 3]);

        Ok(())
    }

    #[test]
    fn flat_table_fails_fast() {
        let mut cursor = ByteCursor::from_bytes(vec![0x01, 0x00, 0x00, 0x00, 0x02]);
        let ctx = DecodeContext::default();
        let count = check_count(&ctx, 2, 1, cursor.len()).unwrap();

        let result = read_flat_table(&mut cursor, &ctx, count, |c, _| {
            Ok(RecordAction::Entry(c.read_u32()?))
        });
        assert!(result.is_err());
    }

    #[traced_test]
    #[test]
    fn record_walk_tolerates_trailing_garbage() -> Result<()> {
        let mut cursor = ByteCursor::from_bytes(vec![0x01, 0x00, 0x02, 0x00, 0xEE]);
        let ctx = DecodeContext::default();

        let values = read_records_until(&mut cursor, &ctx, u64::MAX, 2, |c, _| {
            Ok(RecordAction::Entry(c.read_u16()?))
        })?;

        assert_eq!(values, vec![1, 2]);
        assert!(logs_contain("ignoring trailing bytes"));

        Ok(())
    }

    /// Serves `data` but fails every read from `fail_at` on
    struct FailingDisk {
        data: std::io::Cursor<Vec<u8>>,
        fail_at: u64,
    }

    impl std::io::Read for FailingDisk {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.data.position() >= self.fail_at {
                return Err(std::io::Error::other("disk failure"));
            }
            let allowed = (self.fail_at - self.data.position()) as usize;
            let len = buf.len().min(allowed);
            std::io::Read::read(&mut self.data, &mut buf[..len])
        }
    }

    impl std::io::Seek for FailingDisk {
        fn seek(&mut self, pos: std::io::SeekFrom) -> std::io::Result<u64> {
            std::io::Seek::seek(&mut self.data, pos)
        }
    }

    #[traced_test]
    #[test]
    fn record_walk_aborts_on_read_failure() -> Result<()> {
        let disk = FailingDisk {
            data: std::io::Cursor::new(vec![0x01, 0x01, 0x01, 0x01, 0x02, 0x02, 0x02, 0x02]),
            fail_at: 4,
        };
        let mut cursor = ByteCursor::new(disk)?;
        let ctx = DecodeContext::default();

        let result = read_records_until(&mut cursor, &ctx, u64::MAX, 2, |c, _| {
            Ok(RecordAction::Entry(c.read_u16()?))
        });

        assert!(matches!(result, Err(Error::IOError(_))));
        assert!(!logs_contain("stopping at unreadable record"));

        Ok(())
    }

    #[test]
    fn offset_table_scales_sector_offsets() -> Result<()> {
        let mut cursor = ByteCursor::from_bytes(vec![0x00, 0x01, 0x00, 0x03]);
        let ctx = DecodeContext::default();
        let count = check_count(&ctx, 2, 2, cursor.len())?;

        let offsets = read_offset_table(&mut cursor, count, 2, Endian::Big, 0x800)?;
        assert_eq!(offsets, vec![0x800, 0x1800]);

        Ok(())
    }

    #[test]
    fn names_resolve_against_blob() -> Result<()> {
        let mut cursor = ByteCursor::from_bytes(b"xxa.txt\0b.txt\0".to_vec());

        let names = resolve_names_from_blob(&mut cursor, 2, 12, &[6, 0])?;
        assert_eq!(names, vec!["b.txt".to_string(), "a.txt".to_string()]);

        assert!(resolve_names_from_blob(&mut cursor, 2, 12, &[12]).is_err());

        Ok(())
    }

    fn file(offset: u64) -> EntryDescriptor {
        EntryDescriptor::builder()
            .source(SourceLocation::memory(100))
            .data_offset(offset)
            .stored_length(1)
            .build()
    }

    #[test]
    fn tree_walk_builds_paths() -> Result<()> {
        let mut cursor = ByteCursor::from_bytes(vec![0u8; 100]);
        let ctx = DecodeContext::default();

        let entries = walk_tree(&mut cursor, &ctx, "root", 0, 8, |_, offset| {
            Ok(match offset {
                0 => vec![
                    TreeNode::File { name: "leaf1".into(), entry: file(10) },
                    TreeNode::Folder { name: "sub".into(), offset: 50 },
                    TreeNode::File { name: "leaf2".into(), entry: file(11) },
                ],
                _ => vec![TreeNode::File { name: "leaf3".into(), entry: file(12) }],
            })
        })?;

        let names = entries.iter().filter_map(|e| e.name()).collect::<Vec<_>>();
        assert_eq!(names, vec!["root\\leaf1", "root\\sub\\leaf3", "root\\leaf2"]);

        Ok(())
    }

    #[test]
    fn tree_walk_detects_cycles() {
        let mut cursor = ByteCursor::from_bytes(vec![0u8; 8]);
        let ctx = DecodeContext::default();

        let result = walk_tree(&mut cursor, &ctx, "root", 0, 64, |_, _| {
            Ok(vec![TreeNode::Folder { name: "self".into(), offset: 0 }])
        });
        assert!(matches!(result, Err(Error::DirectoryCycle(0))));
    }

    #[test]
    fn tree_walk_bounds_depth() {
        let mut cursor = ByteCursor::from_bytes(vec![0u8; 8]);
        let ctx = DecodeContext::default();

        let result = walk_tree(&mut cursor, &ctx, "root", 0, 3, |_, offset| {
            Ok(vec![TreeNode::Folder { name: "deeper".into(), offset: offset + 1 }])
        });
        assert!(matches!(
            result,
            Err(Error::StructuralViolation { what: "folder depth", .. })
        ));
    }

    #[test]
    fn folder_ranges_prefix_names() -> Result<()> {
        let mut names = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let folders = vec![
            FolderRange { name: "data".into(), parent: None, first_file: 0, file_count: 1 },
            FolderRange { name: "maps".into(), parent: Some(0), first_file: 1, file_count: 2 },
        ];

        prefix_folder_ranges(&mut names, &folders)?;
        assert_eq!(names, vec!["data\\a", "data\\maps\\b", "data\\maps\\c"]);

        Ok(())
    }

    #[test]
    fn folder_ranges_reject_forward_parents() {
        let mut names = vec!["a".to_string()];
        let folders = vec![FolderRange { name: "loop".into(), parent: Some(0), first_file: 0, file_count: 1 }];

        assert!(prefix_folder_ranges(&mut names, &folders).is_err());
    }
}
