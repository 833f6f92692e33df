//! Reading entries out of a decoded archive

use std::{
    fmt::{self, Debug},
    io::Read,
};

use indexmap::IndexMap;
use tracing::instrument;

use crate::{
    codec::PipelineReader,
    cursor::ByteCursor,
    entry::EntryDescriptor,
    error::{Error, FileNotFoundError, Result},
};

/// A reader producing one entry's decoded content
pub struct EntryReader<'a> {
    entry: &'a EntryDescriptor,
    reader: PipelineReader<'a>,
}

impl Debug for EntryReader<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "EntryReader({:#?})", self.entry)
    }
}

impl EntryReader<'_> {
    /// Get the name of the entry
    ///
    /// # Warnings
    ///
    /// It is dangerous to use this name directly when extracting an archive.
    /// It may contain an absolute path (`/etc/shadow`), or break out of the
    /// current directory (`../runtime`). Carelessly writing to these paths
    /// allows an attacker to craft an archive that will overwrite critical
    /// files.
    pub fn name(&self) -> &str {
        self.entry.name().unwrap_or_default()
    }

    /// The descriptor this reader was opened for
    pub fn descriptor(&self) -> &EntryDescriptor {
        self.entry
    }

    /// Get the size of the entry, in bytes, in the archive
    pub fn stored_size(&self) -> u64 {
        self.entry.stored_length()
    }

    /// Get the size of the entry, in bytes, once decoded
    pub fn size(&self) -> u64 {
        self.entry.decoded_length()
    }
}

impl Read for EntryReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.reader.read(buf)
    }
}

/// A decoded archive
///
/// Holds the cursor the directory was read from and the entries found in it.
///
/// ```no_run
/// fn list_contents(archive: &mut gamearc_core::Archive) -> gamearc_core::error::Result<()> {
///     for i in 0..archive.len() {
///         let mut entry = archive.by_index(i)?;
///         println!("Filename: {}", entry.name());
///         std::io::copy(&mut entry, &mut std::io::stdout())?;
///     }
///
///     Ok(())
/// }
/// ```
pub struct Archive {
    format: &'static str,
    cursor: ByteCursor,
    entries: Vec<EntryDescriptor>,
    names: IndexMap<Box<str>, usize>,
}

impl Debug for Archive {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Archive")
            .field("format", &self.format)
            .field("entries", &self.entries.len())
            .finish()
    }
}

impl Archive {
    /// Wrap decoded entries. When several entries share a name, lookups by name find the first.
    pub fn new(format: &'static str, cursor: ByteCursor, entries: Vec<EntryDescriptor>) -> Archive {
        let mut names = IndexMap::with_capacity(entries.len());
        for (index, entry) in entries.iter().enumerate() {
            if let Some(name) = entry.name() {
                names.entry(name.into()).or_insert(index);
            }
        }
        Archive {
            format,
            cursor,
            entries,
            names,
        }
    }

    /// Id of the format that decoded this archive
    pub fn format(&self) -> &'static str {
        self.format
    }

    /// Number of entries contained in this archive.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether this archive contains no entries
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn entries(&self) -> &[EntryDescriptor] {
        &self.entries
    }

    /// Returns an iterator over all the entry names in this archive.
    pub fn file_names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().filter_map(|e| e.name())
    }

    /// Get the index of an entry by name, if it's present.
    #[inline(always)]
    pub fn index_for_name(&self, name: &str) -> Option<usize> {
        self.names.get(name).copied()
    }

    /// Total decoded size of the entries, if it can be represented
    pub fn decompressed_size(&self) -> Option<u128> {
        let mut total = 0u128;
        for entry in &self.entries {
            total = total.checked_add(entry.decoded_length() as u128)?;
        }
        Some(total)
    }

    /// Search for an entry by name
    pub fn by_name(&mut self, name: &str) -> Result<EntryReader<'_>> {
        let Some(index) = self.index_for_name(name) else {
            return Err(Error::FileNotFound(FileNotFoundError::Name(name.to_owned())));
        };
        self.by_index(index)
    }

    /// Get an entry by index
    ///
    /// Entries stored in another part of a spanned archive open that part for the duration of
    /// the read.
    #[instrument(skip(self))]
    pub fn by_index(&mut self, index: usize) -> Result<EntryReader<'_>> {
        let entry = self
            .entries
            .get(index)
            .ok_or(Error::FileNotFound(FileNotFoundError::Index(index)))?;

        let reader = if entry.source().is_primary() {
            self.cursor
                .check_range("entry", entry.data_offset(), entry.stored_length())?;
            self.cursor.seek(entry.data_offset())?;
            PipelineReader::new(
                &mut self.cursor,
                entry.stored_length(),
                entry.decoded_length(),
                entry.codec(),
            )?
        } else {
            let path = entry.source().path().ok_or_else(|| {
                Error::variant(format!("part {} has no path", entry.source().part_index()))
            })?;
            let mut part = ByteCursor::open(path)?;
            part.check_range("entry", entry.data_offset(), entry.stored_length())?;
            part.seek(entry.data_offset())?;
            PipelineReader::new(
                part,
                entry.stored_length(),
                entry.decoded_length(),
                entry.codec(),
            )?
        };

        Ok(EntryReader { entry, reader })
    }

    /// Read an entry's whole decoded content
    pub fn read_entry(&mut self, index: usize) -> Result<Vec<u8>> {
        let mut reader = self.by_index(index)?;
        let mut content = Vec::with_capacity(reader.size().min(u32::MAX as u64) as usize);
        reader.read_to_end(&mut content)?;
        Ok(content)
    }

    /// The cursor the archive was decoded from, for encoders that copy from it
    pub fn cursor(&mut self) -> &mut ByteCursor {
        &mut self.cursor
    }

    /// Unwrap and return the cursor
    ///
    /// The position of the cursor is undefined.
    pub fn into_inner(self) -> ByteCursor {
        self.cursor
    }
}

#[cfg(test)]
mod test {
    use std::io::Read;

    use pretty_assertions::assert_eq;

    use crate::archive::Archive;
    use crate::codec::{encode_block, Transform};
    use crate::cursor::ByteCursor;
    use crate::entry::{EntryDescriptor, SourceLocation};
    use crate::error::{Error, Result};

    fn hello_archive() -> Result<Archive> {
        let mut data = b"Hello World".to_vec();
        let packed = encode_block(b"World Hello", &Transform::Zlib.into())?;
        data.extend_from_slice(&packed);
        let source = SourceLocation::memory(data.len() as u64);

        let entries = vec![
            EntryDescriptor::builder()
                .source(source.clone())
                .name("hello.txt")
                .data_offset(0)
                .stored_length(11)
                .build(),
            EntryDescriptor::builder()
                .source(source)
                .name("world.txt")
                .data_offset(11)
                .stored_length(packed.len() as u64)
                .decoded_length(11)
                .codec(Transform::Zlib.into())
                .build(),
        ];
        Ok(Archive::new("test", ByteCursor::from_bytes(data), entries))
    }

    #[test]
    fn reads_entries_by_index_and_name() -> Result<()> {
        let mut archive = hello_archive()?;
        assert_eq!(archive.len(), 2);
        assert_eq!(archive.format(), "test");
        assert_eq!(archive.file_names().collect::<Vec<_>>(), vec!["hello.txt", "world.txt"]);
        assert_eq!(archive.decompressed_size(), Some(22));

        assert_eq!(archive.read_entry(0)?, b"Hello World".to_vec());

        let mut buffer = Vec::new();
        let mut entry = archive.by_name("world.txt")?;
        assert_eq!(entry.size(), 11);
        entry.read_to_end(&mut buffer)?;
        assert_eq!(buffer, b"World Hello".to_vec());

        Ok(())
    }

    #[test]
    fn missing_entries_are_reported() -> Result<()> {
        let mut archive = hello_archive()?;

        assert!(matches!(archive.by_index(5), Err(Error::FileNotFound(_))));
        assert!(matches!(archive.by_name("nope"), Err(Error::FileNotFound(_))));

        Ok(())
    }
}
