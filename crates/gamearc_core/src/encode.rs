//! Types shared by directory encoders.

use std::{
    fs,
    io::{Read, Write},
    path::Path,
};

use tempfile::NamedTempFile;
use tracing::{info, instrument};

use crate::{
    codec::PipelineReader,
    cursor::ByteCursor,
    entry::EntryDescriptor,
    error::{Error, Result},
};

/// Where an edited entry's content comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryContent {
    /// Keep the entry's content from the original archive
    Original,
    /// Use these bytes as the entry's decoded content
    Replaced(Vec<u8>),
}

/// One entry of the archive an encoder should produce
#[derive(Debug, Clone, PartialEq)]
pub struct EditedEntry {
    pub descriptor: EntryDescriptor,
    pub content: EntryContent,
}

impl EditedEntry {
    /// Keep an entry as it is
    pub fn original(descriptor: EntryDescriptor) -> EditedEntry {
        EditedEntry {
            descriptor,
            content: EntryContent::Original,
        }
    }

    /// Replace an entry's content
    pub fn replaced(descriptor: EntryDescriptor, content: Vec<u8>) -> EditedEntry {
        EditedEntry {
            descriptor,
            content: EntryContent::Replaced(content),
        }
    }

    /// The entry's name; encoders need every entry named
    pub fn name(&self) -> Result<&str> {
        self.descriptor.name().ok_or_else(|| {
            Error::CustomError(format!(
                "entry at {:#x} has no name",
                self.descriptor.data_offset()
            ))
        })
    }

    /// The decoded content, read through the original archive when unchanged
    pub fn content_bytes(&self, original: &mut ByteCursor) -> Result<Vec<u8>> {
        match &self.content {
            EntryContent::Replaced(bytes) => Ok(bytes.clone()),
            EntryContent::Original => {
                let entry = &self.descriptor;
                if !entry.source().is_primary() {
                    return Err(Error::variant(
                        "entries stored in other archive parts cannot be re-encoded",
                    ));
                }
                original.check_range("entry", entry.data_offset(), entry.stored_length())?;
                original.seek(entry.data_offset())?;
                let mut reader = PipelineReader::new(
                    &mut *original,
                    entry.stored_length(),
                    entry.decoded_length(),
                    entry.codec(),
                )?;
                let mut content = Vec::with_capacity(entry.decoded_length() as usize);
                reader.read_to_end(&mut content)?;
                Ok(content)
            }
        }
    }
}

/// Narrow a size or offset to a 32-bit directory field
pub fn to_u32(what: &'static str, value: u64) -> Result<u32> {
    u32::try_from(value).map_err(|_| Error::structural(what, value, u32::MAX as u64))
}

/// Write a freshly encoded archive to `path`.
///
/// The bytes go to a temporary file in the same directory which then replaces `path`, so a
/// failed write leaves any existing file untouched.
#[instrument(skip(bytes), fields(length = bytes.len()), err)]
pub fn write_archive(path: &Path, bytes: &[u8]) -> Result<()> {
    let directory = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let resource_failure = |source| Error::ResourceFailure {
        path: path.to_path_buf(),
        source,
    };

    fs::create_dir_all(directory).map_err(resource_failure)?;
    let mut file = NamedTempFile::new_in(directory).map_err(resource_failure)?;
    file.write_all(bytes)?;
    file.as_file().sync_all()?;
    file.persist(path).map_err(|e| resource_failure(e.error))?;

    info!(path = %path.display(), "archive written");
    Ok(())
}
