//! The normalized description of one file inside an archive.

use std::{
    fmt,
    path::{Path, PathBuf},
    sync::Arc,
};

use bon::bon;
use indexmap::IndexMap;

use crate::{
    codec::CodecPipeline,
    error::{Error, Result},
};

/// Which physical file an entry's bytes live in
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct SourceLocation {
    part: u16,
    path: Option<Arc<Path>>,
    length: u64,
}

impl SourceLocation {
    /// An in-memory source with no backing file
    pub fn memory(length: u64) -> SourceLocation {
        SourceLocation {
            part: 0,
            path: None,
            length,
        }
    }

    /// The archive file that was opened
    pub fn file(path: impl AsRef<Path>, length: u64) -> SourceLocation {
        SourceLocation {
            part: 0,
            path: Some(Arc::from(path.as_ref())),
            length,
        }
    }

    /// A sibling file holding part of a spanned archive. Part numbers start at 1.
    pub fn part(index: u16, path: impl AsRef<Path>, length: u64) -> SourceLocation {
        SourceLocation {
            part: index,
            path: Some(Arc::from(path.as_ref())),
            length,
        }
    }

    /// 0 for the opened archive, otherwise the spanned part number
    pub fn part_index(&self) -> u16 {
        self.part
    }

    pub fn is_primary(&self) -> bool {
        self.part == 0
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Length of the source in bytes
    pub fn length(&self) -> u64 {
        self.length
    }

    /// Lower-cased file extension of the source path
    pub fn extension(&self) -> Option<String> {
        self.path
            .as_deref()
            .and_then(Path::extension)
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
    }

    /// The source path with its extension replaced, for locating paired files
    pub fn sibling(&self, extension: &str) -> Option<PathBuf> {
        self.path.as_deref().map(|p| p.with_extension(extension))
    }
}

/// A value in an entry's format-specific sidecar
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[cfg_attr(feature = "serde", serde(untagged))]
pub enum PropertyValue {
    Int(i64),
    Text(Box<str>),
    Bytes(Box<[u8]>),
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::Int(v) => write!(f, "{v}"),
            PropertyValue::Text(v) => write!(f, "{v}"),
            PropertyValue::Bytes(v) => write!(f, "{} bytes", v.len()),
        }
    }
}

impl From<i64> for PropertyValue {
    fn from(value: i64) -> Self {
        PropertyValue::Int(value)
    }
}

impl From<u32> for PropertyValue {
    fn from(value: u32) -> Self {
        PropertyValue::Int(value.into())
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        PropertyValue::Text(value.into())
    }
}

/// One logical file of an archive
///
/// Descriptors are produced fresh by every decode. The name cannot be changed once assigned;
/// [`EntryDescriptor::renamed`] makes a new descriptor for the encoder instead.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct EntryDescriptor {
    source: SourceLocation,
    name: Option<Box<str>>,
    data_offset: u64,
    stored_length: u64,
    decoded_length: u64,
    codec: CodecPipeline,
    type_hint: Option<Box<str>>,
    properties: IndexMap<Box<str>, PropertyValue>,
}

#[bon]
impl EntryDescriptor {
    /// Describe an entry. `decoded_length` defaults to `stored_length`.
    #[builder]
    pub fn new(
        source: SourceLocation,
        #[builder(into)] name: Option<Box<str>>,
        data_offset: u64,
        #[builder(default)] stored_length: u64,
        decoded_length: Option<u64>,
        #[builder(default)] codec: CodecPipeline,
        #[builder(into)] type_hint: Option<Box<str>>,
    ) -> EntryDescriptor {
        EntryDescriptor {
            source,
            name,
            data_offset,
            stored_length,
            decoded_length: decoded_length.unwrap_or(stored_length),
            codec,
            type_hint,
            properties: IndexMap::new(),
        }
    }
}

impl EntryDescriptor {
    pub fn source(&self) -> &SourceLocation {
        &self.source
    }

    /// Get the name of the entry, if one has been assigned
    ///
    /// # Warnings
    ///
    /// It is dangerous to use this name directly when extracting an archive.
    /// It may contain an absolute path (`/etc/shadow`), or break out of the
    /// current directory (`../runtime`).
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Byte offset of the stored data within [`EntryDescriptor::source`]
    pub fn data_offset(&self) -> u64 {
        self.data_offset
    }

    /// Bytes the entry occupies in the archive
    pub fn stored_length(&self) -> u64 {
        self.stored_length
    }

    /// Size of the entry once its codec pipeline has been applied
    pub fn decoded_length(&self) -> u64 {
        self.decoded_length
    }

    /// End of the stored range, saturating on overflow so validation can reject it
    pub fn stored_end(&self) -> u64 {
        self.data_offset.saturating_add(self.stored_length)
    }

    pub fn codec(&self) -> &CodecPipeline {
        &self.codec
    }

    pub fn type_hint(&self) -> Option<&str> {
        self.type_hint.as_deref()
    }

    pub fn properties(&self) -> &IndexMap<Box<str>, PropertyValue> {
        &self.properties
    }

    pub fn property(&self, key: &str) -> Option<&PropertyValue> {
        self.properties.get(key)
    }

    /// Assign a name to an unnamed entry. Names are never replaced.
    pub fn assign_name(&mut self, name: impl Into<Box<str>>) -> Result<()> {
        if let Some(existing) = &self.name {
            return Err(Error::CustomError(format!(
                "entry at {:#x} is already named {existing}",
                self.data_offset
            )));
        }
        self.name = Some(name.into());
        Ok(())
    }

    /// A copy of this descriptor carrying a different name
    pub fn renamed(&self, name: impl Into<Box<str>>) -> EntryDescriptor {
        EntryDescriptor {
            name: Some(name.into()),
            ..self.clone()
        }
    }

    /// Attach a sidecar value
    pub fn with_property(mut self, key: &str, value: impl Into<PropertyValue>) -> EntryDescriptor {
        self.insert_property(key, value);
        self
    }

    pub fn insert_property(&mut self, key: &str, value: impl Into<PropertyValue>) {
        self.properties.insert(key.into(), value.into());
    }

    pub fn set_type_hint(&mut self, hint: impl Into<Box<str>>) {
        self.type_hint = Some(hint.into());
    }

    pub(crate) fn set_stored_length(&mut self, stored_length: u64) {
        if self.codec.is_identity() {
            self.decoded_length = stored_length;
        }
        self.stored_length = stored_length;
    }

    pub(crate) fn set_codec(&mut self, codec: CodecPipeline, decoded_length: u64) {
        self.codec = codec;
        self.decoded_length = decoded_length;
    }
}
