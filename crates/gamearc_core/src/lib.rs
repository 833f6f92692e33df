//! Shared machinery for reading and writing the directories of game archive files.
//!
//! Game archives pack many files into one container with a directory describing where each file
//! lives. Every format lays that directory out differently, but the layouts fall into a handful of
//! patterns. This crate provides those patterns; the format plugins in `gamearc_formats` are thin
//! descriptions of a byte layout on top of them.
//!
//! # Decoding
//!
//! Opening an archive goes through three stages:
//!
//! 1. **Identification.** Every registered [`FormatDecoder`] rates the stream with a
//!    [`signature::ScoreCard`]. Rating reads only, restores the cursor position and cannot fail.
//! 2. **Directory walk.** The best match walks its directory with the helpers in [`decode`]
//!    and produces one [`EntryDescriptor`] per file.
//! 3. **Normalization.** Missing lengths, names and codecs are filled in by [`normalize`], and
//!    every entry is checked to lie inside its source.
//!
//! Entry content is never touched while the directory is read. An [`Archive`] hands out
//! [`archive::EntryReader`]s that pull stored bytes through the entry's [`CodecPipeline`]
//! (decryption, then decompression) on demand.
//!
//! | Directory pattern        | Helpers                                                             |
//! |--------------------------|---------------------------------------------------------------------|
//! | Flat table               | [`decode::check_count`], [`decode::read_flat_table`]                |
//! | Two-phase offsets        | [`decode::read_offset_table`], [`normalize::derive_lengths_from_offsets`] |
//! | Separate name pass       | [`decode::resolve_names_from_blob`], [`normalize::strip_affixes`]   |
//! | Nested folders           | [`decode::walk_tree`], [`decode::prefix_folder_ranges`]             |
//! | Encrypted or packed directory | [`decode::open_meta_directory`]                                |
//! | No declared count        | [`decode::read_records_until`]                                      |
//!
//! # Encoding
//!
//! Formats that can be written provide a [`FormatEncoder`]. It receives the original archive and
//! a list of [`encode::EditedEntry`] values and returns the new archive's bytes, which
//! [`encode::write_archive`] stores without touching the source file.

pub mod archive;
pub mod codec;
pub mod context;
pub mod cursor;
pub mod decode;
pub mod encode;
pub mod entry;
pub mod error;
pub mod names;
pub mod normalize;
pub mod registry;
pub mod signature;
pub mod sniff;

pub use archive::Archive;
pub use codec::{CodecPipeline, Transform};
pub use context::{DecodeContext, DecodeOptions};
pub use cursor::{ByteCursor, ByteWriter};
pub use entry::{EntryDescriptor, PropertyValue, SourceLocation};
pub use registry::{FormatDecoder, FormatEncoder, FormatRegistry, Identification, RegistryOptions};
pub use signature::{Confidence, ScoreCard};
