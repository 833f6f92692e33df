//! State and options scoped to a single decode call.

use std::{
    collections::HashMap,
    fmt,
    path::PathBuf,
    sync::{
        atomic::{AtomicU64, AtomicUsize, Ordering},
        Arc,
    },
};

use bon::Builder;
use tracing::trace;

use crate::names::NameHashTable;

/// Hard ceiling on entry counts, whatever the archive claims
pub const DEFAULT_MAX_ENTRIES: usize = 1 << 20;

/// Receives advisory progress while a directory is walked
pub trait ProgressObserver: Send + Sync {
    /// Called after entry `index` has been read from the directory
    fn on_entry(&self, index: usize, offset: u64);
}

/// A [`ProgressObserver`] that only counts
#[derive(Debug, Default)]
pub struct CountingProgress {
    entries: AtomicUsize,
    last_offset: AtomicU64,
}

impl CountingProgress {
    pub fn entries(&self) -> usize {
        self.entries.load(Ordering::Relaxed)
    }

    pub fn last_offset(&self) -> u64 {
        self.last_offset.load(Ordering::Relaxed)
    }
}

impl ProgressObserver for CountingProgress {
    fn on_entry(&self, _index: usize, offset: u64) {
        self.entries.fetch_add(1, Ordering::Relaxed);
        self.last_offset.store(offset, Ordering::Relaxed);
    }
}

/// Options shared by every decode
#[derive(Clone, Builder)]
pub struct DecodeOptions {
    /// Upper bound on any declared entry count
    #[builder(default = DEFAULT_MAX_ENTRIES)]
    pub max_entries: usize,

    /// A `hash=name` file for formats that only store name hashes
    pub name_table: Option<PathBuf>,

    /// Re-order entries by data offset after decoding
    #[builder(default)]
    pub sort_by_offset: bool,

    pub progress: Option<Arc<dyn ProgressObserver>>,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        DecodeOptions::builder().build()
    }
}

impl fmt::Debug for DecodeOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecodeOptions")
            .field("max_entries", &self.max_entries)
            .field("name_table", &self.name_table)
            .field("sort_by_offset", &self.sort_by_offset)
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

/// A 256 colour RGB palette
pub type Palette = Box<[[u8; 3]; 256]>;

/// Transient lookups available to a decoder for one decode
#[derive(Debug, Default)]
pub struct DecodeContext {
    options: DecodeOptions,
    names: Option<NameHashTable>,
    /// Palettes shared between entries of the archive being decoded
    pub palettes: HashMap<u32, Palette>,
}

impl DecodeContext {
    pub fn new(options: DecodeOptions) -> DecodeContext {
        DecodeContext {
            options,
            names: None,
            palettes: HashMap::new(),
        }
    }

    pub fn options(&self) -> &DecodeOptions {
        &self.options
    }

    /// Reset per-archive caches. Called before every decode.
    pub fn begin(&mut self, format: &str) {
        trace!(format, cached = self.palettes.len(), "clearing decode caches");
        self.palettes.clear();
    }

    /// The name hash table, loaded on first use
    pub fn names(&mut self) -> &NameHashTable {
        let path = self.options.name_table.as_deref();
        self.names.get_or_insert_with(|| match path {
            Some(p) => NameHashTable::load(p),
            None => NameHashTable::new(),
        })
    }

    /// Install an already loaded name table
    pub fn set_names(&mut self, names: NameHashTable) {
        self.names = Some(names);
    }

    /// Report progress to the observer, if any
    pub fn progress(&self, index: usize, offset: u64) {
        if let Some(observer) = &self.options.progress {
            observer.on_entry(index, offset);
        }
    }
}
