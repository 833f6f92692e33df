//! External `hash=name` lookup files.
//!
//! Some formats only store a hash of each file name. A side file with one `hash=name` pair per
//! line restores the original names. The file is optional: if it is missing or unreadable the
//! table is empty and entries fall back to generated names.

use std::{fs, path::Path};

use indexmap::IndexMap;
use tracing::{debug, instrument, warn};

/// Hash to file name lookup
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NameHashTable {
    names: IndexMap<Box<str>, Box<str>>,
}

impl NameHashTable {
    pub fn new() -> NameHashTable {
        NameHashTable::default()
    }

    /// Load a lookup file. Failing to read it is logged and yields an empty table.
    #[instrument]
    pub fn load(path: &Path) -> NameHashTable {
        match fs::read_to_string(path) {
            Ok(text) => {
                let table = NameHashTable::parse(&text);
                debug!(names = table.len(), "loaded name hash table");
                table
            }
            Err(e) => {
                warn!(error = %e, "name hash table unavailable, using generated names");
                NameHashTable::new()
            }
        }
    }

    /// Parse `hash=name` lines. Blank lines, `#` comments and lines without `=` are skipped.
    pub fn parse(text: &str) -> NameHashTable {
        let names = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .filter_map(|line| line.split_once('='))
            .map(|(hash, name)| (normalize_hash(hash).into(), name.trim().into()))
            .collect();
        NameHashTable { names }
    }

    pub fn insert(&mut self, hash: &str, name: &str) {
        self.names.insert(normalize_hash(hash).into(), name.into());
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Look a hash up by its textual form, ignoring case and a `0x` prefix
    pub fn lookup(&self, hash: &str) -> Option<&str> {
        self.names.get(normalize_hash(hash).as_str()).map(|n| n.as_ref())
    }

    /// Look up a 32 bit hash written as eight hex digits
    pub fn lookup_u32(&self, hash: u32) -> Option<&str> {
        self.lookup(&format!("{hash:08x}"))
    }

    /// Look up a 64 bit hash written as sixteen hex digits
    pub fn lookup_u64(&self, hash: u64) -> Option<&str> {
        self.lookup(&format!("{hash:016x}"))
    }
}

fn normalize_hash(hash: &str) -> String {
    let hash = hash.trim();
    let hash = hash
        .strip_prefix("0x")
        .or_else(|| hash.strip_prefix("0X"))
        .unwrap_or(hash);
    hash.to_ascii_lowercase()
}
