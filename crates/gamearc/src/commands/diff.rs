use std::{
    collections::BTreeSet,
    fmt::Display,
    path::{Path, PathBuf},
};

use clap::{Args, ValueEnum};
use gamearc_core::{Archive, EntryDescriptor};
use itertools::Itertools;
use miette::Result;
use owo_colors::OwoColorize;

use super::InputArgs;

#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
enum Mode {
    /// Names, sizes and content
    #[default]
    Content,
    /// Also compare where and how entries are stored
    Full,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum Change {
    Added(String),
    Removed(String),
    Comparison(String, String, String),
    Modified(String, Vec<Change>),
}

impl Change {
    fn comparison(key: &str, old: impl ToString, new: impl ToString) -> Option<Change> {
        let (old, new) = (old.to_string(), new.to_string());
        (old != new).then(|| Change::Comparison(key.into(), old, new))
    }
}

impl Display for Change {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Change::Added(v) => writeln!(f, "✅ {}", v.green()),
            Change::Removed(v) => writeln!(f, "❌ {}", v.red()),
            Change::Comparison(key, old, new) => {
                writeln!(f, "* {}: {} vs {}", key, old.red(), new.green())
            }
            Change::Modified(v, children) => {
                writeln!(f, "🔃 {}", v.blue())?;
                let nested = children.iter().map(|c| c.to_string()).join("");
                for line in nested.lines().filter(|l| !l.trim().is_empty()) {
                    writeln!(f, "  {line}")?;
                }
                Ok(())
            }
        }
    }
}

#[derive(Args)]
pub struct DiffArgs {
    /// An input archive
    #[arg(short, long, value_name = "FILE")]
    left: PathBuf,

    /// An input archive
    #[arg(short, long, value_name = "FILE")]
    right: PathBuf,

    /// A `hash=name` file used for both archives
    #[arg(long, value_name = "FILE")]
    names: Option<PathBuf>,

    /// Comparison mode
    #[arg(short, long, value_enum, default_value_t = Mode::Content)]
    mode: Mode,
}

impl DiffArgs {
    fn open(&self, file: &Path) -> Result<Archive> {
        InputArgs {
            file: file.to_path_buf(),
            names: self.names.clone(),
            format: None,
        }
        .open()
    }

    fn compare_entry(
        &self,
        name: &str,
        left: &EntryDescriptor,
        right: &EntryDescriptor,
        left_data: &[u8],
        right_data: &[u8],
    ) -> Option<Change> {
        let mut changes = Vec::new();
        changes.extend(Change::comparison("size", left_data.len(), right_data.len()));
        if changes.is_empty() && left_data != right_data {
            let position = left_data
                .iter()
                .zip(right_data)
                .position(|(l, r)| l != r)
                .unwrap_or_default();
            changes.push(Change::Comparison(
                "content".into(),
                "original".into(),
                format!("differs from byte {position}"),
            ));
        }

        if self.mode == Mode::Full {
            changes.extend(Change::comparison("offset", left.data_offset(), right.data_offset()));
            changes.extend(Change::comparison(
                "stored length",
                left.stored_length(),
                right.stored_length(),
            ));
            changes.extend(Change::comparison(
                "codec",
                format!("{:?}", left.codec().transforms()),
                format!("{:?}", right.codec().transforms()),
            ));
        }

        (!changes.is_empty()).then(|| Change::Modified(name.into(), changes))
    }

    fn compare(&self, left: &mut Archive, right: &mut Archive) -> Result<Vec<Change>> {
        let mut result = Vec::new();
        result.extend(Change::comparison("format", left.format(), right.format()));
        result.extend(Change::comparison("entries", left.len(), right.len()));

        let left_names = left.file_names().map(str::to_owned).collect::<BTreeSet<_>>();
        let right_names = right.file_names().map(str::to_owned).collect::<BTreeSet<_>>();

        right_names
            .difference(&left_names)
            .map(|n| Change::Added(n.clone()))
            .for_each(|c| result.push(c));
        left_names
            .difference(&right_names)
            .map(|n| Change::Removed(n.clone()))
            .for_each(|c| result.push(c));

        for name in left_names.intersection(&right_names) {
            let (Some(l), Some(r)) = (left.index_for_name(name), right.index_for_name(name)) else {
                continue;
            };
            let left_data = left.read_entry(l)?;
            let right_data = right.read_entry(r)?;
            if let Some(change) = self.compare_entry(
                name,
                &left.entries()[l],
                &right.entries()[r],
                &left_data,
                &right_data,
            ) {
                result.push(change);
            }
        }

        Ok(result)
    }

    pub fn handle(&self) -> Result<()> {
        let mut left = self.open(&self.left)?;
        let mut right = self.open(&self.right)?;

        let changes = self.compare(&mut left, &mut right)?;
        if !changes.is_empty() {
            println!(
                "{}",
                Change::Modified(self.left.to_string_lossy().into_owned(), changes)
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::Change;

    #[test]
    fn equal_values_are_not_a_change() {
        assert_eq!(Change::comparison("size", 4, 4), None);
        assert_eq!(
            Change::comparison("size", 4, 5),
            Some(Change::Comparison("size".into(), "4".into(), "5".into()))
        );
    }

    #[test]
    fn nested_changes_are_indented() {
        let change = Change::Modified(
            "a.tre".into(),
            vec![Change::Modified("file.txt".into(), vec![Change::Added("x".into())])],
        );
        let text = change.to_string();
        assert_eq!(text.lines().count(), 3);
        assert!(text.lines().nth(2).unwrap_or_default().starts_with("    "));
    }
}
