use std::{collections::BTreeMap, path::PathBuf};

use clap::Args;
use gamearc_core::{
    encode::{write_archive, EditedEntry},
    EntryDescriptor, SourceLocation,
};
use gamearc_formats::registry;
use miette::{miette, Context, IntoDiagnostic, Result};
use tracing::{debug, info};
use walkdir::WalkDir;

use super::{normalize_name, InputArgs};

#[derive(Args)]
pub struct RepackArgs {
    #[command(flatten)]
    input: InputArgs,

    /// Directory whose files replace or extend the archive's entries
    #[arg(short, long, value_name = "DIR")]
    directory: PathBuf,

    /// A target archive
    #[arg(short, long, value_name = "FILE")]
    output: PathBuf,

    /// Allow overwriting the target
    #[arg(long, default_value_t = false)]
    overwrite: bool,
}

impl RepackArgs {
    /// Files below the directory keyed by their `/` separated relative name
    fn replacements(&self) -> Result<BTreeMap<String, PathBuf>> {
        let mut files = BTreeMap::new();
        for file in WalkDir::new(&self.directory)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| !e.file_type().is_dir())
        {
            let name = file
                .path()
                .strip_prefix(&self.directory)
                .into_diagnostic()?;
            let name = name
                .to_str()
                .ok_or(miette!("unable to convert {} to a string", name.display()))?;
            files.insert(normalize_name(name), file.path().to_path_buf());
        }
        Ok(files)
    }

    pub fn handle(&self) -> Result<()> {
        if !self.overwrite && self.output.exists() {
            return Err(miette!("{} already exists", self.output.display()));
        }

        let mut archive = self.input.open()?;
        let mut files = self.replacements()?;
        let separator = if archive.file_names().any(|n| n.contains('\\')) { "\\" } else { "/" };

        let mut edited = Vec::with_capacity(archive.len() + files.len());
        for entry in archive.entries() {
            let name = entry.name().map(normalize_name).unwrap_or_default();
            match files.remove(&name) {
                Some(path) => {
                    info!("replacing {name}");
                    let content = std::fs::read(&path)
                        .into_diagnostic()
                        .context(format!("reading {}", path.display()))?;
                    edited.push(EditedEntry::replaced(entry.clone(), content));
                }
                None => {
                    debug!("keeping {name}");
                    edited.push(EditedEntry::original(entry.clone()));
                }
            }
        }

        for (name, path) in files {
            info!("adding {name}");
            let content = std::fs::read(&path)
                .into_diagnostic()
                .context(format!("reading {}", path.display()))?;
            let descriptor = EntryDescriptor::builder()
                .source(SourceLocation::memory(content.len() as u64))
                .name(name.replace('/', separator))
                .data_offset(0)
                .stored_length(content.len() as u64)
                .build();
            edited.push(EditedEntry::replaced(descriptor, content));
        }

        let bytes = registry()
            .encode(&mut archive, &edited)
            .context(format!("encoding {}", self.output.display()))?;
        write_archive(&self.output, &bytes)?;

        info!(
            format = archive.format(),
            entries = edited.len(),
            "wrote {}",
            self.output.display()
        );
        Ok(())
    }
}
