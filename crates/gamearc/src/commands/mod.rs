use std::{path::PathBuf, sync::Arc};

use clap::Args;
use gamearc_core::{
    context::ProgressObserver, Archive, ByteCursor, DecodeOptions, Identification, SourceLocation,
};
use gamearc_formats::registry;
use miette::{miette, Context, Result};

pub mod diff;
pub mod extract;
pub mod identify;
pub mod list;
pub mod repack;

#[derive(clap::Subcommand)]
pub enum Commands {
    /// Score a file against every known format
    Identify(identify::IdentifyArgs),
    /// List the entries of an archive
    List(list::ListArgs),
    /// Extract an archive into a directory
    Extract(extract::ExtractArgs),
    /// Replace entries of an archive with files from a directory
    Repack(repack::RepackArgs),
    /// Compare two archives
    Diff(diff::DiffArgs),
}

impl Commands {
    pub fn handle(&self) -> miette::Result<()> {
        match self {
            Commands::Identify(identify) => identify.handle(),
            Commands::List(list) => list.handle(),
            Commands::Extract(extract) => extract.handle(),
            Commands::Repack(repack) => repack.handle(),
            Commands::Diff(diff) => diff.handle(),
        }
    }
}

/// How to open an input archive
#[derive(Args, Clone)]
pub struct InputArgs {
    /// An input archive
    #[arg(short, long, value_name = "FILE")]
    pub file: PathBuf,

    /// A `hash=name` file for archives that only store name hashes
    #[arg(long, value_name = "FILE")]
    pub names: Option<PathBuf>,

    /// Decode as this format instead of identifying it
    #[arg(long, value_name = "ID")]
    pub format: Option<String>,
}

impl InputArgs {
    pub fn open(&self) -> Result<Archive> {
        self.open_with(None)
    }

    /// Open the archive, reporting directory progress to `progress`
    pub fn open_with(&self, progress: Option<Arc<dyn ProgressObserver>>) -> Result<Archive> {
        let options = DecodeOptions::builder()
            .maybe_name_table(self.names.clone())
            .maybe_progress(progress)
            .build();
        let context = || format!("path: {}", self.file.display());

        let Some(format) = &self.format else {
            return match registry().open(&self.file, options).context(context())? {
                Identification::Recognized(archive) => Ok(archive),
                Identification::Unrecognized => Err(miette!(
                    "{} is not in any known archive format",
                    self.file.display()
                )),
                Identification::Corrupt { format, error } => Err(miette::Report::new(error)
                    .wrap_err(format!("{} looks like {format} but could not be read", self.file.display()))),
            };
        };

        let cursor = ByteCursor::open(&self.file).context(context())?;
        let source = SourceLocation::file(&self.file, cursor.len());
        Ok(registry()
            .open_as(format, cursor, source, options)
            .context(context())?)
    }
}

/// Archive names use `\` or `/`; compare them with `/`
pub(crate) fn normalize_name(name: &str) -> String {
    name.replace('\\', "/")
}
