use std::path::PathBuf;

use clap::Args;
use gamearc_core::{ByteCursor, DecodeOptions, Identification, SourceLocation};
use gamearc_formats::registry;
use itertools::Itertools;
use miette::{Context, Result};
use owo_colors::OwoColorize;

#[derive(Args)]
pub struct IdentifyArgs {
    /// Files to identify
    #[arg(value_name = "FILE", required = true)]
    files: Vec<PathBuf>,

    /// Show every format, not only the ones that matched
    #[arg(short, long, default_value_t = false)]
    all: bool,
}

impl IdentifyArgs {
    pub fn handle(&self) -> Result<()> {
        let registry = registry();
        let threshold = registry.options().threshold;

        for path in &self.files {
            let mut cursor = ByteCursor::open(path).context(format!("path: {}", path.display()))?;
            let source = SourceLocation::file(path, cursor.len());

            let scores = registry
                .identify(&mut cursor, &source)
                .into_iter()
                .filter(|c| self.all || c.confidence.reaches(threshold))
                .map(|c| {
                    let line = format!("{} {}", c.decoder.id(), c.confidence);
                    if c.confidence.reaches(threshold) {
                        format!("{}", line.green())
                    } else {
                        format!("{}", line.dimmed())
                    }
                })
                .join(", ");

            let verdict = match registry.open_cursor(cursor, source, DecodeOptions::default()) {
                Identification::Recognized(archive) => format!(
                    "{} ({} entries)",
                    archive.format().green().bold(),
                    archive.len()
                ),
                Identification::Unrecognized => format!("{}", "unrecognized".yellow()),
                Identification::Corrupt { format, error } => {
                    format!("{} {}", format!("corrupt {format}:").red(), error)
                }
            };

            println!("{}: {verdict}", path.display());
            if !scores.is_empty() {
                println!("  {scores}");
            }
        }

        Ok(())
    }
}
