use std::sync::Arc;

use clap::Args;
use gamearc_core::{
    context::{CountingProgress, ProgressObserver},
    EntryDescriptor,
};
use itertools::Itertools;
use miette::{IntoDiagnostic, Result};
use owo_colors::OwoColorize;
use tracing::info;

use super::InputArgs;

#[derive(Args)]
pub struct ListArgs {
    #[command(flatten)]
    input: InputArgs,

    /// Print the entries as JSON
    #[arg(long, default_value_t = false)]
    json: bool,
}

fn describe(index: usize, entry: &EntryDescriptor) -> String {
    let mut line = format!(
        "{index:>6} {:>#10x} {:>10} {:>10} {}",
        entry.data_offset(),
        entry.stored_length(),
        entry.decoded_length(),
        entry.name().unwrap_or("?"),
    );
    if entry.source().part_index() > 0 {
        line.push_str(&format!(" {}", format!("[part {}]", entry.source().part_index()).dimmed()));
    }
    if !entry.codec().is_identity() {
        let codec = entry.codec().transforms().iter().map(|t| format!("{t:?}")).join("+");
        line.push_str(&format!(" {}", codec.cyan()));
    }
    if !entry.properties().is_empty() {
        let properties = entry
            .properties()
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .join(" ");
        line.push_str(&format!(" {}", properties.dimmed()));
    }
    line
}

impl ListArgs {
    pub fn handle(&self) -> Result<()> {
        let progress = Arc::new(CountingProgress::default());
        let archive = self.input.open_with(Some(progress.clone() as Arc<dyn ProgressObserver>))?;

        if self.json {
            let json = serde_json::to_string_pretty(archive.entries()).into_diagnostic()?;
            println!("{json}");
            return Ok(());
        }

        println!("{:>6} {:>10} {:>10} {:>10} name", "index", "offset", "stored", "size");
        for (index, entry) in archive.entries().iter().enumerate() {
            println!("{}", describe(index, entry));
        }

        info!(
            format = archive.format(),
            entries = archive.len(),
            walked = progress.entries(),
            size = ?archive.decompressed_size(),
            "listed {}",
            self.input.file.display()
        );
        Ok(())
    }
}
