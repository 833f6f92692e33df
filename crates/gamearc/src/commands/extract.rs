use std::{
    fs::File,
    path::{Component, Path, PathBuf},
};

use clap::Args;
use miette::{miette, Context, IntoDiagnostic, Result};
use tracing::info;

use super::{normalize_name, InputArgs};

#[derive(Args)]
pub struct ExtractArgs {
    #[command(flatten)]
    input: InputArgs,

    /// A target directory
    #[arg(short, long, value_name = "DIR")]
    directory: PathBuf,

    /// Allow overwriting the target
    #[arg(long, default_value_t = false)]
    overwrite: bool,
}

/// Turn an archive name into a path below `directory`, refusing names that escape it
fn target_path(directory: &Path, name: &str) -> Result<PathBuf> {
    let relative = PathBuf::from(normalize_name(name));
    if relative.as_os_str().is_empty() {
        return Err(miette!("refusing to extract an unnamed entry"));
    }
    if !relative
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
    {
        return Err(miette!("refusing to extract {name} outside of the target directory"));
    }
    Ok(directory.join(relative))
}

impl ExtractArgs {
    pub fn handle(&self) -> Result<()> {
        let mut archive = self.input.open()?;

        for index in 0..archive.len() {
            let mut entry = archive.by_index(index)?;

            let p = target_path(&self.directory, entry.name())?;
            info!("writing {}", p.display());

            if let Some(parent) = p.parent() {
                std::fs::create_dir_all(parent)
                    .into_diagnostic()
                    .context(format!("creating {}", parent.display()))?;
            }
            let mut out = if !self.overwrite {
                File::create_new(&p)
                    .into_diagnostic()
                    .context(format!("creating {}", &p.display()))?
            } else {
                File::create(&p)
                    .into_diagnostic()
                    .context(format!("creating {}", &p.display()))?
            };

            std::io::copy(&mut entry, &mut out)
                .into_diagnostic()
                .context(format!("extracting {}", p.display()))?;
        }
        Ok(())
    }
}
