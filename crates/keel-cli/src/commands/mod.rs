//! CLI commands

use clap::Args;
use console::style;
use keel_core::{ValueOverlay, Values, parse_set_values};
use keel_release::{PackageRef, ReleaseError};
use std::path::PathBuf;

use crate::error::{CliError, Result};

pub mod delete;
pub mod history;
pub mod install;
pub mod list;
pub mod rollback;
pub mod start;
pub mod status;
pub mod template;
pub mod upgrade;

/// Which pack to deploy
#[derive(Debug, Clone, Args)]
pub struct PackArgs {
    /// Pack name
    pub pack: String,

    /// Repository: an https:// index, a file:// URL or a local directory
    #[arg(short, long, env = "KEEL_REPO", default_value = ".")]
    pub repo: String,

    /// Version constraint (1.2.0, ^1.2, ">=1, <2"); latest when omitted
    #[arg(long, default_value = "")]
    pub pack_version: String,
}

impl PackArgs {
    pub fn to_ref(&self) -> PackageRef {
        PackageRef::new(&self.repo, &self.pack, &self.pack_version)
    }
}

/// Value overlay sources
#[derive(Debug, Clone, Default, Args)]
pub struct ValuesArgs {
    /// Values file(s) to merge, in order
    #[arg(short = 'f', long = "values")]
    pub files: Vec<PathBuf>,

    /// Set values on command line (key=value)
    #[arg(long = "set")]
    pub set: Vec<String>,
}

impl ValuesArgs {
    /// Build the overlay stored with the release.
    ///
    /// A single values file is passed through verbatim; several files or
    /// `--set` flags are merged left to right and serialized as YAML.
    pub fn overlay(&self) -> Result<ValueOverlay> {
        match (self.files.as_slice(), self.set.is_empty()) {
            ([], true) => return Ok(ValueOverlay::default()),
            ([single], true) => {
                let raw = std::fs::read_to_string(single).map_err(|e| {
                    CliError::validation(format!("cannot read {}: {}", single.display(), e))
                })?;
                return Ok(ValueOverlay::new(raw));
            }
            _ => {}
        }

        let mut values = Values::new();
        for file in &self.files {
            values.merge(&Values::from_file(file)?);
        }
        if !self.set.is_empty() {
            let set = parse_set_values(&self.set).map_err(|e| {
                CliError::validation_with_help(e.to_string(), "use --set key=value, e.g. --set image.tag=1.2")
            })?;
            values.merge(&set);
        }

        let yaml = serde_yaml::to_string(values.inner())
            .map_err(|e| CliError::internal(format!("cannot serialize values: {}", e)))?;
        Ok(ValueOverlay::new(yaml))
    }
}

/// Surface the committed revision of a partial apply before failing
pub fn report_partial(err: &ReleaseError) {
    if let Some(release) = err.committed_release() {
        eprintln!(
            "{} revision {} of {} was recorded as {}",
            style("⚠").yellow(),
            release.number(),
            style(release.key()).cyan(),
            crate::display::status_style(release.status)
        );
    } else if let (Some(release), Some(store_err)) = (err.partial_release(), err.store_error()) {
        eprintln!(
            "{} revision {} of {} was partly applied but not recorded: {}",
            style("⚠").yellow(),
            release.number(),
            style(release.key()).cyan(),
            store_err
        );
    }
}
