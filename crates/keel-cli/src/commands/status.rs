//! Status command - show the head revision of a release

use console::style;

use crate::app::App;
use crate::display::{self, ReleaseView};
use crate::error::{CliError, Result};

pub async fn run(
    app: &App,
    name: &str,
    show_values: bool,
    show_manifest: bool,
    output_json: bool,
) -> Result<()> {
    let release = app.manager().get(&app.key(name)).await?;

    if output_json {
        let json = serde_json::to_string_pretty(&ReleaseView::detailed(&release))
            .map_err(|e| CliError::internal(e.to_string()))?;
        println!("{}", json);
        return Ok(());
    }

    display::print_release_info(&release);

    if show_values {
        println!("\n{}", style("VALUES").bold().underlined());
        println!("{}", release.revision.overlay.as_str());
    }

    if show_manifest {
        println!("\n{}", style("MANIFEST").bold().underlined());
        println!("{}", release.manifest());
    }

    display::print_live(&release.live);
    display::print_notes(release.notes());
    Ok(())
}
