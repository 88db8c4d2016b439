//! List command - show the head revision of every release

use console::style;

use crate::app::App;
use crate::display::{self, ReleaseView};
use crate::error::{CliError, Result};

pub async fn run(app: &App, all_namespaces: bool, output_json: bool) -> Result<()> {
    let namespace = (!all_namespaces).then_some(app.config.namespace.as_str());
    let releases = app.manager().list(namespace).await?;

    if output_json {
        let views: Vec<ReleaseView<'_>> = releases.iter().map(ReleaseView::from).collect();
        let json =
            serde_json::to_string_pretty(&views).map_err(|e| CliError::internal(e.to_string()))?;
        println!("{}", json);
        return Ok(());
    }

    if releases.is_empty() {
        match namespace {
            Some(ns) => println!("No releases in namespace {}", style(ns).yellow()),
            None => println!("No releases"),
        }
        return Ok(());
    }

    display::print_list(&releases);
    Ok(())
}
