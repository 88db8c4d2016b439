//! Upgrade commands - plan or deploy the next revision

use console::style;
use keel_release::ReleaseRequest;

use super::{PackArgs, ValuesArgs, report_partial};
use crate::app::App;
use crate::display;
use crate::error::Result;

pub async fn plan(
    app: &App,
    name: &str,
    pack: &PackArgs,
    values: &ValuesArgs,
    show_manifest: bool,
) -> Result<()> {
    let request = ReleaseRequest::new(app.key(name), pack.to_ref(), values.overlay()?);
    let planned = app.manager().pre_upgrade(&request, &app.options()).await?;

    println!(
        "{} Upgrade plan for {}: revision {} with {} {}",
        style("→").blue().bold(),
        style(&request.key).cyan(),
        style(planned.number()).yellow(),
        style(&planned.revision.pack.name).cyan(),
        style(&planned.revision.pack.version).yellow()
    );
    display::print_hooks(planned.hooks());

    if show_manifest {
        println!("\n{}", style("MANIFEST").bold().underlined());
        println!("{}", planned.manifest());
    }
    Ok(())
}

pub async fn run(app: &App, name: &str, pack: &PackArgs, values: &ValuesArgs) -> Result<()> {
    let request = ReleaseRequest::new(app.key(name), pack.to_ref(), values.overlay()?);
    println!(
        "{} Upgrading {} with pack {}",
        style("→").blue().bold(),
        style(&request.key).cyan(),
        style(&pack.pack).cyan()
    );

    let release = match app.manager().upgrade(&request, &app.options()).await {
        Ok(release) => release,
        Err(err) => {
            report_partial(&err);
            return Err(err.into());
        }
    };

    display::print_outcome("Upgraded", &release);
    display::print_notes(release.notes());
    Ok(())
}
