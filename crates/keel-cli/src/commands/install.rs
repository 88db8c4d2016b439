//! Install commands - plan or deploy revision 1 of a release

use console::style;
use keel_release::ReleaseRequest;

use super::{PackArgs, ValuesArgs, report_partial};
use crate::app::App;
use crate::display;
use crate::error::Result;

fn request(app: &App, name: &str, pack: &PackArgs, values: &ValuesArgs) -> Result<ReleaseRequest> {
    Ok(ReleaseRequest::new(app.key(name), pack.to_ref(), values.overlay()?))
}

/// Render revision 1 and show its hooks without touching anything
pub async fn plan(
    app: &App,
    name: &str,
    pack: &PackArgs,
    values: &ValuesArgs,
    show_manifest: bool,
) -> Result<()> {
    let request = request(app, name, pack, values)?;
    let planned = app.manager().pre_install(&request, &app.options()).await?;

    println!(
        "{} Install plan for {} with {} {}",
        style("→").blue().bold(),
        style(&request.key).cyan(),
        style(&planned.revision.pack.name).cyan(),
        style(&planned.revision.pack.version).yellow()
    );
    display::print_hooks(planned.hooks());
    println!(
        "\n{} {}",
        style("RESOURCES").bold().underlined(),
        display::pluralize(planned.resources().len(), "resource", "resources")
    );
    for resource in planned.resources() {
        println!("  {}/{}", resource.kind, resource.name);
    }

    if show_manifest {
        println!("\n{}", style("MANIFEST").bold().underlined());
        println!("{}", planned.manifest());
    }
    Ok(())
}

pub async fn run(app: &App, name: &str, pack: &PackArgs, values: &ValuesArgs) -> Result<()> {
    let request = request(app, name, pack, values)?;
    println!(
        "{} Installing pack {} into {}",
        style("→").blue().bold(),
        style(&pack.pack).cyan(),
        style(&request.key).yellow()
    );

    let release = match app.manager().install(&request, &app.options()).await {
        Ok(release) => release,
        Err(err) => {
            report_partial(&err);
            return Err(err.into());
        }
    };

    display::print_outcome("Installed", &release);
    display::print_notes(release.notes());
    Ok(())
}
