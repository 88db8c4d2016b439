//! Start and stop commands - scale a release's workloads without a new revision

use crate::app::App;
use crate::display;
use crate::error::Result;

pub async fn start(app: &App, name: &str) -> Result<()> {
    let release = app.manager().start(&app.key(name), &app.options()).await?;
    display::print_outcome("Started", &release);
    Ok(())
}

pub async fn stop(app: &App, name: &str) -> Result<()> {
    let release = app.manager().stop(&app.key(name), &app.options()).await?;
    display::print_outcome("Stopped", &release);
    Ok(())
}
