//! Rollback command - redeploy the content of an earlier revision

use console::style;

use super::report_partial;
use crate::app::App;
use crate::display;
use crate::error::Result;

pub async fn run(app: &App, name: &str, revision: u32) -> Result<()> {
    let key = app.key(name);
    println!(
        "{} Rolling back {} to revision {}",
        style("→").blue().bold(),
        style(&key).cyan(),
        style(revision).yellow()
    );

    let release = match app.manager().rollback(&key, revision, &app.options()).await {
        Ok(release) => release,
        Err(err) => {
            report_partial(&err);
            return Err(err.into());
        }
    };

    display::print_outcome("Rolled back", &release);
    Ok(())
}
