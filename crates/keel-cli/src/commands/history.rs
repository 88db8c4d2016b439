//! History command - show release history

use console::style;

use crate::app::App;
use crate::display::{self, ReleaseView};
use crate::error::{CliError, Result};

pub async fn run(app: &App, name: &str, max: Option<usize>, output_json: bool) -> Result<()> {
    let key = app.key(name);
    let mut history = app.manager().history(&key).await?;

    // newest `max` revisions
    if let Some(max) = max {
        let skip = history.len().saturating_sub(max);
        history.drain(..skip);
    }

    if output_json {
        let views: Vec<ReleaseView<'_>> = history.iter().map(ReleaseView::from).collect();
        let json =
            serde_json::to_string_pretty(&views).map_err(|e| CliError::internal(e.to_string()))?;
        println!("{}", json);
        return Ok(());
    }

    println!("Release history for {}:\n", style(&key).cyan());
    display::print_history(&history);
    Ok(())
}
