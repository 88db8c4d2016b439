//! Delete command - forget a release and tear down its objects

use console::style;

use crate::app::App;
use crate::display;
use crate::error::Result;

pub async fn run(app: &App, name: &str, keep_resources: bool) -> Result<()> {
    let key = app.key(name);
    println!("{} Deleting {}", style("→").blue().bold(), style(&key).cyan());

    let snapshot = app.manager().delete(&key, &app.options()).await?;
    let removed = app.teardown(&snapshot, keep_resources).await?;

    for resource in &removed {
        println!("  {} {}", style("-").red(), resource);
    }
    println!(
        "{} Deleted {} (last revision {}, {})",
        style("✓").green().bold(),
        style(&snapshot.name).cyan(),
        style(snapshot.number()).yellow(),
        display::pluralize(removed.len(), "object", "objects")
    );
    if keep_resources {
        println!("  {}", style("cluster objects were kept (--keep-resources)").dim());
    }
    Ok(())
}
