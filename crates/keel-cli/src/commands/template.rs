//! Template command - render a pack locally without a cluster or a store

use console::style;
use keel_core::{ReleaseInfo, RenderContext};
use keel_engine::Renderer;
use keel_release::{classify, order::hooks_manifest, order::manifest_text};
use keel_repo::PackageSource;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use super::{PackArgs, ValuesArgs};
use crate::app;
use crate::config::KeelConfig;
use crate::error::Result;

pub async fn run(
    config: &KeelConfig,
    name: &str,
    pack: &PackArgs,
    values: &ValuesArgs,
    output_dir: Option<&Path>,
    show_hooks: bool,
) -> Result<()> {
    let overlay = values.overlay()?;
    let package = app::resolver(config)?
        .fetch(&pack.repo, &pack.pack, &pack.pack_version)
        .await?;
    tracing::debug!(pack = %package.name(), version = %package.version(), "fetched pack");

    let context = RenderContext::new(
        ReleaseInfo::for_install(name, &config.namespace),
        config.capabilities.to_capabilities(),
    );
    let rendered = Renderer::default().render(&package, &overlay, &context)?;
    let classified = classify(&rendered.manifests, name, &context.capabilities)?;

    let Some(output_path) = output_dir else {
        if show_hooks && !classified.hooks.is_empty() {
            let hooks: Vec<_> = classified.hooks.iter().collect();
            println!("{}", style("# Hooks").cyan().bold());
            print!("{}", hooks_manifest(&hooks));
        }
        print!("{}", manifest_text(&classified.resources));
        if let Some(notes) = &rendered.notes {
            println!("{}", style("# NOTES:").yellow().bold());
            println!("{}", notes);
        }
        return Ok(());
    };

    // one file per source document, resources in install order
    let mut files: BTreeMap<&str, String> = BTreeMap::new();
    for resource in &classified.resources {
        let text = files.entry(resource.source.as_str()).or_default();
        text.push_str(&manifest_text(std::slice::from_ref(resource)));
    }
    if show_hooks {
        for hook in &classified.hooks {
            let text = files.entry(hook.source.as_str()).or_default();
            text.push_str(&hooks_manifest(&[hook]));
        }
    }

    for (source, content) in &files {
        let file_path = output_path.join(source);
        if let Some(parent) = file_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&file_path, content)?;
        println!("{} {}", style("wrote").green(), file_path.display());
    }

    if let Some(notes) = &rendered.notes {
        let notes_path = output_path.join("NOTES.txt");
        fs::create_dir_all(output_path)?;
        fs::write(&notes_path, notes)?;
        println!("{} {}", style("wrote").green(), notes_path.display());
    }

    Ok(())
}
