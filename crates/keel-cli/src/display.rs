//! Display formatting for CLI output
//!
//! Provides structured display for:
//! - Release info blocks and history / list tables
//! - Hook plans for pre-install and pre-upgrade
//! - JSON views of releases

use chrono::{DateTime, Utc};
use console::{StyledObject, style};
use keel_core::ReleaseStatus;
use keel_release::{Hook, Release, ResourceRef};
use serde::Serialize;

/// Format count with proper pluralization
pub fn pluralize(count: usize, singular: &str, plural: &str) -> String {
    if count == 1 {
        format!("{} {}", count, singular)
    } else {
        format!("{} {}", count, plural)
    }
}

pub fn status_style(status: ReleaseStatus) -> StyledObject<String> {
    let text = status.to_string();
    match status {
        ReleaseStatus::Deployed => style(text).green(),
        ReleaseStatus::Failed => style(text).red(),
        ReleaseStatus::Stopped => style(text).yellow(),
        ReleaseStatus::Superseded | ReleaseStatus::Deleted => style(text).dim(),
    }
}

fn timestamp(at: &DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// One-line outcome of a committed operation
pub fn print_outcome(verb: &str, release: &Release) {
    println!(
        "{} {} {} (revision {}) in namespace {}",
        style("✓").green().bold(),
        verb,
        style(&release.name).cyan(),
        style(release.number()).yellow(),
        style(&release.namespace).yellow()
    );
}

pub fn print_release_info(release: &Release) {
    let revision = &release.revision;

    println!("{}", style("RELEASE INFO").bold().underlined());
    println!("  Name:        {}", style(&release.name).cyan());
    println!("  Namespace:   {}", style(&release.namespace).yellow());
    println!("  Revision:    {}", style(release.number()).yellow());
    println!("  Status:      {}", status_style(release.status));
    println!("  Created:     {}", timestamp(&revision.created_at));
    println!("  Updated:     {}", timestamp(&release.updated_at));
    println!("  Description: {}", revision.description);

    println!("\n{}", style("PACK").bold().underlined());
    println!("  Name:        {}", revision.pack.name);
    println!("  Version:     {}", revision.pack.version);
    if let Some(desc) = &revision.pack.description {
        println!("  Description: {}", desc);
    }
    if let Some(app_ver) = &revision.pack.app_version {
        println!("  App Version: {}", app_ver);
    }
}

pub fn print_live(live: &[ResourceRef]) {
    println!("\n{}", style("RESOURCES").bold().underlined());
    if live.is_empty() {
        println!("  {}", style("no live resources observed").dim());
    }
    for resource in live {
        println!("  {} {}", style("✓").green(), resource);
    }
}

pub fn print_hooks(hooks: &[Hook]) {
    println!(
        "\n{} ({})",
        style("HOOKS").bold().underlined(),
        pluralize(hooks.len(), "hook", "hooks")
    );
    for hook in hooks {
        let events: Vec<&str> = hook.events.iter().map(|e| e.as_str()).collect();
        println!(
            "  {:<30} {:<12} weight {:<4} {}",
            format!("{}/{}", hook.kind, hook.name),
            events.join(","),
            hook.weight,
            style(&hook.source).dim()
        );
    }
}

pub fn print_notes(notes: Option<&str>) {
    if let Some(notes) = notes {
        println!("\n{}", style("NOTES:").bold());
        println!("{}", notes);
    }
}

/// Revision table, oldest first
pub fn print_history(releases: &[Release]) {
    println!(
        "{:<10} {:<12} {:<30} {:<20} {}",
        style("REVISION").bold(),
        style("STATUS").bold(),
        style("PACK").bold(),
        style("UPDATED").bold(),
        style("DESCRIPTION").bold()
    );

    for release in releases {
        let pack = &release.revision.pack;
        println!(
            "{:<10} {:<12} {:<30} {:<20} {}",
            release.number(),
            status_style(release.status),
            format!("{}-{}", pack.name, pack.version),
            timestamp(&release.updated_at),
            release.revision.description
        );
    }
}

pub fn print_list(releases: &[Release]) {
    println!(
        "{:<24} {:<16} {:<10} {:<12} {:<30} {}",
        style("NAME").bold(),
        style("NAMESPACE").bold(),
        style("REVISION").bold(),
        style("STATUS").bold(),
        style("PACK").bold(),
        style("UPDATED").bold()
    );

    for release in releases {
        let pack = &release.revision.pack;
        println!(
            "{:<24} {:<16} {:<10} {:<12} {:<30} {}",
            release.name,
            release.namespace,
            release.number(),
            status_style(release.status),
            format!("{}-{}", pack.name, pack.version),
            timestamp(&release.updated_at)
        );
    }
}

/// Serializable view of a [`Release`]
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseView<'a> {
    pub name: &'a str,
    pub namespace: &'a str,
    pub revision: u32,
    pub status: ReleaseStatus,
    pub pack: String,
    pub version: String,
    pub description: &'a str,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub values: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manifest: Option<&'a str>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub live: Vec<String>,
}

impl<'a> From<&'a Release> for ReleaseView<'a> {
    fn from(release: &'a Release) -> Self {
        let revision = &release.revision;
        Self {
            name: &release.name,
            namespace: &release.namespace,
            revision: release.number(),
            status: release.status,
            pack: revision.pack.name.clone(),
            version: revision.pack.version.to_string(),
            description: &revision.description,
            updated_at: release.updated_at,
            values: None,
            manifest: None,
            live: release.live.iter().map(ToString::to_string).collect(),
        }
    }
}

impl<'a> ReleaseView<'a> {
    /// Include the overlay and manifest
    pub fn detailed(release: &'a Release) -> Self {
        Self {
            values: Some(release.revision.overlay.as_str()),
            manifest: Some(release.manifest()),
            ..Self::from(release)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_core::{PackMetadata, ReleaseKey, ValueOverlay};
    use keel_release::Revision;
    use semver::Version;
    use std::sync::Arc;

    fn release() -> Release {
        let revision = Revision {
            number: 2,
            pack: PackMetadata {
                name: "app1".into(),
                version: Version::new(1, 2, 0),
                description: None,
                app_version: None,
            },
            overlay: ValueOverlay::new("replica: 1\n"),
            manifest: "---\n# Source: app1/templates/cm.yaml\nkind: ConfigMap\n".into(),
            hooks: vec![],
            resources: vec![],
            notes: None,
            description: "Upgrade complete".into(),
            created_at: Utc::now(),
        };
        let mut release = Release::new(
            &ReleaseKey::new("default", "app1"),
            ReleaseStatus::Deployed,
            Arc::new(revision),
        );
        release.live = vec![ResourceRef::new("ConfigMap", "cfg")];
        release
    }

    #[test]
    fn test_pluralize() {
        assert_eq!(pluralize(1, "hook", "hooks"), "1 hook");
        assert_eq!(pluralize(0, "hook", "hooks"), "0 hooks");
    }

    #[test]
    fn test_release_view_json() {
        let release = release();
        let json = serde_json::to_value(ReleaseView::from(&release)).unwrap();
        assert_eq!(json["revision"], 2);
        assert_eq!(json["status"], serde_json::to_value(ReleaseStatus::Deployed).unwrap());
        assert_eq!(json["version"], "1.2.0");
        assert!(json.get("manifest").is_none());
        assert_eq!(json["live"].as_array().unwrap().len(), 1);

        let detailed = serde_json::to_value(ReleaseView::detailed(&release)).unwrap();
        assert_eq!(detailed["values"], "replica: 1\n");
        assert!(detailed["manifest"].as_str().unwrap().contains("ConfigMap"));
    }
}
