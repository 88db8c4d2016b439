//! Document classification and install ordering
//!
//! Rendered files are split into YAML documents, each document is sorted
//! into hooks or plain resources, and both lists are ordered by:
//!
//! 1. install-order rank of `kind` (unknown kinds last, by kind name)
//! 2. weight
//! 3. source document name
//! 4. position within the source document

use keel_core::Capabilities;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::annotations::{annotations_of, parse_hook_weight};
use crate::error::{ReleaseError, Result};
use crate::hooks::{Hook, parse_delete_policies, parse_events};

/// Kinds in the order they are installed
pub const INSTALL_ORDER: &[&str] = &[
    "Namespace",
    "ResourceQuota",
    "LimitRange",
    "PodSecurityPolicy",
    "PodDisruptionBudget",
    "Secret",
    "ConfigMap",
    "StorageClass",
    "PersistentVolume",
    "PersistentVolumeClaim",
    "ServiceAccount",
    "CustomResourceDefinition",
    "ClusterRole",
    "ClusterRoleBinding",
    "Role",
    "RoleBinding",
    "Service",
    "DaemonSet",
    "Pod",
    "ReplicationController",
    "ReplicaSet",
    "Deployment",
    "StatefulSet",
    "Job",
    "CronJob",
    "Ingress",
    "APIService",
];

/// A plain (non-hook) document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    /// `metadata.name`
    pub name: String,

    /// Document the resource was rendered from
    pub source: String,

    pub kind: String,

    #[serde(default)]
    pub api_version: String,

    pub manifest: String,
}

/// Output of [`classify`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Classified {
    pub hooks: Vec<Hook>,
    pub resources: Vec<Resource>,
}

struct SortKey {
    rank: usize,
    kind: String,
    weight: i32,
    source: String,
    position: usize,
}

impl SortKey {
    fn new(kind: &str, weight: i32, source: &str, position: usize) -> Self {
        let (rank, kind) = match INSTALL_ORDER.iter().position(|k| *k == kind) {
            Some(rank) => (rank, String::new()),
            None => (INSTALL_ORDER.len(), kind.to_string()),
        };
        Self {
            rank,
            kind,
            weight,
            source: source.to_string(),
            position,
        }
    }

    fn tuple(&self) -> (usize, &str, i32, &str, usize) {
        (
            self.rank,
            &self.kind,
            self.weight,
            &self.source,
            self.position,
        )
    }
}

/// Split rendered documents into ordered hooks and resources.
///
/// `release` is recorded as the owner of every hook. When `capabilities`
/// lists API versions, a document using any other `apiVersion` is rejected.
pub fn classify(
    documents: &BTreeMap<String, String>,
    release: &str,
    capabilities: &Capabilities,
) -> Result<Classified> {
    let mut hooks = Vec::new();
    let mut resources = Vec::new();

    for (source, content) in documents {
        for (position, doc) in split_documents(content).into_iter().enumerate() {
            let fail = |message: String| ReleaseError::Classification {
                document: source.clone(),
                message,
            };

            let parsed: serde_yaml::Value =
                serde_yaml::from_str(&doc).map_err(|e| fail(format!("invalid YAML: {}", e)))?;
            let serde_yaml::Value::Mapping(object) = parsed else {
                return Err(fail("document is not a mapping".to_string()));
            };

            let kind = object
                .get("kind")
                .and_then(|k| k.as_str())
                .ok_or_else(|| fail("missing string field 'kind'".to_string()))?
                .to_string();
            let Some(serde_yaml::Value::Mapping(metadata)) = object.get("metadata") else {
                return Err(fail(format!("{} has no 'metadata' mapping", kind)));
            };
            let api_version = object
                .get("apiVersion")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();

            if !capabilities.supports(&api_version) {
                return Err(fail(format!(
                    "apiVersion '{}' of {} is not supported by the cluster",
                    api_version, kind
                )));
            }

            let name = metadata
                .get("name")
                .and_then(|n| n.as_str())
                .unwrap_or_default()
                .to_string();
            let annotations = annotations_of(metadata);

            match parse_events(&annotations).map_err(&fail)? {
                Some(events) => {
                    let weight = parse_hook_weight(&annotations).map_err(&fail)?;
                    let delete_policies = parse_delete_policies(&annotations).map_err(&fail)?;
                    let key = SortKey::new(&kind, weight, source, position);
                    hooks.push((
                        key,
                        Hook {
                            name,
                            source: source.clone(),
                            kind,
                            events,
                            weight,
                            release: release.to_string(),
                            delete_policies,
                            manifest: doc,
                        },
                    ));
                }
                None => {
                    let key = SortKey::new(&kind, 0, source, position);
                    resources.push((
                        key,
                        Resource {
                            name,
                            source: source.clone(),
                            kind,
                            api_version,
                            manifest: doc,
                        },
                    ));
                }
            }
        }
    }

    hooks.sort_by(|(a, _), (b, _)| a.tuple().cmp(&b.tuple()));
    resources.sort_by(|(a, _), (b, _)| a.tuple().cmp(&b.tuple()));

    tracing::debug!(
        %release,
        hooks = hooks.len(),
        resources = resources.len(),
        "classified documents"
    );

    Ok(Classified {
        hooks: hooks.into_iter().map(|(_, h)| h).collect(),
        resources: resources.into_iter().map(|(_, r)| r).collect(),
    })
}

/// Split a file on `---` lines, dropping empty and comment-only documents
pub fn split_documents(content: &str) -> Vec<String> {
    let mut docs = Vec::new();
    let mut current: Vec<&str> = Vec::new();

    let mut flush = |lines: &mut Vec<&str>| {
        let meaningful = lines.iter().any(|l| {
            let t = l.trim();
            !t.is_empty() && !t.starts_with('#')
        });
        if meaningful {
            docs.push(lines.join("\n").trim_matches('\n').trim_end().to_string());
        }
        lines.clear();
    };

    for line in content.lines() {
        if line.trim_end() == "---" {
            flush(&mut current);
        } else {
            current.push(line);
        }
    }
    flush(&mut current);

    docs
}

/// Manifest text for `resources`: `---\n# Source: <name>\n<content>\n` each
pub fn manifest_text(resources: &[Resource]) -> String {
    resources
        .iter()
        .map(|r| format!("---\n# Source: {}\n{}\n", r.source, r.manifest))
        .collect()
}

/// Manifest text for hooks, same layout as [`manifest_text`]
pub fn hooks_manifest(hooks: &[&Hook]) -> String {
    hooks
        .iter()
        .map(|h| format!("---\n# Source: {}\n{}\n", h.source, h.manifest))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::HookEvent;

    fn docs(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn listing(classified: &Classified) -> String {
        let mut lines: Vec<String> = classified
            .hooks
            .iter()
            .map(|h| format!("hook {}/{} w={}", h.kind, h.name, h.weight))
            .collect();
        lines.extend(
            classified
                .resources
                .iter()
                .map(|r| format!("{}/{}", r.kind, r.name)),
        );
        lines.join("\n")
    }

    fn sample() -> BTreeMap<String, String> {
        docs(&[
            (
                "app/templates/deploy.yaml",
                "apiVersion: apps/v1\nkind: Deployment\nmetadata:\n  name: web\n",
            ),
            (
                "app/templates/base.yaml",
                "# leading comment\n---\napiVersion: v1\nkind: Service\nmetadata:\n  name: web\n---\napiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: cfg\n---\n# only a comment\n---\napiVersion: v1\nkind: Namespace\nmetadata:\n  name: ns\n",
            ),
            (
                "app/templates/custom.yaml",
                "apiVersion: example.com/v1\nkind: Widget\nmetadata:\n  name: w\n---\napiVersion: example.com/v1\nkind: Gadget\nmetadata:\n  name: g\n",
            ),
            (
                "app/templates/hooks.yaml",
                r#"apiVersion: batch/v1
kind: Job
metadata:
  name: migrate
  annotations:
    helm.sh/hook: pre-install,pre-upgrade
    helm.sh/hook-weight: "5"
---
apiVersion: batch/v1
kind: Job
metadata:
  name: seed
  annotations:
    keel.io/hook: pre-install
    keel.io/hook-weight: "-1"
    keel.io/hook-delete-policy: hook-succeeded
---
apiVersion: v1
kind: ConfigMap
metadata:
  name: hook-cfg
  annotations:
    keel.io/hook: post-install
"#,
            ),
        ])
    }

    #[test]
    fn test_install_order() {
        let classified = classify(&sample(), "app", &Capabilities::default()).unwrap();
        insta::assert_snapshot!(listing(&classified), @r"
        hook ConfigMap/hook-cfg w=0
        hook Job/seed w=-1
        hook Job/migrate w=5
        Namespace/ns
        ConfigMap/cfg
        Service/web
        Deployment/web
        Gadget/g
        Widget/w
        ");
    }

    #[test]
    fn test_hook_fields() {
        let classified = classify(&sample(), "app", &Capabilities::default()).unwrap();
        let seed = classified.hooks.iter().find(|h| h.name == "seed").unwrap();
        assert_eq!(seed.events, vec![HookEvent::PreInstall]);
        assert_eq!(seed.release, "app");
        assert_eq!(seed.source, "app/templates/hooks.yaml");
        assert!(seed.manifest.starts_with("apiVersion: batch/v1"));
        assert_eq!(seed.delete_policies.len(), 1);
    }

    #[test]
    fn test_deterministic() {
        let first = classify(&sample(), "app", &Capabilities::default()).unwrap();
        for _ in 0..5 {
            assert_eq!(classify(&sample(), "app", &Capabilities::default()).unwrap(), first);
        }
    }

    #[test]
    fn test_position_breaks_ties() {
        let input = docs(&[(
            "app/templates/cms.yaml",
            "kind: ConfigMap\nmetadata:\n  name: z\n---\nkind: ConfigMap\nmetadata:\n  name: a\n",
        )]);
        let classified = classify(&input, "app", &Capabilities::default()).unwrap();
        let names: Vec<_> = classified.resources.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["z", "a"]);
    }

    #[test]
    fn test_rejects_malformed_documents() {
        for bad in [
            "- just\n- a list\n",
            "metadata:\n  name: x\n",
            "kind: ConfigMap\n",
            "kind: [ConfigMap]\nmetadata: {}\n",
            "kind: ConfigMap\nmetadata: {name: x\n",
        ] {
            let err = classify(&docs(&[("app/templates/bad.yaml", bad)]), "app", &Capabilities::default())
                .unwrap_err();
            assert!(
                matches!(err, ReleaseError::Classification { ref document, .. } if document == "app/templates/bad.yaml"),
                "{bad}: {err}"
            );
        }
    }

    #[test]
    fn test_unknown_hook_event_rejected() {
        let input = docs(&[(
            "app/templates/job.yaml",
            "kind: Job\nmetadata:\n  name: j\n  annotations:\n    helm.sh/hook: pre-launch\n",
        )]);
        let err = classify(&input, "app", &Capabilities::default()).unwrap_err();
        assert!(err.to_string().contains("pre-launch"));
    }

    #[test]
    fn test_non_integer_weight_rejected() {
        let input = docs(&[(
            "app/templates/job.yaml",
            "kind: Job\nmetadata:\n  name: j\n  annotations:\n    keel.io/hook: post-install\n    keel.io/hook-weight: high\n",
        )]);
        assert!(classify(&input, "app", &Capabilities::default()).is_err());
    }

    #[test]
    fn test_capability_gate() {
        let input = docs(&[(
            "app/templates/ing.yaml",
            "apiVersion: extensions/v1beta1\nkind: Ingress\nmetadata:\n  name: old\n",
        )]);
        let caps = Capabilities::new(
            keel_core::KubeVersion::default(),
            vec!["v1".into(), "networking.k8s.io/v1".into()],
        );

        assert!(classify(&input, "app", &caps).is_err());
        assert!(classify(&input, "app", &Capabilities::default()).is_ok());
    }

    #[test]
    fn test_manifest_text() {
        let input = docs(&[(
            "app/templates/cm.yaml",
            "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: cfg\n",
        )]);
        let classified = classify(&input, "app", &Capabilities::default()).unwrap();
        assert_eq!(
            manifest_text(&classified.resources),
            "---\n# Source: app/templates/cm.yaml\napiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: cfg\n"
        );
    }
}
