//! Annotation parsing with Helm compatibility
//!
//! Both `keel.io/*` and `helm.sh/*` hook annotations are recognised; the
//! Keel key wins when both are present.

use std::collections::BTreeMap;

/// Keel-native annotations
pub mod keel {
    pub const HOOK: &str = "keel.io/hook";
    pub const HOOK_WEIGHT: &str = "keel.io/hook-weight";
    pub const HOOK_DELETE_POLICY: &str = "keel.io/hook-delete-policy";
    /// Replica count recorded when a workload is stopped
    pub const PREVIOUS_REPLICAS: &str = "keel.io/previous-replicas";
    pub const RESOURCE_POLICY: &str = "keel.io/resource-policy";
}

/// Helm-compatible annotations
pub mod helm {
    pub const HOOK: &str = "helm.sh/hook";
    pub const HOOK_WEIGHT: &str = "helm.sh/hook-weight";
    pub const HOOK_DELETE_POLICY: &str = "helm.sh/hook-delete-policy";
    pub const RESOURCE_POLICY: &str = "helm.sh/resource-policy";
}

/// Get annotation value, preferring Keel over Helm
pub fn get_annotation<'a>(
    annotations: &'a BTreeMap<String, String>,
    keel_key: &str,
    helm_key: &str,
) -> Option<&'a str> {
    annotations
        .get(keel_key)
        .or_else(|| annotations.get(helm_key))
        .map(|s| s.as_str())
}

/// Split a comma separated annotation value
pub fn split_list(value: &str) -> Vec<&str> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

/// Hook weight (default: 0)
pub fn parse_hook_weight(annotations: &BTreeMap<String, String>) -> Result<i32, String> {
    match get_annotation(annotations, keel::HOOK_WEIGHT, helm::HOOK_WEIGHT) {
        None => Ok(0),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| format!("hook weight '{}' is not an integer", raw)),
    }
}

/// Collect `metadata.annotations` as strings; scalar values are stringified
pub fn annotations_of(metadata: &serde_yaml::Mapping) -> BTreeMap<String, String> {
    let Some(serde_yaml::Value::Mapping(map)) = metadata.get("annotations") else {
        return BTreeMap::new();
    };

    map.iter()
        .filter_map(|(k, v)| {
            let key = k.as_str()?.to_string();
            let value = match v {
                serde_yaml::Value::String(s) => s.clone(),
                serde_yaml::Value::Number(n) => n.to_string(),
                serde_yaml::Value::Bool(b) => b.to_string(),
                _ => return None,
            };
            Some((key, value))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_annotations(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_get_annotation_prefers_keel() {
        let ann = make_annotations(&[(keel::HOOK, "pre-install"), (helm::HOOK, "post-install")]);
        assert_eq!(
            get_annotation(&ann, keel::HOOK, helm::HOOK),
            Some("pre-install")
        );
    }

    #[test]
    fn test_get_annotation_falls_back_to_helm() {
        let ann = make_annotations(&[(helm::HOOK, "post-install")]);
        assert_eq!(
            get_annotation(&ann, keel::HOOK, helm::HOOK),
            Some("post-install")
        );
    }

    #[test]
    fn test_split_list() {
        assert_eq!(
            split_list("pre-install, post-upgrade,,"),
            vec!["pre-install", "post-upgrade"]
        );
        assert!(split_list(" ").is_empty());
    }

    #[test]
    fn test_hook_weight() {
        assert_eq!(parse_hook_weight(&BTreeMap::new()), Ok(0));
        assert_eq!(
            parse_hook_weight(&make_annotations(&[(helm::HOOK_WEIGHT, "-5")])),
            Ok(-5)
        );
        assert!(parse_hook_weight(&make_annotations(&[(keel::HOOK_WEIGHT, "heavy")])).is_err());
    }

    #[test]
    fn test_annotations_of_stringifies_scalars() {
        let meta: serde_yaml::Mapping = serde_yaml::from_str(
            "annotations:\n  keel.io/hook-weight: 3\n  note: text\n  nested: {a: b}\n",
        )
        .unwrap();
        let ann = annotations_of(&meta);
        assert_eq!(ann.get(keel::HOOK_WEIGHT).map(String::as_str), Some("3"));
        assert_eq!(ann.get("note").map(String::as_str), Some("text"));
        assert!(!ann.contains_key("nested"));
    }
}
