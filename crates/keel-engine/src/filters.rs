//! Kubernetes-flavoured template filters
//!
//! These filters extend MiniJinja with Helm-compatible functionality.

use base64::Engine as _;
use minijinja::{Error, ErrorKind, Value};
use semver::{Version, VersionReq};

fn invalid(message: impl std::fmt::Display) -> Error {
    Error::new(ErrorKind::InvalidOperation, message.to_string())
}

/// Convert a value to YAML format
///
/// Usage: {{ values.config | toyaml }}
pub fn toyaml(value: Value) -> Result<String, Error> {
    let json_value: serde_json::Value = serde_json::to_value(&value).map_err(invalid)?;
    let yaml = serde_yaml::to_string(&json_value).map_err(invalid)?;

    Ok(yaml.trim_start_matches("---\n").trim_end().to_string())
}

/// Convert a value to JSON format
///
/// Usage: {{ values.config | tojson }}
pub fn tojson(value: Value) -> Result<String, Error> {
    let json_value: serde_json::Value = serde_json::to_value(&value).map_err(invalid)?;
    serde_json::to_string(&json_value).map_err(invalid)
}

/// Usage: {{ secret | b64encode }}
#[must_use]
pub fn b64encode(value: String) -> String {
    base64::engine::general_purpose::STANDARD.encode(value.as_bytes())
}

/// Usage: {{ encoded | b64decode }}
pub fn b64decode(value: String) -> Result<String, Error> {
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(value.as_bytes())
        .map_err(|e| invalid(format!("base64 decode error: {}", e)))?;

    String::from_utf8(decoded).map_err(|e| invalid(format!("UTF-8 decode error: {}", e)))
}

fn plain(value: &Value) -> String {
    value
        .as_str()
        .map(str::to_string)
        .unwrap_or_else(|| value.to_string())
}

/// Quote a string with double quotes
///
/// Usage: {{ name | quote }}
#[must_use]
pub fn quote(value: Value) -> String {
    format!(
        "\"{}\"",
        plain(&value).replace('\\', "\\\\").replace('"', "\\\"")
    )
}

/// Usage: {{ name | squote }}
#[must_use]
pub fn squote(value: Value) -> String {
    format!("'{}'", plain(&value).replace('\'', "''"))
}

/// Indent text with a newline prefix (like Helm's nindent)
///
/// Usage: {{ content | nindent(4) }}
#[must_use]
pub fn nindent(value: String, spaces: usize) -> String {
    format!("\n{}", indent(value, spaces))
}

/// Indent every non-empty line by `spaces`
///
/// Usage: {{ content | indent(4) }}
#[must_use]
pub fn indent(value: String, spaces: usize) -> String {
    let pad = " ".repeat(spaces);
    value
        .lines()
        .map(|line| {
            if line.is_empty() {
                String::new()
            } else {
                format!("{}{}", pad, line)
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Require a value, fail if undefined or empty
///
/// Usage: {{ values.required_field | required("field is required") }}
pub fn required(value: Value, message: Option<String>) -> Result<Value, Error> {
    let missing = value.is_undefined() || value.is_none();
    let blank = value.as_str().is_some_and(str::is_empty);

    if missing || blank {
        let fallback = if missing {
            "required value is missing"
        } else {
            "required value is empty"
        };
        return Err(invalid(message.unwrap_or_else(|| fallback.to_string())));
    }

    Ok(value)
}

/// Usage: {% if values.list | empty %}
pub fn empty(value: Value) -> bool {
    if value.is_undefined() || value.is_none() {
        return true;
    }

    match value.len() {
        Some(len) => len == 0,
        None => value.as_str().is_some_and(str::is_empty),
    }
}

/// Usage: {{ value | sha256 }}
pub fn sha256sum(value: String) -> String {
    use sha2::{Digest, Sha256};
    format!("{:x}", Sha256::digest(value.as_bytes()))
}

/// Truncate a string to a maximum number of characters
///
/// Usage: {{ name | trunc(63) }}
pub fn trunc(value: String, length: usize) -> String {
    value.chars().take(length).collect()
}

/// Usage: {{ name | trimprefix("v") }}
pub fn trimprefix(value: String, prefix: String) -> String {
    value.strip_prefix(&prefix).unwrap_or(&value).to_string()
}

/// Usage: {{ name | trimsuffix(".yaml") }}
pub fn trimsuffix(value: String, suffix: String) -> String {
    value.strip_suffix(&suffix).unwrap_or(&value).to_string()
}

/// Check a version against a SemVer constraint.
///
/// Kubernetes-style versions (`v1.31.0`, `1.31.0-gke.100`, `1.31`) are accepted.
///
/// Usage: {{ capabilities.kubeVersion.version | semver_match(">=1.21.0") }}
pub fn semver_match(version: Value, constraint: String) -> Result<bool, Error> {
    let raw = version
        .as_str()
        .ok_or_else(|| invalid("version must be a string"))?;
    let clean = raw.trim_start_matches('v');

    // compare on the numeric core only
    let core = clean.split(['-', '+']).next().unwrap_or(clean);
    let mut nums = core.split('.').map(|part| part.parse::<u64>().ok());
    let parsed = match (nums.next().flatten(), nums.next().flatten(), nums.next().flatten()) {
        (Some(major), Some(minor), patch) => Version::new(major, minor, patch.unwrap_or(0)),
        _ => return Err(invalid(format!("Invalid version format: {}", raw))),
    };

    let req = VersionReq::parse(constraint.trim())
        .map_err(|e| invalid(format!("Invalid constraint '{}': {}", constraint, e)))?;

    Ok(req.matches(&parsed))
}
