//! Template engines

use minijinja::Environment;
use keel_core::{Package, TemplateContext};
use semver::Version;
use std::collections::BTreeMap;

use crate::error::{Result, TemplateError};
use crate::filters;
use crate::functions;

/// Version every built-in engine reports for compatibility checks
pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Templates whose name ends in this go to [`RenderResult::notes`]; case-sensitive
pub const NOTES_FILE: &str = "NOTES.txt";

/// Result of rendering a package
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RenderResult {
    /// Rendered documents by name, notes excluded
    pub manifests: BTreeMap<String, String>,

    /// Rendered `NOTES.txt`, if the package has one
    pub notes: Option<String>,
}

/// A named template engine that turns package sources into documents.
///
/// Implementations must be deterministic: identical package, values and
/// context produce identical output.
pub trait TemplateEngine: Send + Sync {
    /// Registry name (`jinja`, `jinja-lenient`, ...)
    fn name(&self) -> &str;

    /// Version checked against a pack's engine requirement
    fn version(&self) -> Version;

    fn render(&self, package: &Package, context: &TemplateContext) -> Result<RenderResult>;
}

/// MiniJinja-backed engine
pub struct JinjaEngine {
    name: String,
    strict_mode: bool,
}

impl JinjaEngine {
    pub fn new(name: impl Into<String>, strict_mode: bool) -> Self {
        Self {
            name: name.into(),
            strict_mode,
        }
    }

    /// The default engine: `jinja`, strict about undefined values
    pub fn strict() -> Self {
        Self::new("jinja", true)
    }

    /// `jinja-lenient`: undefined values render as empty strings
    pub fn lenient() -> Self {
        Self::new("jinja-lenient", false)
    }

    fn create_environment(&self, strict: bool) -> Environment<'static> {
        let mut env = Environment::new();

        if strict {
            env.set_undefined_behavior(minijinja::UndefinedBehavior::Strict);
        } else {
            env.set_undefined_behavior(minijinja::UndefinedBehavior::Lenient);
        }

        env.add_filter("toyaml", filters::toyaml);
        env.add_filter("tojson", filters::tojson);
        env.add_filter("b64encode", filters::b64encode);
        env.add_filter("b64decode", filters::b64decode);
        env.add_filter("quote", filters::quote);
        env.add_filter("squote", filters::squote);
        env.add_filter("nindent", filters::nindent);
        env.add_filter("indent", filters::indent);
        env.add_filter("required", filters::required);
        env.add_filter("empty", filters::empty);
        env.add_filter("sha256", filters::sha256sum);
        env.add_filter("trunc", filters::trunc);
        env.add_filter("trimprefix", filters::trimprefix);
        env.add_filter("trimsuffix", filters::trimsuffix);
        env.add_filter("semver_match", filters::semver_match);

        env.add_function("fail", functions::fail);
        env.add_function("dict", functions::dict);
        env.add_function("list", functions::list);
        env.add_function("get", functions::get);
        env.add_function("coalesce", functions::coalesce);
        env.add_function("ternary", functions::ternary);
        env.add_function("tostring", functions::tostring);

        env
    }
}

impl TemplateEngine for JinjaEngine {
    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> Version {
        Version::parse(ENGINE_VERSION).unwrap_or_else(|_| Version::new(0, 0, 0))
    }

    fn render(&self, package: &Package, context: &TemplateContext) -> Result<RenderResult> {
        // a pack may opt out of strictness, never into it on a lenient engine
        let strict = self.strict_mode && package.pack.engine.strict;
        let mut env = self.create_environment(strict);

        let prefix = format!("{}/templates/", package.name());
        let local_name = |key: &str| key.strip_prefix(&prefix).unwrap_or(key).to_string();

        // Partials must be registered before anything includes them
        for (key, source) in &package.templates {
            env.add_template_owned(local_name(key), source.clone())
                .map_err(|e| TemplateError::from_minijinja(e, key, source))?;
        }

        let ctx = minijinja::context! {
            values => &context.values,
            release => &context.release,
            pack => &context.pack,
            capabilities => &context.capabilities,
        };

        let mut result = RenderResult::default();

        for (key, source) in &package.templates {
            let name = local_name(key);
            let is_partial = name
                .rsplit('/')
                .next()
                .is_some_and(|file| file.starts_with('_'));
            if is_partial {
                continue;
            }

            let rendered = env
                .get_template(&name)
                .and_then(|tmpl| tmpl.render(&ctx))
                .map_err(|e| TemplateError::from_minijinja(e, key, source))?;

            if key.ends_with(NOTES_FILE) {
                result.notes = Some(rendered);
                continue;
            }

            let trimmed = rendered.trim();
            if trimmed.is_empty() || trimmed == "---" {
                tracing::trace!(template = %key, "skipping empty document");
                continue;
            }

            let output_name = key.trim_end_matches(".j2").trim_end_matches(".jinja2");
            result.manifests.insert(output_name.to_string(), rendered);
        }

        Ok(result)
    }
}
