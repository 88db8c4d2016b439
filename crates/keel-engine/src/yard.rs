//! Engine registry and the package renderer built on it

use keel_core::{Package, RenderContext, TemplateContext, ValueOverlay};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::engine::{JinjaEngine, RenderResult, TemplateEngine};
use crate::error::{EngineError, Result};
use crate::suggestions::closest_match;

/// Name of the engine used when a pack does not ask for one
pub const DEFAULT_ENGINE: &str = "jinja";

/// Registry of template engines keyed by name
#[derive(Clone)]
pub struct EngineYard {
    engines: BTreeMap<String, Arc<dyn TemplateEngine>>,
    default: String,
}

impl Default for EngineYard {
    fn default() -> Self {
        let mut yard = Self::empty(DEFAULT_ENGINE);
        yard.register(Arc::new(JinjaEngine::strict()));
        yard.register(Arc::new(JinjaEngine::lenient()));
        yard
    }
}

impl EngineYard {
    /// A registry with no engines; `default` must be registered before use
    pub fn empty(default: impl Into<String>) -> Self {
        Self {
            engines: BTreeMap::new(),
            default: default.into(),
        }
    }

    /// Add or replace an engine under its own name
    pub fn register(&mut self, engine: Arc<dyn TemplateEngine>) {
        self.engines.insert(engine.name().to_string(), engine);
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.engines.keys().map(String::as_str)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn TemplateEngine>> {
        self.engines.get(name).cloned()
    }

    /// Pick the engine a package asks for.
    ///
    /// An unknown engine name is not fatal: a warning is logged and the
    /// default engine is used instead.
    pub fn select(&self, package: &Package) -> Result<Arc<dyn TemplateEngine>> {
        if let Some(requested) = package.pack.engine.name.as_deref() {
            if let Some(engine) = self.get(requested) {
                return Ok(engine);
            }

            let hint = closest_match(requested, self.names())
                .map(|name| format!(" (did you mean '{}'?)", name))
                .unwrap_or_default();
            tracing::warn!(
                pack = %package.name(),
                engine = %requested,
                fallback = %self.default,
                "unknown template engine{}, falling back to default",
                hint
            );
        }

        self.get(&self.default).ok_or_else(|| EngineError::Incompatible {
            engine: self.default.clone(),
            required: "to be registered".to_string(),
            actual: "no such engine".to_string(),
        })
    }

    /// Check the pack's engine requirement against `engine`
    pub fn check_compatible(&self, package: &Package, engine: &dyn TemplateEngine) -> Result<()> {
        let Some(requirement) = package.pack.engine.requirement()? else {
            return Ok(());
        };

        let actual = engine.version();
        if requirement.matches(&actual) {
            return Ok(());
        }

        Err(EngineError::Incompatible {
            engine: engine.name().to_string(),
            required: requirement.to_string(),
            actual: actual.to_string(),
        })
    }
}

/// Renders a package with an overlay in a given context
#[derive(Clone, Default)]
pub struct Renderer {
    yard: EngineYard,
}

impl Renderer {
    /// Render every document of `package`.
    ///
    /// The overlay is deep-merged over the package defaults; notes are split
    /// off into [`RenderResult::notes`].
    pub fn render(
        &self,
        package: &Package,
        overlay: &ValueOverlay,
        context: &RenderContext,
    ) -> Result<RenderResult> {
        let engine = self.yard.select(package)?;
        self.yard.check_compatible(package, engine.as_ref())?;

        let values = overlay.merged_over(&package.default_values)?;
        let template_ctx = TemplateContext::new(values, package.metadata(), context);

        tracing::debug!(
            pack = %package.name(),
            version = %package.version(),
            engine = %engine.name(),
            release = %context.release.name,
            revision = context.release.revision,
            "rendering package"
        );

        engine.render(package, &template_ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_core::{Capabilities, EngineConfig, Pack, PackMetadata, ReleaseInfo, Values};
    use semver::Version;

    fn package(engine: EngineConfig) -> Package {
        let pack = Pack {
            api_version: "keel/v1".into(),
            metadata: PackMetadata {
                name: "app1".into(),
                version: Version::new(1, 0, 0),
                description: None,
                app_version: None,
            },
            engine,
        };
        let mut templates = BTreeMap::new();
        templates.insert(
            "app1/templates/deploy.yaml".to_string(),
            "kind: Deployment\nspec:\n  replicas: {{ values.replica }}\n".to_string(),
        );
        templates.insert(
            "app1/templates/NOTES.txt".to_string(),
            "{{ release.name }} is up".to_string(),
        );
        Package::new(pack, Values::from_yaml("replica: 3\n").unwrap(), templates)
    }

    fn ctx() -> RenderContext {
        RenderContext::new(ReleaseInfo::for_install("app1", "default"), Capabilities::default())
    }

    #[test]
    fn test_render_merges_overlay_and_strips_notes() {
        let result = Renderer::default()
            .render(&package(EngineConfig::default()), &ValueOverlay::new("{replica: 1}"), &ctx())
            .unwrap();

        assert_eq!(result.manifests.len(), 1);
        assert!(result.manifests["app1/templates/deploy.yaml"].contains("replicas: 1"));
        assert_eq!(result.notes.as_deref(), Some("app1 is up"));
    }

    #[test]
    fn test_unknown_engine_falls_back() {
        let engine = EngineConfig {
            name: Some("handlebars".into()),
            ..Default::default()
        };
        let result = Renderer::default()
            .render(&package(engine), &ValueOverlay::default(), &ctx())
            .unwrap();

        assert!(result.manifests["app1/templates/deploy.yaml"].contains("replicas: 3"));
    }

    #[test]
    fn test_named_engine_is_used() {
        let yard = EngineYard::default();
        let engine = EngineConfig {
            name: Some("jinja-lenient".into()),
            ..Default::default()
        };
        assert_eq!(yard.select(&package(engine)).unwrap().name(), "jinja-lenient");
        assert_eq!(
            yard.names().collect::<Vec<_>>(),
            vec!["jinja", "jinja-lenient"]
        );
    }

    #[test]
    fn test_incompatible_engine() {
        let engine = EngineConfig {
            requires: Some("99.0.0".into()),
            ..Default::default()
        };
        let err = Renderer::default()
            .render(&package(engine), &ValueOverlay::default(), &ctx())
            .unwrap_err();

        assert!(matches!(err, EngineError::Incompatible { ref required, .. } if required == ">=99.0.0"));
    }

    #[test]
    fn test_compatible_minimum() {
        let engine = EngineConfig {
            requires: Some("0.0.1".into()),
            ..Default::default()
        };
        assert!(Renderer::default()
            .render(&package(engine), &ValueOverlay::default(), &ctx())
            .is_ok());
    }

    #[test]
    fn test_bad_overlay_is_reported() {
        let err = Renderer::default()
            .render(&package(EngineConfig::default()), &ValueOverlay::new("[1, 2]"), &ctx())
            .unwrap_err();
        assert!(matches!(err, EngineError::Core(_)));
    }

    #[test]
    fn test_render_is_deterministic() {
        let renderer = Renderer::default();
        let pkg = package(EngineConfig::default());
        let ctx = ctx();
        let first = renderer.render(&pkg, &ValueOverlay::default(), &ctx).unwrap();
        let second = renderer.render(&pkg, &ValueOverlay::default(), &ctx).unwrap();
        assert_eq!(first, second);
    }
}
