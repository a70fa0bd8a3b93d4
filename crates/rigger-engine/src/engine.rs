//! Template engine based on MiniJinja

use minijinja::Environment;
use rigger_core::{ChartPackage, TemplateContext, Values};
use serde::Deserialize;
use std::collections::BTreeMap;

use crate::error::{EngineError, Result, TemplateError};
use crate::filters;
use crate::functions;

const NOTES_TEMPLATE: &str = "NOTES.txt";

/// Result of rendering a chart
#[derive(Debug, Default)]
pub struct RenderResult {
    /// Rendered manifests keyed by source (`<chart>/templates/<name>`)
    pub manifests: BTreeMap<String, String>,

    /// Rendered NOTES.txt of the top-level chart
    pub notes: Option<String>,
}

impl RenderResult {
    /// All manifests as one multi-document YAML stream
    pub fn manifest(&self) -> String {
        self.manifests
            .iter()
            .map(|(source, body)| format!("---\n# Source: {}\n{}\n", source, body.trim()))
            .collect()
    }
}

/// Template engine builder
pub struct EngineBuilder {
    strict_mode: bool,
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self { strict_mode: true }
    }

    /// Set strict mode (fail on undefined variables)
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict_mode = strict;
        self
    }

    pub fn build(self) -> Engine {
        Engine::new(self.strict_mode)
    }
}

/// The template engine
#[derive(Debug, Clone)]
pub struct Engine {
    strict_mode: bool,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(true)
    }
}

impl Engine {
    pub fn new(strict_mode: bool) -> Self {
        Self { strict_mode }
    }

    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    fn create_environment(&self) -> Environment<'static> {
        let mut env = Environment::new();

        if self.strict_mode {
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
        env.add_filter("trunc", filters::trunc);
        env.add_filter("sha256", filters::sha256sum);

        env.add_function("fail", functions::fail);
        env.add_function("coalesce", functions::coalesce);
        env.add_function("ternary", functions::ternary);

        env
    }

    /// Render a single template string
    pub fn render_string(
        &self,
        template: &str,
        context: &TemplateContext,
        template_name: &str,
    ) -> Result<String> {
        let mut env = self.create_environment();
        env.add_template_owned(template_name.to_string(), template.to_string())
            .map_err(|e| TemplateError::from_minijinja(&e, template_name, template))?;

        render_one(&env, template_name, template, context)
    }

    /// Render every template of a chart and its enabled subcharts
    pub fn render_chart(
        &self,
        chart: &ChartPackage,
        context: &TemplateContext,
    ) -> Result<RenderResult> {
        let mut result = RenderResult::default();
        self.render_into(chart, context, chart.name(), &mut result.manifests)?;

        if let Some(notes) = &chart.notes {
            result.notes = Some(self.render_string(
                notes,
                context,
                &format!("{}/templates/{}", chart.name(), NOTES_TEMPLATE),
            )?);
        }

        Ok(result)
    }

    fn render_into(
        &self,
        chart: &ChartPackage,
        context: &TemplateContext,
        prefix: &str,
        manifests: &mut BTreeMap<String, String>,
    ) -> Result<()> {
        let mut env = self.create_environment();

        // Helpers must be loaded before anything that imports them renders.
        for (name, source) in &chart.templates {
            env.add_template_owned(name.clone(), source.clone())
                .map_err(|e| {
                    TemplateError::from_minijinja(&e, &qualified(prefix, name), source)
                })?;
        }

        for (name, source) in &chart.templates {
            if is_helper(name) {
                continue;
            }

            let source_name = qualified(prefix, name);
            let rendered = render_one(&env, name, source, context)
                .map_err(|e| rename_template(e, &source_name))?;

            let trimmed = rendered.trim();
            if trimmed.is_empty() || trimmed == "---" {
                tracing::trace!(template = %source_name, "rendered empty, skipped");
                continue;
            }

            validate_yaml(&source_name, &rendered)?;
            manifests.insert(source_name, rendered);
        }

        let parent_values = Values(context.values.clone());
        for (scope, subchart) in chart.enabled_subcharts(&parent_values) {
            let values = Values::for_subchart(
                &subchart.coalesce_values(&Values::new()),
                &parent_values,
                scope,
            );
            let sub_context = context.for_subchart(values, &subchart.metadata);
            let sub_prefix = format!("{}/charts/{}", prefix, subchart.name());
            self.render_into(subchart, &sub_context, &sub_prefix, manifests)?;
        }

        Ok(())
    }
}

fn render_one(
    env: &Environment<'static>,
    name: &str,
    source: &str,
    context: &TemplateContext,
) -> Result<String> {
    let tmpl = env
        .get_template(name)
        .map_err(|e| TemplateError::from_minijinja(&e, name, source))?;

    let ctx = minijinja::context! {
        values => &context.values,
        release => &context.release,
        chart => &context.chart,
        capabilities => &context.capabilities,
    };

    tmpl.render(ctx)
        .map_err(|e| TemplateError::from_minijinja(&e, name, source).into())
}

fn rename_template(err: EngineError, name: &str) -> EngineError {
    match err {
        EngineError::Template(mut template) => {
            template.template = name.to_string();
            EngineError::Template(template)
        }
        other => other,
    }
}

fn qualified(prefix: &str, name: &str) -> String {
    format!("{}/templates/{}", prefix, name)
}

/// Helper templates hold macros only and are never emitted
fn is_helper(name: &str) -> bool {
    name.rsplit('/')
        .next()
        .map(|file| file.starts_with('_'))
        .unwrap_or(false)
}

fn validate_yaml(template: &str, rendered: &str) -> Result<()> {
    for document in serde_yaml::Deserializer::from_str(rendered) {
        serde_yaml::Value::deserialize(document).map_err(|source| EngineError::InvalidOutput {
            template: template.to_string(),
            source,
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rigger_core::{ChartMetadata, ReleaseInfo};
    use std::path::PathBuf;

    fn metadata(name: &str) -> ChartMetadata {
        serde_yaml::from_str(&format!("apiVersion: v2\nname: {name}\nversion: 1.0.0\n")).unwrap()
    }

    fn chart(name: &str, templates: &[(&str, &str)], defaults: &str) -> ChartPackage {
        ChartPackage {
            metadata: metadata(name),
            default_values: Values::from_yaml(defaults).unwrap(),
            templates: templates
                .iter()
                .map(|(n, s)| (n.to_string(), s.to_string()))
                .collect(),
            notes: None,
            subcharts: Vec::new(),
            source: PathBuf::from(name),
        }
    }

    fn context_for(chart: &ChartPackage, overrides: &str) -> TemplateContext {
        let values = chart.coalesce_values(&Values::from_yaml(overrides).unwrap());
        TemplateContext::new(
            values,
            ReleaseInfo::for_install("demo", "default"),
            &chart.metadata,
        )
    }

    const CONFIGMAP: &str = r#"apiVersion: v1
kind: ConfigMap
metadata:
  name: {{ release.name }}-config
data:
  replicas: {{ values.replicas | quote }}
"#;

    #[test]
    fn test_render_string() {
        let c = chart("demo", &[], "replicas: 3");
        let ctx = context_for(&c, "");
        let engine = Engine::default();

        let out = engine
            .render_string("replicas: {{ values.replicas }}", &ctx, "t.yaml")
            .unwrap();
        assert_eq!(out, "replicas: 3");
    }

    #[test]
    fn test_render_chart_manifest() {
        let c = chart("demo", &[("configmap.yaml", CONFIGMAP)], "replicas: 1");
        let ctx = context_for(&c, "replicas: \"3\"");

        let result = Engine::default().render_chart(&c, &ctx).unwrap();

        insta::assert_snapshot!(result.manifest(), @r#"
        ---
        # Source: demo/templates/configmap.yaml
        apiVersion: v1
        kind: ConfigMap
        metadata:
          name: demo-config
        data:
          replicas: "3"
        "#);
    }

    #[test]
    fn test_helpers_are_importable_but_not_emitted() {
        let c = chart(
            "demo",
            &[
                (
                    "_helpers.tpl",
                    "{% macro fullname(release, chart) %}{{ release.name }}-{{ chart.name }}{% endmacro %}",
                ),
                (
                    "svc.yaml",
                    "{% from \"_helpers.tpl\" import fullname %}kind: Service\nmetadata:\n  name: {{ fullname(release, chart) }}\n",
                ),
            ],
            "",
        );
        let ctx = context_for(&c, "");

        let result = Engine::default().render_chart(&c, &ctx).unwrap();

        assert_eq!(
            result.manifests.keys().collect::<Vec<_>>(),
            vec!["demo/templates/svc.yaml"]
        );
        assert!(result.manifests["demo/templates/svc.yaml"].contains("name: demo-demo"));
    }

    #[test]
    fn test_empty_output_is_dropped() {
        let c = chart(
            "demo",
            &[("optional.yaml", "{% if values.enabled %}kind: Job{% endif %}\n")],
            "enabled: false",
        );
        let ctx = context_for(&c, "");

        let result = Engine::default().render_chart(&c, &ctx).unwrap();
        assert!(result.manifests.is_empty());
    }

    #[test]
    fn test_subchart_sees_scoped_values() {
        let mut parent = chart(
            "demo",
            &[("cm.yaml", CONFIGMAP)],
            "replicas: 1\ncache:\n  port: 7000\n",
        );
        parent.subcharts.push(chart(
            "cache",
            &[("svc.yaml", "kind: Service\nport: {{ values.port }}\nchart: {{ chart.name }}\n")],
            "port: 6379",
        ));
        let ctx = context_for(&parent, "");

        let result = Engine::default().render_chart(&parent, &ctx).unwrap();

        let svc = &result.manifests["demo/charts/cache/templates/svc.yaml"];
        assert!(svc.contains("port: 7000"));
        assert!(svc.contains("chart: cache"));
    }

    #[test]
    fn test_notes_rendered() {
        let mut c = chart("demo", &[], "");
        c.notes = Some("Release {{ release.name }} is up".to_string());
        let ctx = context_for(&c, "");

        let result = Engine::default().render_chart(&c, &ctx).unwrap();
        assert_eq!(result.notes.as_deref(), Some("Release demo is up"));
    }

    #[test]
    fn test_undefined_value_names_template() {
        let c = chart("demo", &[("bad.yaml", "x: {{ values.missing.deep }}\n")], "");
        let ctx = context_for(&c, "");

        let err = Engine::default().render_chart(&c, &ctx).unwrap_err();
        match err {
            EngineError::Template(t) => {
                assert_eq!(t.template, "demo/templates/bad.yaml");
                assert_eq!(t.kind, crate::error::TemplateErrorKind::UndefinedVariable);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_invalid_yaml_output() {
        let c = chart("demo", &[("broken.yaml", "a: [1, 2\n")], "");
        let ctx = context_for(&c, "");

        let err = Engine::default().render_chart(&c, &ctx).unwrap_err();
        assert!(matches!(err, EngineError::InvalidOutput { .. }));
    }

    #[test]
    fn test_is_helper() {
        assert!(is_helper("_helpers.tpl"));
        assert!(is_helper("nested/_x.tpl"));
        assert!(!is_helper("deploy.yaml"));
    }
}
