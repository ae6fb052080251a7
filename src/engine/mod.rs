//! Template engine
//!
//! The [`Engine`] owns everything shared between templates: the
//! section helper registry, the value resolver chain, parser settings
//! and the named template store. Engines are cheap to clone and safe
//! to share across tasks; build one once and reuse it.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, Weak};

use crate::error::ParseError;
use crate::helpers::{
    ForSectionHelperFactory, HelperRegistry, IfSectionHelperFactory, IncludeSectionHelperFactory,
    InsertSectionHelperFactory, SectionHelperFactory,
};
use crate::parser::Parser;
use crate::resolver::{ListResolver, MapResolver, ResolverChain, ThisResolver, ValueResolver};
use crate::template::{Escape, Template};

/// What to do when an expression resolves to nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnresolvedPolicy {
    /// Render the empty string.
    #[default]
    Empty,
    /// Keep the original `{expression}` text in the output.
    Keep,
    /// Fail the render with an error.
    Fail,
}

struct EngineInner {
    helpers: HelperRegistry,
    chain: ResolverChain,
    templates: RwLock<HashMap<String, Template>>,
    remove_standalone_lines: bool,
    unresolved: UnresolvedPolicy,
    escape: Escape,
}

/// Shared template engine handle.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

/// Non-owning engine handle held by compiled templates. The engine's
/// registry stores templates, so a strong handle here would form a
/// reference cycle and the engine would never be freed.
pub(crate) struct WeakEngine {
    inner: Weak<EngineInner>,
}

impl WeakEngine {
    pub(crate) fn upgrade(&self) -> Option<Engine> {
        self.inner.upgrade().map(|inner| Engine { inner })
    }
}

impl Engine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::default()
    }

    pub(crate) fn downgrade(&self) -> WeakEngine {
        WeakEngine {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Parse an anonymous template.
    pub fn parse(&self, source: &str) -> Result<Template, ParseError> {
        self.compile(None, source)
    }

    /// Parse a template that knows its own name; the name shows up in
    /// error origins. The template is not registered, use
    /// [`put_template`](Self::put_template) for that.
    pub fn parse_named(&self, name: &str, source: &str) -> Result<Template, ParseError> {
        self.compile(Some(name), source)
    }

    fn compile(&self, name: Option<&str>, source: &str) -> Result<Template, ParseError> {
        let parser = Parser {
            registry: &self.inner.helpers,
            template_name: name,
            remove_standalone_lines: self.inner.remove_standalone_lines,
            escape: self.inner.escape,
        };
        let (nodes, expressions) = parser.parse(source)?;
        Ok(Template::new(
            self.downgrade(),
            name.map(str::to_string),
            nodes,
            expressions,
        ))
    }

    /// Register a template under a name so that `{#include}` and user
    /// tags can find it. Replaces any previous template of that name.
    pub fn put_template(&self, name: impl Into<String>, template: Template) {
        let name = name.into();
        tracing::debug!("Registered template {}", name);
        self.inner
            .templates
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name, template);
    }

    pub fn get_template(&self, name: &str) -> Option<Template> {
        self.inner
            .templates
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
    }

    pub(crate) fn chain(&self) -> &ResolverChain {
        &self.inner.chain
    }

    pub(crate) fn unresolved_policy(&self) -> UnresolvedPolicy {
        self.inner.unresolved
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("unresolved", &self.inner.unresolved)
            .field("escape", &self.inner.escape)
            .finish_non_exhaustive()
    }
}

/// Builder for [`Engine`].
pub struct EngineBuilder {
    helpers: HelperRegistry,
    resolvers: Vec<Box<dyn ValueResolver>>,
    remove_standalone_lines: bool,
    unresolved: UnresolvedPolicy,
    escape: Escape,
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self {
            helpers: HelperRegistry::default(),
            resolvers: Vec::new(),
            remove_standalone_lines: false,
            unresolved: UnresolvedPolicy::default(),
            escape: Escape::None,
        }
    }
}

impl EngineBuilder {
    /// Register the built-in section helpers (`if`, `for`, `include`,
    /// `insert`) and value resolvers (`this`, maps, lists).
    pub fn add_defaults(self) -> Self {
        self.add_section_helper("if", IfSectionHelperFactory)
            .add_section_helper("for", ForSectionHelperFactory)
            .add_section_helper("include", IncludeSectionHelperFactory)
            .add_section_helper("insert", InsertSectionHelperFactory)
            .add_value_resolver(ThisResolver)
            .add_value_resolver(MapResolver)
            .add_value_resolver(ListResolver)
    }

    pub fn add_section_helper(
        mut self,
        name: impl Into<String>,
        factory: impl SectionHelperFactory + 'static,
    ) -> Self {
        self.helpers.insert(name, Arc::new(factory));
        self
    }

    pub fn add_value_resolver(mut self, resolver: impl ValueResolver + 'static) -> Self {
        self.resolvers.push(Box::new(resolver));
        self
    }

    /// Drop lines that contain nothing but section tags, comments and
    /// whitespace from the output.
    pub fn remove_standalone_lines(mut self, remove: bool) -> Self {
        self.remove_standalone_lines = remove;
        self
    }

    pub fn unresolved(mut self, policy: UnresolvedPolicy) -> Self {
        self.unresolved = policy;
        self
    }

    /// HTML-escape interpolated values.
    pub fn escape_html(mut self, escape: bool) -> Self {
        self.escape = if escape { Escape::Html } else { Escape::None };
        self
    }

    pub fn build(self) -> Engine {
        Engine {
            inner: Arc::new(EngineInner {
                helpers: self.helpers,
                chain: ResolverChain::new(self.resolvers),
                templates: RwLock::new(HashMap::new()),
                remove_standalone_lines: self.remove_standalone_lines,
                unresolved: self.unresolved,
                escape: self.escape,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RenderError;
    use crate::resolver::{Resolution, ResolutionContext};
    use crate::BoxFuture;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicBool, Ordering};

    #[tokio::test]
    async fn test_render_with_serializable_data() {
        #[derive(serde::Serialize)]
        struct Page {
            title: String,
        }
        let engine = Engine::builder().add_defaults().build();
        let template = engine.parse("<h1>{title}</h1>").unwrap();
        let output = template
            .render(Page {
                title: "Home".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(output, "<h1>Home</h1>");
    }

    #[tokio::test]
    async fn test_engine_is_cheaply_cloneable() {
        let engine = Engine::builder().add_defaults().build();
        engine.put_template("shared", engine.parse("shared").unwrap());
        let clone = engine.clone();
        assert!(clone.get_template("shared").is_some());
        let template = clone.parse("{#include shared /}").unwrap();
        assert_eq!(template.render(Value::Null).await.unwrap(), "shared");
    }

    #[tokio::test]
    async fn test_put_template_replaces() {
        let engine = Engine::builder().add_defaults().build();
        engine.put_template("page", engine.parse("v1").unwrap());
        engine.put_template("page", engine.parse("v2").unwrap());
        let template = engine.parse("{#include page /}").unwrap();
        assert_eq!(template.render(Value::Null).await.unwrap(), "v2");
    }

    struct CanaryResolver {
        dropped: Arc<AtomicBool>,
    }

    impl Drop for CanaryResolver {
        fn drop(&mut self) {
            self.dropped.store(true, Ordering::SeqCst);
        }
    }

    impl ValueResolver for CanaryResolver {
        fn resolve<'a>(
            &'a self,
            _ctx: &'a ResolutionContext<'a>,
        ) -> BoxFuture<'a, Result<Resolution, RenderError>> {
            Box::pin(async { Ok(Resolution::NotFound) })
        }
    }

    #[tokio::test]
    async fn test_registry_does_not_pin_engine() {
        let dropped = Arc::new(AtomicBool::new(false));
        let engine = Engine::builder()
            .add_defaults()
            .add_value_resolver(CanaryResolver {
                dropped: dropped.clone(),
            })
            .build();
        engine.put_template("page", engine.parse("{x}").unwrap());
        let template = engine.get_template("page").unwrap();

        // registered templates hold the engine weakly, so dropping the
        // last engine handle frees it (and its resolvers) even with a
        // template handle still alive
        drop(engine);
        assert!(dropped.load(Ordering::SeqCst));

        // the surviving handle fails cleanly instead of dangling
        let err = template.render(Value::Null).await.unwrap_err();
        assert!(matches!(err, RenderError::EngineDropped));
    }

    #[test]
    fn test_engine_freed_without_registration() {
        let dropped = Arc::new(AtomicBool::new(false));
        let engine = Engine::builder()
            .add_value_resolver(CanaryResolver {
                dropped: dropped.clone(),
            })
            .build();
        drop(engine);
        assert!(dropped.load(Ordering::SeqCst));
    }

    #[test]
    fn test_get_template_missing() {
        let engine = Engine::builder().add_defaults().build();
        assert!(engine.get_template("nope").is_none());
    }

    #[tokio::test]
    async fn test_html_escaping() {
        let engine = Engine::builder().add_defaults().escape_html(true).build();
        let template = engine.parse("{content}").unwrap();
        assert_eq!(
            template
                .render(json!({"content": "<b>&\"bold\"</b>"}))
                .await
                .unwrap(),
            "&lt;b&gt;&amp;&quot;bold&quot;&lt;/b&gt;"
        );
    }

    #[tokio::test]
    async fn test_no_escaping_by_default() {
        let engine = Engine::builder().add_defaults().build();
        let template = engine.parse("{content}").unwrap();
        assert_eq!(
            template.render(json!({"content": "<b>"})).await.unwrap(),
            "<b>"
        );
    }

    #[test]
    fn test_named_template_origin_in_errors() {
        let engine = Engine::builder().add_defaults().build();
        let err = engine.parse_named("page.html", "{#if x}").unwrap_err();
        assert!(err.to_string().contains("page.html"));
    }
}
