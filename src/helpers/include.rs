//! Include and insert sections
//!
//! `{#insert name}default{/insert}` declares an overridable extension
//! point in a base template; `{#include base}{#name}...{/name}{/include}`
//! renders the base with the caller's blocks replacing matching insert
//! points. Overrides live on an explicit stack of per-invocation maps,
//! never in the base template's tree, so templates stay immutable and
//! shareable across concurrent renders.

use std::collections::HashSet;
use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::Value;

use crate::error::{ParseError, RenderError};
use crate::expression::Expression;
use crate::render::{evaluate, render_block, render_nodes, OverrideMap, RenderContext};
use crate::template::{SectionNode, MAIN_BLOCK};
use crate::BoxFuture;

use super::{unquote, BlockCapture, SectionHelper, SectionHelperFactory, SectionInit};

pub struct IncludeSectionHelperFactory;

impl SectionHelperFactory for IncludeSectionHelperFactory {
    fn block_capture(&self) -> BlockCapture {
        // any tag that is not a registered helper is an override block
        BlockCapture::Any
    }

    fn initialize(&self, init: &SectionInit<'_>) -> Result<Arc<dyn SectionHelper>, ParseError> {
        let name = init
            .positional_params()
            .next()
            .ok_or_else(|| init.missing_parameter("template name"))?;

        let mut params = Vec::new();
        for (key, value) in init.key_params() {
            params.push((key.to_string(), init.parse_expression(value)?));
        }

        // duplicate labels are ambiguous: the override map is built
        // once per include node, so this must fail at parse time
        let mut seen = HashSet::new();
        for block in &init.blocks[1..] {
            if !seen.insert(block.label.as_str()) {
                return Err(ParseError::AmbiguousBlock {
                    label: block.label.clone(),
                    origin: block.origin.clone(),
                });
            }
        }

        Ok(Arc::new(IncludeSectionHelper {
            template_name: unquote(name).to_string(),
            params,
        }))
    }
}

struct IncludeSectionHelper {
    template_name: String,
    /// `key=expression` parameters, evaluated in the caller's scope
    params: Vec<(String, Expression)>,
}

impl SectionHelper for IncludeSectionHelper {
    fn resolve<'a>(
        &'a self,
        section: &'a SectionNode,
        ctx: &'a mut RenderContext,
        out: &'a mut String,
    ) -> BoxFuture<'a, Result<(), RenderError>> {
        Box::pin(async move {
            let template = ctx
                .engine()
                .get_template(&self.template_name)
                .ok_or_else(|| RenderError::TemplateNotFound {
                    name: self.template_name.clone(),
                })?;

            // parameters close over the scope active at the call site
            let mut frame = IndexMap::new();
            for (key, expression) in &self.params {
                let value = evaluate(expression, ctx).await?.unwrap_or(Value::Null);
                frame.insert(key.clone(), value);
            }

            let mut overrides = OverrideMap::new();
            for block in &section.blocks[1..] {
                overrides.insert(block.label.clone(), block.clone());
            }
            // non-empty anonymous content overrides the base's
            // anonymous insert point
            let main = section.main_block();
            if !main.is_empty() {
                overrides.insert(MAIN_BLOCK.to_string(), main.clone());
            }

            ctx.push_scope(frame);
            ctx.push_overrides(overrides);
            let result = render_nodes(template.nodes(), ctx, out).await;
            ctx.pop_overrides();
            ctx.pop_scope();
            result
        })
    }

    fn param_expressions(&self) -> Vec<Expression> {
        self.params.iter().map(|(_, e)| e.clone()).collect()
    }
}

pub struct InsertSectionHelperFactory;

impl SectionHelperFactory for InsertSectionHelperFactory {
    fn initialize(&self, init: &SectionInit<'_>) -> Result<Arc<dyn SectionHelper>, ParseError> {
        let name = init
            .positional_params()
            .next()
            .map(|n| unquote(n).to_string());

        // bare-name syntax is ambiguous between "invoke tag X" and
        // "override insert point X"; reject the collision outright
        if let Some(name) = &name {
            if init.registry.contains(name) {
                return Err(ParseError::InsertConflict {
                    name: name.clone(),
                    origin: init.origin.clone(),
                });
            }
        }

        Ok(Arc::new(InsertSectionHelper { name }))
    }
}

struct InsertSectionHelper {
    /// `None` for the single anonymous extension point
    name: Option<String>,
}

impl SectionHelper for InsertSectionHelper {
    fn resolve<'a>(
        &'a self,
        section: &'a SectionNode,
        ctx: &'a mut RenderContext,
        out: &'a mut String,
    ) -> BoxFuture<'a, Result<(), RenderError>> {
        Box::pin(async move {
            let label = self.name.as_deref().unwrap_or(MAIN_BLOCK);
            match ctx.find_override(label) {
                Some(block) => render_block(block.as_ref(), ctx, out).await,
                None => render_block(section.main_block().as_ref(), ctx, out).await,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::error::ParseError;
    use crate::helpers::UserTagSectionHelperFactory;
    use crate::resolver::{MapResolver, ThisResolver};
    use crate::Engine;
    use serde_json::{json, Value};

    fn engine() -> Engine {
        Engine::builder().add_defaults().build()
    }

    #[tokio::test]
    async fn test_include() {
        let engine = Engine::builder()
            .add_section_helper("include", super::IncludeSectionHelperFactory)
            .add_section_helper("insert", super::InsertSectionHelperFactory)
            .add_value_resolver(ThisResolver)
            .build();
        engine.put_template(
            "super",
            engine
                .parse("{this}: {#insert header}default header{/insert}")
                .unwrap(),
        );
        let template = engine
            .parse("{#include super}{#header}super header{/header}{/include}")
            .unwrap();
        assert_eq!(
            template.render(json!("HEADER")).await.unwrap(),
            "HEADER: super header"
        );
    }

    #[tokio::test]
    async fn test_multiple_inserts() {
        let engine = engine();
        engine.put_template(
            "super",
            engine
                .parse("{#insert header}default header{/insert} AND {#insert content}default content{/insert}")
                .unwrap(),
        );
        let template = engine
            .parse("{#include super}{#header}super header{/header}  {#content}super content{/content} {/include}")
            .unwrap();
        assert_eq!(
            template.render(Value::Null).await.unwrap(),
            "super header AND super content"
        );
    }

    #[tokio::test]
    async fn test_include_simple_data() {
        let engine = Engine::builder()
            .add_section_helper("include", super::IncludeSectionHelperFactory)
            .add_section_helper("insert", super::InsertSectionHelperFactory)
            .add_value_resolver(MapResolver)
            .build();
        engine.put_template(
            "detail",
            engine.parse("<strong>{name}</strong>:{price}").unwrap(),
        );
        let template = engine.parse("{#include detail/}").unwrap();
        assert_eq!(
            template
                .render(json!({"name": "Al", "price": "100"}))
                .await
                .unwrap(),
            "<strong>Al</strong>:100"
        );
    }

    #[tokio::test]
    async fn test_optional_block_end_tags() {
        let engine = engine();
        engine.put_template(
            "super",
            engine
                .parse("{#insert header}header{/}:{#insert footer /}")
                .unwrap(),
        );
        let template = engine
            .parse("{#include super}{#header}super header{#footer}super footer{/include}")
            .unwrap();
        assert_eq!(
            template.render(Value::Null).await.unwrap(),
            "super header:super footer"
        );
    }

    #[tokio::test]
    async fn test_include_in_loop() {
        let engine = engine();
        engine.put_template("foo", engine.parse("{#insert snippet}empty{/insert}").unwrap());
        let template = engine
            .parse("{#for i in 5}{#include foo}{#snippet}{i_count}.{/snippet} this should be ignored {/include}{/for}")
            .unwrap();
        assert_eq!(template.render(Value::Null).await.unwrap(), "1.2.3.4.5.");
    }

    #[tokio::test]
    async fn test_include_in_if() {
        let engine = engine();
        engine.put_template("foo", engine.parse("{#insert snippet}empty{/insert}").unwrap());
        let template = engine
            .parse("{#if true}{#include foo} {#snippet}1{/snippet} {/include}{/if}")
            .unwrap();
        assert_eq!(template.render(Value::Null).await.unwrap(), "1");
    }

    #[tokio::test]
    async fn test_user_tag_inside_insert() {
        let engine = Engine::builder()
            .add_defaults()
            .add_section_helper("hello", UserTagSectionHelperFactory::new("hello"))
            .build();
        engine.put_template("hello", engine.parse("{name}").unwrap());
        engine.put_template("base", engine.parse("{#insert snippet}{/insert}").unwrap());
        let template = engine
            .parse("{#include base} {#snippet}{#hello name='foo'/}{/snippet} {/include}")
            .unwrap();
        assert_eq!(template.render(Value::Null).await.unwrap(), "foo");
    }

    #[tokio::test]
    async fn test_include_standalone_lines() {
        let engine = Engine::builder()
            .add_defaults()
            .remove_standalone_lines(true)
            .build();
        engine.put_template(
            "super",
            engine.parse("{#insert header}\ndefault header\n{/insert}").unwrap(),
        );
        let template = engine
            .parse("{#include super}\n{#header}\nsuper header\n{/header}\n{/include}")
            .unwrap();
        assert_eq!(template.render(Value::Null).await.unwrap(), "super header\n");
    }

    #[tokio::test]
    async fn test_empty_include_with_params() {
        let engine = engine();
        engine.put_template("bar/fool.html", engine.parse("{foo} and {that}").unwrap());
        let template = engine
            .parse("{#include bar/fool.html that=true /}")
            .unwrap();
        assert_eq!(
            template.render(json!({"foo": 1})).await.unwrap(),
            "1 and true"
        );
    }

    #[tokio::test]
    async fn test_insert_param_resolves_in_caller_scope() {
        let engine = engine();
        engine.put_template(
            "super",
            engine
                .parse("{#insert header}default header{/insert} and {#insert footer}{that}{/}")
                .unwrap(),
        );
        let template = engine
            .parse("{#include 'super' that=foo}{#header}{that}{/}{/}")
            .unwrap();
        // foo, that
        assert_eq!(template.expressions().len(), 2);
        assert_eq!(
            template.render(json!({"foo": 1})).await.unwrap(),
            "1 and 1"
        );
    }

    #[tokio::test]
    async fn test_default_insert() {
        let engine = engine();
        engine.put_template(
            "super",
            engine
                .parse(concat!(
                    "<html>",
                    "<head>",
                    "<meta charset=\"UTF-8\">",
                    "<title>{#insert title}Default Title{/}</title>",
                    "</head>",
                    "<body>",
                    "  {#insert}No body!{/}",
                    "</body>",
                    "</html>"
                ))
                .unwrap(),
        );
        let template = engine
            .parse("{#include super}{#title}My Title{/title}Body {foo}!{/}")
            .unwrap();
        assert_eq!(
            template.render(json!({"foo": 1})).await.unwrap(),
            concat!(
                "<html>",
                "<head>",
                "<meta charset=\"UTF-8\">",
                "<title>My Title</title>",
                "</head>",
                "<body>",
                "  Body 1!",
                "</body>",
                "</html>"
            )
        );
    }

    #[tokio::test]
    async fn test_default_insert_without_override() {
        let engine = engine();
        engine.put_template(
            "super",
            engine.parse("{#insert header}default{/insert}").unwrap(),
        );
        let template = engine.parse("{#include super /}").unwrap();
        assert_eq!(template.render(Value::Null).await.unwrap(), "default");
    }

    #[test]
    fn test_ambiguous_inserts() {
        let engine = engine();
        engine.put_template(
            "super",
            engine.parse("{#insert header}default header{/insert}").unwrap(),
        );
        let err = engine
            .parse("{#include super}{#header}1{/}{#header}2{/}{/}")
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Multiple blocks define the content for the {#insert} section of name [header] on line 1"
        );
        assert_eq!(err.origin().line, 1);
    }

    #[tokio::test]
    async fn test_insert_in_loop() {
        let engine = engine();
        engine.put_template(
            "super",
            engine.parse("{#for i in 5}{#insert row}No row{/}{/for}").unwrap(),
        );
        let template = engine.parse("{#include super}{#row}{i}:{/row}{/}").unwrap();
        assert_eq!(template.render(Value::Null).await.unwrap(), "1:2:3:4:5:");
    }

    #[test]
    fn test_tag_and_insert_conflict() {
        let engine = Engine::builder()
            .add_defaults()
            .add_section_helper("row", UserTagSectionHelperFactory::new("row"))
            .build();
        engine.put_template("row", engine.parse("{foo}").unwrap());
        let err = engine.parse("{#insert}{/}\n{#insert row /}").unwrap_err();
        assert_eq!(
            err.to_string(),
            "An {#insert} section defined in the {#include} section on line 2 conflicts with an existing section/tag: row"
        );
        assert!(matches!(err, ParseError::InsertConflict { .. }));
    }

    #[tokio::test]
    async fn test_nested_includes_innermost_override_wins() {
        let engine = engine();
        engine.put_template("inner", engine.parse("{#insert row}inner default{/}").unwrap());
        engine.put_template(
            "outer",
            engine
                .parse("{#include inner}{#row}outer row{/row}{/include}")
                .unwrap(),
        );
        // the outer include's override map does not leak into the
        // inner include's own invocation
        let template = engine
            .parse("{#include outer}{#row}caller row{/row}{/include}")
            .unwrap();
        assert_eq!(template.render(Value::Null).await.unwrap(), "outer row");
    }

    #[tokio::test]
    async fn test_missing_template_is_render_error() {
        let engine = engine();
        let template = engine.parse("{#include nowhere /}").unwrap();
        let err = template.render(Value::Null).await.unwrap_err();
        assert_eq!(err.to_string(), "template not found: nowhere");
    }
}
