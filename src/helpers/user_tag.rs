//! User-defined tags
//!
//! A user tag renders a separately registered template under its own
//! name, e.g. `{#hello name='foo'/}`. Tag parameters become top-level
//! variables in a fresh scope layered over the caller's scopes, so
//! unresolved lookups still fall through to the calling context.

use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::Value;

use crate::error::{ParseError, RenderError};
use crate::expression::Expression;
use crate::render::{evaluate, render_nodes, RenderContext};
use crate::template::SectionNode;
use crate::BoxFuture;

use super::{SectionHelper, SectionHelperFactory, SectionInit};

/// Factory for one user tag, bound to the name of the template it
/// renders. Register it under the tag name:
/// `builder.add_section_helper("hello", UserTagSectionHelperFactory::new("hello"))`.
pub struct UserTagSectionHelperFactory {
    template_name: String,
}

impl UserTagSectionHelperFactory {
    pub fn new(template_name: impl Into<String>) -> Self {
        Self {
            template_name: template_name.into(),
        }
    }
}

impl SectionHelperFactory for UserTagSectionHelperFactory {
    fn initialize(&self, init: &SectionInit<'_>) -> Result<Arc<dyn SectionHelper>, ParseError> {
        let mut params = Vec::new();
        for (key, value) in init.key_params() {
            params.push((key.to_string(), init.parse_expression(value)?));
        }
        Ok(Arc::new(UserTagSectionHelper {
            template_name: self.template_name.clone(),
            params,
        }))
    }
}

struct UserTagSectionHelper {
    template_name: String,
    params: Vec<(String, Expression)>,
}

impl SectionHelper for UserTagSectionHelper {
    fn resolve<'a>(
        &'a self,
        _section: &'a SectionNode,
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

            let mut frame = IndexMap::new();
            for (key, expression) in &self.params {
                let value = evaluate(expression, ctx).await?.unwrap_or(Value::Null);
                frame.insert(key.clone(), value);
            }

            ctx.push_scope(frame);
            let result = render_nodes(template.nodes(), ctx, out).await;
            ctx.pop_scope();
            result
        })
    }

    fn param_expressions(&self) -> Vec<Expression> {
        self.params.iter().map(|(_, e)| e.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::UserTagSectionHelperFactory;
    use crate::Engine;
    use serde_json::{json, Value};

    fn engine() -> Engine {
        Engine::builder()
            .add_defaults()
            .add_section_helper("hello", UserTagSectionHelperFactory::new("hello"))
            .build()
    }

    #[tokio::test]
    async fn test_self_closing_tag_with_params() {
        let engine = engine();
        engine.put_template("hello", engine.parse("Hello {name}!").unwrap());
        let template = engine.parse("{#hello name='world'/}").unwrap();
        assert_eq!(template.render(Value::Null).await.unwrap(), "Hello world!");
    }

    #[tokio::test]
    async fn test_params_evaluated_in_caller_scope() {
        let engine = engine();
        engine.put_template("hello", engine.parse("Hello {name}!").unwrap());
        let template = engine.parse("{#hello name=user/}").unwrap();
        assert_eq!(
            template.render(json!({"user": "Al"})).await.unwrap(),
            "Hello Al!"
        );
    }

    #[tokio::test]
    async fn test_unresolved_falls_through_to_caller() {
        let engine = engine();
        engine.put_template("hello", engine.parse("{greeting} {name}!").unwrap());
        let template = engine.parse("{#hello name='world'/}").unwrap();
        // greeting is not a tag parameter, so the caller's data is used
        assert_eq!(
            template.render(json!({"greeting": "Hi"})).await.unwrap(),
            "Hi world!"
        );
    }

    #[tokio::test]
    async fn test_missing_tag_template_is_render_error() {
        let engine = engine();
        let template = engine.parse("{#hello name='x'/}").unwrap();
        assert!(template.render(Value::Null).await.is_err());
    }

    #[tokio::test]
    async fn test_tag_inside_loop() {
        let engine = engine();
        engine.put_template("hello", engine.parse("{n}.").unwrap());
        let template = engine.parse("{#for i in 3}{#hello n=i/}{/for}").unwrap();
        assert_eq!(template.render(Value::Null).await.unwrap(), "1.2.3.");
    }
}
