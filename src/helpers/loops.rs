//! Loop section
//!
//! `{#for item in items}...{/for}` renders its body once per element,
//! with iteration metadata exposed as `item_count`, `item_index`,
//! `item_isFirst` and `item_isLast` locals. An `{#else}` block renders
//! when the iterable is empty.

use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::{json, Value};

use crate::error::{ParseError, RenderError};
use crate::expression::Expression;
use crate::render::{evaluate, render_block, RenderContext};
use crate::template::SectionNode;
use crate::BoxFuture;

use super::{BlockCapture, SectionHelper, SectionHelperFactory, SectionInit};

pub struct ForSectionHelperFactory;

impl SectionHelperFactory for ForSectionHelperFactory {
    fn block_capture(&self) -> BlockCapture {
        BlockCapture::labels(["else"])
    }

    fn initialize(&self, init: &SectionInit<'_>) -> Result<Arc<dyn SectionHelper>, ParseError> {
        // {#for <alias> in <iterable>}
        if init.params.len() != 3 || init.params[1] != "in" {
            return Err(init.missing_parameter("<alias> in <iterable>"));
        }
        let alias = init.params[0].clone();
        let iterable = init.parse_expression(&init.params[2])?;
        Ok(Arc::new(ForSectionHelper { alias, iterable }))
    }
}

struct ForSectionHelper {
    alias: String,
    iterable: Expression,
}

impl ForSectionHelper {
    /// Materialize the elements of an iterable value. Arrays iterate
    /// their elements, objects their `{key, value}` entries, and a
    /// non-negative integer `n` the numbers `1..=n`.
    fn elements(&self, value: Option<Value>) -> Result<Vec<Value>, RenderError> {
        let not_iterable = || RenderError::NotIterable {
            expression: self.iterable.to_string(),
        };
        match value {
            Some(Value::Array(items)) => Ok(items),
            Some(Value::Object(map)) => Ok(map
                .into_iter()
                .map(|(key, value)| json!({ "key": key, "value": value }))
                .collect()),
            Some(Value::Number(n)) => {
                let count = n.as_u64().ok_or_else(not_iterable)?;
                Ok((1..=count).map(Value::from).collect())
            }
            _ => Err(not_iterable()),
        }
    }
}

impl SectionHelper for ForSectionHelper {
    fn resolve<'a>(
        &'a self,
        section: &'a SectionNode,
        ctx: &'a mut RenderContext,
        out: &'a mut String,
    ) -> BoxFuture<'a, Result<(), RenderError>> {
        Box::pin(async move {
            let value = evaluate(&self.iterable, ctx).await?;
            let elements = self.elements(value)?;

            if elements.is_empty() {
                if let Some(block) = section.block("else") {
                    return render_block(block.as_ref(), ctx, out).await;
                }
                return Ok(());
            }

            let last = elements.len() - 1;
            for (index, element) in elements.into_iter().enumerate() {
                let mut frame = IndexMap::new();
                frame.insert(self.alias.clone(), element);
                frame.insert(format!("{}_count", self.alias), Value::from(index + 1));
                frame.insert(format!("{}_index", self.alias), Value::from(index));
                frame.insert(format!("{}_isFirst", self.alias), Value::Bool(index == 0));
                frame.insert(format!("{}_isLast", self.alias), Value::Bool(index == last));

                ctx.push_scope(frame);
                let result = render_block(section.main_block().as_ref(), ctx, out).await;
                ctx.pop_scope();
                result?;
            }
            Ok(())
        })
    }

    fn param_expressions(&self) -> Vec<Expression> {
        vec![self.iterable.clone()]
    }
}
