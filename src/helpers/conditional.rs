//! Conditional section
//!
//! `{#if cond}...{#else if other}...{#else}...{/if}` is modeled as a
//! sequence of guarded blocks evaluated in order; the first truthy
//! guard wins.

use std::sync::Arc;

use crate::error::{ParseError, RenderError};
use crate::expression::Expression;
use crate::render::{evaluate, is_truthy, render_block, RenderContext};
use crate::template::SectionNode;
use crate::BoxFuture;

use super::{BlockCapture, SectionHelper, SectionHelperFactory, SectionInit};

pub struct IfSectionHelperFactory;

impl SectionHelperFactory for IfSectionHelperFactory {
    fn block_capture(&self) -> BlockCapture {
        BlockCapture::labels(["else"])
    }

    fn initialize(&self, init: &SectionInit<'_>) -> Result<Arc<dyn SectionHelper>, ParseError> {
        let condition = init
            .params
            .first()
            .ok_or_else(|| init.missing_parameter("condition"))?;
        let mut branches = vec![Branch {
            condition: Some(init.parse_expression(condition)?),
            block: 0,
        }];

        for (index, block) in init.blocks.iter().enumerate().skip(1) {
            // {#else} has no params, {#else if cond} carries ["if", cond]
            let condition = match block.params.first().map(String::as_str) {
                None => None,
                Some("if") => {
                    let token = block.params.get(1).ok_or_else(|| {
                        init.missing_parameter("condition after {#else if}")
                    })?;
                    Some(Expression::parse(token, &block.origin)?)
                }
                Some(token) => Some(Expression::parse(token, &block.origin)?),
            };
            branches.push(Branch {
                condition,
                block: index,
            });
        }
        Ok(Arc::new(IfSectionHelper { branches }))
    }
}

struct Branch {
    /// `None` for the unconditional trailing `{#else}`
    condition: Option<Expression>,
    /// Index into the section's block list
    block: usize,
}

struct IfSectionHelper {
    branches: Vec<Branch>,
}

impl SectionHelper for IfSectionHelper {
    fn resolve<'a>(
        &'a self,
        section: &'a SectionNode,
        ctx: &'a mut RenderContext,
        out: &'a mut String,
    ) -> BoxFuture<'a, Result<(), RenderError>> {
        Box::pin(async move {
            for branch in &self.branches {
                let taken = match &branch.condition {
                    None => true,
                    Some(condition) => evaluate(condition, ctx)
                        .await?
                        .map(|value| is_truthy(&value))
                        .unwrap_or(false),
                };
                if taken {
                    return render_block(section.blocks[branch.block].as_ref(), ctx, out).await;
                }
            }
            Ok(())
        })
    }

    fn param_expressions(&self) -> Vec<Expression> {
        self.branches
            .iter()
            .filter_map(|b| b.condition.clone())
            .collect()
    }
}
