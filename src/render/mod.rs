//! Rendering engine
//!
//! Walks the parsed node tree, evaluates expressions through the
//! resolver chain and invokes section helpers. The walk is fully
//! asynchronous; sequential depth-first awaiting makes output order
//! structural, so fragments always appear in document order no matter
//! which sub-evaluations complete first.

use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::Value;

use crate::engine::{Engine, UnresolvedPolicy};
use crate::error::RenderError;
use crate::expression::{Expression, PathPart};
use crate::resolver::{Resolution, ResolutionContext};
use crate::template::{Block, Escape, Node, Template};
use crate::BoxFuture;

/// One include invocation's insert-point overrides: label to the
/// caller-supplied block replacing it.
pub type OverrideMap = IndexMap<String, Arc<Block>>;

/// Per-render mutable state: the scope-frame stack and the
/// block-override stack. Exclusively owned by one in-flight render.
pub struct RenderContext {
    engine: Engine,
    root: Value,
    scopes: Vec<IndexMap<String, Value>>,
    overrides: Vec<OverrideMap>,
}

impl RenderContext {
    pub(crate) fn new(engine: Engine, root: Value) -> Self {
        Self {
            engine,
            root,
            scopes: Vec::new(),
            overrides: Vec::new(),
        }
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// The data context the render was started with.
    pub fn root(&self) -> &Value {
        &self.root
    }

    /// Enter a scope: loop locals, user-tag or include parameters.
    pub fn push_scope(&mut self, frame: IndexMap<String, Value>) {
        self.scopes.push(frame);
    }

    pub fn pop_scope(&mut self) {
        self.scopes.pop();
    }

    /// Look up a name in the scope stack, innermost frame first.
    pub fn lookup_local(&self, name: &str) -> Option<&Value> {
        self.scopes.iter().rev().find_map(|frame| frame.get(name))
    }

    /// Enter an include invocation's overrides.
    pub fn push_overrides(&mut self, map: OverrideMap) {
        self.overrides.push(map);
    }

    pub fn pop_overrides(&mut self) {
        self.overrides.pop();
    }

    /// Find the override for an insert point, searching from the most
    /// recently entered include outward. The innermost map that
    /// defines the label wins.
    pub fn find_override(&self, label: &str) -> Option<Arc<Block>> {
        self.overrides
            .iter()
            .rev()
            .find_map(|map| map.get(label).cloned())
    }
}

/// Render a template against a data context.
pub(crate) async fn render_template(
    template: &Template,
    data: Value,
) -> Result<String, RenderError> {
    tracing::debug!(
        "Rendering template {}",
        template.name().unwrap_or("<anonymous>")
    );
    let engine = template.engine().ok_or(RenderError::EngineDropped)?;
    let mut ctx = RenderContext::new(engine, data);
    let mut out = String::new();
    render_nodes(template.nodes(), &mut ctx, &mut out).await?;
    Ok(out)
}

/// Render a node sequence in document order, appending to `out`.
/// Section helpers call back into this for their child blocks, which
/// is where asynchronous suspension composes across nesting levels.
pub fn render_nodes<'a>(
    nodes: &'a [Node],
    ctx: &'a mut RenderContext,
    out: &'a mut String,
) -> BoxFuture<'a, Result<(), RenderError>> {
    Box::pin(async move {
        for node in nodes {
            match node {
                Node::Text(text) => out.push_str(text),
                Node::Expression(node) => {
                    match evaluate(&node.expression, ctx).await? {
                        Some(value) => {
                            let text = stringify(&value);
                            match node.escape {
                                Escape::Html => out.push_str(&escape_html(&text)),
                                Escape::None => out.push_str(&text),
                            }
                        }
                        None => match ctx.engine().unresolved_policy() {
                            UnresolvedPolicy::Empty => {}
                            UnresolvedPolicy::Keep => {
                                out.push('{');
                                out.push_str(&node.source);
                                out.push('}');
                            }
                            UnresolvedPolicy::Fail => {
                                return Err(RenderError::UnresolvedExpression {
                                    expression: node.expression.to_string(),
                                });
                            }
                        },
                    }
                }
                Node::Section(section) => {
                    section.helper.resolve(section, ctx, out).await?;
                }
            }
        }
        Ok(())
    })
}

/// Render a single block's nodes.
pub fn render_block<'a>(
    block: &'a Block,
    ctx: &'a mut RenderContext,
    out: &'a mut String,
) -> BoxFuture<'a, Result<(), RenderError>> {
    render_nodes(&block.nodes, ctx, out)
}

/// Evaluate an expression against the render context. `Ok(None)`
/// means the resolver chain answered NotFound for some segment; the
/// caller applies the unresolved policy.
pub fn evaluate<'a>(
    expression: &'a Expression,
    ctx: &'a RenderContext,
) -> BoxFuture<'a, Result<Option<Value>, RenderError>> {
    Box::pin(async move {
        let parts = match expression {
            Expression::Literal(value) => return Ok(Some(value.clone())),
            Expression::Path(parts) => parts,
        };
        let (head, rest) = match parts.split_first() {
            Some(split) => split,
            None => return Ok(None),
        };

        // Loop locals and injected parameters shadow the data context
        // for the head segment only.
        let local = if head.args.is_none() {
            ctx.lookup_local(&head.name).cloned()
        } else {
            None
        };
        let mut current = match local {
            Some(value) => value,
            None => match resolve_part(head, Some(ctx.root()), ctx).await? {
                Resolution::Found(value) => value,
                Resolution::NotFound => return Ok(None),
            },
        };
        for part in rest {
            match resolve_part(part, Some(&current), ctx).await? {
                Resolution::Found(value) => current = value,
                Resolution::NotFound => return Ok(None),
            }
        }
        Ok(Some(current))
    })
}

async fn resolve_part(
    part: &PathPart,
    base: Option<&Value>,
    ctx: &RenderContext,
) -> Result<Resolution, RenderError> {
    let mut args = Vec::new();
    if let Some(arg_exprs) = &part.args {
        for expr in arg_exprs {
            args.push(evaluate(expr, ctx).await?.unwrap_or(Value::Null));
        }
    }
    let resolution = ResolutionContext {
        base,
        name: &part.name,
        args: &args,
    };
    ctx.engine().chain().resolve(&resolution).await
}

/// Convert a resolved value to output text. `null` renders empty;
/// compound values render as compact JSON.
pub fn stringify(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

/// Truthiness used by conditional sections: `null`, `false`, zero,
/// empty strings and empty collections are false.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

/// Escape `& < > " '` as HTML entities.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
