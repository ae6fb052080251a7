//! Parsed template representation
//!
//! A [`Template`] is an immutable node tree plus the set of
//! expressions it references. Templates are cheap to clone and safe to
//! render concurrently; rendering never mutates them.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::engine::{Engine, WeakEngine};
use crate::error::{Origin, RenderError};
use crate::expression::Expression;
use crate::helpers::SectionHelper;

/// Label of the anonymous main block every section carries.
pub const MAIN_BLOCK: &str = "$main";

/// Escaping policy applied to one interpolated expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Escape {
    /// Emit the resolved value verbatim
    None,
    /// Escape `& < > " '` as HTML entities
    Html,
}

/// One node of the parsed tree.
pub enum Node {
    /// A literal text run
    Text(String),
    /// An `{expr}` interpolation
    Expression(ExpressionNode),
    /// A `{#name}...{/name}` section
    Section(SectionNode),
}

/// An interpolation node with its escaping policy.
pub struct ExpressionNode {
    pub expression: Expression,
    /// Raw text between the braces, echoed back under
    /// [`UnresolvedPolicy::Keep`](crate::UnresolvedPolicy::Keep)
    pub source: String,
    pub escape: Escape,
    pub origin: Origin,
}

/// A named or anonymous sub-region of a section's body.
pub struct Block {
    /// [`MAIN_BLOCK`] for the anonymous body, the written label otherwise
    pub label: String,
    /// Raw parameter tokens following the label, e.g. the condition of
    /// an `{#else if cond}` block
    pub params: Vec<String>,
    pub nodes: Vec<Node>,
    pub origin: Origin,
}

impl Block {
    /// True when the block holds no content at all.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// A section node: parameters, its blocks and the helper initialized
/// for it at parse time.
pub struct SectionNode {
    pub name: String,
    /// Raw parameter tokens from the start tag
    pub params: Vec<String>,
    /// `blocks[0]` is always the anonymous main block; labeled blocks
    /// follow in declaration order
    pub blocks: Vec<Arc<Block>>,
    pub helper: Arc<dyn SectionHelper>,
    pub origin: Origin,
}

impl SectionNode {
    /// The anonymous main body of the section.
    pub fn main_block(&self) -> &Arc<Block> {
        &self.blocks[0]
    }

    /// Look up a labeled block by name.
    pub fn block(&self, label: &str) -> Option<&Arc<Block>> {
        self.blocks.iter().find(|b| b.label == label)
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Node::Text(text) => f.debug_tuple("Text").field(text).finish(),
            Node::Expression(e) => f.debug_tuple("Expression").field(&e.expression).finish(),
            Node::Section(s) => f
                .debug_struct("Section")
                .field("name", &s.name)
                .field("params", &s.params)
                .field("blocks", &s.blocks.len())
                .finish(),
        }
    }
}

/// An immutable, renderable compiled template.
#[derive(Clone)]
pub struct Template {
    inner: Arc<TemplateInner>,
}

struct TemplateInner {
    name: Option<String>,
    nodes: Vec<Node>,
    expressions: Vec<Expression>,
    /// Weak: the engine's registry owns templates, a strong handle
    /// would cycle
    engine: WeakEngine,
}

impl Template {
    pub(crate) fn new(
        engine: WeakEngine,
        name: Option<String>,
        nodes: Vec<Node>,
        expressions: Vec<Expression>,
    ) -> Self {
        Self {
            inner: Arc::new(TemplateInner {
                name,
                nodes,
                expressions,
                engine,
            }),
        }
    }

    /// The name the template was parsed under, if any.
    pub fn name(&self) -> Option<&str> {
        self.inner.name.as_deref()
    }

    /// The root node sequence.
    pub fn nodes(&self) -> &[Node] {
        &self.inner.nodes
    }

    /// Every expression the template references, collected once at
    /// parse time for upfront validation by the host.
    pub fn expressions(&self) -> &[Expression] {
        &self.inner.expressions
    }

    /// `None` once the owning engine has been dropped.
    pub(crate) fn engine(&self) -> Option<Engine> {
        self.inner.engine.upgrade()
    }

    /// Render the template against a data context. Output fragments
    /// are assembled strictly in document order; a failed render
    /// returns the error alone, never partial output.
    pub async fn render<T: Serialize>(&self, data: T) -> Result<String, RenderError> {
        let data = serde_json::to_value(data)?;
        crate::render::render_template(self, data).await
    }
}

impl fmt::Debug for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Template")
            .field("name", &self.inner.name)
            .field("nodes", &self.inner.nodes.len())
            .field("expressions", &self.inner.expressions.len())
            .finish()
    }
}
