//! Section helpers
//!
//! Every block-level directive is backed by a section helper. A
//! factory supplies the parse-time capabilities (end-tag policy, which
//! sub-block labels the body recognizes, parameter validation) and
//! produces the render-time helper; the core parser knows nothing
//! about any particular directive.

mod conditional;
mod include;
mod loops;
mod user_tag;

use std::sync::Arc;

use indexmap::IndexMap;

pub use conditional::IfSectionHelperFactory;
pub use include::{IncludeSectionHelperFactory, InsertSectionHelperFactory};
pub use loops::ForSectionHelperFactory;
pub use user_tag::UserTagSectionHelperFactory;

use crate::error::{Origin, ParseError, RenderError};
use crate::expression::Expression;
use crate::render::RenderContext;
use crate::template::{Block, SectionNode};
use crate::BoxFuture;

/// End-tag policy a helper declares for its sections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndTag {
    /// The section must be closed explicitly before end of input
    Mandatory,
    /// The section is closed implicitly at end of input
    Optional,
}

/// Which sub-block labels a helper recognizes inside its body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockCapture {
    /// The body holds only the anonymous main block
    None,
    /// Only the listed labels start blocks; anything else is an error
    Labels(Vec<String>),
    /// Any tag that is not a registered helper starts a block
    Any,
}

impl BlockCapture {
    pub fn labels<I: IntoIterator<Item = &'static str>>(labels: I) -> Self {
        BlockCapture::Labels(labels.into_iter().map(str::to_string).collect())
    }

    /// Whether a tag of the given name may start a block.
    pub fn accepts(&self, label: &str) -> bool {
        match self {
            BlockCapture::None => false,
            BlockCapture::Labels(labels) => labels.iter().any(|l| l == label),
            BlockCapture::Any => true,
        }
    }
}

/// Parse-time view of a fully assembled section, handed to the factory
/// to validate and build the render-time helper.
pub struct SectionInit<'a> {
    pub name: &'a str,
    /// Raw parameter tokens from the start tag
    pub params: &'a [String],
    /// Main block first, labeled blocks in declaration order
    pub blocks: &'a [Arc<Block>],
    pub origin: &'a Origin,
    /// Registered helper factories, for name-conflict checks
    pub registry: &'a HelperRegistry,
}

impl SectionInit<'_> {
    /// Parameter tokens written as `key=value`.
    pub fn key_params(&self) -> impl Iterator<Item = (&str, &str)> {
        self.params.iter().filter_map(|p| split_key_value(p))
    }

    /// Parameter tokens that are not `key=value` pairs.
    pub fn positional_params(&self) -> impl Iterator<Item = &str> {
        self.params
            .iter()
            .filter(|p| split_key_value(p).is_none())
            .map(String::as_str)
    }

    /// Parse a raw parameter token into an expression.
    pub fn parse_expression(&self, token: &str) -> Result<Expression, ParseError> {
        Expression::parse(token, self.origin)
    }

    pub fn missing_parameter(&self, parameter: &str) -> ParseError {
        ParseError::MissingParameter {
            name: self.name.to_string(),
            parameter: parameter.to_string(),
            origin: self.origin.clone(),
        }
    }
}

/// Split a `key=value` token at the first `=` outside quotes.
pub(crate) fn split_key_value(token: &str) -> Option<(&str, &str)> {
    let mut quote: Option<char> = None;
    for (i, c) in token.char_indices() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None => match c {
                '\'' | '"' => quote = Some(c),
                '=' => {
                    if i == 0 || i + 1 == token.len() {
                        return None;
                    }
                    return Some((&token[..i], &token[i + 1..]));
                }
                _ => {}
            },
        }
    }
    None
}

/// Strip one level of matching quotes from a token, if present.
pub(crate) fn unquote(token: &str) -> &str {
    let bytes = token.as_bytes();
    if bytes.len() >= 2 {
        let quote = bytes[0];
        if (quote == b'\'' || quote == b'"') && bytes[bytes.len() - 1] == quote {
            return &token[1..token.len() - 1];
        }
    }
    token
}

/// Parse-time half of a section directive.
pub trait SectionHelperFactory: Send + Sync {
    /// Whether sections of this helper must be closed explicitly.
    fn end_tag(&self) -> EndTag {
        EndTag::Mandatory
    }

    /// Which sub-block labels the section body recognizes.
    fn block_capture(&self) -> BlockCapture {
        BlockCapture::None
    }

    /// Validate the assembled section and build its render-time
    /// helper. Runs once per section node, at parse time.
    fn initialize(&self, init: &SectionInit<'_>) -> Result<Arc<dyn SectionHelper>, ParseError>;
}

/// Render-time half of a section directive.
pub trait SectionHelper: Send + Sync {
    /// Evaluate the section, appending output in document order. The
    /// helper may recursively render child blocks; suspension composes
    /// across nesting levels.
    fn resolve<'a>(
        &'a self,
        section: &'a SectionNode,
        ctx: &'a mut RenderContext,
        out: &'a mut String,
    ) -> BoxFuture<'a, Result<(), RenderError>>;

    /// Expressions hidden in the section's parameters, so the template
    /// can report its full expression set at parse time.
    fn param_expressions(&self) -> Vec<Expression> {
        Vec::new()
    }
}

/// Registration-ordered table of helper factories, keyed by tag name.
#[derive(Default)]
pub struct HelperRegistry {
    factories: IndexMap<String, Arc<dyn SectionHelperFactory>>,
}

impl HelperRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory; a later registration under the same name
    /// replaces the earlier one.
    pub fn insert(&mut self, name: impl Into<String>, factory: Arc<dyn SectionHelperFactory>) {
        self.factories.insert(name.into(), factory);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn SectionHelperFactory>> {
        self.factories.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }
}
