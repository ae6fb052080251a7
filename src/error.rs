//! Error types for parsing and rendering

use std::fmt;

use thiserror::Error;

/// Source location attached to parse errors for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Origin {
    /// Name of the template, if it was parsed under one
    pub template: Option<String>,
    /// 1-based line number in the template source
    pub line: usize,
}

impl Origin {
    pub fn new(template: Option<String>, line: usize) -> Self {
        Self { template, line }
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.template {
            Some(name) => write!(f, "template [{}] line {}", name, self.line),
            None => write!(f, "line {}", self.line),
        }
    }
}

/// All errors that can arise while compiling template source into a
/// [`Template`](crate::Template). Parsing fails fast: the first error
/// encountered is returned and no template is produced.
#[derive(Debug, Error)]
pub enum ParseError {
    /// A section with a mandatory end tag reached end of input unclosed.
    #[error("unterminated section {{#{name}}} started on {origin}")]
    UnterminatedSection { name: String, origin: Origin },

    /// An end tag that matches no open section or block.
    #[error("unexpected end tag {{/{name}}} on {origin}")]
    UnexpectedEndTag { name: String, origin: Origin },

    /// A section tag whose name is not a registered helper and that is
    /// not capturable as a block of the enclosing section.
    #[error("no section helper registered for {{#{name}}} on {origin}")]
    UnknownSectionHelper { name: String, origin: Origin },

    /// Two sibling blocks inside one section declared the same label.
    #[error("Multiple blocks define the content for the {{#insert}} section of name [{label}] on line {}", origin.line)]
    AmbiguousBlock { label: String, origin: Origin },

    /// An insert name collides with a registered section helper or tag.
    #[error("An {{#insert}} section defined in the {{#include}} section on line {} conflicts with an existing section/tag: {name}", origin.line)]
    InsertConflict { name: String, origin: Origin },

    /// An expression that could not be parsed.
    #[error("malformed expression [{expression}] on {origin}: {detail}")]
    MalformedExpression {
        expression: String,
        detail: String,
        origin: Origin,
    },

    /// A section is missing a parameter its helper requires.
    #[error("section {{#{name}}} on {origin} is missing parameter: {parameter}")]
    MissingParameter {
        name: String,
        parameter: String,
        origin: Origin,
    },

    /// A comment opened with `{!` and never closed with `!}`.
    #[error("unterminated comment started on {origin}")]
    UnterminatedComment { origin: Origin },
}

impl ParseError {
    /// The source location the error was raised at.
    pub fn origin(&self) -> &Origin {
        match self {
            ParseError::UnterminatedSection { origin, .. }
            | ParseError::UnexpectedEndTag { origin, .. }
            | ParseError::UnknownSectionHelper { origin, .. }
            | ParseError::AmbiguousBlock { origin, .. }
            | ParseError::InsertConflict { origin, .. }
            | ParseError::MalformedExpression { origin, .. }
            | ParseError::MissingParameter { origin, .. }
            | ParseError::UnterminatedComment { origin } => origin,
        }
    }
}

/// All errors that can arise from one render call. A failed render
/// never affects the template or other in-flight renders.
#[derive(Debug, Error)]
pub enum RenderError {
    /// An include or user tag referenced a template name that the
    /// registry does not know.
    #[error("template not found: {name}")]
    TemplateNotFound { name: String },

    /// A value resolver failed while evaluating an expression.
    #[error("resolver error while evaluating [{expression}]: {detail}")]
    Resolver { expression: String, detail: String },

    /// An expression resolved to nothing under the `Fail` policy.
    #[error("unresolved expression: [{expression}]")]
    UnresolvedExpression { expression: String },

    /// A `{#for}` iterable parameter evaluated to a non-iterable value.
    #[error("value of [{expression}] is not iterable")]
    NotIterable { expression: String },

    /// The render data context could not be serialized.
    #[error("data serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The engine that compiled the template was dropped; the template
    /// handle can no longer resolve values, includes or user tags.
    #[error("engine dropped before render")]
    EngineDropped,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_origin_display() {
        let anon = Origin::new(None, 3);
        assert_eq!(anon.to_string(), "line 3");
        let named = Origin::new(Some("base.html".to_string()), 12);
        assert_eq!(named.to_string(), "template [base.html] line 12");
    }

    #[test]
    fn test_ambiguous_block_message() {
        let err = ParseError::AmbiguousBlock {
            label: "header".to_string(),
            origin: Origin::new(None, 1),
        };
        assert_eq!(
            err.to_string(),
            "Multiple blocks define the content for the {#insert} section of name [header] on line 1"
        );
    }

    #[test]
    fn test_insert_conflict_message() {
        let err = ParseError::InsertConflict {
            name: "row".to_string(),
            origin: Origin::new(None, 2),
        };
        assert_eq!(
            err.to_string(),
            "An {#insert} section defined in the {#include} section on line 2 conflicts with an existing section/tag: row"
        );
    }
}
