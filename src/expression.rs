//! Expression model
//!
//! Parsed form of everything that appears between `{` and `}` outside
//! of section tags, and of section parameter values. Expressions are
//! immutable and shared read-only by nodes and templates.

use std::fmt;

use serde_json::Value;

use crate::error::{Origin, ParseError};

/// A parsed template expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    /// A constant value: `'foo'`, `"foo"`, `42`, `true`, `false`, `null`
    Literal(Value),
    /// A dot/bracket-navigable identifier path, e.g. `item.name` or
    /// `items[0].format('short')`
    Path(Vec<PathPart>),
}

/// One segment of a path expression, optionally a method call.
#[derive(Debug, Clone, PartialEq)]
pub struct PathPart {
    pub name: String,
    /// `Some` iff the segment was written with a call argument list
    pub args: Option<Vec<Expression>>,
}

impl PathPart {
    fn property(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: None,
        }
    }
}

impl Expression {
    /// Parse a single expression from source text.
    pub fn parse(source: &str, origin: &Origin) -> Result<Self, ParseError> {
        let trimmed = source.trim();
        if trimmed.is_empty() {
            return Err(malformed(source, "empty expression", origin));
        }
        if let Some(value) = parse_literal(trimmed) {
            return Ok(Expression::Literal(value));
        }
        parse_path(trimmed, origin)
    }

    /// The leading identifier of a path expression, if any.
    pub fn head(&self) -> Option<&str> {
        match self {
            Expression::Path(parts) => parts.first().map(|p| p.name.as_str()),
            Expression::Literal(_) => None,
        }
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expression::Literal(Value::String(s)) => write!(f, "'{}'", s),
            Expression::Literal(v) => write!(f, "{}", v),
            Expression::Path(parts) => {
                for (i, part) in parts.iter().enumerate() {
                    if i > 0 {
                        f.write_str(".")?;
                    }
                    f.write_str(&part.name)?;
                    if let Some(args) = &part.args {
                        f.write_str("(")?;
                        for (j, arg) in args.iter().enumerate() {
                            if j > 0 {
                                f.write_str(",")?;
                            }
                            write!(f, "{}", arg)?;
                        }
                        f.write_str(")")?;
                    }
                }
                Ok(())
            }
        }
    }
}

/// Recognize a literal token, or return `None` if the text is a path.
fn parse_literal(text: &str) -> Option<Value> {
    if text.is_empty() {
        return None;
    }
    match text {
        "true" => return Some(Value::Bool(true)),
        "false" => return Some(Value::Bool(false)),
        "null" => return Some(Value::Null),
        _ => {}
    }
    let bytes = text.as_bytes();
    if bytes.len() >= 2 {
        let quote = bytes[0];
        if (quote == b'\'' || quote == b'"') && bytes[bytes.len() - 1] == quote {
            let inner = &text[1..text.len() - 1];
            if !inner.as_bytes().contains(&quote) {
                return Some(Value::String(inner.to_string()));
            }
        }
    }
    if bytes[0].is_ascii_digit() || (bytes[0] == b'-' && bytes.len() > 1) {
        if let Ok(n) = text.parse::<i64>() {
            return Some(Value::from(n));
        }
        if let Ok(n) = text.parse::<f64>() {
            return Some(Value::from(n));
        }
    }
    None
}

fn parse_path(text: &str, origin: &Origin) -> Result<Expression, ParseError> {
    let mut parts = Vec::new();
    for segment in split_top_level(text, '.') {
        if segment.is_empty() {
            return Err(malformed(text, "empty path segment", origin));
        }
        parse_segment(&mut parts, text, segment, origin)?;
    }
    if parts.is_empty() {
        return Err(malformed(text, "empty expression", origin));
    }
    Ok(Expression::Path(parts))
}

/// Parse one dot-separated segment into path parts. A segment can be a
/// plain name, a call `name(a,b)`, or carry bracket access `name[0]`,
/// which desugars into an extra property part.
fn parse_segment(
    parts: &mut Vec<PathPart>,
    whole: &str,
    segment: &str,
    origin: &Origin,
) -> Result<(), ParseError> {
    let (base, brackets) = match segment.find('[') {
        Some(idx) => (&segment[..idx], Some(&segment[idx..])),
        None => (segment, None),
    };

    if let Some(open) = base.find('(') {
        if !base.ends_with(')') {
            return Err(malformed(whole, "unbalanced call arguments", origin));
        }
        let name = &base[..open];
        validate_name(whole, name, origin)?;
        let arg_src = &base[open + 1..base.len() - 1];
        let mut args = Vec::new();
        if !arg_src.trim().is_empty() {
            for arg in split_top_level(arg_src, ',') {
                args.push(Expression::parse(arg, origin)?);
            }
        }
        parts.push(PathPart {
            name: name.to_string(),
            args: Some(args),
        });
    } else {
        validate_name(whole, base, origin)?;
        parts.push(PathPart::property(base));
    }

    if let Some(brackets) = brackets {
        if !brackets.ends_with(']') {
            return Err(malformed(whole, "unbalanced bracket access", origin));
        }
        let inner = brackets[1..brackets.len() - 1].trim();
        let key = match parse_literal(inner) {
            Some(Value::String(s)) => s,
            Some(Value::Number(n)) => n.to_string(),
            _ => return Err(malformed(whole, "bracket access requires a literal", origin)),
        };
        parts.push(PathPart::property(key));
    }
    Ok(())
}

fn validate_name(whole: &str, name: &str, origin: &Origin) -> Result<(), ParseError> {
    if name.is_empty() {
        return Err(malformed(whole, "empty identifier", origin));
    }
    let valid = name
        .chars()
        .all(|c| c.is_alphanumeric() || c == '_' || c == '-');
    if !valid {
        return Err(malformed(whole, "invalid identifier character", origin));
    }
    Ok(())
}

/// Split on a separator, ignoring separators nested in quotes, parens
/// or brackets.
fn split_top_level(text: &str, sep: char) -> Vec<&str> {
    let mut out = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut start = 0;
    for (i, c) in text.char_indices() {
        match quote {
            Some(q) => {
                if c == q {
                    quote = None;
                }
            }
            None => match c {
                '\'' | '"' => quote = Some(c),
                '(' | '[' => depth += 1,
                ')' | ']' => depth = depth.saturating_sub(1),
                _ if c == sep && depth == 0 => {
                    out.push(text[start..i].trim());
                    start = i + c.len_utf8();
                }
                _ => {}
            },
        }
    }
    out.push(text[start..].trim());
    out
}

fn malformed(expression: &str, detail: &str, origin: &Origin) -> ParseError {
    ParseError::MalformedExpression {
        expression: expression.to_string(),
        detail: detail.to_string(),
        origin: origin.clone(),
    }
}
