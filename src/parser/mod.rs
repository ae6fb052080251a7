//! Template parser
//!
//! Two passes: a line-tracking tokenizer splits source into text runs,
//! interpolations, comments and section tags, then a stack-based tree
//! builder nests sections into blocks, consulting the registered
//! helper factories for end-tag policy and block capture. The parser
//! itself knows no directive semantics.

use std::mem;
use std::sync::Arc;

use crate::error::{Origin, ParseError};
use crate::expression::Expression;
use crate::helpers::{EndTag, HelperRegistry, SectionHelperFactory, SectionInit};
use crate::template::{Block, Escape, ExpressionNode, Node, SectionNode, MAIN_BLOCK};

/// Parser configuration for one compilation.
pub struct Parser<'a> {
    pub registry: &'a HelperRegistry,
    pub template_name: Option<&'a str>,
    pub remove_standalone_lines: bool,
    pub escape: Escape,
}

impl Parser<'_> {
    /// Compile template source into a node tree and its expression set.
    pub fn parse(&self, source: &str) -> Result<(Vec<Node>, Vec<Expression>), ParseError> {
        let mut tokens = self.tokenize(source)?;
        if self.remove_standalone_lines {
            tokens = strip_standalone_lines(tokens);
        }
        let nodes = self.build(tokens)?;
        let mut expressions = Vec::new();
        collect_expressions(&nodes, &mut expressions);
        tracing::debug!(
            "Parsed template {} ({} root nodes, {} expressions)",
            self.template_name.unwrap_or("<anonymous>"),
            nodes.len(),
            expressions.len()
        );
        Ok((nodes, expressions))
    }

    fn origin(&self, line: usize) -> Origin {
        Origin::new(self.template_name.map(str::to_string), line)
    }

    fn tokenize(&self, source: &str) -> Result<Vec<Token>, ParseError> {
        let mut tokens = Vec::new();
        let mut text = String::new();
        let mut line = 1;
        let mut i = 0;

        let flush = |tokens: &mut Vec<Token>, text: &mut String, line: usize| {
            if !text.is_empty() {
                tokens.push(Token::Text {
                    text: mem::take(text),
                    line,
                });
            }
        };

        while i < source.len() {
            let c = match source[i..].chars().next() {
                Some(c) => c,
                None => break,
            };
            if c == '{' {
                let next = source[i + 1..].chars().next();
                match next {
                    Some('!') => {
                        // {! comment !}
                        let end = source[i + 2..].find("!}").ok_or_else(|| {
                            ParseError::UnterminatedComment {
                                origin: self.origin(line),
                            }
                        })?;
                        flush(&mut tokens, &mut text, line);
                        tokens.push(Token::Comment { line });
                        line += source[i + 2..i + 2 + end].matches('\n').count();
                        i += 2 + end + 2;
                        continue;
                    }
                    Some(n) if n == '#' || n == '/' || is_tag_start(n) => {
                        if let Some(end) = find_tag_end(&source[i + 1..]) {
                            let inner = &source[i + 1..i + 1 + end];
                            flush(&mut tokens, &mut text, line);
                            tokens.push(self.tag_token(inner, line)?);
                            line += inner.matches('\n').count();
                            i += 1 + end + 1;
                            continue;
                        }
                        // no closing brace on this tag: literal text
                    }
                    _ => {}
                }
                text.push('{');
                i += 1;
            } else if c == '\n' {
                text.push('\n');
                flush(&mut tokens, &mut text, line);
                line += 1;
                i += 1;
            } else {
                text.push(c);
                i += c.len_utf8();
            }
        }
        flush(&mut tokens, &mut text, line);
        Ok(tokens)
    }

    /// Classify the inside of a `{...}` tag.
    fn tag_token(&self, inner: &str, line: usize) -> Result<Token, ParseError> {
        if let Some(body) = inner.strip_prefix('#') {
            let mut body = body.trim();
            let self_closing = body.ends_with('/');
            if self_closing {
                body = body[..body.len() - 1].trim_end();
            }
            let mut params = split_params(body);
            if params.is_empty() {
                return Err(ParseError::MalformedExpression {
                    expression: format!("{{{}}}", inner),
                    detail: "missing section name".to_string(),
                    origin: self.origin(line),
                });
            }
            let name = params.remove(0);
            return Ok(Token::SectionStart {
                name,
                params,
                self_closing,
                line,
            });
        }
        if let Some(body) = inner.strip_prefix('/') {
            let name = body.trim();
            return Ok(Token::SectionEnd {
                name: (!name.is_empty()).then(|| name.to_string()),
                line,
            });
        }
        // keep the raw text so the Keep policy can echo it verbatim
        Ok(Token::Expression {
            source: inner.to_string(),
            line,
        })
    }

    fn build(&self, tokens: Vec<Token>) -> Result<Vec<Node>, ParseError> {
        let mut builder = TreeBuilder {
            parser: self,
            root: Vec::new(),
            stack: Vec::new(),
        };
        for token in tokens {
            match token {
                Token::Text { text, line: _ } => builder.push_node(Node::Text(text)),
                Token::Comment { .. } => {}
                Token::Expression { source, line } => {
                    let origin = self.origin(line);
                    let expression = Expression::parse(&source, &origin)?;
                    builder.push_node(Node::Expression(ExpressionNode {
                        expression,
                        source,
                        escape: self.escape,
                        origin,
                    }));
                }
                Token::SectionStart {
                    name,
                    params,
                    self_closing,
                    line,
                } => builder.start_section(name, params, self_closing, line)?,
                Token::SectionEnd { name, line } => builder.end_section(name, line)?,
            }
        }
        builder.finish()
    }
}

/// Characters that may open an interpolation tag; anything else after
/// `{` leaves the brace as literal text.
fn is_tag_start(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '\'' || c == '"'
}

/// Index of the `}` closing a tag body, skipping braces inside quoted
/// runs, e.g. `{#hello name='a}b'/}`.
fn find_tag_end(body: &str) -> Option<usize> {
    let mut quote: Option<char> = None;
    for (i, c) in body.char_indices() {
        match quote {
            Some(q) => {
                if c == q {
                    quote = None;
                }
            }
            None => match c {
                '\'' | '"' => quote = Some(c),
                '}' => return Some(i),
                _ => {}
            },
        }
    }
    None
}

/// Split section parameters on whitespace, keeping quoted runs intact.
pub(crate) fn split_params(input: &str) -> Vec<String> {
    let mut params = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    for c in input.chars() {
        match quote {
            Some(q) => {
                current.push(c);
                if c == q {
                    quote = None;
                }
            }
            None if c == '\'' || c == '"' => {
                current.push(c);
                quote = Some(c);
            }
            None if c.is_whitespace() => {
                if !current.is_empty() {
                    params.push(mem::take(&mut current));
                }
            }
            None => current.push(c),
        }
    }
    if !current.is_empty() {
        params.push(current);
    }
    params
}

#[derive(Debug)]
enum Token {
    Text {
        text: String,
        line: usize,
    },
    Expression {
        source: String,
        line: usize,
    },
    Comment {
        line: usize,
    },
    SectionStart {
        name: String,
        params: Vec<String>,
        self_closing: bool,
        line: usize,
    },
    SectionEnd {
        name: Option<String>,
        line: usize,
    },
}

impl Token {
    fn line(&self) -> usize {
        match self {
            Token::Text { line, .. }
            | Token::Expression { line, .. }
            | Token::Comment { line }
            | Token::SectionStart { line, .. }
            | Token::SectionEnd { line, .. } => *line,
        }
    }
}

/// Drop whitespace and line terminators from lines that contain only
/// section tags and/or comments.
fn strip_standalone_lines(tokens: Vec<Token>) -> Vec<Token> {
    let mut out = Vec::new();
    let mut buf: Vec<Token> = Vec::new();
    for token in tokens {
        if let Some(first) = buf.first() {
            if token.line() != first.line() {
                flush_line(&mut out, mem::take(&mut buf));
            }
        }
        buf.push(token);
    }
    flush_line(&mut out, buf);
    out
}

fn flush_line(out: &mut Vec<Token>, line_tokens: Vec<Token>) {
    let has_directive = line_tokens.iter().any(|t| {
        matches!(
            t,
            Token::Comment { .. } | Token::SectionStart { .. } | Token::SectionEnd { .. }
        )
    });
    let standalone = has_directive
        && line_tokens.iter().all(|t| match t {
            Token::Text { text, .. } => text.trim().is_empty(),
            Token::Expression { .. } => false,
            _ => true,
        });
    for token in line_tokens {
        if standalone && matches!(token, Token::Text { .. }) {
            continue;
        }
        out.push(token);
    }
}

struct BlockBuilder {
    label: String,
    params: Vec<String>,
    nodes: Vec<Node>,
    origin: Origin,
}

impl BlockBuilder {
    fn new(label: impl Into<String>, params: Vec<String>, origin: Origin) -> Self {
        Self {
            label: label.into(),
            params,
            nodes: Vec::new(),
            origin,
        }
    }

    fn build(self) -> Arc<Block> {
        Arc::new(Block {
            label: self.label,
            params: self.params,
            nodes: self.nodes,
            origin: self.origin,
        })
    }
}

/// One open section under construction.
struct Frame {
    name: String,
    params: Vec<String>,
    factory: Arc<dyn SectionHelperFactory>,
    origin: Origin,
    main: BlockBuilder,
    labeled: Vec<Arc<Block>>,
    open_label: Option<BlockBuilder>,
}

impl Frame {
    /// Close the currently open labeled block, if any; subsequent
    /// content goes back to the main block.
    fn close_label(&mut self) {
        if let Some(open) = self.open_label.take() {
            self.labeled.push(open.build());
        }
    }
}

struct TreeBuilder<'a, 'p> {
    parser: &'a Parser<'p>,
    root: Vec<Node>,
    stack: Vec<Frame>,
}

impl TreeBuilder<'_, '_> {
    fn push_node(&mut self, node: Node) {
        let nodes = match self.stack.last_mut() {
            Some(frame) => match &mut frame.open_label {
                Some(open) => &mut open.nodes,
                None => &mut frame.main.nodes,
            },
            None => &mut self.root,
        };
        nodes.push(node);
    }

    fn start_section(
        &mut self,
        name: String,
        params: Vec<String>,
        self_closing: bool,
        line: usize,
    ) -> Result<(), ParseError> {
        let origin = self.parser.origin(line);

        if let Some(factory) = self.parser.registry.get(&name).cloned() {
            let frame = Frame {
                main: BlockBuilder::new(MAIN_BLOCK, Vec::new(), origin.clone()),
                name,
                params,
                factory,
                origin,
                labeled: Vec::new(),
                open_label: None,
            };
            if self_closing {
                return self.finish_frame(frame);
            }
            self.stack.push(frame);
            return Ok(());
        }

        // not a registered helper: maybe a block of the enclosing section
        match self.stack.last_mut() {
            Some(frame) if frame.factory.block_capture().accepts(&name) => {
                frame.close_label();
                let builder = BlockBuilder::new(name, params, origin);
                if self_closing {
                    frame.labeled.push(builder.build());
                } else {
                    frame.open_label = Some(builder);
                }
                Ok(())
            }
            _ => Err(ParseError::UnknownSectionHelper { name, origin }),
        }
    }

    fn end_section(&mut self, name: Option<String>, line: usize) -> Result<(), ParseError> {
        let origin = self.parser.origin(line);
        let frame = match self.stack.last_mut() {
            Some(frame) => frame,
            None => {
                return Err(ParseError::UnexpectedEndTag {
                    name: name.unwrap_or_default(),
                    origin,
                })
            }
        };

        if let Some(open) = &frame.open_label {
            match name.as_deref() {
                // {/} or {/label} closes the open block
                None => {
                    frame.close_label();
                    return Ok(());
                }
                Some(n) if n == open.label => {
                    frame.close_label();
                    return Ok(());
                }
                // the section's own end tag also closes the open block
                Some(n) if n == frame.name => {
                    frame.close_label();
                }
                Some(n) => {
                    return Err(ParseError::UnexpectedEndTag {
                        name: n.to_string(),
                        origin,
                    })
                }
            }
        } else if let Some(n) = name.as_deref() {
            if n != frame.name {
                return Err(ParseError::UnexpectedEndTag {
                    name: n.to_string(),
                    origin,
                });
            }
        }

        let frame = match self.stack.pop() {
            Some(frame) => frame,
            None => {
                return Err(ParseError::UnexpectedEndTag {
                    name: name.unwrap_or_default(),
                    origin,
                })
            }
        };
        self.finish_frame(frame)
    }

    /// Initialize the section's helper and attach the node to its parent.
    fn finish_frame(&mut self, frame: Frame) -> Result<(), ParseError> {
        let Frame {
            name,
            params,
            factory,
            origin,
            main,
            mut labeled,
            open_label,
        } = frame;
        if let Some(open) = open_label {
            labeled.push(open.build());
        }
        let mut blocks = Vec::with_capacity(1 + labeled.len());
        blocks.push(main.build());
        blocks.extend(labeled);

        let init = SectionInit {
            name: &name,
            params: &params,
            blocks: &blocks,
            origin: &origin,
            registry: self.parser.registry,
        };
        let helper = factory.initialize(&init)?;

        self.push_node(Node::Section(SectionNode {
            name,
            params,
            blocks,
            helper,
            origin,
        }));
        Ok(())
    }

    fn finish(mut self) -> Result<Vec<Node>, ParseError> {
        while let Some(frame) = self.stack.pop() {
            if frame.factory.end_tag() == EndTag::Mandatory {
                return Err(ParseError::UnterminatedSection {
                    name: frame.name,
                    origin: frame.origin,
                });
            }
            self.finish_frame(frame)?;
        }
        Ok(self.root)
    }
}

fn collect_expressions(nodes: &[Node], out: &mut Vec<Expression>) {
    for node in nodes {
        match node {
            Node::Text(_) => {}
            Node::Expression(e) => out.push(e.expression.clone()),
            Node::Section(section) => {
                out.extend(section.helper.param_expressions());
                for block in &section.blocks {
                    collect_expressions(&block.nodes, out);
                }
            }
        }
    }
}
