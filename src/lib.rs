//! qute-rs is an asynchronous text templating engine written in Rust.
//!
//! Templates interpolate `{expressions}` against serializable data and
//! compose through section tags such as `{#if}`, `{#for}` and
//! `{#include}`. Included templates expose named `{#insert}` slots
//! that callers override with labeled blocks, and value lookup runs
//! through a pluggable chain of async resolvers.
//!
//! ```no_run
//! use qute_rs::Engine;
//! use serde_json::json;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = Engine::builder().add_defaults().build();
//! engine.put_template("base", engine.parse("<h1>{#insert title}Home{/}</h1>")?);
//!
//! let page = engine.parse("{#include base}{#title}{name}{/title}{/include}")?;
//! let html = page.render(json!({ "name": "Qute" })).await?;
//! assert_eq!(html, "<h1>Qute</h1>");
//! # Ok(())
//! # }
//! ```

use std::future::Future;
use std::pin::Pin;

pub mod engine;
pub mod error;
pub mod expression;
pub mod helpers;
pub mod parser;
pub mod render;
pub mod resolver;
pub mod template;

pub use engine::{Engine, EngineBuilder, UnresolvedPolicy};
pub use error::{Origin, ParseError, RenderError};
pub use expression::{Expression, PathPart};
pub use helpers::{SectionHelper, SectionHelperFactory, UserTagSectionHelperFactory};
pub use render::RenderContext;
pub use resolver::{Resolution, ResolutionContext, ValueResolver};
pub use template::{Block, Escape, Node, Template};

/// The boxed future type returned by async trait methods. Keeps the
/// crate runtime-agnostic; any executor that can drive a `Send` future
/// works.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
