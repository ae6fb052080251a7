//! Value resolvers
//!
//! A resolver answers one property/identifier lookup against a base
//! value. Resolvers are pluggable and tried in priority order; the
//! first one that does not answer [`Resolution::NotFound`] wins. This
//! indirection lets the built-in lookups compose with host-supplied
//! resolvers without either knowing about the other.

use serde_json::Value;

use crate::error::RenderError;
use crate::BoxFuture;

/// One pending lookup: a base value, the requested name and any
/// pre-evaluated call arguments. Created per evaluation and discarded
/// once the lookup completes.
pub struct ResolutionContext<'a> {
    /// The value the name is resolved against, if any
    pub base: Option<&'a Value>,
    /// The property or method name requested
    pub name: &'a str,
    /// Evaluated call arguments, empty for plain property access
    pub args: &'a [Value],
}

/// Outcome of a single resolver attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Found(Value),
    NotFound,
}

/// A pluggable lookup step. Implementations must be side-effect-free
/// with respect to shared engine state, or synchronize internally;
/// they may be invoked concurrently across independent renders.
pub trait ValueResolver: Send + Sync {
    /// Chain position; higher priorities are consulted first, with
    /// registration order breaking ties.
    fn priority(&self) -> i32 {
        10
    }

    /// Attempt the lookup. Returning [`Resolution::NotFound`] passes
    /// control to the next resolver in the chain.
    fn resolve<'a>(
        &'a self,
        ctx: &'a ResolutionContext<'a>,
    ) -> BoxFuture<'a, Result<Resolution, RenderError>>;
}

/// The ordered resolver chain, built once per engine.
pub struct ResolverChain {
    resolvers: Vec<Box<dyn ValueResolver>>,
}

impl ResolverChain {
    /// Build a chain from resolvers in registration order. A stable
    /// sort keeps registration order among equal priorities.
    pub fn new(mut resolvers: Vec<Box<dyn ValueResolver>>) -> Self {
        resolvers.sort_by_key(|r| std::cmp::Reverse(r.priority()));
        Self { resolvers }
    }

    /// Try each resolver in order, returning the first result that is
    /// not [`Resolution::NotFound`].
    pub async fn resolve(
        &self,
        ctx: &ResolutionContext<'_>,
    ) -> Result<Resolution, RenderError> {
        for resolver in &self.resolvers {
            match resolver.resolve(ctx).await? {
                Resolution::NotFound => continue,
                found => return Ok(found),
            }
        }
        Ok(Resolution::NotFound)
    }

    pub fn is_empty(&self) -> bool {
        self.resolvers.is_empty()
    }
}

/// Resolves the identity lookup `this` to the base value itself.
pub struct ThisResolver;

impl ValueResolver for ThisResolver {
    fn priority(&self) -> i32 {
        20
    }

    fn resolve<'a>(
        &'a self,
        ctx: &'a ResolutionContext<'a>,
    ) -> BoxFuture<'a, Result<Resolution, RenderError>> {
        Box::pin(async move {
            if ctx.name == "this" {
                Ok(Resolution::Found(
                    ctx.base.cloned().unwrap_or(Value::Null),
                ))
            } else {
                Ok(Resolution::NotFound)
            }
        })
    }
}

/// Resolves key lookups on JSON objects.
pub struct MapResolver;

impl ValueResolver for MapResolver {
    fn resolve<'a>(
        &'a self,
        ctx: &'a ResolutionContext<'a>,
    ) -> BoxFuture<'a, Result<Resolution, RenderError>> {
        Box::pin(async move {
            match ctx.base {
                Some(Value::Object(map)) => match map.get(ctx.name) {
                    Some(value) => Ok(Resolution::Found(value.clone())),
                    None => Ok(Resolution::NotFound),
                },
                _ => Ok(Resolution::NotFound),
            }
        })
    }
}

/// Resolves numeric indices and `size`/`length` on JSON arrays.
pub struct ListResolver;

impl ValueResolver for ListResolver {
    fn resolve<'a>(
        &'a self,
        ctx: &'a ResolutionContext<'a>,
    ) -> BoxFuture<'a, Result<Resolution, RenderError>> {
        Box::pin(async move {
            let items = match ctx.base {
                Some(Value::Array(items)) => items,
                _ => return Ok(Resolution::NotFound),
            };
            if ctx.name == "size" || ctx.name == "length" {
                return Ok(Resolution::Found(Value::from(items.len())));
            }
            match ctx.name.parse::<usize>() {
                Ok(index) => match items.get(index) {
                    Some(value) => Ok(Resolution::Found(value.clone())),
                    None => Ok(Resolution::NotFound),
                },
                Err(_) => Ok(Resolution::NotFound),
            }
        })
    }
}
