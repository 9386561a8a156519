// EN: src/core/pipeline.rs

//! Action and middleware types, and their onion-style composition.

use crate::core::context::Context;
use crate::core::errors::ActionResult;
use crate::core::flag_groups::FlagGroups;
use futures::FutureExt;
use futures::future::BoxFuture;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// The future returned by an [`ActionFunc`].
pub type ActionFuture = BoxFuture<'static, ActionResult>;

/// The unit of work a command performs.
pub type ActionFunc = Arc<dyn Fn(Context) -> ActionFuture + Send + Sync>;

/// A transform adding behaviour around an action.
pub type Middleware = Arc<dyn Fn(ActionFunc) -> ActionFunc + Send + Sync>;

/// Lifts an async closure into an [`ActionFunc`].
pub fn action<F, Fut>(f: F) -> ActionFunc
where
    F: Fn(Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ActionResult> + Send + 'static,
{
    Arc::new(move |ctx| f(ctx).boxed())
}

/// Lifts a closure into a [`Middleware`].
pub fn middleware<F>(f: F) -> Middleware
where
    F: Fn(ActionFunc) -> ActionFunc + Send + Sync + 'static,
{
    Arc::new(f)
}

// --- Chain ---

/// An ordered list of middleware. The first element is the outermost layer:
/// it sees the call first and the result last.
#[derive(Clone, Default)]
pub struct Chain {
    layers: Vec<Middleware>,
}

impl Chain {
    pub fn new<I>(layers: I) -> Self
    where
        I: IntoIterator<Item = Middleware>,
    {
        Self {
            layers: layers.into_iter().collect(),
        }
    }

    /// Returns a new chain with `layer` added innermost. `self` is left as is.
    pub fn append(&self, layer: Middleware) -> Self {
        let mut layers = self.layers.clone();
        layers.push(layer);
        Self { layers }
    }

    /// Returns a new chain running `self`'s layers around `other`'s.
    pub fn extend(&self, other: &Self) -> Self {
        let mut layers = self.layers.clone();
        layers.extend(other.layers.iter().cloned());
        Self { layers }
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Wraps `action` so that `Chain(m1, .., mn).apply(a) == m1(..mn(a))`.
    pub fn apply(&self, action: ActionFunc) -> ActionFunc {
        self.layers
            .iter()
            .rev()
            .fold(action, |next, layer| layer(next))
    }

    /// Collapses the chain into a single middleware.
    pub fn into_middleware(self) -> Middleware {
        Arc::new(move |next| self.apply(next))
    }
}

impl fmt::Debug for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chain").field("layers", &self.layers.len()).finish()
    }
}

// --- Pipeline ---

/// Everything that runs around one command's action: flag-group checks first,
/// then the middleware chain.
#[derive(Debug, Clone, Default)]
pub struct Pipeline {
    chain: Chain,
    groups: FlagGroups,
}

impl Pipeline {
    pub fn new(chain: Chain) -> Self {
        Self {
            chain,
            groups: FlagGroups::default(),
        }
    }

    pub fn with_groups(mut self, groups: FlagGroups) -> Self {
        self.groups = groups;
        self
    }

    pub fn chain(&self) -> &Chain {
        &self.chain
    }

    /// Validates the flag groups once, then runs `action` through the chain.
    /// No middleware and no action run when a group is violated.
    pub async fn run(&self, action: &ActionFunc, ctx: Context) -> ActionResult {
        self.groups.validate(&ctx)?;
        log::debug!(
            "Running command '{}' through {} middleware layer(s).",
            ctx.command().name,
            self.chain.len()
        );
        let wrapped = self.chain.apply(Arc::clone(action));
        wrapped(ctx).await
    }
}
