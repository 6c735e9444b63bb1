//! The middleware chain.
//!
//! A middleware is an asynchronous step in the handling of a request: it
//! receives the request [`Context`] and a [`Next`] continuation, and decides
//! whether to run the rest of the chain, short-circuit it, or do work on
//! either side of it.  This module also defines a few middlewares that might
//! be useful for a given HTTP application:
//!
//! ```rust
//! # #[tokio::main] async fn main() -> Result<(), anyhow::Error> {
//! let mut app = trellis::app();
//! app.with(trellis::middleware::TraceMiddleware::new());
//! # Ok(())
//! # }
//! ```

mod state;
mod trace;

pub use self::state::{State, StateMiddleware};
pub use self::trace::TraceMiddleware;
use crate::{Context, Endpoint};
use std::future::Future;
use std::sync::Arc;

#[async_trait]
/// An HTTP request/response modifier.
///
/// This sits between the transport and the terminal endpoint, allowing
/// custom functions to act on the request context before and after the rest
/// of the chain runs.  A typical middleware will inspect or modify the
/// incoming [`Context`], call [`Next::apply`], and then inspect or modify
/// the response the downstream chain installed; it may equally decline to
/// call [`Next::apply`] at all, in which case nothing downstream of it runs.
///
/// Every layer of the chain is fallible: a returned error skips all
/// not-yet-started downstream steps and propagates to the application's
/// error handler.
pub trait Middleware: Send + Sync + 'static {
    #[must_use]
    /// Handles the given request context.  The next parameter contains the
    /// information on how to process everything after the current
    /// middleware.
    async fn apply(&self, cx: Context, next: Next) -> crate::Result<()>;
}

#[async_trait]
impl<F, Fut> Middleware for F
where
    F: Fn(Context, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = crate::Result<()>> + Send + 'static,
{
    async fn apply(&self, cx: Context, next: Next) -> crate::Result<()> {
        self(cx, next).await
    }
}

/// Conversion of a value into a boxed middleware.
///
/// This exists so that registration surfaces ([`crate::App::mount`],
/// [`crate::Router::mount`], [`crate::Mount::new`]) can accept either a
/// plain middleware or a [`crate::Router`]; a router is automatically built
/// into its middleware form on the way in.
pub trait IntoMiddleware {
    /// Performs the conversion.
    fn into_middleware(self) -> Arc<dyn Middleware>;
}

impl<M: Middleware> IntoMiddleware for M {
    fn into_middleware(self) -> Arc<dyn Middleware> {
        Arc::new(self)
    }
}

/// The remainder of the middleware chain.
///
/// Calling [`Next::apply`] runs everything after the current middleware, in
/// registration order, ending in the chain's terminal endpoint.  A `Next` is
/// an owned, cheaply cloneable value: a middleware may store it, clone it,
/// or drop it without calling it (interrupting the chain).  Completing the
/// same request twice through captured copies is not guarded against, and
/// the outcome of doing so is unspecified.
#[derive(Clone)]
pub struct Next {
    inner: Arc<Step>,
}

enum Step {
    Run {
        middleware: Arc<dyn Middleware>,
        rest: Next,
    },
    Terminal(Arc<dyn Endpoint>),
}

impl Next {
    /// Creates a continuation that runs only the given terminal endpoint.
    pub fn terminal(endpoint: Arc<dyn Endpoint>) -> Next {
        Next {
            inner: Arc::new(Step::Terminal(endpoint)),
        }
    }

    /// Folds an ordered middleware slice onto an existing continuation,
    /// producing a continuation that runs the slice in order and then the
    /// tail.  An empty slice returns the tail unchanged, so composing
    /// nothing costs nothing.
    pub fn over(stack: &[Arc<dyn Middleware>], tail: Next) -> Next {
        stack.iter().rev().fold(tail, |rest, middleware| Next {
            inner: Arc::new(Step::Run {
                middleware: middleware.clone(),
                rest,
            }),
        })
    }

    /// This causes all of the remaining middleware and the terminal endpoint
    /// to be run from this point; i.e., if there is any remaining
    /// middleware, execute that (passing in the continuation after it);
    /// otherwise, execute the endpoint.
    ///
    /// It is valid behavior to not call this function; not calling this
    /// function means interrupting the chain, and none of the remaining
    /// middleware nor the endpoint will be run.  This could be useful for
    /// e.g. requiring authentication.
    pub async fn apply(self, cx: Context) -> crate::Result<()> {
        match &*self.inner {
            Step::Run { middleware, rest } => middleware.apply(cx, rest.clone()).await,
            Step::Terminal(endpoint) => endpoint.call(cx).await,
        }
    }
}

impl std::fmt::Debug for Next {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut len = 0usize;
        let mut step = &self.inner;
        while let Step::Run { rest, .. } = &**step {
            len += 1;
            step = &rest.inner;
        }
        f.debug_struct("Next").field("remaining", &len).finish()
    }
}

/// An ordered middleware list folded into a single middleware.
///
/// This is the composed form of a chain: applying it runs its members in
/// order, with the caller-supplied `next` as the terminal continuation.
/// [`crate::Router`] and [`crate::App`] use this shape internally; it is
/// exposed for grouping middleware that should always travel together.
///
/// # Examples
/// ```rust
/// use trellis::middleware::{Chain, IntoMiddleware, TraceMiddleware};
///
/// let chain = Chain::new(vec![TraceMiddleware::new().into_middleware()]);
/// # let _ = chain;
/// ```
#[derive(Clone)]
pub struct Chain {
    stack: Arc<[Arc<dyn Middleware>]>,
}

impl Chain {
    /// Creates a chain over the given middleware, preserving order.
    pub fn new(stack: Vec<Arc<dyn Middleware>>) -> Self {
        Chain {
            stack: stack.into(),
        }
    }

    /// The number of members in the chain.
    pub fn len(&self) -> usize {
        self.stack.len()
    }

    /// Whether the chain has no members.
    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }
}

#[async_trait]
impl Middleware for Chain {
    async fn apply(&self, cx: Context, next: Next) -> crate::Result<()> {
        Next::over(&self.stack, next).apply(cx).await
    }
}

impl std::fmt::Debug for Chain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chain").field("len", &self.len()).finish()
    }
}
