mod context;
mod pattern;
mod table;

pub use self::context::{MatchFrame, ParamValue, Params, RouteContext};
pub use self::table::PathPattern;
pub(crate) use self::table::Route;
use self::table::RouteTable;
use crate::context::RouteState;
use crate::middleware::{IntoMiddleware, Middleware, Next};
use crate::{Context, Endpoint, Mount};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Matching options of a router, fixed when the router is constructed.
/// They apply to every route the router holds; individual routes cannot
/// override them.
#[derive(Clone, Debug)]
pub struct RouterOptions {
    /// Whether paths match case-sensitively.  Defaults to `true`.
    pub case_sensitive: bool,
    /// Whether `/hello` and `/hello/` are distinct paths.  Defaults to
    /// `true`.
    pub strict_trailing_slash: bool,
    /// Whether a route must consume the full pending path (`true`, the
    /// default), or may match just a prefix of it.
    pub anchored: bool,
    /// The delimiter a repeating (`:name+`) parameter is split on.
    /// Defaults to `,`.
    pub repeat_delimiter: char,
}

impl Default for RouterOptions {
    fn default() -> Self {
        RouterOptions {
            case_sensitive: true,
            strict_trailing_slash: true,
            anchored: true,
            repeat_delimiter: ',',
        }
    }
}

/// An HTTP router.
///
/// This contains a set of paths and the handlers they point to, plus the
/// router's own middleware, which runs before route matching on every
/// request that reaches the router, matched or not.  Routes are matched
/// against the *pending* path of the request, so a router mounted at
/// `/api` sees paths relative to `/api`.
///
/// A router is built at setup time and converted into its read-only
/// middleware form with [`Router::build`]; registration surfaces that take
/// an [`IntoMiddleware`] (such as [`crate::App::mount`]) perform that
/// conversion automatically.
///
/// # Examples
/// ```rust
/// use trellis::{Context, Next, Response};
///
/// let mut router = trellis::Router::new();
/// router.at("/users/:id").get(|cx: Context, _next: Next| async move {
///     use trellis::RouteState;
///     let id = cx.param("id").unwrap_or_default();
///     cx.respond(Response::text(format!("user {}", id)));
///     Ok(())
/// });
/// let built = router.build();
/// # let _ = built;
/// ```
pub struct Router {
    name: String,
    table: RouteTable,
    middleware: Vec<Arc<dyn Middleware>>,
}

impl Default for Router {
    fn default() -> Self {
        Router::with_options(RouterOptions::default())
    }
}

macro_rules! method {
    ($($(#[$m:meta])* $v:vis fn $n:ident = $meth:expr;)+) => {
        $(
            $(#[$m])* $v fn $n<M: Middleware>(&mut self, handler: M) -> &mut Self {
                self.method($meth, handler)
            }
        )+
    };
}

impl Router {
    /// Creates a router with default matching options.
    pub fn new() -> Self {
        Router::default()
    }

    /// Creates a router with the given matching options.
    pub fn with_options(options: RouterOptions) -> Self {
        Router {
            name: "router".to_string(),
            table: RouteTable::new(options),
            middleware: vec![],
        }
    }

    /// Names the router.  The name only shows up in trace logging, where
    /// it distinguishes nested routers from one another.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Creates a [`RoutePath`] at the provided path pattern.  See
    /// [`RoutePath`] for the per-method registration calls.
    pub fn at(&mut self, path: impl Into<PathPattern>) -> RoutePath<'_> {
        RoutePath {
            pattern: path.into(),
            table: &mut self.table,
        }
    }

    /// Creates a [`RoutePath`] for a raw regular-expression pattern, used
    /// exactly as supplied.
    pub fn at_regex(&mut self, raw: impl Into<String>) -> RoutePath<'_> {
        RoutePath {
            pattern: PathPattern::regex(raw),
            table: &mut self.table,
        }
    }

    /// Appends middleware to the router.  Each middleware is executed in
    /// the order that it is appended, before any route matching happens.
    pub fn with<M: Middleware>(&mut self, middleware: M) -> &mut Self {
        self.middleware.push(Arc::new(middleware));
        self
    }

    /// Mounts a handler, typically another router, under a path prefix.
    /// See [`Mount`] for the path rewrite semantics.
    pub fn mount(&mut self, prefix: impl Into<String>, target: impl IntoMiddleware) -> &mut Self {
        self.middleware.push(Arc::new(Mount::new(prefix, target)));
        self
    }

    /// Finishes the router, producing its read-only middleware form.
    pub fn build(self) -> BuiltRouter {
        if log::log_enabled!(log::Level::Trace) {
            for route in self.table.routes() {
                log::trace!(
                    "route[{}]: {} {}",
                    self.name,
                    route.method().map_or("(all)", http::Method::as_str),
                    route.path(),
                );
            }
        }
        BuiltRouter {
            shared: Arc::new(RouterShared {
                name: self.name,
                table: self.table,
                middleware: self.middleware.into(),
            }),
        }
    }
}

impl IntoMiddleware for Router {
    fn into_middleware(self) -> Arc<dyn Middleware> {
        Arc::new(self.build())
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("name", &self.name)
            .field("table", &self.table)
            .field("middleware", &self.middleware.len())
            .finish()
    }
}

/// A description of a path in the router.
///
/// This is generated when you call [`Router::at`], and it carries the
/// pattern passed to that call.  Here, you specify the handler to run for
/// each method at that pattern.  Handlers are middlewares: one that
/// declines to fully handle a request may call its `next` to fall through
/// to whatever is after the router.
///
/// Patterns use `:name` for a single-segment parameter, `:name+` for a
/// repeating parameter, and a trailing `*` for an unextracted rest-of-path
/// match.
#[derive(Debug)]
pub struct RoutePath<'a> {
    pattern: PathPattern,
    table: &'a mut RouteTable,
}

impl RoutePath<'_> {
    /// Registers a handler responding to any method at this pattern.
    pub fn all<M: Middleware>(&mut self, handler: M) -> &mut Self {
        self.table
            .define(self.pattern.clone(), None, Arc::new(handler));
        self
    }

    /// Registers a handler for the specified method at this pattern.
    /// Registering a second handler for the same pattern and method
    /// replaces the first.
    pub fn method<M: Middleware>(&mut self, method: http::Method, handler: M) -> &mut Self {
        self.table
            .define(self.pattern.clone(), Some(method), Arc::new(handler));
        self
    }

    method![
        /// Registers a GET handler at this pattern.  A HEAD request with no
        /// HEAD handler of its own resolves to this handler as well.
        pub fn get = http::Method::GET;
        /// Registers a POST handler at this pattern.
        pub fn post = http::Method::POST;
        /// Registers a PUT handler at this pattern.
        pub fn put = http::Method::PUT;
        /// Registers a DELETE handler at this pattern.
        pub fn delete = http::Method::DELETE;
        /// Registers a HEAD handler at this pattern.
        pub fn head = http::Method::HEAD;
        /// Registers a PATCH handler at this pattern.
        pub fn patch = http::Method::PATCH;
    ];
}

struct RouterShared {
    name: String,
    table: RouteTable,
    middleware: Arc<[Arc<dyn Middleware>]>,
}

/// The read-only middleware form of a [`Router`].
///
/// Cloning is cheap; every clone shares the same route table.  As a
/// middleware, the router follows a fixed sequence: if another router has
/// already claimed the request, resolve immediately without invoking
/// anything downstream; otherwise run its own middleware, attempt a match
/// on the pending path, and either run the matched handler (pushing its
/// match for the duration) or delegate onward.
#[derive(Clone)]
pub struct BuiltRouter {
    shared: Arc<RouterShared>,
}

#[async_trait]
impl Middleware for BuiltRouter {
    async fn apply(&self, cx: Context, next: Next) -> crate::Result<()> {
        if cx.route_handled() {
            return Ok(());
        }
        let dispatch = Arc::new(Dispatch {
            shared: self.shared.clone(),
            next,
        });
        Next::over(&self.shared.middleware, Next::terminal(dispatch))
            .apply(cx)
            .await
    }
}

impl std::fmt::Debug for BuiltRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuiltRouter")
            .field("name", &self.shared.name)
            .finish_non_exhaustive()
    }
}

// The terminal of a router's own middleware chain: attempt the match and
// run or delegate.
struct Dispatch {
    shared: Arc<RouterShared>,
    next: Next,
}

#[async_trait]
impl Endpoint for Dispatch {
    async fn call(&self, cx: Context) -> crate::Result<()> {
        let pending = cx.route_path();
        let method = cx.http_method();
        let matched = match self.shared.table.lookup(&pending, &method)? {
            Some(matched) => matched,
            None => return self.next.clone().apply(cx).await,
        };

        log::trace!(
            "{} {} --> {}[{}]",
            method,
            pending,
            self.shared.name,
            matched.route.path(),
        );

        let handler = matched.route.handler().clone();
        let frame = MatchFrame::new(
            pending[..matched.consumed].to_string(),
            matched.params,
            matched.route,
        );
        cx.push_match(frame);
        cx.mark_route_handled();

        // The pop must happen exactly once, before control returns to
        // anything outside this router, whichever way the handler exits.
        let popped = Arc::new(AtomicBool::new(false));
        let after = Arc::new(PopThenDelegate {
            popped: popped.clone(),
            next: self.next.clone(),
        });
        let result = handler.apply(cx.clone(), Next::terminal(after)).await;
        if !popped.swap(true, Ordering::SeqCst) {
            cx.pop_match();
        }
        result
    }
}

struct PopThenDelegate {
    popped: Arc<AtomicBool>,
    next: Next,
}

#[async_trait]
impl Endpoint for PopThenDelegate {
    async fn call(&self, cx: Context) -> crate::Result<()> {
        if !self.popped.swap(true, Ordering::SeqCst) {
            cx.pop_match();
        }
        self.next.clone().apply(cx).await
    }
}
