use crate::data::DEFAULT_BODY_LIMIT;
use crate::error::classify;
use crate::middleware::{IntoMiddleware, Middleware, Next};
use crate::shutdown::ShutdownManager;
use crate::{Context, Endpoint, Mount, Response};
use std::future::Future;
use std::sync::Arc;

type ContextHook = Arc<dyn Fn(&Context) + Send + Sync>;

/// An HTTP application.
///
/// This is the entrypoint of the crate: an ordered list of root middleware,
/// a fallback endpoint for requests nothing claims, an error handler, and
/// the listen loop.  Every inbound request takes the same trip through the
/// dispatch pipeline, and every request produces exactly one response; no
/// error escapes to the transport.
///
/// # Examples
/// ```rust,no_run
/// # #[tokio::main] async fn main() -> Result<(), anyhow::Error> {
/// use trellis::{Context, Next, Response};
///
/// let mut router = trellis::Router::new();
/// router.at("/ping").get(|cx: Context, _next: Next| async move {
///     cx.respond(Response::text("pong"));
///     Ok(())
/// });
/// let mut app = trellis::app();
/// app.mount("/", router);
/// app.listen("0.0.0.0:8080").await?;
/// # Ok(())
/// # }
/// ```
pub struct App {
    middleware: Vec<Arc<dyn Middleware>>,
    fallback: Arc<dyn Endpoint>,
    error_handler: Arc<dyn ErrorHandler>,
    context_hook: Option<ContextHook>,
    shutdown: ShutdownManager,
    body_limit: u64,
}

impl Default for App {
    fn default() -> Self {
        App {
            middleware: vec![],
            fallback: Arc::new(NotFound),
            error_handler: Arc::new(DefaultErrorHandler),
            context_hook: None,
            shutdown: ShutdownManager::new(),
            body_limit: DEFAULT_BODY_LIMIT,
        }
    }
}

impl App {
    /// Creates an application with no middleware, responding 404 to
    /// everything.
    pub fn new() -> Self {
        App::default()
    }

    /// Appends a middleware to the application's root chain.  Middleware
    /// run in the order that they are appended; a [`crate::Router`] passed
    /// here is built automatically.
    pub fn with(&mut self, middleware: impl IntoMiddleware) -> &mut Self {
        self.middleware.push(middleware.into_middleware());
        self
    }

    /// Mounts a handler under a path prefix.  See [`Mount`] for the path
    /// rewrite semantics.
    pub fn mount(&mut self, prefix: impl Into<String>, target: impl IntoMiddleware) -> &mut Self {
        self.middleware.push(Arc::new(Mount::new(prefix, target)));
        self
    }

    /// Replaces the fallback endpoint, which runs when the whole chain
    /// completes without anything installing a response.  The default
    /// responds with an empty 404.
    pub fn fallback(&mut self, endpoint: impl Endpoint) -> &mut Self {
        self.fallback = Arc::new(endpoint);
        self
    }

    /// Replaces the error handler, which turns a failed chain into a
    /// response.  See [`ErrorHandler`] for the default behavior.
    pub fn on_error(&mut self, handler: impl ErrorHandler) -> &mut Self {
        self.error_handler = Arc::new(handler);
        self
    }

    /// Installs a hook that observes every freshly-built context before the
    /// chain runs.  This is the place to seed per-request items that every
    /// middleware should be able to rely on.
    pub fn on_context(&mut self, hook: impl Fn(&Context) + Send + Sync + 'static) -> &mut Self {
        self.context_hook = Some(Arc::new(hook));
        self
    }

    /// Caps the size of request bodies read through
    /// [`Context::read_body`].  Defaults to about 3MB.
    pub fn body_limit(&mut self, limit: u64) -> &mut Self {
        self.body_limit = limit;
        self
    }

    /// The shutdown manager of this application.  Hold a clone to request
    /// a graceful stop from a signal handler; see
    /// [`ShutdownManager::shutdown`].
    pub fn shutdown_manager(&self) -> ShutdownManager {
        self.shutdown.clone()
    }

    pub(crate) fn shutdown_ref(&self) -> &ShutdownManager {
        &self.shutdown
    }

    /// Runs one request through the full dispatch pipeline and returns the
    /// response.  This is the application boundary the server calls per
    /// request; it is public so that applications can be exercised in tests
    /// without a socket.
    pub async fn handle(&self, request: http::Request<hyper::Body>) -> Response {
        let cx = Context::with_limit(request, self.body_limit);
        if let Some(hook) = &self.context_hook {
            hook(&cx);
        }
        let chain = Next::over(&self.middleware, Next::terminal(self.fallback.clone()));
        if let Err(error) = chain.apply(cx.clone()).await {
            self.error_handler.handle(cx.clone(), error).await;
        }
        cx.take_response()
    }
}

impl std::fmt::Debug for App {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("App")
            .field("middleware", &self.middleware.len())
            .field("body_limit", &self.body_limit)
            .finish_non_exhaustive()
    }
}

#[async_trait]
/// Converts a failed middleware chain into a response.
///
/// The handler receives the context exactly as the failing layer left it;
/// whatever response the context holds when the handler returns is what the
/// client sees.  The default handler maps the error to a status (see
/// [`crate::HttpError`]), logs server faults at error level and client
/// faults at debug level, and responds with an empty body.
pub trait ErrorHandler: Send + Sync + 'static {
    /// Handles the given failure, installing a response on the context.
    async fn handle(&self, cx: Context, error: anyhow::Error);
}

#[async_trait]
impl<F, Fut> ErrorHandler for F
where
    F: Fn(Context, anyhow::Error) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    async fn handle(&self, cx: Context, error: anyhow::Error) {
        self(cx, error).await
    }
}

struct DefaultErrorHandler;

#[async_trait]
impl ErrorHandler for DefaultErrorHandler {
    async fn handle(&self, cx: Context, error: anyhow::Error) {
        let status = classify(&error);
        if status.is_server_error() {
            log::error!("{} {}: {:#}", cx.method(), cx.path(), error);
        } else {
            log::debug!("{} {}: {:#}", cx.method(), cx.path(), error);
        }
        cx.respond(Response::empty_status(status));
    }
}

struct NotFound;

#[async_trait]
impl Endpoint for NotFound {
    async fn call(&self, cx: Context) -> crate::Result<()> {
        if !cx.responded() {
            cx.respond(Response::empty_404());
        }
        Ok(())
    }
}
