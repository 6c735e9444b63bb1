use crate::data::{DataStream, DEFAULT_BODY_LIMIT};
use crate::router::{MatchFrame, RouteContext};
use crate::{Response, TrellisError};
use bytes::Bytes;
use std::sync::{Arc, Mutex, MutexGuard};

/// The per-request context.
///
/// One context exists per inbound request, owning the request head and
/// body, the in-progress [`Response`], the routing state, and a typed item
/// store whose lifetime is the request.  A `Context` is a cheap-clone
/// handle: middleware receive a clone, and every clone observes the same
/// request.  It is never shared across requests.
///
/// The interior lock is held only for individual accessor calls, never
/// across an `.await`; within one request the dispatch pipeline mutates the
/// context strictly in sequence, so contention does not arise in practice.
#[derive(Clone)]
pub struct Context {
    inner: Arc<Mutex<Inner>>,
}

struct Inner {
    method: http::Method,
    uri: http::Uri,
    version: http::Version,
    headers: http::HeaderMap<http::HeaderValue>,
    body: BodyState,
    body_limit: u64,
    response: Response,
    responded: bool,
    route: Option<RouteContext>,
    route_handled: bool,
    store: http::Extensions,
}

enum BodyState {
    Pending(hyper::Body),
    Cached(Bytes),
    Poisoned,
}

impl Context {
    /// Creates a context from an inbound request, with the default body
    /// size limit.  This is mostly useful for exercising middleware in
    /// tests; the server constructs contexts itself during dispatch.
    ///
    /// # Examples
    /// ```rust
    /// # use trellis::Context;
    /// let request = http::Request::get("/users/1").body(trellis::Body::empty()).unwrap();
    /// let cx = Context::new(request);
    /// assert_eq!(cx.path(), "/users/1");
    /// ```
    pub fn new(request: http::Request<hyper::Body>) -> Self {
        Self::with_limit(request, DEFAULT_BODY_LIMIT)
    }

    pub(crate) fn with_limit(request: http::Request<hyper::Body>, body_limit: u64) -> Self {
        let (parts, body) = request.into_parts();
        Context {
            inner: Arc::new(Mutex::new(Inner {
                method: parts.method,
                uri: parts.uri,
                version: parts.version,
                headers: parts.headers,
                body: BodyState::Pending(body),
                body_limit,
                response: Response::default(),
                responded: false,
                route: None,
                route_handled: false,
                store: parts.extensions,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// The HTTP method of the request.
    pub fn method(&self) -> http::Method {
        self.lock().method.clone()
    }

    /// The URI of the request.
    pub fn uri(&self) -> http::Uri {
        self.lock().uri.clone()
    }

    /// The path component of the request URI.  Note that this is the
    /// original path, untouched by routing; [`RouteState::route_path`] is
    /// the one mount points rewrite.
    pub fn path(&self) -> String {
        self.lock().uri.path().to_string()
    }

    /// The HTTP version of the request.
    pub fn version(&self) -> http::Version {
        self.lock().version
    }

    /// Retrieves a single header value from the request.
    pub fn header<K: http::header::AsHeaderName>(&self, key: K) -> Option<http::HeaderValue> {
        self.lock().headers.get(key).cloned()
    }

    /// A copy of the request headers.
    pub fn headers(&self) -> http::HeaderMap<http::HeaderValue> {
        self.lock().headers.clone()
    }

    /// Parses the query string of the request into the provided type.
    ///
    /// # Errors
    /// Errors if the query string does not deserialize into the type.  A
    /// missing query string yields `None`.
    ///
    /// # Examples
    /// ```rust
    /// # use trellis::Context;
    /// #[derive(serde::Deserialize)]
    /// struct Page { offset: u64 }
    ///
    /// let request = http::Request::get("/items?offset=20")
    ///     .body(trellis::Body::empty()).unwrap();
    /// let page: Option<Page> = Context::new(request).query().unwrap();
    /// assert_eq!(page.unwrap().offset, 20);
    /// ```
    pub fn query<T: serde::de::DeserializeOwned>(&self) -> Result<Option<T>, TrellisError> {
        let raw = { self.lock().uri.query().map(str::to_string) };
        match raw {
            Some(raw) => serde_qs::from_str(&raw)
                .map(Some)
                .map_err(TrellisError::QueryDeserialization),
            None => Ok(None),
        }
    }

    /// Reads the body of the request, buffering it up to the configured
    /// size limit.  The transport body is drained at most once per request:
    /// the first call caches the bytes on the context, and every later call
    /// (from any middleware) returns the cache.
    ///
    /// # Errors
    /// Errors if the body cannot be read, or exceeds the size limit.  After
    /// a read failure the body is gone; later calls report it unreadable.
    pub async fn read_body(&self) -> Result<Bytes, TrellisError> {
        let (body, limit) = {
            let mut inner = self.lock();
            let limit = inner.body_limit;
            match &mut inner.body {
                BodyState::Cached(bytes) => return Ok(bytes.clone()),
                state => match std::mem::replace(state, BodyState::Poisoned) {
                    BodyState::Pending(body) => (body, limit),
                    _ => {
                        return Err(TrellisError::ReadBody(std::io::Error::new(
                            std::io::ErrorKind::UnexpectedEof,
                            "request body is no longer readable",
                        )))
                    }
                },
            }
        };
        let bytes = Bytes::from(DataStream::new(body, limit).into_bytes().await?);
        self.lock().body = BodyState::Cached(bytes.clone());
        Ok(bytes)
    }

    /// Reads the body of the request as a UTF-8 string.  Shares the cache
    /// of [`Context::read_body`].
    pub async fn body_text(&self) -> Result<String, TrellisError> {
        let bytes = self.read_body().await?;
        String::from_utf8(bytes.to_vec()).map_err(TrellisError::TextDeserialization)
    }

    /// Reads the body of the request as JSON, deserializing it into the
    /// given value.  Shares the cache of [`Context::read_body`].
    ///
    /// # Errors
    /// Errors if the request announces a non-JSON content type, if the body
    /// cannot be read, or if it does not deserialize.
    pub async fn body_json<T: serde::de::DeserializeOwned>(&self) -> Result<T, TrellisError> {
        if let Some(content_type) = self.content_type() {
            if content_type.essence_str() != mime::APPLICATION_JSON.essence_str() {
                return Err(TrellisError::UnsupportedMediaType(Some(content_type)));
            }
        }
        let bytes = self.read_body().await?;
        serde_json::from_slice(&bytes[..]).map_err(TrellisError::JsonDeserialization)
    }

    fn content_type(&self) -> Option<mime::Mime> {
        let value = self.header(http::header::CONTENT_TYPE)?;
        value.to_str().ok()?.parse().ok()
    }

    /// Installs the outgoing response, marking the request as responded to.
    /// The last installed response wins; the application dispatcher
    /// finalizes it once the chain unwinds.
    pub fn respond(&self, response: Response) {
        let mut inner = self.lock();
        inner.response = response;
        inner.responded = true;
    }

    /// Whether something has installed a response for this request.  The
    /// default fallback endpoint consults this before responding 404.
    pub fn responded(&self) -> bool {
        self.lock().responded
    }

    /// The status of the pending response.
    pub fn status(&self) -> http::StatusCode {
        self.lock().response.status()
    }

    /// Sets the status of the pending response, marking the request as
    /// responded to.
    pub fn set_status(&self, status: http::StatusCode) {
        let mut inner = self.lock();
        inner.response.set_status(status);
        inner.responded = true;
    }

    /// Mutates the pending response in place, marking the request as
    /// responded to.
    pub fn edit_response<R>(&self, f: impl FnOnce(&mut Response) -> R) -> R {
        let mut inner = self.lock();
        inner.responded = true;
        f(&mut inner.response)
    }

    pub(crate) fn take_response(&self) -> Response {
        std::mem::take(&mut self.lock().response)
    }

    /// Retrieves a clone of the item of the given type from the request's
    /// item store.
    pub fn get<T: Clone + Send + Sync + 'static>(&self) -> Option<T> {
        self.lock().store.get::<T>().cloned()
    }

    /// Inserts an item into the request's item store, replacing any
    /// previous item of the same type.
    pub fn set<T: Send + Sync + 'static>(&self, value: T) {
        self.lock().store.insert(value);
    }

    /// Removes and returns the item of the given type from the request's
    /// item store.
    pub fn remove<T: Send + Sync + 'static>(&self) -> Option<T> {
        self.lock().store.remove::<T>()
    }

    fn with_route<R>(&self, f: impl FnOnce(&mut RouteContext) -> R) -> R {
        let mut guard = self.lock();
        let inner = &mut *guard;
        let uri = &inner.uri;
        let route = inner
            .route
            .get_or_insert_with(|| RouteContext::new(uri.path()));
        f(route)
    }

    /// Runs the given closure against the routing state, initializing it
    /// from the request path on first use.
    pub fn route<R>(&self, f: impl FnOnce(&RouteContext) -> R) -> R {
        self.with_route(|route| f(route))
    }
}

/// The routing capability surface of a request context.
///
/// The composer, router, and mount point need exactly these operations of
/// whatever context type flows through them; [`Context`] implements them,
/// and so can any wrapper a test harness cares to write.
pub trait RouteState {
    /// The pending (not-yet-consumed) request path.
    fn route_path(&self) -> String;
    /// Replaces the pending request path.  Mount points use this to
    /// present an inner handler with a path relative to its prefix, and to
    /// restore the outer path when the handler returns.
    fn set_route_path(&self, path: &str);
    /// The HTTP method of the request.
    fn http_method(&self) -> http::Method;
    /// Whether a router has already matched and claimed this request.
    fn route_handled(&self) -> bool;
    /// Claims this request, preventing sibling routers downstream from
    /// re-matching it.
    fn mark_route_handled(&self);
    /// Looks up an extracted path parameter, innermost match first.
    fn param(&self, name: &str) -> Option<String>;
    /// All values of a repeating path parameter, innermost match first.
    fn param_all(&self, name: &str) -> Option<Vec<String>>;
    /// Pushes a match onto the match stack, consuming its segment from the
    /// pending path.
    fn push_match(&self, frame: MatchFrame);
    /// Pops the innermost match, restoring the segment it consumed.
    fn pop_match(&self) -> Option<MatchFrame>;
}

impl RouteState for Context {
    fn route_path(&self) -> String {
        self.with_route(|route| route.pending_path().to_string())
    }

    fn set_route_path(&self, path: &str) {
        self.with_route(|route| route.set_pending_path(path));
    }

    fn http_method(&self) -> http::Method {
        self.method()
    }

    fn route_handled(&self) -> bool {
        self.lock().route_handled
    }

    fn mark_route_handled(&self) {
        self.lock().route_handled = true;
    }

    fn param(&self, name: &str) -> Option<String> {
        self.with_route(|route| route.param(name).map(str::to_string))
    }

    fn param_all(&self, name: &str) -> Option<Vec<String>> {
        self.with_route(|route| route.param_all(name).map(<[String]>::to_vec))
    }

    fn push_match(&self, frame: MatchFrame) {
        self.with_route(|route| route.push(frame));
    }

    fn pop_match(&self) -> Option<MatchFrame> {
        self.with_route(RouteContext::pop)
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("Context")
            .field("method", &inner.method)
            .field("uri", &inner.uri)
            .field("responded", &inner.responded)
            .field("route_handled", &inner.route_handled)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn context(request: http::Request<hyper::Body>) -> Context {
        Context::new(request)
    }

    #[tokio::test]
    async fn test_body_is_read_once_and_cached() {
        let cx = context(
            http::Request::post("/echo")
                .body(hyper::Body::from("payload"))
                .unwrap(),
        );
        assert_eq!(&cx.read_body().await.unwrap()[..], b"payload");
        // second read must come from the cache, not the (consumed) body
        assert_eq!(&cx.read_body().await.unwrap()[..], b"payload");
        assert_eq!(cx.body_text().await.unwrap(), "payload");
    }

    #[tokio::test]
    async fn test_body_json_checks_content_type() {
        let cx = context(
            http::Request::post("/echo")
                .header(http::header::CONTENT_TYPE, "text/csv")
                .body(hyper::Body::from("a,b"))
                .unwrap(),
        );
        let result = cx.body_json::<serde_json::Value>().await;
        assert!(matches!(
            result,
            Err(TrellisError::UnsupportedMediaType(_))
        ));
    }

    #[test]
    fn test_route_state_lazily_initialized() {
        let cx = context(
            http::Request::get("/a/b/c")
                .body(hyper::Body::empty())
                .unwrap(),
        );
        assert_eq!(cx.route_path(), "/a/b/c");
        cx.set_route_path("/b/c");
        assert_eq!(cx.route_path(), "/b/c");
        // the original URI path is untouched
        assert_eq!(cx.path(), "/a/b/c");
    }

    #[test]
    fn test_item_store_round_trip() {
        #[derive(Clone, Debug, PartialEq)]
        struct Tag(&'static str);

        let cx = context(http::Request::get("/").body(hyper::Body::empty()).unwrap());
        assert_eq!(cx.get::<Tag>(), None);
        cx.set(Tag("hello"));
        assert_eq!(cx.get::<Tag>(), Some(Tag("hello")));
        assert_eq!(cx.remove::<Tag>(), Some(Tag("hello")));
        assert_eq!(cx.get::<Tag>(), None);
    }

    #[test]
    fn test_respond_marks_and_replaces() {
        let cx = context(http::Request::get("/").body(hyper::Body::empty()).unwrap());
        assert!(!cx.responded());
        cx.respond(crate::Response::empty_204());
        assert!(cx.responded());
        cx.respond(crate::Response::empty_404());
        assert_eq!(cx.status(), http::StatusCode::NOT_FOUND);
    }
}
