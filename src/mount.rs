use crate::context::RouteState;
use crate::middleware::{IntoMiddleware, Middleware, Next};
use crate::{Context, Endpoint};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A middleware that scopes another handler under a path prefix.
///
/// When the pending path starts with the prefix at a segment boundary, the
/// remainder of the path (or `/`, if nothing remains) becomes the pending
/// path for the inner handler, so the handler operates entirely in
/// prefix-relative terms.  The original pending path is restored before
/// control leaves the mount, whether the inner handler completes, falls
/// through to the outer chain, or fails.
///
/// When the prefix does not apply, the mount is transparent and the request
/// proceeds to the outer chain untouched.
///
/// # Examples
/// ```rust
/// use trellis::{Context, Mount, Next, Response};
///
/// let mut api = trellis::Router::new();
/// api.at("/status").get(|cx: Context, _next: Next| async move {
///     cx.respond(Response::empty_204());
///     Ok(())
/// });
/// // serves GET /api/status
/// let mount = Mount::new("/api", api);
/// # let _ = mount;
/// ```
pub struct Mount {
    prefix: String,
    target: Arc<dyn Middleware>,
}

impl Mount {
    /// Creates a mount of the target under the given prefix.  The prefix
    /// must begin with `/`; one trailing slash is dropped, so `/api/` and
    /// `/api` are the same mount point.
    pub fn new(prefix: impl Into<String>, target: impl IntoMiddleware) -> Self {
        let mut prefix = prefix.into();
        assert!(
            prefix.starts_with('/'),
            "mount prefix {:?} must begin with a slash",
            prefix
        );
        if prefix.len() > 1 && prefix.ends_with('/') {
            prefix.pop();
        }
        Mount {
            prefix,
            target: target.into_middleware(),
        }
    }

    /// The normalized prefix this mount responds under.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// The part of the path after the prefix, provided the prefix ends on a
    /// segment boundary.  `/api` applies to `/api` and `/api/users`, never
    /// to `/apiary`.
    fn remainder<'p>(&self, path: &'p str) -> Option<&'p str> {
        if self.prefix == "/" {
            return Some(path);
        }
        let rest = path.strip_prefix(&self.prefix)?;
        if rest.is_empty() || rest.starts_with('/') {
            Some(rest)
        } else {
            None
        }
    }
}

#[async_trait]
impl Middleware for Mount {
    async fn apply(&self, cx: Context, next: Next) -> crate::Result<()> {
        let saved = cx.route_path();
        let rewritten = match self.remainder(&saved) {
            Some("") => "/".to_string(),
            Some(rest) => rest.to_string(),
            None => return next.apply(cx).await,
        };
        log::trace!("mount({}): {} => {}", self.prefix, saved, rewritten);
        cx.set_route_path(&rewritten);

        // Whichever way the inner handler exits, the saved path goes back
        // exactly once.
        let restored = Arc::new(AtomicBool::new(false));
        let after = Arc::new(Restore {
            restored: restored.clone(),
            saved: saved.clone(),
            next,
        });
        let result = self.target.apply(cx.clone(), Next::terminal(after)).await;
        if !restored.swap(true, Ordering::SeqCst) {
            cx.set_route_path(&saved);
        }
        result
    }
}

impl std::fmt::Debug for Mount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mount")
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

struct Restore {
    restored: Arc<AtomicBool>,
    saved: String,
    next: Next,
}

#[async_trait]
impl Endpoint for Restore {
    async fn call(&self, cx: Context) -> crate::Result<()> {
        if !self.restored.swap(true, Ordering::SeqCst) {
            cx.set_route_path(&self.saved);
        }
        self.next.clone().apply(cx).await
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{Response, Router};
    use std::sync::Mutex;

    fn context(path: &str) -> Context {
        Context::new(
            http::Request::get(path)
                .body(hyper::Body::empty())
                .unwrap(),
        )
    }

    fn not_found() -> Next {
        Next::terminal(Arc::new(|cx: Context| async move {
            if !cx.responded() {
                cx.respond(Response::empty_404());
            }
            Ok(())
        }))
    }

    #[tokio::test]
    async fn test_rewrites_and_restores_on_completion() {
        let seen: Arc<Mutex<Option<String>>> = Default::default();
        let inner = seen.clone();
        let mount = Mount::new("/api", move |cx: Context, _next: Next| {
            let inner = inner.clone();
            async move {
                *inner.lock().unwrap() = Some(cx.route_path());
                cx.respond(Response::empty_204());
                Ok(())
            }
        });

        let cx = context("/api/users");
        mount.apply(cx.clone(), not_found()).await.unwrap();
        assert_eq!(seen.lock().unwrap().as_deref(), Some("/users"));
        assert_eq!(cx.route_path(), "/api/users");
        assert_eq!(cx.status(), http::StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn test_exact_prefix_becomes_root() {
        let seen: Arc<Mutex<Option<String>>> = Default::default();
        let inner = seen.clone();
        let mount = Mount::new("/api/", move |cx: Context, _next: Next| {
            let inner = inner.clone();
            async move {
                *inner.lock().unwrap() = Some(cx.route_path());
                cx.respond(Response::empty_204());
                Ok(())
            }
        });

        let cx = context("/api");
        mount.apply(cx.clone(), not_found()).await.unwrap();
        assert_eq!(seen.lock().unwrap().as_deref(), Some("/"));
        assert_eq!(cx.route_path(), "/api");
    }

    #[tokio::test]
    async fn test_prefix_respects_segment_boundary() {
        let mount = Mount::new("/api", |cx: Context, _next: Next| async move {
            cx.respond(Response::empty_204());
            Ok(())
        });

        let cx = context("/apiary");
        mount.apply(cx.clone(), not_found()).await.unwrap();
        // transparent pass-through to the outer chain
        assert_eq!(cx.status(), http::StatusCode::NOT_FOUND);
        assert_eq!(cx.route_path(), "/apiary");
    }

    #[tokio::test]
    async fn test_restores_before_fall_through() {
        let downstream: Arc<Mutex<Option<String>>> = Default::default();
        let observed = downstream.clone();
        let mount = Mount::new(
            "/api",
            |cx: Context, next: Next| async move { next.apply(cx).await },
        );

        let terminal = Next::terminal(Arc::new(move |cx: Context| {
            let observed = observed.clone();
            async move {
                *observed.lock().unwrap() = Some(cx.route_path());
                Ok(())
            }
        }));

        let cx = context("/api/users");
        mount.apply(cx.clone(), terminal).await.unwrap();
        // the outer chain saw the original path, not the rewritten one
        assert_eq!(downstream.lock().unwrap().as_deref(), Some("/api/users"));
        assert_eq!(cx.route_path(), "/api/users");
    }

    #[tokio::test]
    async fn test_restores_on_failure() {
        let mount = Mount::new("/api", |_cx: Context, _next: Next| async move {
            Err(anyhow::anyhow!("inner handler died"))
        });

        let cx = context("/api/users");
        let result = mount.apply(cx.clone(), not_found()).await;
        assert!(result.is_err());
        assert_eq!(cx.route_path(), "/api/users");
    }

    #[tokio::test]
    async fn test_nested_mounted_routers() {
        let mut inner = Router::new().named("inner");
        inner
            .at("/hello/:name")
            .get(|cx: Context, _next: Next| async move {
                assert_eq!(cx.param("name").as_deref(), Some("world"));
                cx.respond(Response::empty_204());
                Ok(())
            });

        let mut outer = Router::new().named("outer");
        outer.mount("/chain", inner);

        let cx = context("/chain/hello/world");
        outer.build().apply(cx.clone(), not_found()).await.unwrap();
        assert_eq!(cx.status(), http::StatusCode::NO_CONTENT);
        // every rewrite unwound on the way out
        assert_eq!(cx.route_path(), "/chain/hello/world");
        cx.route(|route| assert_eq!(route.depth(), 0));
    }

    #[tokio::test]
    async fn test_root_prefix_is_transparent() {
        let seen: Arc<Mutex<Option<String>>> = Default::default();
        let inner = seen.clone();
        let mount = Mount::new("/", move |cx: Context, _next: Next| {
            let inner = inner.clone();
            async move {
                *inner.lock().unwrap() = Some(cx.route_path());
                cx.respond(Response::empty_204());
                Ok(())
            }
        });

        let cx = context("/anything");
        mount.apply(cx.clone(), not_found()).await.unwrap();
        assert_eq!(seen.lock().unwrap().as_deref(), Some("/anything"));
    }
}
