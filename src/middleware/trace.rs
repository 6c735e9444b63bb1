use super::{Middleware, Next};
use crate::Context;

#[derive(Default, Debug, Clone)]
/// A middleware for tracing HTTP requests.
///
/// This logs (using `log`) each request, as well as how long each request
/// took.  The default log level is `info`.
pub struct TraceMiddleware {
    _v: (),
}

impl TraceMiddleware {
    #[must_use]
    /// Creates a new trace middleware.  This is provided as an alternative
    /// to `Default`.
    pub fn new() -> Self {
        TraceMiddleware::default()
    }
}

#[async_trait]
impl Middleware for TraceMiddleware {
    async fn apply(&self, cx: Context, next: Next) -> crate::Result<()> {
        let method = cx.method();
        let path = cx.path();
        log::info!("--> {} {}", method, path);
        let start = std::time::Instant::now();

        let result = next.apply(cx.clone()).await;
        let elapse = start.elapsed();

        match &result {
            Ok(()) => log::info!(
                "<-- {} {}: {} (in {}ms)",
                method,
                path,
                cx.status(),
                elapse.as_millis()
            ),
            Err(_) => log::info!(
                "<-- {} {}: (error) (in {}ms)",
                method,
                path,
                elapse.as_millis()
            ),
        }

        result
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::Response;

    #[tokio::test]
    async fn test_trace_is_transparent() {
        let cx = Context::new(http::Request::get("/").body(hyper::Body::empty()).unwrap());
        let next = Next::terminal(std::sync::Arc::new(|cx: Context| async move {
            cx.respond(Response::empty_204());
            Ok(())
        }));
        TraceMiddleware::new().apply(cx.clone(), next).await.unwrap();
        assert_eq!(cx.status(), http::StatusCode::NO_CONTENT);
    }
}
