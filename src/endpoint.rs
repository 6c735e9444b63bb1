use crate::Context;
use std::future::Future;

#[async_trait]
/// A terminal HTTP request handler.
///
/// Where a [`crate::Middleware`] receives a continuation, an endpoint sits
/// at the end of a chain and receives only the request [`Context`].  The
/// application's fallback handler is an endpoint, and so is the innermost
/// step of every composed chain.  This is automatically implemented for
/// `Fn(Context) -> impl Future<Output = crate::Result<()>>` types, but it
/// may be useful to implement this yourself.
pub trait Endpoint: Send + Sync + 'static {
    #[must_use]
    /// Handles the given request context.  The response travels on the
    /// context; the return value only signals failure, which the
    /// application's error handler converts into a user-visible response.
    async fn call(&self, cx: Context) -> crate::Result<()>;
}

#[async_trait]
impl<F, Fut> Endpoint for F
where
    F: Fn(Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = crate::Result<()>> + Send + 'static,
{
    async fn call(&self, cx: Context) -> crate::Result<()> {
        self(cx).await
    }
}
