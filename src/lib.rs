//! Trellis is a minimal async HTTP toolkit built on Tokio and hyper.  It
//! provides an ordered middleware chain, a path/method router that can be
//! nested through mount points, and graceful connection draining, and very
//! little else.  It is meant to be the structural skeleton of a server, not
//! a batteries-included framework.
//!
//! # Getting Started
//! Add trellis and tokio to your `Cargo.toml`:
//!
//! ```toml
//! trellis = "0.1.0"
//! tokio = { version = "1.26.0", features = ["full"] } # or whatever the latest version is
//! ```
//!
//! # Examples
//! ```rust,no_run
//! use trellis::{Context, Next, Response};
//!
//! async fn hello(cx: Context, _next: Next) -> Result<(), anyhow::Error> {
//!     cx.respond(Response::text("hello, world!"));
//!     Ok(())
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), anyhow::Error> {
//!     let mut router = trellis::Router::new();
//!     router.at("/").get(hello);
//!     let mut app = trellis::app();
//!     app.mount("/", router);
//!     app.listen("0.0.0.0:8080").await?;
//!     Ok(())
//! }
//! ```
#![warn(missing_debug_implementations, rust_2018_idioms)]
#![deny(clippy::correctness, unused_must_use)]

#[macro_use]
extern crate async_trait;

mod app;
mod context;
mod data;
mod endpoint;
mod error;
pub mod middleware;
mod mount;
mod response;
mod router;
mod server;
mod shutdown;

pub use self::app::{App, ErrorHandler};
pub use self::context::{Context, RouteState};
pub use self::data::{DataStream, DataTransfer};
pub use self::endpoint::Endpoint;
pub use self::error::{HttpError, TrellisError};
pub use self::middleware::{Chain, IntoMiddleware, Middleware, Next};
pub use self::mount::Mount;
pub use self::response::Response;
pub use self::router::{
    BuiltRouter, MatchFrame, ParamValue, Params, PathPattern, RouteContext, RoutePath, Router,
    RouterOptions,
};
pub use self::server::RemoteAddress;
pub use self::shutdown::ShutdownManager;

pub use ::http;
pub use hyper::Body;

/// A type alias for [`std::result::Result`].
///
/// This is the outcome type of every middleware and endpoint in the crate:
/// the response itself travels on the [`Context`], so a handler only reports
/// whether it succeeded.
///
/// # Examples
/// ```rust
/// async fn handle(cx: trellis::Context, _next: trellis::Next) -> trellis::Result {
///     cx.respond(trellis::Response::text("hello, world!"));
///     Ok(())
/// }
/// ```
pub type Result<T = (), E = anyhow::Error> = std::result::Result<T, E>;

#[must_use]
#[inline]
/// This creates a new HTTP application.  This is a shortcut for
/// [`App::default`].
pub fn app() -> App {
    App::default()
}
