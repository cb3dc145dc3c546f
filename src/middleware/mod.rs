//! Middleware layer.
//!
//! A middleware looks at the inbound [`Request`] before the route's handler
//! runs and either lets it through (`Ok(())`) or stops it with an
//! [`Error`](crate::Error). The dispatcher maps that error to a status with
//! [`Error::middleware_status`](crate::Error::middleware_status) and the
//! handler never runs.
//!
//! Middleware works on the request alone, so one chain serves both HTTP
//! routes and WebSocket routes. Values a middleware wants to pass forward
//! go into the request headers; that is how [`jwt`] exposes token claims.
//!
//! Built-in:
//! - [`jwt`]: HMAC bearer-token validation
//! - [`cors`]: cross-origin headers, applied by the dispatcher per router setting

use std::sync::Arc;

use crate::error::Result;
use crate::handler::BoxFuture;
use crate::request::Request;

pub mod cors;
pub mod jwt;
pub(crate) mod logger;

pub use cors::Cors;
pub use jwt::{Jwt, jwt};

/// A request interceptor.
///
/// Implemented for every function shaped like
///
/// ```rust
/// use kumo::{BoxFuture, Error, Request, Result};
///
/// fn require_tenant(req: &mut Request) -> BoxFuture<'_, Result<()>> {
///     Box::pin(async move {
///         match req.header("x-tenant") {
///             Some(_) => Ok(()),
///             None => Err(Error::InvalidData),
///         }
///     })
/// }
/// ```
///
/// and may be implemented by hand for middleware that carries state.
pub trait Middleware: Send + Sync + 'static {
    fn call<'a>(&'a self, req: &'a mut Request) -> BoxFuture<'a, Result<()>>;
}

impl<F> Middleware for F
where
    F: for<'a> Fn(&'a mut Request) -> BoxFuture<'a, Result<()>> + Send + Sync + 'static,
{
    fn call<'a>(&'a self, req: &'a mut Request) -> BoxFuture<'a, Result<()>> {
        (self)(req)
    }
}

pub(crate) type BoxedMiddleware = Arc<dyn Middleware>;

/// The middleware list of one route, frozen when the route is registered.
///
/// Router-wide middleware comes first, group middleware after it; adding
/// middleware later never reaches routes that already exist.
#[derive(Clone)]
pub(crate) struct Chain(Arc<[BoxedMiddleware]>);

impl Chain {
    pub(crate) fn new(global: &[BoxedMiddleware], group: &[BoxedMiddleware]) -> Self {
        Self(global.iter().chain(group).cloned().collect())
    }

    /// Runs every middleware in order, stopping at the first failure.
    pub(crate) async fn run(&self, req: &mut Request) -> Result<()> {
        for middleware in self.0.iter() {
            middleware.call(req).await?;
        }
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.0.len()
    }
}
