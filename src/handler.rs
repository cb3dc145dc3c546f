//! Handler traits and type erasure.
//!
//! # Two kinds of handler
//!
//! An HTTP handler borrows its [`Context`] for the length of one call: the
//! dispatcher still owns the context afterwards, because it has to finalize
//! the response and log the outcome. A WebSocket handler takes its
//! [`SocketContext`] by value, since it owns the connection from then on.
//!
//! ```text
//! fn hello(ctx: &mut Context) -> BoxFuture<'_, Result<()>>   ← HTTP
//! async fn chat(ctx: SocketContext) -> Result<()>            ← WebSocket
//! ```
//!
//! Both are stored behind an `Arc<dyn …>` so routes of different concrete
//! handler types share one table. The per-request cost is one `Arc` clone
//! and one virtual call.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::context::Context;
use crate::error::Result;
use crate::websocket::SocketContext;

/// A heap-allocated, type-erased future borrowing from `'a`.
///
/// `Send` so the runtime can move the request task between worker threads.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

// ── HTTP handlers ─────────────────────────────────────────────────────────────

/// The terminal step of an HTTP route.
///
/// Implemented for every function shaped like
///
/// ```rust
/// use kumo::{BoxFuture, Context, Result};
///
/// fn hello(ctx: &mut Context) -> BoxFuture<'_, Result<()>> {
///     Box::pin(async move { ctx.send_string("hello").await })
/// }
/// ```
///
/// and may be implemented by hand for handlers that carry state.
pub trait Handler: Send + Sync + 'static {
    fn call<'a>(&'a self, ctx: &'a mut Context) -> BoxFuture<'a, Result<()>>;
}

impl<F> Handler for F
where
    F: for<'a> Fn(&'a mut Context) -> BoxFuture<'a, Result<()>> + Send + Sync + 'static,
{
    fn call<'a>(&'a self, ctx: &'a mut Context) -> BoxFuture<'a, Result<()>> {
        (self)(ctx)
    }
}

/// A shared, type-erased HTTP handler.
///
/// [`Router::route`](crate::Router::route) accepts `Option<BoxedHandler>` for
/// tables assembled at runtime; `None` there is a registration error.
pub type BoxedHandler = Arc<dyn Handler>;

// ── WebSocket handlers ────────────────────────────────────────────────────────

/// Internal dispatch interface for WebSocket handlers.
///
/// `#[doc(hidden)] pub` rather than `pub(crate)` because it appears in the
/// return type of the public `SocketHandler` trait's `into_boxed_handler`.
#[doc(hidden)]
pub trait ErasedSocketHandler {
    fn call(&self, ctx: SocketContext) -> BoxFuture<'static, Result<()>>;
}

#[doc(hidden)]
pub type BoxedSocketHandler = Arc<dyn ErasedSocketHandler + Send + Sync + 'static>;

/// Implemented for every valid WebSocket handler: any `async fn` with the
/// signature
///
/// ```text
/// async fn name(ctx: SocketContext) -> kumo::Result<()>
/// ```
///
/// Sealed: only the blanket impl below can satisfy it.
pub trait SocketHandler: private::Sealed + Send + Sync + 'static {
    #[doc(hidden)]
    fn into_boxed_handler(self) -> BoxedSocketHandler;
}

mod private {
    pub trait Sealed {}
}

impl<F, Fut> private::Sealed for F
where
    F: Fn(SocketContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
}

impl<F, Fut> SocketHandler for F
where
    F: Fn(SocketContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    fn into_boxed_handler(self) -> BoxedSocketHandler {
        Arc::new(FnSocketHandler(self))
    }
}

/// Newtype bridging a concrete socket handler `F` to the trait-object world.
struct FnSocketHandler<F>(F);

impl<F, Fut> ErasedSocketHandler for FnSocketHandler<F>
where
    F: Fn(SocketContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    fn call(&self, ctx: SocketContext) -> BoxFuture<'static, Result<()>> {
        Box::pin((self.0)(ctx))
    }
}
