//! # kumo
//!
//! An embeddable HTTP toolkit for services that sit behind a proxy:
//! method + path routes, prefix groups, a per-route middleware chain,
//! CORS and JWT middleware, WebSocket endpoints guarded by the same chain,
//! and a pluggable message stream for talking to sibling instances.
//!
//! ## Request flow
//!
//! ```text
//! path ─▶ route ─▶ middleware (global, then group) ─▶ CORS ─▶ handler ─▶ finalize ─▶ log
//!             └─▶ 404 unknown path / 405 known path, other method
//! ```
//!
//! A middleware failure stops the request: token errors answer `401`,
//! anything else `400`. A handler failure answers `500` unless the handler
//! set a status first. A handler that sets no status answers `200`.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use kumo::{BoxFuture, Context, Result, Router, middleware};
//! use serde_json::json;
//!
//! fn hello(ctx: &mut Context) -> BoxFuture<'_, Result<()>> {
//!     Box::pin(async move {
//!         let name = ctx.param("name").unwrap_or("world").to_owned();
//!         ctx.json(&json!({ "hello": name })).await
//!     })
//! }
//!
//! fn whoami(ctx: &mut Context) -> BoxFuture<'_, Result<()>> {
//!     Box::pin(async move {
//!         let role = ctx.header("role").unwrap_or("none").to_owned();
//!         ctx.send_string(role).await
//!     })
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let mut app = Router::new().with_default_cors().with_logging();
//!     app.get("/hello", hello)?;
//!
//!     let mut private = app.group("/private");
//!     private.use_middleware(middleware::jwt("my_secret_key"));
//!     private.get("/whoami", whoami)?;
//!
//!     app.run("0.0.0.0:3000").await
//! }
//! ```

mod context;
mod dispatch;
mod error;
mod handler;
mod method;
mod request;
mod response;
mod router;
mod server;

pub mod middleware;
pub mod stream;
pub mod websocket;

pub use context::Context;
pub use error::{BoxError, Error, Result};
pub use handler::{BoxFuture, BoxedHandler, Handler, SocketHandler};
pub use method::Method;
pub use middleware::{Cors, Middleware, jwt};
pub use request::Request;
pub use response::{Body, ContentType};
pub use router::{Group, Router};
pub use server::Server;
pub use stream::{Message, MessageStream};
pub use websocket::SocketContext;
