//! Per-request pipeline.
//!
//! ```text
//! resolve tables ──▶ websocket? ──▶ websocket::accept
//!      │
//!      ▼
//! method lookup ──▶ collect body ──▶ spawn pipeline ──▶ await head ──▶ response
//!                                        │
//!                   middleware ─▶ cors ─▶ handler ─▶ finish ─▶ access log
//! ```
//!
//! The pipeline runs in its own task so the handler can stream: the
//! response is handed to hyper as soon as its head is committed, while the
//! task keeps feeding the body.

use std::collections::BTreeSet;
use std::sync::Arc;

use bytes::Bytes;
use http::header::{ALLOW, HeaderValue, UPGRADE};
use http::StatusCode;
use http_body_util::BodyExt;
use tracing::{Instrument, debug, error, info_span};

use crate::context::Context;
use crate::error::{BoxError, Error};
use crate::method::Method;
use crate::middleware::Cors;
use crate::middleware::logger::log_request;
use crate::request::Request;
use crate::response::{Body, ResponseWriter, plain};
use crate::router::{Entry, Resolved, Route, Router};
use crate::websocket;

impl Router {
    /// Answers one request.
    ///
    /// This is what the server calls for every request on a connection;
    /// call it directly to exercise a router in process:
    ///
    /// ```rust
    /// # use kumo::Router;
    /// # async fn check(app: Router) {
    /// let req = http::Request::get("/missing").body(String::new()).unwrap();
    /// assert_eq!(app.handle(req).await.status(), 404);
    /// # }
    /// ```
    pub async fn handle<B>(&self, req: http::Request<B>) -> http::Response<Body>
    where
        B: hyper::body::Body + Send + 'static,
        B::Data: Send,
        B::Error: Into<BoxError>,
    {
        let resolved = self.resolve(req.uri().path());
        if resolved.is_empty() {
            return plain(StatusCode::NOT_FOUND, Error::NotFound.to_string());
        }

        if websocket::is_upgrade(&req) {
            if let Some((socket, params)) = resolved
                .iter()
                .find_map(|r| r.entry.socket.as_ref().map(|s| (Arc::clone(s), &r.params)))
            {
                return websocket::accept(socket, req, params.clone());
            }
        }

        let method = Method::try_from(req.method()).ok();
        let found = method.and_then(|m| {
            resolved
                .iter()
                .find_map(|r| r.entry.methods.get(&m).map(|route| (Arc::clone(route), &r.params)))
        });
        let Some((route, params)) = found else {
            return no_route(&resolved, req.method());
        };
        let params = params.clone();

        let (parts, body) = req.into_parts();
        let body: Bytes = match body.collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) => {
                let err = Error::Body(e.into());
                debug!(error = %err, "request body unreadable");
                return plain(StatusCode::BAD_REQUEST, err.to_string());
            }
        };

        let span = info_span!(
            parent: &route.settings.span,
            "request",
            method = %parts.method,
            path = %parts.uri.path()
        );
        let request = Request::new(parts, body, params);
        let (writer, mut outlet) = ResponseWriter::new();
        let ctx = Context::new(request, writer, span.clone(), route.settings.stream.clone());

        tokio::spawn(pipeline(route, ctx).instrument(span));

        match (&mut outlet.head).await {
            Ok(head) => outlet.into_response(head),
            Err(_) => {
                // the task ended without committing, i.e. the handler panicked
                error!("request task ended without a response");
                plain(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
            }
        }
    }
}

/// Middleware, CORS, handler, finalization and logging for one request.
async fn pipeline(route: Arc<Route>, mut ctx: Context) {
    let settings = &route.settings;

    if let Err(err) = route.chain.run(ctx.request_mut()).await {
        debug!(error = %err, "rejected by middleware");
        ctx.status(err.middleware_status().as_u16());
        send_error(&mut ctx, &err).await;
        return finalize(&mut ctx, settings.logging);
    }

    if settings.cors.is_enabled() {
        settings.cors.apply(ctx.response_headers_mut());
        if ctx.request().method() == http::Method::OPTIONS {
            ctx.status(StatusCode::OK.as_u16());
            return finalize(&mut ctx, settings.logging);
        }
    }

    if let Err(err) = route.handler.call(&mut ctx).await {
        debug!(error = %err, pattern = %route.pattern, "handler failed");
        send_error(&mut ctx, &err).await;
    }
    finalize(&mut ctx, settings.logging);
}

async fn send_error(ctx: &mut Context, err: &Error) {
    if let Err(e) = ctx.send_error(err).await {
        debug!(error = %e, "error response not delivered");
    }
}

fn finalize(ctx: &mut Context, logging: bool) {
    match ctx.finish() {
        Ok(status) if logging => log_request(status, ctx.request()),
        Ok(_) => {}
        Err(e) => debug!(error = %e, "response finalized twice"),
    }
}

/// The path exists but no table has a route for this method.
fn no_route(resolved: &[Resolved<'_>], method: &http::Method) -> http::Response<Body> {
    let entries = || resolved.iter().map(|r| r.entry);

    if method == http::Method::OPTIONS {
        if let Some(cors) = entries().find_map(Entry::cors) {
            return preflight(cors);
        }
    }

    if entries().all(|e| e.methods.is_empty()) && entries().any(|e| e.socket.is_some()) {
        let mut res = plain(StatusCode::UPGRADE_REQUIRED, "Upgrade Required");
        res.headers_mut().insert(UPGRADE, HeaderValue::from_static("websocket"));
        return res;
    }

    let allowed: BTreeSet<Method> = entries().flat_map(|e| e.methods.keys().copied()).collect();
    let allowed: Vec<&str> = allowed.into_iter().map(Method::as_str).collect();
    let mut res = plain(StatusCode::METHOD_NOT_ALLOWED, Error::MethodNotAllowed.to_string());
    if let Ok(value) = HeaderValue::from_str(&allowed.join(", ")) {
        res.headers_mut().insert(ALLOW, value);
    }
    res
}

fn preflight(cors: &Cors) -> http::Response<Body> {
    let mut res = http::Response::new(Body::empty());
    cors.apply(res.headers_mut());
    res
}
