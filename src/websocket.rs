//! WebSocket endpoints.
//!
//! A WebSocket route goes through the same middleware chain as an HTTP
//! route, only later: the handshake is answered with `101` first, then the
//! chain runs against the upgrade request, and only if it passes does the
//! handler get the connection. A rejected connection is closed with code
//! `1008` (policy violation) and the error message as the close reason.
//!
//! ```rust,no_run
//! use kumo::{Result, Router};
//! use kumo::websocket::{Message, SocketContext};
//!
//! async fn echo(mut ctx: SocketContext) -> Result<()> {
//!     while let Some(msg) = ctx.recv().await {
//!         match msg? {
//!             Message::Close(_) => break,
//!             msg => ctx.send(msg).await?,
//!         }
//!     }
//!     Ok(())
//! }
//!
//! let mut app = Router::new();
//! app.websocket("/echo", echo).unwrap();
//! ```
//!
//! The handler owns the connection: kumo never closes it once the handler
//! is running. Returning from the handler drops it.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use http::header::{CONNECTION, SEC_WEBSOCKET_ACCEPT, SEC_WEBSOCKET_KEY, SEC_WEBSOCKET_VERSION, UPGRADE};
use http::{HeaderValue, StatusCode};
use hyper::upgrade::{OnUpgrade, Upgraded};
use hyper_util::rt::TokioIo;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::handshake::derive_accept_key;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, Role};
use tracing::{Instrument, Span, debug, error, info_span, warn};

use crate::error::Result;
use crate::request::Request;
use crate::response::{Body, plain};
use crate::router::SocketRoute;
use crate::stream::MessageStream;

pub use tokio_tungstenite::tungstenite::Message;
pub use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

/// The upgraded connection a [`SocketContext`] wraps.
pub type WebSocket = WebSocketStream<TokioIo<Upgraded>>;

/// Everything a WebSocket handler sees: the upgrade request and the live
/// connection.
pub struct SocketContext {
    request: Request,
    socket: WebSocket,
    span: Span,
    stream: Option<Arc<dyn MessageStream>>,
}

impl SocketContext {
    /// Waits for the next message. `None` once the connection is gone.
    pub async fn recv(&mut self) -> Option<Result<Message>> {
        self.socket.next().await.map(|msg| msg.map_err(Into::into))
    }

    pub async fn send(&mut self, msg: Message) -> Result<()> {
        Ok(self.socket.send(msg).await?)
    }

    pub async fn send_text(&mut self, text: impl Into<String>) -> Result<()> {
        self.send(Message::text(text.into())).await
    }

    /// Starts the closing handshake with `code` and `reason`.
    pub async fn close(&mut self, code: CloseCode, reason: &str) -> Result<()> {
        let frame = CloseFrame { code, reason: reason.to_owned().into() };
        Ok(self.socket.close(Some(frame)).await?)
    }

    pub fn request(&self) -> &Request { &self.request }
    pub fn request_mut(&mut self) -> &mut Request { &mut self.request }

    pub fn param(&self, key: &str) -> Option<&str> { self.request.param(key) }
    pub fn path_value(&self, key: &str) -> Option<&str> { self.request.path_value(key) }
    pub fn header(&self, name: &str) -> Option<&str> { self.request.header(name) }

    pub fn span(&self) -> &Span { &self.span }

    pub fn message_stream(&self) -> Option<&Arc<dyn MessageStream>> {
        self.stream.as_ref()
    }

    /// The raw stream, for splitting into sink and stream halves.
    pub fn socket_mut(&mut self) -> &mut WebSocket { &mut self.socket }

    pub fn into_inner(self) -> (Request, WebSocket) {
        (self.request, self.socket)
    }
}

/// Whether `req` asks for a WebSocket upgrade.
pub(crate) fn is_upgrade<B>(req: &http::Request<B>) -> bool {
    header_has_token(req.headers().get(UPGRADE), "websocket")
}

fn header_has_token(value: Option<&HeaderValue>, token: &str) -> bool {
    value
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.split(',').any(|t| t.trim().eq_ignore_ascii_case(token)))
}

/// Answers the handshake and spawns the connection task.
pub(crate) fn accept<B>(
    route: Arc<SocketRoute>,
    mut req: http::Request<B>,
    params: HashMap<String, String>,
) -> http::Response<Body> {
    let key = match handshake_key(&req) {
        Ok(key) => key,
        Err(reason) => {
            debug!(reason, "websocket handshake rejected");
            return plain(StatusCode::BAD_REQUEST, reason);
        }
    };
    let accept_key = derive_accept_key(key.as_bytes());

    let on_upgrade = hyper::upgrade::on(&mut req);
    let (parts, _body) = req.into_parts();
    let span = info_span!(parent: &route.settings.span, "websocket", path = %parts.uri.path());
    let request = Request::new(parts, Bytes::new(), params);

    let mut res = http::Response::new(Body::empty());
    *res.status_mut() = StatusCode::SWITCHING_PROTOCOLS;
    let headers = res.headers_mut();
    headers.insert(UPGRADE, HeaderValue::from_static("websocket"));
    headers.insert(CONNECTION, HeaderValue::from_static("Upgrade"));
    match HeaderValue::from_str(&accept_key) {
        Ok(value) => {
            headers.insert(SEC_WEBSOCKET_ACCEPT, value);
        }
        Err(_) => return plain(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error"),
    }
    route.settings.cors.apply(headers);

    tokio::spawn(serve(route, on_upgrade, request, span.clone()).instrument(span));
    res
}

fn handshake_key<B>(req: &http::Request<B>) -> std::result::Result<String, &'static str> {
    if req.method() != http::Method::GET {
        return Err("websocket upgrade requires GET");
    }
    let headers = req.headers();
    if headers.get(SEC_WEBSOCKET_VERSION).is_none_or(|v| v.as_bytes() != b"13") {
        return Err("unsupported Sec-WebSocket-Version");
    }
    headers
        .get(SEC_WEBSOCKET_KEY)
        .and_then(|v| v.to_str().ok())
        .filter(|k| !k.is_empty())
        .map(str::to_owned)
        .ok_or("missing Sec-WebSocket-Key")
}

/// Completes the upgrade, runs the middleware chain, then the handler.
async fn serve(route: Arc<SocketRoute>, on_upgrade: OnUpgrade, request: Request, span: Span) {
    let upgraded = match on_upgrade.await {
        Ok(upgraded) => upgraded,
        Err(e) => {
            error!(error = %e, "websocket upgrade failed");
            return;
        }
    };
    let socket = WebSocketStream::from_raw_socket(TokioIo::new(upgraded), Role::Server, None).await;
    let mut ctx = SocketContext { request, socket, span, stream: route.settings.stream.clone() };

    if let Err(err) = route.chain.run(&mut ctx.request).await {
        debug!(error = %err, "websocket rejected by middleware");
        if let Err(e) = ctx.close(CloseCode::Policy, &err.to_string()).await {
            debug!(error = %e, "close frame not delivered");
        }
        return;
    }

    if let Err(err) = route.handler.call(ctx).await {
        warn!(error = %err, pattern = %route.pattern, "websocket handler failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handshake(version: &str) -> http::request::Builder {
        http::Request::get("/ws")
            .header(UPGRADE, "websocket")
            .header(CONNECTION, "Upgrade")
            .header(SEC_WEBSOCKET_VERSION, version)
            .header(SEC_WEBSOCKET_KEY, "dGhlIHNhbXBsZSBub25jZQ==")
    }

    #[test]
    fn upgrade_token_is_case_insensitive() {
        let req = http::Request::get("/").header(UPGRADE, "WebSocket").body(()).unwrap();
        assert!(is_upgrade(&req));
        let req = http::Request::get("/").header(UPGRADE, "h2c").body(()).unwrap();
        assert!(!is_upgrade(&req));
    }

    #[test]
    fn valid_handshake_yields_the_key() {
        let req = handshake("13").body(()).unwrap();
        assert_eq!(handshake_key(&req).unwrap(), "dGhlIHNhbXBsZSBub25jZQ==");
        // RFC 6455 §1.3 sample
        assert_eq!(derive_accept_key(b"dGhlIHNhbXBsZSBub25jZQ=="), "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
    }

    #[test]
    fn handshake_requires_get_version_and_key() {
        let req = handshake("13").method(http::Method::POST).body(()).unwrap();
        assert!(handshake_key(&req).is_err());

        let req = handshake("8").body(()).unwrap();
        assert!(handshake_key(&req).is_err());

        let req = http::Request::get("/ws")
            .header(UPGRADE, "websocket")
            .header(SEC_WEBSOCKET_VERSION, "13")
            .body(())
            .unwrap();
        assert!(handshake_key(&req).is_err());
    }
}
