//! Outgoing response plumbing.
//!
//! A response leaves kumo in two halves. The head (status + headers) is
//! held back until the handler writes its first body byte, or until the
//! dispatcher finalizes the request, so headers can still change after
//! `status()` is called. The body then streams through a bounded channel
//! into a [`Body`] that hyper polls.
//!
//! ```text
//! ResponseWriter ── head ──▶ oneshot ──▶ Router::handle builds the head
//!        └──────── chunks ─▶ mpsc ────▶ Body::poll_frame
//! ```

use std::convert::Infallible;
use std::io;
use std::pin::Pin;
use std::task::{Context as TaskContext, Poll};

use bytes::Bytes;
use http::header::{self, IntoHeaderName};
use http::{HeaderMap, HeaderValue, StatusCode};
use hyper::body::{Frame, SizeHint};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Largest slice handed to the body channel in one send.
pub(crate) const WRITE_CHUNK: usize = 16 * 1024;

/// Chunks buffered between the writer and the connection.
const CHANNEL_DEPTH: usize = 16;

// ── ContentType ───────────────────────────────────────────────────────────────

/// Content types kumo's send helpers stamp on a response.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ContentType {
    Html,         // text/html; charset=utf-8
    Json,         // application/json
    OctetStream,  // application/octet-stream
    Text,         // text/plain; charset=utf-8
}

impl ContentType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Html        => "text/html; charset=utf-8",
            Self::Json        => "application/json",
            Self::OctetStream => "application/octet-stream",
            Self::Text        => "text/plain; charset=utf-8",
        }
    }
}

// ── Body ─────────────────────────────────────────────────────────────────────

/// The response body type kumo hands to hyper.
pub struct Body {
    kind: Kind,
}

enum Kind {
    Empty,
    Full(Option<Bytes>),
    Channel(mpsc::Receiver<Bytes>),
}

impl Body {
    pub fn empty() -> Self {
        Self { kind: Kind::Empty }
    }

    pub(crate) fn full(bytes: impl Into<Bytes>) -> Self {
        Self { kind: Kind::Full(Some(bytes.into())) }
    }

    fn channel(rx: mpsc::Receiver<Bytes>) -> Self {
        Self { kind: Kind::Channel(rx) }
    }
}

impl hyper::body::Body for Body {
    type Data = Bytes;
    type Error = Infallible;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut TaskContext<'_>,
    ) -> Poll<Option<Result<Frame<Bytes>, Infallible>>> {
        match &mut self.get_mut().kind {
            Kind::Empty => Poll::Ready(None),
            Kind::Full(chunk) => Poll::Ready(chunk.take().map(|b| Ok(Frame::data(b)))),
            Kind::Channel(rx) => rx.poll_recv(cx).map(|c| c.map(|b| Ok(Frame::data(b)))),
        }
    }

    fn is_end_stream(&self) -> bool {
        matches!(self.kind, Kind::Empty | Kind::Full(None))
    }

    fn size_hint(&self) -> SizeHint {
        match &self.kind {
            Kind::Empty | Kind::Full(None) => SizeHint::with_exact(0),
            Kind::Full(Some(b)) => SizeHint::with_exact(b.len() as u64),
            Kind::Channel(_) => SizeHint::default(),
        }
    }
}

/// A complete response with a plain-text body, used for answers the
/// dispatcher produces without running a handler (404, 405, ...).
pub(crate) fn plain(status: StatusCode, body: impl Into<Bytes>) -> http::Response<Body> {
    let body = body.into();
    let mut res = http::Response::new(Body::full(body));
    *res.status_mut() = status;
    res.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(ContentType::Text.as_str()),
    );
    res
}

// ── ResponseWriter ────────────────────────────────────────────────────────────

/// Status line and headers, sent once when the response is committed.
pub(crate) type Head = (StatusCode, HeaderMap);

enum State {
    Pending { head: oneshot::Sender<Head>, body: mpsc::Sender<Bytes> },
    Streaming { body: mpsc::Sender<Bytes> },
    Finished,
}

/// The outbound half of an HTTP [`Context`](crate::Context).
pub(crate) struct ResponseWriter {
    status: Option<StatusCode>,
    headers: HeaderMap,
    state: State,
}

/// The receiving ends a dispatcher holds while the pipeline writes.
pub(crate) struct Outlet {
    pub(crate) head: oneshot::Receiver<Head>,
    body: mpsc::Receiver<Bytes>,
}

impl Outlet {
    /// Joins a committed head with the streaming body.
    pub(crate) fn into_response(self, (status, headers): Head) -> http::Response<Body> {
        let mut res = http::Response::new(Body::channel(self.body));
        *res.status_mut() = status;
        *res.headers_mut() = headers;
        res
    }
}

impl ResponseWriter {
    pub(crate) fn new() -> (Self, Outlet) {
        let (head_tx, head_rx) = oneshot::channel();
        let (body_tx, body_rx) = mpsc::channel(CHANNEL_DEPTH);
        let writer = Self {
            status: None,
            headers: HeaderMap::new(),
            state: State::Pending { head: head_tx, body: body_tx },
        };
        (writer, Outlet { head: head_rx, body: body_rx })
    }

    /// The reply status: whatever was set explicitly, or what was committed.
    /// `None` until one of those happens.
    pub(crate) fn status(&self) -> Option<StatusCode> {
        self.status
    }

    pub(crate) fn is_committed(&self) -> bool {
        !matches!(self.state, State::Pending { .. })
    }

    pub(crate) fn set_status(&mut self, status: StatusCode) {
        if self.is_committed() {
            warn!(status = status.as_u16(), "status set after the response head was sent; ignored");
            return;
        }
        self.status = Some(status);
    }

    pub(crate) fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub(crate) fn set_header<K: IntoHeaderName>(&mut self, name: K, value: HeaderValue) {
        if self.is_committed() {
            warn!("header set after the response head was sent; ignored");
            return;
        }
        self.headers.insert(name, value);
    }

    /// Queues `data` on the body, committing the head first if needed.
    ///
    /// Large payloads go out in [`WRITE_CHUNK`] slices; the loop keeps going
    /// until every byte is queued or the receiving side has gone away.
    pub(crate) async fn write_all(&mut self, data: Bytes) -> Result<()> {
        self.commit()?;
        let State::Streaming { body } = &self.state else {
            return Err(finalized());
        };
        let mut written = 0;
        while written < data.len() {
            let end = usize::min(written + WRITE_CHUNK, data.len());
            body.send(data.slice(written..end)).await.map_err(|_| peer_gone())?;
            written = end;
        }
        Ok(())
    }

    /// Ends the response: commits the head if nothing was written (status
    /// defaults to `200`) and closes the body. Returns the final status.
    ///
    /// A response can be finalized once; a second call is an error.
    pub(crate) fn finish(&mut self) -> Result<StatusCode> {
        // the body sender is dropped with the old state, ending the stream
        match std::mem::replace(&mut self.state, State::Finished) {
            State::Finished => Err(finalized()),
            State::Pending { head, .. } => {
                let status = *self.status.get_or_insert(StatusCode::OK);
                if head.send((status, std::mem::take(&mut self.headers))).is_err() {
                    debug!(status = status.as_u16(), "response head not delivered; receiver dropped");
                }
                Ok(status)
            }
            State::Streaming { .. } => Ok(self.status.unwrap_or(StatusCode::OK)),
        }
    }

    fn commit(&mut self) -> Result<()> {
        match std::mem::replace(&mut self.state, State::Finished) {
            State::Pending { head, body } => {
                let status = *self.status.get_or_insert(StatusCode::OK);
                let headers = std::mem::take(&mut self.headers);
                self.state = State::Streaming { body };
                head.send((status, headers)).map_err(|_| peer_gone())
            }
            State::Streaming { body } => {
                self.state = State::Streaming { body };
                Ok(())
            }
            State::Finished => Err(finalized()),
        }
    }
}

fn peer_gone() -> Error {
    Error::Io(io::Error::new(io::ErrorKind::BrokenPipe, "response receiver dropped"))
}

fn finalized() -> Error {
    Error::internal("response already finalized")
}
