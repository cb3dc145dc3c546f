//! Per-request HTTP context.

use std::sync::Arc;

use bytes::Bytes;
use http::header::{self, IntoHeaderName};
use http::{HeaderMap, HeaderValue, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{Span, warn};

use crate::error::{Error, Result};
use crate::request::Request;
use crate::response::{ContentType, ResponseWriter, WRITE_CHUNK};
use crate::stream::MessageStream;

/// Everything a handler sees of one HTTP request: the inbound [`Request`]
/// and the response being written.
///
/// One context exists per request and is never shared between requests.
/// It is created right before the middleware chain runs and dropped once
/// the response has been finalized.
pub struct Context {
    request: Request,
    writer: ResponseWriter,
    span: Span,
    stream: Option<Arc<dyn MessageStream>>,
}

impl Context {
    pub(crate) fn new(
        request: Request,
        writer: ResponseWriter,
        span: Span,
        stream: Option<Arc<dyn MessageStream>>,
    ) -> Self {
        Self { request, writer, span, stream }
    }

    pub fn request(&self) -> &Request { &self.request }
    pub fn request_mut(&mut self) -> &mut Request { &mut self.request }

    /// The span this request runs in, a child of the router's span.
    pub fn span(&self) -> &Span { &self.span }

    /// The message stream configured on the router, if any.
    pub fn message_stream(&self) -> Option<&Arc<dyn MessageStream>> {
        self.stream.as_ref()
    }

    /// Query-string parameter; see [`Request::param`].
    pub fn param(&self, key: &str) -> Option<&str> { self.request.param(key) }

    /// Named path capture; see [`Request::path_value`].
    pub fn path_value(&self, key: &str) -> Option<&str> { self.request.path_value(key) }

    /// Inbound header lookup; see [`Request::header`].
    pub fn header(&self, name: &str) -> Option<&str> { self.request.header(name) }

    /// Decodes the request body as JSON; see [`Request::parse_body`].
    pub fn parse_body<T: DeserializeOwned>(&self) -> Result<T> {
        self.request.parse_body()
    }

    /// Sets the reply status. Anything below `200` is raised to `200`, and a
    /// number outside the valid status range becomes `500`.
    ///
    /// Nothing is sent yet: the status line goes out with the first body
    /// write, so headers can still be added after this call.
    pub fn status(&mut self, code: u16) -> &mut Self {
        let status = StatusCode::from_u16(code.max(200))
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        self.writer.set_status(status);
        self
    }

    /// The status set so far; `None` while still unset.
    pub fn reply_status(&self) -> Option<StatusCode> {
        self.writer.status()
    }

    /// Sets a response header. Ignored once the head has been sent.
    pub fn set_header<K: IntoHeaderName>(&mut self, name: K, value: HeaderValue) -> &mut Self {
        self.writer.set_header(name, value);
        self
    }

    /// Serializes `data` as the JSON response body.
    ///
    /// A value that serializes to JSON `null` is rejected with
    /// [`Error::InvalidData`] before anything is written.
    pub async fn json<T: Serialize + ?Sized>(&mut self, data: &T) -> Result<()> {
        let body = serde_json::to_vec(data)?;
        if body == b"null" {
            return Err(Error::InvalidData);
        }
        self.write_body(ContentType::Json.as_str(), Bytes::from(body)).await
    }

    /// Sends `data` as `text/plain; charset=utf-8`.
    pub async fn send_string(&mut self, data: impl Into<String>) -> Result<()> {
        self.send_string_as(data, ContentType::Text.as_str()).await
    }

    /// Sends `data` with an explicit content type.
    pub async fn send_string_as(&mut self, data: impl Into<String>, content_type: &str) -> Result<()> {
        self.write_body(content_type, Bytes::from(data.into())).await
    }

    /// Sends an HTML document as `text/html; charset=utf-8`.
    pub async fn render_html(&mut self, html: impl Into<String>) -> Result<()> {
        self.send_string_as(html, ContentType::Html.as_str()).await
    }

    /// Sends raw bytes as `application/octet-stream`.
    pub async fn send_bytes(&mut self, data: impl Into<Bytes>) -> Result<()> {
        self.write_body(ContentType::OctetStream.as_str(), data.into()).await
    }

    /// Drains `reader` into the response body until EOF.
    pub async fn send_reader<R>(&mut self, mut reader: R, content_type: &str) -> Result<()>
    where
        R: AsyncRead + Unpin + Send,
    {
        self.stamp_content_type(content_type)?;
        let mut buf = vec![0u8; WRITE_CHUNK];
        loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                return Ok(());
            }
            self.writer.write_all(Bytes::copy_from_slice(&buf[..n])).await?;
        }
    }

    /// Reports `err` to the client: status `500` unless a status was already
    /// set, with the error's message as a plain-text body.
    ///
    /// When the body has already started streaming, the status can no
    /// longer change; the error is logged instead and nothing is written.
    pub async fn send_error(&mut self, err: &Error) -> Result<()> {
        if self.writer.is_committed() {
            warn!(error = %err, "handler failed after the response started; error not sent");
            return Ok(());
        }
        if self.writer.status().is_none() {
            self.writer.set_status(StatusCode::INTERNAL_SERVER_ERROR);
        }
        self.writer.set_header(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        );
        self.write_body(ContentType::Text.as_str(), Bytes::from(err.to_string())).await
    }

    async fn write_body(&mut self, content_type: &str, body: Bytes) -> Result<()> {
        self.stamp_content_type(content_type)?;
        self.writer.write_all(body).await
    }

    fn stamp_content_type(&mut self, content_type: &str) -> Result<()> {
        if !self.writer.is_committed() {
            let value = HeaderValue::from_str(content_type).map_err(|_| Error::InvalidData)?;
            self.writer.set_header(header::CONTENT_TYPE, value);
        }
        Ok(())
    }

    pub(crate) fn response_headers_mut(&mut self) -> &mut HeaderMap {
        self.writer.headers_mut()
    }

    pub(crate) fn finish(&mut self) -> Result<StatusCode> {
        self.writer.finish()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use http_body_util::BodyExt;
    use serde_json::json;

    use super::*;
    use crate::response::Outlet;

    fn context() -> (Context, Outlet) {
        let (parts, ()) = http::Request::builder()
            .uri("/items?page=2")
            .body(())
            .unwrap()
            .into_parts();
        let request = Request::new(parts, Bytes::new(), HashMap::new());
        let (writer, outlet) = ResponseWriter::new();
        (Context::new(request, writer, Span::none(), None), outlet)
    }

    async fn finish(mut ctx: Context, mut outlet: Outlet) -> (StatusCode, HeaderMap, Bytes) {
        ctx.finish().unwrap();
        let head = (&mut outlet.head).await.unwrap();
        let res = outlet.into_response(head);
        let (parts, body) = res.into_parts();
        (parts.status, parts.headers, body.collect().await.unwrap().to_bytes())
    }

    #[tokio::test]
    async fn status_below_200_is_raised() {
        let (mut ctx, _outlet) = context();
        ctx.status(101);
        assert_eq!(ctx.reply_status(), Some(StatusCode::OK));
        ctx.status(404);
        assert_eq!(ctx.reply_status(), Some(StatusCode::NOT_FOUND));
    }

    #[tokio::test]
    async fn json_sets_content_type_and_default_status() {
        let (mut ctx, outlet) = context();
        ctx.json(&json!({"name": "David", "age": 30})).await.unwrap();
        let (status, headers, body) = finish(ctx, outlet).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers[header::CONTENT_TYPE], "application/json");
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["name"], "David");
    }

    #[tokio::test]
    async fn json_null_is_rejected_without_writing() {
        let (mut ctx, outlet) = context();
        assert!(matches!(ctx.json(&()).await, Err(Error::InvalidData)));
        assert!(matches!(ctx.json(&None::<u8>).await, Err(Error::InvalidData)));
        assert_eq!(ctx.reply_status(), None);
        let (_, headers, body) = finish(ctx, outlet).await;
        assert!(body.is_empty());
        assert!(headers.get(header::CONTENT_TYPE).is_none());
    }

    #[tokio::test]
    async fn headers_can_follow_status() {
        let (mut ctx, outlet) = context();
        ctx.status(201).set_header("x-request-id", HeaderValue::from_static("abc"));
        ctx.send_string("ok").await.unwrap();
        let (status, headers, body) = finish(ctx, outlet).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(headers["x-request-id"], "abc");
        assert_eq!(headers[header::CONTENT_TYPE], "text/plain; charset=utf-8");
        assert_eq!(body, "ok");
    }

    #[tokio::test]
    async fn send_error_defaults_to_500_but_keeps_a_set_status() {
        let (mut ctx, outlet) = context();
        ctx.send_error(&Error::internal("db down")).await.unwrap();
        let (status, _, body) = finish(ctx, outlet).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, "db down");

        let (mut ctx, outlet) = context();
        ctx.status(409);
        ctx.send_error(&Error::internal("taken")).await.unwrap();
        let (status, _, body) = finish(ctx, outlet).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body, "taken");
    }

    #[tokio::test]
    async fn send_reader_drains_the_source() {
        let (mut ctx, mut outlet) = context();
        let payload = vec![7u8; WRITE_CHUNK * 2 + 3];
        let expected = payload.clone();
        let task = tokio::spawn(async move {
            ctx.send_reader(&payload[..], "application/x-test").await.unwrap();
            ctx
        });
        let head = (&mut outlet.head).await.unwrap();
        let res = outlet.into_response(head);
        let mut ctx = task.await.unwrap();
        ctx.finish().unwrap();
        assert_eq!(res.headers()[header::CONTENT_TYPE], "application/x-test");
        assert_eq!(res.into_body().collect().await.unwrap().to_bytes(), expected);
    }

    #[tokio::test]
    async fn render_html_and_bytes_pick_their_content_types() {
        let (mut ctx, outlet) = context();
        ctx.render_html("<p>hi</p>").await.unwrap();
        let (_, headers, _) = finish(ctx, outlet).await;
        assert_eq!(headers[header::CONTENT_TYPE], "text/html; charset=utf-8");

        let (mut ctx, outlet) = context();
        ctx.send_bytes(vec![1u8, 2, 3]).await.unwrap();
        let (_, headers, body) = finish(ctx, outlet).await;
        assert_eq!(headers[header::CONTENT_TYPE], "application/octet-stream");
        assert_eq!(&body[..], &[1, 2, 3]);
    }
}
