use std::sync::atomic::{AtomicUsize, Ordering};

use http::{HeaderMap, StatusCode, header};
use http_body_util::BodyExt;
use kumo::stream::MemoryStream;
use kumo::{BoxFuture, BoxedHandler, Context, Error, Handler, Method, Result, Router, SocketContext};
use serde::{Deserialize, Serialize};
use serde_json::json;

async fn send(app: &Router, req: http::Request<String>) -> (StatusCode, HeaderMap, String) {
    let res = app.handle(req).await;
    let (parts, body) = res.into_parts();
    let body = body.collect().await.unwrap().to_bytes();
    (parts.status, parts.headers, String::from_utf8(body.to_vec()).unwrap())
}

fn get(uri: &str) -> http::Request<String> {
    http::Request::get(uri).body(String::new()).unwrap()
}

fn hello(ctx: &mut Context) -> BoxFuture<'_, Result<()>> {
    Box::pin(async move { ctx.status(200).send_string("Hello, world!").await })
}

fn saved(ctx: &mut Context) -> BoxFuture<'_, Result<()>> {
    Box::pin(async move { ctx.send_string("OK").await })
}

fn silent(_ctx: &mut Context) -> BoxFuture<'_, Result<()>> {
    Box::pin(async { Ok(()) })
}

fn second(ctx: &mut Context) -> BoxFuture<'_, Result<()>> {
    Box::pin(async move { ctx.send_string("second").await })
}

#[tokio::test]
async fn registered_route_reaches_its_handler() {
    let mut app = Router::new();
    app.get("/world", hello).unwrap();

    let (status, headers, body) = send(&app, get("/world")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers[header::CONTENT_TYPE], "text/plain; charset=utf-8");
    assert_eq!(body, "Hello, world!");
}

#[tokio::test]
async fn other_method_on_known_path_is_405() {
    let mut app = Router::new();
    app.post("/save", saved).unwrap();

    let (status, headers, _) = send(&app, get("/save")).await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(headers[header::ALLOW], "POST");

    // method names are case-sensitive: `Get` is not GET
    let req = http::Request::builder()
        .method(http::Method::from_bytes(b"Get").unwrap())
        .uri("/save")
        .body(String::new())
        .unwrap();
    assert_eq!(send(&app, req).await.0, StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn unknown_path_is_404() {
    let mut app = Router::new();
    app.post("/save", saved).unwrap();

    let req = http::Request::post("/save1").body(String::new()).unwrap();
    let (status, _, body) = send(&app, req).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body, "Not Found");
}

#[tokio::test]
async fn silent_handler_answers_200_with_empty_body() {
    let mut app = Router::new();
    app.delete("/items/{id}", silent).unwrap();

    let req = http::Request::delete("/items/3").body(String::new()).unwrap();
    let (status, _, body) = send(&app, req).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.is_empty());
}

fn show_user(ctx: &mut Context) -> BoxFuture<'_, Result<()>> {
    Box::pin(async move {
        let id = ctx.path_value("id").unwrap_or_default().to_owned();
        let fields = ctx.param("fields").unwrap_or("all").to_owned();
        ctx.json(&json!({ "id": id, "fields": fields })).await
    })
}

#[tokio::test]
async fn captures_and_query_reach_the_handler() {
    let mut app = Router::new();
    app.get("/users/{id}", show_user).unwrap();

    let (status, headers, body) = send(&app, get("/users/42?fields=name%2Cemail")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers[header::CONTENT_TYPE], "application/json");
    let value: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(value, json!({ "id": "42", "fields": "name,email" }));
}

#[derive(Deserialize, Serialize)]
struct Person {
    name: String,
    age: u32,
}

fn older(ctx: &mut Context) -> BoxFuture<'_, Result<()>> {
    Box::pin(async move {
        let mut person: Person = ctx.parse_body()?;
        person.age += 1;
        ctx.status(201).json(&person).await
    })
}

#[tokio::test]
async fn json_body_round_trips_through_a_handler() {
    let mut app = Router::new();
    app.post("/people", older).unwrap();

    let req = http::Request::post("/people")
        .body(r#"{"name":"David","age":30}"#.to_owned())
        .unwrap();
    let (status, _, body) = send(&app, req).await;
    assert_eq!(status, StatusCode::CREATED);
    let person: Person = serde_json::from_str(&body).unwrap();
    assert_eq!((person.name.as_str(), person.age), ("David", 31));
}

#[tokio::test]
async fn empty_body_is_invalid_data() {
    let mut app = Router::new();
    app.post("/people", older).unwrap();

    let req = http::Request::post("/people").body(String::new()).unwrap();
    let (status, _, body) = send(&app, req).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, "Invalid data");
}

fn failing(_ctx: &mut Context) -> BoxFuture<'_, Result<()>> {
    Box::pin(async { Err(Error::internal("db down")) })
}

fn conflict(ctx: &mut Context) -> BoxFuture<'_, Result<()>> {
    Box::pin(async move {
        ctx.status(409);
        Err(Error::internal("name taken"))
    })
}

#[tokio::test]
async fn handler_errors_become_500_unless_a_status_was_set() {
    let mut app = Router::new();
    app.get("/fail", failing).unwrap().get("/conflict", conflict).unwrap();

    let (status, headers, body) = send(&app, get("/fail")).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(headers[header::X_CONTENT_TYPE_OPTIONS], "nosniff");
    assert_eq!(body, "db down");

    let (status, _, body) = send(&app, get("/conflict")).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body, "name taken");
}

#[tokio::test]
async fn groups_answer_only_under_their_prefix() {
    let mut app = Router::new();
    app.group("/v1").get("/world", hello).unwrap();

    assert_eq!(send(&app, get("/v1/world")).await.0, StatusCode::OK);
    assert_eq!(send(&app, get("/world")).await.0, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn nested_groups_concatenate_prefixes() {
    let mut app = Router::new();
    app.get("/v1/status", saved).unwrap();
    {
        let mut v1 = app.group("/v1");
        v1.post("/users", saved).unwrap();
        v1.group("/admin").get("/stats", hello).unwrap();
    }

    assert_eq!(send(&app, get("/v1/admin/stats")).await.2, "Hello, world!");
    // known to the group table under another method
    assert_eq!(send(&app, get("/v1/users")).await.0, StatusCode::METHOD_NOT_ALLOWED);
    // not in any group table: the root table still answers
    assert_eq!(send(&app, get("/v1/status")).await.2, "OK");
}

#[tokio::test]
async fn root_route_stays_reachable_beside_a_group_on_the_same_path() {
    let mut app = Router::new();
    app.post("/v1/users", saved).unwrap();
    app.group("/v1").get("/users", hello).unwrap();

    let req = http::Request::post("/v1/users").body(String::new()).unwrap();
    let (status, _, body) = send(&app, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "OK");
    assert_eq!(send(&app, get("/v1/users")).await.2, "Hello, world!");

    // no table has PUT: 405 lists every method the path knows
    let req = http::Request::put("/v1/users").body(String::new()).unwrap();
    let (status, headers, _) = send(&app, req).await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(headers[header::ALLOW], "GET, POST");
}

#[tokio::test]
async fn shorter_group_answers_methods_the_longer_one_lacks() {
    let mut app = Router::new();
    app.group("/api").delete("/v2/items", saved).unwrap();
    app.group("/api").group("/v2").get("/items", hello).unwrap();

    let req = http::Request::delete("/api/v2/items").body(String::new()).unwrap();
    assert_eq!(send(&app, req).await.2, "OK");
    assert_eq!(send(&app, get("/api/v2/items")).await.2, "Hello, world!");
}

#[test]
fn registration_errors_are_returned_immediately() {
    let mut app = Router::new();
    assert!(matches!(app.get("world", hello), Err(Error::InvalidPath { .. })));
    assert!(matches!(
        app.route(Method::Get, "/world", None),
        Err(Error::NullHandler(_)),
    ));

    let boxed: BoxedHandler = std::sync::Arc::new(hello);
    assert!(app.route(Method::Get, "/world", Some(boxed)).is_ok());

    let mut group = app.group("/v1");
    assert!(matches!(group.post("save", saved), Err(Error::InvalidPath { .. })));
}

#[tokio::test]
async fn re_registration_keeps_the_later_handler() {
    let mut app = Router::new();
    app.get("/dup", saved).unwrap();
    app.get("/dup", second).unwrap();
    assert_eq!(send(&app, get("/dup")).await.2, "second");
}

struct Counter(AtomicUsize);

impl Handler for Counter {
    fn call<'a>(&'a self, ctx: &'a mut Context) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let n = self.0.fetch_add(1, Ordering::SeqCst) + 1;
            ctx.send_string(n.to_string()).await
        })
    }
}

#[tokio::test]
async fn stateful_handlers_are_shared_across_requests() {
    let mut app = Router::new();
    app.get("/hits", Counter(AtomicUsize::new(0))).unwrap();

    assert_eq!(send(&app, get("/hits")).await.2, "1");
    assert_eq!(send(&app, get("/hits")).await.2, "2");
}

fn big(ctx: &mut Context) -> BoxFuture<'_, Result<()>> {
    Box::pin(async move { ctx.send_bytes(vec![b'k'; 1 << 20]).await })
}

#[tokio::test]
async fn large_bodies_stream_in_full() {
    let mut app = Router::new();
    app.get("/big", big).unwrap();

    let (status, headers, body) = send(&app, get("/big")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers[header::CONTENT_TYPE], "application/octet-stream");
    assert_eq!(body.len(), 1 << 20);
    assert!(body.bytes().all(|b| b == b'k'));
}

fn page(ctx: &mut Context) -> BoxFuture<'_, Result<()>> {
    Box::pin(async move { ctx.render_html("<h1>kumo</h1>").await })
}

#[tokio::test]
async fn html_is_sent_as_text_html() {
    let mut app = Router::new();
    app.get("/", page).unwrap();

    let (_, headers, body) = send(&app, get("/")).await;
    assert_eq!(headers[header::CONTENT_TYPE], "text/html; charset=utf-8");
    assert_eq!(body, "<h1>kumo</h1>");
}

async fn quiet_socket(_ctx: SocketContext) -> Result<()> {
    Ok(())
}

#[tokio::test]
async fn plain_request_to_a_socket_route_is_426() {
    let mut app = Router::new();
    app.websocket("/live", quiet_socket).unwrap();

    let (status, headers, _) = send(&app, get("/live")).await;
    assert_eq!(status, StatusCode::UPGRADE_REQUIRED);
    assert_eq!(headers[header::UPGRADE], "websocket");
}

fn publish(ctx: &mut Context) -> BoxFuture<'_, Result<()>> {
    Box::pin(async move {
        let Some(stream) = ctx.message_stream().cloned() else {
            return Err(Error::internal("no stream"));
        };
        stream.post_message("orders", "order-created").await
    })
}

fn drain(ctx: &mut Context) -> BoxFuture<'_, Result<()>> {
    Box::pin(async move {
        let Some(stream) = ctx.message_stream().cloned() else {
            return Err(Error::internal("no stream"));
        };
        let batch = stream.read_message_stream().await?;
        let payloads: Vec<_> = batch.into_iter().map(|m| m.payload).collect();
        ctx.json(&payloads).await
    })
}

#[tokio::test]
async fn handlers_share_the_router_message_stream() {
    let mut app = Router::new().with_message_stream(MemoryStream::new());
    app.post("/publish", publish).unwrap().get("/drain", drain).unwrap();
    assert!(app.message_stream().is_some());

    for _ in 0..2 {
        let req = http::Request::post("/publish").body(String::new()).unwrap();
        assert_eq!(send(&app, req).await.0, StatusCode::OK);
    }
    let (_, _, body) = send(&app, get("/drain")).await;
    assert_eq!(body, r#"["order-created","order-created"]"#);
    assert_eq!(send(&app, get("/drain")).await.2, "[]");
}
