//! Minimal kumo example: JSON endpoints, a JWT-guarded group, and an echo
//! WebSocket.
//!
//! Run with:
//!   cargo run --example basic
//!
//! Try:
//!   curl http://localhost:3000/users/42
//!   curl -X POST http://localhost:3000/users \
//!        -H 'content-type: application/json' \
//!        -d '{"name":"alice"}'
//!   curl -H "Authorization: Bearer $TOKEN" http://localhost:3000/admin/whoami
//!   websocat ws://localhost:3000/echo

use kumo::stream::MemoryStream;
use kumo::websocket::Message;
use kumo::{BoxFuture, Context, Result, Router, SocketContext, middleware};
use serde::{Deserialize, Serialize};

#[derive(Deserialize, Serialize)]
struct User {
    id: String,
    name: String,
}

#[derive(Deserialize)]
struct NewUser {
    name: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let mut app = Router::new()
        .with_default_cors()
        .with_logging()
        .with_message_stream(MemoryStream::new());

    app.get("/users/{id}", get_user)?
        .post("/users", create_user)?
        .delete("/users/{id}", delete_user)?
        .websocket("/echo", echo)?;

    let mut admin = app.group("/admin");
    admin.use_middleware(middleware::jwt("my_secret_key"));
    admin.get("/whoami", whoami)?;

    app.run("0.0.0.0:3000").await
}

// GET /users/{id}
fn get_user(ctx: &mut Context) -> BoxFuture<'_, Result<()>> {
    Box::pin(async move {
        let id = ctx.path_value("id").unwrap_or("unknown").to_owned();
        ctx.json(&User { id, name: "alice".into() }).await
    })
}

// POST /users → 201, and a note to sibling instances
fn create_user(ctx: &mut Context) -> BoxFuture<'_, Result<()>> {
    Box::pin(async move {
        let input: NewUser = ctx.parse_body()?;
        if let Some(stream) = ctx.message_stream() {
            stream.post_message("users", &format!("created {}", input.name)).await?;
        }
        ctx.status(201)
            .set_header(http::header::LOCATION, http::HeaderValue::from_static("/users/99"));
        ctx.json(&User { id: "99".into(), name: input.name }).await
    })
}

// DELETE /users/{id} → 204 No Content
fn delete_user(ctx: &mut Context) -> BoxFuture<'_, Result<()>> {
    Box::pin(async move {
        ctx.status(204);
        Ok(())
    })
}

// GET /admin/whoami: claims from the token arrive as headers
fn whoami(ctx: &mut Context) -> BoxFuture<'_, Result<()>> {
    Box::pin(async move {
        let role = ctx.header("role").unwrap_or("anonymous").to_owned();
        ctx.send_string(role).await
    })
}

async fn echo(mut ctx: SocketContext) -> Result<()> {
    while let Some(msg) = ctx.recv().await {
        match msg? {
            Message::Close(_) => break,
            msg @ (Message::Text(_) | Message::Binary(_)) => ctx.send(msg).await?,
            _ => {}
        }
    }
    Ok(())
}
