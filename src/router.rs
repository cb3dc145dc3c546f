//! Route tables, groups and router-wide settings.
//!
//! Paths are matched with a radix tree ([`matchit`]), O(path-length). Each
//! distinct pattern owns one entry holding its per-method handlers and an
//! optional WebSocket handler, so a path that exists under another method
//! can be told apart from a path that does not exist at all (405 vs 404).
//!
//! A [`Group`] registers into its own table, mounted under the group
//! prefix. Lookup collects every table that knows the path, mounted tables
//! longest prefix first and the root table last; the dispatcher takes the
//! first one with a route for the request method.
//!
//! Registration is a startup activity. Everything a route needs at
//! dispatch time (middleware chain, CORS mode, logging flag, span, message
//! stream) is captured when the route is registered: configure the router
//! first, then add routes.

use std::collections::HashMap;
use std::sync::Arc;

use matchit::Router as MatchitRouter;
use tracing::{Span, info_span, warn};

use crate::error::{Error, Result};
use crate::handler::{BoxedHandler, BoxedSocketHandler, Handler, SocketHandler};
use crate::method::Method;
use crate::middleware::{BoxedMiddleware, Chain, Cors, Middleware};
use crate::server::Server;
use crate::stream::MessageStream;
use crate::stream::redis::RedisStream;

/// Router-wide configuration, snapshotted into every route at registration.
#[derive(Clone)]
pub(crate) struct Settings {
    pub(crate) cors: Cors,
    pub(crate) logging: bool,
    pub(crate) span: Span,
    pub(crate) stream: Option<Arc<dyn MessageStream>>,
}

impl Default for Settings {
    fn default() -> Self {
        Self { cors: Cors::Off, logging: false, span: info_span!("kumo"), stream: None }
    }
}

/// One registered HTTP route.
pub(crate) struct Route {
    pub(crate) pattern: String,
    pub(crate) handler: BoxedHandler,
    pub(crate) chain: Chain,
    pub(crate) settings: Arc<Settings>,
}

/// One registered WebSocket route.
pub(crate) struct SocketRoute {
    pub(crate) pattern: String,
    pub(crate) handler: BoxedSocketHandler,
    pub(crate) chain: Chain,
    pub(crate) settings: Arc<Settings>,
}

/// Everything registered under one pattern.
#[derive(Default)]
pub(crate) struct Entry {
    pub(crate) methods: HashMap<Method, Arc<Route>>,
    pub(crate) socket: Option<Arc<SocketRoute>>,
}

impl Entry {
    /// Every route's settings, the socket route first and then methods in
    /// [`Method`] order.
    fn settings(&self) -> impl Iterator<Item = &Arc<Settings>> {
        let mut methods: Vec<_> = self.methods.iter().collect();
        methods.sort_unstable_by_key(|(m, _)| **m);
        self.socket
            .iter()
            .map(|s| &s.settings)
            .chain(methods.into_iter().map(|(_, r)| &r.settings))
    }

    /// The CORS policy of the first route on this path that has one enabled.
    pub(crate) fn cors(&self) -> Option<&Cors> {
        self.settings().map(|s| &s.cors).find(|c| c.is_enabled())
    }
}

/// An entry matching a request path, with its captures.
pub(crate) struct Resolved<'a> {
    pub(crate) entry: &'a Entry,
    pub(crate) params: HashMap<String, String>,
}

#[derive(Default)]
struct RouteTable {
    paths: MatchitRouter<usize>,
    patterns: HashMap<String, usize>,
    entries: Vec<Entry>,
}

impl RouteTable {
    fn entry_mut(&mut self, pattern: &str) -> Result<&mut Entry> {
        let idx = match self.patterns.get(pattern) {
            Some(&idx) => idx,
            None => {
                let idx = self.entries.len();
                self.paths
                    .insert(pattern, idx)
                    .map_err(|e| Error::invalid_path(pattern, e.to_string()))?;
                self.patterns.insert(pattern.to_owned(), idx);
                self.entries.push(Entry::default());
                idx
            }
        };
        Ok(&mut self.entries[idx])
    }

    fn at(&self, path: &str) -> Option<Resolved<'_>> {
        let matched = self.paths.at(path).ok()?;
        let params = matched
            .params
            .iter()
            .map(|(k, v)| (k.to_owned(), v.to_owned()))
            .collect();
        Some(Resolved { entry: &self.entries[*matched.value], params })
    }

    fn add(&mut self, method: Method, route: Route) -> Result<()> {
        let pattern = route.pattern.clone();
        let entry = self.entry_mut(&pattern)?;
        if entry.methods.insert(method, Arc::new(route)).is_some() {
            warn!(%method, pattern = %pattern, "route registered twice; the later handler wins");
        }
        Ok(())
    }

    fn add_socket(&mut self, route: SocketRoute) -> Result<()> {
        let pattern = route.pattern.clone();
        let entry = self.entry_mut(&pattern)?;
        if entry.socket.replace(Arc::new(route)).is_some() {
            warn!(pattern = %pattern, "websocket route registered twice; the later handler wins");
        }
        Ok(())
    }
}

/// A group table mounted under its prefix. Patterns inside are full paths.
struct Mount {
    prefix: String,
    table: RouteTable,
}

fn check_pattern(pattern: &str) -> Result<()> {
    if pattern.starts_with('/') {
        Ok(())
    } else {
        Err(Error::invalid_path(pattern, "pattern must start with `/`"))
    }
}

/// The application router.
///
/// ```rust,no_run
/// use kumo::{BoxFuture, Context, Result, Router};
///
/// fn get_user(ctx: &mut Context) -> BoxFuture<'_, Result<()>> {
///     Box::pin(async move {
///         let id = ctx.path_value("id").unwrap_or("unknown").to_owned();
///         ctx.send_string(id).await
///     })
/// }
///
/// # async fn run() -> Result<()> {
/// let mut app = Router::new().with_default_cors().with_logging();
/// app.get("/users/{id}", get_user)?;
/// app.run("0.0.0.0:3000").await
/// # }
/// ```
pub struct Router {
    settings: Arc<Settings>,
    middlewares: Vec<BoxedMiddleware>,
    root: RouteTable,
    /// Longest prefix first.
    mounts: Vec<Mount>,
}

impl Router {
    pub fn new() -> Self {
        Self {
            settings: Arc::new(Settings::default()),
            middlewares: Vec::new(),
            root: RouteTable::default(),
            mounts: Vec::new(),
        }
    }

    /// Answers every request with the default CORS headers, and `OPTIONS`
    /// requests as preflights. See [`Cors`].
    pub fn with_default_cors(mut self) -> Self {
        Arc::make_mut(&mut self.settings).cors = Cors::Default;
        self
    }

    /// Like [`with_default_cors`](Self::with_default_cors) with caller-chosen
    /// header and method lists. Replaces any earlier CORS choice.
    pub fn with_custom_cors<H, M>(mut self, headers: H, methods: M) -> Self
    where
        H: IntoIterator,
        H::Item: Into<String>,
        M: IntoIterator,
        M::Item: Into<String>,
    {
        Arc::make_mut(&mut self.settings).cors = Cors::custom(headers, methods);
        self
    }

    /// Emits one `info` line per finished request.
    pub fn with_logging(mut self) -> Self {
        Arc::make_mut(&mut self.settings).logging = true;
        self
    }

    /// Replaces the span requests are logged under (default: `kumo`).
    pub fn with_span(mut self, span: Span) -> Self {
        Arc::make_mut(&mut self.settings).span = span;
        self
    }

    /// Hands `stream` to every handler through
    /// [`Context::message_stream`](crate::Context::message_stream).
    pub fn with_message_stream(mut self, stream: impl MessageStream + 'static) -> Self {
        Arc::make_mut(&mut self.settings).stream = Some(Arc::new(stream));
        self
    }

    /// Connects a [`RedisStream`] and uses it as the message stream.
    ///
    /// `url` is a `redis://` URL or a bare `host:port`; `service_id` names
    /// this instance within the consumer group.
    pub async fn with_redis_stream(self, url: &str, service_id: &str) -> Result<Self> {
        let stream = RedisStream::connect(url, service_id).await?;
        Ok(self.with_message_stream(stream))
    }

    /// The router's span, parent of every request span.
    pub fn span(&self) -> &Span {
        &self.settings.span
    }

    pub fn message_stream(&self) -> Option<&Arc<dyn MessageStream>> {
        self.settings.stream.as_ref()
    }

    /// Appends a router-wide middleware. Routes registered before this call
    /// keep the chain they were registered with.
    pub fn use_middleware(&mut self, middleware: impl Middleware) -> &mut Self {
        self.middlewares.push(Arc::new(middleware));
        self
    }

    /// Opens a group of routes sharing `prefix`.
    ///
    /// # Panics
    ///
    /// Panics if `prefix` does not start with `/`: a group prefix is fixed
    /// program structure, not input.
    pub fn group(&mut self, prefix: &str) -> Group<'_> {
        assert!(prefix.starts_with('/'), "invalid group prefix `{prefix}`: must start with `/`");
        self.mount(prefix);
        Group { router: self, prefix: prefix.to_owned(), middlewares: Vec::new() }
    }

    /// Registers `handler` for `method` and `pattern`. Returns `self` for chaining.
    ///
    /// Captures use `{name}` syntax and `{*rest}` for a trailing catch-all.
    /// Registering the same method and pattern twice keeps the later handler.
    pub fn on(&mut self, method: Method, pattern: &str, handler: impl Handler) -> Result<&mut Self> {
        self.route(method, pattern, Some(Arc::new(handler)))
    }

    /// [`on`](Self::on) for handlers assembled at runtime. `None` is
    /// rejected with [`Error::NullHandler`].
    pub fn route(
        &mut self,
        method: Method,
        pattern: &str,
        handler: Option<BoxedHandler>,
    ) -> Result<&mut Self> {
        self.register(None, &[], method, pattern, handler)?;
        Ok(self)
    }

    pub fn get(&mut self, pattern: &str, handler: impl Handler) -> Result<&mut Self> {
        self.on(Method::Get, pattern, handler)
    }

    pub fn post(&mut self, pattern: &str, handler: impl Handler) -> Result<&mut Self> {
        self.on(Method::Post, pattern, handler)
    }

    pub fn put(&mut self, pattern: &str, handler: impl Handler) -> Result<&mut Self> {
        self.on(Method::Put, pattern, handler)
    }

    pub fn delete(&mut self, pattern: &str, handler: impl Handler) -> Result<&mut Self> {
        self.on(Method::Delete, pattern, handler)
    }

    pub fn patch(&mut self, pattern: &str, handler: impl Handler) -> Result<&mut Self> {
        self.on(Method::Patch, pattern, handler)
    }

    pub fn options(&mut self, pattern: &str, handler: impl Handler) -> Result<&mut Self> {
        self.on(Method::Options, pattern, handler)
    }

    /// Registers a WebSocket endpoint. The router-wide middleware runs on
    /// the upgrade request before `handler` receives the connection.
    pub fn websocket(&mut self, pattern: &str, handler: impl SocketHandler) -> Result<&mut Self> {
        self.register_socket(None, &[], pattern, handler.into_boxed_handler())?;
        Ok(self)
    }

    /// Binds `addr` and serves until SIGTERM or Ctrl-C.
    pub async fn run(self, addr: &str) -> Result<()> {
        Server::bind(addr).await?.serve(self).await
    }

    fn register(
        &mut self,
        prefix: Option<&str>,
        group: &[BoxedMiddleware],
        method: Method,
        pattern: &str,
        handler: Option<BoxedHandler>,
    ) -> Result<()> {
        check_pattern(pattern)?;
        let full = format!("{}{pattern}", prefix.unwrap_or(""));
        let handler = handler.ok_or_else(|| Error::NullHandler(full.clone()))?;
        let route = Route {
            chain: Chain::new(&self.middlewares, group),
            settings: Arc::clone(&self.settings),
            pattern: full,
            handler,
        };
        self.table_mut(prefix).add(method, route)
    }

    fn register_socket(
        &mut self,
        prefix: Option<&str>,
        group: &[BoxedMiddleware],
        pattern: &str,
        handler: BoxedSocketHandler,
    ) -> Result<()> {
        check_pattern(pattern)?;
        let route = SocketRoute {
            pattern: format!("{}{pattern}", prefix.unwrap_or("")),
            chain: Chain::new(&self.middlewares, group),
            settings: Arc::clone(&self.settings),
            handler,
        };
        self.table_mut(prefix).add_socket(route)
    }

    fn mount(&mut self, prefix: &str) {
        if self.mounts.iter().any(|m| m.prefix == prefix) {
            return;
        }
        self.mounts.push(Mount { prefix: prefix.to_owned(), table: RouteTable::default() });
        self.mounts.sort_by(|a, b| b.prefix.len().cmp(&a.prefix.len()));
    }

    fn table_mut(&mut self, prefix: Option<&str>) -> &mut RouteTable {
        match prefix.and_then(|p| self.mounts.iter().position(|m| m.prefix == p)) {
            Some(idx) => &mut self.mounts[idx].table,
            None => &mut self.root,
        }
    }

    /// Every entry matching `path`, in lookup order. Empty means 404.
    pub(crate) fn resolve(&self, path: &str) -> Vec<Resolved<'_>> {
        self.mounts
            .iter()
            .filter(|m| path.starts_with(&m.prefix))
            .filter_map(|m| m.table.at(path))
            .chain(self.root.at(path))
            .collect()
    }
}

impl Default for Router {
    fn default() -> Self { Self::new() }
}

/// Routes registered under a shared prefix, with their own middleware.
///
/// Group middleware runs after the router-wide middleware. Nested groups
/// concatenate prefixes and inherit the enclosing group's middleware.
pub struct Group<'r> {
    router: &'r mut Router,
    prefix: String,
    middlewares: Vec<BoxedMiddleware>,
}

impl Group<'_> {
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Appends a middleware for routes registered on this group from now on.
    pub fn use_middleware(&mut self, middleware: impl Middleware) -> &mut Self {
        self.middlewares.push(Arc::new(middleware));
        self
    }

    /// Opens a nested group under `self.prefix() + prefix`.
    ///
    /// # Panics
    ///
    /// Panics if `prefix` does not start with `/`.
    pub fn group(&mut self, prefix: &str) -> Group<'_> {
        assert!(prefix.starts_with('/'), "invalid group prefix `{prefix}`: must start with `/`");
        let prefix = format!("{}{prefix}", self.prefix);
        self.router.mount(&prefix);
        Group { router: &mut *self.router, prefix, middlewares: self.middlewares.clone() }
    }

    pub fn on(&mut self, method: Method, pattern: &str, handler: impl Handler) -> Result<&mut Self> {
        self.route(method, pattern, Some(Arc::new(handler)))
    }

    pub fn route(
        &mut self,
        method: Method,
        pattern: &str,
        handler: Option<BoxedHandler>,
    ) -> Result<&mut Self> {
        self.router.register(Some(&self.prefix), &self.middlewares, method, pattern, handler)?;
        Ok(self)
    }

    pub fn get(&mut self, pattern: &str, handler: impl Handler) -> Result<&mut Self> {
        self.on(Method::Get, pattern, handler)
    }

    pub fn post(&mut self, pattern: &str, handler: impl Handler) -> Result<&mut Self> {
        self.on(Method::Post, pattern, handler)
    }

    pub fn put(&mut self, pattern: &str, handler: impl Handler) -> Result<&mut Self> {
        self.on(Method::Put, pattern, handler)
    }

    pub fn delete(&mut self, pattern: &str, handler: impl Handler) -> Result<&mut Self> {
        self.on(Method::Delete, pattern, handler)
    }

    pub fn patch(&mut self, pattern: &str, handler: impl Handler) -> Result<&mut Self> {
        self.on(Method::Patch, pattern, handler)
    }

    pub fn options(&mut self, pattern: &str, handler: impl Handler) -> Result<&mut Self> {
        self.on(Method::Options, pattern, handler)
    }

    pub fn websocket(&mut self, pattern: &str, handler: impl SocketHandler) -> Result<&mut Self> {
        let handler = handler.into_boxed_handler();
        self.router.register_socket(Some(&self.prefix), &self.middlewares, pattern, handler)?;
        Ok(self)
    }
}
