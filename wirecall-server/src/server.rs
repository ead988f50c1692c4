use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use std::fmt;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tracing::{debug, info, warn};
use wirecall_core::{Context, ErrorKind, RpcError};
use wirecall_transport::{is_hop_by_hop, Dispatcher};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Size of the pool that runs blocking handlers.
    pub worker_threads: usize,
    pub enable_cors: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 8080,
            worker_threads: 16,
            enable_cors: false,
        }
    }
}

impl ServerConfig {
    /// Defaults overridden by `WIRECALL_HOST`, `WIRECALL_PORT` and
    /// `WIRECALL_WORKERS`. Unparseable values are ignored with a warning.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = ServerConfig::default();
        if let Some(host) = lookup("WIRECALL_HOST") {
            config.host = host;
        }
        if let Some(port) = parse_var(&lookup, "WIRECALL_PORT") {
            config.port = port;
        }
        if let Some(workers) = parse_var(&lookup, "WIRECALL_WORKERS") {
            config.worker_threads = workers;
        }
        config
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_var<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(key, value = %raw, "ignoring unparseable configuration value");
            None
        }
    }
}

/// HTTP transport for a [`Dispatcher`]: `POST /rpc/{route}` with the context in
/// headers and the request body as the payload.
#[derive(Clone)]
pub struct Server {
    config: ServerConfig,
    dispatcher: Arc<dyn Dispatcher>,
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server").field("config", &self.config).finish()
    }
}

impl Server {
    pub fn new(config: ServerConfig, dispatcher: Arc<dyn Dispatcher>) -> Self {
        Server { config, dispatcher }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn router(&self) -> Router {
        let app = Router::new()
            .route("/rpc/{route}", post(handle_call))
            .route("/health", get(handle_health))
            .with_state(Arc::clone(&self.dispatcher));

        if self.config.enable_cors {
            app.layer(CorsLayer::permissive())
        } else {
            app
        }
    }

    pub async fn run(self) -> Result<(), std::io::Error> {
        let listener = TcpListener::bind(self.config.address()).await?;
        self.serve(listener).await
    }

    /// Serves on an already bound listener.
    pub async fn serve(self, listener: TcpListener) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        info!("Server listening on {}", addr);
        info!("  RPC endpoint: http://{}/rpc/{{route}}", addr);
        info!("  Health endpoint: http://{}/health", addr);

        axum::serve(listener, self.router()).await
    }
}

async fn handle_call(
    State(dispatcher): State<Arc<dyn Dispatcher>>,
    Path(route): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let context = headers_to_context(&headers);
    let body = if body.is_empty() { None } else { Some(body) };
    debug!(route = %route, request_id = context.request_id(), "http call");

    match dispatcher.call(&route, context, body).await {
        Ok((context, body)) => {
            let headers = context_to_headers(&context);
            (StatusCode::OK, headers, body.unwrap_or_default()).into_response()
        }
        Err(err) => {
            let status = status_for(&err);
            warn!(route = %route, %status, error = %err, "call rejected outside the envelope");
            (status, err.message().to_string()).into_response()
        }
    }
}

async fn handle_health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "endpoints": {
            "rpc": "/rpc/{route}",
            "health": "/health"
        }
    }))
}

pub fn status_for(err: &RpcError) -> StatusCode {
    match err.kind() {
        ErrorKind::Authentication => StatusCode::FORBIDDEN,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn headers_to_context(headers: &HeaderMap) -> Context {
    headers
        .iter()
        .filter(|(name, _)| !is_hop_by_hop(name.as_str()))
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect()
}

fn context_to_headers(context: &Context) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (name, value) in context.iter() {
        if is_hop_by_hop(name) {
            continue;
        }
        match (HeaderName::try_from(name), HeaderValue::try_from(value)) {
            (Ok(name), Ok(value)) => {
                headers.insert(name, value);
            }
            _ => debug!(header = name, "context entry is not a valid header; dropped"),
        }
    }
    headers
}
