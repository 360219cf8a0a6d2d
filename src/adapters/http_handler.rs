use axum::{
    Json, Router,
    body::Bytes,
    extract::{
        Query, RawQuery, State,
        ws::{WebSocketUpgrade, rejection::WebSocketUpgradeRejection},
    },
    http::{HeaderMap, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{any, get},
};
use serde::Deserialize;
use serde_json::json;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{
    adapters::ws_client::client_channel,
    core::{
        forward::{ForwardError, ForwardService},
        registry::RelayRegistry,
        session::{SessionAcceptor, SessionError, SessionParams},
    },
};

/// Raw session query; validated by [`SessionParams::parse`].
#[derive(Debug, Default, Deserialize)]
pub struct SessionQuery {
    pub appid: Option<String>,
    pub url: Option<String>,
}

/// HTTP surface of the gateway: session upgrades, one-shot forwarding and health.
#[derive(Clone)]
pub struct HttpHandler {
    acceptor: SessionAcceptor,
    forward: ForwardService,
}

impl HttpHandler {
    pub fn new(acceptor: SessionAcceptor, forward: ForwardService) -> Self {
        Self { acceptor, forward }
    }

    pub fn registry(&self) -> &RelayRegistry {
        self.acceptor.registry()
    }

    /// Build the axum router serving every endpoint.
    pub fn router(self) -> Router {
        Router::new()
            .route("/", get(handle_root))
            .route("/ws", get(handle_ws))
            .route("/proxy", any(handle_proxy))
            .route("/health", get(handle_health))
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
            .with_state(self)
    }

    /// Validate the query, then hand the upgraded socket to the acceptor.
    fn upgrade(&self, query: SessionQuery, ws: WebSocketUpgrade) -> Response {
        let params = match SessionParams::parse(query.appid.as_deref(), query.url.as_deref()) {
            Ok(params) => params,
            Err(e) => return session_error_response(&e),
        };

        tracing::info!(
            app.id = %params.app_id,
            upstream.url = %params.target,
            "Session upgrade requested"
        );
        let acceptor = self.acceptor.clone();
        ws.on_upgrade(move |socket| async move {
            if let Err(e) = acceptor.accept(params, client_channel(socket)).await {
                tracing::warn!("Session not established: {}", e);
            }
        })
    }

    async fn health(&self) -> serde_json::Value {
        let registry = self.registry();
        json!({
            "status": "ok",
            "connections": registry.instance_count().await,
            "applications": registry.identity_count(),
            "appids": registry.identities().await,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        })
    }

    fn info() -> serde_json::Value {
        json!({
            "service": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
            "endpoints": {
                "websocket": "/ws?appid=<appid>&url=<ws(s)://upstream>",
                "proxy": "/proxy?url=<http(s)://target>",
                "health": "/health",
            },
        })
    }
}

fn session_error_response(error: &SessionError) -> Response {
    tracing::debug!("Rejecting session request: {}", error);
    crate::metrics::increment_sessions("rejected");
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "error": error.to_string() })),
    )
        .into_response()
}

fn forward_error_response(error: &ForwardError) -> Response {
    (
        error.status(),
        Json(json!({ "error": error.public_message() })),
    )
        .into_response()
}

/// Sessions are accepted on the root when the request asks for an upgrade.
async fn handle_root(
    State(handler): State<HttpHandler>,
    Query(query): Query<SessionQuery>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    match ws {
        Ok(ws) => handler.upgrade(query, ws),
        Err(_) => Json(HttpHandler::info()).into_response(),
    }
}

async fn handle_ws(
    State(handler): State<HttpHandler>,
    Query(query): Query<SessionQuery>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    if let Err(e) = SessionParams::parse(query.appid.as_deref(), query.url.as_deref()) {
        return session_error_response(&e);
    }
    match ws {
        Ok(ws) => handler.upgrade(query, ws),
        Err(rejection) => rejection.into_response(),
    }
}

async fn handle_proxy(
    State(handler): State<HttpHandler>,
    method: Method,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    match handler
        .forward
        .forward(method, query.as_deref(), &headers, body)
        .await
    {
        Ok(response) => response.into_response(),
        Err(e) => forward_error_response(&e),
    }
}

async fn handle_health(State(handler): State<HttpHandler>) -> Json<serde_json::Value> {
    Json(handler.health().await)
}
