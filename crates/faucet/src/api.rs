//! HTTP API for faucet service

use super::error::FaucetResult;
use super::service::{DispenseRequest, FaucetService, FaucetStatus};
use axum::{
    extract::{rejection::FormRejection, ConnectInfo, State},
    http::{header, HeaderMap, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Form, Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, warn};

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<FaucetService>,
    pub trust_forwarded_for: bool,
    pub metrics_enabled: bool,
}

/// Form posted by the landing page
#[derive(Debug, Default, Deserialize)]
pub struct DispenseForm {
    pub address: Option<String>,
    #[serde(rename = "g-recaptcha-response")]
    pub token: Option<String>,
}

pub fn router(state: AppState, cors_enabled: bool) -> Router {
    let mut app = Router::new()
        .route("/", get(root_handler))
        .route("/faucet", post(dispense_handler))
        .route("/api/recent", get(recent_handler))
        .route("/api/status", get(status_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    if cors_enabled {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
        app = app.layer(cors);
    }

    app
}

/// Last X-Forwarded-For hop if trusted, else the socket peer.
///
/// Only the entry appended by the proxy in front of us is used. Earlier
/// entries come from the client and can be anything.
pub fn client_identity(headers: &HeaderMap, peer: Option<SocketAddr>, trust_forwarded_for: bool) -> String {
    if trust_forwarded_for {
        let forwarded = headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.rsplit(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty());
        if let Some(ip) = forwarded {
            return ip.to_string();
        }
    }

    peer.map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Dispense handler
pub async fn dispense_handler(
    State(state): State<AppState>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    form: Result<Form<DispenseForm>, FormRejection>,
) -> Response {
    let form = match form {
        Ok(Form(form)) => form,
        Err(rejection) => {
            warn!("Unreadable dispense form: {}", rejection);
            DispenseForm::default()
        }
    };

    let request = DispenseRequest {
        identity: client_identity(&headers, peer.map(|ConnectInfo(addr)| addr), state.trust_forwarded_for),
        address: form.address,
        token: form.token,
    };

    match state.service.dispense(&request).await {
        Ok(receipt) => (StatusCode::OK, Json(json!({ "success": receipt.message() }))).into_response(),
        Err(e) => e.into_response(),
    }
}

/// Recently funded addresses
pub async fn recent_handler(State(state): State<AppState>) -> FaucetResult<Json<Vec<String>>> {
    Ok(Json(state.service.recent_claims()?))
}

/// Status handler
pub async fn status_handler(State(state): State<AppState>) -> FaucetResult<Json<FaucetStatus>> {
    Ok(Json(state.service.status().await?))
}

/// Health check handler
pub async fn health_handler() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

pub async fn metrics_handler(State(state): State<AppState>) -> Response {
    if !state.metrics_enabled {
        return StatusCode::NOT_FOUND.into_response();
    }

    match state.service.metrics().render() {
        Ok(body) => ([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], body).into_response(),
        Err(e) => {
            error!("Metrics encoding failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Landing page with the request form
pub async fn root_handler(State(state): State<AppState>) -> Html<String> {
    let recent = state.service.recent_claims().unwrap_or_else(|e| {
        warn!("Could not load recent claims: {}", e);
        Vec::new()
    });
    Html(render_page(state.service.amount_display(), state.service.site_key(), &recent))
}

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn render_page(amount: &str, site_key: &str, recent: &[String]) -> String {
    let amount = escape_html(amount);
    let items: String = recent
        .iter()
        .map(|addr| format!("        <li><code>{}</code></li>\n", escape_html(addr)))
        .collect();

    format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <title>Testnet Faucet</title>
    <script src="https://www.google.com/recaptcha/api.js" async defer></script>
</head>
<body>
    <h2>Testnet Faucet</h2>
    <form action="/faucet" method="post">
        <label for="address">Address:</label><br>
        <input type="text" id="address" name="address" required><br><br>
        <div class="g-recaptcha" data-sitekey="{site_key}"></div><br>
        <input type="submit" value="Request {amount}">
    </form>
    <h3>Recent requests</h3>
    <ul>
{items}    </ul>
</body>
</html>
"#,
        site_key = escape_html(site_key),
        amount = amount,
        items = items,
    )
}
