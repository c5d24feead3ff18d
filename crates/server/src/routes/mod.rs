use axum::{
    Router,
    http::HeaderMap,
    response::Json as ResponseJson,
    routing::get,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use utils::response::ApiResponse;

use crate::AppState;

pub mod notifications;
pub mod preorder;
pub mod referral;

const ACTOR_HEADER: &str = "x-actor";
const DEFAULT_ACTOR: &str = "admin";

/// Who is performing the request, for the audit log
pub(crate) fn actor(headers: &HeaderMap) -> String {
    headers
        .get(ACTOR_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or(DEFAULT_ACTOR)
        .to_string()
}

async fn health() -> ResponseJson<ApiResponse<&'static str>> {
    ResponseJson(ApiResponse::success("ok"))
}

pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .merge(referral::router(&state))
        .merge(preorder::router(&state))
        .merge(notifications::router(&state));

    Router::new()
        .route("/health", get(health))
        .nest("/api", api)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    #[test]
    fn test_actor_defaults_when_header_missing() {
        let mut headers = HeaderMap::new();
        assert_eq!(actor(&headers), "admin");

        headers.insert(ACTOR_HEADER, HeaderValue::from_static("  ops@shop.vn "));
        assert_eq!(actor(&headers), "ops@shop.vn");
    }
}
