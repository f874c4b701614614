use axum::http::header::{ACCEPT, CONTENT_TYPE};
use axum::http::{HeaderName, Method};
use tower_http::cors::{Any, CorsLayer};

use crate::config::AppConfig;
use crate::middleware::request_id::REQUEST_ID_HEADER;

pub fn build_cors_layer(config: &AppConfig) -> CorsLayer {
    let request_id = HeaderName::from_static(REQUEST_ID_HEADER);
    let mut layer = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([ACCEPT, CONTENT_TYPE, request_id.clone()])
        .expose_headers([request_id]);

    if config
        .cors_origins
        .iter()
        .any(|origin| origin.trim() == "*")
    {
        layer = layer.allow_origin(Any).allow_credentials(false);
    } else {
        let origins = config
            .cors_origins
            .iter()
            .filter_map(|origin| origin.parse().ok())
            .collect::<Vec<_>>();
        layer = layer.allow_origin(origins).allow_credentials(true);
    }

    layer
}
