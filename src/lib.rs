pub mod appresult;
pub mod auth;
pub mod config;
pub mod error;
pub mod hub;
pub mod moderation;
pub mod notify;
pub mod protocol;
pub mod scopes;
pub mod session;
pub mod store;
pub mod streams;

use axum::{
    extract::FromRef,
    http::{header, Method},
    routing::get,
    Router,
};
use tower_http::cors::{Any, CorsLayer};

pub use appresult::{AppError, AppResult};

#[derive(Clone, FromRef)]
pub struct AppState {
    pub hub: hub::HubHandle,
}

/// WebSocket endpoint plus the side-channel routes, mounted both at the root
/// and under `/api`.
pub fn router(state: AppState) -> Router {
    let side_channel = streams::http::router();

    Router::new()
        .route("/ws", get(hub::ws::ws_handler))
        .merge(side_channel.clone())
        .nest("/api", side_channel)
        .fallback(streams::http::not_found)
        .layer(cors())
        .with_state(state)
}

fn cors() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
}
