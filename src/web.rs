use axum::Router;
use axum::routing::{get, post};

use crate::state::AppState;

pub mod cleanup;
pub mod health;
pub mod layout;
pub mod sites;
pub mod stream;

pub fn router(state: AppState) -> Router {
    // 构建产物静态托管
    let sites_service = tower_http::services::ServeDir::new(
        state.project_root.join(&state.config.builder.sites_dir),
    );

    Router::new()
        .route("/", get(sites::home_page))
        .route("/site", post(sites::register_site))
        .route("/site/{key}/", get(sites::site_page))
        .route("/site/{key}/build", get(stream::build_stream))
        .route("/healthz", get(health::health_check))
        .nest_service("/sites", sites_service)
        .with_state(state)
}
