pub mod events;
pub mod sessions;
pub mod status;

use axum::Router;

use crate::state::AppState;

pub fn api_router() -> Router<AppState> {
    Router::new()
        .nest("/sessions", sessions::router())
        .nest("/events", events::router())
        .nest("/status", status::router())
}
