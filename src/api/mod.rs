use axum::Router;
use itertools::Itertools;

pub mod auth;
pub mod blog;
pub mod chat;
pub mod community;
pub mod event;
pub mod material;
pub mod password;

pub fn app() -> Router {
    Router::new()
        .nest("/auth", auth::app())
        .nest("/password", password::app())
        .nest("/communities", community::app())
        .nest("/materials", material::app())
        .nest("/blogs", blog::app())
        .merge(chat::app())
}

/// Tags arrive as a comma separated string; split, trim and dedupe.
pub(crate) fn parse_tags(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|tag| !tag.is_empty())
        .map(str::to_string)
        .unique()
        .collect()
}
