pub mod health;
pub mod webhooks;

use axum::Router;

pub fn router() -> Router {
    Router::new().merge(health::router()).merge(webhooks::router())
}
