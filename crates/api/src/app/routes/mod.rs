use axum::Router;

use crate::middleware;

pub mod admin;
pub mod cart;
pub mod common;
pub mod orders;
pub mod products;
pub mod system;

/// Router for all authenticated endpoints.
pub fn router() -> Router {
    Router::new()
        .nest("/products", products::router())
        .nest("/cart", cart::router())
        .nest("/orders", orders::router())
        .nest(
            "/admin",
            admin::router().route_layer(axum::middleware::from_fn(middleware::require_admin)),
        )
}
