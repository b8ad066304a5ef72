use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, patch, post},
};
use chrono::Utc;
use serde_json::json;

use bazaar_catalog::ProductId;

use crate::app::routes::common::{parse_id, validated};
use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::UserContext;

pub fn router() -> Router {
    Router::new()
        .route("/", get(get_cart))
        .route("/create", post(create_cart))
        .route("/clear", delete(clear_cart))
        .route("/remove/:id", patch(remove_product))
}

/// Merge the requested lines into the caller's cart.
pub async fn create_cart(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(user): Extension<UserContext>,
    body: Result<Json<dto::CreateCartRequest>, JsonRejection>,
) -> Result<Response, Response> {
    let Json(body) = body.map_err(errors::json_rejection_to_response)?;
    let items = validated(body.into_items())?;

    let cart = services
        .carts
        .merge_items(user.user_id(), items, Utc::now())
        .await
        .map_err(errors::service_error_to_response)?;

    Ok((
        StatusCode::CREATED,
        Json(json!({ "cart": dto::CartResponse::from(&cart) })),
    )
        .into_response())
}

pub async fn get_cart(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(user): Extension<UserContext>,
) -> Result<Response, Response> {
    let cart = services
        .carts
        .get_cart(user.user_id())
        .await
        .map_err(errors::service_error_to_response)?;

    let body = if cart.is_empty() {
        json!({ "message": "Cart is empty", "cart": dto::CartResponse::from(&cart) })
    } else {
        json!({ "cart": dto::CartResponse::from(&cart) })
    };
    Ok(Json(body).into_response())
}

pub async fn clear_cart(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(user): Extension<UserContext>,
) -> Result<Response, Response> {
    services
        .carts
        .clear_cart(user.user_id())
        .await
        .map_err(errors::service_error_to_response)?;
    Ok(Json(json!({})).into_response())
}

pub async fn remove_product(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(user): Extension<UserContext>,
    Path(id): Path<String>,
) -> Result<Response, Response> {
    let product_id: ProductId = parse_id(&id)?;
    let cart = services
        .carts
        .remove_product(user.user_id(), product_id, Utc::now())
        .await
        .map_err(errors::service_error_to_response)?;
    Ok(Json(json!({ "cart": dto::CartResponse::from(&cart) })).into_response())
}
