use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::Utc;
use serde_json::json;

use bazaar_orders::OrderId;

use crate::app::routes::common::{parse_id, validated};
use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::UserContext;

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_orders))
        .route("/create", post(create_order))
        .route("/:id", get(get_order))
}

/// Convert the caller's cart into an order.
pub async fn create_order(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(user): Extension<UserContext>,
    body: Result<Json<dto::CreateOrderRequest>, JsonRejection>,
) -> Result<Response, Response> {
    let Json(body) = body.map_err(errors::json_rejection_to_response)?;
    let method = validated(body.method())?;

    let order = services
        .checkout
        .place_order(user.user_id(), method, Utc::now())
        .await
        .map_err(errors::service_error_to_response)?;

    Ok((
        StatusCode::CREATED,
        Json(json!({ "order": dto::OrderResponse::from(&order) })),
    )
        .into_response())
}

pub async fn list_orders(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(user): Extension<UserContext>,
) -> Result<Response, Response> {
    let orders = services
        .orders
        .list_user_orders(user.user_id())
        .await
        .map_err(errors::service_error_to_response)?;
    let orders: Vec<dto::OrderResponse> = orders.iter().map(dto::OrderResponse::from).collect();
    Ok(Json(json!({ "orders": orders })).into_response())
}

pub async fn get_order(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(user): Extension<UserContext>,
    Path(id): Path<String>,
) -> Result<Response, Response> {
    let order_id: OrderId = parse_id(&id)?;
    let order = services
        .orders
        .get_order(user.user_id(), order_id)
        .await
        .map_err(errors::service_error_to_response)?;
    Ok(Json(json!({ "order": dto::OrderResponse::from(&order) })).into_response())
}
