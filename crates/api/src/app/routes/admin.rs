use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path, Query, rejection::JsonRejection},
    response::{IntoResponse, Response},
    routing::{get, patch},
};
use chrono::Utc;
use serde_json::json;

use bazaar_infra::PageRequest;
use bazaar_orders::{OrderId, OrderStatus};

use crate::app::routes::common::{parse_id, validated};
use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::UserContext;

pub fn router() -> Router {
    Router::new()
        .route("/orders", get(list_all_orders))
        .route("/orders/:id/status", patch(update_order_status))
}

pub async fn list_all_orders(
    Extension(services): Extension<Arc<AppServices>>,
    query: Result<Query<dto::PageQuery>, axum::extract::rejection::QueryRejection>,
) -> Result<Response, Response> {
    let Query(query) = query.map_err(|e| {
        errors::json_error(
            axum::http::StatusCode::BAD_REQUEST,
            "validation_error",
            e.body_text(),
        )
    })?;
    let page = validated(PageRequest::new(query.page, query.limit))?;

    let page = services
        .orders
        .list_all_orders(page)
        .await
        .map_err(errors::service_error_to_response)?;
    Ok(Json(dto::OrderPageResponse::from(&page)).into_response())
}

pub async fn update_order_status(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(admin): Extension<UserContext>,
    Path(id): Path<String>,
    body: Result<Json<dto::UpdateOrderStatusRequest>, JsonRejection>,
) -> Result<Response, Response> {
    let order_id: OrderId = parse_id(&id)?;
    let Json(body) = body.map_err(errors::json_rejection_to_response)?;
    let status: OrderStatus = validated(body.status.parse())?;

    let order = services
        .orders
        .update_order_status(order_id, status, Utc::now())
        .await
        .map_err(errors::service_error_to_response)?;
    tracing::info!(admin = %admin.user_id(), order_id = %order_id, status = %status, "order status updated");
    Ok(Json(json!({ "order": dto::OrderResponse::from(&order) })).into_response())
}
