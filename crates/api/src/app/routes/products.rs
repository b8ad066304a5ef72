use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path},
    response::{IntoResponse, Response},
    routing::get,
};

use bazaar_catalog::ProductId;
use bazaar_core::DomainError;
use bazaar_infra::store::CatalogStore;

use crate::app::routes::common::parse_id;
use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_products))
        .route("/:id", get(get_product))
}

pub async fn list_products(
    Extension(services): Extension<Arc<AppServices>>,
) -> Result<Response, Response> {
    let products = services
        .catalog
        .list()
        .await
        .map_err(|e| errors::service_error_to_response(e.into()))?;
    let products: Vec<dto::ProductResponse> =
        products.iter().map(dto::ProductResponse::from).collect();
    Ok(Json(serde_json::json!({ "products": products })).into_response())
}

pub async fn get_product(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> Result<Response, Response> {
    let id: ProductId = parse_id(&id)?;
    let product = services
        .catalog
        .get(id)
        .await
        .map_err(|e| errors::service_error_to_response(e.into()))?
        .ok_or_else(|| errors::domain_error_to_response(DomainError::not_found("product")))?;
    Ok(Json(serde_json::json!({ "product": dto::ProductResponse::from(&product) })).into_response())
}
