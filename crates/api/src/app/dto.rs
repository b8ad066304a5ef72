use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use bazaar_cart::{Cart, CartItem, RequestedItem};
use bazaar_catalog::Product;
use bazaar_core::{DomainError, DomainResult, Money};
use bazaar_infra::Page;
use bazaar_orders::{Order, OrderItem, PaymentIntent, PaymentMethod, PaymentStatus};

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct CreateCartRequest {
    pub cart: CartPayload,
}

#[derive(Debug, Deserialize)]
pub struct CartPayload {
    pub items: Vec<CartItemPayload>,
}

/// One requested line. `quantity` stays raw JSON so non-integers are
/// reported as validation errors rather than body rejections.
#[derive(Debug, Deserialize)]
pub struct CartItemPayload {
    pub product: String,
    pub quantity: JsonValue,
    #[serde(default)]
    pub color: Option<String>,
}

impl CreateCartRequest {
    /// Validate every line in request order; the first failure wins.
    pub fn into_items(self) -> DomainResult<Vec<RequestedItem>> {
        if self.cart.items.is_empty() {
            return Err(DomainError::validation("cart must contain at least one item"));
        }
        self.cart
            .items
            .iter()
            .map(|item| RequestedItem::parse(&item.product, &item.quantity, item.color.as_deref()))
            .collect()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderRequest {
    #[serde(default)]
    pub payment_method: Option<String>,
}

impl CreateOrderRequest {
    pub fn method(&self) -> DomainResult<PaymentMethod> {
        self.payment_method
            .as_deref()
            .ok_or_else(|| DomainError::validation("paymentMethod is required"))?
            .parse()
    }
}

#[derive(Debug, Deserialize)]
pub struct UpdateOrderStatusRequest {
    pub status: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub page: Option<u64>,
    pub limit: Option<u64>,
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
pub struct ProductResponse {
    pub id: String,
    pub title: String,
    pub slug: String,
    pub price: Money,
    pub quantity: i64,
    pub sold: i64,
    pub colors: Vec<String>,
}

impl From<&Product> for ProductResponse {
    fn from(p: &Product) -> Self {
        Self {
            id: p.id().to_string(),
            title: p.title().to_string(),
            slug: p.slug().to_string(),
            price: p.price(),
            quantity: p.quantity(),
            sold: p.sold(),
            colors: p.colors().to_vec(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct LineResponse {
    pub product: String,
    pub title: String,
    pub slug: String,
    pub color: String,
    pub quantity: i64,
    pub price: Money,
}

impl From<&CartItem> for LineResponse {
    fn from(item: &CartItem) -> Self {
        Self {
            product: item.product_id.to_string(),
            title: item.title.clone(),
            slug: item.slug.clone(),
            color: item.color.as_str().to_string(),
            quantity: item.quantity.get(),
            price: item.price,
        }
    }
}

impl From<&OrderItem> for LineResponse {
    fn from(item: &OrderItem) -> Self {
        Self {
            product: item.product_id.to_string(),
            title: item.title.clone(),
            slug: item.slug.clone(),
            color: item.color.as_str().to_string(),
            quantity: item.quantity.get(),
            price: item.price,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CartResponse {
    pub id: String,
    pub ordered_by: Option<String>,
    pub items: Vec<LineResponse>,
    pub cart_total: Money,
    pub updated_at: Option<DateTime<Utc>>,
}

impl From<&Cart> for CartResponse {
    fn from(cart: &Cart) -> Self {
        Self {
            id: cart.id_typed().to_string(),
            ordered_by: cart.owner().map(|u| u.to_string()),
            items: cart.items().iter().map(LineResponse::from).collect(),
            cart_total: cart.cart_total(),
            updated_at: cart.updated_at(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentIntentResponse {
    pub id: String,
    pub method: &'static str,
    pub amount: Money,
    pub status: PaymentStatus,
    pub currency: String,
    pub created_at: DateTime<Utc>,
}

impl From<&PaymentIntent> for PaymentIntentResponse {
    fn from(intent: &PaymentIntent) -> Self {
        Self {
            id: intent.id.clone(),
            method: intent.method.as_str(),
            amount: intent.amount,
            status: intent.status,
            currency: intent.currency.as_str().to_string(),
            created_at: intent.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderResponse {
    pub id: String,
    pub items: Vec<LineResponse>,
    pub payment_intent: Option<PaymentIntentResponse>,
    pub ordered_by: Option<String>,
    pub order_status: &'static str,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl From<&Order> for OrderResponse {
    fn from(order: &Order) -> Self {
        Self {
            id: order.id_typed().to_string(),
            items: order.items().iter().map(LineResponse::from).collect(),
            payment_intent: order.payment_intent().map(PaymentIntentResponse::from),
            ordered_by: order.ordered_by().map(|u| u.to_string()),
            order_status: order.order_status().as_str(),
            created_at: order.created_at(),
            updated_at: order.updated_at(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderPageResponse {
    pub orders: Vec<OrderResponse>,
    pub current_page: u64,
    pub total_pages: u64,
    pub total: u64,
}

impl From<&Page<Order>> for OrderPageResponse {
    fn from(page: &Page<Order>) -> Self {
        Self {
            orders: page.items.iter().map(OrderResponse::from).collect(),
            current_page: page.current_page,
            total_pages: page.total_pages,
            total: page.total,
        }
    }
}
