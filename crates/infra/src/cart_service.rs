//! Cart operations: merge, read, remove a product, clear.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, instrument};

use bazaar_cart::{Cart, CartCommand, CartId, MergeItems, RemoveProduct, RequestedItem};
use bazaar_catalog::{Product, ProductId};
use bazaar_core::{Aggregate, AggregateId, DomainError, DomainResult, UserId};

use crate::error::ServiceResult;
use crate::events::log_committed;
use crate::store::{CartStore, CatalogStore};

/// Re-check every line of `cart` against current catalog prices.
///
/// Runs before every persist of a non-empty cart. A removed product counts as
/// a mismatch since its price can no longer be confirmed.
pub(crate) async fn verify_cart_prices(catalog: &dyn CatalogStore, cart: &Cart) -> ServiceResult<()> {
    if cart.is_empty() {
        return Ok(());
    }
    let ids: Vec<ProductId> = cart.items().iter().map(|item| item.product_id).collect();
    let products = catalog.get_many(&ids).await?;
    cart.verify_prices(|id| products.get(&id).map(Product::price))?;
    Ok(())
}

#[derive(Clone)]
pub struct CartService {
    catalog: Arc<dyn CatalogStore>,
    carts: Arc<dyn CartStore>,
}

impl CartService {
    pub fn new(catalog: Arc<dyn CatalogStore>, carts: Arc<dyn CartStore>) -> Self {
        Self { catalog, carts }
    }

    /// Merge requested lines into the user's cart, creating it on first use.
    ///
    /// Lines are validated in request order and the first failure aborts the
    /// whole request. An existing `(product, color)` line takes the new
    /// quantity and the current catalog price. Every color of a requested
    /// product counts against its stock.
    #[instrument(skip(self, items), fields(user_id = %user, lines = items.len()), err)]
    pub async fn merge_items(
        &self,
        user: UserId,
        items: Vec<RequestedItem>,
        now: DateTime<Utc>,
    ) -> ServiceResult<Cart> {
        if items.is_empty() {
            return Err(DomainError::validation("cart must contain at least one item").into());
        }

        let ids: Vec<ProductId> = items.iter().map(|item| item.product_id).collect();
        let products = self.catalog.get_many(&ids).await?;
        let lines = items
            .iter()
            .map(|item| {
                let product = products
                    .get(&item.product_id)
                    .ok_or_else(|| DomainError::not_found(format!("product {}", item.product_id)))?;
                item.resolve(product)
            })
            .collect::<DomainResult<Vec<_>>>()?;

        let existing = self.carts.find_by_user(user).await?;
        let is_new = existing.is_none();
        let mut cart = existing.unwrap_or_else(|| Cart::empty(CartId::new(AggregateId::new())));

        let events = cart.execute(&CartCommand::MergeItems(MergeItems {
            owner: user,
            lines,
            occurred_at: now,
        }))?;
        // Colors of one product draw on the same stock.
        for id in &ids {
            if let Some(product) = products.get(id) {
                product.ensure_available(cart.quantity_of(*id))?;
            }
        }
        verify_cart_prices(self.catalog.as_ref(), &cart).await?;

        if is_new {
            self.carts.insert(user, &cart).await?;
        } else {
            self.carts.save(user, &cart).await?;
        }
        log_committed("cart", cart.id_typed(), &events);
        Ok(cart)
    }

    #[instrument(skip(self), fields(user_id = %user), err)]
    pub async fn get_cart(&self, user: UserId) -> ServiceResult<Cart> {
        Ok(self
            .carts
            .find_by_user(user)
            .await?
            .ok_or_else(|| DomainError::not_found("cart"))?)
    }

    /// Drop every line of `product_id`, whatever its color.
    #[instrument(skip(self), fields(user_id = %user, product_id = %product_id), err)]
    pub async fn remove_product(
        &self,
        user: UserId,
        product_id: ProductId,
        now: DateTime<Utc>,
    ) -> ServiceResult<Cart> {
        let mut cart = self.get_cart(user).await?;
        let events = cart.execute(&CartCommand::RemoveProduct(RemoveProduct {
            owner: user,
            product_id,
            occurred_at: now,
        }))?;
        verify_cart_prices(self.catalog.as_ref(), &cart).await?;
        self.carts.save(user, &cart).await?;
        log_committed("cart", cart.id_typed(), &events);
        Ok(cart)
    }

    /// Delete the user's cart document.
    #[instrument(skip(self), fields(user_id = %user), err)]
    pub async fn clear_cart(&self, user: UserId) -> ServiceResult<()> {
        if !self.carts.delete(user).await? {
            return Err(DomainError::not_found("cart").into());
        }
        info!(user_id = %user, "cart cleared");
        Ok(())
    }
}
