//! Order reads and the admin status update.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::instrument;

use bazaar_core::{Aggregate, AggregateRoot, DomainError, UserId};
use bazaar_orders::{AdvanceStatus, Order, OrderCommand, OrderId, OrderStatus};

use crate::error::ServiceResult;
use crate::events::log_committed;
use crate::pagination::{Page, PageRequest};
use crate::store::OrderStore;

#[derive(Clone)]
pub struct OrderService {
    orders: Arc<dyn OrderStore>,
}

impl OrderService {
    pub fn new(orders: Arc<dyn OrderStore>) -> Self {
        Self { orders }
    }

    /// The user's orders, newest first. `NotFound` if there are none.
    #[instrument(skip(self), fields(user_id = %user), err)]
    pub async fn list_user_orders(&self, user: UserId) -> ServiceResult<Vec<Order>> {
        let orders = self.orders.list_by_user(user).await?;
        if orders.is_empty() {
            return Err(DomainError::not_found("orders").into());
        }
        Ok(orders)
    }

    /// A single order of `user`. Another user's order reads as missing.
    #[instrument(skip(self), fields(user_id = %user, order_id = %id), err)]
    pub async fn get_order(&self, user: UserId, id: OrderId) -> ServiceResult<Order> {
        match self.orders.get(id).await? {
            Some(order) if order.ordered_by() == Some(user) => Ok(order),
            _ => Err(DomainError::not_found("order").into()),
        }
    }

    #[instrument(skip(self), fields(page = page.page(), limit = page.limit()), err)]
    pub async fn list_all_orders(&self, page: PageRequest) -> ServiceResult<Page<Order>> {
        let total = self.orders.count().await?;
        let items = self.orders.list_page(page.offset(), page.limit()).await?;
        Ok(Page {
            items,
            current_page: page.page(),
            total_pages: page.total_pages(total),
            total,
        })
    }

    /// Move an order to `status`. Only forward moves and cancellation of a
    /// live order are accepted.
    #[instrument(skip(self), fields(order_id = %id, status = %status), err)]
    pub async fn update_order_status(
        &self,
        id: OrderId,
        status: OrderStatus,
        now: DateTime<Utc>,
    ) -> ServiceResult<Order> {
        let mut order = self
            .orders
            .get(id)
            .await?
            .ok_or_else(|| DomainError::not_found("order"))?;
        let expected = order.version();
        let events = order.execute(&OrderCommand::AdvanceStatus(AdvanceStatus {
            order_id: id,
            status,
            occurred_at: now,
        }))?;
        self.orders.save(&order, expected).await?;
        log_committed("order", id, &events);
        Ok(order)
    }
}
