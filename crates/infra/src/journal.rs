//! Checkout journal records.
//!
//! A checkout touches three documents (product stock, the order, the cart)
//! that no single storage call covers. Each conversion is journaled before
//! the first write and its step advanced after each one, so an interrupted
//! checkout can be finished or rolled back by the reconciler.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use bazaar_cart::CartId;
use bazaar_catalog::SalesBatch;
use bazaar_core::UserId;
use bazaar_orders::{OrderId, PlaceOrder};

/// Progress of one checkout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum CheckoutStep {
    /// Journaled, nothing written yet.
    Started,
    /// The sales batch was applied to the catalog.
    StockReserved,
    /// The order document exists.
    OrderRecorded,
    /// The cart was emptied.
    Completed,
    /// Claimed for rollback; no order can be recorded any more.
    RollingBack { reason: String },
    /// Rolled back; stock is restored and no order exists.
    Failed { reason: String },
}

impl CheckoutStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckoutStep::Started => "started",
            CheckoutStep::StockReserved => "stock_reserved",
            CheckoutStep::OrderRecorded => "order_recorded",
            CheckoutStep::Completed => "completed",
            CheckoutStep::RollingBack { .. } => "rolling_back",
            CheckoutStep::Failed { .. } => "failed",
        }
    }

    /// Whether the reconciler still has work to do for this entry.
    pub fn is_pending(&self) -> bool {
        matches!(
            self,
            CheckoutStep::Started
                | CheckoutStep::StockReserved
                | CheckoutStep::OrderRecorded
                | CheckoutStep::RollingBack { .. }
        )
    }

    /// Whether the order may still be recorded.
    pub fn accepts_order(&self) -> bool {
        matches!(self, CheckoutStep::Started | CheckoutStep::StockReserved)
    }

    /// Same step, ignoring the failure reason.
    pub fn same_as(&self, other: &CheckoutStep) -> bool {
        self.as_str() == other.as_str()
    }
}

/// One journaled cart-to-order conversion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutEntry {
    pub order_id: OrderId,
    pub user_id: UserId,
    /// Cart snapshot the order was taken from; `(cart_id, cart_version)` is
    /// unique among non-failed entries so a cart converts at most once.
    pub cart_id: CartId,
    pub cart_version: u64,
    pub command: PlaceOrder,
    pub batch: SalesBatch,
    pub step: CheckoutStep,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CheckoutEntry {
    pub fn started(
        command: PlaceOrder,
        batch: SalesBatch,
        cart_id: CartId,
        cart_version: u64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            order_id: command.order_id,
            user_id: command.ordered_by,
            cart_id,
            cart_version,
            command,
            batch,
            step: CheckoutStep::Started,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn advance(&mut self, step: CheckoutStep, now: DateTime<Utc>) {
        self.step = step;
        self.updated_at = now;
    }

    /// Move to `step`, keeping a copy of the entry as it was for the
    /// compare-and-set that stores it.
    pub fn moved_to(&self, step: CheckoutStep, now: DateTime<Utc>) -> Self {
        let mut next = self.clone();
        next.advance(step, now);
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_steps() {
        assert!(CheckoutStep::Started.is_pending());
        assert!(CheckoutStep::StockReserved.is_pending());
        assert!(CheckoutStep::OrderRecorded.is_pending());
        assert!(
            CheckoutStep::RollingBack {
                reason: "x".to_string()
            }
            .is_pending()
        );
        assert!(!CheckoutStep::Completed.is_pending());
        assert!(
            !CheckoutStep::Failed {
                reason: "x".to_string()
            }
            .is_pending()
        );
    }

    #[test]
    fn order_only_before_a_claim() {
        assert!(CheckoutStep::Started.accepts_order());
        assert!(CheckoutStep::StockReserved.accepts_order());
        assert!(!CheckoutStep::OrderRecorded.accepts_order());
        assert!(
            !CheckoutStep::RollingBack {
                reason: "stalled".to_string()
            }
            .accepts_order()
        );
        assert!(
            CheckoutStep::Failed {
                reason: "a".to_string()
            }
            .same_as(&CheckoutStep::Failed {
                reason: "b".to_string()
            })
        );
    }

    #[test]
    fn step_serializes_with_a_tag() {
        let json = serde_json::to_value(CheckoutStep::Failed {
            reason: "out of stock".to_string(),
        })
        .unwrap();
        assert_eq!(json["step"], "failed");
        assert_eq!(json["reason"], "out of stock");
        assert_eq!(
            serde_json::to_value(CheckoutStep::StockReserved).unwrap()["step"],
            "stock_reserved"
        );
    }
}
