//! Batched stock/sold adjustments applied on order confirmation.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use bazaar_core::{AggregateId, DomainError, DomainResult};

use crate::product::{Product, ProductId};

/// Decrement stock and increment sold for one product by `quantity`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockAdjustment {
    pub product_id: ProductId,
    pub quantity: i64,
}

/// All stock adjustments caused by one order, applied as a single operation.
///
/// Lines for the same product (e.g. two colors) are folded into one
/// adjustment; first-seen order is preserved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SalesBatch {
    order_id: AggregateId,
    adjustments: Vec<StockAdjustment>,
}

impl SalesBatch {
    pub fn new<I>(order_id: AggregateId, lines: I) -> DomainResult<Self>
    where
        I: IntoIterator<Item = (ProductId, i64)>,
    {
        let mut adjustments: Vec<StockAdjustment> = Vec::new();
        for (product_id, quantity) in lines {
            if quantity <= 0 {
                return Err(DomainError::validation("adjustment quantity must be positive"));
            }
            match adjustments.iter_mut().find(|a| a.product_id == product_id) {
                Some(existing) => existing.quantity += quantity,
                None => adjustments.push(StockAdjustment {
                    product_id,
                    quantity,
                }),
            }
        }

        if adjustments.is_empty() {
            return Err(DomainError::validation("sales batch cannot be empty"));
        }

        Ok(Self {
            order_id,
            adjustments,
        })
    }

    /// The order this batch belongs to; the idempotency key for storage.
    pub fn order_id(&self) -> AggregateId {
        self.order_id
    }

    pub fn adjustments(&self) -> &[StockAdjustment] {
        &self.adjustments
    }
}

/// Apply every adjustment of `batch` or none of them.
///
/// Fails with `NotFound` for an unknown product and `InsufficientStock` when any
/// product holds less stock than its adjustment.
pub fn apply_sales(
    products: &mut HashMap<ProductId, Product>,
    batch: &SalesBatch,
) -> DomainResult<()> {
    for adj in batch.adjustments() {
        let product = products
            .get(&adj.product_id)
            .ok_or_else(|| DomainError::not_found(format!("product {}", adj.product_id)))?;
        product.ensure_available(adj.quantity)?;
    }

    for adj in batch.adjustments() {
        if let Some(product) = products.get_mut(&adj.product_id) {
            product.record_sale(adj.quantity)?;
        }
    }
    Ok(())
}

/// Reverse a previously applied batch, all or nothing.
pub fn revert_sales(
    products: &mut HashMap<ProductId, Product>,
    batch: &SalesBatch,
) -> DomainResult<()> {
    for adj in batch.adjustments() {
        let product = products
            .get(&adj.product_id)
            .ok_or_else(|| DomainError::not_found(format!("product {}", adj.product_id)))?;
        if product.sold() < adj.quantity {
            return Err(DomainError::invariant("cannot restock more than was sold"));
        }
    }

    for adj in batch.adjustments() {
        if let Some(product) = products.get_mut(&adj.product_id) {
            product.restock_sale(adj.quantity)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::product::NewProduct;

    fn catalog(stocks: &[i64]) -> (HashMap<ProductId, Product>, Vec<ProductId>) {
        let mut map = HashMap::new();
        let mut ids = Vec::new();
        for (i, stock) in stocks.iter().enumerate() {
            let id = ProductId::new(AggregateId::new());
            let product = Product::new(NewProduct {
                id,
                title: format!("product {i}"),
                slug: String::new(),
                price: 100,
                quantity: *stock,
                sold: 0,
                colors: vec![],
            })
            .unwrap();
            map.insert(id, product);
            ids.push(id);
        }
        (map, ids)
    }

    #[test]
    fn batch_folds_lines_of_the_same_product() {
        let (_, ids) = catalog(&[10, 10]);
        let batch =
            SalesBatch::new(AggregateId::new(), [(ids[0], 2), (ids[1], 1), (ids[0], 3)]).unwrap();
        assert_eq!(
            batch.adjustments(),
            &[
                StockAdjustment { product_id: ids[0], quantity: 5 },
                StockAdjustment { product_id: ids[1], quantity: 1 },
            ]
        );
    }

    #[test]
    fn empty_batch_is_rejected() {
        let err = SalesBatch::new(AggregateId::new(), []).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn apply_decrements_stock_and_increments_sold() {
        let (mut products, ids) = catalog(&[10, 4]);
        let batch = SalesBatch::new(AggregateId::new(), [(ids[0], 3), (ids[1], 4)]).unwrap();

        apply_sales(&mut products, &batch).unwrap();

        assert_eq!(products[&ids[0]].quantity(), 7);
        assert_eq!(products[&ids[0]].sold(), 3);
        assert_eq!(products[&ids[1]].quantity(), 0);
        assert_eq!(products[&ids[1]].sold(), 4);
    }

    #[test]
    fn apply_is_all_or_nothing() {
        let (mut products, ids) = catalog(&[10, 1]);
        let before = products.clone();
        let batch = SalesBatch::new(AggregateId::new(), [(ids[0], 3), (ids[1], 2)]).unwrap();

        let err = apply_sales(&mut products, &batch).unwrap_err();

        assert!(matches!(err, DomainError::InsufficientStock { requested: 2, available: 1, .. }));
        assert_eq!(products, before);
    }

    #[test]
    fn apply_with_unknown_product_is_not_found() {
        let (mut products, _) = catalog(&[10]);
        let batch = SalesBatch::new(
            AggregateId::new(),
            [(ProductId::new(AggregateId::new()), 1)],
        )
        .unwrap();
        assert!(matches!(
            apply_sales(&mut products, &batch),
            Err(DomainError::NotFound(_))
        ));
    }

    #[test]
    fn revert_restores_counters() {
        let (mut products, ids) = catalog(&[10]);
        let before = products.clone();
        let batch = SalesBatch::new(AggregateId::new(), [(ids[0], 6)]).unwrap();

        apply_sales(&mut products, &batch).unwrap();
        revert_sales(&mut products, &batch).unwrap();

        assert_eq!(products, before);
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            /// Property: stock never goes negative and stock + sold is conserved.
            #[test]
            fn stock_is_conserved_and_never_negative(
                stock in 0i64..50,
                orders in prop::collection::vec(1i64..20, 1..10)
            ) {
                let (mut products, ids) = catalog(&[stock]);
                for qty in orders {
                    let batch = SalesBatch::new(AggregateId::new(), [(ids[0], qty)]).unwrap();
                    let before = products[&ids[0]].quantity();
                    match apply_sales(&mut products, &batch) {
                        Ok(()) => prop_assert_eq!(products[&ids[0]].quantity(), before - qty),
                        Err(_) => prop_assert_eq!(products[&ids[0]].quantity(), before),
                    }
                    let p = &products[&ids[0]];
                    prop_assert!(p.quantity() >= 0);
                    prop_assert_eq!(p.quantity() + p.sold(), stock);
                }
            }
        }
    }
}
