//! Postgres-backed stores.
//!
//! Products keep price and counters in columns; carts, orders and journal
//! entries are JSONB documents next to the columns their queries filter on.
//! Schema lives in `crates/infra/migrations/`.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError |
//! |------------|----------------------|------------|
//! | Database (unique violation) | `23505` | `Conflict` |
//! | Database (other) | Any other | `Backend` |
//! | Decode / ColumnDecode | N/A | `Serialization` |
//! | Other | N/A | `Backend` |

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgExecutor, PgPool, Postgres, Row, Transaction};
use tracing::instrument;
use uuid::Uuid;

use bazaar_cart::Cart;
use bazaar_catalog::{NewProduct, Product, ProductId, SalesBatch};
use bazaar_core::{AggregateId, AggregateRoot, DomainError, UserId};
use bazaar_orders::{Order, OrderId};

use super::{CartStore, CatalogStore, CheckoutJournal, OrderStore};
use crate::error::{ServiceResult, StoreError};
use crate::journal::{CheckoutEntry, CheckoutStep};

/// Open a connection pool.
pub async fn connect(database_url: &str) -> Result<PgPool, StoreError> {
    PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url)
        .await
        .map_err(|e| map_sqlx_error("connect", e))
}

/// Apply the embedded migrations.
pub async fn migrate(pool: &PgPool) -> Result<(), StoreError> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| StoreError::backend(format!("migration failed: {e}")))
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            if db_err.code().as_deref() == Some("23505") {
                StoreError::Conflict(msg)
            } else {
                StoreError::Backend(msg)
            }
        }
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
            StoreError::Serialization(format!("decode error in {}: {}", operation, err))
        }
        sqlx::Error::PoolClosed => {
            StoreError::Backend(format!("connection pool closed in {}", operation))
        }
        _ => StoreError::Backend(format!("sqlx error in {}: {}", operation, err)),
    }
}

fn to_i64(value: u64, what: &str) -> Result<i64, StoreError> {
    i64::try_from(value).map_err(|_| StoreError::serialization(format!("{what} out of range")))
}

fn from_i64(value: i64, what: &str) -> Result<u64, StoreError> {
    u64::try_from(value).map_err(|_| StoreError::serialization(format!("{what} is negative")))
}

const PRODUCT_COLUMNS: &str = "id, title, slug, price, quantity, sold, colors";

fn product_from_row(row: &PgRow) -> Result<Product, StoreError> {
    let decode = |e: sqlx::Error| map_sqlx_error("decode_product", e);
    let id: Uuid = row.try_get("id").map_err(decode)?;
    let colors: serde_json::Value = row.try_get("colors").map_err(decode)?;
    let price: i64 = row.try_get("price").map_err(decode)?;

    Product::new(NewProduct {
        id: ProductId::new(AggregateId::from_uuid(id)),
        title: row.try_get("title").map_err(decode)?,
        slug: row.try_get("slug").map_err(decode)?,
        price: from_i64(price, "price")?,
        quantity: row.try_get("quantity").map_err(decode)?,
        sold: row.try_get("sold").map_err(decode)?,
        colors: serde_json::from_value(colors)?,
    })
    .map_err(|e| StoreError::serialization(format!("invalid product row: {e}")))
}

fn document<T: serde::de::DeserializeOwned>(row: &PgRow, column: &str) -> Result<T, StoreError> {
    let value: serde_json::Value = row
        .try_get(column)
        .map_err(|e| map_sqlx_error("decode_document", e))?;
    Ok(serde_json::from_value(value)?)
}

/// Split a batch into the parallel arrays bound to `UNNEST`.
fn batch_arrays(batch: &SalesBatch) -> (Vec<Uuid>, Vec<i64>) {
    batch
        .adjustments()
        .iter()
        .map(|a| (*a.product_id.0.as_uuid(), a.quantity))
        .unzip()
}

/// Postgres product catalog.
#[derive(Debug, Clone)]
pub struct PostgresCatalogStore {
    pool: PgPool,
}

impl PostgresCatalogStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Explain why a conditional batch update touched fewer rows than expected.
    async fn rejection(
        tx: &mut Transaction<'_, Postgres>,
        batch: &SalesBatch,
    ) -> ServiceResult<DomainError> {
        let (ids, _) = batch_arrays(batch);
        let rows = sqlx::query("SELECT id, quantity FROM products WHERE id = ANY($1)")
            .bind(&ids)
            .fetch_all(&mut **tx)
            .await
            .map_err(|e| map_sqlx_error("apply_sales", e))?;

        let mut stock: HashMap<Uuid, i64> = HashMap::with_capacity(rows.len());
        for row in &rows {
            let id: Uuid = row
                .try_get("id")
                .map_err(|e| map_sqlx_error("apply_sales", e))?;
            let quantity: i64 = row
                .try_get("quantity")
                .map_err(|e| map_sqlx_error("apply_sales", e))?;
            stock.insert(id, quantity);
        }

        for adj in batch.adjustments() {
            match stock.get(adj.product_id.0.as_uuid()) {
                None => return Ok(DomainError::not_found(format!("product {}", adj.product_id))),
                Some(&available) if available < adj.quantity => {
                    return Ok(DomainError::insufficient_stock(
                        adj.product_id.0,
                        adj.quantity,
                        available,
                    ));
                }
                Some(_) => {}
            }
        }
        Ok(DomainError::conflict("stock changed concurrently"))
    }
}

#[async_trait]
impl CatalogStore for PostgresCatalogStore {
    #[instrument(skip(self), fields(product_id = %id), err)]
    async fn get(&self, id: ProductId) -> Result<Option<Product>, StoreError> {
        let row = sqlx::query(&format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE id = $1"))
            .bind(id.0.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_product", e))?;
        row.as_ref().map(product_from_row).transpose()
    }

    async fn get_many(&self, ids: &[ProductId]) -> Result<HashMap<ProductId, Product>, StoreError> {
        let uuids: Vec<Uuid> = ids.iter().map(|id| *id.0.as_uuid()).collect();
        let rows = sqlx::query(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products WHERE id = ANY($1)"
        ))
        .bind(&uuids)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_products", e))?;

        rows.iter()
            .map(|row| product_from_row(row).map(|p| (p.id(), p)))
            .collect()
    }

    async fn list(&self) -> Result<Vec<Product>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products ORDER BY title ASC, id ASC"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_products", e))?;

        rows.iter().map(product_from_row).collect()
    }

    #[instrument(skip(self, product), fields(product_id = %product.id()), err)]
    async fn upsert(&self, product: Product) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO products (id, title, slug, price, quantity, sold, colors)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (id)
            DO UPDATE SET
                title = EXCLUDED.title,
                slug = EXCLUDED.slug,
                price = EXCLUDED.price,
                quantity = EXCLUDED.quantity,
                sold = EXCLUDED.sold,
                colors = EXCLUDED.colors,
                updated_at = NOW()
            "#,
        )
        .bind(product.id().0.as_uuid())
        .bind(product.title())
        .bind(product.slug())
        .bind(to_i64(product.price(), "price")?)
        .bind(product.quantity())
        .bind(product.sold())
        .bind(serde_json::to_value(product.colors())?)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("upsert_product", e))?;
        Ok(())
    }

    #[instrument(skip(self, batch), fields(order_id = %batch.order_id()), err)]
    async fn apply_sales(&self, batch: &SalesBatch) -> ServiceResult<bool> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("apply_sales", e))?;

        let recorded = sqlx::query(
            "INSERT INTO applied_sales (order_id, batch) VALUES ($1, $2) ON CONFLICT (order_id) DO NOTHING",
        )
        .bind(batch.order_id().as_uuid())
        .bind(serde_json::to_value(batch).map_err(StoreError::from)?)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("apply_sales", e))?;

        if recorded.rows_affected() == 0 {
            return Ok(false);
        }

        let (ids, quantities) = batch_arrays(batch);
        let updated = sqlx::query(
            r#"
            UPDATE products AS p
            SET quantity = p.quantity - b.qty,
                sold = p.sold + b.qty,
                updated_at = NOW()
            FROM UNNEST($1::uuid[], $2::bigint[]) AS b(id, qty)
            WHERE p.id = b.id AND p.quantity >= b.qty
            "#,
        )
        .bind(&ids)
        .bind(&quantities)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("apply_sales", e))?;

        if updated.rows_affected() != ids.len() as u64 {
            let reason = Self::rejection(&mut tx, batch).await?;
            tx.rollback()
                .await
                .map_err(|e| map_sqlx_error("apply_sales", e))?;
            return Err(reason.into());
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("apply_sales", e))?;
        Ok(true)
    }

    #[instrument(skip(self), fields(order_id = %order_id), err)]
    async fn revert_sales(&self, order_id: AggregateId) -> ServiceResult<bool> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("revert_sales", e))?;

        let row = sqlx::query("DELETE FROM applied_sales WHERE order_id = $1 RETURNING batch")
            .bind(order_id.as_uuid())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("revert_sales", e))?;

        let Some(row) = row else {
            return Ok(false);
        };
        let batch: SalesBatch = document(&row, "batch")?;

        let (ids, quantities) = batch_arrays(&batch);
        let updated = sqlx::query(
            r#"
            UPDATE products AS p
            SET quantity = p.quantity + b.qty,
                sold = p.sold - b.qty,
                updated_at = NOW()
            FROM UNNEST($1::uuid[], $2::bigint[]) AS b(id, qty)
            WHERE p.id = b.id AND p.sold >= b.qty
            "#,
        )
        .bind(&ids)
        .bind(&quantities)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("revert_sales", e))?;

        if updated.rows_affected() != ids.len() as u64 {
            tx.rollback()
                .await
                .map_err(|e| map_sqlx_error("revert_sales", e))?;
            return Err(DomainError::invariant("cannot restock more than was sold").into());
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("revert_sales", e))?;
        Ok(true)
    }
}

/// Postgres cart documents, one row per user.
#[derive(Debug, Clone)]
pub struct PostgresCartStore {
    pool: PgPool,
}

impl PostgresCartStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CartStore for PostgresCartStore {
    async fn find_by_user(&self, user: UserId) -> Result<Option<Cart>, StoreError> {
        let row = sqlx::query("SELECT document FROM carts WHERE user_id = $1")
            .bind(user.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_cart", e))?;
        row.as_ref().map(|r| document(r, "document")).transpose()
    }

    #[instrument(skip(self, cart), fields(user_id = %user), err)]
    async fn insert(&self, user: UserId, cart: &Cart) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO carts (user_id, cart_id, document) VALUES ($1, $2, $3)")
            .bind(user.as_uuid())
            .bind(cart.id_typed().0.as_uuid())
            .bind(serde_json::to_value(cart)?)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("insert_cart", e))?;
        Ok(())
    }

    #[instrument(skip(self, cart), fields(user_id = %user), err)]
    async fn save(&self, user: UserId, cart: &Cart) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO carts (user_id, cart_id, document)
            VALUES ($1, $2, $3)
            ON CONFLICT (user_id)
            DO UPDATE SET
                cart_id = EXCLUDED.cart_id,
                document = EXCLUDED.document,
                updated_at = NOW()
            "#,
        )
        .bind(user.as_uuid())
        .bind(cart.id_typed().0.as_uuid())
        .bind(serde_json::to_value(cart)?)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("save_cart", e))?;
        Ok(())
    }

    #[instrument(skip(self, cart), fields(user_id = %user), err)]
    async fn save_if_version(
        &self,
        user: UserId,
        cart: &Cart,
        expected_version: u64,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE carts
            SET document = $3, updated_at = NOW()
            WHERE user_id = $1
              AND cart_id = $2
              AND (document->>'version')::bigint = $4
            "#,
        )
        .bind(user.as_uuid())
        .bind(cart.id_typed().0.as_uuid())
        .bind(serde_json::to_value(cart)?)
        .bind(to_i64(expected_version, "version")?)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("save_cart_if_version", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::conflict(format!(
                "cart of user {user} changed since version {expected_version}"
            )));
        }
        Ok(())
    }

    async fn delete(&self, user: UserId) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM carts WHERE user_id = $1")
            .bind(user.as_uuid())
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete_cart", e))?;
        Ok(result.rows_affected() > 0)
    }
}

/// Postgres order documents.
#[derive(Debug, Clone)]
pub struct PostgresOrderStore {
    pool: PgPool,
}

impl PostgresOrderStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

async fn insert_order<'e, E>(executor: E, order: &Order) -> Result<(), StoreError>
where
    E: PgExecutor<'e>,
{
    let user = order
        .ordered_by()
        .ok_or_else(|| StoreError::serialization("order has no owner"))?;
    let created_at = order
        .created_at()
        .ok_or_else(|| StoreError::serialization("order has no creation time"))?;

    sqlx::query(
        "INSERT INTO orders (id, user_id, created_at, version, document) VALUES ($1, $2, $3, $4, $5)",
    )
    .bind(order.id_typed().0.as_uuid())
    .bind(user.as_uuid())
    .bind(created_at)
    .bind(to_i64(order.version(), "version")?)
    .bind(serde_json::to_value(order)?)
    .execute(executor)
    .await
    .map_err(|e| map_sqlx_error("insert_order", e))?;
    Ok(())
}

fn order_documents(rows: &[PgRow]) -> Result<Vec<Order>, StoreError> {
    rows.iter().map(|r| document(r, "document")).collect()
}

#[async_trait]
impl OrderStore for PostgresOrderStore {
    #[instrument(skip(self, order), fields(order_id = %order.id_typed()), err)]
    async fn insert(&self, order: &Order) -> Result<(), StoreError> {
        insert_order(&self.pool, order).await
    }

    async fn get(&self, id: OrderId) -> Result<Option<Order>, StoreError> {
        let row = sqlx::query("SELECT document FROM orders WHERE id = $1")
            .bind(id.0.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_order", e))?;
        row.as_ref().map(|r| document(r, "document")).transpose()
    }

    async fn list_by_user(&self, user: UserId) -> Result<Vec<Order>, StoreError> {
        let rows = sqlx::query(
            "SELECT document FROM orders WHERE user_id = $1 ORDER BY created_at DESC, id DESC",
        )
        .bind(user.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_user_orders", e))?;
        order_documents(&rows)
    }

    async fn list_page(&self, offset: u64, limit: u64) -> Result<Vec<Order>, StoreError> {
        let rows = sqlx::query(
            "SELECT document FROM orders ORDER BY created_at DESC, id DESC LIMIT $1 OFFSET $2",
        )
        .bind(to_i64(limit, "limit")?)
        .bind(to_i64(offset, "offset")?)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_orders", e))?;
        order_documents(&rows)
    }

    async fn count(&self) -> Result<u64, StoreError> {
        let row = sqlx::query("SELECT COUNT(*) AS total FROM orders")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("count_orders", e))?;
        let total: i64 = row
            .try_get("total")
            .map_err(|e| map_sqlx_error("count_orders", e))?;
        from_i64(total, "count")
    }

    #[instrument(skip(self, order), fields(order_id = %order.id_typed()), err)]
    async fn save(&self, order: &Order, expected_version: u64) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE orders SET document = $2, version = $3 WHERE id = $1 AND version = $4",
        )
        .bind(order.id_typed().0.as_uuid())
        .bind(serde_json::to_value(order)?)
        .bind(to_i64(order.version(), "version")?)
        .bind(to_i64(expected_version, "version")?)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("save_order", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::conflict(format!(
                "order {} changed concurrently",
                order.id_typed()
            )));
        }
        Ok(())
    }
}

/// Postgres checkout journal.
#[derive(Debug, Clone)]
pub struct PostgresCheckoutJournal {
    pool: PgPool,
}

impl PostgresCheckoutJournal {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CheckoutJournal for PostgresCheckoutJournal {
    #[instrument(skip(self, entry), fields(order_id = %entry.order_id), err)]
    async fn begin(&self, entry: &CheckoutEntry) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO checkout_journal
                (order_id, user_id, cart_id, cart_version, step, entry, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(entry.order_id.0.as_uuid())
        .bind(entry.user_id.as_uuid())
        .bind(entry.cart_id.0.as_uuid())
        .bind(to_i64(entry.cart_version, "cart_version")?)
        .bind(entry.step.as_str())
        .bind(serde_json::to_value(entry)?)
        .bind(entry.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("begin_checkout", e))?;
        Ok(())
    }

    #[instrument(
        skip(self, entry, expected),
        fields(order_id = %entry.order_id, step = entry.step.as_str(), expected = expected.as_str()),
        err
    )]
    async fn update(
        &self,
        entry: &CheckoutEntry,
        expected: &CheckoutStep,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE checkout_journal
            SET step = $2, entry = $3, updated_at = $4
            WHERE order_id = $1 AND step = $5
            "#,
        )
        .bind(entry.order_id.0.as_uuid())
        .bind(entry.step.as_str())
        .bind(serde_json::to_value(entry)?)
        .bind(entry.updated_at)
        .bind(expected.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("update_checkout", e))?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self, entry, order), fields(order_id = %entry.order_id), err)]
    async fn record_order(&self, entry: &CheckoutEntry, order: &Order) -> Result<bool, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("record_order", e))?;

        let claimed = sqlx::query(
            r#"
            UPDATE checkout_journal
            SET step = $2, entry = $3, updated_at = $4
            WHERE order_id = $1 AND step IN ('started', 'stock_reserved')
            "#,
        )
        .bind(entry.order_id.0.as_uuid())
        .bind(entry.step.as_str())
        .bind(serde_json::to_value(entry)?)
        .bind(entry.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("record_order", e))?;

        if claimed.rows_affected() == 0 {
            tx.rollback()
                .await
                .map_err(|e| map_sqlx_error("record_order", e))?;
            return Ok(false);
        }

        insert_order(&mut *tx, order).await?;
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("record_order", e))?;
        Ok(true)
    }

    async fn get(&self, order_id: OrderId) -> Result<Option<CheckoutEntry>, StoreError> {
        let row = sqlx::query("SELECT entry FROM checkout_journal WHERE order_id = $1")
            .bind(order_id.0.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_checkout", e))?;
        row.as_ref().map(|r| document(r, "entry")).transpose()
    }

    async fn list_pending(&self, cutoff: DateTime<Utc>) -> Result<Vec<CheckoutEntry>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT entry FROM checkout_journal
            WHERE step IN ('started', 'stock_reserved', 'order_recorded', 'rolling_back')
              AND updated_at <= $1
            ORDER BY updated_at ASC
            "#,
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_pending_checkouts", e))?;

        rows.iter().map(|r| document(r, "entry")).collect()
    }
}
