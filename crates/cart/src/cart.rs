use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use bazaar_catalog::ProductId;
use bazaar_core::{
    Aggregate, AggregateId, AggregateRoot, DomainError, DomainResult, Event, Money, UserId,
    money,
};

use crate::item::CartItem;

/// Cart identifier. There is at most one cart per user.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CartId(pub AggregateId);

impl CartId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for CartId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Aggregate root: Cart.
///
/// `cart_total` is derived: it is recomputed from `items` after every applied
/// event, so a persisted cart always satisfies `cart_total == Σ price × quantity`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cart {
    id: CartId,
    owner: Option<UserId>,
    items: Vec<CartItem>,
    cart_total: Money,
    version: u64,
    created: bool,
    updated_at: Option<DateTime<Utc>>,
}

impl Cart {
    /// Create an empty, not-yet-opened cart.
    pub fn empty(id: CartId) -> Self {
        Self {
            id,
            owner: None,
            items: Vec::new(),
            cart_total: 0,
            version: 0,
            created: false,
            updated_at: None,
        }
    }

    pub fn id_typed(&self) -> CartId {
        self.id
    }

    pub fn owner(&self) -> Option<UserId> {
        self.owner
    }

    pub fn items(&self) -> &[CartItem] {
        &self.items
    }

    pub fn cart_total(&self) -> Money {
        self.cart_total
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Units of `product_id` across every color.
    pub fn quantity_of(&self, product_id: ProductId) -> i64 {
        self.items
            .iter()
            .filter(|item| item.product_id == product_id)
            .map(|item| item.quantity.get())
            .sum()
    }

    pub fn is_created(&self) -> bool {
        self.created
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    /// Pre-save hook: every line's snapshotted price must still equal the
    /// catalog price.
    ///
    /// `current_price` returns `None` for products that left the catalog.
    pub fn verify_prices<F>(&self, mut current_price: F) -> DomainResult<()>
    where
        F: FnMut(ProductId) -> Option<Money>,
    {
        for item in &self.items {
            let current = current_price(item.product_id)
                .ok_or_else(|| DomainError::not_found(format!("product {}", item.product_id)))?;
            if current != item.price {
                return Err(DomainError::price_mismatch(
                    item.product_id.0,
                    item.price,
                    current,
                ));
            }
        }
        Ok(())
    }

    /// Check the derived total against the items.
    pub fn verify_total(&self) -> DomainResult<()> {
        let expected = compute_total(&self.items)?;
        if expected != self.cart_total {
            return Err(DomainError::invariant(format!(
                "cart total {} does not match items ({expected})",
                self.cart_total
            )));
        }
        Ok(())
    }
}

impl AggregateRoot for Cart {
    type Id = CartId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: MergeItems (opens the cart on first use).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeItems {
    pub owner: UserId,
    /// Catalog-resolved lines, in request order.
    pub lines: Vec<CartItem>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RemoveProduct (every color of the product).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoveProduct {
    pub owner: UserId,
    pub product_id: ProductId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: EmptyCart (after checkout).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmptyCart {
    pub owner: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CartCommand {
    MergeItems(MergeItems),
    RemoveProduct(RemoveProduct),
    EmptyCart(EmptyCart),
}

/// Event: CartOpened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartOpened {
    pub cart_id: CartId,
    pub owner: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ItemsMerged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemsMerged {
    pub cart_id: CartId,
    pub lines: Vec<CartItem>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ProductRemoved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductRemoved {
    pub cart_id: CartId,
    pub product_id: ProductId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: CartEmptied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartEmptied {
    pub cart_id: CartId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CartEvent {
    CartOpened(CartOpened),
    ItemsMerged(ItemsMerged),
    ProductRemoved(ProductRemoved),
    CartEmptied(CartEmptied),
}

impl Event for CartEvent {
    fn event_type(&self) -> &'static str {
        match self {
            CartEvent::CartOpened(_) => "cart.opened",
            CartEvent::ItemsMerged(_) => "cart.items_merged",
            CartEvent::ProductRemoved(_) => "cart.product_removed",
            CartEvent::CartEmptied(_) => "cart.emptied",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            CartEvent::CartOpened(e) => e.occurred_at,
            CartEvent::ItemsMerged(e) => e.occurred_at,
            CartEvent::ProductRemoved(e) => e.occurred_at,
            CartEvent::CartEmptied(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Cart {
    type Command = CartCommand;
    type Event = CartEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            CartEvent::CartOpened(e) => {
                self.id = e.cart_id;
                self.owner = Some(e.owner);
                self.items.clear();
                self.created = true;
            }
            CartEvent::ItemsMerged(e) => {
                self.items = merged_lines(&self.items, &e.lines);
            }
            CartEvent::ProductRemoved(e) => {
                self.items.retain(|item| item.product_id != e.product_id);
            }
            CartEvent::CartEmptied(_) => {
                self.items.clear();
            }
        }

        // handle() already rejected overflowing merges.
        self.cart_total = compute_total(&self.items).unwrap_or(Money::MAX);
        self.updated_at = Some(event.occurred_at());
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            CartCommand::MergeItems(cmd) => self.handle_merge(cmd),
            CartCommand::RemoveProduct(cmd) => self.handle_remove(cmd),
            CartCommand::EmptyCart(cmd) => self.handle_empty(cmd),
        }
    }
}

impl Cart {
    fn ensure_owner(&self, owner: UserId) -> Result<(), DomainError> {
        if !self.created {
            return Ok(());
        }
        if self.owner != Some(owner) {
            return Err(DomainError::Unauthorized);
        }
        Ok(())
    }

    fn handle_merge(&self, cmd: &MergeItems) -> Result<Vec<CartEvent>, DomainError> {
        self.ensure_owner(cmd.owner)?;

        if cmd.lines.is_empty() {
            return Err(DomainError::validation("at least one item is required"));
        }

        compute_total(&merged_lines(&self.items, &cmd.lines))?;

        let mut events = Vec::with_capacity(2);
        if !self.created {
            events.push(CartEvent::CartOpened(CartOpened {
                cart_id: self.id,
                owner: cmd.owner,
                occurred_at: cmd.occurred_at,
            }));
        }
        events.push(CartEvent::ItemsMerged(ItemsMerged {
            cart_id: self.id,
            lines: cmd.lines.clone(),
            occurred_at: cmd.occurred_at,
        }));
        Ok(events)
    }

    fn handle_remove(&self, cmd: &RemoveProduct) -> Result<Vec<CartEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found("cart"));
        }
        self.ensure_owner(cmd.owner)?;

        if !self.items.iter().any(|item| item.product_id == cmd.product_id) {
            return Err(DomainError::not_found(format!(
                "product {} in cart",
                cmd.product_id
            )));
        }

        Ok(vec![CartEvent::ProductRemoved(ProductRemoved {
            cart_id: self.id,
            product_id: cmd.product_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_empty(&self, cmd: &EmptyCart) -> Result<Vec<CartEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found("cart"));
        }
        self.ensure_owner(cmd.owner)?;

        Ok(vec![CartEvent::CartEmptied(CartEmptied {
            cart_id: self.id,
            occurred_at: cmd.occurred_at,
        })])
    }
}

/// Last-write-wins merge on `(product, color)`.
///
/// An incoming line replaces the quantity and price snapshot of an existing
/// line with the same key (it does not add to it) and keeps that line's
/// position; new keys are appended in arrival order.
fn merged_lines(existing: &[CartItem], incoming: &[CartItem]) -> Vec<CartItem> {
    let mut merged = existing.to_vec();
    for line in incoming {
        let key = line.key();
        match merged.iter_mut().find(|item| item.key() == key) {
            Some(item) => *item = line.clone(),
            None => merged.push(line.clone()),
        }
    }
    merged
}

fn compute_total(items: &[CartItem]) -> DomainResult<Money> {
    let totals = items
        .iter()
        .map(CartItem::line_total)
        .collect::<DomainResult<Vec<_>>>()?;
    money::sum(totals)
}
