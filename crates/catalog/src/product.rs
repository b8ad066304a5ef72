use serde::{Deserialize, Serialize};

use bazaar_core::{AggregateId, DomainError, DomainResult, Money};

/// Product identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductId(pub AggregateId);

impl ProductId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for ProductId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

impl core::str::FromStr for ProductId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

/// Input for registering a catalog product.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewProduct {
    pub id: ProductId,
    pub title: String,
    pub slug: String,
    /// Price in smallest currency unit (e.g., cents).
    pub price: Money,
    /// Units in stock.
    pub quantity: i64,
    pub sold: i64,
    pub colors: Vec<String>,
}

/// A catalog product: price, stock and sold counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    id: ProductId,
    title: String,
    slug: String,
    price: Money,
    quantity: i64,
    sold: i64,
    colors: Vec<String>,
}

impl Product {
    pub fn new(input: NewProduct) -> DomainResult<Self> {
        if input.title.trim().is_empty() {
            return Err(DomainError::validation("title cannot be empty"));
        }
        if input.price == 0 {
            return Err(DomainError::validation("price must be positive"));
        }
        if input.quantity < 0 {
            return Err(DomainError::validation("quantity cannot be negative"));
        }
        if input.sold < 0 {
            return Err(DomainError::validation("sold cannot be negative"));
        }

        let slug = if input.slug.trim().is_empty() {
            slugify(&input.title)
        } else {
            input.slug.trim().to_string()
        };

        Ok(Self {
            id: input.id,
            title: input.title.trim().to_string(),
            slug,
            price: input.price,
            quantity: input.quantity,
            sold: input.sold,
            colors: input.colors,
        })
    }

    pub fn id(&self) -> ProductId {
        self.id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn slug(&self) -> &str {
        &self.slug
    }

    pub fn price(&self) -> Money {
        self.price
    }

    /// Units currently in stock.
    pub fn quantity(&self) -> i64 {
        self.quantity
    }

    pub fn sold(&self) -> i64 {
        self.sold
    }

    pub fn colors(&self) -> &[String] {
        &self.colors
    }

    /// Reprice the product. Carts holding the old price fail their next save.
    pub fn set_price(&mut self, price: Money) -> DomainResult<()> {
        if price == 0 {
            return Err(DomainError::validation("price must be positive"));
        }
        self.price = price;
        Ok(())
    }

    /// Fails with `InsufficientStock` when `requested` exceeds the stock.
    pub fn ensure_available(&self, requested: i64) -> DomainResult<()> {
        if requested > self.quantity {
            return Err(DomainError::insufficient_stock(
                self.id.0,
                requested,
                self.quantity,
            ));
        }
        Ok(())
    }

    /// Move `quantity` units from stock to sold. Never lets stock go negative.
    pub fn record_sale(&mut self, quantity: i64) -> DomainResult<()> {
        if quantity <= 0 {
            return Err(DomainError::validation("sale quantity must be positive"));
        }
        self.ensure_available(quantity)?;
        self.quantity -= quantity;
        self.sold += quantity;
        Ok(())
    }

    /// Undo a previously recorded sale.
    pub fn restock_sale(&mut self, quantity: i64) -> DomainResult<()> {
        if quantity <= 0 {
            return Err(DomainError::validation("restock quantity must be positive"));
        }
        if quantity > self.sold {
            return Err(DomainError::invariant("cannot restock more than was sold"));
        }
        self.quantity += quantity;
        self.sold -= quantity;
        Ok(())
    }
}

fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    let mut dash = false;
    for c in title.trim().chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
            dash = false;
        } else if !dash && !slug.is_empty() {
            slug.push('-');
            dash = true;
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    slug
}
