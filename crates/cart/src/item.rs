//! Cart line items and their validated building blocks.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use bazaar_catalog::{Product, ProductId};
use bazaar_core::{DomainError, DomainResult, Money, line_total};

/// Largest quantity a single cart line may hold.
pub const MAX_QUANTITY: i64 = 100;

/// Longest accepted color label, in characters.
pub const MAX_COLOR_LEN: usize = 50;

/// Line quantity, always within `1..=MAX_QUANTITY`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct Quantity(i64);

impl Quantity {
    pub fn new(value: i64) -> DomainResult<Self> {
        if !(1..=MAX_QUANTITY).contains(&value) {
            return Err(DomainError::validation(format!(
                "quantity must be an integer between 1 and {MAX_QUANTITY}"
            )));
        }
        Ok(Self(value))
    }

    /// Parse a quantity from raw request JSON.
    ///
    /// Integral floats (`2.0`) are accepted; fractional values, strings and
    /// anything else are a validation error.
    pub fn from_json(value: &JsonValue) -> DomainResult<Self> {
        let JsonValue::Number(n) = value else {
            return Err(DomainError::validation("quantity must be a number"));
        };

        if let Some(i) = n.as_i64() {
            return Self::new(i);
        }

        match n.as_f64() {
            Some(f) if f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 => {
                Self::new(f as i64)
            }
            _ => Err(DomainError::validation("quantity must be an integer")),
        }
    }

    pub fn get(self) -> i64 {
        self.0
    }
}

impl TryFrom<i64> for Quantity {
    type Error = DomainError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Quantity> for i64 {
    fn from(value: Quantity) -> Self {
        value.0
    }
}

/// Color label of a line (trimmed, at most `MAX_COLOR_LEN` characters).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Color(String);

impl Color {
    pub fn new(value: &str) -> DomainResult<Self> {
        let trimmed = value.trim();
        if trimmed.chars().count() > MAX_COLOR_LEN {
            return Err(DomainError::validation(format!(
                "color cannot be longer than {MAX_COLOR_LEN} characters"
            )));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Color {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(&value)
    }
}

impl From<Color> for String {
    fn from(value: Color) -> Self {
        value.0
    }
}

impl core::fmt::Display for Color {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Uniqueness key of a line within a cart.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LineKey {
    pub product_id: ProductId,
    pub color: Color,
}

/// A line-item request that passed shape validation but has not yet been
/// checked against the catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestedItem {
    pub product_id: ProductId,
    pub quantity: Quantity,
    pub color: Color,
}

impl RequestedItem {
    /// Validate the raw request fields, in order: identifier, quantity, color.
    pub fn parse(product: &str, quantity: &JsonValue, color: Option<&str>) -> DomainResult<Self> {
        let product_id: ProductId = product.parse()?;
        let quantity = Quantity::from_json(quantity)?;
        let color = Color::new(color.unwrap_or_default())?;
        Ok(Self {
            product_id,
            quantity,
            color,
        })
    }

    /// Check the request against the catalog product and snapshot its price
    /// and display fields into a cart line.
    pub fn resolve(&self, product: &Product) -> DomainResult<CartItem> {
        if product.id() != self.product_id {
            return Err(DomainError::invariant("resolved against the wrong product"));
        }
        product.ensure_available(self.quantity.get())?;
        Ok(CartItem {
            product_id: self.product_id,
            color: self.color.clone(),
            quantity: self.quantity,
            price: product.price(),
            title: product.title().to_string(),
            slug: product.slug().to_string(),
        })
    }
}

/// One `(product, color, quantity, price)` line of a cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartItem {
    pub product_id: ProductId,
    pub color: Color,
    pub quantity: Quantity,
    /// Catalog price captured when the line was merged.
    pub price: Money,
    pub title: String,
    pub slug: String,
}

impl CartItem {
    pub fn key(&self) -> LineKey {
        LineKey {
            product_id: self.product_id,
            color: self.color.clone(),
        }
    }

    pub fn line_total(&self) -> DomainResult<Money> {
        line_total(self.price, self.quantity.get())
    }
}
