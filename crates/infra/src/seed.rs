//! Catalog seeding from a JSON file.
//!
//! The file is an array of products:
//!
//! ```json
//! [{ "title": "Maasai Shuka", "price": 2500, "quantity": 40, "colors": ["red"] }]
//! ```
//!
//! `id` defaults to a fresh identifier, `slug` to the lower-cased,
//! dash-joined title, and `sold` to zero.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use tracing::info;

use bazaar_catalog::{NewProduct, Product, ProductId};
use bazaar_core::{AggregateId, DomainError, Money};

use crate::error::StoreError;
use crate::store::CatalogStore;

#[derive(Debug, Error)]
pub enum SeedError {
    #[error("failed to read catalog seed {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid catalog seed: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid product `{title}`: {source}")]
    Product {
        title: String,
        #[source]
        source: DomainError,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Deserialize)]
struct SeedProduct {
    #[serde(default)]
    id: Option<ProductId>,
    title: String,
    #[serde(default)]
    slug: Option<String>,
    price: Money,
    quantity: i64,
    #[serde(default)]
    sold: i64,
    #[serde(default)]
    colors: Vec<String>,
}

pub fn parse_seed(json: &str) -> Result<Vec<Product>, SeedError> {
    let entries: Vec<SeedProduct> = serde_json::from_str(json)?;
    entries
        .into_iter()
        .map(|entry| {
            Product::new(NewProduct {
                id: entry.id.unwrap_or_else(|| ProductId::new(AggregateId::new())),
                title: entry.title.clone(),
                slug: entry.slug.unwrap_or_default(),
                price: entry.price,
                quantity: entry.quantity,
                sold: entry.sold,
                colors: entry.colors,
            })
            .map_err(|source| SeedError::Product {
                title: entry.title,
                source,
            })
        })
        .collect()
}

pub fn load_seed_file(path: &Path) -> Result<Vec<Product>, SeedError> {
    let raw = std::fs::read_to_string(path).map_err(|source| SeedError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_seed(&raw)
}

/// Upsert `products` into the catalog. Returns how many were written.
pub async fn seed_catalog(
    catalog: &dyn CatalogStore,
    products: Vec<Product>,
) -> Result<usize, SeedError> {
    let count = products.len();
    for product in products {
        catalog.upsert(product).await?;
    }
    info!(products = count, "catalog seeded");
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryCatalogStore;

    #[test]
    fn fills_defaults() {
        let products = parse_seed(
            r#"[{ "title": "Maasai Shuka (Large)", "price": 2500, "quantity": 40 }]"#,
        )
        .unwrap();
        assert_eq!(products.len(), 1);
        assert_eq!(products[0].slug(), "maasai-shuka-large");
        assert_eq!(products[0].sold(), 0);
        assert!(products[0].colors().is_empty());
    }

    #[test]
    fn keeps_given_id() {
        let id = AggregateId::new();
        let json = format!(
            r#"[{{ "id": "{id}", "title": "Kikoi", "slug": "kikoi", "price": 1800, "quantity": 3, "sold": 7, "colors": ["blue"] }}]"#
        );
        let products = parse_seed(&json).unwrap();
        assert_eq!(products[0].id(), ProductId::new(id));
        assert_eq!(products[0].sold(), 7);
    }

    #[test]
    fn rejects_bad_entries() {
        assert!(matches!(parse_seed("{}"), Err(SeedError::Parse(_))));
        assert!(matches!(
            parse_seed(r#"[{ "title": "", "price": 1, "quantity": 1 }]"#),
            Err(SeedError::Product { .. })
        ));
    }

    #[test]
    fn missing_file_names_the_path() {
        let err = load_seed_file(Path::new("/nonexistent/catalog.json")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/catalog.json"));
    }

    #[tokio::test]
    async fn seeding_fills_the_catalog() {
        let store = InMemoryCatalogStore::new();
        let products =
            parse_seed(r#"[{ "title": "A", "price": 1, "quantity": 1 }, { "title": "B", "price": 2, "quantity": 2 }]"#)
                .unwrap();
        assert_eq!(seed_catalog(&store, products).await.unwrap(), 2);
        assert_eq!(store.list().await.unwrap().len(), 2);
    }
}
