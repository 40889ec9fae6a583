use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;

use shopdesk_catalog::category::AGGREGATE_TYPE as CATEGORY;
use shopdesk_catalog::product::AGGREGATE_TYPE as PRODUCT;
use shopdesk_catalog::{
    CatalogSnapshot, CategoryEvent, CategoryId, ProductEvent, ProductId, SnapshotProduct,
};
use shopdesk_core::Money;
use shopdesk_events::EventEnvelope;

use super::cursor::StreamCursors;
use super::{decode, ProjectionError};
use crate::read_model::{InMemoryReadStore, ReadStore};

/// Hop limit when following `merged_into` chains.
const MERGE_CHAIN_MAX: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryView {
    pub id: CategoryId,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// Queryable product read model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductView {
    pub id: ProductId,
    pub name: String,
    pub category_id: Option<CategoryId>,
    pub price: Money,
    pub stock: u32,
    pub image_url: Option<String>,
    pub merged_into: Option<ProductId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ProductView {
    pub fn is_retired(&self) -> bool {
        self.merged_into.is_some()
    }
}

/// Categories and products, including the live stock level.
#[derive(Debug, Default)]
pub struct CatalogProjection {
    categories: InMemoryReadStore<CategoryId, CategoryView>,
    products: InMemoryReadStore<ProductId, ProductView>,
    cursors: StreamCursors,
}

impl CatalogProjection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn product(&self, id: &ProductId) -> Option<ProductView> {
        self.products.get(id)
    }

    /// Every product, retired ones included.
    pub fn products(&self) -> Vec<ProductView> {
        self.products.list()
    }

    pub fn live_products(&self) -> Vec<ProductView> {
        self.products.list().into_iter().filter(|p| !p.is_retired()).collect()
    }

    pub fn category(&self, id: &CategoryId) -> Option<CategoryView> {
        self.categories.get(id)
    }

    /// Categories sorted by name.
    pub fn categories(&self) -> Vec<CategoryView> {
        let mut all = self.categories.list();
        all.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
        all
    }

    pub fn category_name(&self, id: Option<CategoryId>) -> Option<String> {
        id.and_then(|id| self.categories.get(&id)).map(|c| c.name)
    }

    /// Follows `merged_into` to the surviving product.
    pub fn keeper_of(&self, id: ProductId) -> ProductId {
        let mut current = id;
        for _ in 0..MERGE_CHAIN_MAX {
            match self.products.get(&current).and_then(|p| p.merged_into) {
                Some(next) => current = next,
                None => break,
            }
        }
        current
    }

    pub fn snapshot(&self) -> CatalogSnapshot {
        CatalogSnapshot {
            categories: self.categories.list().into_iter().map(|c| (c.id, c.name)).collect(),
            products: self
                .products
                .list()
                .into_iter()
                .map(|p| SnapshotProduct {
                    retired: p.is_retired(),
                    id: p.id,
                    name: p.name,
                    category_id: p.category_id,
                })
                .collect(),
        }
    }

    pub fn clear(&self) {
        self.categories.clear();
        self.products.clear();
        self.cursors.clear();
    }

    pub fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), ProjectionError> {
        let aggregate_type = envelope.aggregate_type();
        if aggregate_type != CATEGORY && aggregate_type != PRODUCT {
            return Ok(());
        }
        if !self.cursors.admit(envelope)? {
            return Ok(());
        }

        if aggregate_type == CATEGORY {
            self.apply_category(decode(envelope)?);
        } else {
            self.apply_product(decode(envelope)?);
        }

        self.cursors.advance(envelope.aggregate_id(), envelope.sequence_number());
        Ok(())
    }

    fn apply_category(&self, ev: CategoryEvent) {
        match ev {
            CategoryEvent::Created(e) => self.categories.upsert(
                e.category_id,
                CategoryView {
                    id: e.category_id,
                    name: e.name,
                    created_at: e.occurred_at,
                },
            ),
            CategoryEvent::Renamed(e) => {
                self.categories.update(&e.category_id, &mut |c| c.name = e.name.clone());
            }
        }
    }

    fn apply_product(&self, ev: ProductEvent) {
        match ev {
            ProductEvent::Created(e) => self.products.upsert(
                e.product_id,
                ProductView {
                    id: e.product_id,
                    name: e.name,
                    category_id: e.category_id,
                    price: e.price,
                    stock: e.stock,
                    image_url: e.image_url,
                    merged_into: None,
                    created_at: e.occurred_at,
                    updated_at: e.occurred_at,
                },
            ),
            ProductEvent::DetailsUpdated(e) => {
                self.products.update(&e.product_id, &mut |p| {
                    p.name = e.name.clone();
                    p.category_id = e.category_id;
                    p.image_url = e.image_url.clone();
                    p.updated_at = e.occurred_at;
                });
            }
            ProductEvent::PriceChanged(e) => {
                self.products.update(&e.product_id, &mut |p| {
                    p.price = e.price;
                    p.updated_at = e.occurred_at;
                });
            }
            ProductEvent::StockCounted(e) => {
                self.products.update(&e.product_id, &mut |p| {
                    p.stock = e.counted;
                    p.updated_at = e.occurred_at;
                });
            }
            ProductEvent::StockReserved(e) => {
                self.products.update(&e.product_id, &mut |p| {
                    p.stock = e.remaining;
                    p.updated_at = e.occurred_at;
                });
            }
            ProductEvent::StockReleased(e) => {
                self.products.update(&e.product_id, &mut |p| {
                    p.stock = e.remaining;
                    p.updated_at = e.occurred_at;
                });
            }
            ProductEvent::Retired(e) => {
                self.products.update(&e.product_id, &mut |p| {
                    p.merged_into = Some(e.merged_into);
                    p.updated_at = e.occurred_at;
                });
            }
        }
    }
}
