use std::cmp::Ordering;

use chrono::{DateTime, Utc};

use shopdesk_catalog::category::AGGREGATE_TYPE as CATEGORY;
use shopdesk_catalog::product::AGGREGATE_TYPE as PRODUCT;
use shopdesk_catalog::{
    Category, CategoryCommand, CategoryId, ChangePrice, CountStock, CreateCategory, CreateProduct,
    DuplicateCandidate, Product, ProductCommand, ProductId, RetireAsDuplicate, UpdateDetails,
    group_duplicates, normalize_name,
};
use shopdesk_core::{AggregateId, Money};

use super::Backoffice;
use crate::command_dispatcher::{DispatchError, retry_on_conflict};
use crate::projections::{CategoryView, ProductView};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewProduct {
    pub name: String,
    pub category_id: Option<CategoryId>,
    pub price: Money,
    pub stock: u32,
    pub image_url: Option<String>,
}

/// Admin edit of one product. `None` leaves a field unchanged; an empty
/// `image_url` clears the image.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProductPatch {
    pub name: Option<String>,
    pub category_id: Option<CategoryId>,
    pub image_url: Option<String>,
    pub price: Option<Money>,
    pub stock: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkItem {
    pub id: ProductId,
    pub stock: Option<u32>,
    pub price: Option<Money>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkUpdateReport {
    pub updated: u32,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProductQuery {
    /// Case-insensitive substring of the product or category name.
    pub search: Option<String>,
    /// Case-insensitive exact category name.
    pub category: Option<String>,
    /// `price`, `name` or `stock`, optionally prefixed with `-`.
    pub ordering: Option<String>,
    pub limit: Option<usize>,
    pub offset: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeReport {
    pub groups: usize,
    /// `(retired, keeper)` pairs.
    pub retired: Vec<(ProductId, ProductId)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockExport {
    pub filename: String,
    pub body: Vec<u8>,
}

const EXPORT_HEADER: [&str; 5] = ["ID", "Name", "Category", "Price", "Stock"];

impl Backoffice {
    pub fn create_category(&self, name: &str) -> Result<CategoryView, DispatchError> {
        let wanted = normalize_name(name);
        if self
            .projections
            .catalog
            .categories()
            .iter()
            .any(|c| normalize_name(&c.name) == wanted)
        {
            return Err(DispatchError::validation(format!(
                "Category {} already exists.",
                name.trim()
            )));
        }

        let id = CategoryId::new(AggregateId::new());
        self.dispatcher.dispatch(
            id.0,
            CATEGORY,
            CategoryCommand::Create(CreateCategory {
                category_id: id,
                name: name.to_string(),
                occurred_at: Utc::now(),
            }),
            |a| Category::empty(CategoryId::new(a)),
        )?;

        self.projections
            .catalog
            .category(&id)
            .ok_or_else(|| DispatchError::not_found("Category not found"))
    }

    pub fn create_product(&self, new: NewProduct) -> Result<ProductView, DispatchError> {
        self.ensure_category(new.category_id)?;

        let id = ProductId::new(AggregateId::new());
        self.dispatcher.dispatch(
            id.0,
            PRODUCT,
            ProductCommand::Create(CreateProduct {
                product_id: id,
                name: new.name,
                category_id: new.category_id,
                price: new.price,
                stock: new.stock,
                image_url: new.image_url,
                occurred_at: Utc::now(),
            }),
            |a| Product::empty(ProductId::new(a)),
        )?;

        tracing::info!(product_id = %id, "product created");
        self.product_view(id)
    }

    /// Details, price and stock of one product change in a single commit.
    pub fn update_product(&self, id: ProductId, patch: ProductPatch) -> Result<ProductView, DispatchError> {
        self.ensure_category(patch.category_id)?;

        retry_on_conflict(|| {
            let now = Utc::now();
            let mut product = self.load_product(id)?;
            let mut uow = self.dispatcher.begin();

            if patch.name.is_some() || patch.category_id.is_some() || patch.image_url.is_some() {
                uow.execute(
                    id.0,
                    PRODUCT,
                    &mut product,
                    &ProductCommand::UpdateDetails(UpdateDetails {
                        name: patch.name.clone(),
                        category_id: patch.category_id,
                        image_url: patch.image_url.clone(),
                        occurred_at: now,
                    }),
                )?;
            }
            if let Some(price) = patch.price {
                uow.execute(
                    id.0,
                    PRODUCT,
                    &mut product,
                    &ProductCommand::ChangePrice(ChangePrice { price, occurred_at: now }),
                )?;
            }
            if let Some(stock) = patch.stock {
                uow.execute(
                    id.0,
                    PRODUCT,
                    &mut product,
                    &ProductCommand::CountStock(CountStock { stock, occurred_at: now }),
                )?;
            }
            uow.commit()
        })?;

        self.product_view(id)
    }

    /// Applies stock/price edits to many products at once.
    ///
    /// Unknown and merged ids are reported and skipped; everything else
    /// commits as one batch. Items without a stock or price are not counted.
    pub fn bulk_update(&self, items: &[BulkItem]) -> Result<BulkUpdateReport, DispatchError> {
        if items.is_empty() {
            return Err(DispatchError::validation("items must be a non-empty list."));
        }

        let report = retry_on_conflict(|| {
            let now = Utc::now();
            let mut report = BulkUpdateReport::default();
            let mut loaded: Vec<Product> = Vec::new();
            let mut uow = self.dispatcher.begin();

            for item in items {
                let idx = match loaded.iter().position(|p| p.id_typed() == item.id) {
                    Some(idx) => idx,
                    None => match self.load_product(item.id) {
                        Ok(product) => {
                            loaded.push(product);
                            loaded.len() - 1
                        }
                        Err(DispatchError::NotFound(_)) => {
                            report.errors.push(format!("Product {} not found", item.id));
                            continue;
                        }
                        Err(other) => return Err(other),
                    },
                };
                let product = &mut loaded[idx];
                if let Some(keeper) = product.merged_into() {
                    report.errors.push(format!(
                        "Product {}: {} was merged into product {keeper}.",
                        item.id,
                        product.name()
                    ));
                    continue;
                }
                if item.stock.is_none() && item.price.is_none() {
                    continue;
                }

                if let Some(stock) = item.stock {
                    uow.execute(
                        item.id.0,
                        PRODUCT,
                        product,
                        &ProductCommand::CountStock(CountStock { stock, occurred_at: now }),
                    )?;
                }
                if let Some(price) = item.price {
                    uow.execute(
                        item.id.0,
                        PRODUCT,
                        product,
                        &ProductCommand::ChangePrice(ChangePrice { price, occurred_at: now }),
                    )?;
                }
                report.updated += 1;
            }

            uow.commit()?;
            Ok(report)
        })?;

        tracing::info!(updated = report.updated, errors = report.errors.len(), "bulk product update");
        Ok(report)
    }

    /// Detail of one product. Retired products stay addressable by id.
    pub fn product(&self, id: ProductId) -> Result<ProductView, DispatchError> {
        self.product_view(id)
    }

    pub fn categories(&self) -> Vec<CategoryView> {
        let mut categories = self.projections.catalog.categories();
        categories.sort_by(|a, b| compare_names(&a.name, &b.name));
        categories
    }

    /// Live products matching `query`, ordered and paged.
    pub fn list_products(&self, query: &ProductQuery) -> Vec<ProductView> {
        let catalog = &self.projections.catalog;
        let search = query.search.as_deref().map(str::trim).filter(|s| !s.is_empty()).map(str::to_lowercase);
        let category = query.category.as_deref().map(str::trim).filter(|s| !s.is_empty()).map(str::to_lowercase);

        let mut found: Vec<ProductView> = catalog
            .live_products()
            .into_iter()
            .filter(|p| {
                let category_name = catalog.category_name(p.category_id).unwrap_or_default().to_lowercase();
                let search_ok = search
                    .as_ref()
                    .is_none_or(|s| p.name.to_lowercase().contains(s) || category_name.contains(s));
                let category_ok = category.as_ref().is_none_or(|c| &category_name == c);
                search_ok && category_ok
            })
            .collect();

        let ordering = query.ordering.as_deref().unwrap_or("name").trim();
        let (descending, field) = match ordering.strip_prefix('-') {
            Some(field) => (true, field),
            None => (false, ordering),
        };
        found.sort_by(|a, b| {
            let ord = match field {
                "price" => a.price.cmp(&b.price),
                "stock" => a.stock.cmp(&b.stock),
                _ => compare_names(&a.name, &b.name),
            }
            .then_with(|| a.id.cmp(&b.id));
            if descending { ord.reverse() } else { ord }
        });

        let limit = query.limit.unwrap_or(usize::MAX);
        found.into_iter().skip(query.offset).take(limit).collect()
    }

    /// CSV of every live product, ordered by name.
    pub fn export_stock(&self, now: DateTime<Utc>) -> Result<StockExport, DispatchError> {
        let catalog = &self.projections.catalog;
        let mut products = catalog.live_products();
        products.sort_by(|a, b| compare_names(&a.name, &b.name).then_with(|| a.id.cmp(&b.id)));

        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.write_record(EXPORT_HEADER).map_err(|e| DispatchError::Io(e.to_string()))?;
        for p in &products {
            let category = catalog.category_name(p.category_id).unwrap_or_default();
            writer
                .write_record([
                    p.id.to_string(),
                    p.name.clone(),
                    category,
                    p.price.to_string(),
                    p.stock.to_string(),
                ])
                .map_err(|e| DispatchError::Io(e.to_string()))?;
        }
        let body = writer.into_inner().map_err(|e| DispatchError::Io(e.to_string()))?;

        Ok(StockExport {
            filename: format!("stock_{}.csv", now.format("%Y%m%d_%H%M%S")),
            body,
        })
    }

    /// Retires products whose names normalize to the same key, keeping the
    /// best-described one of each group.
    pub fn merge_duplicates(&self) -> Result<MergeReport, DispatchError> {
        let report = retry_on_conflict(|| {
            let candidates: Vec<DuplicateCandidate> = self
                .projections
                .catalog
                .live_products()
                .into_iter()
                .map(|p| DuplicateCandidate {
                    has_image: p.image_url.is_some(),
                    has_category: p.category_id.is_some(),
                    id: p.id,
                    name: p.name,
                })
                .collect();
            let groups = group_duplicates(&candidates);

            let now = Utc::now();
            let mut report = MergeReport {
                groups: groups.len(),
                retired: Vec::new(),
            };
            let mut uow = self.dispatcher.begin();
            for group in &groups {
                for &duplicate in &group.duplicates {
                    let mut product = self.load_product(duplicate)?;
                    uow.execute(
                        duplicate.0,
                        PRODUCT,
                        &mut product,
                        &ProductCommand::RetireAsDuplicate(RetireAsDuplicate {
                            keeper: group.keeper,
                            occurred_at: now,
                        }),
                    )?;
                    report.retired.push((duplicate, group.keeper));
                }
            }
            uow.commit()?;
            Ok(report)
        })?;

        tracing::info!(groups = report.groups, retired = report.retired.len(), "duplicate products merged");
        Ok(report)
    }

    fn ensure_category(&self, id: Option<CategoryId>) -> Result<(), DispatchError> {
        match id {
            Some(id) if self.projections.catalog.category(&id).is_none() => {
                Err(DispatchError::validation(format!("Category {id} not found.")))
            }
            _ => Ok(()),
        }
    }
}

fn compare_names(a: &str, b: &str) -> Ordering {
    a.to_lowercase().cmp(&b.to_lowercase())
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::backoffice::testing::{backoffice, category, product, stock_of};
    use crate::event_store::EventStore;

    #[test]
    fn duplicate_category_names_are_rejected() {
        let bo = backoffice();
        bo.create_category("Snacks").unwrap();
        let err = bo.create_category(" snacks ").unwrap_err();
        assert!(matches!(err, DispatchError::Validation(msg) if msg == "Category snacks already exists."));
    }

    #[test]
    fn update_product_changes_everything_in_one_commit() {
        let bo = backoffice();
        let snacks = category(&bo, "Snacks");
        let id = product(&bo, "Chips", 20, 5);

        let view = bo
            .update_product(
                id,
                ProductPatch {
                    name: Some("Potato Chips".into()),
                    category_id: Some(snacks),
                    price: Some(Money::from_rupees(25)),
                    stock: Some(9),
                    ..ProductPatch::default()
                },
            )
            .unwrap();

        assert_eq!(view.name, "Potato Chips");
        assert_eq!(view.category_id, Some(snacks));
        assert_eq!(view.price, Money::from_rupees(25));
        assert_eq!(view.stock, 9);
        let history = bo.dispatcher().store().load_stream(id.0).unwrap();
        assert_eq!(history.len(), 4);
        assert_eq!(history[1].global_position + 1, history[2].global_position);
    }

    #[test]
    fn unknown_category_is_rejected() {
        let bo = backoffice();
        let err = bo
            .create_product(NewProduct {
                name: "Soap".into(),
                category_id: Some(CategoryId::new(AggregateId::new())),
                price: Money::ZERO,
                stock: 0,
                image_url: None,
            })
            .unwrap_err();
        assert!(matches!(err, DispatchError::Validation(_)));
    }

    #[test]
    fn bulk_update_reports_unknown_ids_and_applies_the_rest() {
        let bo = backoffice();
        let a = product(&bo, "Rice", 60, 1);
        let b = product(&bo, "Dal", 90, 1);
        let ghost = ProductId::new(AggregateId::new());

        let report = bo
            .bulk_update(&[
                BulkItem { id: a, stock: Some(10), price: None },
                BulkItem { id: ghost, stock: Some(3), price: None },
                BulkItem { id: b, stock: None, price: Some(Money::from_rupees(95)) },
            ])
            .unwrap();

        assert_eq!(report.updated, 2);
        assert_eq!(report.errors, vec![format!("Product {ghost} not found")]);
        assert_eq!(stock_of(&bo, a), 10);
        assert_eq!(bo.projections().catalog.product(&b).unwrap().price, Money::from_rupees(95));
    }

    #[test]
    fn bulk_update_skips_merged_products() {
        let bo = backoffice();
        let a = product(&bo, "Soap", 30, 1);
        let b = product(&bo, "Soap ", 30, 1);
        let rice = product(&bo, "Rice", 60, 5);
        bo.merge_duplicates().unwrap();
        let retired = if bo.projections().catalog.product(&a).unwrap().is_retired() { a } else { b };
        let keeper = if retired == a { b } else { a };

        let report = bo
            .bulk_update(&[
                BulkItem { id: rice, stock: Some(99), price: None },
                BulkItem { id: retired, stock: Some(1), price: None },
            ])
            .unwrap();

        assert_eq!(report.updated, 1);
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].starts_with(&format!("Product {retired}: ")));
        assert!(report.errors[0].ends_with(&format!("was merged into product {keeper}.")));
        assert_eq!(stock_of(&bo, rice), 99);
        assert_eq!(stock_of(&bo, retired), 1);
    }

    #[test]
    fn bulk_update_counts_only_changed_items() {
        let bo = backoffice();
        let rice = product(&bo, "Rice", 60, 5);
        let dal = product(&bo, "Dal", 90, 2);

        let report = bo
            .bulk_update(&[
                BulkItem { id: rice, stock: None, price: None },
                BulkItem { id: dal, stock: Some(4), price: None },
            ])
            .unwrap();

        assert_eq!(report.updated, 1);
        assert!(report.errors.is_empty());
        assert_eq!(stock_of(&bo, rice), 5);
        assert_eq!(stock_of(&bo, dal), 4);
    }

    #[test]
    fn bulk_update_needs_items() {
        let bo = backoffice();
        assert!(matches!(bo.bulk_update(&[]), Err(DispatchError::Validation(_))));
    }

    #[test]
    fn listing_filters_orders_and_pages() {
        let bo = backoffice();
        let snacks = category(&bo, "Snacks");
        for (name, price, stock) in [("Chips", 20, 5), ("Biscuits", 10, 9), ("Soap", 35, 1)] {
            let id = product(&bo, name, price, stock);
            if name != "Soap" {
                bo.update_product(id, ProductPatch { category_id: Some(snacks), ..Default::default() })
                    .unwrap();
            }
        }

        let names = |q: ProductQuery| bo.list_products(&q).into_iter().map(|p| p.name).collect::<Vec<_>>();

        assert_eq!(names(ProductQuery::default()), vec!["Biscuits", "Chips", "Soap"]);
        assert_eq!(
            names(ProductQuery { ordering: Some("-price".into()), ..Default::default() }),
            vec!["Soap", "Chips", "Biscuits"]
        );
        assert_eq!(
            names(ProductQuery { category: Some("SNACKS".into()), ..Default::default() }),
            vec!["Biscuits", "Chips"]
        );
        assert_eq!(
            names(ProductQuery { search: Some("nack".into()), ordering: Some("stock".into()), ..Default::default() }),
            vec!["Chips", "Biscuits"]
        );
        assert_eq!(
            names(ProductQuery { limit: Some(1), offset: 1, ..Default::default() }),
            vec!["Chips"]
        );
    }

    #[test]
    fn export_writes_header_and_sorted_rows() {
        let bo = backoffice();
        let snacks = category(&bo, "Snacks");
        let chips = product(&bo, "chips", 20, 5);
        bo.update_product(chips, ProductPatch { category_id: Some(snacks), ..Default::default() })
            .unwrap();
        let atta = product(&bo, "Atta 5kg", 250, 2);

        let now = Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
        let export = bo.export_stock(now).unwrap();

        assert_eq!(export.filename, "stock_20240309_140507.csv");
        let text = String::from_utf8(export.body).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "ID,Name,Category,Price,Stock");
        assert_eq!(lines[1], format!("{atta},Atta 5kg,,250.00,2"));
        assert_eq!(lines[2], format!("{chips},chips,Snacks,20.00,5"));
    }

    #[test]
    fn merge_keeps_the_described_product() {
        let bo = backoffice();
        let snacks = category(&bo, "Snacks");
        let plain = product(&bo, "Parle-G 100g", 10, 3);
        let described = product(&bo, "parle g 100G", 10, 4);
        bo.update_product(described, ProductPatch { category_id: Some(snacks), ..Default::default() })
            .unwrap();

        let report = bo.merge_duplicates().unwrap();

        assert_eq!(report.groups, 1);
        assert_eq!(report.retired, vec![(plain, described)]);
        assert!(bo.projections().catalog.product(&plain).unwrap().is_retired());
        assert_eq!(bo.projections().catalog.keeper_of(plain), described);
        assert_eq!(bo.list_products(&ProductQuery::default()).len(), 1);

        // Nothing left to merge.
        assert_eq!(bo.merge_duplicates().unwrap(), MergeReport::default());
    }
}
