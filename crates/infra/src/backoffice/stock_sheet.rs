//! Stock sheet import: CSV rows in, one reconciling commit out.

use chrono::Utc;

use shopdesk_catalog::category::AGGREGATE_TYPE as CATEGORY;
use shopdesk_catalog::product::AGGREGATE_TYPE as PRODUCT;
use shopdesk_catalog::{
    Category, CategoryCommand, ChangePrice, CountStock, CreateCategory, CreateProduct, Product,
    ProductCommand, StockSheetReport, parse_sheet, plan_reconciliation,
};
use shopdesk_core::AggregateId;

use super::Backoffice;
use crate::command_dispatcher::{DispatchError, retry_on_conflict};

/// Reads every record as a row of cells. Rows may have any width.
pub fn read_rows(bytes: &[u8]) -> Result<Vec<Vec<String>>, DispatchError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(bytes);

    reader
        .records()
        .map(|record| {
            record
                .map(|r| r.iter().map(str::to_string).collect())
                .map_err(|e| DispatchError::validation(format!("Invalid stock sheet: {e}")))
        })
        .collect()
}

impl Backoffice {
    /// Creates missing categories and products, and overwrites stock and
    /// price of the ones the sheet matches, all in a single batch.
    pub fn import_stock_sheet(&self, bytes: &[u8]) -> Result<StockSheetReport, DispatchError> {
        let rows = read_rows(bytes)?;
        let sheet = parse_sheet(&rows, self.config.stock_sheet_header_rows);

        let report = retry_on_conflict(|| {
            let now = Utc::now();
            let plan = plan_reconciliation(&sheet, &self.projections.catalog.snapshot(), AggregateId::new);
            let mut uow = self.dispatcher.begin();

            for category in &plan.new_categories {
                let mut aggregate = Category::empty(category.id);
                uow.execute(
                    category.id.0,
                    CATEGORY,
                    &mut aggregate,
                    &CategoryCommand::Create(CreateCategory {
                        category_id: category.id,
                        name: category.name.clone(),
                        occurred_at: now,
                    }),
                )?;
            }

            for planned in &plan.products {
                if planned.existing {
                    let mut product = self.load_product(planned.id)?;
                    uow.execute(
                        planned.id.0,
                        PRODUCT,
                        &mut product,
                        &ProductCommand::CountStock(CountStock { stock: planned.stock, occurred_at: now }),
                    )?;
                    uow.execute(
                        planned.id.0,
                        PRODUCT,
                        &mut product,
                        &ProductCommand::ChangePrice(ChangePrice { price: planned.price, occurred_at: now }),
                    )?;
                } else {
                    let mut product = Product::empty(planned.id);
                    uow.execute(
                        planned.id.0,
                        PRODUCT,
                        &mut product,
                        &ProductCommand::Create(CreateProduct {
                            product_id: planned.id,
                            name: planned.name.clone(),
                            category_id: Some(planned.category_id),
                            price: planned.price,
                            stock: planned.stock,
                            image_url: None,
                            occurred_at: now,
                        }),
                    )?;
                }
            }

            uow.commit()?;
            Ok(plan.report)
        })?;

        tracing::info!(
            categories_created = report.categories_created,
            categories_updated = report.categories_updated,
            products_created = report.products_created,
            products_updated = report.products_updated,
            errors = report.errors.len(),
            "stock sheet reconciled"
        );
        Ok(report)
    }
}
