//! Stock sheet classification and reconciliation planning.
//!
//! A stock sheet is the shop's ERP stock report exported as rows of string
//! cells. Category rows introduce a group; numbered rows below a category are
//! products with a stock count and a rate. Planning is pure: it compares the
//! parsed sheet with a catalog snapshot and says what to create and update.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use shopdesk_core::{AggregateId, Money};

use crate::naming::normalize_name;
use crate::{CategoryId, ProductId};

pub const DEFAULT_HEADER_ROWS: usize = 7;

static PRODUCT_ROW: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+").expect("literal pattern"));
static SERIAL_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+\s*[.\-]?\s*").expect("literal pattern"));

/// What a single sheet row is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SheetRow {
    Category { name: String },
    Product { name: String, stock: u32, rate: Money },
    Ignored,
}

/// Classifies one row. Only the first three cells are read.
pub fn classify_row(cells: &[String]) -> SheetRow {
    if cells.len() < 3 {
        return SheetRow::Ignored;
    }
    let desc = cells[0].trim();
    if desc.is_empty() || desc.contains("MARG ERP") || desc.to_uppercase().contains("TOTAL") {
        return SheetRow::Ignored;
    }

    let stock_cell = cells[1].trim();
    let rate_cell = cells[2].trim();

    if PRODUCT_ROW.is_match(desc) {
        let name = SERIAL_PREFIX.replace(desc, "").trim().to_string();
        return SheetRow::Product {
            name,
            stock: parse_stock(stock_cell),
            rate: parse_rate(rate_cell),
        };
    }

    if stock_cell.is_empty() && rate_cell.is_empty() {
        return SheetRow::Category { name: desc.to_string() };
    }

    SheetRow::Ignored
}

/// `-`, `N/A` and blanks count as zero; `8.0` reads as 8; anything unparsable is zero.
fn parse_stock(cell: &str) -> u32 {
    if matches!(cell, "" | "-" | "N/A") {
        return 0;
    }
    match cell.parse::<f64>() {
        Ok(v) if v.is_finite() && v > 0.0 => v.trunc().min(f64::from(u32::MAX)) as u32,
        _ => 0,
    }
}

fn parse_rate(cell: &str) -> Money {
    if cell.is_empty() {
        return Money::ZERO;
    }
    if let Ok(m) = Money::parse(cell) {
        return m;
    }
    match cell.parse::<f64>() {
        Ok(v) if v.is_finite() && v > 0.0 => Money::from_paise((v * 100.0).round() as u64),
        _ => Money::ZERO,
    }
}

/// A classified row with its 1-based sheet row number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SheetEntry {
    Category {
        row: usize,
        name: String,
    },
    Product {
        row: usize,
        category: String,
        name: String,
        stock: u32,
        rate: Money,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedSheet {
    pub entries: Vec<SheetEntry>,
    pub errors: Vec<String>,
}

/// Skips `header_rows` leading rows and classifies the rest in order.
pub fn parse_sheet(rows: &[Vec<String>], header_rows: usize) -> ParsedSheet {
    let mut parsed = ParsedSheet::default();
    let mut current_category: Option<String> = None;

    for (idx, cells) in rows.iter().enumerate().skip(header_rows) {
        let row = idx + 1;
        match classify_row(cells) {
            SheetRow::Ignored => {}
            SheetRow::Category { name } => {
                current_category = Some(name.clone());
                parsed.entries.push(SheetEntry::Category { row, name });
            }
            SheetRow::Product { name, stock, rate } => match &current_category {
                Some(category) => parsed.entries.push(SheetEntry::Product {
                    row,
                    category: category.clone(),
                    name,
                    stock,
                    rate,
                }),
                None => parsed.errors.push(format!(
                    "Row {row}: Product found before any category: {}",
                    cells[0].trim()
                )),
            },
        }
    }

    parsed
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotProduct {
    pub id: ProductId,
    pub name: String,
    pub category_id: Option<CategoryId>,
    pub retired: bool,
}

/// The parts of the catalog a reconciliation needs to see.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatalogSnapshot {
    pub categories: Vec<(CategoryId, String)>,
    pub products: Vec<SnapshotProduct>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedCategory {
    pub id: CategoryId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedProduct {
    pub id: ProductId,
    pub category_id: CategoryId,
    pub name: String,
    pub stock: u32,
    pub price: Money,
    pub existing: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockSheetReport {
    pub categories_created: u32,
    pub categories_updated: u32,
    pub products_created: u32,
    pub products_updated: u32,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconciliationPlan {
    /// Only categories that need to be created.
    pub new_categories: Vec<PlannedCategory>,
    /// One entry per distinct product; later sheet rows win.
    pub products: Vec<PlannedProduct>,
    pub report: StockSheetReport,
}

/// Matches a parsed sheet against the catalog by normalized names.
///
/// `new_id` mints ids for categories and products that do not exist yet.
pub fn plan_reconciliation(
    sheet: &ParsedSheet,
    snapshot: &CatalogSnapshot,
    mut new_id: impl FnMut() -> AggregateId,
) -> ReconciliationPlan {
    let mut plan = ReconciliationPlan {
        report: StockSheetReport {
            errors: sheet.errors.clone(),
            ..StockSheetReport::default()
        },
        ..ReconciliationPlan::default()
    };

    let mut categories: HashMap<String, CategoryId> = HashMap::new();
    for (id, name) in &snapshot.categories {
        categories.entry(normalize_name(name)).or_insert(*id);
    }

    let mut products: HashMap<(CategoryId, String), ProductId> = HashMap::new();
    for p in snapshot.products.iter().filter(|p| !p.retired) {
        if let Some(category_id) = p.category_id {
            products.entry((category_id, normalize_name(&p.name))).or_insert(p.id);
        }
    }

    let mut planned_index: HashMap<ProductId, usize> = HashMap::new();

    for entry in &sheet.entries {
        match entry {
            SheetEntry::Category { name, .. } => {
                let key = normalize_name(name);
                if categories.contains_key(&key) {
                    plan.report.categories_updated += 1;
                } else {
                    let id = CategoryId::new(new_id());
                    categories.insert(key, id);
                    plan.new_categories.push(PlannedCategory { id, name: name.clone() });
                    plan.report.categories_created += 1;
                }
            }
            SheetEntry::Product { category, name, stock, rate, .. } => {
                let category_key = normalize_name(category);
                let Some(&category_id) = categories.get(&category_key) else {
                    continue;
                };
                let key = (category_id, normalize_name(name));

                match products.get(&key).copied() {
                    Some(product_id) => {
                        plan.report.products_updated += 1;
                        if let Some(&i) = planned_index.get(&product_id) {
                            plan.products[i].stock = *stock;
                            plan.products[i].price = *rate;
                        } else {
                            planned_index.insert(product_id, plan.products.len());
                            plan.products.push(PlannedProduct {
                                id: product_id,
                                category_id,
                                name: name.clone(),
                                stock: *stock,
                                price: *rate,
                                existing: true,
                            });
                        }
                    }
                    None => {
                        let product_id = ProductId::new(new_id());
                        products.insert(key, product_id);
                        planned_index.insert(product_id, plan.products.len());
                        plan.products.push(PlannedProduct {
                            id: product_id,
                            category_id,
                            name: name.clone(),
                            stock: *stock,
                            price: *rate,
                            existing: false,
                        });
                        plan.report.products_created += 1;
                    }
                }
            }
        }
    }

    plan
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(cells: &[&str]) -> Vec<String> {
        cells.iter().map(|c| c.to_string()).collect()
    }

    fn sheet(body: &[&[&str]]) -> Vec<Vec<String>> {
        let mut rows: Vec<Vec<String>> = (0..DEFAULT_HEADER_ROWS)
            .map(|i| row(&[&format!("HEADER {i}"), "x", "y"]))
            .collect();
        rows.extend(body.iter().map(|cells| row(cells)));
        rows
    }

    #[test]
    fn classifies_rows() {
        assert_eq!(
            classify_row(&row(&["BATTERY CELL", "", ""])),
            SheetRow::Category { name: "BATTERY CELL".to_string() }
        );
        assert_eq!(
            classify_row(&row(&["12. B.CELL AA", "8.0", "15.5"])),
            SheetRow::Product {
                name: "B.CELL AA".to_string(),
                stock: 8,
                rate: Money::from_paise(1_550),
            }
        );
        assert_eq!(classify_row(&row(&["  GRAND TOTAL", "10", "100"])), SheetRow::Ignored);
        assert_eq!(classify_row(&row(&["Powered by MARG ERP", "", ""])), SheetRow::Ignored);
        assert_eq!(classify_row(&row(&["Loose", "3", ""])), SheetRow::Ignored);
        assert_eq!(classify_row(&row(&["only", "two"])), SheetRow::Ignored);
    }

    #[test]
    fn odd_stock_and_rate_cells_default_to_zero() {
        assert_eq!(
            classify_row(&row(&["3-SOAP", " - ", "abc"])),
            SheetRow::Product { name: "SOAP".to_string(), stock: 0, rate: Money::ZERO }
        );
        assert_eq!(
            classify_row(&row(&["4 OIL", "N/A", "12.3456"])),
            SheetRow::Product { name: "OIL".to_string(), stock: 0, rate: Money::from_paise(1_235) }
        );
    }

    #[test]
    fn header_rows_are_skipped_and_orphans_reported() {
        let rows = sheet(&[&["1 ORPHAN", "1", "1"], &["SNACKS", "", ""], &["2 CHIPS", "4", "10"]]);
        let parsed = parse_sheet(&rows, DEFAULT_HEADER_ROWS);
        assert_eq!(parsed.errors, vec!["Row 8: Product found before any category: 1 ORPHAN".to_string()]);
        assert_eq!(parsed.entries.len(), 2);
    }

    #[test]
    fn plan_matches_by_normalized_names() {
        let snacks = CategoryId::new(AggregateId::new());
        let chips = ProductId::new(AggregateId::new());
        let snapshot = CatalogSnapshot {
            categories: vec![(snacks, "Snacks".to_string())],
            products: vec![SnapshotProduct {
                id: chips,
                name: "Lays Chips-10".to_string(),
                category_id: Some(snacks),
                retired: false,
            }],
        };
        let rows = sheet(&[
            &["SNACKS", "", ""],
            &["1 LAYS CHIPS 10", "4", "10"],
            &["2 KURKURE", "6", "20"],
            &["SOAPS", "", ""],
            &["1 LUX", "2", "35"],
        ]);
        let parsed = parse_sheet(&rows, DEFAULT_HEADER_ROWS);
        let plan = plan_reconciliation(&parsed, &snapshot, AggregateId::new);

        assert_eq!(plan.report.categories_created, 1);
        assert_eq!(plan.report.categories_updated, 1);
        assert_eq!(plan.report.products_created, 2);
        assert_eq!(plan.report.products_updated, 1);
        assert_eq!(plan.new_categories[0].name, "SOAPS");

        let lays = plan.products.iter().find(|p| p.id == chips).unwrap();
        assert!(lays.existing);
        assert_eq!(lays.stock, 4);
        assert_eq!(lays.price, Money::from_rupees(10));
    }

    #[test]
    fn repeated_rows_resolve_to_one_planned_product() {
        let rows = sheet(&[
            &["SOAPS", "", ""],
            &["1 LUX", "2", "35"],
            &["9 Lux", "5", "36"],
        ]);
        let parsed = parse_sheet(&rows, DEFAULT_HEADER_ROWS);
        let plan = plan_reconciliation(&parsed, &CatalogSnapshot::default(), AggregateId::new);

        assert_eq!(plan.products.len(), 1);
        assert_eq!(plan.products[0].stock, 5);
        assert_eq!(plan.products[0].price, Money::from_rupees(36));
        assert!(!plan.products[0].existing);
        assert_eq!(plan.report.products_created, 1);
        assert_eq!(plan.report.products_updated, 1);
    }
}
