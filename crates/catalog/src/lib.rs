//! Catalog domain module (event-sourced).
//!
//! Categories, products with their stock ledger, and the pure rules used to
//! reconcile an external stock sheet against the catalog. No IO lives here.

pub mod category;
pub mod duplicates;
pub mod naming;
pub mod product;
pub mod stock_sheet;

pub use category::{
    Category, CategoryCommand, CategoryCreated, CategoryEvent, CategoryId, CategoryRenamed,
    CreateCategory, RenameCategory,
};
pub use duplicates::{DuplicateCandidate, DuplicateGroup, group_duplicates};
pub use naming::normalize_name;
pub use product::{
    ChangePrice, CountStock, CreateProduct, DetailsUpdated, PriceChanged, Product,
    ProductCommand, ProductCreated, ProductEvent, ProductId, ProductRetired, ReleaseStock,
    ReserveStock, RetireAsDuplicate, StockCounted, StockReleased, StockReserved, UpdateDetails,
};
pub use stock_sheet::{
    CatalogSnapshot, DEFAULT_HEADER_ROWS, ParsedSheet, PlannedCategory, PlannedProduct, ReconciliationPlan, SheetEntry, SheetRow,
    SnapshotProduct, StockSheetReport, classify_row, parse_sheet, plan_reconciliation,
};
