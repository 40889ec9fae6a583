use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use shopdesk_core::{Aggregate, AggregateId, AggregateRoot, DomainError, Money};
use shopdesk_events::Event;

use crate::CategoryId;

pub const AGGREGATE_TYPE: &str = "catalog.product";

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

/// Aggregate root: Product.
///
/// The product stream doubles as the stock ledger: every reservation and
/// release made on behalf of an order is an event on this stream, so two
/// concurrent orders for the last unit collide on the stream version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Product {
    id: ProductId,
    name: String,
    category_id: Option<CategoryId>,
    price: Money,
    stock: u32,
    image_url: Option<String>,
    merged_into: Option<ProductId>,
    version: u64,
    created: bool,
}

impl Product {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: ProductId) -> Self {
        Self {
            id,
            name: String::new(),
            category_id: None,
            price: Money::ZERO,
            stock: 0,
            image_url: None,
            merged_into: None,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> ProductId {
        self.id
    }

    pub fn is_created(&self) -> bool {
        self.created
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn category_id(&self) -> Option<CategoryId> {
        self.category_id
    }

    pub fn price(&self) -> Money {
        self.price
    }

    pub fn stock(&self) -> u32 {
        self.stock
    }

    pub fn image_url(&self) -> Option<&str> {
        self.image_url.as_deref()
    }

    pub fn merged_into(&self) -> Option<ProductId> {
        self.merged_into
    }

    pub fn is_retired(&self) -> bool {
        self.merged_into.is_some()
    }
}

impl AggregateRoot for Product {
    type Id = ProductId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateProduct {
    pub product_id: ProductId,
    pub name: String,
    pub category_id: Option<CategoryId>,
    pub price: Money,
    pub stock: u32,
    pub image_url: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// `None` leaves a field untouched; an empty `image_url` clears the image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateDetails {
    pub name: Option<String>,
    pub category_id: Option<CategoryId>,
    pub image_url: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangePrice {
    pub price: Money,
    pub occurred_at: DateTime<Utc>,
}

/// Absolute stock set (sheet import, bulk edit, admin correction).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountStock {
    pub stock: u32,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReserveStock {
    pub order_id: AggregateId,
    pub quantity: u32,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseStock {
    pub order_id: AggregateId,
    pub quantity: u32,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetireAsDuplicate {
    pub keeper: ProductId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProductCommand {
    Create(CreateProduct),
    UpdateDetails(UpdateDetails),
    ChangePrice(ChangePrice),
    CountStock(CountStock),
    ReserveStock(ReserveStock),
    ReleaseStock(ReleaseStock),
    RetireAsDuplicate(RetireAsDuplicate),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductCreated {
    pub product_id: ProductId,
    pub name: String,
    pub category_id: Option<CategoryId>,
    pub price: Money,
    pub stock: u32,
    pub image_url: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetailsUpdated {
    pub product_id: ProductId,
    pub name: String,
    pub category_id: Option<CategoryId>,
    pub image_url: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceChanged {
    pub product_id: ProductId,
    pub previous: Money,
    pub price: Money,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockCounted {
    pub product_id: ProductId,
    pub previous: u32,
    pub counted: u32,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockReserved {
    pub product_id: ProductId,
    pub order_id: AggregateId,
    pub quantity: u32,
    pub remaining: u32,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockReleased {
    pub product_id: ProductId,
    pub order_id: AggregateId,
    pub quantity: u32,
    pub remaining: u32,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductRetired {
    pub product_id: ProductId,
    pub merged_into: ProductId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProductEvent {
    Created(ProductCreated),
    DetailsUpdated(DetailsUpdated),
    PriceChanged(PriceChanged),
    StockCounted(StockCounted),
    StockReserved(StockReserved),
    StockReleased(StockReleased),
    Retired(ProductRetired),
}

impl Event for ProductEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ProductEvent::Created(_) => "catalog.product.created",
            ProductEvent::DetailsUpdated(_) => "catalog.product.details_updated",
            ProductEvent::PriceChanged(_) => "catalog.product.price_changed",
            ProductEvent::StockCounted(_) => "catalog.product.stock_counted",
            ProductEvent::StockReserved(_) => "catalog.product.stock_reserved",
            ProductEvent::StockReleased(_) => "catalog.product.stock_released",
            ProductEvent::Retired(_) => "catalog.product.retired",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            ProductEvent::Created(e) => e.occurred_at,
            ProductEvent::DetailsUpdated(e) => e.occurred_at,
            ProductEvent::PriceChanged(e) => e.occurred_at,
            ProductEvent::StockCounted(e) => e.occurred_at,
            ProductEvent::StockReserved(e) => e.occurred_at,
            ProductEvent::StockReleased(e) => e.occurred_at,
            ProductEvent::Retired(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Product {
    type Command = ProductCommand;
    type Event = ProductEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            ProductEvent::Created(e) => {
                self.id = e.product_id;
                self.name = e.name.clone();
                self.category_id = e.category_id;
                self.price = e.price;
                self.stock = e.stock;
                self.image_url = e.image_url.clone();
                self.created = true;
            }
            ProductEvent::DetailsUpdated(e) => {
                self.name = e.name.clone();
                self.category_id = e.category_id;
                self.image_url = e.image_url.clone();
            }
            ProductEvent::PriceChanged(e) => self.price = e.price,
            ProductEvent::StockCounted(e) => self.stock = e.counted,
            ProductEvent::StockReserved(e) => self.stock = e.remaining,
            ProductEvent::StockReleased(e) => self.stock = e.remaining,
            ProductEvent::Retired(e) => self.merged_into = Some(e.merged_into),
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            ProductCommand::Create(cmd) => self.handle_create(cmd),
            ProductCommand::UpdateDetails(cmd) => self.handle_update_details(cmd),
            ProductCommand::ChangePrice(cmd) => self.handle_change_price(cmd),
            ProductCommand::CountStock(cmd) => self.handle_count(cmd),
            ProductCommand::ReserveStock(cmd) => self.handle_reserve(cmd),
            ProductCommand::ReleaseStock(cmd) => self.handle_release(cmd),
            ProductCommand::RetireAsDuplicate(cmd) => self.handle_retire(cmd),
        }
    }
}

impl Product {
    fn ensure_exists(&self) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found(format!("Product {} not found.", self.id)));
        }
        Ok(())
    }

    fn ensure_live(&self) -> Result<(), DomainError> {
        self.ensure_exists()?;
        if let Some(keeper) = self.merged_into {
            return Err(DomainError::invariant(format!(
                "{} was merged into product {keeper}.",
                self.name
            )));
        }
        Ok(())
    }

    fn handle_create(&self, cmd: &CreateProduct) -> Result<Vec<ProductEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("product already exists"));
        }
        let name = cmd.name.trim();
        if name.is_empty() {
            return Err(DomainError::validation("Product name cannot be empty."));
        }

        Ok(vec![ProductEvent::Created(ProductCreated {
            product_id: cmd.product_id,
            name: name.to_string(),
            category_id: cmd.category_id,
            price: cmd.price,
            stock: cmd.stock,
            image_url: cmd.image_url.clone().filter(|u| !u.trim().is_empty()),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_update_details(&self, cmd: &UpdateDetails) -> Result<Vec<ProductEvent>, DomainError> {
        self.ensure_exists()?;

        let name = match &cmd.name {
            Some(n) if n.trim().is_empty() => {
                return Err(DomainError::validation("Product name cannot be empty."));
            }
            Some(n) => n.trim().to_string(),
            None => self.name.clone(),
        };
        let category_id = cmd.category_id.or(self.category_id);
        let image_url = match &cmd.image_url {
            Some(u) if u.trim().is_empty() => None,
            Some(u) => Some(u.trim().to_string()),
            None => self.image_url.clone(),
        };

        if name == self.name && category_id == self.category_id && image_url == self.image_url {
            return Ok(vec![]);
        }

        Ok(vec![ProductEvent::DetailsUpdated(DetailsUpdated {
            product_id: self.id,
            name,
            category_id,
            image_url,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_change_price(&self, cmd: &ChangePrice) -> Result<Vec<ProductEvent>, DomainError> {
        self.ensure_live()?;
        if cmd.price == self.price {
            return Ok(vec![]);
        }
        Ok(vec![ProductEvent::PriceChanged(PriceChanged {
            product_id: self.id,
            previous: self.price,
            price: cmd.price,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_count(&self, cmd: &CountStock) -> Result<Vec<ProductEvent>, DomainError> {
        self.ensure_live()?;
        if cmd.stock == self.stock {
            return Ok(vec![]);
        }
        Ok(vec![ProductEvent::StockCounted(StockCounted {
            product_id: self.id,
            previous: self.stock,
            counted: cmd.stock,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_reserve(&self, cmd: &ReserveStock) -> Result<Vec<ProductEvent>, DomainError> {
        self.ensure_live()?;
        if cmd.quantity < 1 {
            return Err(DomainError::validation("Quantity must be >= 1."));
        }
        let remaining = self
            .stock
            .checked_sub(cmd.quantity)
            .ok_or_else(|| DomainError::validation(format!("Insufficient stock for {}.", self.name)))?;

        Ok(vec![ProductEvent::StockReserved(StockReserved {
            product_id: self.id,
            order_id: cmd.order_id,
            quantity: cmd.quantity,
            remaining,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_release(&self, cmd: &ReleaseStock) -> Result<Vec<ProductEvent>, DomainError> {
        self.ensure_exists()?;
        if cmd.quantity < 1 {
            return Err(DomainError::validation("Quantity must be >= 1."));
        }
        let remaining = self.stock.saturating_add(cmd.quantity);

        Ok(vec![ProductEvent::StockReleased(StockReleased {
            product_id: self.id,
            order_id: cmd.order_id,
            quantity: cmd.quantity,
            remaining,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_retire(&self, cmd: &RetireAsDuplicate) -> Result<Vec<ProductEvent>, DomainError> {
        self.ensure_live()?;
        if cmd.keeper == self.id {
            return Err(DomainError::validation("A product cannot be merged into itself."));
        }
        Ok(vec![ProductEvent::Retired(ProductRetired {
            product_id: self.id,
            merged_into: cmd.keeper,
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shopdesk_events::execute;

    fn test_product_id() -> ProductId {
        ProductId::new(AggregateId::new())
    }

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    fn created_product(stock: u32) -> Product {
        let id = test_product_id();
        let mut product = Product::empty(id);
        execute(
            &mut product,
            &ProductCommand::Create(CreateProduct {
                product_id: id,
                name: " Parle-G 100g ".to_string(),
                category_id: None,
                price: Money::from_paise(1_000),
                stock,
                image_url: Some("  ".to_string()),
                occurred_at: test_time(),
            }),
        )
        .unwrap();
        product
    }

    fn reserve(quantity: u32) -> ProductCommand {
        ProductCommand::ReserveStock(ReserveStock {
            order_id: AggregateId::new(),
            quantity,
            occurred_at: test_time(),
        })
    }

    #[test]
    fn create_trims_name_and_drops_blank_image() {
        let product = created_product(5);
        assert_eq!(product.name(), "Parle-G 100g");
        assert_eq!(product.image_url(), None);
        assert_eq!(product.stock(), 5);
        assert_eq!(product.version(), 1);
    }

    #[test]
    fn reserve_decrements_stock() {
        let mut product = created_product(5);
        let events = execute(&mut product, &reserve(3)).unwrap();
        match &events[0] {
            ProductEvent::StockReserved(e) => assert_eq!(e.remaining, 2),
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(product.stock(), 2);
    }

    #[test]
    fn reserve_beyond_stock_is_rejected() {
        let product = created_product(2);
        let err = product.handle(&reserve(3)).unwrap_err();
        assert_eq!(err, DomainError::validation("Insufficient stock for Parle-G 100g."));
    }

    #[test]
    fn reserve_zero_is_rejected() {
        let product = created_product(2);
        let err = product.handle(&reserve(0)).unwrap_err();
        assert_eq!(err, DomainError::validation("Quantity must be >= 1."));
    }

    #[test]
    fn release_restores_stock() {
        let mut product = created_product(4);
        execute(&mut product, &reserve(4)).unwrap();
        execute(
            &mut product,
            &ProductCommand::ReleaseStock(ReleaseStock {
                order_id: AggregateId::new(),
                quantity: 4,
                occurred_at: test_time(),
            }),
        )
        .unwrap();
        assert_eq!(product.stock(), 4);
        assert_eq!(product.version(), 3);
    }

    #[test]
    fn unknown_product_cannot_be_reserved() {
        let product = Product::empty(test_product_id());
        let err = product.handle(&reserve(1)).unwrap_err();
        assert!(matches!(err, DomainError::NotFound(_)));
    }

    #[test]
    fn retired_product_rejects_reservations_and_counts() {
        let mut product = created_product(4);
        execute(
            &mut product,
            &ProductCommand::RetireAsDuplicate(RetireAsDuplicate {
                keeper: test_product_id(),
                occurred_at: test_time(),
            }),
        )
        .unwrap();
        assert!(product.is_retired());

        let err = product.handle(&reserve(1)).unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));

        let err = product
            .handle(&ProductCommand::CountStock(CountStock { stock: 9, occurred_at: test_time() }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
    }

    #[test]
    fn count_to_same_value_emits_nothing() {
        let product = created_product(7);
        let events = product
            .handle(&ProductCommand::CountStock(CountStock { stock: 7, occurred_at: test_time() }))
            .unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn handle_does_not_mutate_state() {
        let product = created_product(5);
        let before = product.clone();
        let _ = product.handle(&reserve(2)).unwrap();
        assert_eq!(product, before);
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig { cases: 64, ..ProptestConfig::default() })]

            #[test]
            fn stock_never_goes_negative(initial in 0u32..50, requests in proptest::collection::vec(1u32..10, 0..20)) {
                let mut product = created_product(initial);
                let mut expected = initial;
                for qty in requests {
                    match execute(&mut product, &reserve(qty)) {
                        Ok(_) => expected -= qty,
                        Err(_) => prop_assert!(qty > expected),
                    }
                    prop_assert_eq!(product.stock(), expected);
                }
            }
        }
    }
}
