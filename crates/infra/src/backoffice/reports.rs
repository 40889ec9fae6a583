//! Daily sales summary over the read models.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, NaiveDate, NaiveTime, TimeDelta, Utc};
use serde::Serialize;

use shopdesk_billing::{InvoiceId, InvoiceMode, InvoiceStatus};
use shopdesk_catalog::ProductId;
use shopdesk_core::Money;

use super::Backoffice;
use crate::projections::OrderFilter;

/// Most product rows a report carries.
pub const PRODUCT_ROWS_MAX: usize = 500;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SourceTotals {
    pub orders: u64,
    pub revenue: Money,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CashierRow {
    pub invoice_id: InvoiceId,
    pub cashier: String,
    pub mode: InvoiceMode,
    pub amount: Money,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProductSales {
    pub product_id: ProductId,
    pub name: String,
    pub category: Option<String>,
    pub quantity: u64,
    pub amount: Money,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DailySalesReport {
    pub date: NaiveDate,
    pub orders: u64,
    pub units_sold: u64,
    pub revenue: Money,
    pub by_source: BTreeMap<String, SourceTotals>,
    pub by_cashier: Vec<CashierRow>,
    pub by_product: Vec<ProductSales>,
}

impl Backoffice {
    /// Shop-local calendar day for `now`.
    pub fn shop_today(&self, now: DateTime<Utc>) -> NaiveDate {
        now.with_timezone(&self.config.shop_offset).date_naive()
    }

    /// Sales for one shop-local day. Paid, shipped and completed orders
    /// count; retired products are reported under the product they were
    /// merged into.
    pub fn daily_sales(&self, date: Option<NaiveDate>) -> DailySalesReport {
        let date = date.unwrap_or_else(|| self.shop_today(Utc::now()));
        let (start, end) = self.day_bounds(date);
        let in_day = |t: DateTime<Utc>| t >= start && t < end;

        let orders = self
            .projections
            .orders
            .query(&OrderFilter::default(), |o| o.status.is_sale() && in_day(o.created_at));

        let mut report = DailySalesReport {
            date,
            orders: orders.len() as u64,
            units_sold: 0,
            revenue: Money::ZERO,
            by_source: BTreeMap::new(),
            by_cashier: Vec::new(),
            by_product: Vec::new(),
        };

        let catalog = &self.projections.catalog;
        let mut products: HashMap<ProductId, ProductSales> = HashMap::new();
        for order in &orders {
            report.revenue = report.revenue.saturating_add(order.total);
            report.units_sold += order.units();
            let source = report.by_source.entry(order.source.as_str().to_string()).or_default();
            source.orders += 1;
            source.revenue = source.revenue.saturating_add(order.total);

            for item in &order.items {
                let keeper = catalog.keeper_of(item.product_id);
                let row = products.entry(keeper).or_insert_with(|| {
                    let view = catalog.product(&keeper);
                    ProductSales {
                        product_id: keeper,
                        name: view.as_ref().map_or_else(|| item.name.clone(), |p| p.name.clone()),
                        category: catalog.category_name(view.and_then(|p| p.category_id)),
                        quantity: 0,
                        amount: Money::ZERO,
                    }
                });
                row.quantity += u64::from(item.quantity);
                row.amount = row.amount.saturating_add(item.line_total);
            }
        }

        let mut by_product: Vec<ProductSales> = products.into_values().collect();
        by_product.sort_by(|a, b| b.quantity.cmp(&a.quantity).then_with(|| a.name.cmp(&b.name)));
        by_product.truncate(PRODUCT_ROWS_MAX);
        report.by_product = by_product;

        report.by_cashier = self
            .projections
            .invoices
            .query(|i| i.status == InvoiceStatus::Paid && in_day(i.created_at))
            .into_iter()
            .map(|invoice| {
                let cashier = match invoice.mode {
                    InvoiceMode::Manual => invoice
                        .cashier_id
                        .and_then(|id| self.projections.accounts.get(&id))
                        .map_or_else(|| "Unknown".to_string(), |a| a.name),
                    InvoiceMode::Online if invoice.customer_name.is_empty() => "N/A".to_string(),
                    InvoiceMode::Online => invoice.customer_name.clone(),
                };
                CashierRow { invoice_id: invoice.id, cashier, mode: invoice.mode, amount: invoice.total }
            })
            .collect();

        report
    }

    /// UTC instants bounding a shop-local day, end exclusive.
    fn day_bounds(&self, date: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
        let offset = TimeDelta::seconds(i64::from(self.config.shop_offset.local_minus_utc()));
        let start = (date.and_time(NaiveTime::MIN) - offset).and_utc();
        (start, start + TimeDelta::days(1))
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::backoffice::testing::{address, admin, backoffice, cashier, customer, product};
    use crate::backoffice::{OrderLineRequest, PlaceOnlineOrder, PosLine, PosSale};
    use shopdesk_orders::OrderPaymentMethod;

    fn online_sale(bo: &Backoffice, lines: &[(ProductId, u32)]) {
        let order = bo
            .place_order(
                &customer(),
                &PlaceOnlineOrder {
                    items: lines.iter().map(|&(product_id, quantity)| OrderLineRequest { product_id, quantity }).collect(),
                    payment_method: OrderPaymentMethod::Online,
                    shipping: address(),
                    payment_reference: None,
                },
            )
            .unwrap();
        bo.change_order_status(&admin(), order.id, "PAID").unwrap();
    }

    #[test]
    fn totals_by_source_cashier_and_product() {
        let bo = backoffice();
        let rice = product(&bo, "Rice", 60, 100);
        let dal = product(&bo, "Dal", 90, 100);

        online_sale(&bo, &[(rice, 2), (dal, 1)]);
        bo.pos_checkout(
            &cashier(),
            &PosSale {
                items: vec![PosLine { product_id: rice, name: None, quantity: 3, unit_price: Money::from_rupees(60) }],
                paid: true,
                ..Default::default()
            },
        )
        .unwrap();
        // Pending orders are not sales.
        bo.place_order(
            &customer(),
            &PlaceOnlineOrder {
                items: vec![OrderLineRequest { product_id: dal, quantity: 5 }],
                payment_method: OrderPaymentMethod::Cod,
                shipping: address(),
                payment_reference: None,
            },
        )
        .unwrap();

        let report = bo.daily_sales(None);

        assert_eq!(report.orders, 2);
        assert_eq!(report.units_sold, 6);
        assert_eq!(report.revenue, Money::from_rupees(210 + 180));
        assert_eq!(report.by_source["ONLINE"], SourceTotals { orders: 1, revenue: Money::from_rupees(210) });
        assert_eq!(report.by_source["POS"].orders, 1);

        assert_eq!(report.by_product[0].name, "Rice");
        assert_eq!(report.by_product[0].quantity, 5);
        assert_eq!(report.by_product[1].amount, Money::from_rupees(90));

        let mut cashiers: Vec<&str> = report.by_cashier.iter().map(|r| r.cashier.as_str()).collect();
        cashiers.sort();
        assert_eq!(cashiers, vec!["Asha", "Unknown"]);
    }

    #[test]
    fn other_days_are_empty() {
        let bo = backoffice();
        let rice = product(&bo, "Rice", 60, 10);
        online_sale(&bo, &[(rice, 1)]);

        let report = bo.daily_sales(NaiveDate::from_ymd_opt(2001, 1, 1));
        assert_eq!(report.orders, 0);
        assert!(report.by_product.is_empty());
        assert!(report.by_cashier.is_empty());
    }

    #[test]
    fn merged_products_fold_into_their_keeper() {
        let bo = backoffice();
        let keeper = product(&bo, "Tata Salt", 25, 10);
        let duplicate = product(&bo, "TATA  SALT", 25, 10);
        online_sale(&bo, &[(keeper, 1), (duplicate, 2)]);

        bo.merge_duplicates().unwrap();
        let report = bo.daily_sales(None);

        assert_eq!(report.by_product.len(), 1);
        assert_eq!(report.by_product[0].quantity, 3);
    }

    #[test]
    fn day_bounds_follow_the_shop_offset() {
        let bo = backoffice();
        let (start, end) = bo.day_bounds(NaiveDate::from_ymd_opt(2024, 3, 10).unwrap());
        assert_eq!(start, Utc.with_ymd_and_hms(2024, 3, 9, 18, 30, 0).unwrap());
        assert_eq!(end - start, TimeDelta::days(1));

        let late_evening_utc = Utc.with_ymd_and_hms(2024, 3, 9, 20, 0, 0).unwrap();
        assert_eq!(bo.shop_today(late_evening_utc), NaiveDate::from_ymd_opt(2024, 3, 10).unwrap());
    }
}
