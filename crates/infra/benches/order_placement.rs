use std::sync::Arc;

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use shopdesk_auth::{Principal, Role};
use shopdesk_catalog::ProductId;
use shopdesk_core::{Money, UserId};
use shopdesk_events::InMemoryEventBus;
use shopdesk_infra::backoffice::{
    Backoffice, BackofficeConfig, NewProduct, OrderLineRequest, PlaceOnlineOrder, PosLine, PosSale,
};
use shopdesk_infra::event_store::InMemoryEventStore;
use shopdesk_orders::{OrderPaymentMethod, ShippingAddress};

fn backoffice() -> Backoffice {
    Backoffice::new(
        Arc::new(InMemoryEventStore::new()),
        Arc::new(InMemoryEventBus::new()),
        BackofficeConfig::default(),
    )
}

fn stock_products(bo: &Backoffice, count: usize) -> Vec<ProductId> {
    (0..count)
        .map(|i| {
            bo.create_product(NewProduct {
                name: format!("Item {i}"),
                category_id: None,
                price: Money::from_rupees(10 + i as u64),
                stock: u32::MAX / 2,
                image_url: None,
            })
            .unwrap()
            .id
        })
        .collect()
}

fn shipping() -> ShippingAddress {
    ShippingAddress {
        name: "Bench".into(),
        phone: "9876543210".into(),
        line1: "1 Main St".into(),
        line2: String::new(),
        city: "Agra".into(),
        state: "UP".into(),
        pincode: "282005".into(),
    }
}

fn bench_online_orders(c: &mut Criterion) {
    let mut group = c.benchmark_group("place_online_order");
    let buyer = Principal::from_roles(UserId::new(), vec![Role::CUSTOMER]);

    for lines in [1usize, 5, 20] {
        let bo = backoffice();
        let products = stock_products(&bo, lines);
        let request = PlaceOnlineOrder {
            items: products.iter().map(|&product_id| OrderLineRequest { product_id, quantity: 1 }).collect(),
            payment_method: OrderPaymentMethod::Cod,
            shipping: shipping(),
            payment_reference: None,
        };

        group.throughput(Throughput::Elements(lines as u64));
        group.bench_with_input(BenchmarkId::from_parameter(lines), &request, |b, request| {
            b.iter(|| black_box(bo.place_order(&buyer, request).unwrap()));
        });
    }
    group.finish();
}

fn bench_pos_checkout(c: &mut Criterion) {
    let bo = backoffice();
    let cashier = Principal::from_roles(UserId::new(), vec![Role::CASHIER]);
    let products = stock_products(&bo, 5);
    let sale = PosSale {
        items: products
            .iter()
            .map(|&product_id| PosLine { product_id, name: None, quantity: 2, unit_price: Money::from_rupees(15) })
            .collect(),
        paid: true,
        ..Default::default()
    };

    c.bench_function("pos_checkout_5_lines", |b| {
        b.iter(|| black_box(bo.pos_checkout(&cashier, &sale).unwrap()));
    });
}

criterion_group!(benches, bench_online_orders, bench_pos_checkout);
criterion_main!(benches);
