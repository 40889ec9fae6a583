use chrono::{Duration as ChronoDuration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::StatusCode;
use serde_json::{Value, json};

use shopdesk_api::app::services::AppServices;
use shopdesk_api::config::AppConfig;
use shopdesk_auth::{JwtClaims, Role};
use shopdesk_core::UserId;

struct TestServer {
    base_url: String,
    services: std::sync::Arc<AppServices>,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn(jwt_secret: &str) -> Self {
        // Same router as prod over the in-memory store, on an ephemeral port.
        let config = AppConfig::in_memory(jwt_secret);
        let app = shopdesk_api::app::build_app(&config)
            .await
            .expect("failed to build app");
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let router = app.router;
        let handle = tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        Self {
            base_url,
            services: app.services,
            handle,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
        self.services.shutdown();
    }
}

fn mint_jwt(jwt_secret: &str, user_id: UserId, roles: Vec<Role>) -> String {
    let now = Utc::now();
    let claims = JwtClaims {
        sub: user_id,
        roles,
        issued_at: now,
        expires_at: now + ChronoDuration::minutes(10),
    };

    jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(jwt_secret.as_bytes()),
    )
    .expect("failed to encode jwt")
}

const SECRET: &str = "test-secret";

async fn create_product(
    client: &reqwest::Client,
    srv: &TestServer,
    admin: &str,
    name: &str,
    price: &str,
    stock: u32,
) -> String {
    let res = client
        .post(srv.url("/api/products"))
        .bearer_auth(admin)
        .json(&json!({ "name": name, "price": price, "stock": stock }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    let body: Value = res.json().await.unwrap();
    body["id"].as_str().unwrap().to_string()
}

async fn get_json(client: &reqwest::Client, url: String, token: &str) -> (StatusCode, Value) {
    let res = client.get(url).bearer_auth(token).send().await.unwrap();
    let status = res.status();
    (status, res.json().await.unwrap_or(Value::Null))
}

#[tokio::test(flavor = "multi_thread")]
async fn auth_required_for_protected_endpoints() {
    let srv = TestServer::spawn(SECRET).await;
    let client = reqwest::Client::new();

    let res = client.get(srv.url("/api/whoami")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let forged = mint_jwt("other-secret", UserId::new(), vec![Role::ADMIN]);
    let res = client
        .get(srv.url("/api/whoami"))
        .bearer_auth(forged)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = client.get(srv.url("/health")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test(flavor = "multi_thread")]
async fn identity_is_derived_from_token() {
    let srv = TestServer::spawn(SECRET).await;
    let client = reqwest::Client::new();

    let user_id = UserId::new();
    let token = mint_jwt(SECRET, user_id, vec![Role::CASHIER]);
    let (status, body) = get_json(&client, srv.url("/api/whoami"), &token).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user_id"].as_str().unwrap(), user_id.to_string());
    assert!(body["roles"].as_array().unwrap().iter().any(|r| r == "cashier"));
    assert!(body["permissions"].as_array().unwrap().iter().any(|p| p == "pos.sell"));
}

#[tokio::test(flavor = "multi_thread")]
async fn customers_cannot_manage_the_catalog() {
    let srv = TestServer::spawn(SECRET).await;
    let client = reqwest::Client::new();
    let customer = mint_jwt(SECRET, UserId::new(), vec![Role::CUSTOMER]);

    let res = client
        .post(srv.url("/api/products"))
        .bearer_auth(&customer)
        .json(&json!({ "name": "Kettle", "price": "499.00" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);

    let (status, _) = get_json(&client, srv.url("/api/admin/orders"), &customer).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // The live event feed is admin only.
    let (status, _) = get_json(&client, srv.url("/api/stream"), &customer).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // Browsing is open to customers.
    let (status, body) = get_json(&client, srv.url("/api/products"), &customer).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.as_array().unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn online_order_is_billed_when_marked_paid() {
    let srv = TestServer::spawn(SECRET).await;
    let client = reqwest::Client::new();
    let admin = mint_jwt(SECRET, UserId::new(), vec![Role::ADMIN]);
    let customer = mint_jwt(SECRET, UserId::new(), vec![Role::CUSTOMER]);

    let product_id = create_product(&client, &srv, &admin, "Steel Kettle", "499.00", 10).await;

    let res = client
        .post(srv.url("/api/me/orders"))
        .bearer_auth(&customer)
        .json(&json!({
            "items": [{ "product_id": product_id, "quantity": 2 }],
            "payment_method": "ONLINE",
            "shipping_name": "Asha",
            "shipping_phone": "9876543210",
            "address_line1": "12 Market Road",
            "city": "Pune",
            "state": "MH",
            "pincode": "411001",
            "payment_reference": "upi-778899",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    let order: Value = res.json().await.unwrap();
    let order_id = order["id"].as_str().unwrap().to_string();
    assert_eq!(order["status"], "PENDING");
    assert_eq!(order["total_amount"], "998.00");
    assert_eq!(order["is_pos"], false);

    // Stock is reserved on placement.
    let (_, product) = get_json(&client, srv.url(&format!("/api/products/{product_id}")), &admin).await;
    assert_eq!(product["stock"], 8);

    let res = client
        .patch(srv.url(&format!("/api/admin/orders/{order_id}/status")))
        .bearer_auth(&admin)
        .json(&json!({ "status": "paid" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let order: Value = res.json().await.unwrap();
    assert_eq!(order["status"], "PAID");
    let invoice_id = order["invoice_id"].as_str().expect("invoice derived").to_string();

    let (status, invoices) = get_json(&client, srv.url("/api/me/invoices"), &customer).await;
    assert_eq!(status, StatusCode::OK);
    let invoices = invoices.as_array().unwrap();
    assert_eq!(invoices.len(), 1);
    assert_eq!(invoices[0]["id"], invoice_id.as_str());
    assert_eq!(invoices[0]["status"], "paid");
    assert_eq!(invoices[0]["total"], "998.00");
    assert_eq!(invoices[0]["balance_due"], "0.00");

    // Someone else's invoice is invisible.
    let stranger = mint_jwt(SECRET, UserId::new(), vec![Role::CUSTOMER]);
    let (status, _) = get_json(&client, srv.url(&format!("/api/me/invoices/{invoice_id}")), &stranger).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test(flavor = "multi_thread")]
async fn pos_sale_settles_and_shows_in_daily_report() {
    let srv = TestServer::spawn(SECRET).await;
    let client = reqwest::Client::new();
    let admin = mint_jwt(SECRET, UserId::new(), vec![Role::ADMIN]);
    let cashier = mint_jwt(SECRET, UserId::new(), vec![Role::CASHIER]);

    let product_id = create_product(&client, &srv, &admin, "AA Cell", "15.50", 40).await;

    let res = client
        .post(srv.url("/api/pos/invoices"))
        .bearer_auth(&cashier)
        .json(&json!({
            "items": [{ "product_id": product_id, "qty": 4, "unit_price": "15.50" }],
            "paid_amount": "100.00",
            "payment_method": "cash",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    let receipt: Value = res.json().await.unwrap();
    assert_eq!(receipt["status"], "paid");
    assert_eq!(receipt["total"], "62.00");
    assert_eq!(receipt["change_due"], "38.00");

    let (_, product) = get_json(&client, srv.url(&format!("/api/products/{product_id}")), &admin).await;
    assert_eq!(product["stock"], 36);

    let today = Utc::now()
        .with_timezone(&shopdesk_infra::backoffice::shop_offset(
            shopdesk_infra::backoffice::DEFAULT_UTC_OFFSET_MINUTES,
        ))
        .date_naive()
        .to_string();
    let (status, report) = get_json(
        &client,
        srv.url(&format!("/api/reports/daily-sales?date={today}")),
        &admin,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["date"], today.as_str());
    assert_eq!(report["units_sold"], 4);

    let (status, _) = get_json(&client, srv.url("/api/reports/daily-sales?date=18-10-2026"), &admin).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Customers cannot ring up sales.
    let customer = mint_jwt(SECRET, UserId::new(), vec![Role::CUSTOMER]);
    let res = client
        .post(srv.url("/api/pos/invoices"))
        .bearer_auth(&customer)
        .json(&json!({ "items": [] }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
}

#[tokio::test(flavor = "multi_thread")]
async fn stock_sheet_upload_then_download() {
    let srv = TestServer::spawn(SECRET).await;
    let client = reqwest::Client::new();
    let admin = mint_jwt(SECRET, UserId::new(), vec![Role::ADMIN]);

    let mut sheet = String::new();
    for i in 0..7 {
        sheet.push_str(&format!("HEADER {i},,\n"));
    }
    sheet.push_str("BATTERY CELL,,\n1. B.CELL AA,8,15.5\n2 B.CELL AAA,-,12\n");

    let res = client
        .post(srv.url("/api/products/stock/upload"))
        .bearer_auth(&admin)
        .header("content-type", "text/csv")
        .body(sheet)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let report: Value = res.json().await.unwrap();
    assert_eq!(report["ok"], true);
    assert_eq!(report["categories_created"], 1);
    assert_eq!(report["products_created"], 2);

    let res = client
        .post(srv.url("/api/products/stock/upload"))
        .bearer_auth(&admin)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let res = client
        .get(srv.url("/api/products/stock/download"))
        .bearer_auth(&admin)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let disposition = res.headers()["content-disposition"].to_str().unwrap().to_string();
    assert!(disposition.starts_with("attachment; filename=\"stock_"));
    let body = res.text().await.unwrap();
    let mut lines = body.lines();
    assert_eq!(lines.next(), Some("ID,Name,Category,Price,Stock"));
    assert!(body.contains("B.CELL AA,BATTERY CELL,15.50,8"));
}

#[tokio::test(flavor = "multi_thread")]
async fn devices_register_and_receive_test_push() {
    let srv = TestServer::spawn(SECRET).await;
    let client = reqwest::Client::new();
    let customer = mint_jwt(SECRET, UserId::new(), vec![Role::CUSTOMER]);

    let res = client
        .post(srv.url("/api/me/devices"))
        .bearer_auth(&customer)
        .json(&json!({ "token": "device-token-1", "platform": "android", "is_admin": true }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["created"], true);
    // Only staff may subscribe to admin alerts.
    assert_eq!(body["is_admin"], false);

    let res = client
        .post(srv.url("/api/me/devices/test"))
        .bearer_auth(&customer)
        .json(&json!({}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let report: Value = res.json().await.unwrap();
    assert_eq!(report["success"], 1);

    let res = client
        .post(srv.url("/api/me/devices/delete"))
        .bearer_auth(&customer)
        .json(&json!({}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let res = client
        .post(srv.url("/api/me/devices/delete"))
        .bearer_auth(&customer)
        .json(&json!({ "token": "device-token-1" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test(flavor = "multi_thread")]
async fn account_registration_and_profile() {
    let srv = TestServer::spawn(SECRET).await;
    let client = reqwest::Client::new();
    let customer = mint_jwt(SECRET, UserId::new(), vec![Role::CUSTOMER]);

    let res = client
        .post(srv.url("/api/users/register"))
        .bearer_auth(&customer)
        .json(&json!({
            "phone": "9876543210",
            "confirm_phone": "9876543211",
            "name": "Asha",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let res = client
        .post(srv.url("/api/users/register"))
        .bearer_auth(&customer)
        .json(&json!({
            "phone": "9876543210",
            "confirm_phone": "9876543210",
            "name": "Asha",
            "role": "admin",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);

    let res = client
        .post(srv.url("/api/users/register"))
        .bearer_auth(&customer)
        .json(&json!({
            "phone": "9876543210",
            "confirm_phone": "9876543210",
            "name": "Asha",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);

    let res = client
        .patch(srv.url("/api/me/profile"))
        .bearer_auth(&customer)
        .json(&json!({ "address": "12 Market Road" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let profile: Value = res.json().await.unwrap();
    assert_eq!(profile["name"], "Asha");
    assert_eq!(profile["address"], "12 Market Road");
    assert_eq!(profile["role"], "customer");
}
