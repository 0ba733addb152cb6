mod common;

use axum::http::{Method, StatusCode};
use common::{decimal, TestApp};
use rust_decimal_macros::dec;
use serde_json::json;
use uuid::Uuid;

async fn create(app: &TestApp, body: serde_json::Value) -> serde_json::Value {
    let (status, json) = app.post("/api/v1/coupons", body).await;
    assert_eq!(status, StatusCode::CREATED, "unexpected body: {json}");
    json["data"].clone()
}

#[tokio::test]
async fn create_then_fetch_by_id_and_code() {
    let app = TestApp::new().await;
    let created = create(
        &app,
        json!({
            "code": " welcome5 ",
            "discountType": "fixed_cart",
            "discountValue": 5000,
            "minOrderAmount": "20000"
        }),
    )
    .await;
    assert_eq!(created["code"], "WELCOME5");
    assert_eq!(created["state"], "active");
    assert_eq!(created["usedCount"], 0);

    let id = created["id"].as_str().unwrap();
    let (status, by_id) = app.get(&format!("/api/v1/coupons/{id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(by_id["success"], true);
    assert_eq!(decimal(&by_id["data"]["discountValue"]), dec!(5000));

    let (status, by_code) = app.get("/api/v1/coupons/code/welcome5").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(by_code["data"]["id"], created["id"]);
}

#[tokio::test]
async fn create_reports_field_errors() {
    let app = TestApp::new().await;
    let (status, body) = app
        .post(
            "/api/v1/coupons",
            json!({
                "code": "AB",
                "discountType": "percent",
                "discountValue": -1
            }),
        )
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    let errors: Vec<String> = serde_json::from_value(body["errors"].clone()).unwrap();
    assert!(errors.iter().any(|e| e.starts_with("code:")));
    assert!(errors.iter().any(|e| e.starts_with("discountValue:") || e.starts_with("discount_value:")));
}

#[tokio::test]
async fn unknown_coupon_is_not_found() {
    let app = TestApp::new().await;
    let (status, body) = app.get(&format!("/api/v1/coupons/{}", Uuid::new_v4())).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["message"], "Coupon not found");
}

#[tokio::test]
async fn validate_returns_ok_with_valid_flag() {
    let app = TestApp::new().await;
    create(
        &app,
        json!({ "code": "SAVE10", "discountType": "percent", "discountValue": 10 }),
    )
    .await;

    let (status, body) = app
        .post(
            "/api/v1/coupons/validate",
            json!({ "code": "SAVE10", "subtotal": 10000 }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["valid"], true);
    assert_eq!(decimal(&body["data"]["discount"]), dec!(1000));
    assert_eq!(body["message"], "Coupon applied successfully. You save 1000");

    let (status, body) = app
        .post(
            "/api/v1/coupons/validate",
            json!({ "code": "NOPE", "subtotal": 10000 }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["valid"], false);
    assert_eq!(body["data"]["message"], "Invalid coupon code");
}

#[tokio::test]
async fn validate_rejects_out_of_range_subtotal() {
    let app = TestApp::new().await;
    create(
        &app,
        json!({ "code": "SAVE10", "discountType": "percent", "discountValue": 10 }),
    )
    .await;

    let (status, body) = app
        .post(
            "/api/v1/coupons/validate",
            json!({ "code": "SAVE10", "subtotal": "79228162514264337593543950335" }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn apply_requires_a_customer() {
    let app = TestApp::new().await;
    create(
        &app,
        json!({ "code": "SAVE10", "discountType": "percent", "discountValue": 10 }),
    )
    .await;
    let body = json!({ "code": "SAVE10", "orderId": Uuid::new_v4(), "subtotal": 10000 });

    let (status, _) = app
        .request(Method::POST, "/api/v1/coupons/apply", Some(body.clone()), None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, applied) = app
        .request(
            Method::POST,
            "/api/v1/coupons/apply",
            Some(body),
            Some(Uuid::new_v4()),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(decimal(&applied["data"]["discount"]), dec!(1000));
}

#[tokio::test]
async fn exhausted_coupon_apply_is_bad_request() {
    let app = TestApp::new().await;
    let coupon = create(
        &app,
        json!({
            "code": "LIMIT1",
            "discountType": "fixed_cart",
            "discountValue": 1000,
            "usageLimitPerCoupon": 1
        }),
    )
    .await;

    let apply = |order: Uuid| {
        json!({ "code": "LIMIT1", "orderId": order, "subtotal": 5000 })
    };
    let (status, _) = app
        .request(
            Method::POST,
            "/api/v1/coupons/apply",
            Some(apply(Uuid::new_v4())),
            Some(Uuid::new_v4()),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app
        .request(
            Method::POST,
            "/api/v1/coupons/apply",
            Some(apply(Uuid::new_v4())),
            Some(Uuid::new_v4()),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Coupon usage limit reached");

    let id = coupon["id"].as_str().unwrap();
    let (_, fetched) = app.get(&format!("/api/v1/coupons/{id}")).await;
    assert_eq!(fetched["data"]["usedCount"], 1);
    assert_eq!(fetched["data"]["state"], "exhausted");

    let (status, usage) = app.get(&format!("/api/v1/coupons/{id}/usage")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(usage["pagination"]["total"], 1);
    assert_eq!(usage["data"].as_array().map(Vec::len), Some(1));

    let (_, stats) = app.get(&format!("/api/v1/coupons/{id}/statistics")).await;
    assert_eq!(stats["data"]["usedCount"], 1);
    assert_eq!(stats["data"]["remainingUses"], 0);
}

#[tokio::test]
async fn list_is_paginated() {
    let app = TestApp::new().await;
    for code in ["AAA1", "AAA2", "AAA3"] {
        create(
            &app,
            json!({ "code": code, "discountType": "percent", "discountValue": 5 }),
        )
        .await;
    }

    let (status, body) = app.get("/api/v1/coupons?limit=2&page=1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().map(Vec::len), Some(2));
    assert_eq!(body["pagination"]["total"], 3);
    assert_eq!(body["pagination"]["totalPages"], 2);

    let (status, body) = app
        .get("/api/v1/coupons?limit=2&page=18446744073709551615")
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().map(Vec::len), Some(0));
    assert_eq!(body["pagination"]["total"], 3);
}

#[tokio::test]
async fn update_delete_and_duplicate() {
    let app = TestApp::new().await;
    let coupon = create(
        &app,
        json!({ "code": "EDIT", "discountType": "percent", "discountValue": 10 }),
    )
    .await;
    let id = coupon["id"].as_str().unwrap();

    let (status, updated) = app
        .request(
            Method::PUT,
            &format!("/api/v1/coupons/{id}"),
            Some(json!({ "discountValue": 15, "status": "inactive" })),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(decimal(&updated["data"]["discountValue"]), dec!(15));
    assert_eq!(updated["data"]["state"], "inactive");

    let (status, copy) = app
        .post(&format!("/api/v1/coupons/{id}/duplicate"), json!({}))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(copy["data"]["code"], "EDIT_COPY");

    let (status, _) = app
        .request(Method::DELETE, &format!("/api/v1/coupons/{id}"), None, None)
        .await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = app.get(&format!("/api/v1/coupons/{id}")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn bulk_generate_and_expire_endpoints() {
    let app = TestApp::new().await;
    let (status, body) = app
        .post(
            "/api/v1/coupons/bulk-generate",
            json!({
                "template": {
                    "discountType": "fixed_cart",
                    "discountValue": 1000,
                    "validUntil": "2000-01-01T00:00:00Z"
                },
                "count": 3,
                "prefix": "OLD"
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "unexpected body: {body}");
    assert_eq!(body["data"].as_array().map(Vec::len), Some(3));

    let (status, body) = app.post("/api/v1/coupons/expire", json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["expired"], 3);
}

#[tokio::test]
async fn pricing_endpoints() {
    let app = TestApp::new().await;
    let product = app.seed_product(dec!(60000), dec!(2)).await;

    let (status, body) = app
        .post(
            "/api/v1/pricing/calculate",
            json!({ "productId": product.id, "quantity": 1 }),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "unexpected body: {body}");
    assert_eq!(decimal(&body["data"]["basePrice"]), dec!(60000));
    // Domestic default destination, above the free shipping threshold
    assert_eq!(decimal(&body["data"]["shippingCost"]), dec!(0));

    let (status, body) = app
        .post(
            "/api/v1/pricing/cart",
            json!({ "items": [{ "productId": product.id, "quantity": 2 }] }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(decimal(&body["data"]["subtotal"]), dec!(120000));

    let (status, _) = app
        .post(
            "/api/v1/pricing/calculate",
            json!({ "productId": product.id, "quantity": 0 }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn responses_echo_request_id() {
    let app = TestApp::new().await;
    let (status, body) = app.get(&format!("/api/v1/coupons/{}", Uuid::new_v4())).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["request_id"].as_str().is_some_and(|id| !id.is_empty()));
}

#[tokio::test]
async fn health_reports_database() {
    let app = TestApp::new().await;
    let (status, body) = app.get("/api/v1/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["checks"]["database"], "healthy");
}
