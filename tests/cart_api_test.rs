mod common;

use axum::http::{Method, StatusCode};
use bookstore_api::{
    entities::UserRole,
    models::{BookView, CartView, MAX_LINE_QUANTITY},
    services::commerce::MergeOutcome,
};
use common::{line, response_json, TestApp};
use rust_decimal_macros::dec;
use serde_json::json;

#[tokio::test]
async fn cart_routes_require_authentication() {
    let app = TestApp::new().await;

    let response = app.request(Method::GET, "/cart", None, None).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .request(Method::GET, "/cart", None, Some("not-a-jwt"))
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn login_merge_accepts_bare_and_wrapped_guest_carts() {
    let app = TestApp::new().await;
    let (_, token) = app.signed_in("guest@example.com", UserRole::User).await;
    let book = app.seed_book("Dracula", 20_000).await;

    let response = app
        .request(
            Method::POST,
            "/cart/merge",
            Some(json!([line(&book, 2)])),
            Some(&token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let outcome: MergeOutcome = serde_json::from_value(response_json(response).await).unwrap();
    assert_eq!(outcome.lines_merged, 1);
    assert_eq!(outcome.cart.quantity_of(book.id), Some(2));

    let response = app
        .request(
            Method::POST,
            "/cart/merge",
            Some(json!({ "items": [line(&book, 1)] })),
            Some(&token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let outcome: MergeOutcome = serde_json::from_value(response_json(response).await).unwrap();
    assert_eq!(outcome.cart.quantity_of(book.id), Some(3));
    assert_eq!(outcome.cart.subtotal, dec!(600));
}

#[tokio::test]
async fn invalid_merge_lines_report_field_paths() {
    let app = TestApp::new().await;
    let (_, token) = app.signed_in("fields@example.com", UserRole::User).await;

    let response = app
        .request(
            Method::POST,
            "/cart/merge",
            Some(json!([{ "product": { "_id": "nope" }, "quantity": 0 }])),
            Some(&token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = response_json(response).await;
    assert!(body["fields"]["items[0].quantity"].is_array());
    assert!(body["fields"]["items[0].product._id"].is_array());
}

#[tokio::test]
async fn line_operations_round_trip_over_http() {
    let app = TestApp::new().await;
    let (user, token) = app.signed_in("lines@example.com", UserRole::User).await;
    let book = app.seed_book("Frankenstein", 7_500).await;

    let response = app
        .request(
            Method::POST,
            "/cart/add",
            Some(json!({ "productId": book.id, "quantity": 2 })),
            Some(&token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let cart: CartView = serde_json::from_value(response_json(response).await).unwrap();
    assert_eq!(cart.user_id, user.id);
    assert_eq!(cart.quantity_of(book.id), Some(2));

    let uri = format!("/cart/increase/{}", book.id);
    let response = app.request(Method::PATCH, &uri, None, Some(&token)).await;
    let cart: CartView = serde_json::from_value(response_json(response).await).unwrap();
    assert_eq!(cart.quantity_of(book.id), Some(3));

    let uri = format!("/cart/decrease/{}", book.id);
    let response = app.request(Method::PATCH, &uri, None, Some(&token)).await;
    let cart: CartView = serde_json::from_value(response_json(response).await).unwrap();
    assert_eq!(cart.quantity_of(book.id), Some(2));

    let uri = format!("/cart/remove/{}", book.id);
    let response = app.request(Method::DELETE, &uri, None, Some(&token)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let cart: CartView = serde_json::from_value(response_json(response).await).unwrap();
    assert!(cart.is_empty());

    let increase_uri = uri.replace("remove", "increase");
    let response = app
        .request(Method::PATCH, &increase_uri, None, Some(&token))
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app.request(Method::DELETE, "/cart/clear", None, Some(&token)).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn malformed_product_ids_are_bad_requests() {
    let app = TestApp::new().await;
    let (_, token) = app.signed_in("ids@example.com", UserRole::User).await;

    let response = app
        .request(Method::PATCH, "/cart/increase/not-a-uuid", None, Some(&token))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn malformed_add_bodies_report_field_errors() {
    let app = TestApp::new().await;
    let (_, token) = app.signed_in("body@example.com", UserRole::User).await;
    let book = app.seed_book("Beowulf", 5_000).await;

    let response = app
        .request(
            Method::POST,
            "/cart/add",
            Some(json!({ "productId": "not-a-uuid", "quantity": 1 })),
            Some(&token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = response_json(response).await;
    assert!(body["fields"]["productId"].is_array());

    let response = app
        .request(
            Method::POST,
            "/cart/add",
            Some(json!({ "productId": book.id, "quantity": "two" })),
            Some(&token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = response_json(response).await;
    assert!(body["fields"]["quantity"].is_array());

    let response = app
        .request(
            Method::POST,
            "/cart/add",
            Some(json!({ "productId": book.id, "quantity": 1000 })),
            Some(&token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = response_json(response).await;
    assert!(body["fields"]["quantity"].is_array());
}

#[tokio::test]
async fn increase_past_the_line_cap_keeps_the_cart_readable() {
    let app = TestApp::new().await;
    let (_, token) = app.signed_in("cap@example.com", UserRole::User).await;
    let book = app.seed_book("Odyssey", 5_000).await;

    let response = app
        .request(
            Method::POST,
            "/cart/add",
            Some(json!({ "productId": book.id, "quantity": MAX_LINE_QUANTITY })),
            Some(&token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let uri = format!("/cart/increase/{}", book.id);
    let response = app.request(Method::PATCH, &uri, None, Some(&token)).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app.request(Method::GET, "/cart", None, Some(&token)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let cart: CartView = serde_json::from_value(response_json(response).await).unwrap();
    assert_eq!(cart.quantity_of(book.id), Some(MAX_LINE_QUANTITY));
}

#[tokio::test]
async fn catalog_reads_are_public_and_writes_are_admin_only() {
    let app = TestApp::new().await;
    let book = app.seed_book("Walden", 11_000).await;
    let (_, user_token) = app.signed_in("reader@example.com", UserRole::User).await;
    let (_, admin_token) = app.signed_in("admin@example.com", UserRole::Admin).await;

    let response = app.request(Method::GET, "/books", None, None).await;
    assert_eq!(response.status(), StatusCode::OK);
    let page = response_json(response).await;
    assert_eq!(page["total"], 1);

    let response = app
        .request(Method::GET, &format!("/books/{}", book.id), None, None)
        .await;
    let view: BookView = serde_json::from_value(response_json(response).await).unwrap();
    assert_eq!(view.title, "Walden");
    assert_eq!(view.price, dec!(110));

    let new_book = json!({
        "title": "Leaves of Grass",
        "author": "Walt Whitman",
        "price": "350.00",
        "stock": 4
    });
    let response = app
        .request(Method::POST, "/books", Some(new_book.clone()), None)
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .request(Method::POST, "/books", Some(new_book.clone()), Some(&user_token))
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app
        .request(Method::POST, "/books", Some(new_book), Some(&admin_token))
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let created: BookView = serde_json::from_value(response_json(response).await).unwrap();
    assert_eq!(created.price, dec!(350));
}
