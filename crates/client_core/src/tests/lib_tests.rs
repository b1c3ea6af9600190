use std::{collections::HashMap, sync::Arc};

use super::*;
use axum::{
    extract::{Path, Query, State},
    http::{StatusCode, Uri},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use shared::domain::ShippingInfo;
use tokio::{net::TcpListener, sync::Mutex};

#[derive(Clone, Default)]
struct RecordedRequests {
    bodies: Arc<Mutex<Vec<(String, Value)>>>,
    queries: Arc<Mutex<Vec<HashMap<String, String>>>>,
}

async fn echo_transaction(
    State(recorded): State<RecordedRequests>,
    uri: Uri,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let path = uri.path().to_string();
    recorded.bodies.lock().await.push((path.clone(), body));
    let response = match path.as_str() {
        "/api/checkout/create-flow" => json!({
            "success": true,
            "data": { "sessionId": "sess-1", "flowId": "flow-1", "transactionId": "txn-42" }
        }),
        "/api/select" => json!({ "success": false, "message": "item no longer listed" }),
        "/api/init" => json!({ "success": false, "error": "pincode not serviceable" }),
        _ => json!({ "success": true, "data": { "orderId": "ord-7" } }),
    };
    (StatusCode::OK, Json(response))
}

async fn failing_confirm(Json(_body): Json<Value>) -> (StatusCode, Json<Value>) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "success": false, "error": "order table locked" })),
    )
}

async fn plain_gateway_error() -> (StatusCode, &'static str) {
    (StatusCode::BAD_GATEWAY, "<html>upstream down</html>")
}

async fn status_for(Path(transaction_id): Path<String>) -> Json<Value> {
    Json(json!({
        "success": true,
        "data": { "transactionId": transaction_id, "state": "CONFIRMED" }
    }))
}

async fn list_products() -> Json<Value> {
    Json(json!([
        { "id": "rice", "name": "Basmati Rice", "price": 50, "seller_id": "seller_123" },
        { "id": "dal", "name": "Toor Dal", "price": 30.5, "category": "Pulses" }
    ]))
}

async fn search_products(
    State(recorded): State<RecordedRequests>,
    Query(query): Query<HashMap<String, String>>,
) -> Json<Value> {
    recorded.queries.lock().await.push(query);
    Json(json!({
        "success": true,
        "data": [{ "id": "rice", "name": "Basmati Rice", "price": 50 }]
    }))
}

async fn product_feed(
    State(recorded): State<RecordedRequests>,
    Query(query): Query<HashMap<String, String>>,
) -> Json<Value> {
    recorded.queries.lock().await.push(query);
    Json(json!([]))
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn spawn_api_server() -> anyhow::Result<(String, RecordedRequests)> {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let recorded = RecordedRequests::default();
    let app = Router::new()
        .route("/api/checkout/create-flow", post(echo_transaction))
        .route("/api/select", post(echo_transaction))
        .route("/api/init", post(echo_transaction))
        .route("/api/confirm", post(failing_confirm))
        .route("/gateway/api/select", post(plain_gateway_error))
        .route("/api/status/:transaction_id", get(status_for))
        .route("/api/products", get(list_products))
        .route("/api/products/search", get(search_products))
        .route("/api/products/feed", get(product_feed))
        .route("/health", get(health))
        .with_state(recorded.clone());
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Ok((format!("http://{addr}"), recorded))
}

fn select_request() -> TransactionRequest<SelectInputs> {
    TransactionRequest {
        transaction_id: TransactionId::from("txn-42"),
        inputs: SelectInputs {
            item_id: "rice".into(),
            quantity: 2,
        },
    }
}

#[test]
fn rejects_urls_that_cannot_carry_paths() {
    assert!(ApiClient::new("mailto:buyer@example.com").is_err());
    assert!(ApiClient::new("not a url").is_err());
    assert!(ApiClient::new("https://mandi.example.com/base").is_ok());
}

#[test]
fn endpoint_joins_segments_onto_base_path() {
    let client = ApiClient::new("https://mandi.example.com/v1/").expect("client");
    let url = client
        .endpoint(&["api", "status", "txn/with space"])
        .expect("url");
    assert_eq!(
        url.as_str(),
        "https://mandi.example.com/v1/api/status/txn%2Fwith%20space"
    );
}

#[tokio::test]
async fn create_flow_sends_usecase_and_reads_identifiers() {
    let (server_url, recorded) = spawn_api_server().await.expect("spawn server");
    let client = ApiClient::new(&server_url).expect("client");

    let flow = client
        .create_flow("agricultural_flow_1")
        .await
        .expect("create flow");
    assert_eq!(flow.transaction_id, TransactionId::from("txn-42"));
    assert_eq!(flow.session_id, "sess-1");
    assert_eq!(flow.flow_id, "flow-1");

    let bodies = recorded.bodies.lock().await;
    assert_eq!(
        bodies.as_slice(),
        &[(
            "/api/checkout/create-flow".to_string(),
            json!({ "usecaseId": "agricultural_flow_1" })
        )]
    );
}

#[tokio::test]
async fn success_false_is_reported_with_message() {
    let (server_url, recorded) = spawn_api_server().await.expect("spawn server");
    let client = ApiClient::new(&server_url).expect("client");

    let err = client
        .select(&select_request())
        .await
        .expect_err("select must fail");
    assert_eq!(err, ApiFailure::rejected("item no longer listed"));

    let bodies = recorded.bodies.lock().await;
    assert_eq!(
        bodies[0].1,
        json!({ "transactionId": "txn-42", "inputs": { "item_id": "rice", "quantity": 2 } })
    );
}

#[tokio::test]
async fn error_field_is_used_when_message_is_absent() {
    let (server_url, _recorded) = spawn_api_server().await.expect("spawn server");
    let client = ApiClient::new(&server_url).expect("client");

    let err = client
        .init(&TransactionRequest {
            transaction_id: TransactionId::from("txn-42"),
            inputs: InitInputs::delivery(ShippingInfo::new("Asha", "12 Mandi Road", "98765")),
        })
        .await
        .expect_err("init must fail");
    assert_eq!(err.to_string(), "pincode not serviceable");
}

#[tokio::test]
async fn non_success_status_carries_body_message() {
    let (server_url, _recorded) = spawn_api_server().await.expect("spawn server");
    let client = ApiClient::new(&server_url).expect("client");

    let err = client
        .confirm(&TransactionRequest {
            transaction_id: TransactionId::from("txn-42"),
            inputs: ConfirmInputs {
                customer_name: "Asha".to_string(),
                total_amount: Decimal::from(50),
                seller_id: "seller_123".into(),
                buyer_id: "buyer_default".into(),
                items: Vec::new(),
                payment: shared::protocol::Payment::cash_on_delivery(),
            },
        })
        .await
        .expect_err("confirm must fail");
    assert_eq!(
        err,
        ApiFailure::Status {
            status: 500,
            message: "order table locked".to_string()
        }
    );
}

#[tokio::test]
async fn non_json_error_body_falls_back_to_reason_phrase() {
    let (server_url, _recorded) = spawn_api_server().await.expect("spawn server");
    let client = ApiClient::new(&format!("{server_url}/gateway")).expect("client");

    let err = client
        .select(&select_request())
        .await
        .expect_err("select must fail");
    assert_eq!(
        err,
        ApiFailure::Status {
            status: 502,
            message: "Bad Gateway".to_string()
        }
    );
}

#[tokio::test]
async fn unreachable_server_is_a_transport_failure() {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);

    let client = ApiClient::new(&format!("http://{addr}")).expect("client");
    let err = client
        .create_flow("agricultural_flow_1")
        .await
        .expect_err("nothing is listening");
    assert!(matches!(err, ApiFailure::Transport(_)), "unexpected: {err:?}");
}

#[tokio::test]
async fn status_returns_envelope_data() {
    let (server_url, _recorded) = spawn_api_server().await.expect("spawn server");
    let client = ApiClient::new(&server_url).expect("client");

    let status = client
        .status(&TransactionId::from("txn-42"))
        .await
        .expect("status");
    assert_eq!(
        status,
        json!({ "transactionId": "txn-42", "state": "CONFIRMED" })
    );
}

#[tokio::test]
async fn product_routes_accept_bare_and_wrapped_listings() {
    let (server_url, recorded) = spawn_api_server().await.expect("spawn server");
    let client = ApiClient::new(&server_url).expect("client");

    let products = client.list_products().await.expect("list");
    assert_eq!(products.len(), 2);
    assert_eq!(products[0].price, Decimal::from(50));
    assert_eq!(products[0].seller_id.as_str(), "seller_123");
    assert_eq!(products[1].price, Decimal::new(305, 1));
    assert!(products[1].seller_id.is_empty());

    let found = client
        .search_products("basmati & dal")
        .await
        .expect("search");
    assert_eq!(found.len(), 1);

    let feed = client.product_feed(DEFAULT_FEED_LIMIT).await.expect("feed");
    assert!(feed.is_empty());

    let queries = recorded.queries.lock().await;
    assert_eq!(queries[0].get("q").map(String::as_str), Some("basmati & dal"));
    assert_eq!(queries[1].get("limit").map(String::as_str), Some("10"));
}

#[tokio::test]
async fn blank_search_lists_everything() {
    let (server_url, recorded) = spawn_api_server().await.expect("spawn server");
    let client = ApiClient::new(&server_url).expect("client");

    let products = client.search_products("   ").await.expect("search");
    assert_eq!(products.len(), 2);
    assert!(recorded.queries.lock().await.is_empty());
}

#[tokio::test]
async fn health_returns_raw_document() {
    let (server_url, _recorded) = spawn_api_server().await.expect("spawn server");
    let client = ApiClient::new(&server_url).expect("client");
    assert_eq!(client.health().await.expect("health"), json!({ "status": "ok" }));
}
