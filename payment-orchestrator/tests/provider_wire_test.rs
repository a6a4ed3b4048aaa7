mod common;

use axum::http::{Method, StatusCode};
use common::{signed_alipay_response, user_request, TestApp};
use payment_orchestrator::models::ProviderType;
use payment_orchestrator::services::ConfirmOutcome;
use rust_decimal::Decimal;
use serde_json::json;
use wiremock::matchers::{body_string_contains, method, path, query_param};
use wiremock::{Mock, ResponseTemplate};

async fn mount_epay(app: &TestApp, act: &str, response: ResponseTemplate) {
    Mock::given(method("POST"))
        .and(path("/api.php"))
        .and(query_param("act", act))
        .respond_with(response)
        .mount(&app.gateway)
        .await;
}

async fn new_order(app: &TestApp, provider: &str) -> String {
    let created = app.create_payment(provider, None).await;
    created["order_no"].as_str().unwrap().to_string()
}

async fn post_order(app: &TestApp, order_no: &str, action: &str) -> (StatusCode, serde_json::Value) {
    app.send_json(user_request(
        Method::POST,
        &format!("/orders/{}/{}", order_no, action),
        None,
    ))
    .await
}

async fn paid_epay_order(app: &TestApp) -> String {
    let order_no = new_order(app, "epay").await;
    Mock::given(method("POST"))
        .and(path("/api.php"))
        .and(query_param("act", "order"))
        .and(body_string_contains(format!("out_trade_no={}", order_no)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 1,
            "trade_no": "EP2024000100",
            "out_trade_no": order_no,
            "money": "9.90",
            "status": 1,
        })))
        .mount(&app.gateway)
        .await;

    let (status, order) = post_order(app, &order_no, "query").await;
    assert_eq!(status, StatusCode::OK, "{}", order);
    assert_eq!(order["status"], "PAID");
    assert_eq!(order["provider_txn_id"], "EP2024000100");
    assert_eq!(order["paid_amount"], "9.90");
    order_no
}

#[tokio::test]
async fn epay_query_reconciles_a_paid_trade() {
    let app = TestApp::spawn().await;
    paid_epay_order(&app).await;
}

#[tokio::test]
async fn epay_unpaid_trade_leaves_order_pending() {
    let app = TestApp::spawn().await;
    let order_no = new_order(&app, "epay").await;
    mount_epay(
        &app,
        "order",
        ResponseTemplate::new(200).set_body_json(json!({ "code": 1, "status": 0 })),
    )
    .await;

    let (status, order) = post_order(&app, &order_no, "query").await;
    assert_eq!(status, StatusCode::OK, "{}", order);
    assert_eq!(order["status"], "PENDING");
}

#[tokio::test]
async fn epay_refund_and_refund_status() {
    let app = TestApp::spawn().await;
    let order_no = paid_epay_order(&app).await;

    Mock::given(method("POST"))
        .and(path("/api.php"))
        .and(query_param("act", "refund"))
        .and(body_string_contains("money=9.90"))
        .and(body_string_contains(format!("out_refund_no={}RF", order_no)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "code": 1, "msg": "ok" })))
        .expect(1)
        .mount(&app.gateway)
        .await;
    Mock::given(method("POST"))
        .and(path("/api.php"))
        .and(query_param("act", "refundquery"))
        .and(body_string_contains(format!("out_refund_no={}RF", order_no)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 1,
            "status": 1,
            "money": "9.90",
        })))
        .mount(&app.gateway)
        .await;

    let (status, order) = post_order(&app, &order_no, "refund").await;
    assert_eq!(status, StatusCode::OK, "{}", order);
    assert_eq!(order["refund_state"], "REFUNDED");

    let (status, result) = app
        .send_json(user_request(
            Method::GET,
            &format!("/orders/{}/refund", order_no),
            None,
        ))
        .await;
    assert_eq!(status, StatusCode::OK, "{}", result);
    assert_eq!(result["success"], true);
    assert_eq!(result["status"], "REFUNDED");
}

#[tokio::test]
async fn gateway_client_error_is_a_rejection() {
    let app = TestApp::spawn().await;
    let order_no = new_order(&app, "epay").await;
    mount_epay(
        &app,
        "order",
        ResponseTemplate::new(400).set_body_string("missing parameter"),
    )
    .await;

    let (status, body) = post_order(&app, &order_no, "query").await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY, "{}", body);
    assert_eq!(body["kind"], "UPSTREAM_REJECTED");
    assert_eq!(body["provider_code"], "HTTP_400");
    assert_eq!(app.get_order(&order_no).await["status"], "PENDING");
}

#[tokio::test]
async fn gateway_server_error_is_transient() {
    let app = TestApp::spawn().await;
    let order_no = new_order(&app, "epay").await;
    mount_epay(&app, "order", ResponseTemplate::new(503)).await;

    let (status, body) = post_order(&app, &order_no, "query").await;

    assert_eq!(status, StatusCode::BAD_GATEWAY, "{}", body);
    assert_eq!(body["kind"], "UPSTREAM_TRANSIENT");
}

#[tokio::test]
async fn alipay_close_cancels_the_order() {
    let app = TestApp::spawn().await;
    let order_no = new_order(&app, "alipay").await;

    Mock::given(method("POST"))
        .and(path("/gateway.do"))
        .and(body_string_contains("method=alipay.trade.close"))
        .respond_with(ResponseTemplate::new(200).set_body_string(signed_alipay_response(
            "alipay.trade.close",
            json!({ "code": "10000", "msg": "Success", "out_trade_no": order_no }),
        )))
        .expect(1)
        .mount(&app.gateway)
        .await;

    let (status, body) = post_order(&app, &order_no, "close").await;

    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["order"]["status"], "CANCELLED");
    assert_eq!(body["provider"]["status"], "CLOSED");
}

#[tokio::test]
async fn alipay_cancel_of_unopened_trade_succeeds() {
    let app = TestApp::spawn().await;
    let order_no = new_order(&app, "alipay").await;

    Mock::given(method("POST"))
        .and(path("/gateway.do"))
        .and(body_string_contains("method=alipay.trade.close"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            json!({
                "alipay_trade_close_response": {
                    "code": "40004",
                    "msg": "Business Failed",
                    "sub_code": "ACQ.TRADE_NOT_EXIST",
                    "sub_msg": "trade does not exist",
                }
            })
            .to_string(),
        ))
        .expect(1)
        .mount(&app.gateway)
        .await;

    let (status, order) = post_order(&app, &order_no, "cancel").await;

    assert_eq!(status, StatusCode::OK, "{}", order);
    assert_eq!(order["status"], "CANCELLED");
}

#[tokio::test]
async fn alipay_refund_status_reports_completed_refund() {
    let app = TestApp::spawn().await;
    let order_no = new_order(&app, "alipay").await;

    Mock::given(method("POST"))
        .and(path("/gateway.do"))
        .and(body_string_contains("method=alipay.trade.fastpay.refund.query"))
        .respond_with(ResponseTemplate::new(200).set_body_string(signed_alipay_response(
            "alipay.trade.fastpay.refund.query",
            json!({
                "code": "10000",
                "msg": "Success",
                "out_trade_no": order_no,
                "refund_status": "REFUND_SUCCESS",
                "refund_amount": "9.90",
            }),
        )))
        .expect(1)
        .mount(&app.gateway)
        .await;

    let (status, result) = app
        .send_json(user_request(
            Method::GET,
            &format!("/orders/{}/refund", order_no),
            None,
        ))
        .await;

    assert_eq!(status, StatusCode::OK, "{}", result);
    assert_eq!(result["success"], true);
    assert_eq!(result["status"], "REFUNDED");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn notification_and_reconcile_race_pays_once() {
    let app = TestApp::spawn().await;
    let order_no = new_order(&app, "epay").await;
    mount_epay(
        &app,
        "order",
        ResponseTemplate::new(200).set_body_json(json!({
            "code": 1,
            "trade_no": "EP2024000200",
            "money": "9.90",
            "status": 1,
        })),
    )
    .await;

    let mut confirms = Vec::new();
    let mut reconciles = Vec::new();
    for _ in 0..4 {
        let orders = app.state.orders.clone();
        let no = order_no.clone();
        confirms.push(tokio::spawn(async move {
            orders
                .apply_payment_confirmed(&no, ProviderType::Epay, "EP2024000200", Decimal::new(990, 2))
                .await
        }));
        let orders = app.state.orders.clone();
        let no = order_no.clone();
        reconciles.push(tokio::spawn(async move { orders.reconcile(&no).await }));
    }

    let mut applied = 0;
    let mut pay_times = Vec::new();
    for handle in confirms {
        match handle.await.unwrap().unwrap() {
            ConfirmOutcome::Applied(order) => {
                applied += 1;
                pay_times.push(order.pay_time);
            }
            ConfirmOutcome::Duplicate(order) => pay_times.push(order.pay_time),
        }
    }
    for handle in reconciles {
        pay_times.push(handle.await.unwrap().unwrap().pay_time);
    }

    let stored = app.state.orders.get(&order_no).await.unwrap();
    assert!(stored.is_paid());
    assert!(applied <= 1);
    assert!(stored.pay_time.is_some());
    assert!(pay_times.iter().all(|t| *t == stored.pay_time));
    assert_eq!(stored.provider_txn_id.as_deref(), Some("EP2024000200"));
}
