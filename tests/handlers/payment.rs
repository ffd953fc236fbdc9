//! Browser callback and status page tests

#[path = "../common/mod.rs"]
mod common;

use std::sync::Arc;

use axum::http::StatusCode;
use common::*;
use tower::ServiceExt;

struct Paid {
    state: AppState,
    gateway: Arc<ScriptedGateway>,
    session: SessionId,
    pending: PendingPayment,
}

/// A session that has been sent to the gateway for 2 general tickets.
fn awaiting_callback(payment_id: &str) -> Paid {
    let gateway = ScriptedGateway::redirecting("mock");
    let state = scripted_app_state(&gateway);
    let catalog = seed_catalog(&state);
    let session = new_session();
    fill_cart(&state, &session, &catalog.general, 2);
    let pending = create_test_pending_payment(&state, &session, "mock", payment_id);
    Paid {
        state,
        gateway,
        session,
        pending,
    }
}

#[tokio::test]
async fn test_callback_by_reference_completes_order() {
    let paid = awaiting_callback("mock_pay_1");
    paid.gateway
        .set_status("mock_pay_1", PaymentState::Success, Some(5000));

    let response = app(paid.state.clone())
        .oneshot(get_request(
            &format!("/payment/callback/mock?reference={}", paid.pending.reference),
            &paid.session,
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), "/payment/success?payment_id=mock_pay_1");

    let conn = paid.state.db.get().unwrap();
    let order = queries::get_order_by_payment_id(&conn, "mock_pay_1")
        .unwrap()
        .expect("callback fulfills the order");
    assert_eq!(order.status, OrderStatus::Completed);
    assert!(session_cart(&paid.state, &paid.session).is_empty());
}

#[tokio::test]
async fn test_callback_with_matching_payment_id() {
    let paid = awaiting_callback("mock_pay_2");
    paid.gateway
        .set_status("mock_pay_2", PaymentState::Success, Some(5000));

    let response = app(paid.state.clone())
        .oneshot(get_request(
            &format!(
                "/payment/callback/mock?reference={}&payment_id=mock_pay_2",
                paid.pending.reference
            ),
            &paid.session,
        ))
        .await
        .unwrap();

    assert_eq!(location(&response), "/payment/success?payment_id=mock_pay_2");
}

#[tokio::test]
async fn test_callback_by_reference_after_notification() {
    let paid = awaiting_callback("mock_pay_late");
    paid.gateway
        .set_status("mock_pay_late", PaymentState::Success, Some(5000));

    let response = app(paid.state.clone())
        .oneshot(notification_request("mock", &payment_updated("mock_pay_late"), true))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    {
        let conn = paid.state.db.get().unwrap();
        assert!(queries::get_pending_payment(&conn, "mock_pay_late").unwrap().is_none());
        let order = queries::get_order_by_reference(&conn, &paid.pending.reference)
            .unwrap()
            .expect("order remembers the attempt's reference");
        assert_eq!(order.payment_id, "mock_pay_late");
    }

    let response = app(paid.state.clone())
        .oneshot(get_request(
            &format!("/payment/callback/mock?reference={}", paid.pending.reference),
            &paid.session,
        ))
        .await
        .unwrap();
    assert_eq!(location(&response), "/payment/success?payment_id=mock_pay_late");

    let response = app(paid.state.clone())
        .oneshot(get_request(
            &format!(
                "/payment/callback/mock?reference={}&payment_id=mock_pay_other",
                paid.pending.reference
            ),
            &paid.session,
        ))
        .await
        .unwrap();
    assert_eq!(
        location(&response),
        "/payment/unknown?payment_id=mock_pay_other",
        "the stored reference still guards against mismatched ids"
    );
}

#[tokio::test]
async fn test_callback_with_conflicting_ids_is_unknown() {
    let paid = awaiting_callback("mock_pay_3");
    paid.gateway
        .set_status("mock_pay_3", PaymentState::Success, Some(5000));
    paid.gateway
        .set_status("mock_pay_evil", PaymentState::Success, Some(5000));

    let response = app(paid.state.clone())
        .oneshot(get_request(
            &format!(
                "/payment/callback/mock?reference={}&payment_id=mock_pay_evil",
                paid.pending.reference
            ),
            &paid.session,
        ))
        .await
        .unwrap();

    assert_eq!(location(&response), "/payment/unknown?payment_id=mock_pay_evil");
    assert_eq!(paid.gateway.query_count(), 0);
    let conn = paid.state.db.get().unwrap();
    assert!(queries::get_order_by_payment_id(&conn, "mock_pay_3").unwrap().is_none());
}

#[tokio::test]
async fn test_callback_for_failed_payment() {
    let paid = awaiting_callback("mock_pay_4");
    paid.gateway.set_status("mock_pay_4", PaymentState::Failed, None);

    let response = app(paid.state.clone())
        .oneshot(get_request(
            "/payment/callback/mock?payment_id=mock_pay_4",
            &paid.session,
        ))
        .await
        .unwrap();

    assert_eq!(location(&response), "/payment/failed?payment_id=mock_pay_4");
    assert_eq!(session_cart(&paid.state, &paid.session).ticket_count(), 2);
}

#[tokio::test]
async fn test_callback_from_other_browser_is_unknown() {
    let paid = awaiting_callback("mock_pay_5");
    paid.gateway
        .set_status("mock_pay_5", PaymentState::Success, Some(5000));
    let stranger = new_session();

    let response = app(paid.state.clone())
        .oneshot(get_request(
            "/payment/callback/mock?payment_id=mock_pay_5",
            &stranger,
        ))
        .await
        .unwrap();

    assert_eq!(location(&response), "/payment/unknown?payment_id=mock_pay_5");
    let conn = paid.state.db.get().unwrap();
    assert!(queries::get_order_by_payment_id(&conn, "mock_pay_5").unwrap().is_none());
}

#[tokio::test]
async fn test_callback_edge_cases_go_to_unknown_page() {
    let paid = awaiting_callback("mock_pay_6");

    let response = app(paid.state.clone())
        .oneshot(get_request("/payment/callback/mock", &paid.session))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), "/payment/unknown");

    let response = app(paid.state.clone())
        .oneshot(get_request(
            "/payment/callback/nosuchpay?payment_id=mock_pay_6",
            &paid.session,
        ))
        .await
        .unwrap();
    assert_eq!(location(&response), "/payment/unknown?payment_id=mock_pay_6");
}

#[tokio::test]
async fn test_success_page_shows_own_order_only() {
    let paid = awaiting_callback("mock_pay_7");
    paid.gateway
        .set_status("mock_pay_7", PaymentState::Success, Some(5000));

    app(paid.state.clone())
        .oneshot(get_request(
            "/payment/callback/mock?payment_id=mock_pay_7",
            &paid.session,
        ))
        .await
        .unwrap();

    let response = app(paid.state.clone())
        .oneshot(get_request("/payment/success?payment_id=mock_pay_7", &paid.session))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "success");
    assert_eq!(json["payment_id"], "mock_pay_7");
    assert_eq!(json["order"]["payment_id"], "mock_pay_7");
    assert_eq!(json["order"]["tickets"].as_array().unwrap().len(), 2);
    assert!(
        json["order"].get("session_id").is_none(),
        "session ids are never exposed"
    );

    let stranger = new_session();
    let response = app(paid.state.clone())
        .oneshot(get_request("/payment/success?payment_id=mock_pay_7", &stranger))
        .await
        .unwrap();
    let json = body_json(response).await;
    assert_eq!(json["status"], "success");
    assert!(json.get("order").is_none());
}

#[tokio::test]
async fn test_status_pages_render() {
    let state = create_test_app_state(Gateways::new());
    let session = new_session();

    for page in ["failed", "pending", "unknown"] {
        let response = app(state.clone())
            .oneshot(get_request(
                &format!("/payment/{}?payment_id=pay_x", page),
                &session,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["status"], page);
        assert_eq!(json["payment_id"], "pay_x");
        assert!(json.get("order").is_none());
    }
}

#[tokio::test]
async fn test_get_order_is_owner_only() {
    let paid = awaiting_callback("mock_pay_8");
    paid.gateway
        .set_status("mock_pay_8", PaymentState::Success, Some(5000));
    app(paid.state.clone())
        .oneshot(get_request(
            "/payment/callback/mock?payment_id=mock_pay_8",
            &paid.session,
        ))
        .await
        .unwrap();

    let order_number = {
        let conn = paid.state.db.get().unwrap();
        queries::get_order_by_payment_id(&conn, "mock_pay_8")
            .unwrap()
            .unwrap()
            .order_number
    };

    let response = app(paid.state.clone())
        .oneshot(get_request(&format!("/orders/{}", order_number), &paid.session))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["order_number"], order_number.as_str());
    assert_eq!(json["status"], "completed");
    assert_eq!(json["total_cents"], 5000);

    let response = app(paid.state.clone())
        .oneshot(get_request(&format!("/orders/{}", order_number), &new_session()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app(paid.state)
        .oneshot(get_request("/orders/BO-000000000000", &paid.session))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_health() {
    let state = create_test_app_state(Gateways::new());
    let response = app(state)
        .oneshot(
            axum::http::Request::builder()
                .uri("/health")
                .body(axum::body::Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "ok");
}
