//! Checkout endpoint tests

#[path = "../common/mod.rs"]
mod common;

use std::sync::Arc;

use axum::http::StatusCode;
use boxoffice::error::msg;
use boxoffice::payments::{DECLINE_DOMAIN, DummyGateway};
use common::*;
use tower::ServiceExt;

fn checkout_body(email: &str, name: &str, method: &str) -> String {
    format!(
        "billing_email={}&billing_name={}&payment_method={}",
        urlencoding::encode(email),
        urlencoding::encode(name),
        urlencoding::encode(method)
    )
}

fn valid_body(method: &str) -> String {
    checkout_body("buyer@example.com", "Test Buyer", method)
}

fn pending_count(state: &AppState) -> i64 {
    let conn = state.db.get().unwrap();
    conn.query_row("SELECT COUNT(*) FROM pending_payments", [], |row| row.get(0))
        .unwrap()
}

#[tokio::test]
async fn test_invalid_form_is_echoed_with_errors() {
    let gateway = ScriptedGateway::redirecting("mock");
    let state = scripted_app_state(&gateway);
    let session = new_session();

    let response = app(state)
        .oneshot(form_request(
            "/checkout",
            &session,
            &checkout_body("not-an-email", "", ""),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let json = body_json(response).await;
    assert_eq!(json["fields"]["billing_email"], msg::INVALID_EMAIL_FORMAT);
    assert_eq!(json["fields"]["billing_name"], msg::NAME_EMPTY);
    assert_eq!(json["fields"]["payment_method"], msg::PAYMENT_METHOD_EMPTY);
    assert_eq!(json["fields"]["cart"], msg::CART_EMPTY);
    assert_eq!(
        json["form"]["billing_email"], "not-an-email",
        "submitted values come back for re-rendering"
    );
    assert_eq!(gateway.initiate_count(), 0);
}

#[tokio::test]
async fn test_unknown_payment_method() {
    let gateway = ScriptedGateway::redirecting("mock");
    let state = scripted_app_state(&gateway);
    let catalog = seed_catalog(&state);
    let session = new_session();
    fill_cart(&state, &session, &catalog.general, 1);

    let response = app(state)
        .oneshot(form_request("/checkout", &session, &valid_body("paypal")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let json = body_json(response).await;
    assert_eq!(json["fields"]["payment_method"], msg::UNKNOWN_PAYMENT_METHOD);
    assert!(json["fields"].get("cart").is_none());
}

#[tokio::test]
async fn test_redirect_gateway_flow() {
    let gateway = ScriptedGateway::redirecting("mock");
    let state = scripted_app_state(&gateway);
    let catalog = seed_catalog(&state);
    let session = new_session();
    let cart = fill_cart(&state, &session, &catalog.general, 2);
    let payment_id = gateway.peek_next_id();

    let response = app(state.clone())
        .oneshot(form_request("/checkout", &session, &valid_body("MOCK")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(
        location(&response),
        format!("https://pay.example.com/{}", payment_id),
        "browser is sent to the gateway"
    );

    let initiated = gateway.initiated.lock().unwrap().clone();
    assert_eq!(initiated.len(), 1);
    let request = &initiated[0];
    assert_eq!(request.amount_cents, 5000);
    assert_eq!(request.currency, "eur");
    assert!(request.reference.starts_with("bo_ref_"));
    assert_eq!(
        request.return_url,
        format!("{}/payment/callback/mock?reference={}", BASE_URL, request.reference)
    );
    assert!(request.description.contains("Test Concert"));

    let conn = state.db.get().unwrap();
    let pending = queries::get_pending_payment(&conn, &payment_id)
        .unwrap()
        .expect("pending payment is recorded");
    assert_eq!(pending.cart, cart);
    assert_eq!(pending.reference, request.reference);
    assert_eq!(session.pending_payment_id(&conn).unwrap(), Some(payment_id.clone()));
    assert_eq!(
        session_cart(&state, &session),
        cart,
        "cart is kept until the payment is confirmed"
    );
    assert!(queries::get_order_by_payment_id(&conn, &payment_id).unwrap().is_none());
}

#[tokio::test]
async fn test_synchronous_gateway_confirms_inline() {
    let state = create_test_app_state(Gateways::new().with(Arc::new(DummyGateway::new())));
    let catalog = seed_catalog(&state);
    let session = new_session();
    fill_cart(&state, &session, &catalog.general, 2);
    fill_cart(&state, &session, &catalog.vip, 1);

    let response = app(state.clone())
        .oneshot(form_request("/checkout", &session, &valid_body("dummy")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    let target = location(&response);
    let payment_id = target
        .strip_prefix("/payment/success?payment_id=")
        .expect("inline success goes straight to the success page")
        .to_string();

    let conn = state.db.get().unwrap();
    let order = queries::get_order_by_payment_id(&conn, &payment_id)
        .unwrap()
        .expect("order is created inline");
    assert_eq!(order.status, OrderStatus::Completed);
    assert_eq!(order.provider, "dummy");
    assert_eq!(order.total_cents, 2 * 2500 + 7500);
    assert_eq!(queries::list_tickets_for_order(&conn, order.id).unwrap().len(), 3);
    assert!(session_cart(&state, &session).is_empty());
    assert!(session.pending_payment_id(&conn).unwrap().is_none());
    assert_eq!(pending_count(&state), 0);
}

#[tokio::test]
async fn test_declined_payment_keeps_cart() {
    let state = create_test_app_state(Gateways::new().with(Arc::new(DummyGateway::new())));
    let catalog = seed_catalog(&state);
    let session = new_session();
    fill_cart(&state, &session, &catalog.general, 2);

    let response = app(state.clone())
        .oneshot(form_request(
            "/checkout",
            &session,
            &checkout_body(&format!("buyer@{}", DECLINE_DOMAIN), "Test Buyer", "dummy"),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let json = body_json(response).await;
    assert!(
        json["fields"]["general"].as_str().unwrap().contains("declined"),
        "decline reason is shown"
    );
    assert_eq!(session_cart(&state, &session).ticket_count(), 2);
    assert_eq!(pending_count(&state), 0);
}

#[tokio::test]
async fn test_initiation_failure_leaves_nothing_behind() {
    let gateway = ScriptedGateway::redirecting("mock");
    gateway.fail_initiation("card_declined");
    let state = scripted_app_state(&gateway);
    let catalog = seed_catalog(&state);
    let session = new_session();
    fill_cart(&state, &session, &catalog.general, 1);

    let response = app(state.clone())
        .oneshot(form_request("/checkout", &session, &valid_body("mock")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let json = body_json(response).await;
    assert!(json["fields"]["general"].is_string());
    assert_eq!(pending_count(&state), 0);
    assert_eq!(session_cart(&state, &session).ticket_count(), 1);

    let conn = state.db.get().unwrap();
    assert!(session.pending_payment_id(&conn).unwrap().is_none());
}

#[tokio::test]
async fn test_synchronous_pending_goes_to_pending_page() {
    let gateway = ScriptedGateway::synchronous("slowbank");
    gateway.settle_inline(PaymentState::Pending);
    let state = scripted_app_state(&gateway);
    let catalog = seed_catalog(&state);
    let session = new_session();
    fill_cart(&state, &session, &catalog.general, 1);
    let payment_id = gateway.peek_next_id();

    let response = app(state.clone())
        .oneshot(form_request("/checkout", &session, &valid_body("slowbank")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(
        location(&response),
        format!("/payment/pending?payment_id={}", payment_id)
    );
    assert_eq!(pending_count(&state), 1, "kept for a later notification");
    assert_eq!(session_cart(&state, &session).ticket_count(), 1);
}

#[tokio::test]
async fn test_checkout_rechecks_capacity() {
    let gateway = ScriptedGateway::redirecting("mock");
    let state = scripted_app_state(&gateway);
    let catalog = seed_catalog(&state);
    let session = new_session();
    fill_cart(&state, &session, &catalog.vip, 3);

    // Someone else bought three VIP tickets in the meantime
    let other = new_session();
    fill_cart(&state, &other, &catalog.vip, 3);
    create_test_pending_payment(&state, &other, "mock", "mock_pay_other");
    gateway.set_status("mock_pay_other", PaymentState::Success, Some(3 * 7500));
    {
        let mut conn = state.db.get().unwrap();
        let pending = queries::get_pending_payment(&conn, "mock_pay_other")
            .unwrap()
            .unwrap();
        boxoffice::reconcile::fulfill_pending(&mut conn, &state.carts, &pending).unwrap();
    }

    let response = app(state)
        .oneshot(form_request("/checkout", &session, &valid_body("mock")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let json = body_json(response).await;
    assert_eq!(json["fields"]["cart"], msg::NOT_ENOUGH_TICKETS);
    assert_eq!(gateway.initiate_count(), 0);
}

#[tokio::test]
async fn test_resume_reuses_authorization_url() {
    let gateway = ScriptedGateway::redirecting("mock");
    let state = scripted_app_state(&gateway);
    let catalog = seed_catalog(&state);
    let session = new_session();
    fill_cart(&state, &session, &catalog.general, 1);

    let first = app(state.clone())
        .oneshot(form_request("/checkout", &session, &valid_body("mock")))
        .await
        .unwrap();
    let authorization_url = location(&first);

    let resumed = app(state)
        .oneshot(get_request("/checkout/resume", &session))
        .await
        .unwrap();

    assert_eq!(resumed.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&resumed), authorization_url);
    assert_eq!(gateway.initiate_count(), 1, "no new attempt is started");
}

#[tokio::test]
async fn test_resume_without_reusable_authorization_starts_fresh_attempt() {
    let gateway = Arc::new(ScriptedGateway::with_capabilities(
        "oneshot",
        GatewayCapabilities {
            redirect: true,
            reusable_authorization: false,
        },
    ));
    let state = scripted_app_state(&gateway);
    let catalog = seed_catalog(&state);
    let session = new_session();
    fill_cart(&state, &session, &catalog.general, 2);

    app(state.clone())
        .oneshot(form_request("/checkout", &session, &valid_body("oneshot")))
        .await
        .unwrap();
    let second_id = gateway.peek_next_id();

    let resumed = app(state.clone())
        .oneshot(get_request("/checkout/resume", &session))
        .await
        .unwrap();

    assert_eq!(resumed.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&resumed), format!("https://pay.example.com/{}", second_id));

    let initiated = gateway.initiated.lock().unwrap().clone();
    assert_eq!(initiated.len(), 2);
    assert_ne!(
        initiated[0].reference, initiated[1].reference,
        "every attempt gets a fresh reference"
    );
    assert_eq!(initiated[1].amount_cents, 5000);

    let conn = state.db.get().unwrap();
    assert_eq!(session.pending_payment_id(&conn).unwrap(), Some(second_id));
}

#[tokio::test]
async fn test_resume_without_pending_payment() {
    let gateway = ScriptedGateway::redirecting("mock");
    let state = scripted_app_state(&gateway);
    let session = new_session();

    let response = app(state)
        .oneshot(get_request("/checkout/resume", &session))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_resume_after_completion_shows_success() {
    let gateway = ScriptedGateway::redirecting("mock");
    let state = scripted_app_state(&gateway);
    let catalog = seed_catalog(&state);
    let session = new_session();
    fill_cart(&state, &session, &catalog.general, 1);
    let pending = create_test_pending_payment(&state, &session, "mock", "mock_pay_done");

    // Order completed without the pending record being retired yet
    {
        let mut conn = state.db.get().unwrap();
        boxoffice::fulfillment::complete(
            &mut conn,
            &boxoffice::fulfillment::FulfillmentRequest {
                payment_id: &pending.payment_id,
                provider: "mock",
                cart: &pending.cart,
                billing: &pending.billing,
                user_id: None,
                session_id: Some(session.as_str()),
                reference: Some(&pending.reference),
            },
        )
        .unwrap();
    }

    let response = app(state)
        .oneshot(get_request("/checkout/resume", &session))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), "/payment/success?payment_id=mock_pay_done");
    assert_eq!(gateway.initiate_count(), 0);
}
