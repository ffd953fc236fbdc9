//! Pending payment and session value tests

#[path = "../common/mod.rs"]
mod common;

use common::*;

#[test]
fn test_create_and_get_pending_payment() {
    let state = create_test_app_state(Gateways::new());
    let catalog = seed_catalog(&state);
    let session = new_session();
    let cart = fill_cart(&state, &session, &catalog.general, 2);

    let pending = create_test_pending_payment(&state, &session, "mock", "mock_pay_1");
    assert_eq!(pending.cart, cart);

    let conn = state.db.get().unwrap();
    let by_id = queries::get_pending_payment(&conn, "mock_pay_1")
        .expect("query failed")
        .expect("pending payment should exist");
    assert_eq!(by_id.payment_id, "mock_pay_1");
    assert_eq!(by_id.provider, "mock");
    assert_eq!(by_id.session_id, session.as_str());
    assert_eq!(by_id.cart, cart, "cart snapshot should survive storage intact");
    assert_eq!(by_id.billing, test_billing());
    assert_eq!(by_id.expires_at, by_id.created_at + PENDING_TTL_SECS);

    let by_reference = queries::get_pending_payment_by_reference(&conn, &pending.reference)
        .expect("query failed")
        .expect("lookup by reference should find it");
    assert_eq!(by_reference.payment_id, "mock_pay_1");

    assert_eq!(
        session.pending_payment_id(&conn).unwrap().as_deref(),
        Some("mock_pay_1"),
        "session should point at its pending payment"
    );
}

#[test]
fn test_pending_payment_lookup_is_session_independent() {
    let state = create_test_app_state(Gateways::new());
    let catalog = seed_catalog(&state);
    let session = new_session();
    fill_cart(&state, &session, &catalog.general, 1);
    create_test_pending_payment(&state, &session, "mock", "mock_pay_2");

    // A fresh pool connection with no session context still finds it
    let conn = state.db.get().unwrap();
    assert!(queries::get_pending_payment(&conn, "mock_pay_2").unwrap().is_some());
    assert!(queries::get_pending_payment(&conn, "mock_pay_missing").unwrap().is_none());
}

#[test]
fn test_payment_id_is_unique() {
    let state = create_test_app_state(Gateways::new());
    let catalog = seed_catalog(&state);
    let session = new_session();
    fill_cart(&state, &session, &catalog.general, 1);
    create_test_pending_payment(&state, &session, "mock", "mock_pay_dup");

    let conn = state.db.get().unwrap();
    let again = queries::create_pending_payment(
        &conn,
        &CreatePendingPayment {
            payment_id: "mock_pay_dup".to_string(),
            reference: EntityType::PaymentReference.gen_id(),
            provider: "mock".to_string(),
            session_id: session.as_str().to_string(),
            user_id: None,
            cart: session_cart(&state, &session),
            billing: test_billing(),
            authorization_url: None,
            ttl_secs: PENDING_TTL_SECS,
        },
    );
    assert!(again.is_err(), "a payment id can only have one pending record");
}

#[test]
fn test_delete_pending_payment() {
    let state = create_test_app_state(Gateways::new());
    let catalog = seed_catalog(&state);
    let session = new_session();
    fill_cart(&state, &session, &catalog.general, 1);
    create_test_pending_payment(&state, &session, "mock", "mock_pay_3");

    let conn = state.db.get().unwrap();
    assert!(queries::delete_pending_payment(&conn, "mock_pay_3").unwrap());
    assert!(
        !queries::delete_pending_payment(&conn, "mock_pay_3").unwrap(),
        "second delete should report nothing removed"
    );
    assert!(queries::get_pending_payment(&conn, "mock_pay_3").unwrap().is_none());
}

#[test]
fn test_purge_expired_pending_payments() {
    let state = create_test_app_state(Gateways::new());
    let catalog = seed_catalog(&state);
    let session = new_session();
    let cart = fill_cart(&state, &session, &catalog.general, 1);
    create_test_pending_payment(&state, &session, "mock", "mock_pay_live");

    let conn = state.db.get().unwrap();
    queries::create_pending_payment(
        &conn,
        &CreatePendingPayment {
            payment_id: "mock_pay_stale".to_string(),
            reference: EntityType::PaymentReference.gen_id(),
            provider: "mock".to_string(),
            session_id: session.as_str().to_string(),
            user_id: None,
            cart,
            billing: test_billing(),
            authorization_url: None,
            ttl_secs: -60,
        },
    )
    .unwrap();

    let purged = queries::purge_expired_pending_payments(&conn).unwrap();
    assert_eq!(purged, 1);
    assert!(queries::get_pending_payment(&conn, "mock_pay_stale").unwrap().is_none());
    assert!(queries::get_pending_payment(&conn, "mock_pay_live").unwrap().is_some());
}

#[test]
fn test_purge_keeps_snapshot_of_unfinished_order() {
    let state = create_test_app_state(Gateways::new());
    let catalog = seed_catalog(&state);
    let session = new_session();
    let cart = fill_cart(&state, &session, &catalog.general, 2);

    let conn = state.db.get().unwrap();
    for payment_id in ["mock_pay_failed", "mock_pay_done"] {
        queries::create_pending_payment(
            &conn,
            &CreatePendingPayment {
                payment_id: payment_id.to_string(),
                reference: EntityType::PaymentReference.gen_id(),
                provider: "mock".to_string(),
                session_id: session.as_str().to_string(),
                user_id: None,
                cart: cart.clone(),
                billing: test_billing(),
                authorization_url: None,
                ttl_secs: -60,
            },
        )
        .unwrap();

        let order = CreateOrder {
            user_id: None,
            event_id: catalog.event.id,
            total_cents: cart.total_cents,
            provider: "mock".to_string(),
            payment_id: payment_id.to_string(),
            billing_email: "buyer@example.com".to_string(),
            billing_name: "Test Buyer".to_string(),
            session_id: Some(session.as_str().to_string()),
            reference: None,
        };
        assert!(queries::try_insert_order(&conn, &order, &boxoffice::id::order_number()).unwrap());
    }

    let failed = queries::get_order_by_payment_id(&conn, "mock_pay_failed")
        .unwrap()
        .unwrap();
    queries::set_order_status(&conn, failed.id, OrderStatus::Failed).unwrap();
    let done = queries::get_order_by_payment_id(&conn, "mock_pay_done")
        .unwrap()
        .unwrap();
    assert!(queries::try_complete_order(&conn, done.id).unwrap());

    let purged = queries::purge_expired_pending_payments(&conn).unwrap();
    assert_eq!(purged, 1, "only the completed order's snapshot is released");
    assert!(
        queries::get_pending_payment(&conn, "mock_pay_failed").unwrap().is_some(),
        "a failed fulfillment keeps its snapshot for recovery"
    );
    assert!(queries::get_pending_payment(&conn, "mock_pay_done").unwrap().is_none());
}

#[test]
fn test_session_remove_if_only_removes_expected_value() {
    let pool = setup_test_db();
    let conn = pool.get().unwrap();

    queries::session_put(&conn, "bo_ses_a", PENDING_PAYMENT_KEY, "pay_new").unwrap();

    assert!(
        !queries::session_remove_if(&conn, "bo_ses_a", PENDING_PAYMENT_KEY, "pay_old").unwrap(),
        "a stale payment id must not release the newer pointer"
    );
    assert_eq!(
        queries::session_get(&conn, "bo_ses_a", PENDING_PAYMENT_KEY).unwrap().as_deref(),
        Some("pay_new")
    );

    assert!(queries::session_remove_if(&conn, "bo_ses_a", PENDING_PAYMENT_KEY, "pay_new").unwrap());
    assert!(queries::session_get(&conn, "bo_ses_a", PENDING_PAYMENT_KEY).unwrap().is_none());
}

#[test]
fn test_session_put_overwrites() {
    let pool = setup_test_db();
    let conn = pool.get().unwrap();

    queries::session_put(&conn, "bo_ses_b", "k", "one").unwrap();
    queries::session_put(&conn, "bo_ses_b", "k", "two").unwrap();
    assert_eq!(
        queries::session_get(&conn, "bo_ses_b", "k").unwrap().as_deref(),
        Some("two")
    );

    assert!(queries::session_remove(&conn, "bo_ses_b", "k").unwrap());
    assert!(queries::session_get(&conn, "bo_ses_b", "k").unwrap().is_none());
}

#[test]
fn test_purge_stale_session_values() {
    let pool = setup_test_db();
    let conn = pool.get().unwrap();

    queries::session_put(&conn, "bo_ses_old", "cart", "{}").unwrap();
    queries::session_put(&conn, "bo_ses_new", "cart", "{}").unwrap();
    conn.execute(
        "UPDATE session_values SET updated_at = ?1 WHERE session_id = 'bo_ses_old'",
        [queries::now() - 30 * 86400],
    )
    .unwrap();

    let purged = queries::purge_stale_session_values(&conn, 7).unwrap();
    assert_eq!(purged, 1);
    assert!(queries::session_get(&conn, "bo_ses_old", "cart").unwrap().is_none());
    assert!(queries::session_get(&conn, "bo_ses_new", "cart").unwrap().is_some());
}
