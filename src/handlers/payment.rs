use axum::{Extension, extract::State, response::Redirect};
use serde::{Deserialize, Serialize};

use crate::db::{AppState, queries};
use crate::error::{OptionExt, Result, msg};
use crate::extractors::{Json, Path, Query};
use crate::middleware::SessionId;
use crate::models::{Order, OrderStatus, OrderWithTickets};
use crate::reconcile::{self, Channel, StatusPage};

#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    /// Gateway tracking identifier
    #[serde(default)]
    pub payment_id: Option<String>,
    /// Merchant reference we attached to the return URL
    #[serde(default)]
    pub reference: Option<String>,
}

/// Work out which payment the callback is about.
///
/// When both identifiers are present they must agree; a mismatch means the URL
/// was tampered with or belongs to another attempt, and nothing is reconciled.
fn resolve_payment_id(state: &AppState, query: &CallbackQuery) -> Result<Option<String>> {
    let from_query = query.payment_id.as_deref().map(str::trim).filter(|s| !s.is_empty());

    let Some(reference) = query.reference.as_deref().filter(|r| !r.is_empty()) else {
        return Ok(from_query.map(str::to_string));
    };

    let conn = state.db.get()?;
    // The pending record goes away once fulfilled; the order keeps the reference
    let known = match queries::get_pending_payment_by_reference(&conn, reference)? {
        Some(pending) => Some(pending.payment_id),
        None => queries::get_order_by_reference(&conn, reference)?.map(|o| o.payment_id),
    };
    let Some(known) = known else {
        return Ok(from_query.map(str::to_string));
    };

    match from_query {
        Some(id) if id != known => {
            tracing::warn!(
                "Callback payment id {} does not match reference {} (payment {})",
                id,
                reference,
                known
            );
            Ok(None)
        }
        _ => Ok(Some(known)),
    }
}

/// Browser return from a gateway. Always answers with a status page redirect.
pub async fn payment_callback(
    State(state): State<AppState>,
    Extension(session): Extension<SessionId>,
    Path(provider): Path<String>,
    Query(query): Query<CallbackQuery>,
) -> Redirect {
    let echoed = query.payment_id.clone().unwrap_or_default();

    let Some(gateway) = state.gateways.get(&provider) else {
        tracing::warn!("Callback for unknown provider {}", provider);
        return Redirect::to(&StatusPage::Unknown.path(&echoed));
    };

    let payment_id = match resolve_payment_id(&state, &query) {
        Ok(Some(id)) => id,
        Ok(None) => {
            tracing::warn!("{} callback without a usable payment id", provider);
            return Redirect::to(&StatusPage::Unknown.path(&echoed));
        }
        Err(e) => {
            tracing::error!("Failed to resolve callback payment id: {}", e);
            return Redirect::to(&StatusPage::Unknown.path(&echoed));
        }
    };

    let channel = Channel::BrowserCallback {
        session_id: session.as_str(),
    };
    match reconcile::reconcile(&state, gateway, &payment_id, channel).await {
        Ok(outcome) => Redirect::to(&outcome.page().path(&payment_id)),
        Err(e) => {
            tracing::error!("Reconciliation of payment {} failed: {}", payment_id, e);
            Redirect::to(&StatusPage::Unknown.path(&payment_id))
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct StatusQuery {
    #[serde(default)]
    pub payment_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PaymentStatusView {
    pub status: StatusPage,
    pub payment_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order: Option<OrderWithTickets>,
}

/// Orders are only shown to the session that placed them (or its signed-in user).
fn belongs_to(order: &Order, session: &SessionId, user_id: Option<&str>) -> bool {
    order.session_id.as_deref() == Some(session.as_str())
        || (user_id.is_some() && order.user_id.as_deref() == user_id)
}

fn status_view(
    state: &AppState,
    session: &SessionId,
    status: StatusPage,
    query: StatusQuery,
) -> Result<Json<PaymentStatusView>> {
    let mut order = None;

    if let (StatusPage::Success, Some(payment_id)) = (status, query.payment_id.as_deref()) {
        let conn = state.db.get()?;
        let user_id = session.user_id(&conn)?;
        let found = queries::get_order_by_payment_id(&conn, payment_id)?.filter(|o| {
            o.status == OrderStatus::Completed && belongs_to(o, session, user_id.as_deref())
        });
        if let Some(found) = found {
            let tickets = queries::list_tickets_for_order(&conn, found.id)?;
            order = Some(OrderWithTickets {
                order: found,
                tickets,
            });
        }
    }

    Ok(Json(PaymentStatusView {
        status,
        payment_id: query.payment_id,
        order,
    }))
}

pub async fn payment_success(
    State(state): State<AppState>,
    Extension(session): Extension<SessionId>,
    Query(query): Query<StatusQuery>,
) -> Result<Json<PaymentStatusView>> {
    status_view(&state, &session, StatusPage::Success, query)
}

pub async fn payment_failed(
    State(state): State<AppState>,
    Extension(session): Extension<SessionId>,
    Query(query): Query<StatusQuery>,
) -> Result<Json<PaymentStatusView>> {
    status_view(&state, &session, StatusPage::Failed, query)
}

pub async fn payment_pending(
    State(state): State<AppState>,
    Extension(session): Extension<SessionId>,
    Query(query): Query<StatusQuery>,
) -> Result<Json<PaymentStatusView>> {
    status_view(&state, &session, StatusPage::Pending, query)
}

pub async fn payment_unknown(
    State(state): State<AppState>,
    Extension(session): Extension<SessionId>,
    Query(query): Query<StatusQuery>,
) -> Result<Json<PaymentStatusView>> {
    status_view(&state, &session, StatusPage::Unknown, query)
}

pub async fn get_order(
    State(state): State<AppState>,
    Extension(session): Extension<SessionId>,
    Path(order_number): Path<String>,
) -> Result<Json<OrderWithTickets>> {
    let conn = state.db.get()?;
    let user_id = session.user_id(&conn)?;

    let order = queries::get_order_with_tickets(&conn, &order_number)?
        .filter(|o| belongs_to(&o.order, &session, user_id.as_deref()))
        .or_not_found(msg::ORDER_NOT_FOUND)?;

    Ok(Json(order))
}
