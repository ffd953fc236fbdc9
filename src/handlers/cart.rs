use axum::{
    Extension,
    extract::State,
    http::HeaderMap,
    response::{IntoResponse, Redirect, Response},
};
use serde::Deserialize;

use crate::cart::{self, AddToCart, Cart};
use crate::db::{AppState, queries};
use crate::error::{AppError, FieldErrors, Result, msg};
use crate::extractors::{Form, Json, is_fragment_request};
use crate::middleware::SessionId;

#[derive(Debug, Deserialize)]
pub struct CartLineForm {
    pub ticket_type_id: i64,
    pub quantity: i64,
}

/// Partial-page requests get the updated cart back; full-page ones go to the cart page.
fn mutation_response(headers: &HeaderMap, cart: Cart) -> Response {
    if is_fragment_request(headers) {
        Json(cart).into_response()
    } else {
        Redirect::to("/cart").into_response()
    }
}

fn ticket_type_not_found() -> AppError {
    AppError::Validation(FieldErrors::single(
        "ticket_type_id",
        msg::TICKET_TYPE_NOT_FOUND,
    ))
}

pub async fn view_cart(
    State(state): State<AppState>,
    Extension(session): Extension<SessionId>,
) -> Result<Json<Cart>> {
    let conn = state.db.get()?;
    let cart = state.carts.get(&conn, session.as_str(), queries::now())?;
    Ok(Json(cart))
}

pub async fn add_to_cart(
    State(state): State<AppState>,
    Extension(session): Extension<SessionId>,
    headers: HeaderMap,
    Form(form): Form<CartLineForm>,
) -> Result<Response> {
    let conn = state.db.get()?;
    let now = queries::now();

    let ticket_type = queries::get_ticket_type_by_id(&conn, form.ticket_type_id)?
        .ok_or_else(ticket_type_not_found)?;

    // Capacity applies to what the cart will hold after merging
    let current = state.carts.get(&conn, session.as_str(), now)?;
    let already = if current.event_id == Some(ticket_type.event_id) {
        current.quantity_of(ticket_type.id)
    } else {
        0
    };
    if form.quantity > 0 {
        let merged = already.saturating_add(form.quantity);
        cart::check_line_limit(merged)?;
        cart::check_capacity(&conn, &ticket_type, merged)?;
    }

    let cart = state.carts.add(
        &conn,
        session.as_str(),
        AddToCart::from((&ticket_type, form.quantity)),
        now,
    )?;

    tracing::debug!(
        "Session {} added {} x ticket type {}",
        session.as_str(),
        form.quantity,
        ticket_type.id
    );

    Ok(mutation_response(&headers, cart))
}

pub async fn update_cart(
    State(state): State<AppState>,
    Extension(session): Extension<SessionId>,
    headers: HeaderMap,
    Form(form): Form<CartLineForm>,
) -> Result<Response> {
    let conn = state.db.get()?;

    if form.quantity > 0 {
        let ticket_type = queries::get_ticket_type_by_id(&conn, form.ticket_type_id)?
            .ok_or_else(ticket_type_not_found)?;
        cart::check_line_limit(form.quantity)?;
        cart::check_capacity(&conn, &ticket_type, form.quantity)?;
    }

    let cart = state.carts.set_quantity(
        &conn,
        session.as_str(),
        form.ticket_type_id,
        form.quantity,
        queries::now(),
    )?;

    Ok(mutation_response(&headers, cart))
}

pub async fn clear_cart(
    State(state): State<AppState>,
    Extension(session): Extension<SessionId>,
    headers: HeaderMap,
) -> Result<Response> {
    let conn = state.db.get()?;
    state.carts.clear(&conn, session.as_str())?;
    Ok(mutation_response(&headers, Cart::default()))
}
