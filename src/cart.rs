//! Session-scoped shopping cart.
//!
//! The cart is plain data persisted as a JSON string under the session's `cart`
//! key. Expiry is checked lazily on read; nothing sweeps expired carts.

use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::db::queries;
use crate::error::{AppError, FieldErrors, Result, msg};
use crate::models::TicketType;

/// Session key holding the serialized cart.
pub const CART_KEY: &str = "cart";

/// Largest quantity of a single ticket type in one cart.
pub const MAX_QUANTITY_PER_LINE: i64 = 20;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartItem {
    pub ticket_type_id: i64,
    pub unit_price_cents: i64,
    pub quantity: i64,
    pub subtotal_cents: i64,
}

/// Line items of a single event plus their total.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cart {
    pub event_id: Option<i64>,
    pub items: Vec<CartItem>,
    pub total_cents: i64,
    pub expires_at: Option<i64>,
}

/// A request to put tickets of one type into the cart.
#[derive(Debug, Clone, Copy)]
pub struct AddToCart {
    pub ticket_type_id: i64,
    pub event_id: i64,
    pub unit_price_cents: i64,
    pub quantity: i64,
}

impl From<(&TicketType, i64)> for AddToCart {
    fn from((ticket_type, quantity): (&TicketType, i64)) -> Self {
        Self {
            ticket_type_id: ticket_type.id,
            event_id: ticket_type.event_id,
            unit_price_cents: ticket_type.price_cents,
            quantity,
        }
    }
}

fn invalid_quantity(message: &str) -> AppError {
    AppError::Validation(FieldErrors::single("quantity", message))
}

/// Rejects a line quantity above `MAX_QUANTITY_PER_LINE`.
pub fn check_line_limit(quantity: i64) -> Result<()> {
    if quantity > MAX_QUANTITY_PER_LINE {
        return Err(invalid_quantity(msg::QUANTITY_TOO_LARGE));
    }
    Ok(())
}

impl Cart {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn is_expired(&self, now: i64) -> bool {
        matches!(self.expires_at, Some(expires_at) if now > expires_at)
    }

    pub fn quantity_of(&self, ticket_type_id: i64) -> i64 {
        self.items
            .iter()
            .find(|i| i.ticket_type_id == ticket_type_id)
            .map(|i| i.quantity)
            .unwrap_or(0)
    }

    pub fn ticket_count(&self) -> i64 {
        self.items.iter().map(|i| i.quantity).sum()
    }

    /// Subtotals and total are always derived, never trusted from storage.
    fn recompute(&mut self) {
        for item in &mut self.items {
            item.subtotal_cents = item.unit_price_cents * item.quantity;
        }
        self.total_cents = self.items.iter().map(|i| i.subtotal_cents).sum();
        if self.items.is_empty() {
            self.event_id = None;
        }
    }

    /// Merge or append a line item.
    ///
    /// A cart holding another event's tickets is discarded *before* merging so two
    /// events' line items can never mix.
    pub fn add_item(&mut self, add: AddToCart, expires_at: i64) -> Result<()> {
        if add.quantity < 1 {
            return Err(invalid_quantity(msg::QUANTITY_TOO_SMALL));
        }
        check_line_limit(add.quantity)?;

        if self.event_id.is_some_and(|current| current != add.event_id) {
            *self = Cart::default();
        }
        self.event_id = Some(add.event_id);

        match self
            .items
            .iter_mut()
            .find(|i| i.ticket_type_id == add.ticket_type_id)
        {
            Some(item) => {
                let merged = item.quantity.saturating_add(add.quantity);
                check_line_limit(merged)?;
                item.quantity = merged;
                item.unit_price_cents = add.unit_price_cents;
            }
            None => self.items.push(CartItem {
                ticket_type_id: add.ticket_type_id,
                unit_price_cents: add.unit_price_cents,
                quantity: add.quantity,
                subtotal_cents: 0,
            }),
        }

        self.recompute();
        self.expires_at = Some(expires_at);
        Ok(())
    }

    /// Quantity 0 removes the line item.
    pub fn set_quantity(&mut self, ticket_type_id: i64, quantity: i64, expires_at: i64) -> Result<()> {
        if quantity < 0 {
            return Err(invalid_quantity(msg::QUANTITY_NEGATIVE));
        }
        check_line_limit(quantity)?;

        if quantity == 0 {
            self.items.retain(|i| i.ticket_type_id != ticket_type_id);
        } else {
            let item = self
                .items
                .iter_mut()
                .find(|i| i.ticket_type_id == ticket_type_id)
                .ok_or_else(|| {
                    AppError::Validation(FieldErrors::single(
                        "ticket_type_id",
                        msg::CART_ITEM_NOT_FOUND,
                    ))
                })?;
            item.quantity = quantity;
        }

        self.recompute();
        self.expires_at = Some(expires_at);
        Ok(())
    }
}

/// Reads and writes carts in the session store.
#[derive(Debug, Clone, Copy)]
pub struct CartStore {
    pub ttl_secs: i64,
}

impl CartStore {
    pub fn new(ttl_secs: i64) -> Self {
        Self { ttl_secs }
    }

    /// The session's cart, or an empty one if absent, expired or unreadable.
    pub fn get(&self, conn: &Connection, session_id: &str, now: i64) -> Result<Cart> {
        let Some(raw) = queries::session_get(conn, session_id, CART_KEY)? else {
            return Ok(Cart::default());
        };

        let cart: Cart = match serde_json::from_str(&raw) {
            Ok(cart) => cart,
            Err(e) => {
                tracing::warn!("Discarding unreadable cart for session {}: {}", session_id, e);
                return Ok(Cart::default());
            }
        };

        if cart.is_expired(now) {
            return Ok(Cart::default());
        }
        Ok(cart)
    }

    pub fn add(&self, conn: &Connection, session_id: &str, add: AddToCart, now: i64) -> Result<Cart> {
        let mut cart = self.get(conn, session_id, now)?;
        cart.add_item(add, now + self.ttl_secs)?;
        self.save(conn, session_id, &cart)?;
        Ok(cart)
    }

    pub fn set_quantity(
        &self,
        conn: &Connection,
        session_id: &str,
        ticket_type_id: i64,
        quantity: i64,
        now: i64,
    ) -> Result<Cart> {
        let mut cart = self.get(conn, session_id, now)?;
        cart.set_quantity(ticket_type_id, quantity, now + self.ttl_secs)?;
        self.save(conn, session_id, &cart)?;
        Ok(cart)
    }

    pub fn clear(&self, conn: &Connection, session_id: &str) -> Result<()> {
        self.save(conn, session_id, &Cart::default())
    }

    fn save(&self, conn: &Connection, session_id: &str, cart: &Cart) -> Result<()> {
        let raw = serde_json::to_string(cart)?;
        queries::session_put(conn, session_id, CART_KEY, &raw)
    }
}

/// Rejects a requested quantity that exceeds what is left of a ticket type.
///
/// `requested` is the full quantity the cart would hold, not the increment.
pub fn check_capacity(conn: &Connection, ticket_type: &TicketType, requested: i64) -> Result<()> {
    let Some(capacity) = ticket_type.capacity else {
        return Ok(());
    };
    let issued = queries::count_active_tickets_for_type(conn, ticket_type.id)?;
    if requested > capacity - issued {
        return Err(invalid_quantity(msg::NOT_ENOUGH_TICKETS));
    }
    Ok(())
}
