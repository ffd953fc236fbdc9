use axum::{
    extract::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use rusqlite::Connection;

use crate::db::queries;
use crate::error::Result;
use crate::id::EntityType;

/// Cookie carrying the opaque session id.
pub const SESSION_COOKIE: &str = "boxoffice_session";

/// Session key naming the session's live pending payment.
pub const PENDING_PAYMENT_KEY: &str = "pending_payment_id";

/// Session key set by the authentication layer for signed-in users.
pub const USER_ID_KEY: &str = "user_id";

/// The browser session a request belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Signed-in user of this session, if any.
    pub fn user_id(&self, conn: &Connection) -> Result<Option<String>> {
        queries::session_get(conn, &self.0, USER_ID_KEY)
    }

    /// Payment id of the session's live pending payment, if any.
    pub fn pending_payment_id(&self, conn: &Connection) -> Result<Option<String>> {
        queries::session_get(conn, &self.0, PENDING_PAYMENT_KEY)
    }
}

/// Attach a `SessionId` extension to every request, minting one (and its
/// cookie) when the browser did not present a well-formed session cookie.
pub async fn session_middleware(jar: CookieJar, mut request: Request, next: Next) -> Response {
    let existing = jar
        .get(SESSION_COOKIE)
        .map(|c| c.value().to_string())
        .filter(|v| EntityType::Session.is_valid(v));

    let (session_id, is_new) = match existing {
        Some(id) => (id, false),
        None => (EntityType::Session.gen_id(), true),
    };

    request
        .extensions_mut()
        .insert(SessionId(session_id.clone()));

    let response = next.run(request).await;

    if !is_new {
        return response;
    }

    let cookie = Cookie::build((SESSION_COOKIE, session_id))
        .http_only(true)
        .same_site(SameSite::Lax)
        .path("/")
        .build();

    (jar.add(cookie), response).into_response()
}
