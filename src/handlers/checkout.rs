use axum::{
    Extension,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
};
use serde::Serialize;

use crate::checkout::{self, CheckoutError, CheckoutForm, CheckoutResult};
use crate::db::AppState;
use crate::error::FieldErrors;
use crate::extractors::{Form, Json};
use crate::middleware::SessionId;
use crate::reconcile::StatusPage;

/// The checkout form re-rendered with field-level errors.
#[derive(Debug, Serialize)]
struct CheckoutFormErrors {
    error: &'static str,
    fields: FieldErrors,
    form: CheckoutForm,
}

fn respond(result: Result<CheckoutResult, CheckoutError>, form: CheckoutForm) -> Response {
    match result {
        Ok(CheckoutResult::Redirect {
            authorization_url, ..
        }) => Redirect::to(&authorization_url).into_response(),
        Ok(CheckoutResult::Confirmed(order)) => {
            Redirect::to(&StatusPage::Success.path(&order.order.payment_id)).into_response()
        }
        Ok(CheckoutResult::Unsettled { payment_id, page }) => {
            Redirect::to(&page.path(&payment_id)).into_response()
        }
        Err(CheckoutError::Invalid(fields)) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(CheckoutFormErrors {
                error: "Validation failed",
                fields,
                form,
            }),
        )
            .into_response(),
        Err(CheckoutError::Other(e)) => e.into_response(),
    }
}

pub async fn submit_checkout(
    State(state): State<AppState>,
    Extension(session): Extension<SessionId>,
    Form(form): Form<CheckoutForm>,
) -> Response {
    let result = checkout::checkout(&state, &session, &form).await;
    respond(result, form)
}

pub async fn resume_checkout(
    State(state): State<AppState>,
    Extension(session): Extension<SessionId>,
) -> Response {
    let result = checkout::resume(&state, &session).await;
    respond(result, CheckoutForm::default())
}
