use serde::{Deserialize, Serialize};

use crate::error::{FieldErrors, msg};

/// Basic email format validation.
///
/// Exactly one `@`, a non-empty local part without spaces, and a dotted domain
/// that neither starts nor ends with a dot. Deliberately permissive.
pub fn is_valid_email(email: &str) -> bool {
    let email = email.trim();

    let parts: Vec<&str> = email.split('@').collect();
    if parts.len() != 2 {
        return false;
    }

    let (local_part, domain_part) = (parts[0], parts[1]);

    if local_part.is_empty() || local_part.contains(char::is_whitespace) {
        return false;
    }

    if domain_part.is_empty() || !domain_part.contains('.') {
        return false;
    }

    !(domain_part.starts_with('.')
        || domain_part.ends_with('.')
        || domain_part.contains(char::is_whitespace))
}

/// Who is paying. Copied onto the order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingInfo {
    pub email: String,
    pub name: String,
}

impl BillingInfo {
    /// Trimmed copy of the submitted values.
    pub fn new(email: &str, name: &str) -> Self {
        Self {
            email: email.trim().to_string(),
            name: name.trim().to_string(),
        }
    }

    /// Records field-level problems under `billing_email` / `billing_name`.
    pub fn validate_into(&self, errors: &mut FieldErrors) {
        if self.email.is_empty() {
            errors.add("billing_email", msg::EMAIL_EMPTY);
        } else if !is_valid_email(&self.email) {
            errors.add("billing_email", msg::INVALID_EMAIL_FORMAT);
        }
        if self.name.is_empty() {
            errors.add("billing_name", msg::NAME_EMPTY);
        }
    }
}
