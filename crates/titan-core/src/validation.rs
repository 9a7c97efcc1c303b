//! # Validation Module
//!
//! Input validation for every transaction store operation.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: Caller (UI / assistant / service host)                       │
//! │  └── Whatever it likes; nothing is trusted                             │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: THIS MODULE (argument rules)                                 │
//! │  ├── Non-empty identifiers, length caps                                │
//! │  └── Quantity / price / amount ranges                                  │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: Transaction aggregate (state rules)                          │
//! │  └── Open/closed, line exists, not already voided, tendered >= due     │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  WAL append  (nothing reaches disk that failed layers 2 or 3)          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use titan_core::validation::{validate_currency_code, validate_quantity};
//!
//! assert_eq!(validate_currency_code("usd").unwrap(), "USD");
//! assert!(validate_quantity(0).is_err());
//! ```

use crate::error::ValidationError;
use crate::{MAX_ITEM_QUANTITY, MAX_TRANSACTION_LINES, SUPPORTED_DECIMAL_PLACES};

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

const MAX_IDENTIFIER_LEN: usize = 64;
const MAX_CURRENCY_CODE_LEN: usize = 8;
const MAX_TENDER_KIND_LEN: usize = 32;
const MAX_IDEMPOTENCY_KEY_LEN: usize = 128;
const MAX_REASON_LEN: usize = 200;

// =============================================================================
// String Validators
// =============================================================================

/// Shared rule for opaque identifiers (store, product, operator).
///
/// ## Rules
/// - Must not be empty after trimming
/// - At most 64 characters
/// - No whitespace or control characters inside
fn validate_identifier(field: &str, value: &str) -> ValidationResult<String> {
    let value = value.trim();

    if value.is_empty() {
        return Err(ValidationError::Required {
            field: field.to_string(),
        });
    }

    if value.chars().count() > MAX_IDENTIFIER_LEN {
        return Err(ValidationError::TooLong {
            field: field.to_string(),
            max: MAX_IDENTIFIER_LEN,
        });
    }

    if value.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(ValidationError::InvalidFormat {
            field: field.to_string(),
            reason: "must not contain whitespace or control characters".to_string(),
        });
    }

    Ok(value.to_string())
}

/// Validates a terminal id. Returns the trimmed value.
///
/// ## Rules
/// - Identifier rules (non-empty, at most 64 characters)
/// - Only letters, numbers, hyphens and underscores: the id names files
///   and directories in the shared data root
pub fn validate_terminal_id(terminal_id: &str) -> ValidationResult<String> {
    let terminal_id = validate_identifier("terminal_id", terminal_id)?;

    if !terminal_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ValidationError::InvalidFormat {
            field: "terminal_id".to_string(),
            reason: "must contain only letters, numbers, hyphens, and underscores".to_string(),
        });
    }

    Ok(terminal_id)
}

/// Validates a store id. Returns the trimmed value.
pub fn validate_store_id(store_id: &str) -> ValidationResult<String> {
    validate_identifier("store_id", store_id)
}

/// Validates a product id. Returns the trimmed value.
///
/// ## Example
/// ```rust
/// use titan_core::validation::validate_product_id;
///
/// assert!(validate_product_id("COFFEE").is_ok());
/// assert!(validate_product_id("").is_err());
/// assert!(validate_product_id("has space").is_err());
/// ```
pub fn validate_product_id(product_id: &str) -> ValidationResult<String> {
    validate_identifier("product_id", product_id)
}

/// Validates an operator id. Returns the trimmed value.
pub fn validate_operator_id(operator_id: &str) -> ValidationResult<String> {
    validate_identifier("operator_id", operator_id)
}

/// Validates a currency code and returns it uppercased.
///
/// ## Rules
/// - Must not be empty
/// - 1 to 8 ASCII letters or digits (ISO 4217 codes and private codes)
///
/// The kernel never interprets the code; it is recorded as given.
pub fn validate_currency_code(code: &str) -> ValidationResult<String> {
    let code = code.trim();

    if code.is_empty() {
        return Err(ValidationError::Required {
            field: "currency_code".to_string(),
        });
    }

    if code.len() > MAX_CURRENCY_CODE_LEN {
        return Err(ValidationError::TooLong {
            field: "currency_code".to_string(),
            max: MAX_CURRENCY_CODE_LEN,
        });
    }

    if !code.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(ValidationError::InvalidFormat {
            field: "currency_code".to_string(),
            reason: "must contain only ASCII letters and digits".to_string(),
        });
    }

    Ok(code.to_ascii_uppercase())
}

/// Validates a tender kind (`cash`, `card`, `gift_card`, ...). Returns it lowercased.
pub fn validate_tender_kind(kind: &str) -> ValidationResult<String> {
    let kind = kind.trim();

    if kind.is_empty() {
        return Err(ValidationError::Required {
            field: "tender_kind".to_string(),
        });
    }

    if kind.len() > MAX_TENDER_KIND_LEN {
        return Err(ValidationError::TooLong {
            field: "tender_kind".to_string(),
            max: MAX_TENDER_KIND_LEN,
        });
    }

    if !kind
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ValidationError::InvalidFormat {
            field: "tender_kind".to_string(),
            reason: "must contain only letters, numbers, hyphens, and underscores".to_string(),
        });
    }

    Ok(kind.to_ascii_lowercase())
}

/// Validates a caller-supplied idempotency key.
pub fn validate_idempotency_key(key: &str) -> ValidationResult<()> {
    if key.is_empty() {
        return Err(ValidationError::Required {
            field: "idempotency_key".to_string(),
        });
    }

    if key.len() > MAX_IDEMPOTENCY_KEY_LEN {
        return Err(ValidationError::TooLong {
            field: "idempotency_key".to_string(),
            max: MAX_IDEMPOTENCY_KEY_LEN,
        });
    }

    if !key.chars().all(|c| c.is_ascii_graphic()) {
        return Err(ValidationError::InvalidFormat {
            field: "idempotency_key".to_string(),
            reason: "must be printable ASCII without spaces".to_string(),
        });
    }

    Ok(())
}

/// Validates a free-text reason (void, abort, reversal). Empty is allowed.
pub fn validate_reason(reason: &str) -> ValidationResult<String> {
    let reason = reason.trim();

    if reason.chars().count() > MAX_REASON_LEN {
        return Err(ValidationError::TooLong {
            field: "reason".to_string(),
            max: MAX_REASON_LEN,
        });
    }

    Ok(reason.to_string())
}

// =============================================================================
// Numeric Validators
// =============================================================================

/// Validates the decimal-place count a caller declares for its currency.
///
/// ## Rules
/// - Must be one of 0, 1, 2, 3 (JPY = 0, USD = 2, BHD = 3)
pub fn validate_decimal_places(decimal_places: u8) -> ValidationResult<()> {
    if !SUPPORTED_DECIMAL_PLACES.contains(&decimal_places) {
        return Err(ValidationError::NotAllowed {
            field: "decimal_places".to_string(),
            allowed: SUPPORTED_DECIMAL_PLACES
                .iter()
                .map(|d| d.to_string())
                .collect(),
        });
    }

    Ok(())
}

/// Validates a quantity value.
///
/// ## Rules
/// - Must be positive (> 0)
/// - Must not exceed MAX_ITEM_QUANTITY (9999)
///
/// ## User Workflow
/// ```text
/// ┌─────────────────────────────────────────────────────────────────────────┐
/// │  AddLine(handle, "COFFEE", qty, 399)                                    │
/// │       │                                                                 │
/// │       ▼                                                                 │
/// │  validate_quantity(qty) ← THIS FUNCTION                                │
/// │       │                                                                 │
/// │       ├── qty <= 0?    → Error: "quantity must be positive"            │
/// │       │                                                                 │
/// │       ├── qty > 9999?  → Error: "quantity must be between 1 and 9999"  │
/// │       │                                                                 │
/// │       └── OK → WAL append                                              │
/// │                                                                         │
/// └─────────────────────────────────────────────────────────────────────────┘
/// ```
pub fn validate_quantity(qty: i64) -> ValidationResult<()> {
    if qty <= 0 {
        return Err(ValidationError::MustBePositive {
            field: "quantity".to_string(),
        });
    }

    if qty > MAX_ITEM_QUANTITY {
        return Err(ValidationError::OutOfRange {
            field: "quantity".to_string(),
            min: 1,
            max: MAX_ITEM_QUANTITY,
        });
    }

    Ok(())
}

/// Validates a unit price in minor units.
///
/// ## Rules
/// - Must be non-negative (>= 0)
/// - Zero is allowed (free items, bundled modifiers)
///
/// ## Example
/// ```rust
/// use titan_core::validation::validate_unit_price;
///
/// assert!(validate_unit_price(399).is_ok());
/// assert!(validate_unit_price(0).is_ok());
/// assert!(validate_unit_price(-100).is_err());
/// ```
pub fn validate_unit_price(minor: i64) -> ValidationResult<()> {
    if minor < 0 {
        return Err(ValidationError::OutOfRange {
            field: "unit_price".to_string(),
            min: 0,
            max: i64::MAX,
        });
    }

    Ok(())
}

/// Validates a tender amount in minor units.
///
/// ## Rules
/// - Must be positive (> 0)
pub fn validate_tender_amount(minor: i64) -> ValidationResult<()> {
    if minor <= 0 {
        return Err(ValidationError::MustBePositive {
            field: "tender amount".to_string(),
        });
    }

    Ok(())
}

// =============================================================================
// Collection Validators
// =============================================================================

/// Validates that one more line fits in a transaction.
pub fn validate_line_count(current_lines: usize) -> ValidationResult<()> {
    if current_lines >= MAX_TRANSACTION_LINES {
        return Err(ValidationError::OutOfRange {
            field: "transaction lines".to_string(),
            min: 0,
            max: MAX_TRANSACTION_LINES as i64,
        });
    }

    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_identifiers() {
        assert_eq!(validate_store_id(" STORE_1 ").unwrap(), "STORE_1");
        assert!(validate_product_id("COFFEE").is_ok());
        assert!(validate_product_id("SKU-00042").is_ok());

        assert!(validate_store_id("").is_err());
        assert!(validate_store_id("   ").is_err());
        assert!(validate_product_id("has space").is_err());
        assert!(validate_operator_id(&"A".repeat(100)).is_err());
    }

    #[test]
    fn test_validate_terminal_id() {
        assert_eq!(validate_terminal_id("LANE-01").unwrap(), "LANE-01");
        assert!(validate_terminal_id("").is_err());
        assert!(validate_terminal_id("../etc").is_err());
        assert!(validate_terminal_id("lane.1").is_err());
    }

    #[test]
    fn test_validate_currency_code() {
        assert_eq!(validate_currency_code("USD").unwrap(), "USD");
        assert_eq!(validate_currency_code("jpy").unwrap(), "JPY");

        assert!(matches!(
            validate_currency_code(""),
            Err(ValidationError::Required { .. })
        ));
        assert!(validate_currency_code("US D").is_err());
        assert!(validate_currency_code("US$").is_err());
        assert!(validate_currency_code("ABCDEFGHI").is_err());
    }

    #[test]
    fn test_validate_decimal_places() {
        for places in [0u8, 1, 2, 3] {
            assert!(validate_decimal_places(places).is_ok());
        }
        assert!(matches!(
            validate_decimal_places(4),
            Err(ValidationError::NotAllowed { .. })
        ));
    }

    #[test]
    fn test_validate_quantity() {
        assert!(validate_quantity(1).is_ok());
        assert!(validate_quantity(MAX_ITEM_QUANTITY).is_ok());

        assert!(validate_quantity(0).is_err());
        assert!(validate_quantity(-1).is_err());
        assert!(validate_quantity(MAX_ITEM_QUANTITY + 1).is_err());
    }

    #[test]
    fn test_validate_amounts() {
        assert!(validate_unit_price(0).is_ok());
        assert!(validate_unit_price(-1).is_err());
        assert!(validate_tender_amount(800).is_ok());
        assert!(validate_tender_amount(0).is_err());
        assert!(validate_tender_amount(-5).is_err());
    }

    #[test]
    fn test_validate_tender_kind() {
        assert_eq!(validate_tender_kind("Cash").unwrap(), "cash");
        assert_eq!(validate_tender_kind("gift_card").unwrap(), "gift_card");
        assert!(validate_tender_kind("").is_err());
        assert!(validate_tender_kind("cash!").is_err());
    }

    #[test]
    fn test_validate_idempotency_key_and_reason() {
        assert!(validate_idempotency_key("req-7f3a").is_ok());
        assert!(validate_idempotency_key("").is_err());
        assert!(validate_idempotency_key("has space").is_err());

        assert_eq!(validate_reason("  customer changed mind ").unwrap(), "customer changed mind");
        assert!(validate_reason("").is_ok());
        assert!(validate_reason(&"x".repeat(201)).is_err());
    }

    #[test]
    fn test_validate_line_count() {
        assert!(validate_line_count(0).is_ok());
        assert!(validate_line_count(MAX_TRANSACTION_LINES - 1).is_ok());
        assert!(validate_line_count(MAX_TRANSACTION_LINES).is_err());
    }
}
