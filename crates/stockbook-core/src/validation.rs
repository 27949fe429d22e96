//! # Validation Module
//!
//! Input-shape checks run before any business rule or database access.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: THIS MODULE                                                  │
//! │  ├── Names present and bounded                                         │
//! │  └── Quantities positive, amounts non-negative                         │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: Engines (stockbook-db)                                       │
//! │  ├── Stock availability (conditional decrement)                        │
//! │  └── Workflow state guards                                             │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: Database (SQLite)                                            │
//! │  ├── CHECK (stock >= 0), CHECK (debit >= 0 AND credit >= 0)            │
//! │  ├── UNIQUE names, sequence columns                                    │
//! │  └── Partial unique index on pending changes                           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use stockbook_core::validation::{validate_product_name, validate_quantity};
//!
//! validate_product_name("Cola 330ml").unwrap();
//! validate_quantity(5).unwrap();
//! ```

use crate::error::ValidationError;
use crate::money::Money;
use crate::types::NewProduct;
use crate::{MAX_NAME_LENGTH, MAX_QUANTITY};

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

// =============================================================================
// String Validators
// =============================================================================

fn validate_name(field: &str, value: &str) -> ValidationResult<()> {
    let value = value.trim();

    if value.is_empty() {
        return Err(ValidationError::Required {
            field: field.to_string(),
        });
    }

    if value.chars().count() > MAX_NAME_LENGTH {
        return Err(ValidationError::TooLong {
            field: field.to_string(),
            max: MAX_NAME_LENGTH,
        });
    }

    Ok(())
}

/// Validates a product name.
///
/// ## Rules
/// - Must not be empty after trimming
/// - At most 200 characters
///
/// ## Example
/// ```rust
/// use stockbook_core::validation::validate_product_name;
///
/// assert!(validate_product_name("Cola 330ml").is_ok());
/// assert!(validate_product_name("   ").is_err());
/// ```
pub fn validate_product_name(name: &str) -> ValidationResult<()> {
    validate_name("name", name)
}

/// Store names are lookup keys for lazy creation, same rules as products.
pub fn validate_store_name(name: &str) -> ValidationResult<()> {
    validate_name("store name", name)
}

/// Requester and reviewer identities are opaque but must be present.
pub fn validate_identity(field: &str, who: &str) -> ValidationResult<()> {
    validate_name(field, who)
}

// =============================================================================
// Numeric Validators
// =============================================================================

/// Validates a movement quantity.
///
/// ## User Workflow
/// ```text
/// Store requests "remove 0 units"
///      │
///      ▼
/// validate_quantity(0) ← THIS FUNCTION
///      │
///      ├── qty <= 0?           → Error: "quantity must be positive"
///      └── qty > MAX_QUANTITY? → Error: "quantity must be between 1 and ..."
/// ```
pub fn validate_quantity(qty: i64) -> ValidationResult<()> {
    if qty <= 0 {
        return Err(ValidationError::MustBePositive {
            field: "quantity".to_string(),
        });
    }

    if qty > MAX_QUANTITY {
        return Err(ValidationError::OutOfRange {
            field: "quantity".to_string(),
            min: 1,
            max: MAX_QUANTITY,
        });
    }

    Ok(())
}

/// Validates a stock level (adjust target, initial warehouse stock).
pub fn validate_stock_level(field: &str, level: i64) -> ValidationResult<()> {
    if level < 0 {
        return Err(ValidationError::MustNotBeNegative {
            field: field.to_string(),
        });
    }

    if level > MAX_QUANTITY {
        return Err(ValidationError::OutOfRange {
            field: field.to_string(),
            min: 0,
            max: MAX_QUANTITY,
        });
    }

    Ok(())
}

/// Validates a cost or price. Zero is allowed.
///
/// ## Example
/// ```rust
/// use stockbook_core::money::Money;
/// use stockbook_core::validation::validate_amount;
///
/// assert!(validate_amount("price", Money::from_cents(0)).is_ok());
/// assert!(validate_amount("price", Money::from_cents(-100)).is_err());
/// ```
pub fn validate_amount(field: &str, amount: Money) -> ValidationResult<()> {
    if amount.is_negative() {
        return Err(ValidationError::MustNotBeNegative {
            field: field.to_string(),
        });
    }

    Ok(())
}

// =============================================================================
// Composite Validators
// =============================================================================

/// Validates one catalog row (create or bulk import).
pub fn validate_new_product(product: &NewProduct) -> ValidationResult<()> {
    validate_product_name(&product.name)?;
    validate_amount("cost", product.cost)?;
    validate_amount("price", product.price)?;
    validate_stock_level("warehouse_stock", product.warehouse_stock)?;
    validate_stock_level("restock_qty", product.restock_qty)?;
    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================
