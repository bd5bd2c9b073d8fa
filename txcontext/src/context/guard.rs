//! Reserved metadata namespace.
//!
//! Keys starting with [`RESERVED_PREFIX`] belong to the runtime. Callers can
//! neither write nor read them, so internal bookkeeping stored under that
//! prefix cannot be corrupted or depended upon by application code.

use crate::errors::ReservedKeyViolation;

/// Prefix of the reserved metadata namespace.
pub const RESERVED_PREFIX: &str = "$";

/// Returns true if `key` lies in the reserved namespace.
#[must_use]
pub fn is_reserved(key: &str) -> bool {
    key.starts_with(RESERVED_PREFIX)
}

/// Rejects `key` if it is reserved.
///
/// # Errors
///
/// Returns `ReservedKeyViolation` naming `operation` when the key is reserved.
pub fn check_key(key: &str, operation: &str) -> Result<(), ReservedKeyViolation> {
    if is_reserved(key) {
        return Err(ReservedKeyViolation::new(key, operation));
    }
    Ok(())
}
