//! Role-specific required-field checks for order results.
//!
//! A worker may only move an order to `RESULT_READY` once the result
//! payload passes [`validate_result`] for the order's target role.

use crate::error::CoreError;
use crate::roles::JobRole;

// ---------------------------------------------------------------------------
// Field names
// ---------------------------------------------------------------------------

/// List of findings. Every role must report at least one.
pub const FIELD_FINDINGS: &str = "findings";

/// Radiologist's summary impression for imaging results.
pub const FIELD_IMPRESSION: &str = "impression";

/// Maximum length for a cancellation reason.
pub const MAX_CANCEL_REASON_LENGTH: usize = 2_000;

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Fields that must be present and non-empty in a result for `role`.
pub fn required_result_fields(role: JobRole) -> &'static [&'static str] {
    match role {
        JobRole::Ris => &[FIELD_FINDINGS, FIELD_IMPRESSION],
        JobRole::Lis | JobRole::Doctor | JobRole::Nurse => &[FIELD_FINDINGS],
    }
}

/// Validate a result payload for an order targeting `role`.
///
/// The payload must be a JSON object. `findings` must be an array with at
/// least one non-empty entry; every other required field must be a
/// non-blank string.
pub fn validate_result(role: JobRole, result: &serde_json::Value) -> Result<(), CoreError> {
    let object = result.as_object().ok_or_else(|| {
        CoreError::Validation("Order result must be a JSON object".to_string())
    })?;

    for field in required_result_fields(role) {
        let value = object.get(*field).ok_or_else(|| {
            CoreError::Validation(format!("{role} result is missing required field '{field}'"))
        })?;

        let present = if *field == FIELD_FINDINGS {
            value
                .as_array()
                .is_some_and(|items| items.iter().any(is_non_empty))
        } else {
            value.as_str().is_some_and(|s| !s.trim().is_empty())
        };

        if !present {
            return Err(CoreError::Validation(format!(
                "{role} result field '{field}' must not be empty"
            )));
        }
    }

    Ok(())
}

/// Normalise and validate an optional cancellation reason.
///
/// Blank reasons become `None`.
pub fn normalize_cancel_reason(reason: Option<String>) -> Result<Option<String>, CoreError> {
    let Some(reason) = reason else {
        return Ok(None);
    };
    let trimmed = reason.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    if trimmed.chars().count() > MAX_CANCEL_REASON_LENGTH {
        return Err(CoreError::Validation(format!(
            "Cancel reason exceeds maximum length of {MAX_CANCEL_REASON_LENGTH} characters"
        )));
    }
    Ok(Some(trimmed.to_string()))
}

fn is_non_empty(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Null => false,
        serde_json::Value::String(s) => !s.trim().is_empty(),
        serde_json::Value::Array(items) => !items.is_empty(),
        serde_json::Value::Object(map) => !map.is_empty(),
        serde_json::Value::Bool(_) | serde_json::Value::Number(_) => true,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
