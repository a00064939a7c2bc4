//! API handlers module

pub mod enrichment;
pub mod foods;
pub mod health;
pub mod retry;
pub mod review;

use nutriforge_common::errors::{AppError, Result};
use validator::Validate;

/// Run `validator` rules, mapping failures to a 400
pub(crate) fn validated<T: Validate>(request: T) -> Result<T> {
    request.validate().map_err(|e| {
        let field = e.field_errors().keys().next().map(|k| k.to_string());
        AppError::Validation {
            message: e.to_string(),
            field,
        }
    })?;
    Ok(request)
}
