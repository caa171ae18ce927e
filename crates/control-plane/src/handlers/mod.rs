pub mod apps;
pub mod generate;
pub mod health;
pub mod setup;

use regex::Regex;
use std::sync::OnceLock;

use crate::error::EngineError;

/// Caller-input checks. Everything here runs before any credential exchange
/// is attempted.
pub(crate) fn validate_account_id(account_id: &str) -> Result<(), EngineError> {
    if account_id.len() == 12 && account_id.bytes().all(|b| b.is_ascii_digit()) {
        Ok(())
    } else {
        Err(EngineError::Validation(format!("account id must be exactly 12 digits, got {account_id:?}")))
    }
}

static REGION_PATTERN: OnceLock<Regex> = OnceLock::new();

pub(crate) fn validate_region(region: &str) -> Result<(), EngineError> {
    let pattern = REGION_PATTERN.get_or_init(|| Regex::new(r"^[a-z]{2}(-[a-z0-9]+)+-\d$").unwrap());
    if pattern.is_match(region) {
        Ok(())
    } else {
        Err(EngineError::Validation(format!("{region:?} is not a valid region name")))
    }
}

pub(crate) fn validate_app_name(name: &str) -> Result<(), EngineError> {
    let ok = !name.is_empty()
        && name.len() <= 64
        && name.bytes().all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
        && !name.starts_with('-')
        && !name.ends_with('-');
    if ok {
        Ok(())
    } else {
        Err(EngineError::Validation(
            "app name must be 1-64 lowercase alphanumeric characters or dashes, not starting or ending with a dash".into(),
        ))
    }
}
