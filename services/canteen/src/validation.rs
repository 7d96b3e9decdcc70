//! Input validation utilities

use regex::Regex;
use std::sync::OnceLock;

use crate::{error::CoreError, models::UserId};

/// Parse a member number as typed or scanned at the kiosk
pub fn parse_user_id(raw: &str) -> Result<UserId, CoreError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(CoreError::Validation("Member number is required".to_string()));
    }

    static USER_ID_REGEX: OnceLock<Regex> = OnceLock::new();
    let regex = USER_ID_REGEX
        .get_or_init(|| Regex::new(r"^[0-9]{1,5}$").expect("Failed to compile member number regex"));

    if !regex.is_match(trimmed) {
        return Err(CoreError::Validation(format!(
            "Invalid member number: {}",
            trimmed
        )));
    }

    match trimmed.parse::<UserId>() {
        Ok(id) if id > 0 => Ok(id),
        _ => Err(CoreError::Validation(format!(
            "Member number out of range: {}",
            trimmed
        ))),
    }
}

/// Validate PIN format
pub fn validate_pin(pin: &str) -> Result<(), CoreError> {
    if pin.is_empty() {
        return Err(CoreError::Validation("PIN is required".to_string()));
    }

    static PIN_REGEX: OnceLock<Regex> = OnceLock::new();
    let regex =
        PIN_REGEX.get_or_init(|| Regex::new(r"^[0-9]{4,8}$").expect("Failed to compile PIN regex"));

    if !regex.is_match(pin) {
        return Err(CoreError::Validation(
            "PIN must be 4 to 8 digits".to_string(),
        ));
    }

    Ok(())
}

/// Validate a staff username
pub fn validate_username(username: &str) -> Result<(), CoreError> {
    if username.is_empty() {
        return Err(CoreError::Validation("Username is required".to_string()));
    }

    if username.len() > 50 {
        return Err(CoreError::Validation(
            "Username must be at most 50 characters long".to_string(),
        ));
    }

    Ok(())
}
