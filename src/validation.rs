//! Input-contract helpers shared by the request DTOs. Everything here fails
//! with [`AppError::Validation`].

use std::collections::BTreeSet;

use lazy_static::lazy_static;
use regex::Regex;
use time::{macros::format_description, Date};

use crate::{
    error::{AppError, AppResult},
    store::Gender,
};

pub const MIN_PASSWORD_LEN: usize = 8;

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

/// Trims, lower-cases and checks the address.
pub fn email(raw: &str) -> AppResult<String> {
    let email = raw.trim().to_lowercase();
    if !is_valid_email(&email) {
        return Err(AppError::validation("Invalid email"));
    }
    Ok(email)
}

pub fn required(field: &str, raw: &str) -> AppResult<String> {
    let value = raw.trim();
    if value.is_empty() {
        return Err(AppError::validation(format!("{field} is required")));
    }
    Ok(value.to_string())
}

/// Blank input counts as absent.
pub fn optional(raw: Option<String>) -> Option<String> {
    raw.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

pub fn birth_date(raw: Option<&str>) -> AppResult<Option<Date>> {
    let Some(raw) = raw.map(str::trim).filter(|v| !v.is_empty()) else {
        return Ok(None);
    };
    Date::parse(raw, format_description!("[year]-[month]-[day]"))
        .map(Some)
        .map_err(|_| AppError::validation("birth_date must be a date in YYYY-MM-DD format"))
}

pub fn gender(raw: Option<&str>) -> AppResult<Option<Gender>> {
    let Some(raw) = raw.map(str::trim).filter(|v| !v.is_empty()) else {
        return Ok(None);
    };
    raw.parse::<Gender>()
        .map(Some)
        .map_err(|_| AppError::validation("gender must be one of: male, female"))
}

pub fn password(field: &str, raw: &str) -> AppResult<()> {
    if raw.is_empty() {
        return Err(AppError::validation(format!("{field} is required")));
    }
    if raw.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::validation(format!(
            "{field} must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}

/// Collapses a requested list of role/permission names into a set.
pub fn name_set(field: &str, raw: Vec<String>) -> AppResult<BTreeSet<String>> {
    let mut names = BTreeSet::new();
    for name in raw {
        let name = name.trim();
        if name.is_empty() {
            return Err(AppError::validation(format!("{field} must not contain blank names")));
        }
        names.insert(name.to_string());
    }
    Ok(names)
}
