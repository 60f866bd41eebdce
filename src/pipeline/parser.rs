//! Request parser — line-oriented `Label: value` grammar.
//!
//! Pure function, no I/O. The body is a sequence of lines; recognized
//! labels are matched case-insensitively, unrecognized lines are ignored,
//! and a duplicated label keeps its last occurrence. Anything missing or
//! empty after trimming is a hard parse failure — the parser never
//! silently defaults a field.

use crate::error::ParseError;
use crate::pipeline::types::AccountRequest;

/// Canonical labels, as they appear in request emails.
const FIRST_NAME: &str = "First Name";
const LAST_NAME: &str = "Last Name";
const USERNAME: &str = "Username";
const DEPARTMENT: &str = "Department";
const TITLE: &str = "Title";

/// Parse a message body into an [`AccountRequest`].
pub fn parse(body: &str, source_message_id: &str) -> Result<AccountRequest, ParseError> {
    let mut first_name = None;
    let mut last_name = None;
    let mut username = None;
    let mut department = None;
    let mut title = None;

    for line in body.lines() {
        let Some((label, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        // Last occurrence wins, even if it blanks a field out.
        match label.trim().to_ascii_lowercase().as_str() {
            "first name" => first_name = Some(value.to_string()),
            "last name" => last_name = Some(value.to_string()),
            "username" => username = Some(value.to_string()),
            "department" => department = Some(value.to_string()),
            "title" => title = Some(value.to_string()),
            _ => {}
        }
    }

    let first_name = require(FIRST_NAME, first_name)?;
    let last_name = require(LAST_NAME, last_name)?;
    let username = require(USERNAME, username)?;
    let department = require(DEPARTMENT, department)?;
    let title = require(TITLE, title)?;

    if !is_valid_username(&username) {
        return Err(ParseError::InvalidUsername { username });
    }

    Ok(AccountRequest {
        first_name,
        last_name,
        username,
        department,
        title,
        source_message_id: source_message_id.to_string(),
    })
}

/// A required field must be present and non-empty after trimming.
fn require(field: &'static str, value: Option<String>) -> Result<String, ParseError> {
    match value {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(ParseError::MissingField { field }),
    }
}

/// Usernames are restricted to the organization's allowed character set.
pub fn is_valid_username(username: &str) -> bool {
    !username.is_empty()
        && username
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
}
