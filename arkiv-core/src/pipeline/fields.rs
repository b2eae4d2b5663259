//! Resolution of the archiver-relevant ticket fields: which user owns the
//! archive directory and which path segments it uses. All failures here
//! are permanent validation errors with stable operator codes.

use std::collections::HashMap;

use serde_json::{Map, Value};

use crate::error::ArchiveError;
use crate::payload::payload_user_login;
use crate::zammad::Ticket;

fn nonempty(value: Option<&str>, field: &str) -> Result<String, ArchiveError> {
    value
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ArchiveError::validation(format!("{field} must be non-empty")))
}

/// Resolve the archive username from the `archive_user_mode` custom field:
/// `owner` (default), `current_agent`, or `fixed`.
pub fn determine_username(
    ticket: &Ticket,
    payload: &Map<String, Value>,
    custom_fields: &HashMap<String, Value>,
    mode_field: &str,
    archive_user_field: &str,
) -> Result<String, ArchiveError> {
    let mode = custom_fields
        .get(mode_field)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|mode| !mode.is_empty())
        .unwrap_or("owner");

    match mode {
        "owner" => nonempty(
            ticket.owner.as_ref().and_then(|o| o.login.as_deref()),
            "ticket.owner.login",
        ),
        "current_agent" => {
            if let Some(login) = payload_user_login(payload) {
                return Ok(login);
            }
            nonempty(
                ticket.updated_by.as_ref().and_then(|u| u.login.as_deref()),
                "ticket.updated_by.login",
            )
        }
        "fixed" => nonempty(
            custom_fields.get(archive_user_field).and_then(Value::as_str),
            &format!("custom_fields.{archive_user_field}"),
        ),
        other => Err(ArchiveError::validation(format!(
            "unsupported archive_user_mode: {other:?}"
        ))),
    }
}

/// Parse the `archive_path` custom field: a `>`-separated string or a list
/// of strings; segments are trimmed, empty ones dropped.
pub fn parse_archive_path_segments(value: Option<&Value>) -> Result<Vec<String>, ArchiveError> {
    let value = match value {
        None | Some(Value::Null) => {
            return Err(ArchiveError::validation(
                "custom_fields.archive_path is missing",
            ));
        }
        Some(value) => value,
    };

    let parts: Vec<String> = match value {
        Value::String(text) => text
            .split('>')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(str::to_string)
            .collect(),
        Value::Array(items) => {
            let mut parts = Vec::with_capacity(items.len());
            for (idx, item) in items.iter().enumerate() {
                let Value::String(text) = item else {
                    return Err(ArchiveError::validation(format!(
                        "custom_fields.archive_path[{idx}] must be a string"
                    )));
                };
                let trimmed = text.trim();
                if !trimmed.is_empty() {
                    parts.push(trimmed.to_string());
                }
            }
            parts
        }
        _ => {
            return Err(ArchiveError::validation(
                "custom_fields.archive_path must be a string or list of strings",
            ));
        }
    };

    if parts.is_empty() {
        return Err(ArchiveError::validation(
            "custom_fields.archive_path must not be empty after sanitization \
             (all segments were empty or whitespace-only)",
        ));
    }

    Ok(parts)
}
