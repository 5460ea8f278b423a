//! Script variable extraction
//!
//! Detail and reader pages do not answer with JSON. They embed their payload in
//! script text as `var <name> = <value>;`. This module is the only place that
//! knows about that markup.

use crate::{ParseError, ParseResult};
use serde::de::DeserializeOwned;

/// Returns the source text following `var <name> =`, up to the end of the payload
pub fn find_assignment<'a>(payload: &'a str, name: &str) -> Option<&'a str> {
    for (start, _) in payload.match_indices(name) {
        let before = payload[..start].trim_end();
        let declared = ["var", "let", "const"].iter().any(|kw| {
            before.ends_with(kw)
                && before.len() < start
                && !before[..before.len() - kw.len()]
                    .chars()
                    .next_back()
                    .is_some_and(is_ident_char)
        });
        if !declared {
            continue;
        }

        let after = &payload[start + name.len()..];
        if after.starts_with(is_ident_char) {
            continue;
        }
        let after = after.trim_start();
        if let Some(rest) = after.strip_prefix('=') {
            if !rest.starts_with('=') {
                return Some(rest.trim_start());
            }
        }
    }
    None
}

/// Decodes the JSON value assigned to `name`
///
/// Only the first complete JSON value is read, so a trailing `;` or further
/// script text is ignored.
pub fn extract_json<T: DeserializeOwned>(payload: &str, name: &str) -> ParseResult<T> {
    let expr = find_assignment(payload, name)
        .ok_or_else(|| ParseError::MissingVariable(name.to_string()))?;
    first_json_value(expr)?.ok_or_else(|| ParseError::MissingVariable(name.to_string()))
}

/// Decodes a string assigned to `name`
///
/// Accepts a JSON string literal, a single-quoted literal, a literal wrapped in
/// `encodeURIComponent(...)`, or a bare token.
pub fn extract_string(payload: &str, name: &str) -> ParseResult<String> {
    let expr = find_assignment(payload, name)
        .ok_or_else(|| ParseError::MissingVariable(name.to_string()))?;
    decode_string_expr(expr).ok_or_else(|| {
        ParseError::ContractViolation(format!("`{}` is not a string expression", name))
    })
}

/// Decodes a non-negative integer assigned to `name`, quoted or not
pub fn extract_u64(payload: &str, name: &str) -> ParseResult<u64> {
    let expr = find_assignment(payload, name)
        .ok_or_else(|| ParseError::MissingVariable(name.to_string()))?;
    let token = statement(expr).trim_matches(|c| c == '"' || c == '\'');
    token.parse().map_err(|_| {
        ParseError::ContractViolation(format!("`{}` is not an integer: {:?}", name, token))
    })
}

fn decode_string_expr(expr: &str) -> Option<String> {
    if let Some(inner) = expr.strip_prefix("encodeURIComponent(") {
        return decode_string_expr(inner.trim_start());
    }
    match expr.chars().next()? {
        '"' => first_json_value::<String>(expr).ok().flatten(),
        '\'' => {
            let body = &expr[1..];
            body.find('\'').map(|end| body[..end].to_string())
        }
        _ => {
            let token = statement(expr);
            (!token.is_empty()).then(|| token.to_string())
        }
    }
}

/// Reads one JSON value from the start of `expr`, leaving the rest unread
fn first_json_value<T: DeserializeOwned>(expr: &str) -> ParseResult<Option<T>> {
    if expr.trim().is_empty() {
        return Ok(None);
    }
    let mut de = serde_json::Deserializer::from_str(expr);
    Ok(Some(serde::Deserialize::deserialize(&mut de)?))
}

/// Text up to the end of the statement
fn statement(expr: &str) -> &str {
    let end = expr.find([';', '\n']).unwrap_or(expr.len());
    expr[..end].trim()
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}
