// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Shadow document lookups.
//!
//! Only two fields are ever read from a Shadow document: the top-level
//! `clientToken` of UPDATE requests and responses, and the `code`/`message`
//! pair of a rejection. Everything else passes through untouched.

use std::borrow::Cow;
use std::collections::HashMap;

use serde_json::value::RawValue;
use serde_json::{Map, Value};

use crate::error::{Error, Rejection};

/// Top-level members of a JSON object, values kept as their raw text.
///
/// Deserializing into a map accepts objects only; an array never matches
/// members by position.
type RawMembers<'a> = HashMap<Cow<'a, str>, &'a RawValue>;

/// Finds the top-level `clientToken` string of a document.
///
/// Returns the raw JSON literal, quotes and escapes included, so two tokens
/// can be compared byte for byte. Returns `None` if the document is not a
/// JSON object, or if `clientToken` is absent or not a string.
///
/// # Examples
///
/// ```
/// use shadow_sync::protocol::document::find_client_token;
///
/// let doc = r#"{"state":{"desired":{"on":true}},"clientToken":"tok-1"}"#;
/// assert_eq!(find_client_token(doc), Some("\"tok-1\""));
/// assert_eq!(find_client_token(r#"{"clientToken":7}"#), None);
/// ```
#[must_use]
pub fn find_client_token(document: &str) -> Option<&str> {
    let mut members: RawMembers<'_> = serde_json::from_str(document).ok()?;
    let raw = members.remove("clientToken")?.get();
    raw.starts_with('"').then_some(raw)
}

/// Classifies a `/rejected` response document.
///
/// Both `code` and `message` must be present. A known numeric `code` maps to
/// [`Error::Rejected`]; anything else is [`Error::BadResponse`].
#[must_use]
pub fn parse_error_document(document: &str) -> Error {
    let Ok(parsed) = serde_json::from_str::<Map<String, Value>>(document) else {
        tracing::warn!("Rejection document is not a JSON object");
        return Error::BadResponse;
    };

    if !parsed.contains_key("message") {
        tracing::warn!("Rejection document has no message");
        return Error::BadResponse;
    }

    match parsed.get("code").and_then(Value::as_u64) {
        Some(code) => Rejection::from_code(code).map_or_else(
            || {
                tracing::warn!(code, "Unknown rejection code");
                Error::BadResponse
            },
            Error::Rejected,
        ),
        None => {
            tracing::warn!("Rejection document has no numeric code");
            Error::BadResponse
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_is_returned_raw() {
        let doc = r#"{"clientToken": "a\"b", "state": {}}"#;
        assert_eq!(find_client_token(doc), Some(r#""a\"b""#));
    }

    #[test]
    fn nested_token_is_ignored() {
        let doc = r#"{"state":{"clientToken":"inner"}}"#;
        assert_eq!(find_client_token(doc), None);
    }

    #[test]
    fn non_string_token_is_ignored() {
        assert_eq!(find_client_token(r#"{"clientToken":null}"#), None);
        assert_eq!(find_client_token(r#"{"clientToken":{"a":1}}"#), None);
    }

    #[test]
    fn malformed_document_has_no_token() {
        assert_eq!(find_client_token("not json"), None);
        assert_eq!(find_client_token(r#"["clientToken"]"#), None);
        assert_eq!(find_client_token(""), None);
    }

    #[test]
    fn array_document_has_no_token() {
        assert_eq!(find_client_token(r#"["tok-1"]"#), None);
        assert_eq!(find_client_token(r#"[{"clientToken":"tok-1"}]"#), None);
        assert_eq!(find_client_token(r#""clientToken""#), None);
    }

    #[test]
    fn known_codes_are_classified() {
        let err = parse_error_document(r#"{"code":404,"message":"No shadow exists"}"#);
        assert!(matches!(err, Error::Rejected(Rejection::NotFound)));

        let err = parse_error_document(r#"{"code":409,"message":"Version conflict"}"#);
        assert!(matches!(err, Error::Rejected(Rejection::Conflict)));
    }

    #[test]
    fn unknown_code_is_bad_response() {
        let err = parse_error_document(r#"{"code":418,"message":"teapot"}"#);
        assert!(matches!(err, Error::BadResponse));
    }

    #[test]
    fn array_document_is_bad_response() {
        assert!(matches!(
            parse_error_document(r#"[404,"No shadow exists"]"#),
            Error::BadResponse
        ));
        assert!(matches!(parse_error_document("404"), Error::BadResponse));
    }

    #[test]
    fn missing_message_is_bad_response() {
        let err = parse_error_document(r#"{"code":404}"#);
        assert!(matches!(err, Error::BadResponse));
    }

    #[test]
    fn missing_or_non_numeric_code_is_bad_response() {
        assert!(matches!(
            parse_error_document(r#"{"message":"oops"}"#),
            Error::BadResponse
        ));
        assert!(matches!(
            parse_error_document(r#"{"code":"404","message":"oops"}"#),
            Error::BadResponse
        ));
    }

    #[test]
    fn invalid_json_is_bad_response() {
        assert!(matches!(parse_error_document("{"), Error::BadResponse));
    }
}
