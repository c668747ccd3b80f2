// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Client token type used to correlate UPDATE responses.

use std::fmt;

use uuid::Uuid;

use crate::error::ParameterError;
use crate::protocol::document;

/// Maximum length of a client token, in bytes, excluding the enclosing quotes.
pub const MAX_CLIENT_TOKEN_LENGTH: usize = 64;

/// The `clientToken` of an UPDATE document.
///
/// The token is kept as the raw JSON string literal it was found as, quotes
/// included, because responses are correlated by exact byte comparison with
/// no unescaping or normalization.
///
/// # Examples
///
/// ```
/// use shadow_sync::types::ClientToken;
///
/// let doc = r#"{"state":{"reported":{"x":1}},"clientToken":"tok-1"}"#;
/// let token = ClientToken::from_document(doc).unwrap();
/// assert_eq!(token.as_raw(), "\"tok-1\"");
/// assert_eq!(token.to_string(), "tok-1");
///
/// // Generated tokens are unique and fit the service limit.
/// let fresh = ClientToken::generate();
/// assert_ne!(fresh, ClientToken::generate());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientToken(String);

impl ClientToken {
    /// Generates a new random client token.
    #[must_use]
    pub fn generate() -> Self {
        Self(format!("\"{}\"", Uuid::new_v4().simple()))
    }

    /// Extracts and validates the client token of an UPDATE document.
    ///
    /// # Errors
    ///
    /// Returns `ParameterError::MissingClientToken` if the document has no
    /// top-level `clientToken` string, or `ClientTokenTooLong` if the token
    /// exceeds [`MAX_CLIENT_TOKEN_LENGTH`].
    pub fn from_document(document: &str) -> Result<Self, ParameterError> {
        let raw =
            document::find_client_token(document).ok_or(ParameterError::MissingClientToken)?;
        Self::from_raw(raw)
    }

    /// Wraps a raw JSON string literal, quotes included.
    pub(crate) fn from_raw(raw: &str) -> Result<Self, ParameterError> {
        if raw.len() < 2 || !raw.starts_with('"') || !raw.ends_with('"') {
            return Err(ParameterError::MissingClientToken);
        }
        let actual = raw.len() - 2;
        if actual > MAX_CLIENT_TOKEN_LENGTH {
            return Err(ParameterError::ClientTokenTooLong {
                max: MAX_CLIENT_TOKEN_LENGTH,
                actual,
            });
        }
        Ok(Self(raw.to_string()))
    }

    /// Returns the raw JSON literal, quotes included.
    #[must_use]
    pub fn as_raw(&self) -> &str {
        &self.0
    }

    /// Returns the token text between the quotes, still escaped.
    #[must_use]
    pub fn value(&self) -> &str {
        &self.0[1..self.0.len() - 1]
    }

    /// Returns `true` if a raw token from a response is byte-for-byte equal.
    #[must_use]
    pub fn matches_raw(&self, raw: &str) -> bool {
        self.0.len() == raw.len() && self.0.as_bytes() == raw.as_bytes()
    }
}

impl fmt::Display for ClientToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.value())
    }
}
