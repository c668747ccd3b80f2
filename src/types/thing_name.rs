// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Thing Name type.

use std::fmt;

use crate::error::ParameterError;

/// Maximum length of a Thing Name, in bytes.
pub const MAX_THING_NAME_LENGTH: usize = 128;

/// A validated Thing Name.
///
/// Thing Names are embedded verbatim in topic names, so they must be
/// non-empty, at most [`MAX_THING_NAME_LENGTH`] bytes and free of topic
/// delimiters and wildcards.
///
/// # Examples
///
/// ```
/// use shadow_sync::types::ThingName;
///
/// let name = ThingName::new("lamp1").unwrap();
/// assert_eq!(name.as_str(), "lamp1");
///
/// assert!(ThingName::new("").is_err());
/// assert!(ThingName::new("a/b").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ThingName(String);

impl ThingName {
    /// Creates a validated Thing Name.
    ///
    /// # Errors
    ///
    /// Returns `ParameterError` if the name is empty, too long, or contains
    /// `/`, `+` or `#`.
    pub fn new(name: impl Into<String>) -> Result<Self, ParameterError> {
        let name = name.into();
        if name.is_empty() {
            return Err(ParameterError::EmptyThingName);
        }
        if name.len() > MAX_THING_NAME_LENGTH {
            return Err(ParameterError::ThingNameTooLong {
                max: MAX_THING_NAME_LENGTH,
                actual: name.len(),
            });
        }
        if let Some(c) = name.chars().find(|c| matches!(c, '/' | '+' | '#')) {
            return Err(ParameterError::InvalidThingNameCharacter(c));
        }
        Ok(Self(name))
    }

    /// Returns the name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for ThingName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ThingName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
