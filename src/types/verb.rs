// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Shadow operation verbs and push-notification kinds.

use std::fmt;
use std::ops::BitOr;

/// One of the three Shadow request operations.
///
/// # Examples
///
/// ```
/// use shadow_sync::types::Verb;
///
/// assert_eq!(Verb::Get.as_str(), "get");
/// assert_eq!(Verb::Update.to_string(), "UPDATE");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    /// Delete the Thing's shadow document.
    Delete,
    /// Retrieve the Thing's shadow document.
    Get,
    /// Update the Thing's shadow document.
    Update,
}

impl Verb {
    /// All verbs, in slot order.
    pub const ALL: [Self; 3] = [Self::Delete, Self::Get, Self::Update];

    /// Returns the topic segment for this verb.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Delete => "delete",
            Self::Get => "get",
            Self::Update => "update",
        }
    }

    /// Returns the slot index used by per-verb tables.
    #[must_use]
    pub const fn index(&self) -> usize {
        match self {
            Self::Delete => 0,
            Self::Get => 1,
            Self::Update => 2,
        }
    }

    /// Parses a topic segment into a verb.
    #[must_use]
    pub fn from_segment(segment: &str) -> Option<Self> {
        match segment {
            "delete" => Some(Self::Delete),
            "get" => Some(Self::Get),
            "update" => Some(Self::Update),
            _ => None,
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Delete => "DELETE",
            Self::Get => "GET",
            Self::Update => "UPDATE",
        };
        f.write_str(name)
    }
}

/// A set of verbs, used to select persistent subscriptions to remove.
///
/// # Examples
///
/// ```
/// use shadow_sync::types::{Verb, VerbSet};
///
/// let set = VerbSet::GET | VerbSet::UPDATE;
/// assert!(set.contains(Verb::Get));
/// assert!(!set.contains(Verb::Delete));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct VerbSet(u8);

impl VerbSet {
    /// No verbs.
    pub const EMPTY: Self = Self(0);
    /// The DELETE verb.
    pub const DELETE: Self = Self(1 << 0);
    /// The GET verb.
    pub const GET: Self = Self(1 << 1);
    /// The UPDATE verb.
    pub const UPDATE: Self = Self(1 << 2);
    /// All three verbs.
    pub const ALL: Self = Self(0b111);

    /// Returns `true` if the set contains the verb.
    #[must_use]
    pub const fn contains(&self, verb: Verb) -> bool {
        self.0 & (1 << verb.index()) != 0
    }

    /// Returns `true` if the set is empty.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Iterates over the verbs in the set, in slot order.
    pub fn iter(self) -> impl Iterator<Item = Verb> {
        Verb::ALL.into_iter().filter(move |verb| self.contains(*verb))
    }
}

impl BitOr for VerbSet {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl From<Verb> for VerbSet {
    fn from(verb: Verb) -> Self {
        Self(1 << verb.index())
    }
}

/// The kind of out-of-band push notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallbackKind {
    /// Difference between desired and reported state (`update/delta`).
    Delta,
    /// Full before/after documents of an accepted update (`update/documents`).
    Updated,
}

impl CallbackKind {
    /// Returns the slot index used by per-kind tables.
    #[must_use]
    pub const fn index(&self) -> usize {
        match self {
            Self::Delta => 0,
            Self::Updated => 1,
        }
    }
}

impl fmt::Display for CallbackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Delta => "DELTA",
            Self::Updated => "UPDATED",
        };
        f.write_str(name)
    }
}
