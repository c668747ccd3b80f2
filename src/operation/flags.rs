// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Operation flags.

use std::ops::BitOr;

/// Flags selecting how an operation completes and what it leaves behind.
///
/// # Examples
///
/// ```
/// use shadow_sync::OperationFlags;
///
/// let flags = OperationFlags::WAITABLE | OperationFlags::KEEP_SUBSCRIPTIONS;
/// assert!(flags.is_waitable());
/// assert!(flags.keeps_subscriptions());
/// assert!(!OperationFlags::EMPTY.is_waitable());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct OperationFlags(u8);

impl OperationFlags {
    /// No flags: the operation completes through its callback.
    pub const EMPTY: Self = Self(0);
    /// The operation completes through [`Shadow::wait`](crate::Shadow::wait).
    pub const WAITABLE: Self = Self(1 << 0);
    /// Keep the response subscriptions after the operation completes.
    pub const KEEP_SUBSCRIPTIONS: Self = Self(1 << 1);

    /// Returns `true` if all flags in `other` are set.
    #[must_use]
    pub const fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns `true` if the operation must be waited on.
    #[must_use]
    pub const fn is_waitable(&self) -> bool {
        self.contains(Self::WAITABLE)
    }

    /// Returns `true` if the response subscriptions are kept.
    #[must_use]
    pub const fn keeps_subscriptions(&self) -> bool {
        self.contains(Self::KEEP_SUBSCRIPTIONS)
    }
}

impl BitOr for OperationFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}
