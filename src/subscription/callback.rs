// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Push-notification callbacks.
//!
//! The Shadow service pushes two kinds of unsolicited documents for a Thing:
//! the delta between desired and reported state, and the before/after
//! documents of every accepted update. At most one callback of each kind is
//! registered per Thing.

use std::sync::Arc;

use crate::types::CallbackKind;

/// Type alias for push-notification callbacks.
pub type PushCallback = Arc<dyn Fn(&CallbackParam<'_>) + Send + Sync>;

/// Parameter passed to a push-notification callback.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use shadow_sync::subscription::{CallbackParam, PushCallback};
///
/// let callback: PushCallback = Arc::new(|param: &CallbackParam<'_>| {
///     println!("{} for {}: {}", param.kind, param.thing_name, param.document);
/// });
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallbackParam<'a> {
    /// Which notification this is.
    pub kind: CallbackKind,
    /// The Thing the notification is for.
    pub thing_name: &'a str,
    /// The pushed document.
    pub document: &'a str,
}

/// One optional callback per [`CallbackKind`].
#[derive(Clone, Default)]
pub(crate) struct CallbackSlots([Option<PushCallback>; 2]);

impl CallbackSlots {
    pub(crate) fn get(&self, kind: CallbackKind) -> Option<&PushCallback> {
        self.0[kind.index()].as_ref()
    }

    pub(crate) fn is_set(&self, kind: CallbackKind) -> bool {
        self.0[kind.index()].is_some()
    }

    /// Stores `callback`, returning the previous one.
    pub(crate) fn replace(
        &mut self,
        kind: CallbackKind,
        callback: Option<PushCallback>,
    ) -> Option<PushCallback> {
        std::mem::replace(&mut self.0[kind.index()], callback)
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.0.iter().all(Option::is_none)
    }
}

impl std::fmt::Debug for CallbackSlots {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackSlots")
            .field("delta", &self.is_set(CallbackKind::Delta))
            .field("updated", &self.is_set(CallbackKind::Updated))
            .finish()
    }
}
