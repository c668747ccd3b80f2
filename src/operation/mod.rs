// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Shadow operations and their completion.
//!
//! Every DELETE, GET or UPDATE request becomes an operation that stays
//! pending until its `accepted` or `rejected` response arrives. An operation
//! completes in one of two ways, chosen when it is issued:
//!
//! - **Waitable** ([`OperationFlags::WAITABLE`]): the caller passes the
//!   returned [`Operation`] to [`Shadow::wait`](crate::Shadow::wait).
//! - **Callback**: an [`OperationCallback`] is invoked once with the
//!   [`OperationOutcome`] on the task that dispatches inbound messages.
//!
//! A waitable operation that is never waited on is cleaned up when its
//! response arrives.

mod flags;
mod pending;

pub use flags::OperationFlags;
pub(crate) use pending::{Matched, PendingOperation, PendingOperations, WaitReceiver};

use crate::error::Error;
use crate::types::Verb;

/// Unique identifier of an operation. Never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OperationId(u64);

impl OperationId {
    /// Returns the raw ID value.
    #[must_use]
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for OperationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Op({})", self.0)
    }
}

/// Type alias for operation completion callbacks.
pub type OperationCallback = Box<dyn FnOnce(OperationOutcome) + Send>;

/// Result of a completed operation, passed to its [`OperationCallback`].
#[derive(Debug)]
pub struct OperationOutcome {
    /// The operation that completed.
    pub id: OperationId,
    /// The operation's verb.
    pub verb: Verb,
    /// The Thing the operation was for.
    pub thing_name: String,
    /// Whether the service accepted the request.
    pub result: Result<(), Error>,
    /// The Shadow document, for an accepted GET.
    pub document: Option<String>,
}

/// Handle to an issued operation.
///
/// For a waitable operation, pass it to [`Shadow::wait`](crate::Shadow::wait).
#[derive(Debug)]
#[must_use = "a waitable operation must be passed to `Shadow::wait`"]
pub struct Operation {
    id: OperationId,
    verb: Verb,
    thing_name: String,
    receiver: Option<WaitReceiver>,
}

impl Operation {
    /// Returns the operation's identifier.
    #[must_use]
    pub fn id(&self) -> OperationId {
        self.id
    }

    /// Returns the operation's verb.
    #[must_use]
    pub fn verb(&self) -> Verb {
        self.verb
    }

    /// Returns the Thing the operation is for.
    #[must_use]
    pub fn thing_name(&self) -> &str {
        &self.thing_name
    }

    /// Returns `true` if the operation must be waited on.
    #[must_use]
    pub fn is_waitable(&self) -> bool {
        self.receiver.is_some()
    }

    pub(crate) fn into_receiver(self) -> Option<WaitReceiver> {
        self.receiver
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operation_id_display() {
        assert_eq!(OperationId(7).to_string(), "Op(7)");
        assert_eq!(OperationId(7).value(), 7);
    }
}
