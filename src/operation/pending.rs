// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Pending operations and response correlation.

use tokio::sync::oneshot;

use super::{Operation, OperationCallback, OperationFlags, OperationId, OperationOutcome};
use crate::error::Error;
use crate::subscription::SubscriptionKey;
use crate::types::{ClientToken, Verb};

/// Terminal result of an operation: the document of an accepted GET, or
/// nothing for the other verbs.
pub(crate) type Completed = Result<Option<String>, Error>;

pub(crate) type WaitSender = oneshot::Sender<Completed>;
pub(crate) type WaitReceiver = oneshot::Receiver<Completed>;

/// How a pending operation is completed. Chosen once, at creation.
pub(crate) enum Completion {
    /// A waiter holds the receiving end. `None` once notified.
    Wait(Option<WaitSender>),
    /// Invoked once with the outcome. `None` when the caller gave no callback.
    Callback(Option<OperationCallback>),
}

/// An operation published and not yet completed.
pub(crate) struct PendingOperation {
    pub(crate) id: OperationId,
    pub(crate) verb: Verb,
    pub(crate) thing_name: String,
    subscription: SubscriptionKey,
    keep_subscriptions: bool,
    client_token: Option<ClientToken>,
    completion: Completion,
}

impl PendingOperation {
    /// Creates the record and the caller's handle for it.
    pub(crate) fn new(
        id: OperationId,
        verb: Verb,
        thing_name: &str,
        subscription: SubscriptionKey,
        flags: OperationFlags,
        client_token: Option<ClientToken>,
        callback: Option<OperationCallback>,
    ) -> (Self, Operation) {
        let (completion, receiver) = if flags.is_waitable() {
            let (tx, rx) = oneshot::channel();
            (Completion::Wait(Some(tx)), Some(rx))
        } else {
            (Completion::Callback(callback), None)
        };

        let record = Self {
            id,
            verb,
            thing_name: thing_name.to_string(),
            subscription,
            keep_subscriptions: flags.keeps_subscriptions(),
            client_token,
            completion,
        };
        let handle = Operation {
            id,
            verb,
            thing_name: thing_name.to_string(),
            receiver,
        };
        (record, handle)
    }

    fn matches(&self, verb: Verb, thing_name: &str, client_token: Option<&str>) -> bool {
        if self.verb != verb || self.thing_name != thing_name {
            return false;
        }
        if matches!(self.completion, Completion::Wait(None)) {
            return false;
        }
        match &self.client_token {
            Some(token) => client_token.is_some_and(|raw| token.matches_raw(raw)),
            None => true,
        }
    }

    /// Returns the subscription slot to release when the operation ends, or
    /// `None` if the operation keeps its subscriptions.
    pub(crate) fn release_target(&self) -> Option<(SubscriptionKey, Verb)> {
        (!self.keep_subscriptions).then_some((self.subscription, self.verb))
    }

    /// Delivers the result to the operation's callback, if it has one.
    pub(crate) fn finish(self, result: Completed) {
        let Completion::Callback(Some(callback)) = self.completion else {
            return;
        };

        let (result, document) = match result {
            Ok(document) => (Ok(()), document),
            Err(e) => (Err(e), None),
        };
        callback(OperationOutcome {
            id: self.id,
            verb: self.verb,
            thing_name: self.thing_name,
            result,
            document,
        });
    }
}

impl std::fmt::Debug for PendingOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingOperation")
            .field("id", &self.id)
            .field("verb", &self.verb)
            .field("thing_name", &self.thing_name)
            .field("keep_subscriptions", &self.keep_subscriptions)
            .field("client_token", &self.client_token)
            .finish_non_exhaustive()
    }
}

/// A pending operation matched to a response.
pub(crate) enum Matched {
    /// A waitable operation. It stays listed; its waiter removes it.
    Waiting { id: OperationId, sender: WaitSender },
    /// A callback operation, already unlinked from the list.
    Detached(PendingOperation),
}

/// Pending operations in insertion order.
#[derive(Debug, Default)]
pub(crate) struct PendingOperations {
    entries: Vec<PendingOperation>,
    next_id: u64,
}

impl PendingOperations {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Allocates an id that has never been handed out before.
    pub(crate) fn allocate_id(&mut self) -> OperationId {
        self.next_id += 1;
        OperationId(self.next_id)
    }

    pub(crate) fn insert(&mut self, operation: PendingOperation) {
        self.entries.push(operation);
    }

    pub(crate) fn remove(&mut self, id: OperationId) -> Option<PendingOperation> {
        let index = self.entries.iter().position(|entry| entry.id == id)?;
        Some(self.entries.remove(index))
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Finds the first operation a response belongs to.
    ///
    /// UPDATE operations match only when `client_token`, the raw token of
    /// the response, equals theirs byte for byte. Two pending UPDATEs with
    /// the same token for the same Thing cannot be told apart; the oldest
    /// one wins.
    pub(crate) fn take_match(
        &mut self,
        verb: Verb,
        thing_name: &str,
        client_token: Option<&str>,
    ) -> Option<Matched> {
        let index = self
            .entries
            .iter()
            .position(|entry| entry.matches(verb, thing_name, client_token))?;

        let id = self.entries[index].id;
        if let Completion::Wait(sender) = &mut self.entries[index].completion {
            return sender.take().map(|sender| Matched::Waiting { id, sender });
        }

        Some(Matched::Detached(self.entries.remove(index)))
    }
}
