// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Per-Thing subscription records and their reference counts.
//!
//! A [`Subscription`] exists while a Thing has an operation in flight, a
//! persistent response subscription or a push callback. Each verb slot counts
//! the operations that need the `accepted`/`rejected` response topics: the
//! first reference subscribes to them and the last one unsubscribes.
//!
//! Every method that talks to the transport takes `&mut self`, so callers
//! serialize them by holding the list lock across the awaited call.

use std::time::Duration;

use super::callback::{CallbackSlots, PushCallback};
use crate::error::TransportError;
use crate::protocol::{QoS, ShadowTopic, TopicSuffix, Transport};
use crate::types::{CallbackKind, Verb, VerbSet};

/// Stable handle of a subscription record. Never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct SubscriptionKey(u64);

/// Reference state of one verb slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum References {
    /// Counted references; the response topics are subscribed while non-zero.
    Transient(u32),
    /// Subscribed until explicitly removed; never counted.
    Persistent,
}

impl Default for References {
    fn default() -> Self {
        Self::Transient(0)
    }
}

/// Subscription state of one Thing.
#[derive(Debug)]
pub(crate) struct Subscription {
    key: SubscriptionKey,
    thing_name: String,
    references: [References; 3],
    callbacks: CallbackSlots,
    /// Scratch buffer for the topics of this Thing, rebuilt per verb.
    topic: ShadowTopic,
}

impl Subscription {
    fn new(key: SubscriptionKey, thing_name: &str) -> Self {
        Self {
            key,
            thing_name: thing_name.to_string(),
            references: [References::default(); 3],
            callbacks: CallbackSlots::default(),
            topic: ShadowTopic::generate(Verb::Update, thing_name),
        }
    }

    pub(crate) fn key(&self) -> SubscriptionKey {
        self.key
    }

    #[cfg(test)]
    pub(crate) fn thing_name(&self) -> &str {
        &self.thing_name
    }

    #[cfg(test)]
    pub(crate) fn references(&self, verb: Verb) -> References {
        self.references[verb.index()]
    }

    /// Returns a handle to the registered push callback, if any.
    pub(crate) fn callback(&self, kind: CallbackKind) -> Option<PushCallback> {
        self.callbacks.get(kind).cloned()
    }

    /// A record is idle when no slot holds a reference and no callback is set.
    pub(crate) fn is_idle(&self) -> bool {
        self.references
            .iter()
            .all(|slot| *slot == References::Transient(0))
            && self.callbacks.is_empty()
    }

    /// Takes a reference on the response topics of `verb`.
    ///
    /// The first reference subscribes to `accepted` then `rejected`. If the
    /// second subscribe fails the first is rolled back, and nothing is counted.
    /// With `keep`, the slot becomes persistent instead of being counted.
    pub(crate) async fn increment<T: Transport>(
        &mut self,
        transport: &T,
        verb: Verb,
        keep: bool,
        timeout: Duration,
    ) -> Result<(), TransportError> {
        let slot = verb.index();
        let count = match self.references[slot] {
            References::Persistent => return Ok(()),
            References::Transient(count) => count,
        };

        if count == 0 {
            let topic = &mut self.topic;
            topic.regenerate(verb, &self.thing_name);

            let accepted = transport
                .subscribe(topic.with_suffix(TopicSuffix::Accepted), QoS::AtLeastOnce, timeout)
                .await;
            if let Err(e) = accepted {
                tracing::error!(
                    thing = %self.thing_name,
                    verb = %verb,
                    error = %e,
                    "Failed to subscribe to accepted topic"
                );
                return Err(e);
            }

            let rejected = transport
                .subscribe(topic.with_suffix(TopicSuffix::Rejected), QoS::AtLeastOnce, timeout)
                .await;
            if let Err(e) = rejected {
                tracing::error!(
                    thing = %self.thing_name,
                    verb = %verb,
                    error = %e,
                    "Failed to subscribe to rejected topic"
                );
                let rollback = transport
                    .unsubscribe(topic.with_suffix(TopicSuffix::Accepted), timeout)
                    .await;
                if let Err(rollback) = rollback {
                    tracing::warn!(
                        thing = %self.thing_name,
                        verb = %verb,
                        error = %rollback,
                        "Failed to roll back accepted subscription"
                    );
                }
                return Err(e);
            }

            debug_assert!(transport.is_subscribed(topic.with_suffix(TopicSuffix::Accepted)));
            tracing::debug!(
                thing = %self.thing_name,
                verb = %verb,
                "Subscribed to response topics"
            );
        }

        self.references[slot] = if keep {
            References::Persistent
        } else {
            References::Transient(count + 1)
        };
        Ok(())
    }

    /// Releases a reference on the response topics of `verb`.
    ///
    /// The last reference unsubscribes from both topics. Unsubscribe
    /// failures are logged and otherwise ignored.
    pub(crate) async fn decrement<T: Transport>(
        &mut self,
        transport: &T,
        verb: Verb,
        timeout: Duration,
    ) {
        let slot = verb.index();
        match self.references[slot] {
            References::Persistent => {}
            References::Transient(0) => {
                tracing::warn!(
                    thing = %self.thing_name,
                    verb = %verb,
                    "Reference released with no reference held"
                );
            }
            References::Transient(count) => {
                self.references[slot] = References::Transient(count - 1);
                if count == 1 {
                    self.unsubscribe_responses(transport, verb, timeout).await;
                }
            }
        }
    }

    async fn unsubscribe_responses<T: Transport>(
        &mut self,
        transport: &T,
        verb: Verb,
        timeout: Duration,
    ) {
        self.topic.regenerate(verb, &self.thing_name);
        for suffix in [TopicSuffix::Accepted, TopicSuffix::Rejected] {
            let filter = self.topic.with_suffix(suffix);
            if let Err(e) = transport.unsubscribe(filter, timeout).await {
                tracing::warn!(filter = %filter, error = %e, "Failed to unsubscribe");
            }
        }
        tracing::debug!(
            thing = %self.thing_name,
            verb = %verb,
            "Unsubscribed from response topics"
        );
    }

    /// Adds, replaces or removes the push callback of `kind`.
    ///
    /// Adding subscribes to the notification topic, replacing swaps the
    /// closure only, and removing unsubscribes. Removing an absent callback
    /// does nothing.
    pub(crate) async fn set_callback<T: Transport>(
        &mut self,
        transport: &T,
        kind: CallbackKind,
        callback: Option<PushCallback>,
        timeout: Duration,
    ) -> Result<(), TransportError> {
        self.topic.regenerate(Verb::Update, &self.thing_name);
        let filter = self.topic.with_suffix(TopicSuffix::for_callback(kind));

        match (self.callbacks.is_set(kind), callback) {
            (true, Some(callback)) => {
                self.callbacks.replace(kind, Some(callback));
                tracing::info!(thing = %self.thing_name, kind = %kind, "Replaced callback");
            }
            (true, None) => {
                if let Err(e) = transport.unsubscribe(filter, timeout).await {
                    tracing::warn!(filter = %filter, error = %e, "Failed to unsubscribe");
                }
                self.callbacks.replace(kind, None);
                tracing::info!(thing = %self.thing_name, kind = %kind, "Removed callback");
            }
            (false, Some(callback)) => {
                if let Err(e) = transport.subscribe(filter, QoS::AtLeastOnce, timeout).await {
                    tracing::error!(
                        filter = %filter,
                        error = %e,
                        "Failed to subscribe to notification topic"
                    );
                    return Err(e);
                }
                self.callbacks.replace(kind, Some(callback));
                tracing::info!(thing = %self.thing_name, kind = %kind, "Added callback");
            }
            (false, None) => {
                tracing::debug!(thing = %self.thing_name, kind = %kind, "No callback to remove");
            }
        }

        Ok(())
    }

    /// Ends persistence for the selected verbs.
    ///
    /// Each persistent slot is unsubscribed and reset to zero references.
    /// Stops at the first failed unsubscribe, leaving that slot persistent.
    pub(crate) async fn end_persistence<T: Transport>(
        &mut self,
        transport: &T,
        verbs: VerbSet,
        timeout: Duration,
    ) -> Result<(), TransportError> {
        for verb in verbs.iter() {
            if self.references[verb.index()] != References::Persistent {
                continue;
            }

            self.topic.regenerate(verb, &self.thing_name);
            for suffix in [TopicSuffix::Accepted, TopicSuffix::Rejected] {
                let filter = self.topic.with_suffix(suffix);
                if let Err(e) = transport.unsubscribe(filter, timeout).await {
                    tracing::error!(filter = %filter, error = %e, "Failed to unsubscribe");
                    return Err(e);
                }
            }

            self.references[verb.index()] = References::Transient(0);
            tracing::info!(
                thing = %self.thing_name,
                verb = %verb,
                "Removed persistent subscription"
            );
        }

        Ok(())
    }
}

/// All subscription records, one per Thing.
#[derive(Debug, Default)]
pub(crate) struct SubscriptionList {
    entries: Vec<Subscription>,
    next_key: u64,
}

impl SubscriptionList {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn find(&self, thing_name: &str) -> Option<&Subscription> {
        self.entries
            .iter()
            .find(|entry| entry.thing_name == thing_name)
    }

    pub(crate) fn find_mut(&mut self, thing_name: &str) -> Option<&mut Subscription> {
        self.entries
            .iter_mut()
            .find(|entry| entry.thing_name == thing_name)
    }

    /// Returns the record for `thing_name`, creating an idle one if needed.
    pub(crate) fn find_or_create(&mut self, thing_name: &str) -> &mut Subscription {
        let position = self
            .entries
            .iter()
            .position(|entry| entry.thing_name == thing_name);

        let index = if let Some(index) = position {
            index
        } else {
            self.next_key += 1;
            let key = SubscriptionKey(self.next_key);
            self.entries.push(Subscription::new(key, thing_name));
            tracing::debug!(thing = %thing_name, "Created subscription record");
            self.entries.len() - 1
        };

        &mut self.entries[index]
    }

    pub(crate) fn get_mut(&mut self, key: SubscriptionKey) -> Option<&mut Subscription> {
        self.entries.iter_mut().find(|entry| entry.key == key)
    }

    /// Unlinks the record if it is idle, returning it.
    pub(crate) fn remove_if_idle(&mut self, key: SubscriptionKey) -> Option<Subscription> {
        let index = self
            .entries
            .iter()
            .position(|entry| entry.key == key && entry.is_idle())?;
        let removed = self.entries.swap_remove(index);
        tracing::debug!(thing = %removed.thing_name, "Removed idle subscription record");
        Some(removed)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::subscription::CallbackParam;
    use crate::test_support::RecordingTransport;

    const TIMEOUT: Duration = Duration::from_secs(1);

    fn noop_callback() -> PushCallback {
        Arc::new(|_: &CallbackParam<'_>| {})
    }

    #[tokio::test]
    async fn first_reference_subscribes_last_unsubscribes() {
        let transport = RecordingTransport::new();
        let mut list = SubscriptionList::new();
        let subscription = list.find_or_create("lamp1");

        subscription
            .increment(&transport, Verb::Get, false, TIMEOUT)
            .await
            .unwrap();
        subscription
            .increment(&transport, Verb::Get, false, TIMEOUT)
            .await
            .unwrap();
        assert_eq!(
            transport.subscribes(),
            vec![
                "$aws/things/lamp1/shadow/get/accepted",
                "$aws/things/lamp1/shadow/get/rejected",
            ]
        );
        assert_eq!(
            subscription.references(Verb::Get),
            References::Transient(2)
        );

        subscription.decrement(&transport, Verb::Get, TIMEOUT).await;
        assert!(transport.unsubscribes().is_empty());

        subscription.decrement(&transport, Verb::Get, TIMEOUT).await;
        assert_eq!(
            transport.unsubscribes(),
            vec![
                "$aws/things/lamp1/shadow/get/accepted",
                "$aws/things/lamp1/shadow/get/rejected",
            ]
        );
        assert!(subscription.is_idle());
    }

    #[tokio::test]
    async fn failed_rejected_subscribe_rolls_back() {
        let transport = RecordingTransport::new();
        transport.refuse("$aws/things/lamp1/shadow/update/rejected");
        let mut list = SubscriptionList::new();
        let subscription = list.find_or_create("lamp1");

        let result = subscription
            .increment(&transport, Verb::Update, false, TIMEOUT)
            .await;

        assert!(matches!(
            result,
            Err(TransportError::SubscriptionRefused(_))
        ));
        assert_eq!(
            transport.unsubscribes(),
            vec!["$aws/things/lamp1/shadow/update/accepted"]
        );
        assert_eq!(
            subscription.references(Verb::Update),
            References::Transient(0)
        );
        assert!(!transport.is_subscribed("$aws/things/lamp1/shadow/update/accepted"));
    }

    #[tokio::test]
    async fn failed_accepted_subscribe_counts_nothing() {
        let transport = RecordingTransport::new();
        transport.refuse("$aws/things/lamp1/shadow/delete/accepted");
        let mut list = SubscriptionList::new();
        let subscription = list.find_or_create("lamp1");

        assert!(
            subscription
                .increment(&transport, Verb::Delete, false, TIMEOUT)
                .await
                .is_err()
        );
        assert_eq!(transport.subscribes().len(), 1);
        assert!(transport.unsubscribes().is_empty());
        assert!(subscription.is_idle());
    }

    #[tokio::test]
    async fn persistent_slot_ignores_counting() {
        let transport = RecordingTransport::new();
        let mut list = SubscriptionList::new();
        let subscription = list.find_or_create("lamp1");

        subscription
            .increment(&transport, Verb::Get, true, TIMEOUT)
            .await
            .unwrap();
        subscription
            .increment(&transport, Verb::Get, false, TIMEOUT)
            .await
            .unwrap();
        subscription.decrement(&transport, Verb::Get, TIMEOUT).await;

        assert_eq!(subscription.references(Verb::Get), References::Persistent);
        assert_eq!(transport.subscribes().len(), 2);
        assert!(transport.unsubscribes().is_empty());
        assert!(!subscription.is_idle());

        subscription
            .end_persistence(&transport, VerbSet::ALL, TIMEOUT)
            .await
            .unwrap();
        assert_eq!(transport.unsubscribes().len(), 2);
        assert!(subscription.is_idle());

        // A second removal finds nothing persistent.
        subscription
            .end_persistence(&transport, VerbSet::GET, TIMEOUT)
            .await
            .unwrap();
        assert_eq!(transport.unsubscribes().len(), 2);
    }

    #[tokio::test]
    async fn ending_one_persistent_verb_leaves_the_rest() {
        let transport = RecordingTransport::new();
        let mut list = SubscriptionList::new();
        let subscription = list.find_or_create("lamp1");

        for verb in [Verb::Get, Verb::Update] {
            subscription
                .increment(&transport, verb, true, TIMEOUT)
                .await
                .unwrap();
        }

        subscription
            .end_persistence(&transport, VerbSet::GET, TIMEOUT)
            .await
            .unwrap();

        assert_eq!(
            transport.unsubscribes(),
            vec![
                "$aws/things/lamp1/shadow/get/accepted",
                "$aws/things/lamp1/shadow/get/rejected",
            ]
        );
        assert_eq!(subscription.references(Verb::Get), References::Transient(0));
        assert_eq!(
            subscription.references(Verb::Update),
            References::Persistent
        );
        assert!(transport.is_subscribed("$aws/things/lamp1/shadow/update/accepted"));
        assert!(transport.is_subscribed("$aws/things/lamp1/shadow/update/rejected"));
        assert!(!subscription.is_idle());

        let key = subscription.key();
        assert!(list.remove_if_idle(key).is_none());
        assert_eq!(list.len(), 1);
    }

    #[tokio::test]
    async fn decrement_at_zero_is_ignored() {
        let transport = RecordingTransport::new();
        let mut list = SubscriptionList::new();
        let subscription = list.find_or_create("lamp1");

        subscription.decrement(&transport, Verb::Delete, TIMEOUT).await;
        assert_eq!(
            subscription.references(Verb::Delete),
            References::Transient(0)
        );
        assert!(transport.calls().is_empty());
    }

    #[tokio::test]
    async fn callback_add_replace_remove() {
        let transport = RecordingTransport::new();
        let mut list = SubscriptionList::new();
        let subscription = list.find_or_create("lamp1");
        let delta = "$aws/things/lamp1/shadow/update/delta";

        subscription
            .set_callback(&transport, CallbackKind::Delta, Some(noop_callback()), TIMEOUT)
            .await
            .unwrap();
        assert_eq!(transport.subscribes(), vec![delta]);
        assert!(subscription.callback(CallbackKind::Delta).is_some());
        assert!(!subscription.is_idle());

        subscription
            .set_callback(&transport, CallbackKind::Delta, Some(noop_callback()), TIMEOUT)
            .await
            .unwrap();
        assert_eq!(transport.calls().len(), 1);

        subscription
            .set_callback(&transport, CallbackKind::Delta, None, TIMEOUT)
            .await
            .unwrap();
        assert_eq!(transport.unsubscribes(), vec![delta]);
        assert!(subscription.is_idle());

        subscription
            .set_callback(&transport, CallbackKind::Delta, None, TIMEOUT)
            .await
            .unwrap();
        assert_eq!(transport.calls().len(), 2);
    }

    #[tokio::test]
    async fn refused_callback_subscription_leaves_slot_empty() {
        let transport = RecordingTransport::new();
        transport.refuse("$aws/things/lamp1/shadow/update/documents");
        let mut list = SubscriptionList::new();
        let subscription = list.find_or_create("lamp1");

        let result = subscription
            .set_callback(&transport, CallbackKind::Updated, Some(noop_callback()), TIMEOUT)
            .await;
        assert!(result.is_err());
        assert!(subscription.callback(CallbackKind::Updated).is_none());
        assert!(subscription.is_idle());
    }

    #[test]
    fn find_or_create_reuses_records() {
        let mut list = SubscriptionList::new();
        let first = list.find_or_create("lamp1").key();
        let again = list.find_or_create("lamp1").key();
        let other = list.find_or_create("lamp2").key();

        assert_eq!(first, again);
        assert_ne!(first, other);
        assert_eq!(list.len(), 2);
        assert_eq!(list.find("lamp2").map(Subscription::thing_name), Some("lamp2"));
    }

    #[tokio::test]
    async fn busy_records_are_not_removed() {
        let transport = RecordingTransport::new();
        let mut list = SubscriptionList::new();
        let key = list.find_or_create("lamp1").key();
        list.get_mut(key)
            .unwrap()
            .increment(&transport, Verb::Get, false, TIMEOUT)
            .await
            .unwrap();

        assert!(list.remove_if_idle(key).is_none());
        assert_eq!(list.len(), 1);

        list.get_mut(key)
            .unwrap()
            .decrement(&transport, Verb::Get, TIMEOUT)
            .await;
        assert!(list.remove_if_idle(key).is_some());
        assert!(list.find_mut("lamp1").is_none());
    }

    #[test]
    fn keys_are_not_reused() {
        let mut list = SubscriptionList::new();
        let first = list.find_or_create("lamp1").key();
        assert!(list.remove_if_idle(first).is_some());

        let second = list.find_or_create("lamp1").key();
        assert_ne!(first, second);
        assert!(list.get_mut(first).is_none());
    }
}
