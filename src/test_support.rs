// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! In-memory transport for unit tests.

use std::collections::HashSet;
use std::time::Duration;

use parking_lot::Mutex;

use crate::error::TransportError;
use crate::protocol::{PublishOptions, QoS, Transport};

/// A transport call, as recorded by [`RecordingTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Call {
    Publish { topic: String, payload: String },
    Subscribe(String),
    Unsubscribe(String),
}

/// Records every call and acknowledges it immediately, unless told to fail.
#[derive(Default)]
pub(crate) struct RecordingTransport {
    calls: Mutex<Vec<Call>>,
    subscribed: Mutex<HashSet<String>>,
    refused_filters: Mutex<HashSet<String>>,
    next_publish_error: Mutex<Option<TransportError>>,
}

impl RecordingTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub(crate) fn subscribes(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Subscribe(filter) => Some(filter),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn unsubscribes(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Unsubscribe(filter) => Some(filter),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn publishes(&self) -> Vec<(String, String)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Publish { topic, payload } => Some((topic, payload)),
                _ => None,
            })
            .collect()
    }

    /// Makes every subscribe to `filter` fail.
    pub(crate) fn refuse(&self, filter: &str) {
        self.refused_filters.lock().insert(filter.to_string());
    }

    /// Makes the next publish fail with `error`.
    pub(crate) fn fail_next_publish(&self, error: TransportError) {
        *self.next_publish_error.lock() = Some(error);
    }
}

impl Transport for RecordingTransport {
    async fn publish(
        &self,
        topic: &str,
        payload: &str,
        _options: PublishOptions,
        _timeout: Duration,
    ) -> Result<(), TransportError> {
        self.calls.lock().push(Call::Publish {
            topic: topic.to_string(),
            payload: payload.to_string(),
        });
        match self.next_publish_error.lock().take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    async fn subscribe(
        &self,
        filter: &str,
        _qos: QoS,
        _timeout: Duration,
    ) -> Result<(), TransportError> {
        self.calls.lock().push(Call::Subscribe(filter.to_string()));
        if self.refused_filters.lock().contains(filter) {
            return Err(TransportError::SubscriptionRefused(filter.to_string()));
        }
        self.subscribed.lock().insert(filter.to_string());
        Ok(())
    }

    async fn unsubscribe(&self, filter: &str, _timeout: Duration) -> Result<(), TransportError> {
        self.calls.lock().push(Call::Unsubscribe(filter.to_string()));
        self.subscribed.lock().remove(filter);
        Ok(())
    }

    fn is_subscribed(&self, filter: &str) -> bool {
        self.subscribed.lock().contains(filter)
    }
}
