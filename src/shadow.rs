// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The Shadow engine.
//!
//! [`Shadow`] issues DELETE, GET and UPDATE requests over a [`Transport`],
//! correlates the service's responses with the pending requests and
//! dispatches push notifications to registered callbacks.
//!
//! # Locking
//!
//! Two locks guard the engine's state:
//!
//! - The subscription list lock is held across the transport `subscribe` and
//!   `unsubscribe` calls it triggers, so the first reference to a response
//!   topic always subscribes before any other operation can use it, and the
//!   last reference always unsubscribes. A slow transport therefore delays
//!   every subscription change process-wide.
//! - The pending-operation lock is never held across an `.await`.
//!
//! An operation is listed as pending before its request is published, so a
//! response can never arrive for an operation that cannot be found.
//!
//! # Examples
//!
//! ```no_run
//! use std::time::Duration;
//! use shadow_sync::protocol::{MqttTransport, PublishOptions};
//! use shadow_sync::{OperationFlags, Shadow};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let (transport, incoming) = MqttTransport::builder()
//!     .host("192.168.1.50")
//!     .build()
//!     .await?;
//!
//! let shadow = Shadow::builder()
//!     .mqtt_timeout(Duration::from_secs(2))
//!     .build(transport);
//! let _dispatcher = shadow.attach(incoming);
//!
//! let document = shadow
//!     .timed_get(
//!         "lamp1",
//!         PublishOptions::default(),
//!         OperationFlags::EMPTY,
//!         Duration::from_secs(5),
//!     )
//!     .await?;
//! println!("lamp1: {document}");
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{Error, ParameterError, Result};
use crate::operation::{
    Matched, Operation, OperationCallback, OperationFlags, PendingOperation, PendingOperations,
};
use crate::protocol::document;
use crate::protocol::{
    IncomingMessage, ParsedTopic, PublishOptions, ResponseStatus, ShadowTopic, TopicRoute,
    Transport,
};
use crate::subscription::{CallbackParam, PushCallback, SubscriptionKey, SubscriptionList};
use crate::types::{CallbackKind, ClientToken, ThingName, Verb, VerbSet};

/// Default timeout for each transport request made by the engine.
pub const DEFAULT_MQTT_TIMEOUT: Duration = Duration::from_millis(5000);

/// Configuration for a [`Shadow`] engine.
#[derive(Debug, Clone)]
pub struct ShadowConfig {
    mqtt_timeout: Duration,
}

impl Default for ShadowConfig {
    fn default() -> Self {
        Self {
            mqtt_timeout: DEFAULT_MQTT_TIMEOUT,
        }
    }
}

impl ShadowConfig {
    /// Returns the timeout for each transport request.
    #[must_use]
    pub fn mqtt_timeout(&self) -> Duration {
        self.mqtt_timeout
    }
}

/// Builder for creating a [`Shadow`] engine.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use shadow_sync::ShadowBuilder;
///
/// let builder = ShadowBuilder::default().mqtt_timeout(Duration::from_secs(2));
/// assert_eq!(builder.config().mqtt_timeout(), Duration::from_secs(2));
///
/// // A zero timeout keeps the default.
/// let builder = builder.mqtt_timeout(Duration::ZERO);
/// assert_eq!(builder.config().mqtt_timeout(), Duration::from_secs(2));
/// ```
#[derive(Debug, Default)]
pub struct ShadowBuilder {
    config: ShadowConfig,
}

impl ShadowBuilder {
    /// Sets the timeout for each transport request (default: 5 seconds).
    ///
    /// A zero duration leaves the current value unchanged.
    #[must_use]
    pub fn mqtt_timeout(mut self, timeout: Duration) -> Self {
        if !timeout.is_zero() {
            self.config.mqtt_timeout = timeout;
        }
        self
    }

    /// Returns the configuration built so far.
    #[must_use]
    pub fn config(&self) -> &ShadowConfig {
        &self.config
    }

    /// Builds the engine on top of `transport`.
    #[must_use]
    pub fn build<T: Transport>(self, transport: T) -> Shadow<T> {
        tracing::debug!(
            mqtt_timeout = ?self.config.mqtt_timeout,
            "Shadow engine created"
        );
        Shadow {
            inner: Arc::new(ShadowInner {
                transport,
                config: self.config,
                subscriptions: tokio::sync::Mutex::new(SubscriptionList::new()),
                pending: Mutex::new(PendingOperations::new()),
            }),
        }
    }
}

/// The Shadow operation and subscription engine.
///
/// `Shadow` is cheaply cloneable (via `Arc`); clones share all state.
pub struct Shadow<T> {
    inner: Arc<ShadowInner<T>>,
}

struct ShadowInner<T> {
    /// The MQTT connection.
    transport: T,
    /// Configuration used for this engine.
    config: ShadowConfig,
    /// Subscription records, held across transport (un)subscribes.
    subscriptions: tokio::sync::Mutex<SubscriptionList>,
    /// Operations waiting for a response.
    pending: Mutex<PendingOperations>,
}

impl<T> Clone for Shadow<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Transport> std::fmt::Debug for Shadow<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shadow")
            .field("config", &self.inner.config)
            .field("pending_operations", &self.pending_operation_count())
            .finish_non_exhaustive()
    }
}

impl Shadow<()> {
    /// Creates a new builder for configuring a Shadow engine.
    #[must_use]
    pub fn builder() -> ShadowBuilder {
        ShadowBuilder::default()
    }
}

impl<T: Transport> Shadow<T> {
    /// Creates an engine with the default configuration.
    #[must_use]
    pub fn new(transport: T) -> Self {
        ShadowBuilder::default().build(transport)
    }

    /// Returns the transport.
    #[must_use]
    pub fn transport(&self) -> &T {
        &self.inner.transport
    }

    /// Returns the engine's configuration.
    #[must_use]
    pub fn config(&self) -> &ShadowConfig {
        &self.inner.config
    }

    /// Returns the number of operations waiting for a response.
    #[must_use]
    pub fn pending_operation_count(&self) -> usize {
        self.inner.pending.lock().len()
    }

    /// Returns the number of Things with a subscription record.
    pub async fn subscription_count(&self) -> usize {
        self.inner.subscriptions.lock().await.len()
    }

    // ========================================================================
    // Operations
    // ========================================================================

    /// Deletes the Shadow document of a Thing.
    ///
    /// # Errors
    ///
    /// Returns a parameter error if the Thing Name is invalid or a callback
    /// is given for a waitable operation, or a transport error if the
    /// response subscriptions or the publish fail.
    pub async fn delete(
        &self,
        thing_name: &str,
        flags: OperationFlags,
        callback: Option<OperationCallback>,
    ) -> Result<Operation> {
        let thing = ThingName::new(thing_name)?;
        validate_completion(Verb::Delete, flags, callback.is_some())?;

        self.process(
            Verb::Delete,
            &thing,
            "",
            PublishOptions::default(),
            flags,
            None,
            callback,
        )
        .await
    }

    /// Retrieves the Shadow document of a Thing.
    ///
    /// A non-waitable GET must have a callback, since the document is only
    /// delivered through it.
    ///
    /// # Errors
    ///
    /// Returns a parameter error if the Thing Name, options or completion
    /// are invalid, or a transport error if the response subscriptions or
    /// the publish fail.
    pub async fn get(
        &self,
        thing_name: &str,
        options: PublishOptions,
        flags: OperationFlags,
        callback: Option<OperationCallback>,
    ) -> Result<Operation> {
        let thing = ThingName::new(thing_name)?;
        validate_options(options)?;
        validate_completion(Verb::Get, flags, callback.is_some())?;

        self.process(Verb::Get, &thing, "", options, flags, None, callback)
            .await
    }

    /// Updates the Shadow document of a Thing.
    ///
    /// The document must carry a top-level `clientToken` string, used to
    /// match the response. Two UPDATEs in flight for the same Thing must use
    /// different tokens; see [`ClientToken::generate`].
    ///
    /// # Errors
    ///
    /// Returns a parameter error if the Thing Name, document, options or
    /// completion are invalid, or a transport error if the response
    /// subscriptions or the publish fail.
    pub async fn update(
        &self,
        thing_name: &str,
        document: &str,
        options: PublishOptions,
        flags: OperationFlags,
        callback: Option<OperationCallback>,
    ) -> Result<Operation> {
        let thing = ThingName::new(thing_name)?;
        validate_options(options)?;
        validate_completion(Verb::Update, flags, callback.is_some())?;
        if document.is_empty() {
            return Err(ParameterError::EmptyDocument.into());
        }
        let client_token = ClientToken::from_document(document)?;

        self.process(
            Verb::Update,
            &thing,
            document,
            options,
            flags,
            Some(client_token),
            callback,
        )
        .await
    }

    /// Deletes the Shadow document of a Thing and waits for the response.
    ///
    /// # Errors
    ///
    /// Returns any error of [`delete`](Self::delete) or [`wait`](Self::wait).
    pub async fn timed_delete(
        &self,
        thing_name: &str,
        flags: OperationFlags,
        timeout: Duration,
    ) -> Result<()> {
        let operation = self
            .delete(thing_name, flags | OperationFlags::WAITABLE, None)
            .await?;
        self.wait(operation, timeout).await.map(drop)
    }

    /// Retrieves the Shadow document of a Thing and waits for it.
    ///
    /// # Errors
    ///
    /// Returns any error of [`get`](Self::get) or [`wait`](Self::wait).
    pub async fn timed_get(
        &self,
        thing_name: &str,
        options: PublishOptions,
        flags: OperationFlags,
        timeout: Duration,
    ) -> Result<String> {
        let operation = self
            .get(thing_name, options, flags | OperationFlags::WAITABLE, None)
            .await?;
        self.wait(operation, timeout)
            .await?
            .ok_or(Error::BadResponse)
    }

    /// Updates the Shadow document of a Thing and waits for the response.
    ///
    /// # Errors
    ///
    /// Returns any error of [`update`](Self::update) or [`wait`](Self::wait).
    pub async fn timed_update(
        &self,
        thing_name: &str,
        document: &str,
        options: PublishOptions,
        flags: OperationFlags,
        timeout: Duration,
    ) -> Result<()> {
        let operation = self
            .update(
                thing_name,
                document,
                options,
                flags | OperationFlags::WAITABLE,
                None,
            )
            .await?;
        self.wait(operation, timeout).await.map(drop)
    }

    /// Waits for a waitable operation to complete.
    ///
    /// Returns the document of an accepted GET, or `None` for the other
    /// verbs. The operation is released whatever the outcome; a response
    /// arriving after `timeout` is dropped.
    ///
    /// # Errors
    ///
    /// Returns `ParameterError::NotWaitable` for a callback operation,
    /// [`Error::Timeout`] if no response arrived in time, or the error the
    /// response carried.
    pub async fn wait(&self, operation: Operation, timeout: Duration) -> Result<Option<String>> {
        let id = operation.id();
        let verb = operation.verb();
        let Some(receiver) = operation.into_receiver() else {
            return Err(ParameterError::NotWaitable.into());
        };

        let result = match tokio::time::timeout(timeout, receiver).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::Timeout),
            Err(_) => {
                tracing::warn!(
                    operation = %id,
                    verb = %verb,
                    timeout = ?timeout,
                    "Timed out waiting for a response"
                );
                Err(Error::Timeout)
            }
        };

        let removed = self.inner.pending.lock().remove(id);
        let target = removed.as_ref().and_then(PendingOperation::release_target);
        if let Some((key, verb)) = target {
            self.release(key, verb).await;
        }

        result
    }

    /// Resolves the subscription, publishes the request and lists the
    /// operation as pending. Undoes every step on failure.
    #[allow(clippy::too_many_arguments)]
    async fn process(
        &self,
        verb: Verb,
        thing: &ThingName,
        payload: &str,
        options: PublishOptions,
        flags: OperationFlags,
        client_token: Option<ClientToken>,
        callback: Option<OperationCallback>,
    ) -> Result<Operation> {
        let timeout = self.inner.config.mqtt_timeout;

        let key = {
            let mut subscriptions = self.inner.subscriptions.lock().await;
            let subscription = subscriptions.find_or_create(thing.as_str());
            let key = subscription.key();
            let incremented = subscription
                .increment(
                    &self.inner.transport,
                    verb,
                    flags.keeps_subscriptions(),
                    timeout,
                )
                .await;
            if let Err(e) = incremented {
                subscriptions.remove_if_idle(key);
                return Err(e.into());
            }
            key
        };

        let operation = {
            let mut pending = self.inner.pending.lock();
            let id = pending.allocate_id();
            let (record, operation) = PendingOperation::new(
                id,
                verb,
                thing.as_str(),
                key,
                flags,
                client_token,
                callback,
            );
            pending.insert(record);
            operation
        };

        let topic = ShadowTopic::generate(verb, thing.as_str());
        tracing::debug!(
            topic = %topic.operation_topic(),
            qos = u8::from(options.qos),
            retry_limit = options.retry_limit,
            "Publishing request"
        );

        let published = self
            .inner
            .transport
            .publish(topic.operation_topic(), payload, options, timeout)
            .await;
        if let Err(e) = published {
            tracing::error!(
                thing = %thing,
                verb = %verb,
                error = %e,
                "Failed to publish request"
            );
            let removed = self.inner.pending.lock().remove(operation.id());
            let target = removed.as_ref().and_then(PendingOperation::release_target);
            if let Some((key, verb)) = target {
                self.release(key, verb).await;
            }
            return Err(e.into());
        }

        tracing::info!(
            thing = %thing,
            verb = %verb,
            operation = %operation.id(),
            "Operation pending"
        );
        Ok(operation)
    }

    /// Releases one reference on a verb slot and drops the record if idle.
    async fn release(&self, key: SubscriptionKey, verb: Verb) {
        let mut subscriptions = self.inner.subscriptions.lock().await;
        if let Some(subscription) = subscriptions.get_mut(key) {
            subscription
                .decrement(&self.inner.transport, verb, self.inner.config.mqtt_timeout)
                .await;
        }
        subscriptions.remove_if_idle(key);
    }

    // ========================================================================
    // Subscriptions
    // ========================================================================

    /// Adds, replaces or removes the push callback of `kind` for a Thing.
    ///
    /// Adding subscribes to the notification topic; replacing only swaps the
    /// callback; `None` removes the callback and unsubscribes. Removing a
    /// callback that is not set succeeds without doing anything.
    ///
    /// # Errors
    ///
    /// Returns a parameter error if the Thing Name is invalid, or a
    /// transport error if subscribing fails.
    pub async fn set_callback(
        &self,
        thing_name: &str,
        kind: CallbackKind,
        callback: Option<PushCallback>,
    ) -> Result<()> {
        let thing = ThingName::new(thing_name)?;

        let mut subscriptions = self.inner.subscriptions.lock().await;
        let subscription = subscriptions.find_or_create(thing.as_str());
        let key = subscription.key();
        let result = subscription
            .set_callback(
                &self.inner.transport,
                kind,
                callback,
                self.inner.config.mqtt_timeout,
            )
            .await;
        subscriptions.remove_if_idle(key);

        result.map_err(Into::into)
    }

    /// Sets the callback for a Thing's `update/delta` notifications.
    ///
    /// # Errors
    ///
    /// See [`set_callback`](Self::set_callback).
    pub async fn set_delta_callback<F>(&self, thing_name: &str, callback: F) -> Result<()>
    where
        F: Fn(&CallbackParam<'_>) + Send + Sync + 'static,
    {
        self.set_callback(thing_name, CallbackKind::Delta, Some(Arc::new(callback)))
            .await
    }

    /// Removes the delta callback of a Thing.
    ///
    /// # Errors
    ///
    /// Returns a parameter error if the Thing Name is invalid.
    pub async fn remove_delta_callback(&self, thing_name: &str) -> Result<()> {
        self.set_callback(thing_name, CallbackKind::Delta, None)
            .await
    }

    /// Sets the callback for a Thing's `update/documents` notifications.
    ///
    /// # Errors
    ///
    /// See [`set_callback`](Self::set_callback).
    pub async fn set_updated_callback<F>(&self, thing_name: &str, callback: F) -> Result<()>
    where
        F: Fn(&CallbackParam<'_>) + Send + Sync + 'static,
    {
        self.set_callback(thing_name, CallbackKind::Updated, Some(Arc::new(callback)))
            .await
    }

    /// Removes the updated-documents callback of a Thing.
    ///
    /// # Errors
    ///
    /// Returns a parameter error if the Thing Name is invalid.
    pub async fn remove_updated_callback(&self, thing_name: &str) -> Result<()> {
        self.set_callback(thing_name, CallbackKind::Updated, None)
            .await
    }

    /// Ends the persistent response subscriptions of the selected verbs.
    ///
    /// Must not be called while an operation of a selected verb is in flight
    /// for the Thing.
    ///
    /// # Errors
    ///
    /// Returns a parameter error if the Thing Name is invalid, or the
    /// transport error of the first failed unsubscribe.
    pub async fn remove_persistent_subscriptions(
        &self,
        thing_name: &str,
        verbs: VerbSet,
    ) -> Result<()> {
        let thing = ThingName::new(thing_name)?;

        let mut subscriptions = self.inner.subscriptions.lock().await;
        let Some(subscription) = subscriptions.find_mut(thing.as_str()) else {
            tracing::debug!(thing = %thing, "No subscriptions to remove");
            return Ok(());
        };
        let key = subscription.key();
        let result = subscription
            .end_persistence(
                &self.inner.transport,
                verbs,
                self.inner.config.mqtt_timeout,
            )
            .await;
        subscriptions.remove_if_idle(key);

        result.map_err(Into::into)
    }

    // ========================================================================
    // Inbound messages
    // ========================================================================

    /// Spawns a task that feeds `incoming` messages to the engine, one at a
    /// time, until the channel closes.
    pub fn attach(&self, mut incoming: mpsc::UnboundedReceiver<IncomingMessage>) -> JoinHandle<()> {
        let shadow = self.clone();
        tokio::spawn(async move {
            while let Some(message) = incoming.recv().await {
                shadow.handle_incoming(&message.topic, &message.payload).await;
            }
            tracing::debug!("Incoming message channel closed");
        })
    }

    /// Handles one message received on a Shadow topic.
    ///
    /// Messages on unrecognized topics, and responses that match no pending
    /// operation, are logged and dropped.
    pub async fn handle_incoming(&self, topic: &str, payload: &str) {
        let parsed = match ParsedTopic::parse(topic) {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::warn!(topic = %topic, error = %e, "Dropping message on unrecognized topic");
                return;
            }
        };

        match parsed.route {
            TopicRoute::Response(verb, status) => {
                self.handle_response(parsed.thing_name, verb, status, payload)
                    .await;
            }
            TopicRoute::Notification(kind) => {
                self.handle_notification(parsed.thing_name, kind, payload)
                    .await;
            }
        }
    }

    async fn handle_response(
        &self,
        thing_name: &str,
        verb: Verb,
        status: ResponseStatus,
        payload: &str,
    ) {
        let client_token = if verb == Verb::Update {
            let token = document::find_client_token(payload);
            if token.is_none() {
                tracing::warn!(thing = %thing_name, "UPDATE response has no client token");
                return;
            }
            token
        } else {
            None
        };

        let matched = self
            .inner
            .pending
            .lock()
            .take_match(verb, thing_name, client_token);
        let Some(matched) = matched else {
            tracing::warn!(
                thing = %thing_name,
                verb = %verb,
                "Dropping response that matches no pending operation"
            );
            return;
        };

        let result = match status {
            ResponseStatus::Accepted => {
                tracing::info!(thing = %thing_name, verb = %verb, "Request accepted");
                Ok((verb == Verb::Get).then(|| payload.to_string()))
            }
            ResponseStatus::Rejected => {
                let error = document::parse_error_document(payload);
                tracing::warn!(thing = %thing_name, verb = %verb, error = %error, "Request rejected");
                Err(error)
            }
            ResponseStatus::Unknown => Err(Error::BadResponse),
        };

        match matched {
            Matched::Waiting { id, sender } => {
                if sender.send(result).is_err() {
                    tracing::debug!(operation = %id, "Waiter is gone, releasing operation");
                    let removed = self.inner.pending.lock().remove(id);
                    let target = removed.as_ref().and_then(PendingOperation::release_target);
                    if let Some((key, verb)) = target {
                        self.release(key, verb).await;
                    }
                }
            }
            Matched::Detached(operation) => {
                let target = operation.release_target();
                if let Some((key, verb)) = target {
                    self.release(key, verb).await;
                }
                operation.finish(result);
            }
        }
    }

    async fn handle_notification(&self, thing_name: &str, kind: CallbackKind, payload: &str) {
        let callback = {
            let subscriptions = self.inner.subscriptions.lock().await;
            subscriptions
                .find(thing_name)
                .and_then(|subscription| subscription.callback(kind))
        };

        let Some(callback) = callback else {
            tracing::debug!(thing = %thing_name, kind = %kind, "No callback for notification");
            return;
        };

        tracing::debug!(thing = %thing_name, kind = %kind, "Invoking notification callback");
        callback(&CallbackParam {
            kind,
            thing_name,
            document: payload,
        });
    }
}

/// Checks that the completion mechanism fits the verb and flags.
fn validate_completion(
    verb: Verb,
    flags: OperationFlags,
    has_callback: bool,
) -> std::result::Result<(), ParameterError> {
    if flags.is_waitable() && has_callback {
        return Err(ParameterError::CallbackOnWaitable(verb));
    }
    if verb == Verb::Get && !flags.is_waitable() && !has_callback {
        return Err(ParameterError::MissingGetCallback);
    }
    Ok(())
}

fn validate_options(options: PublishOptions) -> std::result::Result<(), ParameterError> {
    if options.retry_limit > 0 && options.retry_interval.is_zero() {
        return Err(ParameterError::InvalidRetry);
    }
    Ok(())
}
