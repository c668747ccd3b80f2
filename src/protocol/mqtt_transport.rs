// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! MQTT transport backed by `rumqttc`.
//!
//! `rumqttc` queues requests and reports their acknowledgements as events on
//! its event loop. [`MqttTransport`] pairs each request with the matching
//! acknowledgement so that `publish`, `subscribe` and `unsubscribe` complete
//! only once the broker has answered, as the Shadow engine requires.
//!
//! # Examples
//!
//! ```no_run
//! use shadow_sync::protocol::MqttTransport;
//! use shadow_sync::Shadow;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let (transport, incoming) = MqttTransport::builder()
//!     .host("192.168.1.50")
//!     .port(1883)
//!     .credentials("user", "password")
//!     .build()
//!     .await?;
//!
//! let shadow = Shadow::new(transport);
//! let _dispatcher = shadow.attach(incoming);
//! # Ok(())
//! # }
//! ```

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use rumqttc::{AsyncClient, ClientError, EventLoop, MqttOptions, SubscribeReasonCode};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

use super::{IncomingMessage, PublishOptions, QoS, Transport};
use crate::error::TransportError;

/// Global counter for generating unique client IDs.
static CLIENT_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

type AckSender = oneshot::Sender<Result<(), TransportError>>;
type AckReceiver = oneshot::Receiver<Result<(), TransportError>>;

/// Configuration for an MQTT transport.
#[derive(Debug, Clone)]
pub(crate) struct MqttTransportConfig {
    host: String,
    port: u16,
    credentials: Option<(String, String)>,
    client_id: Option<String>,
    keep_alive: Duration,
    connection_timeout: Duration,
    request_capacity: usize,
}

impl Default for MqttTransportConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 1883,
            credentials: None,
            client_id: None,
            keep_alive: Duration::from_secs(30),
            connection_timeout: Duration::from_secs(10),
            request_capacity: 64,
        }
    }
}

/// Request kinds whose acknowledgement is awaited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum AckKind {
    Publish,
    Subscribe,
    Unsubscribe,
}

/// A request sent to the event loop, waiting for its packet id.
struct Queued {
    kind: AckKind,
    /// Resolved as soon as the packet is written.
    fire_and_forget: bool,
    /// Topic or filter, for diagnostics.
    target: String,
    tx: AckSender,
}

/// A request with a packet id, waiting for the broker's acknowledgement.
struct Inflight {
    target: String,
    tx: AckSender,
}

/// Pairs requests with acknowledgements.
///
/// The event loop emits an outgoing event for every request in the order the
/// requests were queued, so the front of `queued` always belongs to the next
/// outgoing event.
#[derive(Default)]
struct AckTracker {
    queued: VecDeque<Queued>,
    inflight: HashMap<(AckKind, u16), Inflight>,
}

impl AckTracker {
    fn enqueue(&mut self, kind: AckKind, fire_and_forget: bool, target: &str) -> AckReceiver {
        // Waiters that gave up are of no further use.
        self.inflight.retain(|_, waiter| !waiter.tx.is_closed());

        let (tx, rx) = oneshot::channel();
        self.queued.push_back(Queued {
            kind,
            fire_and_forget,
            target: target.to_string(),
            tx,
        });
        rx
    }

    /// Drops the most recent request after the client refused it.
    fn cancel_last(&mut self) {
        self.queued.pop_back();
    }

    fn on_outgoing(&mut self, kind: AckKind, pkid: u16) {
        let Some(queued) = self.queued.pop_front() else {
            tracing::warn!(?kind, pkid, "Outgoing packet with no queued request");
            return;
        };

        if queued.kind != kind {
            tracing::warn!(
                expected = ?queued.kind,
                actual = ?kind,
                target = %queued.target,
                "Outgoing packet does not match the queued request"
            );
            let _ = queued.tx.send(Err(TransportError::ConnectionFailed(
                "request order lost".to_string(),
            )));
            return;
        }

        if queued.fire_and_forget {
            let _ = queued.tx.send(Ok(()));
        } else {
            self.inflight.insert(
                (kind, pkid),
                Inflight {
                    target: queued.target,
                    tx: queued.tx,
                },
            );
        }
    }

    fn on_ack(
        &mut self,
        kind: AckKind,
        pkid: u16,
        result: impl FnOnce(&str) -> Result<(), TransportError>,
    ) {
        match self.inflight.remove(&(kind, pkid)) {
            Some(waiter) => {
                let _ = waiter.tx.send(result(&waiter.target));
            }
            None => tracing::debug!(?kind, pkid, "Acknowledgement with no waiter"),
        }
    }

    fn fail_all(&mut self, reason: &str) {
        let queued = self.queued.drain(..).map(|queued| queued.tx);
        let inflight = self.inflight.drain().map(|(_, waiter)| waiter.tx);
        for tx in queued.chain(inflight) {
            let _ = tx.send(Err(TransportError::ConnectionFailed(reason.to_string())));
        }
    }
}

/// An MQTT connection implementing [`Transport`].
///
/// `MqttTransport` is cheaply cloneable (via `Arc`). Messages received on
/// subscribed topics are forwarded to the receiver returned by
/// [`MqttTransportBuilder::build`].
#[derive(Clone)]
pub struct MqttTransport {
    inner: Arc<MqttTransportInner>,
}

struct MqttTransportInner {
    /// The MQTT async client used to queue requests.
    client: AsyncClient,
    /// Configuration used for this connection.
    config: MqttTransportConfig,
    /// Connection status.
    connected: AtomicBool,
    /// Requests waiting for an acknowledgement.
    acks: Mutex<AckTracker>,
    /// Filters the broker has acknowledged.
    subscribed: RwLock<HashSet<String>>,
    /// Sink for inbound publishes.
    incoming_tx: mpsc::UnboundedSender<IncomingMessage>,
}

impl MqttTransport {
    /// Creates a new builder for configuring an MQTT transport.
    #[must_use]
    pub fn builder() -> MqttTransportBuilder {
        MqttTransportBuilder::default()
    }

    /// Returns whether the transport is currently connected.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::Acquire)
    }

    /// Returns the host address of the broker.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.inner.config.host
    }

    /// Returns the port of the broker.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.inner.config.port
    }

    /// Disconnects from the broker.
    ///
    /// # Errors
    ///
    /// Returns error if the disconnect request cannot be queued.
    pub async fn disconnect(&self) -> Result<(), TransportError> {
        tracing::info!(
            host = %self.inner.config.host,
            port = %self.inner.config.port,
            "Disconnecting from MQTT broker"
        );

        self.inner.subscribed.write().clear();
        self.inner.client.disconnect().await?;
        self.inner.connected.store(false, Ordering::Release);
        Ok(())
    }

    /// Queues a request and registers its waiter in one step, so that the
    /// waiter order always matches the request order.
    fn request(
        &self,
        kind: AckKind,
        fire_and_forget: bool,
        target: &str,
        send: impl FnOnce(&AsyncClient) -> Result<(), ClientError>,
    ) -> Result<AckReceiver, TransportError> {
        if !self.is_connected() {
            return Err(TransportError::ConnectionFailed(
                "not connected to the MQTT broker".to_string(),
            ));
        }

        let mut acks = self.inner.acks.lock();
        let rx = acks.enqueue(kind, fire_and_forget, target);
        match send(&self.inner.client) {
            Ok(()) => Ok(rx),
            Err(ClientError::TryRequest(_)) => {
                acks.cancel_last();
                Err(TransportError::NoMemory)
            }
            Err(e) => {
                acks.cancel_last();
                Err(e.into())
            }
        }
    }

    async fn await_ack(rx: AckReceiver, timeout: Duration) -> Result<(), TransportError> {
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(TransportError::ChannelClosed(
                "MQTT event loop stopped".to_string(),
            )),
            Err(_) => Err(TransportError::Timeout(duration_millis(timeout))),
        }
    }
}

impl Transport for MqttTransport {
    async fn publish(
        &self,
        topic: &str,
        payload: &str,
        options: PublishOptions,
        timeout: Duration,
    ) -> Result<(), TransportError> {
        let fire_and_forget = options.qos == QoS::AtMostOnce;
        let deadline = Instant::now() + timeout;
        let mut attempt = 0;

        loop {
            let rx = self.request(AckKind::Publish, fire_and_forget, topic, |client| {
                client.try_publish(topic, options.qos.into(), false, payload.to_string())
            })?;

            let remaining = deadline.saturating_duration_since(Instant::now());
            let can_retry = !fire_and_forget && attempt < options.retry_limit;
            let wait = if can_retry {
                remaining.min(options.retry_interval)
            } else {
                remaining
            };

            match Self::await_ack(rx, wait).await {
                Err(TransportError::Timeout(_)) if can_retry && Instant::now() < deadline => {
                    attempt += 1;
                    tracing::debug!(topic = %topic, attempt, "Retrying unacknowledged publish");
                }
                Err(TransportError::Timeout(_)) => {
                    return Err(TransportError::Timeout(duration_millis(timeout)));
                }
                result => {
                    tracing::debug!(topic = %topic, ok = result.is_ok(), "Publish completed");
                    return result;
                }
            }
        }
    }

    async fn subscribe(
        &self,
        filter: &str,
        qos: QoS,
        timeout: Duration,
    ) -> Result<(), TransportError> {
        let rx = self.request(AckKind::Subscribe, false, filter, |client| {
            client.try_subscribe(filter, qos.into())
        })?;
        Self::await_ack(rx, timeout).await?;

        self.inner.subscribed.write().insert(filter.to_string());
        tracing::debug!(filter = %filter, "Subscribed");
        Ok(())
    }

    async fn unsubscribe(&self, filter: &str, timeout: Duration) -> Result<(), TransportError> {
        let rx = self.request(AckKind::Unsubscribe, false, filter, |client| {
            client.try_unsubscribe(filter)
        })?;
        Self::await_ack(rx, timeout).await?;

        self.inner.subscribed.write().remove(filter);
        tracing::debug!(filter = %filter, "Unsubscribed");
        Ok(())
    }

    fn is_subscribed(&self, filter: &str) -> bool {
        self.inner.subscribed.read().contains(filter)
    }
}

impl std::fmt::Debug for MqttTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MqttTransport")
            .field("host", &self.inner.config.host)
            .field("port", &self.inner.config.port)
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

/// Builder for creating an MQTT transport.
///
/// # Examples
///
/// ```no_run
/// use shadow_sync::protocol::MqttTransport;
/// use std::time::Duration;
///
/// # async fn example() -> Result<(), shadow_sync::TransportError> {
/// let (transport, incoming) = MqttTransport::builder()
///     .host("192.168.1.50")
///     .client_id("lamp-controller")
///     .keep_alive(Duration::from_secs(60))
///     .connection_timeout(Duration::from_secs(5))
///     .build()
///     .await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct MqttTransportBuilder {
    config: MqttTransportConfig,
}

impl MqttTransportBuilder {
    /// Sets the broker host address.
    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    /// Sets the broker port (default: 1883).
    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    /// Sets authentication credentials.
    #[must_use]
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.config.credentials = Some((username.into(), password.into()));
        self
    }

    /// Sets the MQTT client ID (default: generated).
    #[must_use]
    pub fn client_id(mut self, client_id: impl Into<String>) -> Self {
        self.config.client_id = Some(client_id.into());
        self
    }

    /// Sets the keep-alive interval (default: 30 seconds).
    #[must_use]
    pub fn keep_alive(mut self, duration: Duration) -> Self {
        self.config.keep_alive = duration;
        self
    }

    /// Sets the connection timeout (default: 10 seconds).
    #[must_use]
    pub fn connection_timeout(mut self, duration: Duration) -> Self {
        self.config.connection_timeout = duration;
        self
    }

    /// Sets how many requests may be queued at once (default: 64).
    ///
    /// Requests beyond this fail with [`TransportError::NoMemory`].
    #[must_use]
    pub fn request_capacity(mut self, capacity: usize) -> Self {
        self.config.request_capacity = capacity.max(1);
        self
    }

    /// Builds and connects the transport.
    ///
    /// Returns the transport and the receiver of inbound messages.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - Host is not set
    /// - Connection fails
    /// - Connection times out
    pub async fn build(
        self,
    ) -> Result<(MqttTransport, mpsc::UnboundedReceiver<IncomingMessage>), TransportError> {
        if self.config.host.is_empty() {
            return Err(TransportError::InvalidAddress(
                "MQTT broker host is required".to_string(),
            ));
        }

        let client_id = self.config.client_id.clone().unwrap_or_else(|| {
            let counter = CLIENT_ID_COUNTER.fetch_add(1, Ordering::Relaxed);
            format!("shadow_{}_{}", std::process::id(), counter)
        });

        let mut mqtt_options = MqttOptions::new(&client_id, &self.config.host, self.config.port);
        mqtt_options.set_keep_alive(self.config.keep_alive);
        mqtt_options.set_clean_session(true);

        if let Some((ref username, ref password)) = self.config.credentials {
            mqtt_options.set_credentials(username, password);
        }

        let (client, event_loop) = AsyncClient::new(mqtt_options, self.config.request_capacity);
        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();

        let transport = MqttTransport {
            inner: Arc::new(MqttTransportInner {
                client,
                config: self.config.clone(),
                connected: AtomicBool::new(false),
                acks: Mutex::new(AckTracker::default()),
                subscribed: RwLock::new(HashSet::new()),
                incoming_tx,
            }),
        };

        let (connack_tx, connack_rx) = oneshot::channel();
        let inner = Arc::clone(&transport.inner);
        tokio::spawn(async move {
            handle_transport_events(event_loop, inner, connack_tx).await;
        });

        let timeout = self.config.connection_timeout;
        match tokio::time::timeout(timeout, connack_rx).await {
            Ok(Ok(())) => {
                tracing::info!(
                    host = %self.config.host,
                    port = %self.config.port,
                    client_id = %client_id,
                    "Connected to MQTT broker"
                );
            }
            Ok(Err(_)) => {
                return Err(TransportError::ConnectionFailed(
                    "MQTT event loop terminated unexpectedly".to_string(),
                ));
            }
            Err(_) => {
                return Err(TransportError::ConnectionFailed(format!(
                    "MQTT connection timeout after {}s",
                    timeout.as_secs()
                )));
            }
        }

        Ok((transport, incoming_rx))
    }
}

/// Drives the event loop, resolving acknowledgements and forwarding publishes.
async fn handle_transport_events(
    mut event_loop: EventLoop,
    inner: Arc<MqttTransportInner>,
    connack_tx: oneshot::Sender<()>,
) {
    use rumqttc::{Event, Outgoing, Packet};

    let mut connack_tx = Some(connack_tx);

    loop {
        match event_loop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(connack))) => {
                tracing::debug!(?connack, "MQTT broker connected");
                inner.connected.store(true, Ordering::Release);
                if let Some(tx) = connack_tx.take() {
                    let _ = tx.send(());
                }
            }
            Ok(Event::Outgoing(Outgoing::Publish(pkid))) => {
                inner.acks.lock().on_outgoing(AckKind::Publish, pkid);
            }
            Ok(Event::Outgoing(Outgoing::Subscribe(pkid))) => {
                inner.acks.lock().on_outgoing(AckKind::Subscribe, pkid);
            }
            Ok(Event::Outgoing(Outgoing::Unsubscribe(pkid))) => {
                inner.acks.lock().on_outgoing(AckKind::Unsubscribe, pkid);
            }
            Ok(Event::Incoming(Packet::PubAck(puback))) => {
                inner
                    .acks
                    .lock()
                    .on_ack(AckKind::Publish, puback.pkid, |_| Ok(()));
            }
            Ok(Event::Incoming(Packet::SubAck(suback))) => {
                tracing::debug!(?suback, "MQTT subscription acknowledged");
                let refused = suback
                    .return_codes
                    .iter()
                    .any(|code| matches!(code, SubscribeReasonCode::Failure));
                inner.acks.lock().on_ack(AckKind::Subscribe, suback.pkid, |filter| {
                    if refused {
                        Err(TransportError::SubscriptionRefused(filter.to_string()))
                    } else {
                        Ok(())
                    }
                });
            }
            Ok(Event::Incoming(Packet::UnsubAck(unsuback))) => {
                inner
                    .acks
                    .lock()
                    .on_ack(AckKind::Unsubscribe, unsuback.pkid, |_| Ok(()));
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                match String::from_utf8(publish.payload.to_vec()) {
                    Ok(payload) => {
                        tracing::debug!(
                            topic = %publish.topic,
                            payload = %payload,
                            "MQTT message received"
                        );
                        let message = IncomingMessage {
                            topic: publish.topic,
                            payload,
                        };
                        if inner.incoming_tx.send(message).is_err() {
                            tracing::debug!("Incoming message receiver dropped");
                        }
                    }
                    Err(_) => {
                        tracing::warn!(topic = %publish.topic, "Dropping non UTF-8 payload");
                    }
                }
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                tracing::info!("MQTT broker disconnected");
                inner.connected.store(false, Ordering::Release);
                inner.acks.lock().fail_all("broker disconnected");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::error!(error = %e, "MQTT event loop error");
                inner.connected.store(false, Ordering::Release);
                inner.acks.lock().fail_all(&e.to_string());
                break;
            }
        }
    }
}

fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_default_values() {
        let builder = MqttTransportBuilder::default();
        assert_eq!(builder.config.port, 1883);
        assert!(builder.config.host.is_empty());
        assert!(builder.config.credentials.is_none());
        assert!(builder.config.client_id.is_none());
        assert_eq!(builder.config.keep_alive, Duration::from_secs(30));
        assert_eq!(builder.config.connection_timeout, Duration::from_secs(10));
        assert_eq!(builder.config.request_capacity, 64);
    }

    #[test]
    fn builder_chain() {
        let builder = MqttTransportBuilder::default()
            .host("192.168.1.50")
            .port(8883)
            .credentials("admin", "secret")
            .client_id("lamp-controller")
            .keep_alive(Duration::from_secs(45))
            .connection_timeout(Duration::from_secs(15))
            .request_capacity(0);

        assert_eq!(builder.config.host, "192.168.1.50");
        assert_eq!(builder.config.port, 8883);
        assert_eq!(builder.config.client_id.as_deref(), Some("lamp-controller"));
        assert_eq!(builder.config.keep_alive, Duration::from_secs(45));
        assert_eq!(builder.config.connection_timeout, Duration::from_secs(15));
        assert_eq!(builder.config.request_capacity, 1);
    }

    #[tokio::test]
    async fn builder_missing_host_fails() {
        let result = MqttTransportBuilder::default().build().await;
        assert!(matches!(result, Err(TransportError::InvalidAddress(_))));
    }

    #[tokio::test]
    async fn tracker_pairs_acks_by_packet_id() {
        let mut tracker = AckTracker::default();
        let first = tracker.enqueue(AckKind::Subscribe, false, "a/accepted");
        let second = tracker.enqueue(AckKind::Subscribe, false, "a/rejected");

        tracker.on_outgoing(AckKind::Subscribe, 1);
        tracker.on_outgoing(AckKind::Subscribe, 2);
        tracker.on_ack(AckKind::Subscribe, 2, |filter| {
            Err(TransportError::SubscriptionRefused(filter.to_string()))
        });
        tracker.on_ack(AckKind::Subscribe, 1, |_| Ok(()));

        assert!(first.await.unwrap().is_ok());
        assert!(matches!(
            second.await.unwrap(),
            Err(TransportError::SubscriptionRefused(filter)) if filter == "a/rejected"
        ));
    }

    #[tokio::test]
    async fn tracker_resolves_qos0_on_write() {
        let mut tracker = AckTracker::default();
        let rx = tracker.enqueue(AckKind::Publish, true, "a/get");
        tracker.on_outgoing(AckKind::Publish, 0);
        assert!(rx.await.unwrap().is_ok());
        assert!(tracker.inflight.is_empty());
    }

    #[tokio::test]
    async fn tracker_cancel_last_keeps_order() {
        let mut tracker = AckTracker::default();
        let kept = tracker.enqueue(AckKind::Publish, false, "a/update");
        let cancelled = tracker.enqueue(AckKind::Unsubscribe, false, "a/delta");
        tracker.cancel_last();

        tracker.on_outgoing(AckKind::Publish, 7);
        tracker.on_ack(AckKind::Publish, 7, |_| Ok(()));

        assert!(kept.await.unwrap().is_ok());
        assert!(cancelled.await.is_err());
    }

    #[tokio::test]
    async fn tracker_fail_all_wakes_every_waiter() {
        let mut tracker = AckTracker::default();
        let written = tracker.enqueue(AckKind::Subscribe, false, "x");
        let waiting = tracker.enqueue(AckKind::Publish, false, "y");
        tracker.on_outgoing(AckKind::Subscribe, 3);
        tracker.fail_all("gone");

        assert!(matches!(
            written.await.unwrap(),
            Err(TransportError::ConnectionFailed(_))
        ));
        assert!(matches!(
            waiting.await.unwrap(),
            Err(TransportError::ConnectionFailed(_))
        ));
    }

    #[test]
    fn tracker_drops_abandoned_waiters() {
        let mut tracker = AckTracker::default();
        let rx = tracker.enqueue(AckKind::Publish, false, "a");
        tracker.on_outgoing(AckKind::Publish, 1);
        drop(rx);

        let _next = tracker.enqueue(AckKind::Publish, false, "b");
        assert!(tracker.inflight.is_empty());
    }
}
