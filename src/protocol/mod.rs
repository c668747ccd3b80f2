// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Wire-level pieces of the Shadow protocol.
//!
//! This module holds the topic grammar, the two document lookups the engine
//! needs, and the [`Transport`] seam through which the engine reaches an
//! MQTT connection.
//!
//! # Transports
//!
//! - [`Transport`]: the trait the engine is generic over
//! - [`MqttTransport`]: a `rumqttc` connection that waits for broker
//!   acknowledgements (requires the `mqtt` feature)
//!
//! Inbound messages are not part of the trait. A transport hands them to the
//! engine as [`IncomingMessage`] values over a channel, see
//! [`Shadow::attach`](crate::Shadow::attach).

pub mod document;
#[cfg(feature = "mqtt")]
mod mqtt_transport;
mod topic;

#[cfg(feature = "mqtt")]
pub use mqtt_transport::{MqttTransport, MqttTransportBuilder};
pub use topic::{
    LONGEST_SUFFIX_LENGTH, ParsedTopic, ResponseStatus, SHADOW_TOPIC_PREFIX, ShadowTopic,
    TopicRoute, TopicSuffix, parse_status, parse_thing_name,
};

use std::future::Future;
use std::time::Duration;

use crate::error::{ParameterError, TransportError};

/// MQTT quality of service levels usable for Shadow requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum QoS {
    /// QoS 0.
    #[default]
    AtMostOnce,
    /// QoS 1.
    AtLeastOnce,
}

impl TryFrom<u8> for QoS {
    type Error = ParameterError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::AtMostOnce),
            1 => Ok(Self::AtLeastOnce),
            other => Err(ParameterError::InvalidQos(other)),
        }
    }
}

impl From<QoS> for u8 {
    fn from(qos: QoS) -> Self {
        match qos {
            QoS::AtMostOnce => 0,
            QoS::AtLeastOnce => 1,
        }
    }
}

#[cfg(feature = "mqtt")]
impl From<QoS> for rumqttc::QoS {
    fn from(qos: QoS) -> Self {
        match qos {
            QoS::AtMostOnce => Self::AtMostOnce,
            QoS::AtLeastOnce => Self::AtLeastOnce,
        }
    }
}

/// Delivery options for a Shadow request publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PublishOptions {
    /// Quality of service of the request.
    pub qos: QoS,
    /// How many times an unacknowledged QoS 1 publish is sent again.
    pub retry_limit: u32,
    /// Delay before an unacknowledged publish is sent again.
    pub retry_interval: Duration,
}

/// A message received on a subscribed topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingMessage {
    /// The topic the message was published on.
    pub topic: String,
    /// The UTF-8 payload.
    pub payload: String,
}

impl IncomingMessage {
    /// Creates a new incoming message.
    #[must_use]
    pub fn new(topic: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

/// The MQTT operations the Shadow engine depends on.
///
/// Every call completes only once the broker has acknowledged the request,
/// or fails after `timeout`. The engine holds its subscription lock across
/// `subscribe` and `unsubscribe`, so an implementation must not call back
/// into the engine from these methods.
pub trait Transport: Send + Sync + 'static {
    /// Publishes `payload` on `topic`.
    fn publish(
        &self,
        topic: &str,
        payload: &str,
        options: PublishOptions,
        timeout: Duration,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Subscribes to `filter`.
    fn subscribe(
        &self,
        filter: &str,
        qos: QoS,
        timeout: Duration,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Unsubscribes from `filter`.
    fn unsubscribe(
        &self,
        filter: &str,
        timeout: Duration,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Returns `true` if `filter` is currently subscribed.
    fn is_subscribed(&self, filter: &str) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qos_conversion() {
        assert_eq!(QoS::try_from(0), Ok(QoS::AtMostOnce));
        assert_eq!(QoS::try_from(1), Ok(QoS::AtLeastOnce));
        assert_eq!(QoS::try_from(2), Err(ParameterError::InvalidQos(2)));
        assert_eq!(u8::from(QoS::AtLeastOnce), 1);
    }

    #[test]
    fn publish_options_default() {
        let options = PublishOptions::default();
        assert_eq!(options.qos, QoS::AtMostOnce);
        assert_eq!(options.retry_limit, 0);
        assert_eq!(options.retry_interval, Duration::ZERO);
    }
}
