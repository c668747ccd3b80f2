// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! `shadow_sync` - A device-side client for the AWS IoT Device Shadow service.
//!
//! This library provides an async engine that issues Shadow DELETE, GET and
//! UPDATE requests over MQTT, correlates the service responses with the
//! requests that caused them, and dispatches delta and updated-documents
//! notifications to user callbacks.
//!
//! # Supported Features
//!
//! - **Operations**: DELETE, GET and UPDATE, waitable or callback based
//! - **Response correlation**: by verb, Thing Name and UPDATE `clientToken`
//! - **Shared subscriptions**: concurrent operations on a Thing share one
//!   pair of response subscriptions, optionally kept for the session
//! - **Push notifications**: `update/delta` and `update/documents` callbacks
//! - **Transport seam**: the engine is generic over [`Transport`], with an
//!   MQTT implementation on top of `rumqttc`
//!
//! # Quick Start
//!
//! ## Waitable UPDATE
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use shadow_sync::{MqttTransport, OperationFlags, PublishOptions, Shadow};
//!
//! #[tokio::main]
//! async fn main() -> shadow_sync::Result<()> {
//!     let (transport, incoming) = MqttTransport::builder()
//!         .host("192.168.1.50")
//!         .client_id("lamp1")
//!         .build()
//!         .await?;
//!
//!     let shadow = Shadow::new(transport);
//!     shadow.attach(incoming);
//!
//!     shadow
//!         .timed_update(
//!             "lamp1",
//!             r#"{"state":{"reported":{"on":true}},"clientToken":"tok-1"}"#,
//!             PublishOptions::default(),
//!             OperationFlags::EMPTY,
//!             Duration::from_secs(5),
//!         )
//!         .await?;
//!
//!     let document = shadow
//!         .timed_get(
//!             "lamp1",
//!             PublishOptions::default(),
//!             OperationFlags::KEEP_SUBSCRIPTIONS,
//!             Duration::from_secs(5),
//!         )
//!         .await?;
//!     println!("{document}");
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Delta Notifications
//!
//! ```no_run
//! use shadow_sync::{MqttTransport, Shadow};
//!
//! #[tokio::main]
//! async fn main() -> shadow_sync::Result<()> {
//!     let (transport, incoming) = MqttTransport::builder()
//!         .host("192.168.1.50")
//!         .build()
//!         .await?;
//!
//!     let shadow = Shadow::new(transport);
//!     let dispatcher = shadow.attach(incoming);
//!
//!     shadow
//!         .set_delta_callback("lamp1", |param| {
//!             println!("{} delta: {}", param.thing_name, param.document);
//!         })
//!         .await?;
//!
//!     let _ = dispatcher.await;
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod operation;
pub mod protocol;
mod shadow;
pub mod subscription;
#[cfg(test)]
mod test_support;
pub mod types;

pub use error::{Error, ParameterError, Rejection, Result, TopicError, TransportError};
pub use operation::{Operation, OperationCallback, OperationFlags, OperationId, OperationOutcome};
#[cfg(feature = "mqtt")]
pub use protocol::{MqttTransport, MqttTransportBuilder};
pub use protocol::{IncomingMessage, PublishOptions, QoS, Transport};
pub use shadow::{DEFAULT_MQTT_TIMEOUT, Shadow, ShadowBuilder, ShadowConfig};
pub use subscription::{CallbackParam, PushCallback};
pub use types::{CallbackKind, ClientToken, ThingName, Verb, VerbSet};
