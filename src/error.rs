// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Error types for the shadow engine.
//!
//! Every failure a caller can observe is expressed by [`Error`]: parameter
//! validation, resource exhaustion, transport failures, malformed responses,
//! local timeouts and service-side rejections. Inbound topics are network
//! input, so their parsing failures get their own [`TopicError`] and are
//! never surfaced to a caller.

use thiserror::Error;

use crate::types::Verb;

/// The main error type for this library.
///
/// This is the terminal status of every Shadow operation, delivered either
/// from [`Shadow::wait`](crate::Shadow::wait) or to an operation callback.
#[derive(Debug, Error)]
pub enum Error {
    /// A caller-supplied argument was invalid. No network I/O took place.
    #[error("bad parameter: {0}")]
    Parameter(#[from] ParameterError),

    /// A buffer, record or transport request slot could not be obtained.
    #[error("no memory")]
    NoMemory,

    /// The transport failed to publish, subscribe or unsubscribe.
    #[error("transport error: {0}")]
    Transport(TransportError),

    /// The service response could not be understood.
    #[error("bad response received")]
    BadResponse,

    /// No response arrived before the wait timeout elapsed.
    #[error("timed out waiting for a response")]
    Timeout,

    /// The service rejected the request.
    #[error("rejected: {0}")]
    Rejected(#[from] Rejection),
}

impl From<TransportError> for Error {
    /// Transport resource exhaustion is folded into [`Error::NoMemory`] so
    /// callers see a single taxonomy.
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::NoMemory => Self::NoMemory,
            other => Self::Transport(other),
        }
    }
}

/// Errors raised by argument validation, before any network I/O.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParameterError {
    /// The Thing Name was empty.
    #[error("thing name cannot be empty")]
    EmptyThingName,

    /// The Thing Name exceeds the maximum length.
    #[error("thing name length {actual} exceeds the maximum of {max}")]
    ThingNameTooLong {
        /// Maximum allowed length in bytes.
        max: usize,
        /// The length that was provided.
        actual: usize,
    },

    /// The Thing Name contains a topic delimiter or wildcard.
    #[error("thing name contains forbidden character {0:?}")]
    InvalidThingNameCharacter(char),

    /// A waitable operation was given a completion callback.
    #[error("callback should not be set for a waitable {0}")]
    CallbackOnWaitable(Verb),

    /// A non-waitable GET has nowhere to deliver its document.
    #[error("callback must be provided for a non-waitable GET")]
    MissingGetCallback,

    /// Only QoS 0 and 1 are supported for Shadow requests.
    #[error("QoS {0} is not supported, must be 0 or 1")]
    InvalidQos(u8),

    /// A retry limit was set without a retry interval.
    #[error("retry interval must be positive when a retry limit is set")]
    InvalidRetry,

    /// The UPDATE document was empty.
    #[error("update document cannot be empty")]
    EmptyDocument,

    /// The UPDATE document has no top-level `clientToken` string.
    #[error("update document must contain a clientToken string")]
    MissingClientToken,

    /// The client token is longer than the service allows.
    #[error("client token length {actual} exceeds the maximum of {max}")]
    ClientTokenTooLong {
        /// Maximum allowed length in bytes, excluding quotes.
        max: usize,
        /// The length that was provided, excluding quotes.
        actual: usize,
    },

    /// [`Shadow::wait`](crate::Shadow::wait) was called on a non-waitable operation.
    #[error("operation is not waitable")]
    NotWaitable,
}

/// Service-reported rejection codes.
///
/// The Shadow service answers a rejected request with an HTTP-shaped status
/// code. Only the codes below are defined; any other code is treated as a
/// [`Error::BadResponse`].
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Rejection {
    /// 400: the request document was malformed.
    #[error("400 bad request")]
    BadRequest,
    /// 401: the connection is not authorized.
    #[error("401 unauthorized")]
    Unauthorized,
    /// 403: the request is forbidden.
    #[error("403 forbidden")]
    Forbidden,
    /// 404: the Thing or its shadow does not exist.
    #[error("404 not found")]
    NotFound,
    /// 409: version conflict.
    #[error("409 version conflict")]
    Conflict,
    /// 413: the document is too large.
    #[error("413 payload too large")]
    TooLarge,
    /// 415: unsupported document encoding.
    #[error("415 unsupported encoding")]
    Unsupported,
    /// 429: the request was throttled.
    #[error("429 too many requests")]
    TooManyRequests,
    /// 500: internal service error.
    #[error("500 server error")]
    ServerError,
}

impl Rejection {
    /// Maps a service error code to a rejection, if the code is known.
    #[must_use]
    pub const fn from_code(code: u64) -> Option<Self> {
        match code {
            400 => Some(Self::BadRequest),
            401 => Some(Self::Unauthorized),
            403 => Some(Self::Forbidden),
            404 => Some(Self::NotFound),
            409 => Some(Self::Conflict),
            413 => Some(Self::TooLarge),
            415 => Some(Self::Unsupported),
            429 => Some(Self::TooManyRequests),
            500 => Some(Self::ServerError),
            _ => None,
        }
    }

    /// Returns the numeric service code.
    #[must_use]
    pub const fn code(self) -> u16 {
        match self {
            Self::BadRequest => 400,
            Self::Unauthorized => 401,
            Self::Forbidden => 403,
            Self::NotFound => 404,
            Self::Conflict => 409,
            Self::TooLarge => 413,
            Self::Unsupported => 415,
            Self::TooManyRequests => 429,
            Self::ServerError => 500,
        }
    }
}

/// Errors reported by a [`Transport`](crate::protocol::Transport).
#[derive(Debug, Error)]
pub enum TransportError {
    /// The MQTT client rejected the request.
    #[cfg(feature = "mqtt")]
    #[error("MQTT error: {0}")]
    Mqtt(#[from] rumqttc::ClientError),

    /// The transport ran out of request slots or buffers.
    #[error("transport out of memory")]
    NoMemory,

    /// Connection to the broker failed or was lost.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// The broker refused a subscription.
    #[error("subscription refused for {0}")]
    SubscriptionRefused(String),

    /// The request was not acknowledged in time.
    #[error("request timed out after {0} ms")]
    Timeout(u64),

    /// Invalid broker address or missing configuration.
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// The transport's event loop has stopped.
    #[error("channel closed: {0}")]
    ChannelClosed(String),
}

/// Errors raised while parsing an inbound Shadow topic.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TopicError {
    /// The topic is shorter than the shortest valid Shadow topic.
    #[error("topic of length {0} is too short")]
    TooShort(usize),

    /// The topic does not start with the Shadow prefix.
    #[error("topic does not start with the shadow prefix")]
    BadPrefix,

    /// No `/` follows the Thing Name.
    #[error("no delimiter after the thing name")]
    MissingDelimiter,

    /// The Thing Name segment is empty.
    #[error("empty thing name")]
    EmptyThingName,

    /// The topic names no known Shadow operation or notification.
    #[error("unrecognized shadow topic suffix: {0}")]
    UnknownSuffix(String),
}

/// A specialized Result type for this library.
pub type Result<T> = std::result::Result<T, Error>;
