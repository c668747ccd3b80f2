// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Shadow topic generation and parsing.
//!
//! Every Shadow topic follows one grammar:
//!
//! ```text
//! $aws/things/<ThingName>/shadow/<verb>[/accepted|/rejected]
//! $aws/things/<ThingName>/shadow/update/delta
//! $aws/things/<ThingName>/shadow/update/documents
//! ```
//!
//! [`ShadowTopic`] writes the operation part once and then swaps suffixes in
//! place. Inbound topics are network input: every parser here returns a
//! [`TopicError`] instead of panicking or reading out of bounds.

use crate::error::TopicError;
use crate::types::{CallbackKind, Verb};

/// Prefix shared by every Shadow topic.
pub const SHADOW_TOPIC_PREFIX: &str = "$aws/things/";

/// Segment between the Thing Name and the verb.
const SHADOW_SEGMENT: &str = "/shadow/";

/// Length of the longest suffix (`/documents`).
pub const LONGEST_SUFFIX_LENGTH: usize = TopicSuffix::Documents.as_str().len();

/// Length of the shortest topic that can be a valid Shadow topic.
const MIN_TOPIC_LENGTH: usize =
    SHADOW_TOPIC_PREFIX.len() + 1 + SHADOW_SEGMENT.len() + Verb::Get.as_str().len();

/// Suffixes appended to an operation topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicSuffix {
    /// `/accepted` response.
    Accepted,
    /// `/rejected` response.
    Rejected,
    /// `/delta` push notification.
    Delta,
    /// `/documents` push notification.
    Documents,
}

impl TopicSuffix {
    /// Returns the suffix text, leading `/` included.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Accepted => "/accepted",
            Self::Rejected => "/rejected",
            Self::Delta => "/delta",
            Self::Documents => "/documents",
        }
    }

    /// Returns the push-notification suffix for a callback kind.
    #[must_use]
    pub const fn for_callback(kind: CallbackKind) -> Self {
        match kind {
            CallbackKind::Delta => Self::Delta,
            CallbackKind::Updated => Self::Documents,
        }
    }
}

/// Outcome encoded in a response topic's suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseStatus {
    /// The request was accepted.
    Accepted,
    /// The request was rejected.
    Rejected,
    /// The topic carries no recognizable status.
    Unknown,
}

/// A reusable topic buffer holding `prefix + thingName + /shadow/<verb>`.
///
/// The buffer reserves room for the longest suffix when the operation part
/// is written, so swapping suffixes never reallocates.
///
/// # Examples
///
/// ```
/// use shadow_sync::protocol::{ShadowTopic, TopicSuffix};
/// use shadow_sync::types::Verb;
///
/// let mut topic = ShadowTopic::generate(Verb::Get, "lamp1");
/// assert_eq!(topic.operation_topic(), "$aws/things/lamp1/shadow/get");
/// assert_eq!(
///     topic.with_suffix(TopicSuffix::Accepted),
///     "$aws/things/lamp1/shadow/get/accepted"
/// );
/// ```
#[derive(Debug, Clone, Default)]
pub struct ShadowTopic {
    buffer: String,
    operation_len: usize,
}

impl ShadowTopic {
    /// Generates the operation topic for a verb and Thing Name.
    #[must_use]
    pub fn generate(verb: Verb, thing_name: &str) -> Self {
        let mut topic = Self::default();
        topic.regenerate(verb, thing_name);
        topic
    }

    /// Rewrites the buffer for another verb, reusing its allocation.
    pub fn regenerate(&mut self, verb: Verb, thing_name: &str) {
        let required = SHADOW_TOPIC_PREFIX.len()
            + thing_name.len()
            + SHADOW_SEGMENT.len()
            + verb.as_str().len()
            + LONGEST_SUFFIX_LENGTH;

        self.buffer.clear();
        self.buffer.reserve(required);
        self.buffer.push_str(SHADOW_TOPIC_PREFIX);
        self.buffer.push_str(thing_name);
        self.buffer.push_str(SHADOW_SEGMENT);
        self.buffer.push_str(verb.as_str());
        self.operation_len = self.buffer.len();
    }

    /// Returns the length of the operation part.
    #[must_use]
    pub fn operation_len(&self) -> usize {
        self.operation_len
    }

    /// Returns the operation topic, without suffix.
    #[must_use]
    pub fn operation_topic(&self) -> &str {
        &self.buffer[..self.operation_len]
    }

    /// Replaces any suffix with `suffix` and returns the full topic.
    pub fn with_suffix(&mut self, suffix: TopicSuffix) -> &str {
        self.buffer.truncate(self.operation_len);
        self.buffer.push_str(suffix.as_str());
        &self.buffer
    }
}

/// Parses the response status from a topic's suffix.
///
/// Topics shorter than the shortest valid Shadow topic are `Unknown`.
#[must_use]
pub fn parse_status(topic: &str) -> ResponseStatus {
    if topic.len() < MIN_TOPIC_LENGTH {
        return ResponseStatus::Unknown;
    }

    if topic.ends_with(TopicSuffix::Accepted.as_str()) {
        ResponseStatus::Accepted
    } else if topic.ends_with(TopicSuffix::Rejected.as_str()) {
        ResponseStatus::Rejected
    } else {
        ResponseStatus::Unknown
    }
}

/// Extracts the Thing Name from a Shadow topic.
///
/// # Errors
///
/// Returns `TopicError` if the topic is too short, lacks the Shadow prefix,
/// has an empty Thing Name, or has no `/` after the Thing Name.
pub fn parse_thing_name(topic: &str) -> Result<&str, TopicError> {
    if topic.len() < MIN_TOPIC_LENGTH {
        return Err(TopicError::TooShort(topic.len()));
    }

    let rest = topic
        .strip_prefix(SHADOW_TOPIC_PREFIX)
        .ok_or(TopicError::BadPrefix)?;
    let end = rest.find('/').ok_or(TopicError::MissingDelimiter)?;
    if end == 0 {
        return Err(TopicError::EmptyThingName);
    }

    Ok(&rest[..end])
}

/// What an inbound Shadow topic is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicRoute {
    /// Response to a request of the given verb.
    Response(Verb, ResponseStatus),
    /// Push notification of the given kind.
    Notification(CallbackKind),
}

/// Parsed inbound Shadow topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedTopic<'a> {
    /// The Thing Name.
    pub thing_name: &'a str,
    /// What the message is for.
    pub route: TopicRoute,
}

impl<'a> ParsedTopic<'a> {
    /// Parses an inbound topic into its Thing Name and route.
    ///
    /// # Errors
    ///
    /// Returns `TopicError` if the topic is malformed or is not a response
    /// or notification topic.
    pub fn parse(topic: &'a str) -> Result<Self, TopicError> {
        let thing_name = parse_thing_name(topic)?;
        let tail = &topic[SHADOW_TOPIC_PREFIX.len() + thing_name.len()..];
        let unknown = || TopicError::UnknownSuffix(tail.to_string());

        let rest = tail.strip_prefix(SHADOW_SEGMENT).ok_or_else(unknown)?;
        let (verb, suffix) = rest.split_once('/').ok_or_else(unknown)?;
        let verb = Verb::from_segment(verb).ok_or_else(unknown)?;

        let route = match (verb, suffix) {
            (_, "accepted") => TopicRoute::Response(verb, ResponseStatus::Accepted),
            (_, "rejected") => TopicRoute::Response(verb, ResponseStatus::Rejected),
            (Verb::Update, "delta") => TopicRoute::Notification(CallbackKind::Delta),
            (Verb::Update, "documents") => TopicRoute::Notification(CallbackKind::Updated),
            _ => return Err(unknown()),
        };

        Ok(Self { thing_name, route })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_is_bit_exact() {
        let mut topic = ShadowTopic::generate(Verb::Update, "lamp1");
        assert_eq!(topic.operation_topic(), "$aws/things/lamp1/shadow/update");
        assert_eq!(
            topic.with_suffix(TopicSuffix::Rejected),
            "$aws/things/lamp1/shadow/update/rejected"
        );
        assert_eq!(
            topic.with_suffix(TopicSuffix::Delta),
            "$aws/things/lamp1/shadow/update/delta"
        );
        assert_eq!(
            topic.with_suffix(TopicSuffix::Documents),
            "$aws/things/lamp1/shadow/update/documents"
        );
    }

    #[test]
    fn suffix_swaps_do_not_reallocate() {
        let mut topic = ShadowTopic::generate(Verb::Delete, "thing");
        let capacity = topic.buffer.capacity();
        topic.with_suffix(TopicSuffix::Documents);
        topic.with_suffix(TopicSuffix::Accepted);
        assert_eq!(topic.buffer.capacity(), capacity);
    }

    #[test]
    fn regenerate_reuses_buffer() {
        let mut topic = ShadowTopic::generate(Verb::Get, "thing");
        topic.regenerate(Verb::Delete, "thing");
        assert_eq!(topic.operation_topic(), "$aws/things/thing/shadow/delete");
        assert_eq!(topic.operation_len(), topic.operation_topic().len());
    }

    #[test]
    fn generate_then_parse_round_trips() {
        let longest = "x".repeat(128);
        for verb in Verb::ALL {
            for name in ["a", "lamp1", "my-thing_01", longest.as_str()] {
                let mut topic = ShadowTopic::generate(verb, name);
                let prefix = topic.operation_topic().to_string();
                let full = topic.with_suffix(TopicSuffix::Accepted).to_string();

                assert!(full.starts_with(&prefix));
                assert_eq!(parse_thing_name(&full), Ok(name));
                assert_eq!(parse_status(&full), ResponseStatus::Accepted);
                assert_eq!(
                    ParsedTopic::parse(&full).unwrap().route,
                    TopicRoute::Response(verb, ResponseStatus::Accepted)
                );
            }
        }
    }

    #[test]
    fn short_topics_are_rejected_without_panicking() {
        for len in 0..MIN_TOPIC_LENGTH {
            let topic = "$aws/things/a/shadow/get/accepted";
            let topic = &topic[..len.min(topic.len())];
            assert_eq!(parse_status(topic), ResponseStatus::Unknown);
            assert!(parse_thing_name(topic).is_err());
            assert!(ParsedTopic::parse(topic).is_err());
        }
    }

    #[test]
    fn bad_prefix() {
        assert_eq!(
            parse_thing_name("$gcp/things/lamp1/shadow/get/accepted"),
            Err(TopicError::BadPrefix)
        );
    }

    #[test]
    fn missing_delimiter() {
        assert_eq!(
            parse_thing_name("$aws/things/lamp1shadowgetaccepted"),
            Err(TopicError::MissingDelimiter)
        );
    }

    #[test]
    fn empty_thing_name() {
        assert_eq!(
            parse_thing_name("$aws/things//shadow/get/accepted"),
            Err(TopicError::EmptyThingName)
        );
    }

    #[test]
    fn status_of_unrelated_suffix_is_unknown() {
        assert_eq!(
            parse_status("$aws/things/lamp1/shadow/update/delta"),
            ResponseStatus::Unknown
        );
        assert_eq!(
            parse_status("$aws/things/lamp1/shadow/get/rejected"),
            ResponseStatus::Rejected
        );
    }

    #[test]
    fn parse_notification_routes() {
        let parsed = ParsedTopic::parse("$aws/things/lamp1/shadow/update/delta").unwrap();
        assert_eq!(parsed.thing_name, "lamp1");
        assert_eq!(parsed.route, TopicRoute::Notification(CallbackKind::Delta));

        let parsed = ParsedTopic::parse("$aws/things/lamp1/shadow/update/documents").unwrap();
        assert_eq!(parsed.route, TopicRoute::Notification(CallbackKind::Updated));
    }

    #[test]
    fn parse_rejects_request_and_foreign_topics() {
        assert!(ParsedTopic::parse("$aws/things/lamp1/shadow/update").is_err());
        assert!(ParsedTopic::parse("$aws/things/lamp1/shadow/get/delta").is_err());
        assert!(ParsedTopic::parse("$aws/things/lamp1/jobs/get/accepted").is_err());
        assert!(ParsedTopic::parse("$aws/things/lamp1/shadow/patch/accepted").is_err());
    }
}
