// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Subscription management for Shadow topics.
//!
//! Response topics are subscribed lazily: the first operation of a verb for
//! a Thing subscribes to its `accepted` and `rejected` topics, and the last
//! one to complete unsubscribes. Operations issued with
//! [`OperationFlags::KEEP_SUBSCRIPTIONS`](crate::OperationFlags::KEEP_SUBSCRIPTIONS)
//! leave the topics subscribed until
//! [`Shadow::remove_persistent_subscriptions`](crate::Shadow::remove_persistent_subscriptions)
//! is called.
//!
//! # Push notifications
//!
//! Delta and updated-document notifications are delivered to a
//! [`PushCallback`] registered per Thing:
//!
//! ```no_run
//! use shadow_sync::Shadow;
//! use shadow_sync::subscription::CallbackParam;
//!
//! # async fn example<T: shadow_sync::protocol::Transport>(shadow: Shadow<T>) -> shadow_sync::Result<()> {
//! shadow
//!     .set_delta_callback("lamp1", |param: &CallbackParam<'_>| {
//!         println!("Delta for {}: {}", param.thing_name, param.document);
//!     })
//!     .await?;
//!
//! // Later, stop receiving deltas
//! shadow.remove_delta_callback("lamp1").await?;
//! # Ok(())
//! # }
//! ```

mod callback;
mod list;

pub use callback::{CallbackParam, PushCallback};
pub(crate) use list::{SubscriptionKey, SubscriptionList};
