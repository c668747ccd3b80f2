// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Value types for Shadow requests.
//!
//! Each type validates its value at construction time, so a malformed Thing
//! Name or client token is rejected before any network I/O.
//!
//! # Types
//!
//! - [`ThingName`] - Validated Thing Name (1-128 bytes, no topic wildcards)
//! - [`ClientToken`] - UPDATE correlation token (at most 64 bytes)
//! - [`Verb`] - DELETE, GET or UPDATE
//! - [`VerbSet`] - A selection of verbs
//! - [`CallbackKind`] - Delta or Updated push notification

mod client_token;
mod thing_name;
mod verb;

pub use client_token::{ClientToken, MAX_CLIENT_TOKEN_LENGTH};
pub use thing_name::{MAX_THING_NAME_LENGTH, ThingName};
pub use verb::{CallbackKind, Verb, VerbSet};
