// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! tryst: identity-checked suspend/resume rendezvous for cooperative
//! coroutines.
//!
//! A [`Fiber`] wraps a single cooperatively-scheduled body. The driver
//! enters it with `start`/`resume`; the body leaves with `suspend`. Every
//! handoff carries a [`Message`] and is checked against a [`Token`]-plus-
//! [`Identity`] rendezvous key, so the party doing the waking is provably
//! the party the suspension expected. [`Fiber::kill`] forces a waiting
//! fiber's next suspension to fail instead of delivering a message.
//!
//! Components:
//! - `token`    : hashed rendezvous labels + caller identities
//! - `message`  : the tagged payload exchanged at each handoff
//! - `error`    : the Killed / Mismatch / Raised taxonomy, call-site locations
//! - `fiber`    : the wrapper state machine (start/suspend/resume/kill)
//! - `registry` : opt-in diagnostics registry of live fibers

pub mod error;
pub mod fiber;
pub mod message;
pub mod registry;
pub mod token;

pub use error::{Fault, FiberError, Location};
pub use fiber::{Fiber, FiberScope, FiberState, Suspend};
pub use message::{Message, MessageKind};
pub use registry::{FiberId, FiberSnapshot};
pub use token::{Identity, Token};
