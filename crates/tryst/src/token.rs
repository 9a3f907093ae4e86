// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Rendezvous tokens and caller identities.
//!
//! A `Token` names *why* a suspend and a resume are meeting; an `Identity`
//! names *who* is expected to do the waking. Both fold into one 64-bit
//! rendezvous key that the woken suspension checks.

use std::collections::hash_map::DefaultHasher;
use std::hash::Hasher;

/// A hashed rendezvous label.
///
/// Built from a human-readable label, typically once per call site. Two
/// tokens are interchangeable when their hashes are equal; label collisions
/// are assumed not to occur and are not detected. The label itself is kept
/// only for diagnostics.
#[derive(Debug, Clone)]
pub struct Token {
    hash: u64,
    label: Box<str>,
}

impl Token {
    /// Hash `label` into a token. Pure and total.
    pub fn new(label: &str) -> Self {
        let mut hasher = DefaultHasher::new();
        hasher.write(label.as_bytes());
        Token {
            hash: hasher.finish(),
            label: label.into(),
        }
    }

    /// The 64-bit label hash.
    pub fn hash(&self) -> u64 {
        self.hash
    }

    /// The original label, for tracing and `Debug` output.
    pub fn label(&self) -> &str {
        &self.label
    }
}

/// The address of a caller-supplied identity object, or [`Identity::NONE`].
///
/// XORed with a token hash to form the rendezvous key. This is a debugging
/// aid against programmer error, not a security boundary: two different
/// `(token, identity)` pairs whose keys happen to collide pass the check
/// undetected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Identity(u64);

impl Identity {
    /// Absent identity: the null address.
    pub const NONE: Identity = Identity(0);

    /// Identity of `value`: its address.
    pub fn of<T: ?Sized>(value: &T) -> Identity {
        Identity((value as *const T).cast::<()>() as usize as u64)
    }
}

/// The scalar both sides of a rendezvous must agree on.
pub(crate) fn rendezvous_key(token: &Token, identity: Identity) -> u64 {
    token.hash ^ identity.0
}
