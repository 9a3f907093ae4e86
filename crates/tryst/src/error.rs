// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Error taxonomy for the rendezvous protocol.
//!
//! `Killed` and `Mismatch` surface inside the fiber, at its suspension
//! point; `Raised` faults travel the other way, to the blocked `resume`
//! caller. Precondition violations (resuming a non-waiting fiber, killing a
//! running one, and so on) are panics, not values of these types.

use std::fmt;
use std::rc::Rc;

/// A source location captured at an API call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Location {
    pub file: &'static str,
    pub line: u32,
}

impl Location {
    /// Capture the caller's location. Chains through `#[track_caller]`
    /// frames, so the recorded site is the user's call, not this crate's.
    #[track_caller]
    pub fn caller() -> Self {
        let location = std::panic::Location::caller();
        Location {
            file: location.file(),
            line: location.line(),
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}

/// A caller-supplied error carried across a rendezvous.
///
/// Faults are shared by reference: the value a fiber raises is the value
/// its resumer observes, never a copy or a translation.
#[derive(Debug)]
pub struct Fault {
    message: String,
    origin: Option<Location>,
}

impl Fault {
    pub fn new(message: impl Into<String>) -> Self {
        Fault {
            message: message.into(),
            origin: None,
        }
    }

    pub fn with_origin(message: impl Into<String>, origin: Location) -> Self {
        Fault {
            message: message.into(),
            origin: Some(origin),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn origin(&self) -> Option<Location> {
        self.origin
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.origin {
            Some(origin) => write!(f, "{} (raised at {})", self.message, origin),
            None => write!(f, "{}", self.message),
        }
    }
}

/// Failures produced by the rendezvous protocol.
#[derive(Debug, Clone, thiserror::Error)]
pub enum FiberError {
    /// The fiber was cancelled while waiting. Delivered at the next
    /// suspension point, before any identity check; `origin` is the `kill`
    /// call site.
    #[error("fiber killed (requested at {origin})")]
    Killed { origin: Location },

    /// The party that resumed is not the party the suspension expected:
    /// wrong caller, wrong token, or both. A bug in the surrounding code,
    /// not a condition to retry.
    #[error(
        "rendezvous mismatch at {at}: expected key {expected:#018x}, observed {observed:#018x}"
    )]
    Mismatch {
        at: Location,
        expected: u64,
        observed: u64,
    },

    /// A fault placed in the error member of a message; propagated verbatim
    /// out of the matching `resume`.
    #[error("{0}")]
    Raised(Rc<Fault>),
}

impl FiberError {
    /// Wrap `message` in a fault, recording the caller as its origin.
    #[track_caller]
    pub fn raised(message: impl Into<String>) -> Self {
        FiberError::Raised(Rc::new(Fault::with_origin(message, Location::caller())))
    }
}

impl PartialEq for FiberError {
    /// `Killed` and `Mismatch` compare structurally; `Raised` faults
    /// compare by reference identity.
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (FiberError::Killed { origin: a }, FiberError::Killed { origin: b }) => a == b,
            (
                FiberError::Mismatch {
                    at: a,
                    expected: ae,
                    observed: ao,
                },
                FiberError::Mismatch {
                    at: b,
                    expected: be,
                    observed: bo,
                },
            ) => a == b && ae == be && ao == bo,
            (FiberError::Raised(a), FiberError::Raised(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn location_displays_as_file_and_line() {
        let location = Location {
            file: "src/job.rs",
            line: 17,
        };
        assert_eq!(location.to_string(), "src/job.rs:17");
    }

    #[test]
    fn killed_display_carries_the_origin() {
        let error = FiberError::Killed {
            origin: Location {
                file: "src/driver.rs",
                line: 3,
            },
        };
        assert_eq!(error.to_string(), "fiber killed (requested at src/driver.rs:3)");
    }

    #[test]
    fn mismatch_display_shows_both_keys() {
        let error = FiberError::Mismatch {
            at: Location {
                file: "src/job.rs",
                line: 9,
            },
            expected: 1,
            observed: 2,
        };
        let text = error.to_string();
        assert!(text.contains("src/job.rs:9"));
        assert!(text.contains("0x0000000000000001"));
        assert!(text.contains("0x0000000000000002"));
    }

    #[test]
    fn raised_records_the_caller() {
        let error = FiberError::raised("backend exploded");
        match &error {
            FiberError::Raised(fault) => {
                assert_eq!(fault.message(), "backend exploded");
                let origin = fault.origin().expect("raised() records an origin");
                assert!(origin.file.ends_with("error.rs"));
            }
            other => panic!("expected Raised, got {:?}", other),
        }
    }

    #[test]
    fn raised_compares_by_identity() {
        let error = FiberError::raised("boom");
        assert_eq!(error, error.clone());
        assert_ne!(error, FiberError::raised("boom"));
    }

    #[test]
    fn fault_without_origin_displays_bare() {
        assert_eq!(Fault::new("boom").to_string(), "boom");
    }
}
