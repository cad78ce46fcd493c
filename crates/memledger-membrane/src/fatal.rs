//! Process-ending failures.
//!
//! Running out of memory and broken bookkeeping invariants are not
//! recoverable for a simulation: there is no null-return contract. Under the
//! default [`FatalPolicy::Abort`] the tracker logs the error and aborts the
//! process. [`FatalPolicy::Return`] exists so tests can observe the error.

use serde::Serialize;
use thiserror::Error;

use crate::site::Site;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FatalError {
    #[error("out of memory at {site}: requested {requested} bytes with {current} bytes outstanding")]
    OutOfMemory {
        site: Site,
        requested: usize,
        current: usize,
    },
    #[error("invariant violation at {site}: {what}")]
    InvariantViolation { site: Site, what: String },
}

impl FatalError {
    pub(crate) fn invariant(site: Site, what: impl Into<String>) -> Self {
        Self::InvariantViolation {
            site,
            what: what.into(),
        }
    }

    #[must_use]
    pub fn site(&self) -> Site {
        match self {
            Self::OutOfMemory { site, .. } | Self::InvariantViolation { site, .. } => *site,
        }
    }

    /// Stable event name used in the journal.
    #[must_use]
    pub const fn event(&self) -> &'static str {
        match self {
            Self::OutOfMemory { .. } => "out_of_memory",
            Self::InvariantViolation { .. } => "invariant_violation",
        }
    }
}

/// What the tracker does after logging a [`FatalError`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FatalPolicy {
    /// Flush the journal, print to stderr and abort.
    #[default]
    Abort,
    /// Hand the error back as `Err`. For tests only.
    Return,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_site_and_sizes() {
        let err = FatalError::OutOfMemory {
            site: Site::new("grid.rs", "solver::grid", 40),
            requested: 4096,
            current: 128,
        };
        assert_eq!(
            err.to_string(),
            "out of memory at grid.rs:40 (solver::grid): requested 4096 bytes with 128 bytes outstanding"
        );
        assert_eq!(err.event(), "out_of_memory");
        assert_eq!(err.site().line, 40);
    }

    #[test]
    fn abort_is_the_default() {
        assert_eq!(FatalPolicy::default(), FatalPolicy::Abort);
    }
}
