//! Shared and process-wide tracker handles.
//!
//! A [`Tracker`] has no internal synchronization. Hosts that call it from
//! several threads go through a [`SharedTracker`], one coarse lock around
//! the whole context, or through the single process-wide slot in this
//! module.

use std::sync::Arc;

use parking_lot::{Mutex, const_mutex};
use thiserror::Error;

use crate::bulk::{BulkAllocator, LibcBulk};
use crate::leaks::TeardownSummary;
use crate::tracker::Tracker;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SharedError {
    #[error("a process-wide tracker is already installed")]
    AlreadyInstalled,
    #[error("no process-wide tracker is installed")]
    NotInstalled,
    #[error("tracker has been torn down")]
    TornDown,
}

/// Cloneable handle to one tracker behind a mutex.
pub struct SharedTracker<B: BulkAllocator = LibcBulk> {
    inner: Arc<Mutex<Option<Tracker<B>>>>,
}

impl<B: BulkAllocator> Clone for SharedTracker<B> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<B: BulkAllocator> SharedTracker<B> {
    #[must_use]
    pub fn new(tracker: Tracker<B>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Some(tracker))),
        }
    }

    /// Run `f` with exclusive access to the tracker.
    pub fn with<R>(&self, f: impl FnOnce(&mut Tracker<B>) -> R) -> Result<R, SharedError> {
        let mut guard = self.inner.lock();
        let tracker = guard.as_mut().ok_or(SharedError::TornDown)?;
        Ok(f(tracker))
    }

    /// Tear the tracker down. Every clone sees [`SharedError::TornDown`]
    /// afterwards.
    pub fn teardown(&self) -> Result<TeardownSummary, SharedError> {
        let tracker = self.inner.lock().take().ok_or(SharedError::TornDown)?;
        Ok(tracker.teardown())
    }
}

enum Slot {
    Vacant,
    Installed(Box<Tracker>),
    TornDown,
}

static GLOBAL: Mutex<Slot> = const_mutex(Slot::Vacant);

/// Install the process-wide tracker. Only one may ever be installed.
pub fn install(tracker: Tracker) -> Result<(), SharedError> {
    let mut slot = GLOBAL.lock();
    match *slot {
        Slot::Vacant => {
            *slot = Slot::Installed(Box::new(tracker));
            Ok(())
        }
        Slot::Installed(_) => Err(SharedError::AlreadyInstalled),
        Slot::TornDown => Err(SharedError::TornDown),
    }
}

/// Run `f` against the process-wide tracker.
pub fn with<R>(f: impl FnOnce(&mut Tracker) -> R) -> Result<R, SharedError> {
    let mut slot = GLOBAL.lock();
    match &mut *slot {
        Slot::Installed(tracker) => Ok(f(tracker)),
        Slot::Vacant => Err(SharedError::NotInstalled),
        Slot::TornDown => Err(SharedError::TornDown),
    }
}

/// Tear down the process-wide tracker. The slot cannot be reused.
pub fn teardown() -> Result<TeardownSummary, SharedError> {
    let mut slot = GLOBAL.lock();
    match std::mem::replace(&mut *slot, Slot::TornDown) {
        Slot::Installed(tracker) => Ok(tracker.teardown()),
        Slot::Vacant => {
            *slot = Slot::Vacant;
            Err(SharedError::NotInstalled)
        }
        Slot::TornDown => Err(SharedError::TornDown),
    }
}
