use std::ops::Deref;
use std::sync::{Mutex, MutexGuard, TryLockError};

use crate::lock;

/// Serializes access to one physical camera.
///
/// Only one enrollment or verification cycle may drain frames at a time. The
/// order in which blocked callers are served is left to the platform mutex.
pub struct CameraArbiter<T> {
    resource: T,
    gate: Mutex<()>,
}

/// Exclusive access to the arbitrated resource, released on drop.
pub struct CameraLease<'a, T> {
    resource: &'a T,
    _guard: MutexGuard<'a, ()>,
}

impl<T> CameraArbiter<T> {
    pub fn new(resource: T) -> Self {
        Self {
            resource,
            gate: Mutex::new(()),
        }
    }

    /// Block until no other lease is outstanding.
    ///
    /// A lease holder that panicked does not wedge the camera: the poisoned
    /// gate is taken over as-is.
    pub fn acquire(&self) -> CameraLease<'_, T> {
        let guard = lock(&self.gate);
        log::debug!("camera lease acquired");
        CameraLease {
            resource: &self.resource,
            _guard: guard,
        }
    }

    /// Lease the camera only if it is free right now.
    pub fn try_acquire(&self) -> Option<CameraLease<'_, T>> {
        let guard = match self.gate.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => return None,
        };
        Some(CameraLease {
            resource: &self.resource,
            _guard: guard,
        })
    }

    /// Borrow the resource without arbitration, for status checks that do
    /// not consume frames.
    pub fn peek(&self) -> &T {
        &self.resource
    }

    pub fn into_inner(self) -> T {
        self.resource
    }
}

impl<T> Deref for CameraLease<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.resource
    }
}

impl<T> Drop for CameraLease<'_, T> {
    fn drop(&mut self) {
        log::debug!("camera lease released");
    }
}
