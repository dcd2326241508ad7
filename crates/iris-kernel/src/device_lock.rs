//! [`DeviceLock`] – exclusive access to device configuration.
//!
//! Session wiring, torch changes and an outstanding still capture all
//! reconfigure the camera and must not overlap.  The lock never waits.
//! [`DeviceLock::try_acquire`] either hands out a guard or reports who holds
//! it, so a torch request during reconfiguration fails immediately instead of
//! stalling its caller.  The guard is `'static` and can travel with an
//! asynchronous completion.

use std::sync::{Arc, Mutex, PoisonError};

use iris_types::DeviceError;
use tracing::trace;

/// Cloneable handle; all clones guard the same device.
#[derive(Debug, Clone, Default)]
pub struct DeviceLock {
    holder: Arc<Mutex<Option<&'static str>>>,
}

impl DeviceLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the lock for `holder`, or fail with
    /// [`DeviceError::ConfigurationLocked`] naming the current holder.
    pub fn try_acquire(&self, holder: &'static str) -> Result<DeviceLockGuard, DeviceError> {
        let mut slot = self.holder.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(current) = *slot {
            return Err(DeviceError::ConfigurationLocked {
                holder: current.to_string(),
            });
        }
        *slot = Some(holder);
        trace!(holder, "device configuration lock acquired");
        Ok(DeviceLockGuard {
            holder: Arc::clone(&self.holder),
        })
    }

    /// Who currently holds the lock, if anyone.
    pub fn holder(&self) -> Option<&'static str> {
        *self.holder.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Releases the [`DeviceLock`] on drop.
#[derive(Debug)]
pub struct DeviceLockGuard {
    holder: Arc<Mutex<Option<&'static str>>>,
}

impl Drop for DeviceLockGuard {
    fn drop(&mut self) {
        let released = self
            .holder
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        trace!(holder = ?released, "device configuration lock released");
    }
}
