//! Non-reentrancy lock for the engine's mutating entry points.

use std::sync::atomic::{AtomicBool, Ordering};

use vault_engine_core::{Result, VaultError};

/// Held for the duration of one mutating entry point. Released on drop,
/// including on early returns and panics.
#[derive(Debug)]
pub struct EntryGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> EntryGuard<'a> {
    /// # Errors
    ///
    /// Returns `ReentrantCall` if another entry point holds the lock.
    pub fn acquire(flag: &'a AtomicBool, operation: &'static str) -> Result<Self> {
        flag.compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .map_err(|_| VaultError::ReentrantCall { operation })?;
        Ok(Self { flag })
    }
}

impl Drop for EntryGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}
