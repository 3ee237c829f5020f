//! # Job Locks
//!
//! Advisory, time-limited locks that keep two cleanup runs from overlapping.
//! A holder must refresh its lock before the TTL elapses; once it expires
//! anyone may take it, and the old holder's refresh fails with
//! [`ArborError::LockLost`], which stops the run.

use crate::clock::Clock;
use crate::ArborError;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::warn;

/// Proof of lock ownership.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockToken(String);

impl LockToken {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Lock service used by the cleanup workers.
pub trait JobLockService: Send + Sync {
    /// Take the lock, failing with `LockUnavailable` if someone holds it.
    fn acquire(&self, key: &str, ttl_ms: u64) -> Result<LockToken, ArborError>;

    /// Extend the lock, failing with `LockLost` if it is no longer ours.
    fn refresh(&self, token: &LockToken, key: &str, ttl_ms: u64) -> Result<(), ArborError>;

    /// Give the lock up. Releasing a lock that is no longer ours is a no-op.
    fn release(&self, token: &LockToken, key: &str) -> Result<(), ArborError>;
}

/// A held lock, released when dropped.
pub struct HeldLock<'a> {
    service: &'a dyn JobLockService,
    key: String,
    token: LockToken,
    ttl_ms: u64,
}

impl std::fmt::Debug for HeldLock<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeldLock")
            .field("key", &self.key)
            .field("ttl_ms", &self.ttl_ms)
            .finish_non_exhaustive()
    }
}

impl<'a> HeldLock<'a> {
    pub fn acquire(
        service: &'a dyn JobLockService,
        key: &str,
        ttl_ms: u64,
    ) -> Result<Self, ArborError> {
        let token = service.acquire(key, ttl_ms)?;
        Ok(Self {
            service,
            key: key.to_string(),
            token,
            ttl_ms,
        })
    }

    /// Heartbeat: extend the lease by another TTL.
    pub fn refresh(&self) -> Result<(), ArborError> {
        self.service.refresh(&self.token, &self.key, self.ttl_ms)
    }
}

impl Drop for HeldLock<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.service.release(&self.token, &self.key) {
            warn!(key = %self.key, error = %e, "failed to release job lock");
        }
    }
}

#[derive(Debug)]
struct Lease {
    token: LockToken,
    expires_at_ms: i64,
}

/// In-process lock service with TTLs measured on the injected clock.
pub struct InMemoryJobLockService {
    clock: Arc<dyn Clock>,
    leases: Mutex<HashMap<String, Lease>>,
}

impl std::fmt::Debug for InMemoryJobLockService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryJobLockService").finish_non_exhaustive()
    }
}

impl InMemoryJobLockService {
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            leases: Mutex::new(HashMap::new()),
        }
    }

    fn with_leases<T>(&self, f: impl FnOnce(&mut HashMap<String, Lease>) -> T) -> T {
        match self.leases.lock() {
            Ok(mut leases) => f(&mut leases),
            Err(poisoned) => f(&mut poisoned.into_inner()),
        }
    }

    fn expiry(&self, ttl_ms: u64) -> i64 {
        self.clock
            .now_ms()
            .saturating_add(i64::try_from(ttl_ms).unwrap_or(i64::MAX))
    }
}

impl JobLockService for InMemoryJobLockService {
    fn acquire(&self, key: &str, ttl_ms: u64) -> Result<LockToken, ArborError> {
        let now = self.clock.now_ms();
        let expires_at_ms = self.expiry(ttl_ms);
        self.with_leases(|leases| {
            if let Some(lease) = leases.get(key)
                && lease.expires_at_ms > now
            {
                return Err(ArborError::LockUnavailable(key.to_string()));
            }
            let token = LockToken(uuid::Uuid::new_v4().to_string());
            leases.insert(
                key.to_string(),
                Lease {
                    token: token.clone(),
                    expires_at_ms,
                },
            );
            Ok(token)
        })
    }

    fn refresh(&self, token: &LockToken, key: &str, ttl_ms: u64) -> Result<(), ArborError> {
        let now = self.clock.now_ms();
        let expires_at_ms = self.expiry(ttl_ms);
        self.with_leases(|leases| match leases.get_mut(key) {
            Some(lease) if &lease.token == token && lease.expires_at_ms > now => {
                lease.expires_at_ms = expires_at_ms;
                Ok(())
            }
            _ => Err(ArborError::LockLost(key.to_string())),
        })
    }

    fn release(&self, token: &LockToken, key: &str) -> Result<(), ArborError> {
        self.with_leases(|leases| {
            if leases.get(key).is_some_and(|lease| &lease.token == token) {
                leases.remove(key);
            }
        });
        Ok(())
    }
}
