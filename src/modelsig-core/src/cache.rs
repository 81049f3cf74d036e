//! In-process cache of issued verification tokens.
//!
//! Entries are keyed by (model id, user fingerprint) and reused until the
//! expiry computed from the server's `created_at` + `expires_in`. Nothing is
//! persisted; a restart starts empty.
//!
//! ## Concurrency
//!
//! Each key owns a slot with its own lock. A miss holds the slot lock while
//! the token is created, so concurrent callers for the same key wait and then
//! reuse the fresh token instead of issuing duplicate creates. Different keys
//! never block each other beyond the brief map lookup.
//!
//! Slots leave the map when a create fails, when their token expires, and on
//! [`invalidate`](VerificationCache::invalidate) or
//! [`clear`](VerificationCache::clear). A caller that locks a slot after it
//! left the map starts over with the current one.
//!
//! Lock order is slot, then map. Code holding the map lock only ever
//! `try_lock`s a slot.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};

use chrono::{DateTime, Utc};
use tracing::{debug, trace};

use crate::error::ModelSigError;
use crate::types::VerificationResponse;

/// Cache key: one fingerprint may hold tokens for several models.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// Model id.
    pub model_id: String,
    /// User fingerprint.
    pub fingerprint: String,
}

impl CacheKey {
    /// Build a key.
    pub fn new(model_id: impl Into<String>, fingerprint: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            fingerprint: fingerprint.into(),
        }
    }
}

type Slot = Arc<Mutex<Option<VerificationResponse>>>;

/// Token cache with per-key creation locking.
#[derive(Default)]
pub struct VerificationCache {
    slots: Mutex<HashMap<CacheKey, Slot>>,
}

impl VerificationCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Return a cached token for `key` if it is unexpired.
    pub fn get(&self, key: &CacheKey) -> Option<VerificationResponse> {
        let slot = self.slots().get(key).cloned()?;
        let entry = lock(&slot);
        entry
            .as_ref()
            .filter(|cached| !cached.is_expired_at(Utc::now()))
            .cloned()
    }

    /// Return the cached token for `key`, or call `create` and cache the result.
    ///
    /// `create` runs while the key's slot is locked. Its error is returned
    /// unchanged and leaves nothing cached for `key`.
    pub fn get_or_create<F>(&self, key: CacheKey, create: F) -> Result<VerificationResponse, ModelSigError>
    where
        F: FnOnce() -> Result<VerificationResponse, ModelSigError>,
    {
        self.get_or_create_at(key, Utc::now(), create)
    }

    /// As [`get_or_create`](Self::get_or_create), judging expiry at `now`.
    pub fn get_or_create_at<F>(
        &self,
        key: CacheKey,
        now: DateTime<Utc>,
        create: F,
    ) -> Result<VerificationResponse, ModelSigError>
    where
        F: FnOnce() -> Result<VerificationResponse, ModelSigError>,
    {
        loop {
            let slot = self.slot(&key);
            let mut entry = lock(&slot);
            if !self.is_attached(&key, &slot) {
                trace!(model_id = %key.model_id, "Cache: slot detached, retrying");
                continue;
            }

            if let Some(cached) = entry.as_ref() {
                if !cached.is_expired_at(now) {
                    trace!(model_id = %key.model_id, "Cache: hit");
                    return Ok(cached.clone());
                }
                debug!(model_id = %key.model_id, "Cache: entry expired");
            }
            *entry = None;

            return match create() {
                Ok(created) => {
                    debug!(
                        model_id = %key.model_id,
                        expires_in = created.expires_in,
                        has_created_at = created.created_at.is_some(),
                        "Cache: stored new verification"
                    );
                    *entry = Some(created.clone());
                    drop(entry);
                    self.purge_expired_at(now);
                    Ok(created)
                },
                Err(e) => {
                    self.detach(&key, &slot);
                    Err(e)
                },
            };
        }
    }

    /// Store a token, replacing any entry for `key`.
    pub fn insert(&self, key: CacheKey, response: VerificationResponse) {
        loop {
            let slot = self.slot(&key);
            let mut entry = lock(&slot);
            if self.is_attached(&key, &slot) {
                *entry = Some(response);
                return;
            }
        }
    }

    /// Drop the entry for a key.
    ///
    /// Waits for an in-flight create on the same key. That create's token is
    /// still returned to its caller but is not kept.
    pub fn invalidate(&self, key: &CacheKey) {
        let slot = match self.slots().get(key).cloned() {
            Some(slot) => slot,
            None => return,
        };
        let mut entry = lock(&slot);
        *entry = None;
        self.detach(key, &slot);
    }

    /// Drop every entry, waiting for in-flight creates as
    /// [`invalidate`](Self::invalidate) does.
    pub fn clear(&self) {
        let keys: Vec<CacheKey> = self.slots().keys().cloned().collect();
        for key in &keys {
            self.invalidate(key);
        }
    }

    /// Remove every idle entry that has expired. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        self.purge_expired_at(Utc::now())
    }

    /// As [`purge_expired`](Self::purge_expired), judging expiry at `now`.
    pub fn purge_expired_at(&self, now: DateTime<Utc>) -> usize {
        let mut slots = self.slots();
        let before = slots.len();
        // busy slots are mid-create and stay
        slots.retain(|_, slot| match slot.try_lock() {
            Ok(entry) => is_fresh(&entry, now),
            Err(TryLockError::Poisoned(poisoned)) => is_fresh(&poisoned.into_inner(), now),
            Err(TryLockError::WouldBlock) => true,
        });
        let removed = before - slots.len();
        if removed > 0 {
            debug!(removed, "Cache: purged expired entries");
        }
        removed
    }

    /// Number of unexpired tokens.
    pub fn len(&self) -> usize {
        let now = Utc::now();
        let slots: Vec<Slot> = self.slots().values().cloned().collect();
        slots.iter().filter(|slot| is_fresh(&lock(slot), now)).count()
    }

    /// Whether no unexpired token is cached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<CacheKey, Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn slot(&self, key: &CacheKey) -> Slot {
        self.slots().entry(key.clone()).or_default().clone()
    }

    fn is_attached(&self, key: &CacheKey, slot: &Slot) -> bool {
        self.slots()
            .get(key)
            .is_some_and(|current| Arc::ptr_eq(current, slot))
    }

    fn detach(&self, key: &CacheKey, slot: &Slot) {
        let mut slots = self.slots();
        if slots.get(key).is_some_and(|current| Arc::ptr_eq(current, slot)) {
            slots.remove(key);
        }
    }
}

fn lock(slot: &Slot) -> MutexGuard<'_, Option<VerificationResponse>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

fn is_fresh(entry: &Option<VerificationResponse>, now: DateTime<Utc>) -> bool {
    entry.as_ref().is_some_and(|cached| !cached.is_expired_at(now))
}
