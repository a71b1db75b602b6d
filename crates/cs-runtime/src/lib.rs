#![forbid(unsafe_code)]

//! Process-lifetime memoization for pure pipeline stages.
//!
//! Results are keyed by `(session, function, argument fingerprint)`. An entry
//! is created the first time its key computes successfully and is never
//! evicted. Each key has its own slot lock, so at most one caller computes a
//! key while callers of other keys proceed.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("cannot fingerprint arguments: {0}")]
    Fingerprint(#[from] serde_json::Error),
}

/// SHA-256 content digest of a function's arguments.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    #[must_use]
    pub fn of_bytes(bytes: &[u8]) -> Self {
        FingerprintBuilder::new().bytes(bytes).finish()
    }

    pub fn of_serialized<T: Serialize + ?Sized>(value: &T) -> Result<Self, RuntimeError> {
        Ok(FingerprintBuilder::new().serialized(value)?.finish())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({self})")
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// Incremental fingerprint over several arguments. Every part is length
/// prefixed, so `("ab", "c")` and `("a", "bc")` differ.
#[derive(Clone, Default)]
pub struct FingerprintBuilder {
    hasher: Sha256,
}

impl FingerprintBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn bytes(mut self, bytes: &[u8]) -> Self {
        self.hasher.update((bytes.len() as u64).to_le_bytes());
        self.hasher.update(bytes);
        self
    }

    pub fn serialized<T: Serialize + ?Sized>(self, value: &T) -> Result<Self, RuntimeError> {
        let encoded = serde_json::to_vec(value)?;
        Ok(self.bytes(&encoded))
    }

    #[must_use]
    pub fn finish(self) -> Fingerprint {
        let digest = self.hasher.finalize();
        let mut out = [0_u8; 32];
        out.copy_from_slice(&digest);
        Fingerprint(out)
    }
}

/// Cache namespace. Sessions never see each other's entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(u64);

static NEXT_SESSION: AtomicU64 = AtomicU64::new(1);

impl SessionId {
    /// Namespace shared by callers that do not partition the cache.
    pub const SHARED: Self = Self(0);

    /// A namespace unused by any other session in this process.
    #[must_use]
    pub fn fresh() -> Self {
        Self(NEXT_SESSION.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub namespace: SessionId,
    pub function: &'static str,
    pub args: Fingerprint,
}

impl CacheKey {
    #[must_use]
    pub fn new(namespace: SessionId, function: &'static str, args: Fingerprint) -> Self {
        Self {
            namespace,
            function,
            args,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MemoStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

type Slot<V> = Arc<Mutex<Option<V>>>;

/// Key-value cache of computed results. `V` is usually an `Arc` so that hits
/// are cheap clones.
#[derive(Debug)]
pub struct MemoCache<V> {
    slots: Mutex<HashMap<CacheKey, Slot<V>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<V> Default for MemoCache<V> {
    fn default() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }
}

impl<V: Clone> MemoCache<V> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the stored value for `key`, or run `compute`, store its result
    /// and return it. Errors are returned as-is and nothing is stored, so the
    /// next call for the key computes again.
    pub fn get_or_try_compute<E, F>(&self, key: CacheKey, compute: F) -> Result<V, E>
    where
        F: FnOnce() -> Result<V, E>,
    {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(slots.entry(key).or_default())
        };

        let mut guard = slot.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(value) = guard.as_ref() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            #[cfg(feature = "tracing")]
            tracing::debug!(function = key.function, namespace = %key.namespace, "memo hit");
            return Ok(value.clone());
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        #[cfg(feature = "tracing")]
        tracing::debug!(function = key.function, namespace = %key.namespace, "memo miss");

        let value = compute()?;
        *guard = Some(value.clone());
        Ok(value)
    }

    /// Number of keys holding a stored value.
    #[must_use]
    pub fn len(&self) -> usize {
        // Snapshot the slots first: a slot may be held by a running compute
        // that itself needs the map lock.
        let slots = {
            let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            slots.values().map(Arc::clone).collect::<Vec<_>>()
        };
        slots
            .iter()
            .filter(|slot| {
                slot.lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .is_some()
            })
            .count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn stats(&self) -> MemoStats {
        MemoStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.len(),
        }
    }
}
