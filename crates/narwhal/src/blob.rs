//! Transient binary-object locators.
//!
//! Payloads handed to the image loader and encoded results handed to the file saver live in a
//! [`BlobStore`] and are addressed by a [`BlobUrl`]. Every locator must be revoked exactly once:
//! either when the load that consumed it settles ([`BlobGuard`]) or after a bounded delay
//! following a save ([`BlobStore::revoke_after`]). A delayed revocation is enforced by a detached
//! timer thread at its deadline, and expired entries are also swept on every store operation.

use crate::error::RasterError;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BlobUrl(String);

impl BlobUrl {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BlobUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone)]
pub struct Blob {
    pub bytes: Arc<[u8]>,
    pub mime: String,
}

#[derive(Debug)]
struct Entry {
    blob: Blob,
    revoke_at: Option<Instant>,
}

#[derive(Debug, Default)]
struct Inner {
    next_id: u64,
    entries: HashMap<BlobUrl, Entry>,
    created: u64,
    revoked: u64,
}

impl Inner {
    fn sweep(&mut self, now: Instant) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, e| e.revoke_at.is_none_or(|deadline| deadline > now));
        let swept = before - self.entries.len();
        self.revoked += swept as u64;
        swept
    }
}

/// Counters for leak checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlobStats {
    pub created: u64,
    pub revoked: u64,
    pub live: usize,
    /// Live locators with a scheduled revocation.
    pub pending: usize,
}

#[derive(Debug, Default)]
pub struct BlobStore {
    inner: Arc<Mutex<Inner>>,
}

impl BlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&self, bytes: Vec<u8>, mime: &str) -> BlobUrl {
        let mut inner = self.inner.lock();
        inner.sweep(Instant::now());
        inner.next_id += 1;
        let url = BlobUrl(format!("blob:narwhal/{}", inner.next_id));
        inner.entries.insert(
            url.clone(),
            Entry {
                blob: Blob {
                    bytes: bytes.into(),
                    mime: mime.to_string(),
                },
                revoke_at: None,
            },
        );
        inner.created += 1;
        url
    }

    /// Creates a locator that is revoked when the returned guard is released or dropped.
    pub fn acquire(&self, bytes: Vec<u8>, mime: &str) -> BlobGuard<'_> {
        BlobGuard {
            store: self,
            url: self.create(bytes, mime),
            released: false,
        }
    }

    pub fn read(&self, url: &BlobUrl) -> Result<Blob, RasterError> {
        let mut inner = self.inner.lock();
        inner.sweep(Instant::now());
        inner
            .entries
            .get(url)
            .map(|e| e.blob.clone())
            .ok_or_else(|| RasterError::UnknownLocator {
                url: url.to_string(),
            })
    }

    /// Revokes immediately. Returns `false` if the locator was already gone.
    pub fn revoke(&self, url: &BlobUrl) -> bool {
        let mut inner = self.inner.lock();
        inner.sweep(Instant::now());
        let removed = inner.entries.remove(url).is_some();
        if removed {
            inner.revoked += 1;
        }
        removed
    }

    /// Schedules revocation once `delay` has elapsed, so an in-flight save is not cut short.
    pub fn revoke_after(&self, url: &BlobUrl, delay: Duration) -> bool {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        inner.sweep(now);
        let Some(entry) = inner.entries.get_mut(url) else {
            return false;
        };
        entry.revoke_at = Some(now + delay);
        if delay.is_zero() {
            inner.sweep(now);
        } else {
            drop(inner);
            spawn_release_timer(Arc::downgrade(&self.inner), delay);
        }
        true
    }

    /// Revokes every locator whose scheduled delay has elapsed.
    pub fn sweep_expired(&self) -> usize {
        self.inner.lock().sweep(Instant::now())
    }

    /// Revokes everything, scheduled or not.
    pub fn revoke_all(&self) -> usize {
        let mut inner = self.inner.lock();
        let n = inner.entries.len();
        inner.entries.clear();
        inner.revoked += n as u64;
        n
    }

    pub fn is_live(&self, url: &BlobUrl) -> bool {
        let mut inner = self.inner.lock();
        inner.sweep(Instant::now());
        inner.entries.contains_key(url)
    }

    pub fn stats(&self) -> BlobStats {
        let mut inner = self.inner.lock();
        inner.sweep(Instant::now());
        BlobStats {
            created: inner.created,
            revoked: inner.revoked,
            live: inner.entries.len(),
            pending: inner
                .entries
                .values()
                .filter(|e| e.revoke_at.is_some())
                .count(),
        }
    }
}

/// Sweeps the store once `delay` has passed. The timer holds only a weak handle, so a dropped
/// store ends it without effect.
fn spawn_release_timer(inner: Weak<Mutex<Inner>>, delay: Duration) {
    let spawned = std::thread::Builder::new()
        .name("narwhal-blob-release".to_string())
        .spawn(move || {
            std::thread::sleep(delay);
            if let Some(inner) = inner.upgrade() {
                let swept = inner.lock().sweep(Instant::now());
                tracing::trace!(swept, "delayed blob release");
            }
        });
    if let Err(err) = spawned {
        tracing::warn!(error = %err, "could not start blob release timer; release waits for the next store call");
    }
}

/// Scoped ownership of one locator.
#[derive(Debug)]
pub struct BlobGuard<'a> {
    store: &'a BlobStore,
    url: BlobUrl,
    released: bool,
}

impl BlobGuard<'_> {
    pub fn url(&self) -> &BlobUrl {
        &self.url
    }

    pub fn release(mut self) -> bool {
        self.released = true;
        self.store.revoke(&self.url)
    }
}

impl Drop for BlobGuard<'_> {
    fn drop(&mut self) {
        if !self.released {
            self.store.revoke(&self.url);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_revokes_exactly_once() {
        let store = BlobStore::new();
        let guard = store.acquire(b"<svg/>".to_vec(), "image/svg+xml");
        let url = guard.url().clone();
        assert!(store.is_live(&url));
        assert!(guard.release());
        assert!(!store.is_live(&url));
        assert!(!store.revoke(&url));
        assert_eq!(
            store.stats(),
            BlobStats {
                created: 1,
                revoked: 1,
                live: 0,
                pending: 0
            }
        );
    }

    #[test]
    fn dropped_guard_revokes() {
        let store = BlobStore::new();
        let url = {
            let guard = store.acquire(vec![1, 2, 3], "application/octet-stream");
            assert_eq!(&*store.read(guard.url()).unwrap().bytes, &[1, 2, 3]);
            guard.url().clone()
        };
        assert!(!store.is_live(&url));
        assert!(matches!(
            store.read(&url),
            Err(RasterError::UnknownLocator { .. })
        ));
    }

    #[test]
    fn delayed_revocation_is_swept_after_deadline() {
        let store = BlobStore::new();
        let url = store.create(vec![0], "image/png");
        assert!(store.revoke_after(&url, Duration::from_millis(20)));
        assert_eq!(store.stats().pending, 1);
        assert!(store.is_live(&url));
        std::thread::sleep(Duration::from_millis(40));
        assert!(!store.is_live(&url));
        assert_eq!(store.stats().revoked, 1);
    }

    #[test]
    fn delayed_revocation_happens_on_an_idle_store() {
        let store = BlobStore::new();
        let url = store.create(vec![0], "image/png");
        assert!(store.revoke_after(&url, Duration::from_millis(10)));

        // Poll the entries directly: `is_live` and `stats` would sweep on their own.
        let deadline = Instant::now() + Duration::from_secs(5);
        while store.inner.lock().entries.contains_key(&url) {
            assert!(Instant::now() < deadline, "timer never released {url}");
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(store.inner.lock().revoked, 1);
    }

    #[test]
    fn zero_delay_revokes_immediately() {
        let store = BlobStore::new();
        let url = store.create(vec![0], "image/png");
        assert!(store.revoke_after(&url, Duration::ZERO));
        assert!(!store.is_live(&url));
        assert!(!store.revoke_after(&url, Duration::ZERO));
    }
}
