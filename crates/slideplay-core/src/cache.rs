//! Source cache and lifecycle manager
//!
//! Owns the binding between a logical (scope, id) slot and a physical media
//! element's source. Entries are reference counted; an entry whose count
//! drops to zero is kept for a grace window so fast re-scrolls reattach
//! without refetching, then disposed by a timer.
//!
//! The reference count is only ever incremented or decremented (floored at
//! zero), never assigned, so re-entrant attach/detach pairs cannot corrupt it.

use crate::{
    config::CacheConfig,
    media::{ElementId, MediaElement, StreamEngine, StreamHandle},
    resolver::{detect_manifest_type, SourceResolver},
    types::{MediaSource, SessionKey},
    Error, Result,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Weak};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

/// Pending disposal of an unreferenced entry
#[derive(Debug)]
struct DisposalTimer {
    generation: u64,
    handle: JoinHandle<()>,
}

impl DisposalTimer {
    fn cancel(self) {
        self.handle.abort();
    }
}

/// Cached source for one slot
struct SourceEntry {
    resolved_url: String,
    stream: Option<Box<dyn StreamHandle>>,
    /// Element the stream handle is currently attached to
    stream_media: Option<ElementId>,
    ref_count: usize,
    /// Insertion order, for oldest-first eviction
    seq: u64,
    disposal: Option<DisposalTimer>,
}

impl SourceEntry {
    /// Whether `media` is already bound to this entry's source
    fn is_bound(&self, media: &dyn MediaElement) -> bool {
        match self.stream {
            Some(_) => {
                self.stream_media == Some(media.element_id()) && media.src().is_some()
            }
            None => media.src().as_deref() == Some(self.resolved_url.as_str()),
        }
    }

    /// Point `media` at this entry's source
    fn bind(&mut self, media: &dyn MediaElement) -> Result<()> {
        match self.stream.as_mut() {
            Some(stream) => {
                stream.attach_media(media)?;
                self.stream_media = Some(media.element_id());
            }
            None => media.set_src(Some(&self.resolved_url)),
        }
        Ok(())
    }

    fn cancel_disposal(&mut self) {
        if let Some(timer) = self.disposal.take() {
            timer.cancel();
        }
    }
}

impl Drop for SourceEntry {
    fn drop(&mut self) {
        self.cancel_disposal();
        // Stream handles hold native buffers; never leave them to the host GC
        if let Some(mut stream) = self.stream.take() {
            stream.destroy();
        }
    }
}

/// Public view of an entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryInfo {
    pub resolved_url: String,
    pub ref_count: usize,
    pub has_stream: bool,
    pub disposal_pending: bool,
}

/// Cache statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub entries: usize,
    /// Entries with a non-zero reference count
    pub attached: usize,
    pub pending_disposal: usize,
    pub stream_handles: usize,
    pub evictions: u64,
    pub disposals: u64,
}

#[derive(Default)]
struct CacheInner {
    entries: HashMap<SessionKey, SourceEntry>,
    /// Insertion order of live entries
    order: BTreeMap<u64, SessionKey>,
    next_seq: u64,
    next_generation: u64,
    evictions: u64,
    disposals: u64,
}

impl CacheInner {
    fn remove(&mut self, key: &SessionKey) -> Option<SourceEntry> {
        let entry = self.entries.remove(key)?;
        self.order.remove(&entry.seq);
        Some(entry)
    }

    /// Called by a disposal timer once its grace window elapsed
    fn dispose_if_idle(&mut self, key: &SessionKey, generation: u64) {
        let idle = match self.entries.get_mut(key) {
            Some(entry) => {
                let current = entry.disposal.as_ref().map(|t| t.generation) == Some(generation);
                if current {
                    // Our own task: dropping the handle detaches it
                    entry.disposal = None;
                }
                current && entry.ref_count == 0
            }
            None => false,
        };

        if idle {
            self.remove(key);
            self.disposals += 1;
            info!(%key, "Idle source disposed");
        }
    }

    /// Evict unreferenced entries until within capacity.
    ///
    /// Entries without a pending timer go first, oldest first; then
    /// unreferenced entries still inside their grace window.
    fn evict_to_capacity(&mut self, capacity: usize, keep: &SessionKey) {
        while self.entries.len() > capacity {
            let candidate = |pending_ok: bool| {
                self.order
                    .values()
                    .find(|key| {
                        *key != keep
                            && self.entries.get(*key).is_some_and(|e| {
                                e.ref_count == 0 && (pending_ok || e.disposal.is_none())
                            })
                    })
                    .cloned()
            };

            let Some(victim) = candidate(false).or_else(|| candidate(true)) else {
                warn!(
                    entries = self.entries.len(),
                    capacity, "Cache over capacity with every entry referenced"
                );
                break;
            };

            self.remove(&victim);
            self.evictions += 1;
            debug!(key = %victim, "Evicted source entry");
        }
    }
}

/// Reference-counted source cache
pub struct SourceCache {
    inner: Arc<Mutex<CacheInner>>,
    config: CacheConfig,
    resolver: Arc<SourceResolver>,
    streams: Arc<dyn StreamEngine>,
}

impl SourceCache {
    pub fn new(
        config: CacheConfig,
        resolver: Arc<SourceResolver>,
        streams: Arc<dyn StreamEngine>,
    ) -> Self {
        Self {
            inner: Arc::new(Mutex::new(CacheInner::default())),
            config,
            resolver,
            streams,
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn resolver(&self) -> &SourceResolver {
        &self.resolver
    }

    /// Resolve a source and build a new entry, starting the manifest fetch
    /// for adaptive sources
    fn create_entry(&self, key: &SessionKey, src: &MediaSource, seq: u64) -> Result<SourceEntry> {
        let resolved_url = self
            .resolver
            .resolve(src)
            .ok_or_else(|| Error::NoSource { key: key.to_string() })?;

        let stream = match detect_manifest_type(&resolved_url) {
            Some(manifest) if self.streams.is_supported() => {
                let mut handle = self.streams.create(&self.config.stream)?;
                if let Err(e) = handle.load_source(&resolved_url) {
                    handle.destroy();
                    return Err(e);
                }
                debug!(%key, ?manifest, "Adaptive stream created");
                Some(handle)
            }
            Some(manifest) => {
                warn!(%key, ?manifest, "No stream engine support, using native playback");
                None
            }
            None => None,
        };

        info!(%key, url = %resolved_url, adaptive = stream.is_some(), "Source entry created");

        Ok(SourceEntry {
            resolved_url,
            stream,
            stream_media: None,
            ref_count: 0,
            seq,
            disposal: None,
        })
    }

    /// Get or create the entry for `key`. Returns whether it was created.
    fn ensure_entry(
        &self,
        inner: &mut CacheInner,
        key: &SessionKey,
        src: &MediaSource,
    ) -> Result<bool> {
        if inner.entries.contains_key(key) {
            return Ok(false);
        }

        let seq = inner.next_seq;
        let entry = self.create_entry(key, src, seq)?;
        inner.next_seq += 1;
        inner.order.insert(seq, key.clone());
        inner.entries.insert(key.clone(), entry);
        inner.evict_to_capacity(self.config.capacity, key);
        Ok(true)
    }

    /// Start (or restart) the grace-window timer for an unreferenced entry.
    /// A zero grace window keeps the entry until eviction.
    fn arm_disposal(&self, inner: &mut CacheInner, key: &SessionKey) {
        let generation = inner.next_generation;
        inner.next_generation += 1;

        let Some(entry) = inner.entries.get_mut(key) else {
            return;
        };
        entry.cancel_disposal();

        let delay = self.config.dispose_after(key.scope);
        if delay.is_zero() {
            debug!(%key, "Idle entry kept until evicted");
            return;
        }
        let weak: Weak<Mutex<CacheInner>> = Arc::downgrade(&self.inner);
        let task_key = key.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(inner) = weak.upgrade() {
                inner.lock().await.dispose_if_idle(&task_key, generation);
            }
        });

        entry.disposal = Some(DisposalTimer { generation, handle });
        debug!(%key, delay_ms = delay.as_millis() as u64, "Disposal armed");
    }

    /// Prime a source without claiming it. The entry is reclaimed after the
    /// grace window unless something attaches to it.
    #[instrument(skip(self, src))]
    pub async fn preload(&self, key: &SessionKey, src: &MediaSource) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let created = self.ensure_entry(&mut inner, key, src)?;

        let needs_timer = inner
            .entries
            .get(key)
            .is_some_and(|e| e.ref_count == 0 && (created || e.disposal.is_none()));
        if needs_timer {
            self.arm_disposal(&mut inner, key);
        }
        Ok(())
    }

    /// Claim the source for `key` and bind `media` to it.
    ///
    /// Attaching an element that is already bound to this entry's source is
    /// a no-op while the entry is claimed. Reattaching it to an unreferenced
    /// entry only takes the reference back.
    #[instrument(skip(self, media, src), fields(element = %media.element_id()))]
    pub async fn attach(
        &self,
        media: &dyn MediaElement,
        key: &SessionKey,
        src: &MediaSource,
    ) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let created = self.ensure_entry(&mut inner, key, src)?;
        let element = media.element_id();

        let entry = inner
            .entries
            .get_mut(key)
            .ok_or_else(|| Error::NoSource { key: key.to_string() })?;
        entry.cancel_disposal();

        let bound = !created && entry.is_bound(media);
        if bound && entry.ref_count > 0 {
            debug!(%key, "Element already bound, attach is a no-op");
            return Ok(());
        }

        if bound {
            // Reclaimed inside the grace window; the element still holds the source
            entry.ref_count += 1;
            debug!(%key, ref_count = entry.ref_count, "Source reattached");
            return Ok(());
        }

        if let Err(e) = entry.bind(media) {
            let idle = entry.ref_count == 0;
            warn!(%key, error = %e, "Failed to bind source");
            if idle {
                self.arm_disposal(&mut inner, key);
            }
            return Err(e);
        }
        entry.ref_count += 1;
        let ref_count = entry.ref_count;

        // The element now shows this entry's source; other entries lose their claim on it
        for (other_key, other) in inner.entries.iter_mut() {
            if other_key != key && other.stream_media == Some(element) {
                other.stream_media = None;
            }
        }

        debug!(%key, ref_count, "Source attached");
        Ok(())
    }

    /// Release one reference. At zero the entry waits out its grace window.
    ///
    /// When `media` is given and the scope releases eagerly, the element's
    /// source is cleared so the decoder is freed right away.
    #[instrument(skip(self, media))]
    pub async fn detach(&self, key: &SessionKey, media: Option<&dyn MediaElement>) {
        let mut inner = self.inner.lock().await;
        let policy = self.config.policy(key.scope);

        let Some(entry) = inner.entries.get_mut(key) else {
            debug!(%key, "Detach for unknown entry");
            return;
        };

        entry.ref_count = entry.ref_count.saturating_sub(1);
        let idle = entry.ref_count == 0;

        if let Some(media) = media {
            if policy.release_on_detach {
                if entry.stream_media == Some(media.element_id()) {
                    entry.stream_media = None;
                }
                media.pause();
                media.set_src(None);
                media.load();
                debug!(%key, "Element source released");
            }
        }

        debug!(%key, ref_count = entry.ref_count, "Source detached");
        if idle {
            self.arm_disposal(&mut inner, key);
        }
    }

    /// Destroy the entry immediately regardless of its reference count
    #[instrument(skip(self))]
    pub async fn reset(&self, key: &SessionKey) {
        let mut inner = self.inner.lock().await;
        if let Some(entry) = inner.remove(key) {
            info!(%key, ref_count = entry.ref_count, "Source entry reset");
        }
    }

    /// Destroy every entry
    pub async fn clear(&self) {
        let mut inner = self.inner.lock().await;
        let count = inner.entries.len();
        inner.entries.clear();
        inner.order.clear();
        info!(count, "Source cache cleared");
    }

    pub async fn contains(&self, key: &SessionKey) -> bool {
        self.inner.lock().await.entries.contains_key(key)
    }

    pub async fn entry_info(&self, key: &SessionKey) -> Option<EntryInfo> {
        let inner = self.inner.lock().await;
        inner.entries.get(key).map(|e| EntryInfo {
            resolved_url: e.resolved_url.clone(),
            ref_count: e.ref_count,
            has_stream: e.stream.is_some(),
            disposal_pending: e.disposal.is_some(),
        })
    }

    pub async fn stats(&self) -> CacheStats {
        let inner = self.inner.lock().await;
        let entries = inner.entries.values();

        CacheStats {
            entries: inner.entries.len(),
            attached: entries.clone().filter(|e| e.ref_count > 0).count(),
            pending_disposal: entries.clone().filter(|e| e.disposal.is_some()).count(),
            stream_handles: entries.filter(|e| e.stream.is_some()).count(),
            evictions: inner.evictions,
            disposals: inner.disposals,
        }
    }
}

impl std::fmt::Debug for SourceCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceCache")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
