//! Buffer pool (C3): a fixed set of in-memory frames caching tablespace
//! pages, backed by the [`crate::innodb::lru::LruList`] midpoint-insertion
//! policy.
//!
//! Frames are addressed by index and guarded individually
//! ([`BufferFrame`] holds its own `RwLock<Vec<u8>>`), so a reader of one
//! page never blocks a concurrent reader or writer of another. The page
//! table (page number -> frame index) and the LRU ordering are each behind
//! their own lock, and — per the deadlock-avoidance discipline this crate
//! follows throughout — neither lock is ever held while this module calls
//! out to [`Tablespace`] I/O. A lookup takes the page-table lock just long
//! enough to read or insert a mapping, then drops it before touching disk.

use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, instrument, trace, warn};

use crate::innodb::lru::{FrameStats, LruList, DEFAULT_OLD_RATIO_PCT, PROMOTE_ACCESS_COUNT};
use crate::innodb::tablespace::Tablespace;
use crate::EngineError;

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// One cache slot. `page_no` is `None` when the frame is unoccupied.
pub struct BufferFrame {
    page_no: RwLock<Option<u32>>,
    data: RwLock<Vec<u8>>,
    dirty: AtomicBool,
    pin_count: AtomicU32,
    stats: FrameStats,
}

impl BufferFrame {
    fn empty(page_size: u32) -> Self {
        BufferFrame {
            page_no: RwLock::new(None),
            data: RwLock::new(vec![0u8; page_size as usize]),
            dirty: AtomicBool::new(false),
            pin_count: AtomicU32::new(0),
            stats: FrameStats::new(now_ms()),
        }
    }

    fn is_pinned(&self) -> bool {
        self.pin_count.load(Ordering::Acquire) > 0
    }
}

/// RAII handle to a pinned frame. The frame cannot be evicted while any
/// guard exists; dropping the guard unpins it.
pub struct BufferFrameGuard {
    pool: Arc<BufferPoolInner>,
    frame_idx: usize,
}

impl BufferFrameGuard {
    pub fn page_no(&self) -> u32 {
        let page_no: Option<u32> = *self.pool.frames[self.frame_idx].page_no.read();
        page_no.expect("pinned frame must hold a page")
    }

    pub fn read(&self) -> RwLockReadGuard<'_, Vec<u8>> {
        self.pool.frames[self.frame_idx].data.read()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, Vec<u8>> {
        self.pool.frames[self.frame_idx].dirty.store(true, Ordering::Release);
        self.pool.frames[self.frame_idx].data.write()
    }
}

impl Drop for BufferFrameGuard {
    fn drop(&mut self) {
        self.pool.frames[self.frame_idx]
            .pin_count
            .fetch_sub(1, Ordering::AcqRel);
    }
}

struct BufferPoolInner {
    frames: Vec<BufferFrame>,
    page_table: Mutex<HashMap<u32, usize>>,
    lru: LruList,
    tablespace: Mutex<Tablespace>,
    hits: AtomicU64,
    misses: AtomicU64,
}

/// The buffer pool proper: a fixed-capacity cache over one open tablespace.
#[derive(Clone)]
pub struct BufferPool {
    inner: Arc<BufferPoolInner>,
}

impl BufferPool {
    /// Build a pool with room for `capacity` pages over `tablespace`.
    pub fn new(tablespace: Tablespace, capacity: usize) -> Self {
        let page_size = tablespace.page_size();
        let frames = (0..capacity).map(|_| BufferFrame::empty(page_size)).collect();
        BufferPool {
            inner: Arc::new(BufferPoolInner {
                frames,
                page_table: Mutex::new(HashMap::with_capacity(capacity)),
                lru: LruList::new(DEFAULT_OLD_RATIO_PCT),
                tablespace: Mutex::new(tablespace),
                hits: AtomicU64::new(0),
                misses: AtomicU64::new(0),
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.inner.frames.len()
    }

    /// Number of frames currently holding a page.
    pub fn occupied(&self) -> usize {
        self.inner.page_table.lock().len()
    }

    pub fn hit_ratio(&self) -> f64 {
        let hits = self.inner.hits.load(Ordering::Relaxed) as f64;
        let misses = self.inner.misses.load(Ordering::Relaxed) as f64;
        if hits + misses == 0.0 {
            0.0
        } else {
            hits / (hits + misses)
        }
    }

    /// Pin and return `page_no`, loading it from the tablespace on a miss.
    #[instrument(skip(self))]
    pub fn get_page(&self, page_no: u32) -> Result<BufferFrameGuard, EngineError> {
        if let Some(frame_idx) = self.inner.page_table.lock().get(&page_no).copied() {
            self.inner.hits.fetch_add(1, Ordering::Relaxed);
            let frame = &self.inner.frames[frame_idx];
            frame.pin_count.fetch_add(1, Ordering::AcqRel);
            let promote = frame.stats.should_promote(now_ms());
            self.inner.lru.get(frame_idx, promote);
            trace!(page_no, frame_idx, "buffer pool hit");
            return Ok(BufferFrameGuard { pool: self.inner.clone(), frame_idx });
        }

        self.inner.misses.fetch_add(1, Ordering::Relaxed);
        let data = self.inner.tablespace.lock().load_page(page_no)?;

        let frame_idx = self.acquire_frame_for(page_no)?;
        {
            let frame = &self.inner.frames[frame_idx];
            *frame.data.write() = data;
            *frame.page_no.write() = Some(page_no);
            frame.dirty.store(false, Ordering::Release);
            frame.pin_count.fetch_add(1, Ordering::AcqRel);
            frame.stats.reset_old_since(now_ms());
        }

        // Another thread may have resolved the same miss and installed its
        // own frame for `page_no` while we were reading through the
        // tablespace and finding a frame of our own — invariant (i) allows
        // at most one resident frame per key, so re-check under the
        // page-table lock and, if we lost the race, throw away the frame we
        // just populated rather than publish a second mapping for it.
        let mut table = self.inner.page_table.lock();
        if let Some(&winner_idx) = table.get(&page_no) {
            drop(table);
            let lost = &self.inner.frames[frame_idx];
            lost.pin_count.fetch_sub(1, Ordering::AcqRel);
            *lost.page_no.write() = None;
            lost.dirty.store(false, Ordering::Release);

            let winner = &self.inner.frames[winner_idx];
            winner.pin_count.fetch_add(1, Ordering::AcqRel);
            let promote = winner.stats.should_promote(now_ms());
            self.inner.lru.get(winner_idx, promote);
            trace!(page_no, frame_idx = winner_idx, "buffer pool miss lost race to a concurrent load");
            return Ok(BufferFrameGuard { pool: self.inner.clone(), frame_idx: winner_idx });
        }
        table.insert(page_no, frame_idx);
        drop(table);
        self.inner.lru.set(frame_idx);
        debug!(page_no, frame_idx, "buffer pool miss, loaded from tablespace");
        Ok(BufferFrameGuard { pool: self.inner.clone(), frame_idx })
    }

    /// Find a frame to hold a newly loaded page: an empty one if available,
    /// otherwise evict the LRU victim. Returns [`EngineError::BufferPoolFull`]
    /// if every frame is pinned.
    fn acquire_frame_for(&self, incoming_page_no: u32) -> Result<usize, EngineError> {
        if let Some(idx) = self.inner.frames.iter().position(|f| f.page_no.read().is_none()) {
            return Ok(idx);
        }

        for _ in 0..self.inner.frames.len() {
            let Some(victim_idx) = self.inner.lru.evict() else {
                break;
            };
            let victim = &self.inner.frames[victim_idx];
            if victim.is_pinned() {
                // Can't evict a pinned frame; InnoDB would keep scanning
                // toward the MRU end. `evict` already popped it off its
                // sublist, so cycle it back into Old and let the caller's
                // next iteration pick a different victim.
                self.inner.lru.set_old(victim_idx);
                continue;
            }
            self.write_back_and_clear(victim_idx)?;
            return Ok(victim_idx);
        }

        warn!(incoming_page_no, "buffer pool exhausted, no evictable frame");
        Err(EngineError::BufferPoolFull(format!(
            "no evictable frame for page {incoming_page_no}"
        )))
    }

    /// Write back a dirty victim frame (already popped off the LRU by
    /// [`LruList::evict`]) and clear it so it can be reused for the
    /// incoming page.
    fn write_back_and_clear(&self, frame_idx: usize) -> Result<(), EngineError> {
        let frame = &self.inner.frames[frame_idx];
        let page_no_opt: Option<u32> = *frame.page_no.read();
        let page_no = page_no_opt.ok_or_else(|| {
            EngineError::BufferPoolFull("attempted to evict an empty frame".into())
        })?;
        if frame.dirty.load(Ordering::Acquire) {
            let data = frame.data.read().clone();
            self.inner.tablespace.lock().flush_page(page_no, data)?;
        }
        *frame.page_no.write() = None;
        frame.dirty.store(false, Ordering::Release);
        self.inner.page_table.lock().remove(&page_no);
        Ok(())
    }

    /// Write every dirty frame back to the tablespace.
    #[instrument(skip(self))]
    pub fn flush_all(&self) -> Result<(), EngineError> {
        for (frame_idx, frame) in self.inner.frames.iter().enumerate() {
            if !frame.dirty.load(Ordering::Acquire) {
                continue;
            }
            let Some(page_no) = *frame.page_no.read() else {
                continue;
            };
            let data = frame.data.read().clone();
            self.inner.tablespace.lock().flush_page(page_no, data)?;
            frame.dirty.store(false, Ordering::Release);
            let _ = frame_idx;
        }
        Ok(())
    }

    /// Allocate a fresh page from the tablespace's segment and return it
    /// pinned and zero-initialized, already resident in the pool.
    pub fn new_page(&self, segment: &crate::innodb::segment::Segment) -> Result<BufferFrameGuard, EngineError> {
        let page_no = segment.allocate_page(&mut self.inner.tablespace.lock())?;
        let frame_idx = self.acquire_frame_for(page_no)?;
        {
            let frame = &self.inner.frames[frame_idx];
            let blank_len = frame.data.read().len();
            *frame.data.write() = vec![0u8; blank_len];
            *frame.page_no.write() = Some(page_no);
            frame.dirty.store(true, Ordering::Release);
            frame.pin_count.fetch_add(1, Ordering::AcqRel);
            frame.stats.reset_old_since(now_ms());
        }
        self.inner.page_table.lock().insert(page_no, frame_idx);
        self.inner.lru.set(frame_idx);
        Ok(BufferFrameGuard { pool: self.inner.clone(), frame_idx })
    }

    /// Run a closure with exclusive access to the underlying tablespace
    /// (e.g. for segment creation, which needs its own I/O outside the
    /// buffer pool's page cache).
    pub fn with_tablespace<T>(&self, f: impl FnOnce(&mut Tablespace) -> T) -> T {
        f(&mut self.inner.tablespace.lock())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::innodb::tablespace::TablespaceKind;
    use tempfile::NamedTempFile;

    fn pool(capacity: usize) -> (NamedTempFile, BufferPool) {
        let tmp = NamedTempFile::new().unwrap();
        let ts = Tablespace::create(tmp.path(), 1, TablespaceKind::User).unwrap();
        (tmp, BufferPool::new(ts, capacity))
    }

    #[test]
    fn miss_then_hit() {
        let (_tmp, pool) = pool(4);
        {
            let _g = pool.get_page(0).unwrap();
        }
        assert_eq!(pool.occupied(), 1);
        {
            let _g = pool.get_page(0).unwrap();
        }
        assert!(pool.hit_ratio() > 0.0);
    }

    #[test]
    fn writes_are_marked_dirty_and_flush() {
        let (_tmp, pool) = pool(4);
        {
            let g = pool.get_page(0).unwrap();
            g.write()[100] = 0xAB;
        }
        pool.flush_all().unwrap();
        let g = pool.get_page(0).unwrap();
        assert_eq!(g.read()[100], 0xAB);
    }

    #[test]
    fn eviction_kicks_in_once_full() {
        let (_tmp, pool) = pool(2);
        let g0 = pool.get_page(0).unwrap();
        let g1 = pool.get_page(1).unwrap();
        drop(g0);
        drop(g1);
        // Both unpinned; a third distinct page should evict one of them.
        let _g2 = pool.get_page(2).unwrap();
        assert_eq!(pool.occupied(), 2);
    }

    // Invariant (i): at most one resident frame per key, even when many
    // threads race the same miss. Unlike the disjoint-range stress test
    // below, every thread here targets the exact same page, so the
    // re-check-after-load path in `get_page` is what keeps a second frame
    // from ever being published for it.
    #[test]
    fn concurrent_misses_on_the_same_page_install_only_one_frame() {
        use std::thread;

        let (_tmp, pool) = pool(8);
        let page_no = 3u32;

        let handles: Vec<_> = (0..16usize)
            .map(|_| {
                let pool = pool.clone();
                thread::spawn(move || {
                    let guard = pool.get_page(page_no).expect("get_page under contention");
                    guard.page_no()
                })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().expect("worker thread panicked"), page_no);
        }

        let resident_frames: Vec<usize> = pool
            .inner
            .frames
            .iter()
            .enumerate()
            .filter(|(_, f)| *f.page_no.read() == Some(page_no))
            .map(|(i, _)| i)
            .collect();
        assert_eq!(resident_frames.len(), 1, "at most one resident frame per key");
        assert_eq!(pool.inner.page_table.lock().get(&page_no).copied(), Some(resident_frames[0]));
    }

    #[test]
    fn fully_pinned_pool_reports_full() {
        let (_tmp, pool) = pool(1);
        let _g0 = pool.get_page(0).unwrap();
        let err = pool.get_page(1).unwrap_err();
        assert!(matches!(err, EngineError::BufferPoolFull(_)));
    }

    // Marker byte for a given (thread, page) pair, written into every page a
    // thread touches and checked back out after a round of concurrent access.
    fn marker_for(thread_id: u32, page_no: u32) -> u8 {
        ((thread_id.wrapping_mul(31)).wrapping_add(page_no)) as u8
    }

    // 50 threads x 100 ops apiece over a 1000-frame pool, each thread owning
    // a disjoint 2000-page range within a 100_000-page space. No thread ever
    // touches another thread's pages, but all 50 threads hammer the same
    // page table lock and LRU list, so this exercises exactly the contention
    // the buffer pool's locking discipline has to survive without
    // deadlocking or losing a write across eviction.
    #[test]
    fn fifty_threads_hundred_ops_each_complete_without_deadlock() {
        use std::thread;
        use std::time::{Duration, Instant};

        const THREADS: u32 = 50;
        const OPS: u32 = 100;
        const RANGE_PER_THREAD: u32 = 2000;
        const MARK_OFFSET: usize = 200;

        let tmp = NamedTempFile::new().unwrap();
        let ts = Tablespace::create(tmp.path(), 1, TablespaceKind::User).unwrap();
        let pool = BufferPool::new(ts, 1000);

        let start = Instant::now();

        let handles: Vec<_> = (0..THREADS)
            .map(|t| {
                let pool = pool.clone();
                thread::spawn(move || {
                    for i in 0..OPS {
                        let page_no = t * RANGE_PER_THREAD + (i * 37) % RANGE_PER_THREAD;
                        let guard = pool.get_page(page_no).expect("get_page under contention");
                        guard.write()[MARK_OFFSET] = marker_for(t, page_no);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().expect("buffer pool worker thread panicked");
        }
        assert!(start.elapsed() < Duration::from_secs(10), "50x100 ops must finish well under 10s");

        // Second pass: read every page back, possibly forcing fresh evictions
        // (capacity 1000 against up to 100_000 distinct pages touched), and
        // confirm each thread's own write survived eviction and reload.
        let handles: Vec<_> = (0..THREADS)
            .map(|t| {
                let pool = pool.clone();
                thread::spawn(move || {
                    for i in 0..OPS {
                        let page_no = t * RANGE_PER_THREAD + (i * 37) % RANGE_PER_THREAD;
                        let guard = pool.get_page(page_no).expect("get_page under contention");
                        assert_eq!(guard.read()[MARK_OFFSET], marker_for(t, page_no));
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().expect("buffer pool verifier thread panicked");
        }
        assert!(start.elapsed() < Duration::from_secs(10));
        assert!(pool.occupied() <= pool.capacity());
    }

    // Property 8: a small hot set of pages accessed repeatedly by many
    // threads concurrently should end up promoted into the LRU's young
    // sublist, while pages touched only once stay old. The LRU only
    // distinguishes young/old once its list has crossed the 512-entry
    // reorganization threshold (spec §4.4), so this pool has to be bigger
    // than that to exercise promotion at all.
    #[test]
    fn hot_pages_promote_to_young_under_concurrent_access() {
        use std::thread;

        let (_tmp, pool) = pool(600);

        // Warm 560 distinct cold pages, crossing the 512-entry partition
        // threshold so Young/Old actually exist.
        for page_no in 0..560u32 {
            drop(pool.get_page(page_no).unwrap());
        }
        assert!(pool.inner.lru.is_partitioned());

        let hot_pages = [557u32, 558, 559];
        let handles: Vec<_> = (0..20usize)
            .map(|_| {
                let pool = pool.clone();
                thread::spawn(move || {
                    for _ in 0..10 {
                        for &page_no in &hot_pages {
                            drop(pool.get_page(page_no).unwrap());
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("promotion worker thread panicked");
        }

        for &page_no in &hot_pages {
            let frame_idx = *pool.inner.page_table.lock().get(&page_no).unwrap();
            assert!(
                pool.inner.lru.is_young(frame_idx),
                "page {page_no} should have been promoted to the young sublist"
            );
        }
    }

    // A recycled frame must not inherit its previous occupant's access
    // history: otherwise a page that lands in a frame a hot page just
    // vacated could be promoted to young on its very first touch.
    #[test]
    fn recycled_frame_does_not_inherit_previous_occupants_stats() {
        let (_tmp, pool) = pool(1);

        // Touch page 0 enough times to earn promotion, all in the same frame.
        for _ in 0..PROMOTE_ACCESS_COUNT + 1 {
            drop(pool.get_page(0).unwrap());
        }

        // Evict it by loading a second page into the (single-frame) pool;
        // the frame is recycled for page 1.
        drop(pool.get_page(1).unwrap());
        let frame_idx = *pool.inner.page_table.lock().get(&1).unwrap();

        // A single fresh access must not already look promotable: reusing
        // the old FrameStats would carry over access_count >= PROMOTE_ACCESS_COUNT.
        let frame = &pool.inner.frames[frame_idx];
        assert!(
            !frame.stats.should_promote(now_ms()),
            "recycled frame should not inherit the previous occupant's access history"
        );
    }
}
