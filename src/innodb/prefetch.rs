//! Prefetch manager (C5): a bounded priority queue of read-ahead requests
//! drained by a small worker pool, each worker materializing pages into
//! [`crate::innodb::buffer_pool::BufferPool`] ahead of demand.
//!
//! Scheduling is cooperative and decoupled from the caller:
//! [`PrefetchManager::trigger_prefetch`] enqueues and returns immediately.
//! Cancellation is implicit via `deadline` — a worker that pops an expired
//! request drops it without touching the buffer pool, and the caller never
//! has to track a handle to cancel.
//!
//! Drop policy when the queue is already at [`PrefetchManager`]'s configured
//! capacity: the incoming request replaces the queue's lowest-priority
//! entry iff its own priority is strictly higher; otherwise it is silently
//! discarded. `get_page` on a resident page is already a cheap hit with no
//! I/O, which is what gives workers "skip pages already resident" for free.

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;
use tracing::{trace, warn};

use crate::innodb::buffer_pool::BufferPool;

/// One speculative read-ahead request for a contiguous page range.
#[derive(Debug, Clone)]
pub struct PrefetchRequest {
    pub space: u32,
    pub start_page: u32,
    pub end_page: u32,
    /// 1 (lowest) through 10 (highest).
    pub priority: u8,
    pub deadline: Instant,
}

impl PrefetchRequest {
    pub fn new(space: u32, start_page: u32, end_page: u32, priority: u8, ttl: Duration) -> Self {
        PrefetchRequest {
            space,
            start_page,
            end_page,
            priority: priority.clamp(1, 10),
            deadline: Instant::now() + ttl,
        }
    }

    fn expired(&self) -> bool {
        Instant::now() > self.deadline
    }
}

impl PartialEq for PrefetchRequest {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority
    }
}

impl Eq for PrefetchRequest {}

impl PartialOrd for PrefetchRequest {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for PrefetchRequest {
    /// Orders purely by priority, so [`BinaryHeap::pop`] hands back the
    /// highest-priority request first.
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.priority.cmp(&other.priority)
    }
}

/// The priority queue itself, kept separate from thread management so its
/// enqueue/overflow behavior is testable without spinning up workers.
pub struct PrefetchQueue {
    heap: BinaryHeap<PrefetchRequest>,
    capacity: usize,
}

impl PrefetchQueue {
    pub fn new(capacity: usize) -> Self {
        PrefetchQueue { heap: BinaryHeap::with_capacity(capacity), capacity: capacity.max(1) }
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Attempt to enqueue `req`. Returns whether it was accepted.
    pub fn try_enqueue(&mut self, req: PrefetchRequest) -> bool {
        if self.heap.len() < self.capacity {
            self.heap.push(req);
            return true;
        }

        let Some(min_priority) = self.heap.iter().map(|r| r.priority).min() else {
            self.heap.push(req);
            return true;
        };
        if req.priority <= min_priority {
            return false;
        }

        let mut items: Vec<_> = self.heap.drain().collect();
        if let Some(pos) = items.iter().position(|r| r.priority == min_priority) {
            items.remove(pos);
        }
        items.push(req);
        self.heap = items.into_iter().collect();
        true
    }

    /// Pop the highest-priority request, skipping (and discarding) any
    /// already past its deadline.
    pub fn pop_highest(&mut self) -> Option<PrefetchRequest> {
        while let Some(req) = self.heap.pop() {
            if req.expired() {
                continue;
            }
            return Some(req);
        }
        None
    }
}

/// Owns the priority queue and the worker threads draining it into
/// `BufferPool::get_page` calls. Workers stop and are joined on drop.
pub struct PrefetchManager {
    queue: Arc<Mutex<PrefetchQueue>>,
    doorbell: Sender<()>,
    shutdown: Arc<AtomicBool>,
    workers: Vec<JoinHandle<()>>,
}

impl PrefetchManager {
    pub fn new(pool: BufferPool, worker_count: usize, queue_capacity: usize) -> Self {
        let queue = Arc::new(Mutex::new(PrefetchQueue::new(queue_capacity)));
        let worker_count = worker_count.max(1);
        let (doorbell, ring) = bounded::<()>(worker_count * 4);
        let shutdown = Arc::new(AtomicBool::new(false));

        let workers = (0..worker_count)
            .map(|id| {
                let queue = queue.clone();
                let ring: Receiver<()> = ring.clone();
                let pool = pool.clone();
                let shutdown = shutdown.clone();
                thread::Builder::new()
                    .name(format!("idb-prefetch-{id}"))
                    .spawn(move || worker_loop(id, queue, ring, pool, shutdown))
                    .expect("spawn prefetch worker thread")
            })
            .collect();

        PrefetchManager { queue, doorbell, shutdown, workers }
    }

    /// Enqueue `req` and return immediately. Discarded silently if the
    /// queue is full and `req`'s priority does not beat the current
    /// lowest-priority entry.
    pub fn trigger_prefetch(&self, req: PrefetchRequest) {
        let accepted = self.queue.lock().try_enqueue(req);
        if accepted {
            let _ = self.doorbell.try_send(());
        }
    }

    /// Number of requests currently queued (not yet picked up by a worker).
    pub fn queue_len(&self) -> usize {
        self.queue.lock().len()
    }
}

impl Drop for PrefetchManager {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        for _ in &self.workers {
            let _ = self.doorbell.try_send(());
        }
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

fn worker_loop(
    id: usize,
    queue: Arc<Mutex<PrefetchQueue>>,
    ring: Receiver<()>,
    pool: BufferPool,
    shutdown: Arc<AtomicBool>,
) {
    while !shutdown.load(Ordering::Acquire) {
        let next = queue.lock().pop_highest();
        match next {
            Some(req) => {
                for page_no in req.start_page..=req.end_page {
                    if shutdown.load(Ordering::Acquire) || Instant::now() > req.deadline {
                        break;
                    }
                    match pool.get_page(page_no) {
                        Ok(_guard) => trace!(worker = id, page_no, "prefetch warmed page"),
                        Err(error) => {
                            warn!(worker = id, page_no, %error, "prefetch read failed");
                            break;
                        }
                    }
                }
            }
            None => {
                let _ = ring.recv_timeout(Duration::from_millis(200));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::innodb::tablespace::{Tablespace, TablespaceKind};
    use tempfile::NamedTempFile;

    fn req(priority: u8, deadline: Instant) -> PrefetchRequest {
        PrefetchRequest { space: 1, start_page: 0, end_page: 0, priority, deadline }
    }

    #[test]
    fn queue_orders_highest_priority_first() {
        let mut q = PrefetchQueue::new(10);
        let deadline = Instant::now() + Duration::from_secs(10);
        assert!(q.try_enqueue(req(5, deadline)));
        assert!(q.try_enqueue(req(8, deadline)));
        assert!(q.try_enqueue(req(3, deadline)));
        assert_eq!(q.len(), 3);
        assert_eq!(q.pop_highest().unwrap().priority, 8);
        assert_eq!(q.pop_highest().unwrap().priority, 5);
        assert_eq!(q.pop_highest().unwrap().priority, 3);
    }

    #[test]
    fn full_queue_drops_request_that_does_not_beat_the_minimum() {
        let mut q = PrefetchQueue::new(2);
        let deadline = Instant::now() + Duration::from_secs(10);
        assert!(q.try_enqueue(req(5, deadline)));
        assert!(q.try_enqueue(req(8, deadline)));
        assert!(!q.try_enqueue(req(2, deadline)));
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn full_queue_replaces_strictly_lower_priority_entry() {
        let mut q = PrefetchQueue::new(2);
        let deadline = Instant::now() + Duration::from_secs(10);
        assert!(q.try_enqueue(req(5, deadline)));
        assert!(q.try_enqueue(req(8, deadline)));
        assert!(q.try_enqueue(req(9, deadline)));
        assert_eq!(q.len(), 2);
        assert_eq!(q.pop_highest().unwrap().priority, 9);
        assert_eq!(q.pop_highest().unwrap().priority, 8);
    }

    #[test]
    fn expired_request_is_skipped_on_pop() {
        let mut q = PrefetchQueue::new(10);
        assert!(q.try_enqueue(req(9, Instant::now() - Duration::from_millis(1))));
        assert!(q.try_enqueue(req(3, Instant::now() + Duration::from_secs(10))));
        assert_eq!(q.pop_highest().unwrap().priority, 3);
    }

    #[test]
    fn manager_warms_triggered_range_into_the_pool() {
        let tmp = NamedTempFile::new().unwrap();
        let ts = Tablespace::create(tmp.path(), 1, TablespaceKind::User).unwrap();
        let pool = BufferPool::new(ts, 16);
        let manager = PrefetchManager::new(pool.clone(), 2, 8);

        manager.trigger_prefetch(PrefetchRequest::new(1, 0, 3, 5, Duration::from_secs(5)));

        let deadline = Instant::now() + Duration::from_secs(5);
        while pool.occupied() < 4 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(pool.occupied(), 4);
    }
}
