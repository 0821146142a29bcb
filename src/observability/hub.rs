use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use tokio::sync::Notify;
use tracing::debug;

use crate::events::ProgressUpdate;

pub const DEFAULT_SUBSCRIBER_CAPACITY: usize = 64;

struct Slot<T> {
    queue: Mutex<VecDeque<T>>,
    capacity: usize,
    notify: Notify,
    closed: AtomicBool,
    dropped: AtomicU64,
}

impl<T> Slot<T> {
    fn new(capacity: usize) -> Self {
        Self {
            queue: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            notify: Notify::new(),
            closed: AtomicBool::new(false),
            dropped: AtomicU64::new(0),
        }
    }

    /// 队列满时丢弃最旧的一条
    fn push(&self, item: T) {
        {
            let mut queue = self.queue.lock();
            if queue.len() >= self.capacity {
                queue.pop_front();
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
            queue.push_back(item);
        }
        self.notify.notify_one();
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_one();
    }
}

struct HubInner<T> {
    subscribers: RwLock<HashMap<u64, Arc<Slot<T>>>>,
    next_id: AtomicU64,
}

impl<T> Drop for HubInner<T> {
    fn drop(&mut self) {
        for slot in self.subscribers.get_mut().values() {
            slot.close();
        }
    }
}

/// 有界、丢弃最旧的扇出广播
///
/// 每个订阅者独立的队列；`publish` 从不阻塞，也从不等待慢订阅者。
pub struct ObservabilityHub<T = ProgressUpdate> {
    inner: Arc<HubInner<T>>,
}

impl<T> Clone for ObservabilityHub<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Default for ObservabilityHub<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ObservabilityHub<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(HubInner {
                subscribers: RwLock::new(HashMap::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn subscribe(&self) -> Subscription<T> {
        self.subscribe_with_capacity(DEFAULT_SUBSCRIBER_CAPACITY)
    }

    pub fn subscribe_with_capacity(&self, capacity: usize) -> Subscription<T> {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let slot = Arc::new(Slot::new(capacity.max(1)));
        self.inner.subscribers.write().insert(id, Arc::clone(&slot));
        debug!(subscriber = id, capacity, "observability subscriber added");
        Subscription {
            id,
            slot,
            hub: Arc::downgrade(&self.inner),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.read().len()
    }
}

impl<T: Clone> ObservabilityHub<T> {
    /// 发布给所有订阅者，返回投递数量
    pub fn publish(&self, item: T) -> usize {
        let slots: Vec<Arc<Slot<T>>> = self.inner.subscribers.read().values().cloned().collect();
        for slot in &slots {
            slot.push(item.clone());
        }
        slots.len()
    }
}

/// 订阅句柄，drop 时自动退订
pub struct Subscription<T> {
    id: u64,
    slot: Arc<Slot<T>>,
    hub: Weak<HubInner<T>>,
}

impl<T> Subscription<T> {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn try_recv(&self) -> Option<T> {
        self.slot.queue.lock().pop_front()
    }

    /// 等待下一条；hub 被释放且队列已空时返回 None
    pub async fn recv(&self) -> Option<T> {
        loop {
            if let Some(item) = self.try_recv() {
                return Some(item);
            }
            if self.slot.closed.load(Ordering::Acquire) || self.hub.strong_count() == 0 {
                return None;
            }
            self.slot.notify.notified().await;
        }
    }

    pub fn len(&self) -> usize {
        self.slot.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 因队列满被丢弃的条数
    pub fn dropped(&self) -> u64 {
        self.slot.dropped.load(Ordering::Relaxed)
    }

    pub fn unsubscribe(self) {}
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        if let Some(hub) = self.hub.upgrade() {
            hub.subscribers.write().remove(&self.id);
            debug!(subscriber = self.id, "observability subscriber removed");
        }
    }
}
