// src/broadcast.rs
//
// Fan-out of terminal events to live viewers.
// Every subscriber owns a bounded queue; publishing never waits on a
// subscriber. When a queue is full the oldest undelivered event is dropped
// so the newest line always gets through.

use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, Weak};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::io::{lock_recover, now_us};
use crate::sessions::SessionStatus;
use crate::terminal_log::TerminalLine;

/// Default per-subscriber queue depth.
pub const DEFAULT_SUBSCRIBER_QUEUE: usize = 256;

// ============================================================================
// Events
// ============================================================================

/// Event delivered to viewers
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// A line appended to the terminal history
    Line { line: TerminalLine },
    /// Periodic keep-alive, independent of device traffic
    Heartbeat { timestamp_us: u64 },
    /// Session state changed
    Session { status: SessionStatus },
}

// ============================================================================
// Subscriber Queue
// ============================================================================

struct SubscriberQueue {
    events: Mutex<VecDeque<StreamEvent>>,
    capacity: usize,
    dropped: AtomicU64,
    closed: AtomicBool,
    notify: Notify,
}

impl SubscriberQueue {
    fn new(capacity: usize) -> Self {
        Self {
            events: Mutex::new(VecDeque::with_capacity(capacity.min(64))),
            capacity: capacity.max(1),
            dropped: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<StreamEvent>> {
        lock_recover(&self.events)
    }

    fn push(&self, event: StreamEvent) {
        {
            let mut events = self.lock();
            if events.len() >= self.capacity {
                events.pop_front();
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
            events.push_back(event);
        }
        self.notify.notify_one();
    }

    fn pop(&self) -> Option<StreamEvent> {
        self.lock().pop_front()
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }
}

// ============================================================================
// Subscription
// ============================================================================

/// Receiving end held by one viewer. Dropping it unsubscribes.
pub struct Subscription {
    id: Uuid,
    queue: Arc<SubscriberQueue>,
    broadcaster: Weak<EventBroadcaster>,
}

impl Subscription {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Wait for the next event. Returns `None` once unsubscribed and drained.
    pub async fn recv(&mut self) -> Option<StreamEvent> {
        loop {
            if let Some(event) = self.queue.pop() {
                return Some(event);
            }
            if self.queue.closed.load(Ordering::SeqCst) {
                return None;
            }
            // notify_one leaves a permit when nobody is waiting, so a publish
            // between the pop above and this await is not lost
            self.queue.notify.notified().await;
        }
    }

    /// Next queued event without waiting.
    pub fn try_recv(&mut self) -> Option<StreamEvent> {
        self.queue.pop()
    }

    /// Events discarded because this viewer fell behind.
    pub fn dropped_count(&self) -> u64 {
        self.queue.dropped.load(Ordering::Relaxed)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(broadcaster) = self.broadcaster.upgrade() {
            broadcaster.unsubscribe(self.id);
        }
    }
}

// ============================================================================
// Broadcaster
// ============================================================================

pub struct EventBroadcaster {
    subscribers: RwLock<HashMap<Uuid, Arc<SubscriberQueue>>>,
    queue_capacity: usize,
}

impl EventBroadcaster {
    pub fn new(queue_capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            subscribers: RwLock::new(HashMap::new()),
            queue_capacity,
        })
    }

    /// Register a new viewer.
    pub fn subscribe(self: &Arc<Self>) -> Subscription {
        let id = Uuid::new_v4();
        let queue = Arc::new(SubscriberQueue::new(self.queue_capacity));
        match self.subscribers.write() {
            Ok(mut map) => map.insert(id, queue.clone()),
            Err(poisoned) => poisoned.into_inner().insert(id, queue.clone()),
        };
        tlog!("[broadcast] Subscriber {} registered", id);
        Subscription {
            id,
            queue,
            broadcaster: Arc::downgrade(self),
        }
    }

    /// Remove a viewer. Safe to call repeatedly and concurrently with `publish`.
    pub fn unsubscribe(&self, id: Uuid) {
        let removed = match self.subscribers.write() {
            Ok(mut map) => map.remove(&id),
            Err(poisoned) => poisoned.into_inner().remove(&id),
        };
        if let Some(queue) = removed {
            queue.close();
            tlog!("[broadcast] Subscriber {} removed", id);
        }
    }

    /// Deliver an event to every registered viewer. Returns how many received it.
    pub fn publish(&self, event: StreamEvent) -> usize {
        let targets: Vec<Arc<SubscriberQueue>> = match self.subscribers.read() {
            Ok(map) => map.values().cloned().collect(),
            Err(poisoned) => poisoned.into_inner().values().cloned().collect(),
        };
        for queue in &targets {
            queue.push(event.clone());
        }
        targets.len()
    }

    pub fn subscriber_count(&self) -> usize {
        match self.subscribers.read() {
            Ok(map) => map.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    /// Publish a heartbeat every `interval` until the broadcaster is dropped.
    pub fn spawn_heartbeat(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // First tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(broadcaster) = weak.upgrade() else {
                    break;
                };
                broadcaster.publish(StreamEvent::Heartbeat {
                    timestamp_us: now_us(),
                });
            }
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
