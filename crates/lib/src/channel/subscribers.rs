//! Subscriber registry: callbacks keyed by frame type, invoked in registration order.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::channel::frame::Frame;

/// Which frames a subscriber wants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameFilter {
    Type(String),
    Any,
}

impl FrameFilter {
    pub fn of(typ: impl Into<String>) -> Self {
        FrameFilter::Type(typ.into())
    }

    pub fn matches(&self, frame: &Frame) -> bool {
        match self {
            FrameFilter::Type(t) => *t == frame.typ,
            FrameFilter::Any => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Callback = Arc<dyn Fn(&Frame) + Send + Sync>;

struct Subscriber {
    id: SubscriptionId,
    filter: FrameFilter,
    callback: Callback,
}

/// Registry of frame subscribers. Shared between the host and its channel managers.
pub struct SubscriberRegistry {
    inner: Mutex<Vec<Subscriber>>,
    next_id: AtomicU64,
}

impl Default for SubscriberRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn subscribe<F>(&self, filter: FrameFilter, callback: F) -> SubscriptionId
    where
        F: Fn(&Frame) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        if let Ok(mut g) = self.inner.lock() {
            g.push(Subscriber {
                id,
                filter,
                callback: Arc::new(callback),
            });
        }
        id
    }

    /// Remove a subscriber. Returns false if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let Ok(mut g) = self.inner.lock() else {
            return false;
        };
        let before = g.len();
        g.retain(|s| s.id != id);
        g.len() != before
    }

    /// Invoke every matching subscriber synchronously, in registration order. Returns how many ran.
    /// Callbacks run outside the lock, so they may subscribe or unsubscribe.
    pub fn dispatch(&self, frame: &Frame) -> usize {
        let matched: Vec<Callback> = match self.inner.lock() {
            Ok(g) => g
                .iter()
                .filter(|s| s.filter.matches(frame))
                .map(|s| s.callback.clone())
                .collect(),
            Err(_) => return 0,
        };
        for cb in &matched {
            cb(frame);
        }
        matched.len()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|g| g.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
