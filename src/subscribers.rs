//! Typed pub/sub registry for inbound realtime data.
//!
//! Callbacks are stored behind `Arc` so dispatch can snapshot the current set
//! and release the lock before invoking anything. That lets a callback
//! subscribe or unsubscribe while it is being called.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::protocol::RealtimeData;

pub type Callback = Arc<dyn Fn(&RealtimeData) + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    All,
    Task(String),
}

#[derive(Default)]
struct Inner {
    next_id: u64,
    // (id, callback) in registration order
    generic: Vec<(u64, Callback)>,
    by_task: HashMap<String, Vec<(u64, Callback)>>,
}

/// Outcome of a registry mutation that matters to the wire protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Interest {
    /// First subscriber of this task was added.
    Gained(String),
    /// Last subscriber of this task was removed.
    Lost(String),
    Unchanged,
}

#[derive(Clone, Default)]
pub struct SubscriberRegistry {
    inner: Arc<Mutex<Inner>>,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, topic: Topic, callback: Callback) -> (u64, Interest) {
        let mut inner = self.inner.lock();
        inner.next_id += 1;
        let id = inner.next_id;
        let interest = match topic {
            Topic::All => {
                inner.generic.push((id, callback));
                Interest::Unchanged
            }
            Topic::Task(task_id) => {
                let subs = inner.by_task.entry(task_id.clone()).or_default();
                subs.push((id, callback));
                if subs.len() == 1 {
                    Interest::Gained(task_id)
                } else {
                    Interest::Unchanged
                }
            }
        };
        (id, interest)
    }

    pub fn remove(&self, topic: &Topic, id: u64) -> Interest {
        let mut inner = self.inner.lock();
        match topic {
            Topic::All => {
                inner.generic.retain(|(i, _)| *i != id);
                Interest::Unchanged
            }
            Topic::Task(task_id) => {
                let Some(subs) = inner.by_task.get_mut(task_id) else {
                    return Interest::Unchanged;
                };
                let before = subs.len();
                subs.retain(|(i, _)| *i != id);
                if subs.is_empty() && before > 0 {
                    inner.by_task.remove(task_id);
                    Interest::Lost(task_id.clone())
                } else {
                    Interest::Unchanged
                }
            }
        }
    }

    /// Drops every subscriber of `task_id`. Returns how many were removed.
    pub fn remove_task(&self, task_id: &str) -> usize {
        self.inner
            .lock()
            .by_task
            .remove(task_id)
            .map(|v| v.len())
            .unwrap_or(0)
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.generic.clear();
        inner.by_task.clear();
    }

    pub fn task_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.inner.lock().by_task.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn has_task(&self, task_id: &str) -> bool {
        self.inner.lock().by_task.contains_key(task_id)
    }

    pub fn len(&self) -> usize {
        let inner = self.inner.lock();
        inner.generic.len() + inner.by_task.values().map(|v| v.len()).sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn snapshot(&self, task_id: Option<&str>) -> Vec<Callback> {
        let inner = self.inner.lock();
        let mut out: Vec<Callback> = inner.generic.iter().map(|(_, cb)| cb.clone()).collect();
        if let Some(subs) = task_id.and_then(|t| inner.by_task.get(t)) {
            out.extend(subs.iter().map(|(_, cb)| cb.clone()));
        }
        out
    }

    /// Invokes generic subscribers, then those of the envelope's task.
    /// A panicking callback is logged and skipped. Returns the number of
    /// callbacks that completed.
    pub fn dispatch(&self, data: &RealtimeData) -> usize {
        let callbacks = self.snapshot(data.task_id());
        let mut delivered = 0;
        for cb in callbacks {
            match catch_unwind(AssertUnwindSafe(|| cb(data))) {
                Ok(()) => delivered += 1,
                Err(_) => {
                    log::error!(
                        "realtime.subscriber.panic kind={} task_id={}",
                        data.kind.as_str(),
                        data.task_id().unwrap_or("-")
                    );
                }
            }
        }
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::MessageKind;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn envelope(task: Option<&str>) -> RealtimeData {
        let metadata = task.map(|t| {
            let mut m = serde_json::Map::new();
            m.insert("taskId".into(), serde_json::Value::String(t.into()));
            m
        });
        RealtimeData {
            timestamp: 0,
            value: serde_json::json!({"progress": 10.0}),
            kind: MessageKind::Progress,
            metadata,
        }
    }

    fn counter() -> (Arc<AtomicUsize>, Callback) {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        (hits, Arc::new(move |_: &RealtimeData| {
            h.fetch_add(1, Ordering::SeqCst);
        }))
    }

    #[test]
    fn routes_by_task_and_generic() {
        let reg = SubscriberRegistry::new();
        let (all_hits, all_cb) = counter();
        let (a_hits, a_cb) = counter();
        let (b_hits, b_cb) = counter();
        reg.add(Topic::All, all_cb);
        reg.add(Topic::Task("a".into()), a_cb);
        reg.add(Topic::Task("b".into()), b_cb);

        assert_eq!(reg.dispatch(&envelope(Some("a"))), 2);
        assert_eq!(reg.dispatch(&envelope(None)), 1);

        assert_eq!(all_hits.load(Ordering::SeqCst), 2);
        assert_eq!(a_hits.load(Ordering::SeqCst), 1);
        assert_eq!(b_hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn panicking_subscriber_is_isolated() {
        let reg = SubscriberRegistry::new();
        reg.add(
            Topic::Task("a".into()),
            Arc::new(|_: &RealtimeData| panic!("subscriber blew up")),
        );
        let (hits, cb) = counter();
        reg.add(Topic::Task("a".into()), cb);

        assert_eq!(reg.dispatch(&envelope(Some("a"))), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn interest_tracks_first_and_last_subscriber() {
        let reg = SubscriberRegistry::new();
        let (_, cb1) = counter();
        let (_, cb2) = counter();
        let topic = Topic::Task("t".into());

        let (id1, i1) = reg.add(topic.clone(), cb1);
        let (id2, i2) = reg.add(topic.clone(), cb2);
        assert_eq!(i1, Interest::Gained("t".into()));
        assert_eq!(i2, Interest::Unchanged);

        assert_eq!(reg.remove(&topic, id1), Interest::Unchanged);
        assert!(reg.has_task("t"));
        assert_eq!(reg.remove(&topic, id2), Interest::Lost("t".into()));
        assert!(!reg.has_task("t"));
        assert_eq!(reg.remove(&topic, id2), Interest::Unchanged);
        assert!(reg.is_empty());
    }

    #[test]
    fn callback_may_mutate_registry_during_dispatch() {
        let reg = SubscriberRegistry::new();
        let inner_reg = reg.clone();
        reg.add(
            Topic::All,
            Arc::new(move |_: &RealtimeData| {
                let (_, cb) = counter();
                inner_reg.add(Topic::Task("late".into()), cb);
                inner_reg.remove_task("a");
            }),
        );
        let (_, cb) = counter();
        reg.add(Topic::Task("a".into()), cb);

        // snapshot taken before the callback ran still includes "a"
        assert_eq!(reg.dispatch(&envelope(Some("a"))), 2);
        assert_eq!(reg.task_ids(), vec!["late".to_string()]);
    }
}
