//! Deduplicating, rate-limited work queue.
//!
//! Semantics:
//! - a key queued but not yet handed out is stored once, however often it is
//!   added;
//! - a key handed out by [`WorkQueue::get`] and re-added before
//!   [`WorkQueue::done`] is parked and redelivered after `done`, so one key is
//!   never processed by two workers at once;
//! - [`WorkQueue::add_rate_limited`] re-adds after `base * 2^failures`
//!   (capped), the failure count being cleared by [`WorkQueue::forget`];
//! - after [`WorkQueue::shut_down`], `get` returns `None` and adds are ignored.

use std::collections::{HashMap, HashSet, VecDeque};
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;

/// Per-key exponential backoff.
#[derive(Debug)]
pub struct ExponentialBackoff<K> {
    base: Duration,
    max: Duration,
    failures: HashMap<K, u32>,
}

impl<K: Eq + Hash + Clone> ExponentialBackoff<K> {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            failures: HashMap::new(),
        }
    }

    /// Delay for the next requeue of `key`; counts one more failure.
    pub fn when(&mut self, key: &K) -> Duration {
        let failures = self.failures.entry(key.clone()).or_insert(0);
        let exp = *failures;
        *failures = failures.saturating_add(1);

        2u32.checked_pow(exp)
            .and_then(|factor| self.base.checked_mul(factor))
            .map(|delay| delay.min(self.max))
            .unwrap_or(self.max)
    }

    pub fn num_requeues(&self, key: &K) -> u32 {
        self.failures.get(key).copied().unwrap_or(0)
    }

    pub fn forget(&mut self, key: &K) {
        self.failures.remove(key);
    }
}

struct State<K> {
    queue: VecDeque<K>,
    dirty: HashSet<K>,
    processing: HashSet<K>,
    backoff: ExponentialBackoff<K>,
    shutting_down: bool,
}

struct Inner<K> {
    state: Mutex<State<K>>,
    notify: Notify,
}

/// Clonable handle to one shared queue.
pub struct WorkQueue<K> {
    inner: Arc<Inner<K>>,
}

impl<K> Clone for WorkQueue<K> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<K> WorkQueue<K>
where
    K: Eq + Hash + Clone + Send + 'static,
{
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    queue: VecDeque::new(),
                    dirty: HashSet::new(),
                    processing: HashSet::new(),
                    backoff: ExponentialBackoff::new(base_delay, max_delay),
                    shutting_down: false,
                }),
                notify: Notify::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State<K>> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mark `key` as needing processing.
    pub fn add(&self, key: K) {
        let mut state = self.lock();
        if state.shutting_down || state.dirty.contains(&key) {
            return;
        }
        state.dirty.insert(key.clone());
        if state.processing.contains(&key) {
            return;
        }
        state.queue.push_back(key);
        drop(state);
        self.inner.notify.notify_one();
    }

    /// Re-add `key` once its backoff delay has elapsed. Needs a tokio runtime.
    pub fn add_rate_limited(&self, key: K) {
        let delay = {
            let mut state = self.lock();
            if state.shutting_down {
                return;
            }
            state.backoff.when(&key)
        };
        let queue = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.add(key);
        });
    }

    /// Next key to process, or `None` once the queue is shutting down.
    pub async fn get(&self) -> Option<K> {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            // Register before inspecting state so no wakeup is lost.
            notified.as_mut().enable();
            {
                let mut state = self.lock();
                if state.shutting_down {
                    return None;
                }
                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    return Some(key);
                }
            }
            notified.await;
        }
    }

    /// Processing of `key` finished; redeliver it if it was re-added meanwhile.
    pub fn done(&self, key: &K) {
        let mut state = self.lock();
        state.processing.remove(key);
        if state.dirty.contains(key) && !state.shutting_down {
            state.queue.push_back(key.clone());
            drop(state);
            self.inner.notify.notify_one();
        }
    }

    /// Clear the failure count of `key`.
    pub fn forget(&self, key: &K) {
        self.lock().backoff.forget(key);
    }

    pub fn num_requeues(&self, key: &K) -> u32 {
        self.lock().backoff.num_requeues(key)
    }

    /// Stop handing out work; wakes every waiting `get`.
    pub fn shut_down(&self) {
        {
            let mut state = self.lock();
            state.shutting_down = true;
            state.queue.clear();
        }
        self.inner.notify.notify_waiters();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.lock().shutting_down
    }

    /// Keys waiting to be handed out.
    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    fn queue() -> WorkQueue<&'static str> {
        WorkQueue::new(Duration::from_millis(5), Duration::from_secs(1000))
    }

    #[tokio::test]
    async fn duplicate_adds_coalesce() {
        let q = queue();
        q.add("ns/cfg");
        q.add("ns/cfg");
        q.add("ns/other");
        assert_eq!(q.len(), 2);
        assert_eq!(q.get().await, Some("ns/cfg"));
        assert_eq!(q.get().await, Some("ns/other"));
        assert!(q.is_empty());
    }

    #[tokio::test]
    async fn re_add_while_processing_is_deferred_until_done() {
        let q = queue();
        q.add("ns/cfg");
        let key = q.get().await.expect("key");

        q.add("ns/cfg");
        q.add("ns/cfg");
        assert_eq!(q.len(), 0, "in-flight key must not be handed out twice");

        q.done(&key);
        assert_eq!(q.len(), 1);
        assert_eq!(q.get().await, Some("ns/cfg"));
    }

    #[tokio::test]
    async fn shut_down_wakes_waiting_get() {
        let q = queue();
        let waiter = {
            let q = q.clone();
            tokio::spawn(async move { q.get().await })
        };
        tokio::task::yield_now().await;
        q.shut_down();
        assert_eq!(waiter.await.expect("join"), None);
    }

    #[tokio::test]
    async fn adds_after_shut_down_are_ignored() {
        let q = queue();
        q.add("a");
        q.shut_down();
        q.add("b");
        assert!(q.is_empty());
        assert!(q.is_shutting_down());
        assert_eq!(q.get().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limited_add_waits_for_backoff() {
        let q = queue();

        let start = Instant::now();
        q.add_rate_limited("a");
        assert!(q.is_empty());
        assert_eq!(q.get().await, Some("a"));
        assert!(start.elapsed() >= Duration::from_millis(5));
        q.done(&"a");

        let start = Instant::now();
        q.add_rate_limited("a");
        assert_eq!(q.get().await, Some("a"));
        assert!(start.elapsed() >= Duration::from_millis(10));
        assert_eq!(q.num_requeues(&"a"), 2);

        q.forget(&"a");
        assert_eq!(q.num_requeues(&"a"), 0);
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let mut b = ExponentialBackoff::new(Duration::from_millis(5), Duration::from_secs(1));
        let delays: Vec<_> = (0..4).map(|_| b.when(&"k")).collect();
        assert_eq!(
            delays,
            [5, 10, 20, 40].map(Duration::from_millis).to_vec()
        );
        for _ in 0..60 {
            b.when(&"k");
        }
        assert_eq!(b.when(&"k"), Duration::from_secs(1));
        assert_eq!(b.num_requeues(&"other"), 0);
    }
}
