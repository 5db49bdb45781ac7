//! The anomaly fabric: cached lists of active errors/warnings with
//! optional expiry (spec §4.11).
//!
//! Two cached-producer terminals, `Process/Errors` and
//! `Process/Warnings`, each publish the MessagePack-encoded list of
//! currently active anomaly messages of that kind. A background thread
//! — grounded on the condition-variable wait/wake shape of
//! [`crate::sync::tx_queue::TxQueue`], driving a
//! [`crate::runtime::timer::TimerHeap`] instead of a FIFO — sleeps until
//! either a new anomaly is set or the earliest pending expiration
//! elapses, then removes expired anomalies and republishes.

use crate::endpoint::EndpointCore;
use crate::error::Error;
use crate::terminal::pubsub::PubSubTerminal;
use crate::terminal::TerminalCore;
use crate::types::{Encoding, Message, Time, TerminalVariant};
use crate::runtime::timer::TimerHeap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use super::{ANOMALY_SIGNATURE, DEFAULT_QUEUE_CAPACITY};

#[derive(Debug, Clone)]
struct ActiveAnomaly {
    is_error: bool,
    message: String,
}

struct ExpiryState {
    heap: TimerHeap<u64>,
    shutdown: bool,
}

/// Owns the `Process/Errors`/`Process/Warnings` terminals and the
/// background expiry thread.
pub struct AnomalyFabric {
    errors_terminal: Arc<PubSubTerminal>,
    warnings_terminal: Arc<PubSubTerminal>,
    active: Mutex<HashMap<u64, ActiveAnomaly>>,
    expiry: Mutex<ExpiryState>,
    expiry_cv: Condvar,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl AnomalyFabric {
    pub(crate) fn new(endpoint: &Arc<EndpointCore>) -> Result<Arc<Self>, Error> {
        let errors_id = endpoint.create_terminal(
            "Process/Errors",
            TerminalVariant::CachedProducer,
            ANOMALY_SIGNATURE,
            DEFAULT_QUEUE_CAPACITY,
        )?;
        let warnings_id = endpoint.create_terminal(
            "Process/Warnings",
            TerminalVariant::CachedProducer,
            ANOMALY_SIGNATURE,
            DEFAULT_QUEUE_CAPACITY,
        )?;
        let errors_terminal = pubsub_core(endpoint, errors_id);
        let warnings_terminal = pubsub_core(endpoint, warnings_id);

        let fabric = Arc::new(Self {
            errors_terminal,
            warnings_terminal,
            active: Mutex::new(HashMap::new()),
            expiry: Mutex::new(ExpiryState {
                heap: TimerHeap::new(),
                shutdown: false,
            }),
            expiry_cv: Condvar::new(),
            worker: Mutex::new(None),
        });
        fabric.publish(true);
        fabric.publish(false);

        let bg = Arc::clone(&fabric);
        let handle = std::thread::spawn(move || bg.run_expiry_loop());
        *fabric.worker.lock().expect("anomaly worker lock poisoned") = Some(handle);
        Ok(fabric)
    }

    /// Registers `id` as active with kind `is_error`, scheduling its
    /// automatic removal at `now + duration` if given, and republishes
    /// the affected list. Called by [`Anomaly::set`].
    fn set(&self, id: u64, is_error: bool, message: String, duration: Option<Duration>) {
        {
            let mut active = self.active.lock().expect("anomaly active lock poisoned");
            active.insert(
                id,
                ActiveAnomaly {
                    is_error,
                    message,
                },
            );
        }
        {
            let mut expiry = self.expiry.lock().expect("anomaly expiry lock poisoned");
            expiry.heap.remove(&id);
            if let Some(duration) = duration {
                expiry.heap.insert(id, Time::now() + duration);
            }
        }
        self.expiry_cv.notify_all();
        self.publish(is_error);
    }

    /// Removes `id` if active and republishes. Called by [`Anomaly::clear`]
    /// and by the expiry loop.
    fn clear(&self, id: u64) {
        let removed = {
            let mut active = self.active.lock().expect("anomaly active lock poisoned");
            active.remove(&id)
        };
        {
            let mut expiry = self.expiry.lock().expect("anomaly expiry lock poisoned");
            expiry.heap.remove(&id);
        }
        if let Some(removed) = removed {
            self.publish(removed.is_error);
        }
    }

    fn publish(&self, is_error: bool) {
        let messages: Vec<String> = {
            let active = self.active.lock().expect("anomaly active lock poisoned");
            active
                .values()
                .filter(|a| a.is_error == is_error)
                .map(|a| a.message.clone())
                .collect()
        };
        let Ok(payload) = rmp_serde::to_vec(&messages) else {
            return;
        };
        let terminal = if is_error {
            &self.errors_terminal
        } else {
            &self.warnings_terminal
        };
        let msg = Message::new(ANOMALY_SIGNATURE, Encoding::MsgPack, payload).with_timestamp(Time::now());
        let _ = terminal.try_publish(msg);
    }

    fn run_expiry_loop(&self) {
        loop {
            let mut guard = self.expiry.lock().expect("anomaly expiry lock poisoned");
            if guard.shutdown {
                return;
            }
            let expired_ids = match guard.heap.peek_deadline() {
                None => {
                    let (g, _) = self
                        .expiry_cv
                        .wait_timeout(guard, Duration::from_millis(500))
                        .expect("anomaly expiry lock poisoned");
                    guard = g;
                    if guard.shutdown {
                        return;
                    }
                    guard.heap.pop_expired(Time::now())
                }
                Some(deadline) => {
                    let now = Time::now();
                    if deadline <= now {
                        guard.heap.pop_expired(now)
                    } else {
                        let wait_for = Duration::from_nanos(deadline.duration_since(now));
                        let (g, _) = self
                            .expiry_cv
                            .wait_timeout(guard, wait_for)
                            .expect("anomaly expiry lock poisoned");
                        guard = g;
                        if guard.shutdown {
                            return;
                        }
                        guard.heap.pop_expired(Time::now())
                    }
                }
            };
            drop(guard);
            for id in expired_ids {
                self.clear(id);
            }
        }
    }

    fn shutdown(&self) {
        {
            let mut guard = self.expiry.lock().expect("anomaly expiry lock poisoned");
            guard.shutdown = true;
        }
        self.expiry_cv.notify_all();
        if let Some(handle) = self.worker.lock().expect("anomaly worker lock poisoned").take() {
            let _ = handle.join();
        }
    }
}

impl Drop for AnomalyFabric {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn pubsub_core(endpoint: &Arc<EndpointCore>, id: crate::terminal::TerminalId) -> Arc<PubSubTerminal> {
    let record = endpoint.get_terminal(id).expect("terminal just created");
    let TerminalCore::PubSub(terminal) = record.core else {
        unreachable!("CachedProducer terminals always build a PubSub core")
    };
    terminal
}

static NEXT_ANOMALY_ID: AtomicU64 = AtomicU64::new(1);

/// A user-declared error or warning, de-duplicated within its kind by
/// object identity (spec §3): repeated `set` calls on the same `Anomaly`
/// with no intervening `clear` republish the list at most once more,
/// with unchanged contents (spec §8's *Anomaly idempotence* property).
pub struct Anomaly {
    fabric: Arc<AnomalyFabric>,
    id: u64,
    is_error: bool,
    message: String,
    active: AtomicBool,
}

impl Anomaly {
    #[must_use]
    pub fn new(fabric: &Arc<AnomalyFabric>, is_error: bool, message: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            fabric: Arc::clone(fabric),
            id: NEXT_ANOMALY_ID.fetch_add(1, Ordering::Relaxed),
            is_error,
            message: message.into(),
            active: AtomicBool::new(false),
        })
    }

    /// Inserts this anomaly into the active set and republishes. If
    /// already active, only reschedules the expiration (no republish,
    /// since the list contents are unchanged).
    pub fn set(&self, duration: Option<Duration>) {
        let was_active = self.active.swap(true, Ordering::SeqCst);
        if was_active {
            let mut expiry = self.fabric.expiry.lock().expect("anomaly expiry lock poisoned");
            expiry.heap.remove(&self.id);
            if let Some(duration) = duration {
                expiry.heap.insert(self.id, Time::now() + duration);
            }
            drop(expiry);
            self.fabric.expiry_cv.notify_all();
            return;
        }
        self.fabric.set(self.id, self.is_error, self.message.clone(), duration);
    }

    /// Removes this anomaly from the active set and republishes, if it
    /// was active.
    pub fn clear(&self) {
        if self.active.swap(false, Ordering::SeqCst) {
            self.fabric.clear(self.id);
        }
    }

    #[must_use]
    pub fn is_error(&self) -> bool {
        self.is_error
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::Leaf;
    use crate::runtime::scheduler::Scheduler;
    use crate::types::Path;

    fn new_fabric() -> Arc<AnomalyFabric> {
        let sched = Scheduler::new();
        let leaf = Leaf::new(sched, Path::new("/proc").unwrap());
        AnomalyFabric::new(leaf.core()).unwrap()
    }

    fn last_list(terminal: &Arc<PubSubTerminal>) -> Vec<String> {
        let msg = terminal.get_cached_message().unwrap();
        rmp_serde::from_slice(msg.payload()).unwrap()
    }

    #[test]
    fn set_then_clear_updates_published_list() {
        let fabric = new_fabric();
        let anomaly = Anomaly::new(&fabric, true, "disk full");
        anomaly.set(None);
        assert_eq!(last_list(&fabric.errors_terminal), vec!["disk full".to_string()]);
        anomaly.clear();
        assert!(last_list(&fabric.errors_terminal).is_empty());
    }

    #[test]
    fn repeated_set_is_idempotent() {
        let fabric = new_fabric();
        let anomaly = Anomaly::new(&fabric, false, "queue backing up");
        anomaly.set(None);
        let after_first = last_list(&fabric.warnings_terminal);
        anomaly.set(None);
        let after_second = last_list(&fabric.warnings_terminal);
        assert_eq!(after_first, after_second);
        assert_eq!(after_second, vec!["queue backing up".to_string()]);
    }

    #[test]
    fn errors_and_warnings_are_tracked_separately() {
        let fabric = new_fabric();
        let err = Anomaly::new(&fabric, true, "err");
        let warn = Anomaly::new(&fabric, false, "warn");
        err.set(None);
        warn.set(None);
        assert_eq!(last_list(&fabric.errors_terminal), vec!["err".to_string()]);
        assert_eq!(last_list(&fabric.warnings_terminal), vec!["warn".to_string()]);
    }

    #[test]
    fn expiration_clears_automatically() {
        let fabric = new_fabric();
        let anomaly = Anomaly::new(&fabric, true, "transient glitch");
        anomaly.set(Some(Duration::from_millis(20)));
        assert_eq!(last_list(&fabric.errors_terminal), vec!["transient glitch".to_string()]);
        std::thread::sleep(Duration::from_millis(200));
        assert!(last_list(&fabric.errors_terminal).is_empty());
    }
}
