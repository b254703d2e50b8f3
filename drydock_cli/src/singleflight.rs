use futures::lock::Mutex;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Arc, Mutex as StdMutex};

/// Per-key serialization of reconciles, debounced to the latest state
///
/// One reconcile per cluster at a time; different clusters proceed in
/// parallel. Submissions arriving while a reconcile runs overwrite a
/// per-key pending slot, so the next run always picks up the freshest
/// desired state and everything older collapses away.
pub struct SingleFlight<S> {
    entries: StdMutex<BTreeMap<String, Entry<S>>>,
}

struct Entry<S> {
    lock: Arc<Mutex<()>>,
    pending: Arc<StdMutex<Option<S>>>,
}

impl<S> Clone for Entry<S> {
    fn clone(&self) -> Self {
        Entry {
            lock: self.lock.clone(),
            pending: self.pending.clone(),
        }
    }
}

impl<S> Default for SingleFlight<S> {
    fn default() -> Self {
        SingleFlight {
            entries: StdMutex::new(BTreeMap::new()),
        }
    }
}

impl<S> SingleFlight<S> {
    pub fn new() -> Self {
        Default::default()
    }

    fn entry(&self, key: &str) -> Entry<S> {
        let mut entries = self.entries.lock().unwrap();
        entries
            .entry(key.to_string())
            .or_insert_with(|| Entry {
                lock: Arc::new(Mutex::new(())),
                pending: Arc::new(StdMutex::new(None)),
            })
            .clone()
    }

    /// Submit a desired state and run whatever is freshest once the key's
    /// slot frees. `None` means this submission collapsed: a newer state
    /// overwrote it, or another waiter already ran it.
    pub async fn run<F, Fut, T>(&self, key: &str, state: S, run: F) -> Option<T>
    where
        F: FnOnce(S) -> Fut,
        Fut: Future<Output = T>,
    {
        let entry = self.entry(key);
        // later arrivals overwrite us here; only the latest survives
        *entry.pending.lock().unwrap() = Some(state);
        let guard = entry.lock.lock().await;
        let freshest = entry.pending.lock().unwrap().take();
        let out = match freshest {
            Some(s) => Some(run(s).await),
            None => {
                debug!("collapsed reconcile for '{}'", key);
                None
            }
        };
        drop(guard);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::SingleFlight;
    use futures_timer::Delay;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn serializes_per_key() {
        let sf = Arc::new(SingleFlight::new());
        let counter = Arc::new(AtomicU32::new(0));
        let mut handles = vec![];
        for i in 0..4u32 {
            let sf = sf.clone();
            let counter = counter.clone();
            handles.push(tokio::spawn(async move {
                sf.run("mgmt", i, |_| async {
                    counter.fetch_add(1, Ordering::SeqCst);
                })
                .await
            }));
        }
        let mut ran = 0;
        for h in handles {
            if h.await.unwrap().is_some() {
                ran += 1;
            }
        }
        // every non-collapsed submission executed exactly once
        assert_eq!(counter.load(Ordering::SeqCst), ran);
        assert!(ran >= 1);
    }

    #[tokio::test]
    async fn different_keys_do_not_interact() {
        let sf: SingleFlight<u32> = SingleFlight::new();
        let a = sf.run("a", 1, |s| async move { s }).await;
        let b = sf.run("b", 2, |s| async move { s }).await;
        assert_eq!(a, Some(1));
        assert_eq!(b, Some(2));
    }

    #[tokio::test]
    async fn queued_submissions_collapse_to_the_latest_state() {
        let sf = Arc::new(SingleFlight::new());
        let (tx, rx) = futures::channel::oneshot::channel::<()>();

        // the first submission takes the slot and blocks mid-run
        let first = {
            let sf = sf.clone();
            tokio::spawn(async move {
                sf.run("mgmt", 0u32, |s| async move {
                    rx.await.ok();
                    s
                })
                .await
            })
        };
        Delay::new(Duration::from_millis(50)).await;

        // two newer states queue up behind it, in order
        let second = {
            let sf = sf.clone();
            tokio::spawn(async move { sf.run("mgmt", 1u32, |s| async move { s }).await })
        };
        Delay::new(Duration::from_millis(50)).await;
        let third = {
            let sf = sf.clone();
            tokio::spawn(async move { sf.run("mgmt", 2u32, |s| async move { s }).await })
        };
        Delay::new(Duration::from_millis(50)).await;

        tx.send(()).unwrap();
        assert_eq!(first.await.unwrap(), Some(0));

        // exactly one queued waiter ran, and it ran the freshest state;
        // the overwritten intermediate submission collapsed
        let outcomes = vec![second.await.unwrap(), third.await.unwrap()];
        assert!(outcomes.contains(&Some(2)));
        assert!(outcomes.contains(&None));
    }
}
