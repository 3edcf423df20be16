//! Per-key single-flight execution.
//!
//! The first caller for a key becomes the leader of a "generation": its future is spawned onto the runtime and every
//! caller arriving while it runs subscribes to the same outcome instead of starting another one. The generation ends
//! when the future completes; the next call starts from scratch. Nothing is memoized across generations, errors
//! included.
//!
//! Because the origin future runs in its own task, a caller that gives up waiting (its future is dropped on timeout
//! or cancellation) does not take the fetch down with it. Whatever side effects the fetch has still happen, and the
//! remaining waiters still get the result.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt::Debug;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tracing::trace;

use crate::types::Flight;

type Ticket<T, E> = watch::Receiver<Option<Result<T, E>>>;
type TicketTable<T, E> = Mutex<HashMap<String, Ticket<T, E>>>;

/// The task computing a generation's result died without producing one.
#[derive(Error, Debug, Clone)]
#[error("in-flight call for '{key}' was abandoned")]
pub struct Abandoned {
    pub key: String,
}

pub struct Coalescer<T, E> {
    tickets: Arc<TicketTable<T, E>>,
}

// Deregisters the ticket when the leader task finishes, even by panicking.
struct TicketGuard<T, E> {
    tickets: Arc<TicketTable<T, E>>,
    key:     String,
}

impl<T, E> Drop for TicketGuard<T, E> {
    fn drop(&mut self) {
        self.tickets.lock().remove(&self.key);
    }
}

impl<T, E> Coalescer<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + From<Abandoned> + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            tickets: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Run `f` for `key` unless a call for the same key is already in flight, in which case wait for its outcome.
    ///
    /// `f` is only invoked by the generation leader. Must be called within a tokio runtime.
    pub async fn run<F, Fut>(&self, key: &str, f: F) -> Flight<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let (mut ticket, leader) = {
            // The lock is only held for the bookkeeping.
            let mut tickets = self.tickets.lock();
            if let Some(ticket) = tickets.get(key) {
                (ticket.clone(), None)
            }
            else {
                let (tx, rx) = watch::channel(None);
                tickets.insert(key.to_string(), rx.clone());
                (rx, Some(tx))
            }
        };

        let shared = leader.is_none();
        if let Some(tx) = leader {
            trace!("[{key}] starting a new generation");
            let guard = TicketGuard {
                tickets: Arc::clone(&self.tickets),
                key:     key.to_string(),
            };
            let fut = f();
            tokio::spawn(async move {
                let result = fut.await;
                // Deregister before publishing: whoever comes after this point starts a new generation.
                drop(guard);
                tx.send_replace(Some(result));
            });
        }
        else {
            trace!("[{key}] joining the generation in flight");
        }

        let result = match ticket.wait_for(Option::is_some).await {
            Ok(outcome) => outcome.clone().unwrap_or_else(|| Err(Self::abandoned(key))),
            Err(_) => Err(Self::abandoned(key)),
        };

        Flight { result, shared }
    }

    /// Number of keys with a generation in flight.
    pub fn in_flight(&self) -> usize {
        self.tickets.lock().len()
    }

    fn abandoned(key: &str) -> E {
        Abandoned { key: key.to_string() }.into()
    }
}

impl<T, E> Default for Coalescer<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + From<Abandoned> + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T, E> Debug for Coalescer<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coalescer")
            .field("in_flight", &self.tickets.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;
    use std::time::Duration;
    use tokio::sync::Notify;

    #[derive(Debug, Clone, PartialEq)]
    enum TestError {
        Failed(u32),
        Abandoned,
    }

    impl From<Abandoned> for TestError {
        fn from(_: Abandoned) -> Self {
            Self::Abandoned
        }
    }

    type TestCoalescer = Coalescer<Arc<String>, TestError>;

    #[tokio::test]
    async fn concurrent_callers_share_one_call() {
        let coalescer = Arc::new(TestCoalescer::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let release = Arc::new(Notify::new());

        let mut tasks = Vec::new();
        for _ in 0..16 {
            let coalescer = Arc::clone(&coalescer);
            let calls = Arc::clone(&calls);
            let release = Arc::clone(&release);
            tasks.push(tokio::spawn(async move {
                coalescer
                    .run("k", move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        release.notified().await;
                        Ok(Arc::new("value".to_string()))
                    })
                    .await
            }));
        }

        // Let every task register before the call completes.
        while coalescer.in_flight() == 0 {
            tokio::task::yield_now().await;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        release.notify_one();

        let mut flights = Vec::new();
        for task in tasks {
            flights.push(task.await.unwrap());
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(flights.iter().filter(|f| !f.shared).count(), 1);
        let first = flights[0].result.clone().unwrap();
        for flight in &flights {
            // The very same object for everybody.
            assert!(Arc::ptr_eq(&first, flight.result.as_ref().unwrap()));
        }
        assert_eq!(coalescer.in_flight(), 0);
    }

    #[tokio::test]
    async fn errors_are_not_memoized() {
        let coalescer = TestCoalescer::new();
        let flight = coalescer.run("k", || async { Err(TestError::Failed(1)) }).await;
        assert_eq!(flight.result, Err(TestError::Failed(1)));
        assert!(!flight.shared);

        let flight = coalescer.run("k", || async { Ok(Arc::new("ok".to_string())) }).await;
        assert_eq!(flight.result.unwrap().as_str(), "ok");
    }

    #[tokio::test]
    async fn keys_are_independent() {
        let coalescer = Arc::new(TestCoalescer::new());
        let release = Arc::new(Notify::new());

        let blocked = {
            let coalescer = Arc::clone(&coalescer);
            let release = Arc::clone(&release);
            tokio::spawn(async move {
                coalescer
                    .run("slow", move || async move {
                        release.notified().await;
                        Ok(Arc::new("slow".to_string()))
                    })
                    .await
            })
        };

        while coalescer.in_flight() == 0 {
            tokio::task::yield_now().await;
        }
        let fast = coalescer.run("fast", || async { Ok(Arc::new("fast".to_string())) }).await;
        assert_eq!(fast.result.unwrap().as_str(), "fast");
        assert!(!fast.shared);

        release.notify_one();
        assert_eq!(blocked.await.unwrap().result.unwrap().as_str(), "slow");
    }

    #[tokio::test]
    async fn cancelled_waiter_does_not_cancel_the_call() {
        let coalescer = Arc::new(TestCoalescer::new());
        let completed = Arc::new(AtomicUsize::new(0));
        let release = Arc::new(Notify::new());

        let leader = {
            let coalescer = Arc::clone(&coalescer);
            let completed = Arc::clone(&completed);
            let release = Arc::clone(&release);
            tokio::spawn(async move {
                coalescer
                    .run("k", move || async move {
                        release.notified().await;
                        completed.fetch_add(1, Ordering::SeqCst);
                        Ok(Arc::new("done".to_string()))
                    })
                    .await
            })
        };
        while coalescer.in_flight() == 0 {
            tokio::task::yield_now().await;
        }

        let follower = {
            let coalescer = Arc::clone(&coalescer);
            tokio::spawn(async move {
                coalescer.run("k", || async { Err(TestError::Failed(0)) }).await
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        leader.abort();
        assert!(leader.await.unwrap_err().is_cancelled());

        release.notify_one();
        let flight = follower.await.unwrap();
        assert!(flight.shared);
        assert_eq!(flight.result.unwrap().as_str(), "done");
        assert_eq!(completed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn panicking_call_is_abandoned() {
        let coalescer = TestCoalescer::new();
        let flight = coalescer
            .run("k", || async {
                if true {
                    panic!("boom");
                }
                Ok(Arc::new(String::new()))
            })
            .await;
        assert_eq!(flight.result, Err(TestError::Abandoned));
        assert_eq!(coalescer.in_flight(), 0);
    }
}
