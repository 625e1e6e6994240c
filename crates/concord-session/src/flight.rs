//! Shared in-flight operation
//!
//! The first caller starts the work on its own task; later callers join the
//! same shared future until it resolves. Running the work on a spawned task
//! means it completes even if every caller is dropped mid-await.

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};

type SharedResult<T, E> = Shared<BoxFuture<'static, Result<T, E>>>;

/// At most one running instance of an operation
pub struct SingleFlight<T, E> {
    slot: Mutex<Option<(u64, SharedResult<T, E>)>>,
    next_id: AtomicU64,
}

impl<T, E> SingleFlight<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + From<tokio::task::JoinError> + 'static,
{
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(None),
            next_id: AtomicU64::new(1),
        }
    }

    /// Whether an operation is currently running
    pub fn is_running(&self) -> bool {
        self.slot
            .lock()
            .as_ref()
            .is_some_and(|(_, shared)| shared.peek().is_none())
    }

    /// Join the running operation, or start `work` if none is running
    ///
    /// Returns the shared outcome and whether this call started the work.
    pub async fn run<F, Fut>(&self, work: F) -> (Result<T, E>, bool)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let (id, shared, leader) = {
            let mut slot = self.slot.lock();
            match slot.as_ref() {
                // A finished flight nobody collected is stale; start over.
                Some((id, shared)) if shared.peek().is_none() => (*id, shared.clone(), false),
                _ => {
                    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                    let handle = tokio::spawn(work());
                    let shared = async move { handle.await.map_err(E::from).and_then(|r| r) }
                        .boxed()
                        .shared();
                    *slot = Some((id, shared.clone()));
                    (id, shared, true)
                }
            }
        };

        let outcome = shared.await;

        let mut slot = self.slot.lock();
        if slot.as_ref().is_some_and(|(current, _)| *current == id) {
            *slot = None;
        }
        (outcome, leader)
    }
}

impl<T, E> Default for SingleFlight<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + From<tokio::task::JoinError> + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T, E> std::fmt::Debug for SingleFlight<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SingleFlight")
            .field("occupied", &self.slot.lock().is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq)]
    struct Failed(String);

    impl From<tokio::task::JoinError> for Failed {
        fn from(err: tokio::task::JoinError) -> Self {
            Failed(err.to_string())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_callers_share_one_run() {
        let flight: SingleFlight<u32, Failed> = SingleFlight::new();
        let runs = Arc::new(AtomicUsize::new(0));

        let work = |runs: Arc<AtomicUsize>| {
            move || async move {
                runs.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(100)).await;
                Ok(7)
            }
        };

        let (a, b) = tokio::join!(flight.run(work(runs.clone())), flight.run(work(runs.clone())));
        assert_eq!(a, (Ok(7), true));
        assert_eq!(b, (Ok(7), false));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(!flight.is_running());

        // Once settled, the next call starts a new run.
        let (c, leader) = flight.run(work(runs.clone())).await;
        assert_eq!(c, Ok(7));
        assert!(leader);
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn panicking_work_surfaces_as_error() {
        let flight: SingleFlight<u32, Failed> = SingleFlight::new();
        let (outcome, _) = flight
            .run(|| async {
                if true {
                    panic!("boom");
                }
                Ok(1)
            })
            .await;
        assert!(outcome.is_err());
    }
}
