//! Per-lane serial execution.
//!
//! A lane is an opaque id bound to a single worker task consuming a bounded
//! FIFO queue. Work on one lane runs strictly in submission order, one item
//! at a time; distinct lanes run in parallel. Submission is two-phase so a
//! full lane plus a cancelled token yields cancellation instead of blocking.

use crate::error::{Error, LaneError, Result};
use futures::FutureExt as _;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use tokio::sync::{RwLock, mpsc, oneshot};
use tokio_util::sync::CancellationToken;

/// Bound on queued items per lane.
pub const DEFAULT_LANE_CAPACITY: usize = 4096;

/// A queued unit of work. The completion channel and the panic boundary are
/// baked in at submission time, so the worker only ever awaits it.
type LaneItem = futures::future::BoxFuture<'static, ()>;

/// Serializes work per lane id; lanes run in parallel with each other.
pub struct LaneQueue {
    lanes: RwLock<HashMap<String, mpsc::Sender<LaneItem>>>,
    capacity: usize,
}

impl Default for LaneQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl LaneQueue {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_LANE_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            lanes: RwLock::new(HashMap::new()),
            capacity,
        }
    }

    /// Run `work` on the lane identified by `lane_id`.
    ///
    /// Accepted items on the same lane execute in submission order.
    /// Cancellation observed before the item starts (while enqueueing or
    /// while queued) returns [`Error::Cancelled`] without running the work.
    /// A panic inside `work` is caught and returned as [`LaneError::Panic`];
    /// the lane stays usable.
    pub async fn run<F, T>(&self, cancel: &CancellationToken, lane_id: &str, work: F) -> Result<T>
    where
        F: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        if lane_id.is_empty() {
            return Err(LaneError::EmptyLaneId.into());
        }

        let sender = self.lane_sender(lane_id).await;

        let (done_tx, done_rx) = oneshot::channel::<Result<T>>();
        let item_cancel = cancel.clone();
        let item: LaneItem = async move {
            // Cancellation observed at the top of the worker: signal back
            // instead of executing.
            if item_cancel.is_cancelled() {
                let _ = done_tx.send(Err(Error::Cancelled));
                return;
            }
            let outcome = match AssertUnwindSafe(work).catch_unwind().await {
                Ok(result) => result,
                Err(payload) => Err(LaneError::Panic(panic_message(payload.as_ref())).into()),
            };
            let _ = done_tx.send(outcome);
        }
        .boxed();

        // Phase 1: claim a queue slot, or bail on cancellation. A full lane
        // must never turn a cancelled call into an indefinite block.
        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            permit = sender.reserve() => permit.map_err(|_| LaneError::Closed)?,
        };
        permit.send(item);

        // Phase 2: await completion, or abandon the item on cancellation.
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Cancelled),
            outcome = done_rx => outcome.unwrap_or_else(|_| Err(LaneError::Closed.into())),
        }
    }

    /// Number of distinct lane ids observed so far.
    pub async fn lane_count(&self) -> usize {
        self.lanes.read().await.len()
    }

    /// Get or lazily create the lane's queue sender.
    async fn lane_sender(&self, lane_id: &str) -> mpsc::Sender<LaneItem> {
        if let Some(sender) = self.lanes.read().await.get(lane_id) {
            return sender.clone();
        }

        let mut lanes = self.lanes.write().await;
        // Re-check: another submitter may have won the race.
        if let Some(sender) = lanes.get(lane_id) {
            return sender.clone();
        }

        let (tx, mut rx) = mpsc::channel::<LaneItem>(self.capacity);
        let worker_lane = lane_id.to_string();
        tokio::spawn(async move {
            tracing::debug!(lane_id = %worker_lane, "lane worker started");
            while let Some(item) = rx.recv().await {
                item.await;
            }
            tracing::debug!(lane_id = %worker_lane, "lane worker stopped");
        });

        lanes.insert(lane_id.to_string(), tx.clone());
        tx
    }
}

impl std::fmt::Debug for LaneQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LaneQueue")
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;
    use tokio::sync::Mutex;

    #[tokio::test(start_paused = true)]
    async fn fifo_within_a_lane_under_contention() {
        let queue = Arc::new(LaneQueue::new());
        let order = Arc::new(Mutex::new(Vec::<String>::new()));
        let (release_tx, release_rx) = oneshot::channel::<()>();

        // Block the lane on the first item.
        let blocker = {
            let queue = queue.clone();
            let order = order.clone();
            tokio::spawn(async move {
                queue
                    .run(&CancellationToken::new(), "general", async move {
                        order.lock().await.push("block".into());
                        let _ = release_rx.await;
                        Ok(())
                    })
                    .await
            })
        };

        // Submit five more with small inter-submission delays so acceptance
        // order is fixed.
        let mut handles = Vec::new();
        for label in ["msg-A", "msg-B", "msg-C", "msg-D", "msg-E"] {
            tokio::time::sleep(Duration::from_millis(10)).await;
            let queue = queue.clone();
            let order = order.clone();
            handles.push(tokio::spawn(async move {
                queue
                    .run(&CancellationToken::new(), "general", async move {
                        order.lock().await.push(label.into());
                        Ok(())
                    })
                    .await
            }));
        }

        tokio::time::sleep(Duration::from_millis(10)).await;
        release_tx.send(()).unwrap();

        blocker.await.unwrap().unwrap();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let observed = order.lock().await.clone();
        assert_eq!(
            observed,
            vec!["block", "msg-A", "msg-B", "msg-C", "msg-D", "msg-E"]
        );
    }

    #[tokio::test]
    async fn distinct_lanes_run_in_parallel() {
        let queue = Arc::new(LaneQueue::new());
        let (release_tx, release_rx) = oneshot::channel::<()>();

        let blocked = {
            let queue = queue.clone();
            tokio::spawn(async move {
                queue
                    .run(&CancellationToken::new(), "slow", async move {
                        let _ = release_rx.await;
                        Ok("slow-done")
                    })
                    .await
            })
        };

        // The other lane completes while "slow" is still blocked.
        let fast = queue
            .run(&CancellationToken::new(), "fast", async { Ok("fast-done") })
            .await
            .unwrap();
        assert_eq!(fast, "fast-done");

        release_tx.send(()).unwrap();
        assert_eq!(blocked.await.unwrap().unwrap(), "slow-done");
        assert_eq!(queue.lane_count().await, 2);
    }

    #[tokio::test]
    async fn empty_lane_id_is_rejected() {
        let queue = LaneQueue::new();
        let error = queue
            .run(&CancellationToken::new(), "", async { Ok(()) })
            .await
            .unwrap_err();
        assert!(matches!(error, Error::Lane(LaneError::EmptyLaneId)));
    }

    #[tokio::test]
    async fn pre_cancelled_token_never_runs_work() {
        let queue = LaneQueue::new();
        let ran = Arc::new(AtomicBool::new(false));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let ran_flag = ran.clone();
        let error = queue
            .run(&cancel, "general", async move {
                ran_flag.store(true, Ordering::SeqCst);
                Ok(())
            })
            .await
            .unwrap_err();

        assert!(error.is_cancellation());
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn full_lane_with_cancelled_token_returns_cancellation() {
        let queue = Arc::new(LaneQueue::with_capacity(1));
        let (release_tx, release_rx) = oneshot::channel::<()>();

        // Occupy the worker.
        let blocker = {
            let queue = queue.clone();
            tokio::spawn(async move {
                queue
                    .run(&CancellationToken::new(), "general", async move {
                        let _ = release_rx.await;
                        Ok(())
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        // Fill the single queue slot.
        let queued = {
            let queue = queue.clone();
            tokio::spawn(async move {
                queue
                    .run(&CancellationToken::new(), "general", async { Ok(()) })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        // This submission finds the lane full; cancelling it must unblock.
        let cancel = CancellationToken::new();
        let ran = Arc::new(AtomicBool::new(false));
        let ran_flag = ran.clone();
        let stuck = {
            let queue = queue.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                queue
                    .run(&cancel, "general", async move {
                        ran_flag.store(true, Ordering::SeqCst);
                        Ok(())
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();

        let error = stuck.await.unwrap().unwrap_err();
        assert!(error.is_cancellation());
        assert!(!ran.load(Ordering::SeqCst));

        release_tx.send(()).unwrap();
        blocker.await.unwrap().unwrap();
        queued.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn panics_are_recovered_and_the_lane_survives() {
        let queue = LaneQueue::new();
        let cancel = CancellationToken::new();

        let error = queue
            .run(&cancel, "general", async {
                panic!("tool exploded");
                #[allow(unreachable_code)]
                Ok(())
            })
            .await
            .unwrap_err();
        match error {
            Error::Lane(LaneError::Panic(message)) => {
                assert!(message.contains("tool exploded"));
            }
            other => panic!("unexpected error {other:?}"),
        }

        // Lane still serves work after the panic.
        let value = queue.run(&cancel, "general", async { Ok(7) }).await.unwrap();
        assert_eq!(value, 7);
        assert_eq!(queue.lane_count().await, 1);
    }

    #[tokio::test]
    async fn lane_count_tracks_distinct_ids() {
        let queue = LaneQueue::new();
        let cancel = CancellationToken::new();
        for lane in ["a", "b", "c", "a"] {
            queue.run(&cancel, lane, async { Ok(()) }).await.unwrap();
        }
        assert_eq!(queue.lane_count().await, 3);
    }
}
