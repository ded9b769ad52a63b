//! Ordered playback queue drained by a single duration-paced worker.
//!
//! Items are played strictly in enqueue order. The worker paces itself by
//! each item's declared duration rather than waiting for a client-side
//! completion event, so consecutive audio cues never overlap. The talking
//! animation is started once per unbroken run of items; when the queue
//! drains the worker clears the talking flag and raises the finished signal.
//!
//! The finished signal is level-triggered: true exactly when the queue is
//! empty and no item is being paced. The outstanding-item count and the
//! signal are updated under one lock so an enqueue racing the worker's
//! final decrement can never observe "finished" with items pending.

use crate::config::AnimationConfig;
use crate::hub::BroadcastHub;
use crate::pipeline::messages::{AnimationClip, DisplayCommand, PlaybackItem};
use crate::state::{AvatarState, StateController};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

enum WorkerMsg {
    Item(PlaybackItem),
    /// Shutdown sentinel: exit without processing anything further.
    Stop,
}

struct Shared {
    /// Items enqueued but not yet fully paced.
    outstanding: Mutex<u64>,
    /// Finished flag, flipped only while `outstanding` is locked.
    finished_tx: watch::Sender<bool>,
}

impl Shared {
    fn lock_outstanding(&self) -> std::sync::MutexGuard<'_, u64> {
        self.outstanding
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// Handle to the playback queue and its worker task.
pub struct PlaybackQueue {
    tx: mpsc::UnboundedSender<WorkerMsg>,
    shared: Arc<Shared>,
    cancel: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl PlaybackQueue {
    /// Spawn the worker and return the queue handle.
    #[must_use]
    pub fn spawn(
        hub: Arc<BroadcastHub>,
        controller: Arc<StateController>,
        animation: AnimationConfig,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (finished_tx, _) = watch::channel(true);
        let shared = Arc::new(Shared {
            outstanding: Mutex::new(0),
            finished_tx,
        });
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_worker(
            rx,
            Arc::clone(&shared),
            cancel.clone(),
            hub,
            controller,
            animation,
        ));
        Self {
            tx,
            shared,
            cancel,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Append an item to the tail of the queue and clear the finished signal.
    ///
    /// # Errors
    ///
    /// Returns an error if the worker has already been stopped.
    pub fn enqueue(&self, item: PlaybackItem) -> crate::error::Result<()> {
        {
            let mut outstanding = self.shared.lock_outstanding();
            *outstanding += 1;
            // send_replace stores the value even with no receiver alive;
            // waiters subscribe lazily and must observe the latest flag.
            self.shared.finished_tx.send_replace(false);
        }
        if self.tx.send(WorkerMsg::Item(item)).is_err() {
            let mut outstanding = self.shared.lock_outstanding();
            *outstanding -= 1;
            if *outstanding == 0 {
                self.shared.finished_tx.send_replace(true);
            }
            return Err(crate::error::AvatarError::Channel(
                "playback worker stopped".to_owned(),
            ));
        }
        Ok(())
    }

    /// Block until the queue is empty and the last item's pacing has elapsed,
    /// or until `timeout` elapses. Returns whether the queue finished.
    ///
    /// A `None` timeout waits indefinitely.
    pub async fn wait_until_finished(&self, timeout: Option<Duration>) -> bool {
        let mut rx = self.shared.finished_tx.subscribe();
        let wait = rx.wait_for(|finished| *finished);
        match timeout {
            Some(limit) => matches!(tokio::time::timeout(limit, wait).await, Ok(Ok(_))),
            None => wait.await.is_ok(),
        }
    }

    /// Request worker shutdown and wait for it to exit. Idempotent.
    ///
    /// A pacing sleep in progress is abandoned and queued items are
    /// discarded; the finished signal is raised once the worker has exited.
    pub async fn stop(&self) {
        let _ = self.tx.send(WorkerMsg::Stop);
        self.cancel.cancel();
        let handle = {
            let mut slot = self
                .handle
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            slot.take()
        };
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

async fn run_worker(
    mut rx: mpsc::UnboundedReceiver<WorkerMsg>,
    shared: Arc<Shared>,
    cancel: CancellationToken,
    hub: Arc<BroadcastHub>,
    controller: Arc<StateController>,
    animation: AnimationConfig,
) {
    let mut talking = false;
    loop {
        let msg = tokio::select! {
            () = cancel.cancelled() => break,
            msg = rx.recv() => msg,
        };
        let item = match msg {
            Some(WorkerMsg::Item(item)) => item,
            Some(WorkerMsg::Stop) | None => break,
        };

        // Start the talking animation once at the beginning of a run;
        // retriggering it per chunk causes a visible jump between segments.
        if !talking {
            hub.broadcast_display(&DisplayCommand::StartMixamo {
                clip: AnimationClip::looping(animation.talking_clip.clone()),
            })
            .await;
            controller.set_state(AvatarState::Talking).await;
            talking = true;
        }

        debug!(seq = item.seq, duration = item.duration_secs, "playing chunk");
        hub.broadcast_display(&DisplayCommand::for_item(&item)).await;

        // Pace by the declared duration so the next cue cannot overlap.
        let pace = Duration::from_secs_f64(item.duration_secs.max(0.0));
        tokio::select! {
            () = tokio::time::sleep(pace) => {}
            () = cancel.cancelled() => break,
        }

        let mut outstanding = shared.lock_outstanding();
        *outstanding -= 1;
        if *outstanding == 0 {
            shared.finished_tx.send_replace(true);
            talking = false;
        }
    }
    // Items abandoned by shutdown will never be paced; release any waiter.
    {
        let mut outstanding = shared.lock_outstanding();
        *outstanding = 0;
        shared.finished_tx.send_replace(true);
    }
    info!("playback worker exited");
}
