//! Progress poll timer.
//!
//! A poll is a spawned task that offers a [`PollTick`] every period. A tick
//! that finds the previous one still unhandled is dropped, so a slow progress
//! reply is never followed by a burst of queued ticks. The controller owns at
//! most one [`PollHandle`]; dropping the handle aborts the task, so replacing
//! or clearing it is the only way to stop a poll.

use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::mpsc::Sender;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PollTick {
    pub generation: u64,
    pub session_id: String,
}

pub(crate) struct PollHandle {
    session_id: String,
    generation: u64,
    task: JoinHandle<()>,
}

impl PollHandle {
    /// Start ticking for `session_id`. The first tick fires one full period from now.
    pub fn spawn(
        session_id: String,
        generation: u64,
        period: Duration,
        tick_tx: Sender<PollTick>,
    ) -> Self {
        let sid = session_id.clone();
        let first = Instant::now() + period;
        let task = tokio::spawn(async move {
            let mut ticker = interval_at(first, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let tick = PollTick {
                    generation,
                    session_id: sid.clone(),
                };
                match tick_tx.try_send(tick) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        tracing::trace!(generation, "previous tick still pending; skipping");
                    }
                    Err(TrySendError::Closed(_)) => break,
                }
            }
        });
        Self {
            session_id,
            generation,
            task,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl Drop for PollHandle {
    fn drop(&mut self) {
        // Dropping a JoinHandle detaches the task; it has to be aborted explicitly.
        self.task.abort();
    }
}
