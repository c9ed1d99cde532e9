//! Pause/cancel controller.
//!
//! The caller flips flags from its own thread; the transfer loop polls them
//! between chunks. Cancellation is terminal and wins over any later pause or
//! resume. Cancelling also disconnects a channel so that code blocked in a
//! `select!` (waiting for a conflict decision) wakes immediately.

use crossbeam_channel::{Receiver, Sender};
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};

/// Run state as seen by the transfer loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Running,
    Paused,
    Cancelled,
}

#[derive(Debug)]
pub struct TransferControl {
    state: Mutex<RunState>,
    changed: Condvar,
    // Dropped on cancel; receivers then observe a disconnect.
    cancel_tx: Mutex<Option<Sender<()>>>,
    cancel_rx: Receiver<()>,
}

impl TransferControl {
    pub fn new() -> Self {
        let (tx, rx) = crossbeam_channel::bounded(0);
        TransferControl {
            state: Mutex::new(RunState::Running),
            changed: Condvar::new(),
            cancel_tx: Mutex::new(Some(tx)),
            cancel_rx: rx,
        }
    }

    /// Request a pause. No effect once cancelled.
    pub fn pause(&self) {
        let mut state = self.state.lock();
        if *state == RunState::Running {
            *state = RunState::Paused;
            tracing::debug!("transfer paused");
        }
    }

    /// Resume a paused transfer. No effect once cancelled.
    pub fn resume(&self) {
        let mut state = self.state.lock();
        if *state == RunState::Paused {
            *state = RunState::Running;
            self.changed.notify_all();
            tracing::debug!("transfer resumed");
        }
    }

    /// Cancel the transfer. Idempotent.
    pub fn cancel(&self) {
        let mut state = self.state.lock();
        if *state != RunState::Cancelled {
            *state = RunState::Cancelled;
            self.cancel_tx.lock().take();
            self.changed.notify_all();
            tracing::debug!("transfer cancelled");
        }
    }

    pub fn state(&self) -> RunState {
        *self.state.lock()
    }

    pub fn is_cancelled(&self) -> bool {
        self.state() == RunState::Cancelled
    }

    /// Block while paused. Returns the state that ended the wait
    /// (`Running` or `Cancelled`), or the current state if not paused.
    pub fn wait_while_paused(&self) -> RunState {
        let mut state = self.state.lock();
        while *state == RunState::Paused {
            self.changed.wait(&mut state);
        }
        *state
    }

    /// A receiver that becomes disconnected once `cancel` is called.
    ///
    /// Nothing is ever sent on it; use it as a `select!` arm.
    pub fn cancellation(&self) -> &Receiver<()> {
        &self.cancel_rx
    }
}

impl Default for TransferControl {
    fn default() -> Self {
        Self::new()
    }
}
