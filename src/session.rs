//! Busy/cancel/abort bookkeeping shared between the thread executing a
//! command and the threads that may interrupt it.
//!
//! Flag updates happen under one session lock. The only transport calls made
//! under it are the non-blocking cancel/abort signals, so a signal always
//! reaches the command it was meant for. The busy thread polls the request
//! flags lock-free at the top of its packet loop; it only takes the lock to
//! record an observed cancel and, through [`BusyGuard`]'s drop, to hand the
//! radio back.

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, ThreadId};

use log::debug;
use parking_lot::{Condvar, Mutex};

use crate::error::{RadioError, Result};

#[derive(Debug, Clone, Copy)]
struct Busy {
    thread: ThreadId,
    generation: u64,
}

#[derive(Debug, Default)]
struct SessionState {
    closed: bool,
    busy: Option<Busy>,
    next_generation: u64,
    truly_cancelled: bool,
}

/// Which interruption a caller asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupt {
    Cancel,
    Abort,
}

#[derive(Debug, Default)]
pub struct RadioSession {
    state: Mutex<SessionState>,
    idle: Condvar,
    cancel_requested: AtomicBool,
    abort_requested: AtomicBool,
}

impl RadioSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the radio for the calling thread.
    pub fn begin(&self) -> Result<BusyGuard<'_>> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(RadioError::DeviceDetached);
        }
        if let Some(busy) = state.busy {
            if busy.thread == thread::current().id() {
                return Err(RadioError::InvalidParameter(
                    "command issued from within its own packet callback".into(),
                ));
            }
            return Err(RadioError::DeviceBusy);
        }

        let generation = state.next_generation;
        state.next_generation += 1;
        state.busy = Some(Busy {
            thread: thread::current().id(),
            generation,
        });
        state.truly_cancelled = false;
        self.cancel_requested.store(false, Ordering::SeqCst);
        self.abort_requested.store(false, Ordering::SeqCst);
        Ok(BusyGuard {
            session: self,
            generation,
        })
    }

    pub fn is_busy(&self) -> bool {
        self.state.lock().busy.is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Whether the last command observed a cancel before it completed
    pub fn was_cancelled(&self) -> bool {
        self.state.lock().truly_cancelled
    }

    pub fn cancel_requested(&self) -> bool {
        self.cancel_requested.load(Ordering::Acquire)
    }

    pub fn abort_requested(&self) -> bool {
        self.abort_requested.load(Ordering::Acquire)
    }

    /// Record an interrupt request from a thread other than the busy one and
    /// run `signal` before the command in flight can release the radio.
    ///
    /// Returns the generation of that command, to be passed to
    /// [`wait_idle`](Self::wait_idle).
    pub fn request<F: FnOnce()>(&self, interrupt: Interrupt, signal: F) -> Result<u64> {
        let state = self.state.lock();
        let busy = state.busy.ok_or(RadioError::NotBusy)?;
        if busy.thread == thread::current().id() {
            return Err(RadioError::InvalidParameter(format!(
                "{:?} requested by the thread executing the command",
                interrupt
            )));
        }
        self.set_flag(interrupt);
        signal();
        drop(state);
        Ok(busy.generation)
    }

    /// Record a cancel raised by the busy thread itself (its packet sink).
    pub(crate) fn request_cancel_from_busy_thread(&self) {
        let _state = self.state.lock();
        self.set_flag(Interrupt::Cancel);
    }

    fn set_flag(&self, interrupt: Interrupt) {
        let flag = match interrupt {
            Interrupt::Cancel => &self.cancel_requested,
            Interrupt::Abort => &self.abort_requested,
        };
        flag.store(true, Ordering::Release);
    }

    /// Block until the command with `generation` has released the radio.
    pub fn wait_idle(&self, generation: u64) {
        let mut state = self.state.lock();
        while state.busy.is_some_and(|busy| busy.generation == generation) {
            self.idle.wait(&mut state);
        }
    }

    /// Mark the session closed. A command still in flight on another thread
    /// is flagged for abort and `abort` runs under the lock; its generation is
    /// returned for [`wait_idle`](Self::wait_idle).
    pub fn close<F: FnOnce()>(&self, abort: F) -> Option<u64> {
        let mut state = self.state.lock();
        state.closed = true;
        match state.busy {
            Some(busy) if busy.thread != thread::current().id() => {
                self.set_flag(Interrupt::Abort);
                abort();
                Some(busy.generation)
            }
            _ => None,
        }
    }
}

/// Proof that the holder is the busy thread. Dropping it releases the radio
/// and wakes threads waiting in [`RadioSession::wait_idle`].
#[derive(Debug)]
pub struct BusyGuard<'a> {
    session: &'a RadioSession,
    generation: u64,
}

impl BusyGuard<'_> {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Record that the cancel request was observed before completion.
    pub fn acknowledge_cancel(&self) {
        self.session.state.lock().truly_cancelled = true;
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.session.state.lock();
        if state.busy.is_some_and(|busy| busy.generation == self.generation) {
            state.busy = None;
        }
        debug!("Command {} released the radio", self.generation);
        self.session.idle.notify_all();
    }
}
