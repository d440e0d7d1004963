//! Exactly-once persistence of the counter store.
//!
//! Termination reaches the recorder two ways, and both funnel through the
//! same gate:
//!
//! 1. **Normal process exit.** The `atexit` callback runs on the exiting
//!    thread with no concurrent hook invocations possible. It takes the
//!    session lock (uncontended), flushes, and releases.
//!
//! 2. **Asynchronous termination signal.** SIGTERM can land on any thread,
//!    including one currently holding the session lock inside the hook. A
//!    signal handler that blocks on that lock can deadlock against its own
//!    thread, so the handler only ever *tries* the lock:
//!    - acquired: the handler flushes and runs the terminate policy
//!      itself; control never returns to the interrupted code;
//!    - busy: the handler sets the sticky pending flag and returns. The
//!      thread holding the lock finds the flag right after its increment
//!      (the check happens under the same lock) and performs
//!      flush-then-terminate on the handler's behalf, so the interrupted
//!      increment is included in the output.
//!
//! The `Active -> Flushing` state transition is the single exactly-once
//! gate. Whichever path wins it serializes the store; every other path
//! loses the compare-and-swap and does nothing. Double flush is
//! structurally unreachable, and losing paths are no-ops rather than
//! errors.
//!
//! The flush itself iterates the store in ascending key order and writes
//! one fixed-width record per edge. Nothing on that path allocates, so it
//! is as safe in a signal context as `write(2)` itself.

use std::sync::atomic::Ordering;

use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};

use crate::recorder::{global, Profiler};
use crate::session::SessionState;

/// What the asynchronous termination path did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationDisposition {
    /// The lock was free; this path flushed and ran the terminate policy.
    Flushed,
    /// The lock was busy; the pending flag was set and the current lock
    /// holder owns the flush.
    Deferred,
    /// The flush already happened (or never will, the state is terminal).
    AlreadyDone,
}

impl Profiler {
    /// The exactly-once gate plus the write. Caller holds the session
    /// lock.
    pub(crate) fn flush_locked(&self) {
        if !self
            .state
            .advance(SessionState::Active, SessionState::Flushing)
        {
            return;
        }
        if let Some(session) = unsafe { (*self.session.get()).as_mut() } {
            session.flush();
        }
        self.state.advance(SessionState::Flushing, SessionState::Terminated);
    }

    /// Normal-exit flush. Blocking lock acquisition is fine here: the
    /// process is exiting, no hook invocation can race us for long, and a
    /// signal-path flush that wins simply leaves us a terminal state to
    /// observe.
    pub fn flush_on_exit(&self) {
        if self.state.load() != SessionState::Active {
            return;
        }
        self.lock.acquire();
        self.flush_locked();
        self.lock.release();
    }

    /// Asynchronous termination request. Never blocks, never waits; safe
    /// to call from a signal handler.
    pub fn request_termination(&self) -> TerminationDisposition {
        if self.state.load() >= SessionState::Flushing {
            return TerminationDisposition::AlreadyDone;
        }
        if self.lock.try_acquire() {
            self.flush_locked();
            (self.terminate)();
            // Reached only under an injected terminate policy; release so
            // a harness can continue past the request.
            self.lock.release();
            TerminationDisposition::Flushed
        } else {
            // Some thread is mid-increment. Leave it the sticky flag; it
            // checks under the lock and flushes for us.
            self.term_pending.store(true, Ordering::SeqCst);
            TerminationDisposition::Deferred
        }
    }
}

extern "C" fn exit_hook() {
    global().flush_on_exit();
}

extern "C" fn termination_signal_hook(_sig: libc::c_int) {
    let _ = global().request_termination();
}

/// Register the normal-exit flush callback for the global recorder.
pub(crate) fn install_exit_hook() {
    let rc = unsafe { libc::atexit(exit_hook) };
    if rc != 0 {
        tracing::warn!("atexit registration failed, normal-exit flush disabled");
    }
}

/// Register the SIGTERM handler for the global recorder.
pub(crate) fn install_termination_handler() {
    let action = SigAction::new(
        SigHandler::Handler(termination_signal_hook),
        SaFlags::empty(),
        SigSet::empty(),
    );
    if let Err(e) = unsafe { signal::sigaction(Signal::SIGTERM, &action) } {
        tracing::warn!(error = %e, "cannot install SIGTERM handler, signal-path flush disabled");
    }
}
