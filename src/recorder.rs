//! The hot-path entry point called on every monitored function entry.
//!
//! Instrumentation hands the recorder two raw machine words per call: the
//! caller's return address and the call-site address. The recorder ensures
//! the session exists (first call in the process pays for initialization),
//! bumps the edge counter under the session lock, and, still under the
//! lock, checks whether an asynchronous termination request arrived while
//! this increment was in flight. If so, this thread owns the flush.
//!
//! The contract with instrumented code is strict: callable from any number
//! of threads, any argument values, never blocks for long, never unwinds,
//! never fails the host.
//!
//! # Reentrancy
//!
//! The hook itself executes code (map insertion can allocate, session
//! initialization does file I/O). If the host instruments its allocator or
//! libc wrappers, those calls re-enter the hook on the same thread, which
//! would self-deadlock on the non-reentrant session lock. A per-thread
//! in-hook flag makes nested invocations return immediately; the dropped
//! events are the recorder's own machinery, not host calls.

use std::cell::{Cell, UnsafeCell};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};

use crate::config::ProfileConfig;
use crate::session::{RawLock, Session, SessionState, StateCell};

/// Process-wide recorder: lifecycle state, session lock, sticky
/// termination flag and the session value.
///
/// The process has exactly one (the [`global`] static, reached by the
/// C-ABI hook), but the type is an ordinary struct so harnesses can run
/// private instances with an injected [`Session`] and terminate policy.
pub struct Profiler {
    pub(crate) state: StateCell,
    pub(crate) lock: RawLock,
    pub(crate) term_pending: AtomicBool,
    pub(crate) session: UnsafeCell<Option<Session>>,
    pub(crate) terminate: fn(),
}

// The session cell is only reached while holding the lock.
unsafe impl Sync for Profiler {}

static PROFILER: Profiler = Profiler::new();

/// The process-global recorder instance.
pub fn global() -> &'static Profiler {
    &PROFILER
}

fn default_terminate() {
    // Reference behavior: no return to normal control flow once a
    // termination request has been honored. abort() also leaves a core
    // dump where the platform produces one.
    std::process::abort();
}

thread_local! {
    static IN_HOOK: Cell<bool> = const { Cell::new(false) };
}

/// Per-thread reentrancy fence. `enter` fails when this thread is already
/// inside the hook, or when thread-local storage is being torn down.
struct ReentryGuard;

impl ReentryGuard {
    fn enter() -> Option<Self> {
        IN_HOOK
            .try_with(|flag| {
                if flag.get() {
                    None
                } else {
                    flag.set(true);
                    Some(ReentryGuard)
                }
            })
            .unwrap_or(None)
    }
}

impl Drop for ReentryGuard {
    fn drop(&mut self) {
        let _ = IN_HOOK.try_with(|flag| flag.set(false));
    }
}

impl Profiler {
    pub const fn new() -> Self {
        Self::with_terminate(default_terminate)
    }

    /// A recorder with a substitute terminate-after-flush policy. The
    /// default policy aborts; a harness can inject a function that
    /// returns, in which case the hot path releases the lock and the
    /// session stays terminated.
    pub const fn with_terminate(terminate: fn()) -> Self {
        Self {
            state: StateCell::new(),
            lock: RawLock::new(),
            term_pending: AtomicBool::new(false),
            session: UnsafeCell::new(None),
            terminate,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state.load()
    }

    /// Whether a deferred termination request is waiting for the next
    /// lock holder.
    pub fn termination_pending(&self) -> bool {
        self.term_pending.load(Ordering::SeqCst)
    }

    /// Record one call edge. The entry point for every hook invocation.
    pub fn on_call(&self, caller: u64, callsite: u64) {
        // Fast path out once the flush has started; late arrivals must
        // not touch the store.
        if self.state.load() >= SessionState::Flushing {
            return;
        }
        let Some(_guard) = ReentryGuard::enter() else {
            return;
        };

        self.lock.acquire();
        match self.state.load() {
            SessionState::Uninitialized => self.initialize_locked(),
            SessionState::Active => {}
            _ => {
                self.lock.release();
                return;
            }
        }

        if let Some(session) = unsafe { (*self.session.get()).as_mut() } {
            session.record(caller, callsite);
        }

        // Checked under the same lock as the increment: a termination
        // request that lost the try-acquire race hands the flush to us,
        // and our increment above is included in what gets written.
        if self.term_pending.load(Ordering::SeqCst) {
            self.flush_locked();
            (self.terminate)();
            // Reached only under an injected terminate policy.
        }
        self.lock.release();
    }

    /// Install `session` directly, bypassing environment configuration
    /// and process-hook registration. Injection seam for embedders and
    /// tests; returns false if a session already exists.
    pub fn activate(&self, session: Session) -> bool {
        self.lock.acquire();
        let fresh = self
            .state
            .advance(SessionState::Uninitialized, SessionState::Initializing);
        if fresh {
            unsafe { *self.session.get() = Some(session) };
            self.state.advance(SessionState::Initializing, SessionState::Active);
        }
        self.lock.release();
        fresh
    }

    /// Run `f` against the current session while holding the session
    /// lock. Observation seam for tests and embedders.
    pub fn with_session<R>(&self, f: impl FnOnce(Option<&Session>) -> R) -> R {
        self.lock.acquire();
        let result = f(unsafe { (*self.session.get()).as_ref() });
        self.lock.release();
        result
    }

    /// First-call initialization. Runs under the lock; the state CAS
    /// makes the body execute exactly once per process even if the lock
    /// discipline ever changed.
    fn initialize_locked(&self) {
        if !self
            .state
            .advance(SessionState::Uninitialized, SessionState::Initializing)
        {
            return;
        }
        let session = Session::open(ProfileConfig::from_env());
        unsafe { *self.session.get() = Some(session) };
        self.install_process_hooks();
        self.state.advance(SessionState::Initializing, SessionState::Active);
    }

    /// Exit and signal hooks reference the global instance, so only the
    /// global instance registers them.
    fn install_process_hooks(&self) {
        if std::ptr::eq(self, &PROFILER) {
            crate::flush::install_exit_hook();
            crate::flush::install_termination_handler();
        }
    }
}

impl Default for Profiler {
    fn default() -> Self {
        Self::new()
    }
}

/// Record a call edge against the process-global recorder.
pub fn on_call(caller: u64, callsite: u64) {
    PROFILER.on_call(caller, callsite);
}

/// C ABI hook for compiler-generated instrumentation (`-pg`-style entry
/// stubs). Two raw machine words in, nothing out, never unwinds.
#[no_mangle]
pub extern "C" fn __mcount_internal(caller: libc::c_ulong, callsite: libc::c_ulong) {
    let _ = catch_unwind(AssertUnwindSafe(|| {
        PROFILER.on_call(caller as u64, callsite as u64);
    }));
}
