//! Session lifecycle: state machine, session lock, and the session value.
//!
//! A process has at most one recording session, created lazily on the first
//! hook invocation and destroyed exactly once at flush. Three pieces of
//! shared state exist, and all of them live here:
//!
//! - the lifecycle state, an atomic stepping one-way through
//!   `Uninitialized -> Initializing -> Active -> Flushing -> Terminated`;
//! - the session lock, a compare-and-swap lock chosen over a standard
//!   mutex because the asynchronous termination path must be able to
//!   *try* it without any possibility of blocking in a signal context;
//! - the [`Session`] value itself (counter store, output handle, resolved
//!   configuration), only ever touched while holding the lock.
//!
//! The state machine is the exactly-once flush gate: whichever path wins
//! the `Active -> Flushing` transition performs the flush, and every other
//! path observes a non-`Active` state and does nothing.

use std::fs::{self, File};
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use crossbeam::utils::Backoff;

use crate::call_edge::{AddressWidth, CallEdge};
use crate::config::ProfileConfig;
use crate::counter_store::CounterStore;
use crate::maps_snapshot;
use crate::record::{encode_record, MAX_RECORD_BYTES};

/// Lifecycle states, in transition order. Transitions never go backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum SessionState {
    Uninitialized = 0,
    Initializing = 1,
    Active = 2,
    Flushing = 3,
    Terminated = 4,
}

impl SessionState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => SessionState::Uninitialized,
            1 => SessionState::Initializing,
            2 => SessionState::Active,
            3 => SessionState::Flushing,
            _ => SessionState::Terminated,
        }
    }
}

/// Atomic holder for the lifecycle state.
pub(crate) struct StateCell(AtomicU8);

impl StateCell {
    pub(crate) const fn new() -> Self {
        Self(AtomicU8::new(SessionState::Uninitialized as u8))
    }

    pub(crate) fn load(&self) -> SessionState {
        SessionState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// One-way transition gate. Returns true iff this caller moved the
    /// state from `from` to `to`; losers of the race get false and must
    /// treat the operation as already done.
    pub(crate) fn advance(&self, from: SessionState, to: SessionState) -> bool {
        debug_assert!(from < to);
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// The session lock. `acquire` spins with bounded backoff; `try_acquire`
/// is a single compare-and-swap, safe to call from a signal handler.
///
/// Not reentrant: the recorder keeps a per-thread guard so instrumented
/// code reached from inside the hook never re-enters `acquire`.
pub(crate) struct RawLock {
    locked: AtomicBool,
}

impl RawLock {
    pub(crate) const fn new() -> Self {
        Self {
            locked: AtomicBool::new(false),
        }
    }

    pub(crate) fn acquire(&self) {
        let backoff = Backoff::new();
        while self
            .locked
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            backoff.snooze();
        }
    }

    /// Non-blocking acquisition. Never waits, never spins.
    pub(crate) fn try_acquire(&self) -> bool {
        self.locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    pub(crate) fn release(&self) {
        self.locked.store(false, Ordering::Release);
    }

    #[cfg(test)]
    pub(crate) fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Acquire)
    }
}

/// The per-process recording session: counter store, output handle and the
/// configuration it was opened with. Mutated only under the session lock.
///
/// `output == None` is the degraded mode: the output resource could not be
/// opened (or recording is disabled), so increments no-op and the flush
/// writes nothing. The host process is never failed by recorder I/O.
pub struct Session {
    store: CounterStore,
    output: Option<File>,
    config: ProfileConfig,
    session_dir: Option<PathBuf>,
    width_promoted: bool,
}

impl Session {
    /// Open a session per `config`: create the per-pid directory, snapshot
    /// the address-space map, open the calls output. Every failure
    /// degrades instead of propagating; the hook contract has no error
    /// channel.
    pub fn open(config: ProfileConfig) -> Self {
        if !config.enabled {
            tracing::debug!("recording disabled by environment");
            return Self::degraded(config);
        }

        let pid = std::process::id();
        let session_dir = config.session_dir(pid);
        if let Err(e) = fs::create_dir_all(&session_dir) {
            tracing::warn!(
                dir = %session_dir.display(),
                error = %e,
                "cannot create session directory, recording disabled for this process"
            );
            return Self::degraded(config);
        }

        // Snapshot before the store can accumulate anything. Failure here
        // only loses symbolization, not counts.
        let maps_path = ProfileConfig::maps_path(&session_dir);
        if let Err(e) = maps_snapshot::snapshot_proc_maps(&maps_path) {
            tracing::warn!(
                path = %maps_path.display(),
                error = %e,
                "address-space snapshot failed, continuing without it"
            );
        }

        let calls_path = ProfileConfig::calls_path(&session_dir);
        let output = match File::create(&calls_path) {
            Ok(f) => Some(f),
            Err(e) => {
                tracing::warn!(
                    path = %calls_path.display(),
                    error = %e,
                    "cannot open calls output, recording disabled for this process"
                );
                None
            }
        };

        Self {
            store: CounterStore::new(),
            output,
            config,
            session_dir: Some(session_dir),
            width_promoted: false,
        }
    }

    /// A session writing to a caller-supplied output. This is the
    /// injection seam for embedders and tests; no directory layout, no
    /// snapshot, no process-wide side effects.
    pub fn with_output(config: ProfileConfig, output: Option<File>) -> Self {
        Self {
            store: CounterStore::new(),
            output,
            config,
            session_dir: None,
            width_promoted: false,
        }
    }

    fn degraded(config: ProfileConfig) -> Self {
        Self::with_output(config, None)
    }

    /// Whether the output resource is open and counts will be persisted.
    pub fn is_recording(&self) -> bool {
        self.output.is_some()
    }

    /// Directory this session writes to, if it owns one.
    pub fn session_dir(&self) -> Option<&PathBuf> {
        self.session_dir.as_ref()
    }

    pub fn store(&self) -> &CounterStore {
        &self.store
    }

    /// Record one hook invocation. Caller holds the session lock.
    pub fn record(&mut self, caller: u64, callsite: u64) {
        if self.output.is_none() {
            return;
        }
        let edge = CallEdge::new(caller, callsite);
        if !self.width_promoted && !edge.fits(self.config.address_width) {
            // Sticky: the whole file switches to 64-bit fields rather than
            // truncating this address. Logged here, in a normal call
            // context, never from the flush path.
            self.width_promoted = true;
            tracing::warn!(
                %edge,
                configured = %self.config.address_width,
                "address exceeds configured width, promoting output to 64-bit records"
            );
        }
        self.store.increment(edge);
    }

    /// Width the records will be serialized at.
    pub fn effective_width(&self) -> AddressWidth {
        if self.width_promoted {
            AddressWidth::W64
        } else {
            self.config.address_width
        }
    }

    /// Serialize all entries in ascending key order and close the output.
    ///
    /// Runs at most once (the state machine gates callers); safe in a
    /// signal context: iteration and encoding allocate nothing, and the
    /// only syscalls are `write` and `close`. Write errors end the loop;
    /// there is nowhere to report them this late in the process lifetime.
    pub fn flush(&mut self) {
        let Some(mut output) = self.output.take() else {
            return;
        };
        let width = self.effective_width();
        let mut buf = [0u8; MAX_RECORD_BYTES];
        for entry in self.store.iter_ordered() {
            let n = encode_record(width, &entry, &mut buf);
            if output.write_all(&buf[..n]).is_err() {
                break;
            }
        }
        // Dropping the handle closes it; the session is degraded from here
        // on, and the state machine keeps anything from recording anyway.
        drop(output);
    }
}
