//! Cancellation plumbing (SIGINT + overall deadline)
//!
//! One shared [`CancelState`] serves a whole run: the ctrl-c handler feeds
//! it, the optional overall deadline is folded into it, and the scheduler
//! workers and the job runner poll it between wait attempts.
//!
//! Protocol:
//! 1. First interrupt: request a graceful stop. Workers stop claiming items,
//!    in-flight children are terminated, a partial report is still written.
//! 2. Second interrupt: exit the process immediately.
//! 3. Further interrupts are ignored.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

/// Exit code for an immediate exit on the second interrupt (128 + SIGINT).
pub const EXIT_CODE_SECOND_INTERRUPT: i32 = 130;

/// Why a run is being cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// Operator interrupt (ctrl-c / SIGTERM).
    Interrupt,
    /// The run's overall wall-clock budget expired.
    DeadlineExpired,
}

impl CancelReason {
    pub fn describe(&self) -> &'static str {
        match self {
            CancelReason::Interrupt => "interrupted",
            CancelReason::DeadlineExpired => "overall timeout expired",
        }
    }
}

/// Shared cancellation state for one run.
#[derive(Debug)]
pub struct CancelState {
    /// First signal received (or deadline expired): stop claiming work.
    requested: AtomicBool,
    /// Second signal received: exit immediately.
    immediate: AtomicBool,
    /// Signal count, for the first/second/ignore protocol.
    signal_count: AtomicU8,
    /// First reason wins; later requests do not overwrite it.
    reason: Mutex<Option<CancelReason>>,
    /// Optional wall-clock budget for the whole run.
    deadline: Option<Instant>,
}

impl CancelState {
    pub fn new() -> Self {
        Self::with_deadline(None)
    }

    pub fn with_deadline(deadline: Option<Instant>) -> Self {
        Self {
            requested: AtomicBool::new(false),
            immediate: AtomicBool::new(false),
            signal_count: AtomicU8::new(0),
            reason: Mutex::new(None),
            deadline,
        }
    }

    /// Request cancellation. The first recorded reason is kept.
    pub fn request(&self, reason: CancelReason) {
        self.requested.store(true, Ordering::SeqCst);
        if let Ok(mut slot) = self.reason.lock() {
            slot.get_or_insert(reason);
        }
    }

    /// True once cancellation is requested. Also the place where the overall
    /// deadline is enforced: every poller converts an expired deadline into a
    /// request, so blocked workers notice it without a watchdog thread.
    pub fn is_requested(&self) -> bool {
        if self.requested.load(Ordering::SeqCst) {
            return true;
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                self.request(CancelReason::DeadlineExpired);
                return true;
            }
        }
        false
    }

    pub fn is_immediate(&self) -> bool {
        self.immediate.load(Ordering::SeqCst)
    }

    pub fn signal_count(&self) -> u8 {
        self.signal_count.load(Ordering::SeqCst)
    }

    pub fn reason(&self) -> Option<CancelReason> {
        self.reason.lock().ok().and_then(|slot| *slot)
    }

    /// Handle one delivered signal and report what to do about it.
    pub fn handle_signal(&self) -> SignalAction {
        let count = self.signal_count.fetch_add(1, Ordering::SeqCst);
        if count == 0 {
            self.request(CancelReason::Interrupt);
            SignalAction::InitiateCancellation
        } else if count == 1 {
            self.immediate.store(true, Ordering::SeqCst);
            SignalAction::ImmediateExit
        } else {
            SignalAction::Ignore
        }
    }
}

impl Default for CancelState {
    fn default() -> Self {
        Self::new()
    }
}

/// Action to take after receiving a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalAction {
    InitiateCancellation,
    ImmediateExit,
    Ignore,
}

/// Installs the process-wide interrupt handler over a shared [`CancelState`].
pub struct SignalHandler {
    state: Arc<CancelState>,
}

impl SignalHandler {
    pub fn new(state: Arc<CancelState>) -> Self {
        Self { state }
    }

    pub fn state(&self) -> Arc<CancelState> {
        Arc::clone(&self.state)
    }

    /// Install the handler for SIGINT/SIGTERM. Call once at startup; the
    /// second interrupt exits the process from inside the handler.
    pub fn install(&self) -> Result<(), ctrlc::Error> {
        let state = Arc::clone(&self.state);
        ctrlc::set_handler(move || match state.handle_signal() {
            SignalAction::InitiateCancellation => {
                eprintln!(
                    "\ninterrupt received: finishing in-flight jobs, writing a partial report \
                     (press ctrl-c again to exit immediately)"
                );
            }
            SignalAction::ImmediateExit => {
                eprintln!("\nsecond interrupt: exiting immediately");
                std::process::exit(EXIT_CODE_SECOND_INTERRUPT);
            }
            SignalAction::Ignore => {}
        })
    }
}
