//! Advisory lifecycle flags, optionally wired to process signals.
//!
//! Pause and resume are advisory: the owning loop polls `is_paused` between
//! operations. Termination is a one-way latch that blocking loops are
//! expected to check between operations and between polls.

use signal_hook::consts::{SIGINT, SIGTERM, SIGUSR1, SIGUSR2};
use signal_hook::{flag, low_level};
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Clone)]
pub struct Lifecycle {
    paused: Arc<AtomicBool>,
    terminated: Arc<AtomicBool>,
}

impl Lifecycle {
    /// Flags with signal handlers attached: SIGUSR1 pauses, SIGUSR2
    /// resumes, SIGINT/SIGTERM request termination.
    pub fn install() -> io::Result<Self> {
        let this = Self::detached();

        flag::register(SIGTERM, Arc::clone(&this.terminated))?;
        flag::register(SIGINT, Arc::clone(&this.terminated))?;
        flag::register(SIGUSR1, Arc::clone(&this.paused))?;
        {
            let paused = Arc::clone(&this.paused);
            // Async-signal-safe: a single atomic store.
            unsafe { low_level::register(SIGUSR2, move || paused.store(false, Ordering::SeqCst))? };
        }

        Ok(this)
    }

    /// Flags without any signal wiring, flipped only through the methods
    /// below. Used by embedding code and tests.
    pub fn detached() -> Self {
        Self {
            paused: Arc::new(AtomicBool::new(false)),
            terminated: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::Acquire)
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::Release);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::Release);
    }

    pub fn terminate(&self) {
        self.terminated.store(true, Ordering::Release);
    }

    /// The raw termination latch, for loops that take an `&AtomicBool`.
    pub fn terminated_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.terminated)
    }
}
