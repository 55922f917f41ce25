use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Run-scoped counters and flags, shared between the worker and whoever
/// holds a stop handle. Every run gets a fresh instance.
#[derive(Debug, Default)]
pub struct BatchState {
    running: AtomicBool,
    stop_requested: AtomicBool,
    interrupt: AtomicBool,
    total: AtomicUsize,
    processed: AtomicUsize,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BatchProgress {
    pub total: usize,
    pub processed: usize,
    pub running: bool,
}

impl BatchState {
    pub fn new() -> Self {
        BatchState::default()
    }

    /// Enters the running state unless a stop already arrived.
    pub fn begin(&self, total: usize) {
        self.total.store(total, Ordering::SeqCst);
        self.processed.store(0, Ordering::SeqCst);
        self.running.store(true, Ordering::SeqCst);
        // a stop racing with begin must not be lost
        if self.stop_requested.load(Ordering::SeqCst) {
            self.running.store(false, Ordering::SeqCst);
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Records that the file at `index` (1-based) is starting.
    pub fn advance(&self, index: usize) {
        debug_assert!(index <= self.total.load(Ordering::SeqCst));
        self.processed.store(index, Ordering::SeqCst);
    }

    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn request_abort(&self) {
        self.interrupt.store(true, Ordering::SeqCst);
        self.request_stop();
    }

    pub fn stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    pub fn interrupt(&self) -> &AtomicBool {
        &self.interrupt
    }

    pub fn finish(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn snapshot(&self) -> BatchProgress {
        BatchProgress {
            total: self.total.load(Ordering::SeqCst),
            processed: self.processed.load(Ordering::SeqCst),
            running: self.is_running(),
        }
    }
}
