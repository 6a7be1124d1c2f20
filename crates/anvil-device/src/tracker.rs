//! # Submission Tracker
//!
//! Track which kernel handles the GPU is still using, by submission seqno.
//!
//! Every execbuffer is assigned the next seqno. Objects in the request are
//! busy until that seqno retires. The software GPU retires work only when
//! asked to (an explicit wait, or a test calling `retire`), which keeps
//! busy state deterministic.

use hashbrown::HashMap;

// =============================================================================
// SUBMISSION TRACKER
// =============================================================================

/// Busy tracking for submitted objects
#[derive(Debug, Default)]
pub struct SubmissionTracker {
    /// Last seqno handed out
    submitted: u64,
    /// Last seqno known complete
    completed: u64,
    /// Last seqno each handle was used by
    last_use: HashMap<u32, u64>,
    /// Statistics
    stats: TrackerStats,
}

/// Tracker statistics
#[derive(Debug, Clone, Default)]
pub struct TrackerStats {
    /// Submissions issued
    pub submissions: u64,
    /// Explicit waits that had to retire work
    pub blocking_waits: u64,
    /// Waits on objects that were already idle
    pub idle_waits: u64,
}

impl SubmissionTracker {
    /// Create new tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a submission, returning its seqno
    pub fn begin(&mut self) -> u64 {
        self.submitted += 1;
        self.stats.submissions += 1;
        self.submitted
    }

    /// Mark a handle used by `seqno`
    pub fn mark_used(&mut self, handle: u32, seqno: u64) {
        let last = self.last_use.entry(handle).or_insert(0);
        *last = (*last).max(seqno);
    }

    /// Whether the handle is still in use
    pub fn is_busy(&self, handle: u32) -> bool {
        self.last_use
            .get(&handle)
            .is_some_and(|&seqno| seqno > self.completed)
    }

    /// Whether a seqno has retired
    pub fn is_complete(&self, seqno: u64) -> bool {
        seqno <= self.completed
    }

    /// Retire every submission up to and including `seqno`
    pub fn retire(&mut self, seqno: u64) {
        self.completed = self.completed.max(seqno.min(self.submitted));
        let completed = self.completed;
        self.last_use.retain(|_, &mut last| last > completed);
    }

    /// Retire everything
    pub fn retire_all(&mut self) {
        self.retire(self.submitted);
    }

    /// Block until the handle is idle
    pub fn wait(&mut self, handle: u32) {
        match self.last_use.get(&handle).copied() {
            Some(seqno) if seqno > self.completed => {
                self.stats.blocking_waits += 1;
                self.retire(seqno);
            }
            _ => self.stats.idle_waits += 1,
        }
    }

    /// Forget a destroyed handle
    pub fn forget(&mut self, handle: u32) {
        self.last_use.remove(&handle);
    }

    /// Last seqno handed out
    pub fn submitted(&self) -> u64 {
        self.submitted
    }

    /// Last seqno retired
    pub fn completed(&self) -> u64 {
        self.completed
    }

    /// Get statistics
    pub fn stats(&self) -> &TrackerStats {
        &self.stats
    }
}
