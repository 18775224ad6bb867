/// Progress callbacks issued at coarse milestones during a solve.
///
/// Implementations must not block; the resolver calls them synchronously
/// from its single thread.
pub trait ProgressSink {
    /// Called whenever the resolver makes observable forward progress.
    fn evaluate_progress(&self) {}

    /// Polled between phases.  Returning true requests cooperative
    /// cancellation; the resolver never interrupts a running SAT call.
    fn canceled(&self) -> bool {
        false
    }
}

/// Sink that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullProgress;

impl ProgressSink for NullProgress {}
