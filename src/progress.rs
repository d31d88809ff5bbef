//! Per-execution progress stream (§6): `(phase, status, optional tx-hash,
//! optional error, timestamp)` events. Subscribers attach and detach
//! freely; a producer with zero subscribers stops doing optional work
//! (it still drives the swap, since progress reporting is observational,
//! never load-bearing).

use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseStatus {
    Started,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub phase: String,
    pub status: PhaseStatus,
    pub tx_hash: Option<String>,
    pub error: Option<String>,
    pub timestamp: i64,
}

/// Producer-side handle, held by a coordinator for the lifetime of one
/// execution.
pub struct ProgressEmitter {
    sender: broadcast::Sender<ProgressEvent>,
}

impl ProgressEmitter {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// A new subscriber handle. Dropping the returned receiver detaches.
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.sender.subscribe()
    }

    /// Whether any subscriber is currently attached.
    pub fn has_subscribers(&self) -> bool {
        self.sender.receiver_count() > 0
    }

    /// Emit an event. Errors (no subscribers) are intentionally
    /// swallowed: a dropped progress stream never affects swap execution.
    pub fn emit(&self, event: ProgressEvent) {
        let _ = self.sender.send(event);
    }

    pub fn emit_phase(&self, phase: &str, status: PhaseStatus, now: i64) {
        self.emit(ProgressEvent {
            phase: phase.to_string(),
            status,
            tx_hash: None,
            error: None,
            timestamp: now,
        });
    }

    pub fn emit_phase_with_tx(&self, phase: &str, status: PhaseStatus, tx_hash: String, now: i64) {
        self.emit(ProgressEvent {
            phase: phase.to_string(),
            status,
            tx_hash: Some(tx_hash),
            error: None,
            timestamp: now,
        });
    }

    pub fn emit_failure(&self, phase: &str, error: String, now: i64) {
        self.emit(ProgressEvent {
            phase: phase.to_string(),
            status: PhaseStatus::Failed,
            tx_hash: None,
            error: Some(error),
            timestamp: now,
        });
    }
}

impl Default for ProgressEmitter {
    fn default() -> Self {
        Self::new(64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn a_late_subscriber_sees_only_events_after_it_attaches() {
        let emitter = ProgressEmitter::default();
        emitter.emit_phase("Initializing", PhaseStatus::Started, 1_700_000_000);

        let mut rx = emitter.subscribe();
        emitter.emit_phase("LockingSource", PhaseStatus::Started, 1_700_000_001);

        let event = rx.try_recv().unwrap();
        assert_eq!(event.phase, "LockingSource");
    }

    #[test]
    fn emitting_with_no_subscribers_does_not_panic() {
        let emitter = ProgressEmitter::default();
        assert!(!emitter.has_subscribers());
        emitter.emit_phase("Initializing", PhaseStatus::Started, 1_700_000_000);
    }
}
