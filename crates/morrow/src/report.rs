//! Unhandled-rejection reporting.

use crate::value::Value;

/// Diagnostic sink for rejections that settle with nobody listening.
///
/// The engine invokes this from a scheduled task, exactly once per
/// settlement point whose continuation queue drained empty while rejected.
/// It is reporting only; the rejection itself is unaffected.
pub trait RejectionSink: Send + Sync {
    /// Report one unhandled rejection reason.
    fn unhandled_rejection(&self, reason: &Value);
}

/// Default sink: prints the reason to stderr.
pub struct StderrSink;

impl RejectionSink for StderrSink {
    fn unhandled_rejection(&self, reason: &Value) {
        eprintln!("morrow: unhandled rejection: {reason}");
    }
}

/// Sink that discards every report.
pub struct NullSink;

impl RejectionSink for NullSink {
    fn unhandled_rejection(&self, _reason: &Value) {}
}
