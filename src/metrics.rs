//! Counters exported through the `metrics` facade.
//!
//! Only compiled with the `metrics` feature; the rest of the crate calls these
//! helpers behind `#[cfg(feature = "metrics")]`.

use metrics::counter;

use crate::core::{ErrorKind, PipelineStatus};

pub(crate) fn record_push(accepted: bool) {
    let outcome = if accepted { "accepted" } else { "rejected" };
    counter!("chunkweld_channel_pushes_total", "outcome" => outcome).increment(1);
}

pub(crate) fn record_pull() {
    counter!("chunkweld_channel_pulls_total").increment(1);
}

pub(crate) fn record_pause() {
    counter!("chunkweld_channel_pauses_total").increment(1);
}

pub(crate) fn record_channel_failure(kind: ErrorKind) {
    counter!("chunkweld_channel_failures_total", "kind" => kind.to_string()).increment(1);
}

pub(crate) fn record_pipeline_outcome(status: PipelineStatus) {
    counter!("chunkweld_pipeline_runs_total", "status" => status.to_string()).increment(1);
}
