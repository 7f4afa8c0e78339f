use metrics::{counter, histogram};
use tracing::trace;

// Counters are no-ops until a recorder is installed (see `main::run`).

pub fn inc_requests(route: &'static str) {
    counter!("photosearch_requests_total", "route" => route).increment(1);
    trace!(
        target = "photosearch.metrics",
        route = route,
        "requests_total_inc"
    );
}

pub fn stage_elapsed(stage: &'static str, elapsed_ms: u128) {
    histogram!("photosearch_stage_elapsed_ms", "stage" => stage).record(elapsed_ms as f64);
    trace!(
        target = "photosearch.metrics",
        stage = stage,
        elapsed_ms = elapsed_ms as u64,
        "stage_elapsed"
    );
}

pub fn link_probe(marketplace: &'static str, outcome: &'static str, elapsed_ms: u128) {
    counter!(
        "photosearch_link_probes_total",
        "marketplace" => marketplace,
        "outcome" => outcome
    )
    .increment(1);
    histogram!("photosearch_link_probe_ms", "marketplace" => marketplace)
        .record(elapsed_ms as f64);
    trace!(
        target = "photosearch.metrics",
        marketplace = marketplace,
        outcome = outcome,
        elapsed_ms = elapsed_ms as u64,
        "link_probe"
    );
}

pub fn validation_fallback(marketplace: &'static str) {
    counter!("photosearch_validation_fallbacks_total", "marketplace" => marketplace).increment(1);
    trace!(
        target = "photosearch.metrics",
        marketplace = marketplace,
        "validation_fallback"
    );
}
