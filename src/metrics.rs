//! Prometheus metrics for the coordinator, registered the way
//! `tikv::storage::mvcc::metrics` registers `MVCC_CONFLICT_COUNTER`: a
//! `lazy_static` block of process-global collectors.

use lazy_static::lazy_static;
use prometheus::{register_histogram, register_int_counter, Histogram, IntCounter};
use prometheus_static_metric::make_static_metric;

make_static_metric! {
    pub label_enum LockAttemptOutcome {
        started,
        succeeded,
        failed,
        timed_out,
        cancelled,
    }

    pub struct LockAttemptCounterVec: IntCounter {
        "outcome" => LockAttemptOutcome,
    }
}

lazy_static! {
    pub static ref LOCK_ATTEMPT_COUNTER_VEC: LockAttemptCounterVec = {
        let vec = prometheus::register_int_counter_vec!(
            "lock_coordinator_attempts_total",
            "Total number of lock coordinator attempt outcomes.",
            &["outcome"]
        )
        .unwrap();
        LockAttemptCounterVec::from(&vec)
    };
    pub static ref LOCK_REMAP_COUNTER: IntCounter = register_int_counter!(
        "lock_coordinator_remaps_total",
        "Total number of key remaps triggered by a peer leaving mid-attempt."
    )
    .unwrap();
    pub static ref LOCK_ATTEMPT_DURATION_SECONDS: Histogram = register_histogram!(
        "lock_coordinator_attempt_duration_seconds",
        "Latency from attempt construction to terminal resolution."
    )
    .unwrap();
}
