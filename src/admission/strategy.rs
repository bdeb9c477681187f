//! Admission strategy trait for swapping the decision algorithm.

use std::time::Instant;

use super::key::ClientKey;

/// Decides whether a request from `key` arriving at `now` may proceed.
///
/// The HTTP middleware depends only on this trait, so a token bucket or any
/// other algorithm can stand in for [`AdmissionGate`](super::AdmissionGate)
/// without touching the integration point. Implementations are called on
/// every request from many threads at once and must not block.
pub trait AdmissionStrategy: Send + Sync {
    /// Returns `true` if the request is admitted.
    fn admit(&self, key: &ClientKey, now: Instant) -> bool;
}
