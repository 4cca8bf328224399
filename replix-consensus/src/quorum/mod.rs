//! Generic quorum aggregation.
//!
//! A [`QuorumTracker`](tracker::QuorumTracker) owns one bucket per in-flight
//! round. Each bucket counts at most one reply per responder, groups replies
//! by a caller-supplied value key and resolves once, the first time any key
//! reaches the required threshold.

pub mod bucket;
pub mod tracker;
