pub mod quorum;

pub use quorum::bucket::{Ballot, QuorumBucket, QuorumStatus, ReplyOutcome, Resolution};
pub use quorum::tracker::QuorumTracker;
