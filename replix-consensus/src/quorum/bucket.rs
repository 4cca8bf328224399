use std::{
    collections::{HashMap, HashSet},
    fmt::Display,
    hash::Hash,
    sync::{Arc, Mutex, PoisonError},
};

use replix_common::{ConfigurationError, NodeId};
use tokio::sync::watch;

pub type ValueKeyFn<R, V> = Arc<dyn Fn(&R) -> V + Send + Sync>;
pub type ResponderFn<R> = Arc<dyn Fn(&R) -> NodeId + Send + Sync>;
pub type AcceptFn<R> = Arc<dyn Fn(&R) -> bool + Send + Sync>;

/// Single-assignment outcome slot of a bucket.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution<R> {
    Pending,
    Agreed(R),
    Cancelled,
}

impl<R> Resolution<R> {
    pub fn is_pending(&self) -> bool {
        matches!(self, Resolution::Pending)
    }
}

/// What happened to one reply handed to a bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyOutcome {
    /// Responder already counted, or the reply was not for this bucket.
    Ignored,
    /// Counted; `count` is the new tally of its value key.
    Counted { count: usize },
    /// Counted and this reply made the bucket resolve.
    Resolved { count: usize },
}

/// Snapshot of a bucket's tally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuorumStatus {
    pub unique_responders: usize,
    /// One entry per distinct value key, labelled with its display form and
    /// sorted by label. Keys that display alike keep separate entries.
    pub counts: Vec<(String, usize)>,
    pub required_threshold: usize,
}

impl QuorumStatus {
    pub fn quorum_reached(&self) -> bool {
        self.counts.iter().map(|(_, count)| *count).max().unwrap_or(0) >= self.required_threshold
    }

    /// Highest count among keys displayed as `label`.
    pub fn count_of(&self, label: &str) -> Option<usize> {
        self.counts
            .iter()
            .filter(|(key, _)| key == label)
            .map(|(_, count)| *count)
            .max()
    }
}

/// Object-safe view of a [`QuorumBucket`] with its value-key type erased, so
/// a tracker can hold buckets that group replies differently.
pub trait Ballot<R>: Send + Sync {
    fn required(&self) -> usize;
    fn can_accept(&self, reply: &R) -> bool;
    fn add_reply(&self, reply: R) -> ReplyOutcome;
    fn status(&self) -> QuorumStatus;
    fn subscribe(&self) -> watch::Receiver<Resolution<R>>;
    /// Resolves a pending bucket as cancelled. `false` if it already resolved.
    fn cancel(&self) -> bool;
}

struct Tally<V, R> {
    responders: HashSet<NodeId>,
    counts: HashMap<V, usize>,
    representatives: HashMap<V, R>,
}

/// Aggregation state of one round.
///
/// Each responder is counted once; the first reply seen for a value key is
/// kept as that key's representative. The bucket resolves exactly once, the
/// first time a key's count reaches `required`. Later replies are still
/// tallied but never change the outcome.
pub struct QuorumBucket<R, V> {
    required: usize,
    accepts: Option<AcceptFn<R>>,
    value_key_of: ValueKeyFn<R, V>,
    responder_id_of: ResponderFn<R>,
    tally: Mutex<Tally<V, R>>,
    resolution: watch::Sender<Resolution<R>>,
}

impl<R, V> QuorumBucket<R, V>
where
    R: Clone + Send + Sync + 'static,
    V: Eq + Hash + Clone + Display + Send + Sync + 'static,
{
    pub fn new(
        required: usize,
        accepts: Option<AcceptFn<R>>,
        value_key_of: ValueKeyFn<R, V>,
        responder_id_of: ResponderFn<R>,
    ) -> Result<Self, ConfigurationError> {
        if required == 0 {
            return Err(ConfigurationError::InvalidThreshold);
        }

        let (resolution, _) = watch::channel(Resolution::Pending);
        Ok(Self {
            required,
            accepts,
            value_key_of,
            responder_id_of,
            tally: Mutex::new(Tally {
                responders: HashSet::new(),
                counts: HashMap::new(),
                representatives: HashMap::new(),
            }),
            resolution,
        })
    }

    pub fn resolution(&self) -> Resolution<R> {
        self.resolution.borrow().clone()
    }
}

impl<R, V> Ballot<R> for QuorumBucket<R, V>
where
    R: Clone + Send + Sync + 'static,
    V: Eq + Hash + Clone + Display + Send + Sync + 'static,
{
    fn required(&self) -> usize {
        self.required
    }

    fn can_accept(&self, reply: &R) -> bool {
        self.accepts.as_ref().map(|accepts| accepts(reply)).unwrap_or(false)
    }

    fn add_reply(&self, reply: R) -> ReplyOutcome {
        if let Some(accepts) = &self.accepts {
            if !accepts(&reply) {
                return ReplyOutcome::Ignored;
            }
        }

        let responder = (self.responder_id_of)(&reply);
        let key = (self.value_key_of)(&reply);

        let mut tally = self.tally.lock().unwrap_or_else(PoisonError::into_inner);
        if !tally.responders.insert(responder) {
            return ReplyOutcome::Ignored;
        }

        let count = {
            let slot = tally.counts.entry(key.clone()).or_insert(0);
            *slot += 1;
            *slot
        };
        let representative = tally.representatives.entry(key).or_insert(reply).clone();

        if count >= self.required {
            let resolved = self.resolution.send_if_modified(|state| {
                if state.is_pending() {
                    *state = Resolution::Agreed(representative);
                    true
                } else {
                    false
                }
            });
            if resolved {
                return ReplyOutcome::Resolved { count };
            }
        }

        ReplyOutcome::Counted { count }
    }

    fn status(&self) -> QuorumStatus {
        let tally = self.tally.lock().unwrap_or_else(PoisonError::into_inner);
        let mut counts: Vec<(String, usize)> =
            tally.counts.iter().map(|(key, count)| (key.to_string(), *count)).collect();
        counts.sort();
        QuorumStatus {
            unique_responders: tally.responders.len(),
            counts,
            required_threshold: self.required,
        }
    }

    fn subscribe(&self) -> watch::Receiver<Resolution<R>> {
        self.resolution.subscribe()
    }

    fn cancel(&self) -> bool {
        self.resolution.send_if_modified(|state| {
            if state.is_pending() {
                *state = Resolution::Cancelled;
                true
            } else {
                false
            }
        })
    }
}
