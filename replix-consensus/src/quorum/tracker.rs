use std::{
    collections::HashMap,
    fmt::Display,
    hash::Hash,
    sync::{Arc, PoisonError, RwLock},
    time::Duration,
};

use replix_common::{ConfigurationError, NodeId, QuorumError};
use tracing::{debug, info};

use super::bucket::{
    AcceptFn, Ballot, QuorumBucket, QuorumStatus, ReplyOutcome, Resolution,
};

/// Registry of in-flight rounds keyed by request id.
///
/// Buckets are type-erased over their value key, so one tracker can hold
/// rounds that group replies in different ways. The registry lock is only held
/// to look up, insert or remove a bucket; counting happens under the bucket's
/// own lock.
pub struct QuorumTracker<K, R> {
    in_flight: RwLock<HashMap<K, Arc<dyn Ballot<R>>>>,
}

impl<K, R> Default for QuorumTracker<K, R>
where
    K: Eq + Hash + Clone + Display + Send + Sync + 'static,
    R: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, R> QuorumTracker<K, R>
where
    K: Eq + Hash + Clone + Display + Send + Sync + 'static,
    R: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self { in_flight: RwLock::new(HashMap::new()) }
    }

    /// Registers a bucket for `request_id` unless one already exists.
    /// Returns `true` if a new bucket was inserted.
    pub fn start_tracking<V, FV, FR>(
        &self,
        request_id: K,
        required_threshold: usize,
        value_key_of: FV,
        responder_id_of: FR,
    ) -> Result<bool, ConfigurationError>
    where
        V: Eq + Hash + Clone + Display + Send + Sync + 'static,
        FV: Fn(&R) -> V + Send + Sync + 'static,
        FR: Fn(&R) -> NodeId + Send + Sync + 'static,
    {
        let bucket = QuorumBucket::new(
            required_threshold,
            None,
            Arc::new(value_key_of),
            Arc::new(responder_id_of),
        )?;
        Ok(self.insert_if_absent(request_id, required_threshold, Arc::new(bucket)))
    }

    /// Like [`start_tracking`](Self::start_tracking), with a predicate that
    /// lets [`record_reply_any`](Self::record_reply_any) route id-less replies.
    pub fn start_tracking_with<V, FA, FV, FR>(
        &self,
        request_id: K,
        required_threshold: usize,
        accepts: FA,
        value_key_of: FV,
        responder_id_of: FR,
    ) -> Result<bool, ConfigurationError>
    where
        V: Eq + Hash + Clone + Display + Send + Sync + 'static,
        FA: Fn(&R) -> bool + Send + Sync + 'static,
        FV: Fn(&R) -> V + Send + Sync + 'static,
        FR: Fn(&R) -> NodeId + Send + Sync + 'static,
    {
        let accepts: AcceptFn<R> = Arc::new(accepts);
        let bucket = QuorumBucket::new(
            required_threshold,
            Some(accepts),
            Arc::new(value_key_of),
            Arc::new(responder_id_of),
        )?;
        Ok(self.insert_if_absent(request_id, required_threshold, Arc::new(bucket)))
    }

    fn insert_if_absent(&self, request_id: K, required: usize, bucket: Arc<dyn Ballot<R>>) -> bool {
        let mut in_flight = self.in_flight.write().unwrap_or_else(PoisonError::into_inner);
        if in_flight.contains_key(&request_id) {
            debug!("Already tracking requestId={request_id}, keeping existing bucket");
            return false;
        }
        debug!("Start tracking requestId={request_id} with required responses = {required}");
        in_flight.insert(request_id, bucket);
        true
    }

    fn lookup(&self, request_id: &K) -> Option<Arc<dyn Ballot<R>>> {
        self.in_flight
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(request_id)
            .cloned()
    }

    /// Hands a reply to the bucket of `request_id`. Replies for untracked ids
    /// are dropped and `false` is returned.
    pub fn record_reply(&self, request_id: &K, reply: R) -> bool {
        let Some(bucket) = self.lookup(request_id) else {
            debug!("Received reply for untracked requestId={request_id}, ignoring");
            return false;
        };

        if let ReplyOutcome::Resolved { count } = bucket.add_reply(reply) {
            debug!("✅ Quorum reached for requestId={request_id} ({count}/{})", bucket.required());
        }
        true
    }

    /// Routes a reply without a known id to the first bucket whose accept
    /// predicate claims it.
    pub fn record_reply_any(&self, reply: R) -> bool {
        let claimed = {
            let in_flight = self.in_flight.read().unwrap_or_else(PoisonError::into_inner);
            in_flight
                .iter()
                .find(|(_, bucket)| bucket.can_accept(&reply))
                .map(|(id, bucket)| (id.clone(), Arc::clone(bucket)))
        };

        match claimed {
            Some((request_id, bucket)) => {
                if let ReplyOutcome::Resolved { count } = bucket.add_reply(reply) {
                    debug!("✅ Quorum reached for requestId={request_id} ({count}/{})", bucket.required());
                }
                true
            }
            None => {
                debug!("Received reply that matched no in-flight request, ignoring");
                false
            }
        }
    }

    /// Waits for the round to resolve.
    ///
    /// On agreement the bucket is removed and its representative returned. A
    /// timeout leaves the bucket registered so the caller may wait again.
    pub async fn await_consensus(&self, request_id: &K, timeout: Duration) -> Result<R, QuorumError> {
        let bucket = self
            .lookup(request_id)
            .ok_or_else(|| QuorumError::NotTracked(request_id.to_string()))?;
        let mut rx = bucket.subscribe();

        let outcome = match tokio::time::timeout(timeout, rx.wait_for(|r| !r.is_pending())).await {
            Ok(Ok(resolution)) => resolution.clone(),
            Ok(Err(_)) => Resolution::Cancelled,
            Err(_) => {
                info!("⏳ Timeout waiting for consensus on requestId={request_id}");
                return Err(QuorumError::Timeout(request_id.to_string()));
            }
        };

        match outcome {
            Resolution::Agreed(reply) => {
                self.remove_if_same(request_id, &bucket);
                Ok(reply)
            }
            _ => Err(QuorumError::Cancelled(request_id.to_string())),
        }
    }

    fn remove_if_same(&self, request_id: &K, bucket: &Arc<dyn Ballot<R>>) {
        let mut in_flight = self.in_flight.write().unwrap_or_else(PoisonError::into_inner);
        if in_flight.get(request_id).is_some_and(|current| Arc::ptr_eq(current, bucket)) {
            in_flight.remove(request_id);
        }
    }

    /// Removes the bucket and wakes its waiters with a cancellation. Returns
    /// whether a bucket existed.
    pub fn cancel(&self, request_id: &K) -> bool {
        let removed = self
            .in_flight
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(request_id);

        match removed {
            Some(bucket) => {
                bucket.cancel();
                debug!("Cancelled tracking of requestId={request_id}");
                true
            }
            None => false,
        }
    }

    pub fn get_status(&self, request_id: &K) -> Option<QuorumStatus> {
        self.lookup(request_id).map(|bucket| bucket.status())
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.read().unwrap_or_else(PoisonError::into_inner).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use replix_common::RequestId;

    #[derive(Debug, Clone, PartialEq)]
    struct Reply {
        round: &'static str,
        replica: &'static str,
        accepted: bool,
    }

    fn reply(round: &'static str, replica: &'static str, accepted: bool) -> Reply {
        Reply { round, replica, accepted }
    }

    fn tracker() -> QuorumTracker<RequestId, Reply> {
        QuorumTracker::new()
    }

    fn track(t: &QuorumTracker<RequestId, Reply>, id: &str, required: usize) -> bool {
        t.start_tracking(
            RequestId::from(id),
            required,
            |r: &Reply| r.accepted,
            |r: &Reply| NodeId::from(r.replica),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_late_reply_recorded_without_changing_outcome() {
        let t = tracker();
        let id = RequestId::from("C1:1000");
        track(&t, "C1:1000", 2);

        assert!(t.record_reply(&id, reply("C1:1000", "n1", true)));
        let status = t.get_status(&id).unwrap();
        assert_eq!(status.unique_responders, 1);
        assert_eq!(status.count_of("true"), Some(1));
        assert!(!status.quorum_reached());

        t.record_reply(&id, reply("C1:1000", "n2", true));
        assert!(t.get_status(&id).unwrap().quorum_reached());

        t.record_reply(&id, reply("C1:1000", "n3", false));
        let status = t.get_status(&id).unwrap();
        assert_eq!(status.unique_responders, 3);
        assert_eq!(status.count_of("true"), Some(2));
        assert_eq!(status.count_of("false"), Some(1));

        let agreed = t.await_consensus(&id, Duration::from_millis(100)).await.unwrap();
        assert_eq!(agreed, reply("C1:1000", "n1", true));
        assert_eq!(t.in_flight(), 0, "awaited round is evicted");
    }

    #[tokio::test]
    async fn test_insert_if_absent_keeps_first_bucket() {
        let t = tracker();
        assert!(track(&t, "r1", 2));
        t.record_reply(&RequestId::from("r1"), reply("r1", "n1", true));

        assert!(!track(&t, "r1", 5));
        let status = t.get_status(&RequestId::from("r1")).unwrap();
        assert_eq!(status.required_threshold, 2);
        assert_eq!(status.unique_responders, 1);
    }

    #[tokio::test]
    async fn test_untracked_reply_is_dropped() {
        let t = tracker();
        assert!(!t.record_reply(&RequestId::from("nope"), reply("nope", "n1", true)));
        assert!(t.get_status(&RequestId::from("nope")).is_none());
    }

    #[tokio::test]
    async fn test_await_before_tracking_is_not_tracked() {
        let t = tracker();
        let err = t
            .await_consensus(&RequestId::from("r9"), Duration::from_millis(10))
            .await
            .unwrap_err();
        assert_eq!(err, QuorumError::NotTracked("r9".into()));
    }

    #[tokio::test]
    async fn test_timeout_keeps_bucket_for_retry() {
        let t = tracker();
        let id = RequestId::from("r1");
        track(&t, "r1", 2);
        t.record_reply(&id, reply("r1", "n1", true));

        let err = t.await_consensus(&id, Duration::from_millis(20)).await.unwrap_err();
        assert_eq!(err, QuorumError::Timeout("r1".into()));
        assert_eq!(t.in_flight(), 1);

        t.record_reply(&id, reply("r1", "n2", true));
        let agreed = t.await_consensus(&id, Duration::from_millis(20)).await.unwrap();
        assert!(agreed.accepted);
    }

    #[tokio::test]
    async fn test_split_never_resolves_until_cancelled() {
        let t = Arc::new(tracker());
        let id = RequestId::from("r1");
        track(&t, "r1", 3);
        for (replica, accepted) in [("n1", true), ("n2", false), ("n3", true), ("n4", false)] {
            t.record_reply(&id, reply("r1", replica, accepted));
        }
        assert!(!t.get_status(&id).unwrap().quorum_reached());

        let waiter = {
            let t = Arc::clone(&t);
            let id = id.clone();
            tokio::spawn(async move { t.await_consensus(&id, Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(t.cancel(&id));
        assert!(!t.cancel(&id));
        let err = waiter.await.unwrap().unwrap_err();
        assert_eq!(err, QuorumError::Cancelled("r1".into()));
        assert_eq!(t.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_waiters_observe_same_outcome() {
        let t = Arc::new(tracker());
        let id = RequestId::from("r1");
        track(&t, "r1", 2);

        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let t = Arc::clone(&t);
                let id = id.clone();
                tokio::spawn(async move { t.await_consensus(&id, Duration::from_secs(2)).await })
            })
            .collect();
        tokio::time::sleep(Duration::from_millis(20)).await;

        t.record_reply(&id, reply("r1", "n1", false));
        t.record_reply(&id, reply("r1", "n2", false));

        for outcome in futures::future::join_all(waiters).await {
            assert_eq!(outcome.unwrap().unwrap(), reply("r1", "n1", false));
        }
    }

    #[tokio::test]
    async fn test_concurrent_replies_resolve_exactly_once() {
        let t = Arc::new(tracker());
        let id = RequestId::from("r1");
        track(&t, "r1", 4);

        let replicas = ["n1", "n2", "n3", "n4", "n5", "n6"];
        let tasks: Vec<_> = replicas
            .iter()
            .map(|replica| {
                let t = Arc::clone(&t);
                let id = id.clone();
                let replica = *replica;
                tokio::spawn(async move {
                    t.record_reply(&id, reply("r1", replica, true));
                    t.record_reply(&id, reply("r1", replica, true));
                })
            })
            .collect();
        futures::future::join_all(tasks).await;

        let status = t.get_status(&id).unwrap();
        assert_eq!(status.unique_responders, 6);
        assert_eq!(status.count_of("true"), Some(6));
        assert!(t.await_consensus(&id, Duration::from_millis(50)).await.is_ok());
    }

    #[tokio::test]
    async fn test_record_reply_any_routes_by_predicate() {
        let t = tracker();
        for round in ["r1", "r2"] {
            t.start_tracking_with(
                RequestId::from(round),
                1,
                move |r: &Reply| r.round == round,
                |r: &Reply| r.accepted,
                |r: &Reply| NodeId::from(r.replica),
            )
            .unwrap();
        }

        assert!(t.record_reply_any(reply("r2", "n1", true)));
        assert!(!t.record_reply_any(reply("r3", "n1", true)));

        assert!(t.get_status(&RequestId::from("r2")).unwrap().quorum_reached());
        assert_eq!(t.get_status(&RequestId::from("r1")).unwrap().unique_responders, 0);
    }
}
