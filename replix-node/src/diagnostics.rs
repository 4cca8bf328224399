//! Replica state served by the diagnostic reads.
//!
//! Holds the client balance table, the per-sequence status of executed
//! requests, a reply cache keyed by round, and recorded new-view summaries.
//!
//! The reply cache is bounded; balances, statuses and the ledger live as
//! long as the replica.

use std::{
    collections::{BTreeMap, HashMap, VecDeque},
    fmt,
    sync::{Mutex, PoisonError},
};

use replix_common::{
    message::{ClientRequest, Command, CommandResult},
    RequestId,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceStatus {
    Accepted,
    Committed,
    Executed,
    NoStatus,
}

impl SequenceStatus {
    pub fn code(&self) -> &'static str {
        match self {
            SequenceStatus::Accepted => "A",
            SequenceStatus::Committed => "C",
            SequenceStatus::Executed => "E",
            SequenceStatus::NoStatus => "X",
        }
    }
}

impl fmt::Display for SequenceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Result of applying one request to the state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Execution {
    pub sequence: u64,
    pub result: CommandResult,
    /// `false` when the round was already executed and the cached result is
    /// returned.
    pub fresh: bool,
}

/// Rounds remembered for replay detection before the oldest is forgotten.
pub const REPLY_CACHE_CAPACITY: usize = 4096;

#[derive(Default)]
struct Inner {
    balances: BTreeMap<String, u64>,
    next_sequence: u64,
    statuses: HashMap<u64, SequenceStatus>,
    executed: HashMap<RequestId, Execution>,
    executed_order: VecDeque<RequestId>,
    reply_cache_capacity: usize,
    ledger: Vec<String>,
    new_views: Vec<String>,
}

pub struct ReplicaState {
    inner: Mutex<Inner>,
}

impl ReplicaState {
    pub fn new(balances: BTreeMap<String, u64>) -> Self {
        Self::with_reply_cache(balances, REPLY_CACHE_CAPACITY)
    }

    /// Keeps at most `capacity` executed rounds; a round replayed after it was
    /// evicted executes again.
    pub fn with_reply_cache(balances: BTreeMap<String, u64>, capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                balances,
                next_sequence: 1,
                reply_cache_capacity: capacity.max(1),
                ..Inner::default()
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Applies `request` once. A repeated round returns the cached outcome
    /// without touching balances again.
    pub fn execute(&self, request: &ClientRequest) -> Execution {
        let mut inner = self.lock();
        let round = request.request_id();
        if let Some(previous) = inner.executed.get(&round) {
            return Execution { fresh: false, ..previous.clone() };
        }

        let sequence = inner.next_sequence.max(1);
        inner.next_sequence = sequence + 1;
        inner.statuses.insert(sequence, SequenceStatus::Accepted);

        let result = match &request.command {
            Command::Transfer(tx) => {
                let available = inner.balances.get(&tx.sender).copied().unwrap_or(0);
                let accepted = tx.amount > 0 && tx.sender != tx.receiver && available >= tx.amount;
                if accepted {
                    inner.balances.insert(tx.sender.clone(), available - tx.amount);
                    *inner.balances.entry(tx.receiver.clone()).or_insert(0) += tx.amount;
                }
                CommandResult::Transfer { accepted }
            }
            Command::Balance { account } => CommandResult::Balance {
                account: account.clone(),
                amount: inner.balances.get(account).copied(),
            },
        };

        inner.statuses.insert(sequence, SequenceStatus::Committed);
        let execution = Execution { sequence, result, fresh: true };
        if inner.executed_order.len() >= inner.reply_cache_capacity {
            if let Some(oldest) = inner.executed_order.pop_front() {
                inner.executed.remove(&oldest);
            }
        }
        inner.executed_order.push_back(round.clone());
        inner.executed.insert(round, execution.clone());
        execution
    }

    /// Appends the executed request to the replica ledger and marks its
    /// sequence executed.
    pub fn append_ledger(&self, sequence: u64, entry: String) {
        let mut inner = self.lock();
        inner.ledger.push(format!("{}: {}", sequence, entry));
        inner.statuses.insert(sequence, SequenceStatus::Executed);
    }

    pub fn status_of(&self, sequence: u64) -> SequenceStatus {
        self.lock().statuses.get(&sequence).copied().unwrap_or(SequenceStatus::NoStatus)
    }

    pub fn balance_of(&self, account: &str) -> Option<u64> {
        self.lock().balances.get(account).copied()
    }

    pub fn ledger(&self) -> Vec<String> {
        self.lock().ledger.clone()
    }

    pub fn record_new_view(&self, summary: impl Into<String>) {
        self.lock().new_views.push(summary.into());
    }

    /// `account: balance` per line, sorted by account.
    pub fn render_db(&self) -> String {
        self.lock()
            .balances
            .iter()
            .map(|(account, balance)| format!("{}: {}", account, balance))
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn render_new_views(&self) -> String {
        let inner = self.lock();
        if inner.new_views.is_empty() {
            return "No new views recorded".to_string();
        }
        inner.new_views.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use replix_common::{message::Transaction, NodeId};

    fn state() -> ReplicaState {
        ReplicaState::new(BTreeMap::from([("A".to_string(), 10), ("B".to_string(), 10)]))
    }

    fn transfer(ts: u64, from: &str, to: &str, amount: u64) -> ClientRequest {
        ClientRequest::new(
            NodeId::from(from),
            ts,
            Command::Transfer(Transaction { sender: from.into(), receiver: to.into(), amount }),
        )
    }

    #[test]
    fn test_transfer_moves_funds_once() {
        let state = state();
        let request = transfer(1, "A", "B", 4);

        let first = state.execute(&request);
        assert!(first.fresh);
        assert_eq!(first.result, CommandResult::Transfer { accepted: true });

        let again = state.execute(&request);
        assert!(!again.fresh);
        assert_eq!(again.sequence, first.sequence);

        assert_eq!(state.balance_of("A"), Some(6));
        assert_eq!(state.balance_of("B"), Some(14));
        assert_eq!(state.render_db(), "A: 6\nB: 14");
    }

    #[test]
    fn test_overdraft_rejected() {
        let state = state();
        let execution = state.execute(&transfer(1, "A", "C", 11));
        assert_eq!(execution.result, CommandResult::Transfer { accepted: false });
        assert_eq!(state.balance_of("A"), Some(10));
        assert_eq!(state.balance_of("C"), None);
    }

    #[test]
    fn test_sequence_status_progression() {
        let state = state();
        assert_eq!(state.status_of(1), SequenceStatus::NoStatus);
        assert_eq!(state.status_of(1).to_string(), "X");

        let execution = state.execute(&transfer(1, "A", "B", 1));
        assert_eq!(state.status_of(execution.sequence), SequenceStatus::Committed);

        state.append_ledger(execution.sequence, "A -> B, 1".into());
        assert_eq!(state.status_of(execution.sequence).code(), "E");
        assert_eq!(state.ledger(), vec!["1: A -> B, 1".to_string()]);
    }

    #[test]
    fn test_new_views_rendering() {
        let state = state();
        assert_eq!(state.render_new_views(), "No new views recorded");
        state.record_new_view("view 2 from n2");
        assert_eq!(state.render_new_views(), "view 2 from n2");
    }

    #[test]
    fn test_reply_cache_forgets_oldest_round() {
        let state = ReplicaState::with_reply_cache(BTreeMap::from([("A".to_string(), 10)]), 2);
        let first = transfer(1, "A", "B", 1);

        state.execute(&first);
        state.execute(&transfer(2, "A", "B", 1));
        assert!(!state.execute(&first).fresh);

        state.execute(&transfer(3, "A", "B", 1));
        let replay = state.execute(&first);
        assert!(replay.fresh);
        assert_eq!(replay.sequence, 4);
        assert_eq!(state.balance_of("A"), Some(6));
    }
}
