//! Signed envelopes exchanged between clients and replicas.
//!
//! Every envelope carries a `signer_id` and a `signature` field. Both are
//! cleared before the canonical bytes are computed, so signing and
//! verification always operate on identical input.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::utils::{NodeId, RequestId};

/// Envelope that can be stamped with a signer identity and signature.
pub trait SignedEnvelope: Serialize + Clone {
    fn signer_id(&self) -> &NodeId;

    /// Raw signature bytes; an unsigned envelope reports an empty slice.
    fn signature(&self) -> &[u8];

    fn stamp(&mut self, signer_id: NodeId, signature: Vec<u8>);

    fn clear_identity(&mut self) {
        self.stamp(NodeId::default(), Vec::new());
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Transaction {
    pub sender: String,
    pub receiver: String,
    pub amount: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    Transfer(Transaction),
    Balance { account: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientRequest {
    pub client_id: NodeId,
    pub timestamp: u64,
    pub command: Command,
    #[serde(default)]
    pub signer_id: NodeId,
    #[serde(default, with = "hex::serde")]
    pub signature: Vec<u8>,
}

impl ClientRequest {
    pub fn new(client_id: NodeId, timestamp: u64, command: Command) -> Self {
        Self {
            client_id,
            timestamp,
            command,
            signer_id: NodeId::default(),
            signature: Vec::new(),
        }
    }

    pub fn request_id(&self) -> RequestId {
        RequestId::composite(&self.client_id, self.timestamp)
    }
}

impl fmt::Display for ClientRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.command {
            Command::Transfer(tx) => write!(
                f,
                "<REQUEST, TRANSFER ({} -> {}, {}), {}, {}>",
                tx.sender, tx.receiver, tx.amount, self.timestamp, self.client_id
            ),
            Command::Balance { account } => write!(
                f,
                "<REQUEST, BALANCE_REQUEST ({}), {}, {}>",
                account, self.timestamp, self.client_id
            ),
        }
    }
}

/// Outcome a replica reports for one client request. Doubles as the value
/// key replies are grouped by on the client side.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommandResult {
    Transfer { accepted: bool },
    Balance { account: String, amount: Option<u64> },
}

impl fmt::Display for CommandResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandResult::Transfer { accepted } => write!(f, "{}", accepted),
            CommandResult::Balance { account, amount: Some(amount) } => {
                write!(f, "{}={}", account, amount)
            }
            CommandResult::Balance { account, amount: None } => write!(f, "{}=?", account),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientReply {
    pub client_id: NodeId,
    pub timestamp: u64,
    pub replica_id: NodeId,
    pub result: CommandResult,
    #[serde(default)]
    pub signer_id: NodeId,
    #[serde(default, with = "hex::serde")]
    pub signature: Vec<u8>,
}

impl ClientReply {
    pub fn for_request(request: &ClientRequest, replica_id: NodeId, result: CommandResult) -> Self {
        Self {
            client_id: request.client_id.clone(),
            timestamp: request.timestamp,
            replica_id,
            result,
            signer_id: NodeId::default(),
            signature: Vec::new(),
        }
    }

    pub fn request_id(&self) -> RequestId {
        RequestId::composite(&self.client_id, self.timestamp)
    }
}

impl fmt::Display for ClientReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<REPLY, {}, {}, {}, {}>",
            self.timestamp, self.client_id, self.replica_id, self.result
        )
    }
}

macro_rules! impl_signed_envelope {
    ($($ty:ty),* $(,)?) => {
        $(
            impl SignedEnvelope for $ty {
                fn signer_id(&self) -> &NodeId {
                    &self.signer_id
                }

                fn signature(&self) -> &[u8] {
                    &self.signature
                }

                fn stamp(&mut self, signer_id: NodeId, signature: Vec<u8>) {
                    self.signer_id = signer_id;
                    self.signature = signature;
                }
            }
        )*
    };
}

impl_signed_envelope!(ClientRequest, ClientReply);
