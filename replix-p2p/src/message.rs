use serde::{Deserialize, Serialize};

use replix_common::message::{ClientReply, ClientRequest};

/// RPC method names, used by the activity gate to decide what may pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
    Request,
    Reply,
    SetActive,
    GetLog,
    GetDb,
    GetStatus,
    GetNewViews,
}

/// One inbound call as seen by a node's endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Frame {
    Request(ClientRequest),
    Reply(ClientReply),
    SetActive { active: bool },
    GetLog,
    GetDb,
    GetStatus { sequence: u64 },
    GetNewViews,
}

impl Frame {
    pub fn operation(&self) -> Operation {
        match self {
            Frame::Request(_) => Operation::Request,
            Frame::Reply(_) => Operation::Reply,
            Frame::SetActive { .. } => Operation::SetActive,
            Frame::GetLog => Operation::GetLog,
            Frame::GetDb => Operation::GetDb,
            Frame::GetStatus { .. } => Operation::GetStatus,
            Frame::GetNewViews => Operation::GetNewViews,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Response {
    Empty,
    Ack(bool),
    Text(String),
}
