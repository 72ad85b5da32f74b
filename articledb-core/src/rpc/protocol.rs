//! Request and response messages.
//!
//! A message is a one-byte opcode followed by the bincode encoding of the
//! variant's body. Unknown request opcodes decode to `None` and are answered
//! with [`Response::Empty`].

use crate::article::{ArticlePosting, ArticleRedirect, OverviewEntry};
use crate::blob::{Blob, CompressionHint, DayId};
use crate::codec::{from_bytes, to_bytes};
use crate::error::{ArticleDbError, ErrorKind, Result};
use crate::groups::{GroupEntryNrt, GroupEntryRtp, GroupPairNrt, NrtUpdate};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod opcode {
    pub const PUT_ARTICLE: u8 = 0x01;
    pub const GET_ARTICLE: u8 = 0x02;
    pub const GET_OVERVIEW: u8 = 0x03;
    pub const NODE_INFO: u8 = 0x11;
    pub const ADD_BLOB: u8 = 0x12;
    pub const READ_BLOB: u8 = 0x13;
    pub const GET_GROUP_NRT: u8 = 0x21;
    pub const BULK_GET_GROUP_NRT: u8 = 0x22;
    pub const PUT_GROUP_NRT: u8 = 0x23;
    pub const RANGE_GROUP_NRT: u8 = 0x24;
    pub const GROUP_RTP: u8 = 0x30;
    pub const GET_MESSAGE_LOCATION: u8 = 0x41;
    pub const UPDATE_MESSAGE_LOCATION: u8 = 0x42;
    pub const LIST_MESSAGE_IDS: u8 = 0x43;
}

pub mod response_opcode {
    pub const EMPTY: u8 = 0x00;
    pub const PUT_ARTICLE: u8 = 0x01;
    pub const GET_ARTICLE: u8 = 0x02;
    pub const OVERVIEW: u8 = 0x03;
    pub const FREE_STORAGE: u8 = 0x11;
    pub const BLOB: u8 = 0x12;
    pub const NODE_ID: u8 = 0x13;
    pub const GROUP_NRT: u8 = 0x21;
    pub const GROUP_NRT_LIST: u8 = 0x22;
    pub const PUT_GROUP_NRT: u8 = 0x23;
    pub const GROUP_RTP: u8 = 0x31;
    pub const INCREMENT: u8 = 0x32;
    pub const ACK: u8 = 0x33;
    pub const MESSAGE_LOCATION: u8 = 0x41;
    pub const MESSAGE_IDS: u8 = 0x42;
    pub const ERROR: u8 = 0xFE;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeInfoCommand {
    NodeId = 0,
    FreeStorage = 1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RtpCommand {
    Get = 0,
    Increment = 1,
    Rollback = 2,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PutArticleRequest {
    pub group: String,
    pub number: i64,
    pub posting: ArticlePosting,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetArticleRequest {
    pub group: String,
    pub number: i64,
    /// Bit 0 asks for the head, bit 1 for the body.
    pub parts: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetOverviewRequest {
    pub group: String,
    pub first: i64,
    pub last: i64,
    pub max: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddBlobRequest {
    pub day: DayId,
    pub hint: CompressionHint,
    pub blob: Blob,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeGroupNrtRequest {
    pub after: String,
    pub prefix: String,
    pub suffix: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PutGroupNrtRequest {
    pub group: String,
    pub entry: GroupEntryNrt,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupRtpRequest {
    pub command: RtpCommand,
    pub group: String,
    /// Only read by `Rollback`.
    pub number: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateMessageLocationRequest {
    pub message_id: String,
    pub redirect: ArticleRedirect,
    pub timestamp: i64,
}

/// Message ids recorded at or after `since` (unix seconds), oldest first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListMessageIdsRequest {
    pub since: i64,
    pub max: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    PutArticle(PutArticleRequest),
    GetArticle(GetArticleRequest),
    GetOverview(GetOverviewRequest),
    NodeInfo(NodeInfoCommand),
    AddBlob(AddBlobRequest),
    ReadBlob(Blob),
    GetGroupNrt(String),
    BulkGetGroupNrt(Vec<String>),
    PutGroupNrt(PutGroupNrtRequest),
    RangeGroupNrt(RangeGroupNrtRequest),
    GroupRtp(GroupRtpRequest),
    GetMessageLocation(String),
    UpdateMessageLocation(UpdateMessageLocationRequest),
    ListMessageIds(ListMessageIdsRequest),
}

fn message<T: Serialize>(op: u8, body: &T) -> Result<Vec<u8>> {
    let mut buf = vec![op];
    buf.extend_from_slice(&to_bytes(body)?);
    Ok(buf)
}

fn split(buf: &[u8]) -> Result<(u8, &[u8])> {
    buf.split_first()
        .map(|(op, body)| (*op, body))
        .ok_or_else(|| ArticleDbError::Corrupt("empty rpc message".to_string()))
}

fn body<T: DeserializeOwned>(body: &[u8]) -> Result<T> {
    from_bytes(body)
}

impl Request {
    pub fn opcode(&self) -> u8 {
        match self {
            Request::PutArticle(_) => opcode::PUT_ARTICLE,
            Request::GetArticle(_) => opcode::GET_ARTICLE,
            Request::GetOverview(_) => opcode::GET_OVERVIEW,
            Request::NodeInfo(_) => opcode::NODE_INFO,
            Request::AddBlob(_) => opcode::ADD_BLOB,
            Request::ReadBlob(_) => opcode::READ_BLOB,
            Request::GetGroupNrt(_) => opcode::GET_GROUP_NRT,
            Request::BulkGetGroupNrt(_) => opcode::BULK_GET_GROUP_NRT,
            Request::PutGroupNrt(_) => opcode::PUT_GROUP_NRT,
            Request::RangeGroupNrt(_) => opcode::RANGE_GROUP_NRT,
            Request::GroupRtp(_) => opcode::GROUP_RTP,
            Request::GetMessageLocation(_) => opcode::GET_MESSAGE_LOCATION,
            Request::UpdateMessageLocation(_) => opcode::UPDATE_MESSAGE_LOCATION,
            Request::ListMessageIds(_) => opcode::LIST_MESSAGE_IDS,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let op = self.opcode();
        match self {
            Request::PutArticle(body) => message(op, body),
            Request::GetArticle(body) => message(op, body),
            Request::GetOverview(body) => message(op, body),
            Request::NodeInfo(body) => message(op, body),
            Request::AddBlob(body) => message(op, body),
            Request::ReadBlob(body) => message(op, body),
            Request::GetGroupNrt(body) => message(op, body),
            Request::BulkGetGroupNrt(body) => message(op, body),
            Request::PutGroupNrt(body) => message(op, body),
            Request::RangeGroupNrt(body) => message(op, body),
            Request::GroupRtp(body) => message(op, body),
            Request::GetMessageLocation(body) => message(op, body),
            Request::UpdateMessageLocation(body) => message(op, body),
            Request::ListMessageIds(body) => message(op, body),
        }
    }

    /// `Ok(None)` for opcodes this node does not know.
    pub fn decode(buf: &[u8]) -> Result<Option<Request>> {
        let (op, raw) = split(buf)?;
        let request = match op {
            opcode::PUT_ARTICLE => Request::PutArticle(body(raw)?),
            opcode::GET_ARTICLE => Request::GetArticle(body(raw)?),
            opcode::GET_OVERVIEW => Request::GetOverview(body(raw)?),
            opcode::NODE_INFO => Request::NodeInfo(body(raw)?),
            opcode::ADD_BLOB => Request::AddBlob(body(raw)?),
            opcode::READ_BLOB => Request::ReadBlob(body(raw)?),
            opcode::GET_GROUP_NRT => Request::GetGroupNrt(body(raw)?),
            opcode::BULK_GET_GROUP_NRT => Request::BulkGetGroupNrt(body(raw)?),
            opcode::PUT_GROUP_NRT => Request::PutGroupNrt(body(raw)?),
            opcode::RANGE_GROUP_NRT => Request::RangeGroupNrt(body(raw)?),
            opcode::GROUP_RTP => Request::GroupRtp(body(raw)?),
            opcode::GET_MESSAGE_LOCATION => Request::GetMessageLocation(body(raw)?),
            opcode::UPDATE_MESSAGE_LOCATION => Request::UpdateMessageLocation(body(raw)?),
            opcode::LIST_MESSAGE_IDS => Request::ListMessageIds(body(raw)?),
            _ => return Ok(None),
        };
        Ok(Some(request))
    }

    /// Mutating requests get the longer write deadline.
    pub fn is_write(&self) -> bool {
        match self {
            Request::PutArticle(_)
            | Request::AddBlob(_)
            | Request::PutGroupNrt(_)
            | Request::UpdateMessageLocation(_) => true,
            Request::GroupRtp(request) => request.command != RtpCommand::Get,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetArticleResponse {
    pub head: Option<Blob>,
    pub body: Option<Blob>,
    pub ok: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncrementResponse {
    pub number: i64,
    pub ok: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcError {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&ArticleDbError> for RpcError {
    fn from(error: &ArticleDbError) -> Self {
        RpcError {
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}

impl From<RpcError> for ArticleDbError {
    fn from(error: RpcError) -> Self {
        ArticleDbError::from_kind(error.kind, error.message)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Not handled: unknown opcode or no backing service on this node.
    Empty,
    PutArticle { ok: bool },
    GetArticle(GetArticleResponse),
    Overview(Vec<OverviewEntry>),
    FreeStorage(i64),
    Blob(Option<Blob>),
    NodeId(Uuid),
    GroupNrt(Option<GroupEntryNrt>),
    GroupNrtList(Vec<GroupPairNrt>),
    PutGroupNrt(NrtUpdate),
    GroupRtp(Option<GroupEntryRtp>),
    Increment(IncrementResponse),
    Ack { ok: bool },
    MessageLocation(Option<ArticleRedirect>),
    MessageIds(Vec<String>),
    Error(RpcError),
}

impl Response {
    pub fn opcode(&self) -> u8 {
        match self {
            Response::Empty => response_opcode::EMPTY,
            Response::PutArticle { .. } => response_opcode::PUT_ARTICLE,
            Response::GetArticle(_) => response_opcode::GET_ARTICLE,
            Response::Overview(_) => response_opcode::OVERVIEW,
            Response::FreeStorage(_) => response_opcode::FREE_STORAGE,
            Response::Blob(_) => response_opcode::BLOB,
            Response::NodeId(_) => response_opcode::NODE_ID,
            Response::GroupNrt(_) => response_opcode::GROUP_NRT,
            Response::GroupNrtList(_) => response_opcode::GROUP_NRT_LIST,
            Response::PutGroupNrt(_) => response_opcode::PUT_GROUP_NRT,
            Response::GroupRtp(_) => response_opcode::GROUP_RTP,
            Response::Increment(_) => response_opcode::INCREMENT,
            Response::Ack { .. } => response_opcode::ACK,
            Response::MessageLocation(_) => response_opcode::MESSAGE_LOCATION,
            Response::MessageIds(_) => response_opcode::MESSAGE_IDS,
            Response::Error(_) => response_opcode::ERROR,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let op = self.opcode();
        match self {
            Response::Empty => Ok(vec![op]),
            Response::PutArticle { ok } | Response::Ack { ok } => message(op, ok),
            Response::GetArticle(body) => message(op, body),
            Response::Overview(body) => message(op, body),
            Response::FreeStorage(body) => message(op, body),
            Response::Blob(body) => message(op, body),
            Response::NodeId(body) => message(op, body),
            Response::GroupNrt(body) => message(op, body),
            Response::GroupNrtList(body) => message(op, body),
            Response::PutGroupNrt(body) => message(op, body),
            Response::GroupRtp(body) => message(op, body),
            Response::Increment(body) => message(op, body),
            Response::MessageLocation(body) => message(op, body),
            Response::MessageIds(body) => message(op, body),
            Response::Error(body) => message(op, body),
        }
    }

    pub fn decode(buf: &[u8]) -> Result<Response> {
        let (op, raw) = split(buf)?;
        let response = match op {
            response_opcode::EMPTY => Response::Empty,
            response_opcode::PUT_ARTICLE => Response::PutArticle { ok: body(raw)? },
            response_opcode::GET_ARTICLE => Response::GetArticle(body(raw)?),
            response_opcode::OVERVIEW => Response::Overview(body(raw)?),
            response_opcode::FREE_STORAGE => Response::FreeStorage(body(raw)?),
            response_opcode::BLOB => Response::Blob(body(raw)?),
            response_opcode::NODE_ID => Response::NodeId(body(raw)?),
            response_opcode::GROUP_NRT => Response::GroupNrt(body(raw)?),
            response_opcode::GROUP_NRT_LIST => Response::GroupNrtList(body(raw)?),
            response_opcode::PUT_GROUP_NRT => Response::PutGroupNrt(body(raw)?),
            response_opcode::GROUP_RTP => Response::GroupRtp(body(raw)?),
            response_opcode::INCREMENT => Response::Increment(body(raw)?),
            response_opcode::ACK => Response::Ack { ok: body(raw)? },
            response_opcode::MESSAGE_LOCATION => Response::MessageLocation(body(raw)?),
            response_opcode::MESSAGE_IDS => Response::MessageIds(body(raw)?),
            response_opcode::ERROR => Response::Error(body(raw)?),
            other => {
                return Err(ArticleDbError::Corrupt(format!(
                    "unknown response opcode 0x{:02x}",
                    other
                )));
            }
        };
        Ok(response)
    }

    pub fn error(error: &ArticleDbError) -> Self {
        Response::Error(RpcError::from(error))
    }
}
