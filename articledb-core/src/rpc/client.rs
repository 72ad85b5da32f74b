use super::protocol::{
    AddBlobRequest, GetArticleRequest, GetArticleResponse, GetOverviewRequest, GroupRtpRequest,
    IncrementResponse, ListMessageIdsRequest, NodeInfoCommand, PutArticleRequest,
    PutGroupNrtRequest, RangeGroupNrtRequest, Request, Response, RtpCommand,
    UpdateMessageLocationRequest,
};
use super::transport::{client_handshake, decode_frame, encode_frame, frame_codec};
use crate::article::{ArticleParts, ArticlePosting, ArticleRedirect, OverviewEntry, PartMask};
use crate::blob::{Blob, CompressionHint, DayId};
use crate::cluster::Dialer;
use crate::deadline::{Deadlines, with_deadline};
use crate::error::{ArticleDbError, Result};
use crate::groups::{GroupEntryNrt, GroupEntryRtp, GroupPairNrt, NrtUpdate};
use crate::service::{
    ArticleService, BlobService, GroupNrtService, GroupRtpService, MessageIdService,
};
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::net::TcpStream;
use tokio::sync::{Mutex as AsyncMutex, oneshot};
use tokio::task::JoinHandle;
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use uuid::Uuid;

type FramedStream = Framed<TcpStream, LengthDelimitedCodec>;
type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<Bytes>>>>;

/// One multiplexed connection. Calls share the socket and are matched to
/// answers by request id.
struct Connection {
    sink: AsyncMutex<SplitSink<FramedStream, Bytes>>,
    pending: Pending,
    closed: Arc<AtomicBool>,
    reader: JoinHandle<()>,
}

impl Connection {
    async fn open(addr: SocketAddr) -> Result<Self> {
        let mut stream = TcpStream::connect(addr)
            .await
            .map_err(|error| ArticleDbError::Unreachable(format!("connect {}: {}", addr, error)))?;
        stream.set_nodelay(true)?;
        client_handshake(&mut stream).await?;

        let (sink, stream) = Framed::new(stream, frame_codec()).split();
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let closed = Arc::new(AtomicBool::new(false));
        let reader = tokio::spawn(read_answers(
            addr,
            stream,
            Arc::clone(&pending),
            Arc::clone(&closed),
        ));

        tracing::debug!("Connected to {}", addr);
        Ok(Self {
            sink: AsyncMutex::new(sink),
            pending,
            closed,
            reader,
        })
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

async fn read_answers(
    addr: SocketAddr,
    mut stream: SplitStream<FramedStream>,
    pending: Pending,
    closed: Arc<AtomicBool>,
) {
    while let Some(frame) = stream.next().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(error) => {
                tracing::warn!("Connection to {} failed: {}", addr, error);
                break;
            }
        };
        let (id, message) = match decode_frame(frame) {
            Ok(decoded) => decoded,
            Err(error) => {
                tracing::warn!("Dropping connection to {}: {}", addr, error);
                break;
            }
        };
        let waiter = pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
        match waiter {
            Some(waiter) => {
                let _ = waiter.send(message);
            }
            None => tracing::debug!("Discarding late answer {} from {}", id, addr),
        }
    }

    closed.store(true, Ordering::Release);
    // Dropping the senders fails every outstanding call.
    pending
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .clear();
    tracing::debug!("Connection to {} closed", addr);
}

/// Removes an abandoned call from the pending table.
struct PendingSlot {
    pending: Pending,
    id: u64,
}

impl Drop for PendingSlot {
    fn drop(&mut self) {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.id);
    }
}

/// Client for a remote node. Connects lazily and reconnects after the
/// connection drops.
pub struct RpcClient {
    addr: SocketAddr,
    deadlines: Deadlines,
    next_id: AtomicU64,
    conn: AsyncMutex<Option<Arc<Connection>>>,
}

impl RpcClient {
    pub fn new(addr: SocketAddr, deadlines: Deadlines) -> Self {
        Self {
            addr,
            deadlines,
            next_id: AtomicU64::new(1),
            conn: AsyncMutex::new(None),
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    async fn connection(&self) -> Result<Arc<Connection>> {
        let mut slot = self.conn.lock().await;
        if let Some(conn) = slot.as_ref().filter(|conn| !conn.is_closed()) {
            return Ok(Arc::clone(conn));
        }
        let conn = Arc::new(Connection::open(self.addr).await?);
        *slot = Some(Arc::clone(&conn));
        Ok(conn)
    }

    /// Sends `request` and waits for its answer within the read or write
    /// deadline.
    pub async fn call(&self, request: Request) -> Result<Response> {
        let limit = if request.is_write() {
            self.deadlines.write()
        } else {
            self.deadlines.read()
        };
        let op = request.opcode();
        let message = request.encode()?;

        tracing::debug!("Calling 0x{:02x} on {}", op, self.addr);
        with_deadline(limit, "rpc call", self.round_trip(message)).await
    }

    async fn round_trip(&self, message: Vec<u8>) -> Result<Response> {
        let conn = self.connection().await?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let (sender, answer) = oneshot::channel();
        conn.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, sender);
        let _slot = PendingSlot {
            pending: Arc::clone(&conn.pending),
            id,
        };

        let sent = conn.sink.lock().await.send(encode_frame(id, &message)).await;
        if let Err(error) = sent {
            conn.closed.store(true, Ordering::Release);
            return Err(ArticleDbError::Unreachable(format!(
                "send to {}: {}",
                self.addr, error
            )));
        }

        let answer = answer.await.map_err(|_| {
            ArticleDbError::Unreachable(format!("connection to {} closed", self.addr))
        })?;
        Response::decode(&answer)
    }

    /// Maps an answer the caller did not expect to an error.
    fn unexpected(&self, response: Response, what: &str) -> ArticleDbError {
        match response {
            Response::Empty => {
                ArticleDbError::Unconfigured(format!("{} is not served by {}", what, self.addr))
            }
            Response::Error(error) => error.into(),
            other => ArticleDbError::Corrupt(format!(
                "{} answered {} with opcode 0x{:02x}",
                self.addr,
                what,
                other.opcode()
            )),
        }
    }

    async fn rtp(&self, command: RtpCommand, group: &str, number: i64) -> Result<Response> {
        self.call(Request::GroupRtp(GroupRtpRequest {
            command,
            group: group.to_string(),
            number,
        }))
        .await
    }
}

#[async_trait]
impl BlobService for RpcClient {
    async fn node_id(&self) -> Result<Uuid> {
        match self.call(Request::NodeInfo(NodeInfoCommand::NodeId)).await? {
            Response::NodeId(node_id) => Ok(node_id),
            other => Err(self.unexpected(other, "node id")),
        }
    }

    async fn free_storage(&self) -> Result<i64> {
        match self.call(Request::NodeInfo(NodeInfoCommand::FreeStorage)).await? {
            Response::FreeStorage(free) => Ok(free),
            other => Err(self.unexpected(other, "free storage")),
        }
    }

    async fn add_blob(&self, day: DayId, hint: CompressionHint, blob: Blob) -> Result<Blob> {
        let request = Request::AddBlob(AddBlobRequest { day, hint, blob });
        match self.call(request).await? {
            Response::Blob(Some(stored)) => Ok(stored),
            other => Err(self.unexpected(other, "add blob")),
        }
    }

    async fn read_blob(&self, blob: Blob) -> Result<Blob> {
        match self.call(Request::ReadBlob(blob)).await? {
            Response::Blob(Some(blob)) => Ok(blob),
            Response::Blob(None) => Err(ArticleDbError::NotFound(format!(
                "blob not found on {}",
                self.addr
            ))),
            other => Err(self.unexpected(other, "read blob")),
        }
    }
}

#[async_trait]
impl ArticleService for RpcClient {
    async fn put_article(&self, group: &str, number: i64, posting: ArticlePosting) -> Result<()> {
        let request = Request::PutArticle(PutArticleRequest {
            group: group.to_string(),
            number,
            posting,
        });
        match self.call(request).await? {
            Response::PutArticle { ok: true } => Ok(()),
            Response::PutArticle { ok: false } => Err(ArticleDbError::Internal(format!(
                "{} refused article {}:{}",
                self.addr, group, number
            ))),
            other => Err(self.unexpected(other, "put article")),
        }
    }

    async fn get_article(
        &self,
        group: &str,
        number: i64,
        want: PartMask,
    ) -> Result<Option<ArticleParts>> {
        let request = Request::GetArticle(GetArticleRequest {
            group: group.to_string(),
            number,
            parts: want.bits(),
        });
        match self.call(request).await? {
            Response::GetArticle(GetArticleResponse { ok: false, .. }) => Ok(None),
            Response::GetArticle(GetArticleResponse { head, body, .. }) => {
                Ok(Some(ArticleParts { head, body }))
            }
            other => Err(self.unexpected(other, "get article")),
        }
    }

    async fn overview(
        &self,
        group: &str,
        first: i64,
        last: i64,
        max: usize,
    ) -> Result<Vec<OverviewEntry>> {
        let request = Request::GetOverview(GetOverviewRequest {
            group: group.to_string(),
            first,
            last,
            max: u64::try_from(max).unwrap_or(u64::MAX),
        });
        match self.call(request).await? {
            Response::Overview(entries) => Ok(entries),
            other => Err(self.unexpected(other, "overview")),
        }
    }
}

#[async_trait]
impl GroupNrtService for RpcClient {
    async fn get_group(&self, group: &str) -> Result<Option<GroupEntryNrt>> {
        match self.call(Request::GetGroupNrt(group.to_string())).await? {
            Response::GroupNrt(entry) => Ok(entry),
            other => Err(self.unexpected(other, "get group")),
        }
    }

    async fn bulk_get_groups(&self, groups: Vec<String>) -> Result<Vec<GroupPairNrt>> {
        match self.call(Request::BulkGetGroupNrt(groups)).await? {
            Response::GroupNrtList(pairs) => Ok(pairs),
            other => Err(self.unexpected(other, "bulk get groups")),
        }
    }

    async fn put_group(&self, group: &str, entry: GroupEntryNrt) -> Result<NrtUpdate> {
        let request = Request::PutGroupNrt(PutGroupNrtRequest {
            group: group.to_string(),
            entry,
        });
        match self.call(request).await? {
            Response::PutGroupNrt(update) => Ok(update),
            other => Err(self.unexpected(other, "put group")),
        }
    }

    async fn range_groups(&self, after: &str, prefix: &str, suffix: &str) -> Result<Vec<GroupPairNrt>> {
        let request = Request::RangeGroupNrt(RangeGroupNrtRequest {
            after: after.to_string(),
            prefix: prefix.to_string(),
            suffix: suffix.to_string(),
        });
        match self.call(request).await? {
            Response::GroupNrtList(pairs) => Ok(pairs),
            other => Err(self.unexpected(other, "range groups")),
        }
    }
}

#[async_trait]
impl GroupRtpService for RpcClient {
    async fn get_rtp(&self, group: &str) -> Result<Option<GroupEntryRtp>> {
        match self.rtp(RtpCommand::Get, group, 0).await? {
            Response::GroupRtp(entry) => Ok(entry),
            other => Err(self.unexpected(other, "get rtp")),
        }
    }

    async fn increment(&self, group: &str) -> Result<i64> {
        match self.rtp(RtpCommand::Increment, group, 0).await? {
            Response::Increment(IncrementResponse { number, ok: true }) => Ok(number),
            other => Err(self.unexpected(other, "increment")),
        }
    }

    async fn rollback(&self, group: &str, number: i64) -> Result<()> {
        match self.rtp(RtpCommand::Rollback, group, number).await? {
            Response::Ack { ok: true } => Ok(()),
            other => Err(self.unexpected(other, "rollback")),
        }
    }
}

#[async_trait]
impl MessageIdService for RpcClient {
    async fn get_message_location(&self, message_id: &str) -> Result<Option<ArticleRedirect>> {
        match self
            .call(Request::GetMessageLocation(message_id.to_string()))
            .await?
        {
            Response::MessageLocation(redirect) => Ok(redirect),
            other => Err(self.unexpected(other, "get message location")),
        }
    }

    async fn update_message_location(
        &self,
        message_id: &str,
        redirect: ArticleRedirect,
        timestamp: i64,
    ) -> Result<bool> {
        let request = Request::UpdateMessageLocation(UpdateMessageLocationRequest {
            message_id: message_id.to_string(),
            redirect,
            timestamp,
        });
        match self.call(request).await? {
            Response::Ack { ok } => Ok(ok),
            other => Err(self.unexpected(other, "update message location")),
        }
    }

    async fn message_ids_since(&self, since: i64, max: usize) -> Result<Vec<String>> {
        let request = Request::ListMessageIds(ListMessageIdsRequest {
            since,
            max: u64::try_from(max).unwrap_or(u64::MAX),
        });
        match self.call(request).await? {
            Response::MessageIds(ids) => Ok(ids),
            other => Err(self.unexpected(other, "list message ids")),
        }
    }
}

/// Dials peers over TCP with lazily connecting [`RpcClient`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpDialer {
    deadlines: Deadlines,
}

impl TcpDialer {
    pub fn new(deadlines: Deadlines) -> Self {
        Self { deadlines }
    }
}

impl Dialer for TcpDialer {
    fn dial(&self, addr: SocketAddr) -> Arc<dyn BlobService> {
        Arc::new(RpcClient::new(addr, self.deadlines))
    }
}
