use super::protocol::{
    GetArticleResponse, IncrementResponse, NodeInfoCommand, Request, Response, RtpCommand,
    response_opcode,
};
use crate::article::PartMask;
use crate::error::{ArticleDbError, Result};
use crate::service::{
    ArticleService, BlobService, GroupNrtService, GroupRtpService, MessageIdService,
};
use std::sync::Arc;

/// Routes decoded requests to whichever services this node runs.
/// Requests for a missing service are answered with [`Response::Empty`].
#[derive(Clone, Default)]
pub struct Handler {
    articles: Option<Arc<dyn ArticleService>>,
    blobs: Option<Arc<dyn BlobService>>,
    groups_nrt: Option<Arc<dyn GroupNrtService>>,
    groups_rtp: Option<Arc<dyn GroupRtpService>>,
    message_ids: Option<Arc<dyn MessageIdService>>,
}

impl Handler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_articles(mut self, service: Arc<dyn ArticleService>) -> Self {
        self.articles = Some(service);
        self
    }

    pub fn with_blobs(mut self, service: Arc<dyn BlobService>) -> Self {
        self.blobs = Some(service);
        self
    }

    pub fn with_groups_nrt(mut self, service: Arc<dyn GroupNrtService>) -> Self {
        self.groups_nrt = Some(service);
        self
    }

    pub fn with_groups_rtp(mut self, service: Arc<dyn GroupRtpService>) -> Self {
        self.groups_rtp = Some(service);
        self
    }

    pub fn with_message_ids(mut self, service: Arc<dyn MessageIdService>) -> Self {
        self.message_ids = Some(service);
        self
    }

    /// Decodes, dispatches and encodes one message.
    pub async fn handle_message(&self, buf: &[u8]) -> Vec<u8> {
        let response = match Request::decode(buf) {
            Ok(Some(request)) => self.handle(request).await,
            Ok(None) => {
                tracing::debug!("Unknown request opcode {:?}", buf.first());
                Response::Empty
            }
            Err(error) => {
                tracing::warn!("Rejecting undecodable request: {}", error);
                Response::error(&error)
            }
        };

        match response.encode() {
            Ok(encoded) => encoded,
            Err(error) => {
                tracing::warn!("Failed to encode response: {}", error);
                Response::error(&error)
                    .encode()
                    .unwrap_or_else(|_| vec![response_opcode::EMPTY])
            }
        }
    }

    pub async fn handle(&self, request: Request) -> Response {
        let op = request.opcode();
        match self.dispatch(request).await {
            Ok(response) => response,
            Err(error) => {
                tracing::debug!("Request 0x{:02x} failed: {}", op, error);
                Response::error(&error)
            }
        }
    }

    async fn dispatch(&self, request: Request) -> Result<Response> {
        match request {
            Request::PutArticle(request) => {
                let Some(articles) = &self.articles else {
                    return Ok(Response::Empty);
                };
                articles
                    .put_article(&request.group, request.number, request.posting)
                    .await?;
                Ok(Response::PutArticle { ok: true })
            }
            Request::GetArticle(request) => {
                let Some(articles) = &self.articles else {
                    return Ok(Response::Empty);
                };
                let want = PartMask::from_bits(request.parts);
                let parts = articles
                    .get_article(&request.group, request.number, want)
                    .await?;
                let response = match parts {
                    Some(parts) => GetArticleResponse {
                        head: parts.head,
                        body: parts.body,
                        ok: true,
                    },
                    None => GetArticleResponse {
                        head: None,
                        body: None,
                        ok: false,
                    },
                };
                Ok(Response::GetArticle(response))
            }
            Request::GetOverview(request) => {
                let Some(articles) = &self.articles else {
                    return Ok(Response::Empty);
                };
                let max = usize::try_from(request.max).unwrap_or(usize::MAX);
                let entries = articles
                    .overview(&request.group, request.first, request.last, max)
                    .await?;
                Ok(Response::Overview(entries))
            }
            Request::NodeInfo(command) => {
                let Some(blobs) = &self.blobs else {
                    return Ok(Response::Empty);
                };
                match command {
                    NodeInfoCommand::NodeId => Ok(Response::NodeId(blobs.node_id().await?)),
                    NodeInfoCommand::FreeStorage => {
                        Ok(Response::FreeStorage(blobs.free_storage().await?))
                    }
                }
            }
            Request::AddBlob(request) => {
                let Some(blobs) = &self.blobs else {
                    return Ok(Response::Empty);
                };
                let stored = blobs.add_blob(request.day, request.hint, request.blob).await?;
                Ok(Response::Blob(Some(stored)))
            }
            Request::ReadBlob(blob) => {
                let Some(blobs) = &self.blobs else {
                    return Ok(Response::Empty);
                };
                match blobs.read_blob(blob).await {
                    Ok(blob) => Ok(Response::Blob(Some(blob))),
                    Err(ArticleDbError::NotFound(_)) => Ok(Response::Blob(None)),
                    Err(error) => Err(error),
                }
            }
            Request::GetGroupNrt(group) => {
                let Some(groups) = &self.groups_nrt else {
                    return Ok(Response::Empty);
                };
                Ok(Response::GroupNrt(groups.get_group(&group).await?))
            }
            Request::BulkGetGroupNrt(names) => {
                let Some(groups) = &self.groups_nrt else {
                    return Ok(Response::Empty);
                };
                Ok(Response::GroupNrtList(groups.bulk_get_groups(names).await?))
            }
            Request::PutGroupNrt(request) => {
                let Some(groups) = &self.groups_nrt else {
                    return Ok(Response::Empty);
                };
                Ok(Response::PutGroupNrt(
                    groups.put_group(&request.group, request.entry).await?,
                ))
            }
            Request::RangeGroupNrt(request) => {
                let Some(groups) = &self.groups_nrt else {
                    return Ok(Response::Empty);
                };
                let pairs = groups
                    .range_groups(&request.after, &request.prefix, &request.suffix)
                    .await?;
                Ok(Response::GroupNrtList(pairs))
            }
            Request::GroupRtp(request) => {
                let Some(rtp) = &self.groups_rtp else {
                    return Ok(Response::Empty);
                };
                match request.command {
                    RtpCommand::Get => Ok(Response::GroupRtp(rtp.get_rtp(&request.group).await?)),
                    RtpCommand::Increment => {
                        let number = rtp.increment(&request.group).await?;
                        Ok(Response::Increment(IncrementResponse { number, ok: true }))
                    }
                    RtpCommand::Rollback => {
                        rtp.rollback(&request.group, request.number).await?;
                        Ok(Response::Ack { ok: true })
                    }
                }
            }
            Request::GetMessageLocation(message_id) => {
                let Some(index) = &self.message_ids else {
                    return Ok(Response::Empty);
                };
                Ok(Response::MessageLocation(
                    index.get_message_location(&message_id).await?,
                ))
            }
            Request::UpdateMessageLocation(request) => {
                let Some(index) = &self.message_ids else {
                    return Ok(Response::Empty);
                };
                let ok = index
                    .update_message_location(&request.message_id, request.redirect, request.timestamp)
                    .await?;
                Ok(Response::Ack { ok })
            }
            Request::ListMessageIds(request) => {
                let Some(index) = &self.message_ids else {
                    return Ok(Response::Empty);
                };
                let max = usize::try_from(request.max).unwrap_or(usize::MAX);
                Ok(Response::MessageIds(
                    index.message_ids_since(request.since, max).await?,
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::article::{ArticlePosting, ArticleRedirect, Overview};
    use crate::blob::{Blob, BlobLocation, CompressionHint};
    use crate::error::ErrorKind;
    use crate::groups::{GroupEntryNrt, GroupNrtStore, GroupRtpStore};
    use crate::kv::KvStore;
    use crate::rpc::protocol::{
        GetArticleRequest, GroupRtpRequest, ListMessageIdsRequest, PutArticleRequest,
        PutGroupNrtRequest, UpdateMessageLocationRequest,
    };
    use crate::storage::{ArticleStore, DayFileStore, MessageIdIndex};
    use uuid::Uuid;

    fn full_handler(kv: &KvStore, store: DayFileStore) -> Handler {
        Handler::new()
            .with_articles(Arc::new(ArticleStore::new(kv.clone())))
            .with_blobs(Arc::new(store))
            .with_groups_nrt(Arc::new(GroupNrtStore::new(kv.clone())))
            .with_groups_rtp(Arc::new(GroupRtpStore::new(kv.clone())))
            .with_message_ids(Arc::new(MessageIdIndex::new(kv.clone())))
    }

    fn rtp(command: RtpCommand, number: i64) -> Request {
        Request::GroupRtp(GroupRtpRequest {
            command,
            group: "alt.test".to_string(),
            number,
        })
    }

    #[tokio::test]
    async fn test_unconfigured_services_answer_empty() {
        let handler = Handler::new();
        for request in [
            Request::GetGroupNrt("alt.test".to_string()),
            Request::ReadBlob(Blob::plain("x")),
            Request::NodeInfo(NodeInfoCommand::NodeId),
            rtp(RtpCommand::Increment, 0),
            Request::GetMessageLocation("<a@b>".to_string()),
            Request::ListMessageIds(ListMessageIdsRequest { since: 0, max: 10 }),
        ] {
            assert_eq!(handler.handle(request).await, Response::Empty);
        }
    }

    #[tokio::test]
    async fn test_unknown_opcode_answers_empty() {
        let handler = Handler::new();
        let encoded = handler.handle_message(&[0x5a, 0, 0]).await;
        assert_eq!(Response::decode(&encoded).unwrap(), Response::Empty);
    }

    #[tokio::test]
    async fn test_rtp_dispatch() {
        let temp_dir = tempfile::tempdir().unwrap();
        let kv = KvStore::open_in_memory().unwrap();
        let store = DayFileStore::open(temp_dir.path().to_path_buf(), Uuid::new_v4(), 4).unwrap();
        let handler = full_handler(&kv, store);

        assert_eq!(
            handler.handle(rtp(RtpCommand::Increment, 0)).await,
            Response::Increment(IncrementResponse { number: 1, ok: true })
        );
        assert_eq!(
            handler.handle(rtp(RtpCommand::Rollback, 1)).await,
            Response::Ack { ok: true }
        );
        assert!(matches!(
            handler.handle(rtp(RtpCommand::Get, 0)).await,
            Response::GroupRtp(Some(entry)) if entry.count == 0
        ));
    }

    #[tokio::test]
    async fn test_article_roundtrip_through_messages() {
        let temp_dir = tempfile::tempdir().unwrap();
        let kv = KvStore::open_in_memory().unwrap();
        let node_id = Uuid::new_v4();
        let store = DayFileStore::open(temp_dir.path().to_path_buf(), node_id, 4).unwrap();
        let handler = full_handler(&kv, store);

        let location = BlobLocation {
            node: node_id,
            day: 1,
            offset: 0,
            length: 10,
        };
        let put = Request::PutArticle(PutArticleRequest {
            group: "alt.test".to_string(),
            number: 1,
            posting: ArticlePosting {
                overview: Overview::default(),
                redirect: ArticleRedirect {
                    group: "alt.test".to_string(),
                    number: 1,
                },
                head: Some(Blob::plain("Subject: hi\r\n")),
                body: Some(Blob::Location(location)),
                head_hint: CompressionHint::None,
                body_hint: CompressionHint::None,
            },
        });
        let answer = handler.handle_message(&put.encode().unwrap()).await;
        assert_eq!(Response::decode(&answer).unwrap(), Response::PutArticle { ok: true });

        let get = Request::GetArticle(GetArticleRequest {
            group: "alt.test".to_string(),
            number: 1,
            parts: PartMask::ALL.bits(),
        });
        let answer = handler.handle_message(&get.encode().unwrap()).await;
        assert_eq!(
            Response::decode(&answer).unwrap(),
            Response::GetArticle(GetArticleResponse {
                head: Some(Blob::plain("Subject: hi\r\n")),
                body: Some(Blob::Location(location)),
                ok: true,
            })
        );

        let missing = Request::GetArticle(GetArticleRequest {
            group: "alt.test".to_string(),
            number: 2,
            parts: PartMask::HEAD.bits(),
        });
        assert!(matches!(
            handler.handle(missing).await,
            Response::GetArticle(GetArticleResponse { ok: false, .. })
        ));
    }

    #[tokio::test]
    async fn test_missing_blob_and_errors() {
        let temp_dir = tempfile::tempdir().unwrap();
        let kv = KvStore::open_in_memory().unwrap();
        let node_id = Uuid::new_v4();
        let store = DayFileStore::open(temp_dir.path().to_path_buf(), node_id, 4).unwrap();
        let handler = full_handler(&kv, store);

        let absent = Blob::Location(BlobLocation {
            node: node_id,
            day: 99,
            offset: 0,
            length: 4,
        });
        assert_eq!(handler.handle(Request::ReadBlob(absent)).await, Response::Blob(None));

        let put = |timestamp| {
            Request::PutGroupNrt(PutGroupNrtRequest {
                group: "alt.test".to_string(),
                entry: GroupEntryNrt {
                    description: String::new(),
                    status: b'y',
                    timestamp,
                },
            })
        };
        assert!(matches!(
            handler.handle(put(2)).await,
            Response::PutGroupNrt(update) if update.applied
        ));
        assert!(matches!(
            handler.handle(put(1)).await,
            Response::PutGroupNrt(update) if !update.applied
        ));

        let garbage = handler.handle_message(&[0x21, 0xff]).await;
        assert!(matches!(
            Response::decode(&garbage).unwrap(),
            Response::Error(error) if error.kind == ErrorKind::Corrupt
        ));
    }

    #[tokio::test]
    async fn test_message_ids_listed_through_messages() {
        let temp_dir = tempfile::tempdir().unwrap();
        let kv = KvStore::open_in_memory().unwrap();
        let store = DayFileStore::open(temp_dir.path().to_path_buf(), Uuid::new_v4(), 4).unwrap();
        let handler = full_handler(&kv, store);

        for (message_id, timestamp) in [("<old@x>", 50), ("<new@x>", 150), ("<newer@x>", 250)] {
            let update = Request::UpdateMessageLocation(UpdateMessageLocationRequest {
                message_id: message_id.to_string(),
                redirect: ArticleRedirect {
                    group: "alt.test".to_string(),
                    number: timestamp,
                },
                timestamp,
            });
            assert_eq!(handler.handle(update).await, Response::Ack { ok: true });
        }

        let list = Request::ListMessageIds(ListMessageIdsRequest { since: 100, max: 10 });
        let answer = handler.handle_message(&list.encode().unwrap()).await;
        assert_eq!(
            Response::decode(&answer).unwrap(),
            Response::MessageIds(vec!["<new@x>".to_string(), "<newer@x>".to_string()])
        );

        let capped = Request::ListMessageIds(ListMessageIdsRequest { since: 0, max: 1 });
        assert_eq!(
            handler.handle(capped).await,
            Response::MessageIds(vec!["<old@x>".to_string()])
        );
    }
}
