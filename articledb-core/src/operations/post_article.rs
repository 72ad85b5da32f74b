use crate::article::{ArticlePosting, ArticleRedirect, Overview};
use crate::blob::{Blob, CompressionHint, DayId, day_for_timestamp};
use crate::error::{ArticleDbError, Result};
use crate::service::{ArticleService, BlobService, GroupRtpService, MessageIdService};
use bytes::Bytes;
use std::sync::Arc;

/// Payloads up to this size stay in the article record.
pub const DEFAULT_INLINE_THRESHOLD: usize = 4096;

#[derive(Clone)]
pub struct PostArticleOperation {
    articles: Arc<dyn ArticleService>,
    blobs: Arc<dyn BlobService>,
    rtp: Arc<dyn GroupRtpService>,
    message_ids: Option<Arc<dyn MessageIdService>>,
    inline_threshold: usize,
}

#[derive(Debug, Clone)]
pub struct PostArticleOperationRequest {
    /// Newsgroups in posting order; the first one holds the canonical copy.
    pub groups: Vec<String>,
    pub overview: Overview,
    pub head: Bytes,
    pub body: Bytes,
    pub head_hint: CompressionHint,
    pub body_hint: CompressionHint,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostArticleOperationResult {
    pub redirect: ArticleRedirect,
    /// Number assigned in each group, in request order.
    pub numbers: Vec<ArticleRedirect>,
}

impl PostArticleOperation {
    pub fn new(
        articles: Arc<dyn ArticleService>,
        blobs: Arc<dyn BlobService>,
        rtp: Arc<dyn GroupRtpService>,
    ) -> Self {
        Self {
            articles,
            blobs,
            rtp,
            message_ids: None,
            inline_threshold: DEFAULT_INLINE_THRESHOLD,
        }
    }

    pub fn with_message_ids(mut self, message_ids: Arc<dyn MessageIdService>) -> Self {
        self.message_ids = Some(message_ids);
        self
    }

    pub fn with_inline_threshold(mut self, inline_threshold: usize) -> Self {
        self.inline_threshold = inline_threshold;
        self
    }

    pub async fn run(&self, request: PostArticleOperationRequest) -> Result<PostArticleOperationResult> {
        let PostArticleOperationRequest {
            groups,
            overview,
            head,
            body,
            head_hint,
            body_hint,
        } = request;

        if groups.is_empty() {
            return Err(ArticleDbError::InvalidRequest(
                "article names no newsgroup".to_string(),
            ));
        }

        let day = day_for_timestamp(overview.timestamp);
        let head = self.place(day, head_hint, head).await?;
        let body = self.place(day, body_hint, body).await?;

        let numbers = self.allocate(&groups).await?;
        let redirect = numbers[0].clone();

        let posting = ArticlePosting {
            overview,
            redirect: redirect.clone(),
            head: Some(head),
            body: Some(body),
            head_hint,
            body_hint,
        };

        for (stored, assigned) in numbers.iter().enumerate() {
            let result = self
                .articles
                .put_article(&assigned.group, assigned.number, posting.clone())
                .await;
            if let Err(error) = result {
                tracing::warn!(
                    "Storing article {}:{} failed, releasing unused numbers: {}",
                    assigned.group,
                    assigned.number,
                    error
                );
                self.release(&numbers[stored..]).await;
                return Err(error);
            }
        }

        if let Some(message_ids) = &self.message_ids {
            let message_id = &posting.overview.message_id;
            if let Err(error) = message_ids
                .update_message_location(message_id, redirect.clone(), posting.overview.timestamp)
                .await
            {
                tracing::warn!("Indexing {} failed: {}", message_id, error);
            }
        }

        tracing::info!(
            "Posted {} to {} group(s) as {}:{}",
            posting.overview.message_id,
            numbers.len(),
            redirect.group,
            redirect.number
        );
        Ok(PostArticleOperationResult { redirect, numbers })
    }

    /// Small payloads stay inline; large ones go to the day file.
    async fn place(&self, day: DayId, hint: CompressionHint, content: Bytes) -> Result<Blob> {
        if content.len() <= self.inline_threshold {
            return Ok(Blob::Plain(content));
        }
        self.blobs.add_blob(day, hint, Blob::Plain(content)).await
    }

    async fn allocate(&self, groups: &[String]) -> Result<Vec<ArticleRedirect>> {
        let mut numbers = Vec::with_capacity(groups.len());
        for group in groups {
            match self.rtp.increment(group).await {
                Ok(number) => numbers.push(ArticleRedirect {
                    group: group.clone(),
                    number,
                }),
                Err(error) => {
                    self.release(&numbers).await;
                    return Err(error);
                }
            }
        }
        Ok(numbers)
    }

    async fn release(&self, numbers: &[ArticleRedirect]) {
        for assigned in numbers {
            if let Err(error) = self.rtp.rollback(&assigned.group, assigned.number).await {
                tracing::warn!(
                    "Rollback of {}:{} failed: {}",
                    assigned.group,
                    assigned.number,
                    error
                );
            }
        }
    }
}
