use crate::article::PartMask;
use crate::blob::Blob;
use crate::error::Result;
use crate::service::{ArticleService, BlobService};
use bytes::Bytes;
use std::sync::Arc;

/// Reads article content, following day-file pointers to whichever node
/// owns them.
#[derive(Clone)]
pub struct ReadArticleOperation {
    articles: Arc<dyn ArticleService>,
    blobs: Arc<dyn BlobService>,
}

#[derive(Debug, Clone)]
pub struct ReadArticleOperationRequest {
    pub group: String,
    pub number: i64,
    pub want: PartMask,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadArticleOperationResult {
    pub head: Option<Bytes>,
    pub body: Option<Bytes>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadArticleOperationOutcome {
    Found(ReadArticleOperationResult),
    NotFound,
}

impl ReadArticleOperation {
    pub fn new(articles: Arc<dyn ArticleService>, blobs: Arc<dyn BlobService>) -> Self {
        Self { articles, blobs }
    }

    pub async fn run(&self, request: ReadArticleOperationRequest) -> Result<ReadArticleOperationOutcome> {
        let ReadArticleOperationRequest {
            group,
            number,
            want,
        } = request;

        let Some(parts) = self.articles.get_article(&group, number, want).await? else {
            tracing::debug!("Article {}:{} not found", group, number);
            return Ok(ReadArticleOperationOutcome::NotFound);
        };

        let head = self.content(parts.head).await?;
        let body = self.content(parts.body).await?;
        Ok(ReadArticleOperationOutcome::Found(ReadArticleOperationResult { head, body }))
    }

    async fn content(&self, blob: Option<Blob>) -> Result<Option<Bytes>> {
        let Some(blob) = blob else {
            return Ok(None);
        };
        let resolved = self.blobs.read_blob(blob).await?;
        Ok(Some(resolved.into_content()?))
    }
}
