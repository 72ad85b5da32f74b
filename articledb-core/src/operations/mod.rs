pub mod post_article;
pub mod read_article;

pub use post_article::{
    DEFAULT_INLINE_THRESHOLD, PostArticleOperation, PostArticleOperationRequest,
    PostArticleOperationResult,
};
pub use read_article::{
    ReadArticleOperation, ReadArticleOperationOutcome, ReadArticleOperationRequest,
    ReadArticleOperationResult,
};
