pub mod article_store;
pub mod day_file;
pub mod msgid_index;

pub use article_store::ArticleStore;
pub use day_file::{
    CacheStats, DEFAULT_CACHE_CAPACITY, DayFile, DayFileCache, DayFileGuard, DayFileStore,
};
pub use msgid_index::MessageIdIndex;
