//! ArticleDB Core - storage engine for a distributed newsgroup article store
//!
//! - Articles are filed per group under numbers handed out by a per-group
//!   allocator with rollback
//! - Large heads and bodies live in append-only day files, addressed by
//!   pointers that carry the owning node's id
//! - Any node resolves any pointer, forwarding reads to the owner over RPC
//! - SQLite holds every metadata bucket

pub mod article;
pub mod blob;
pub mod cluster;
pub mod codec;
pub mod deadline;
pub mod error;
pub mod groups;
pub mod kv;
pub mod operations;
pub mod rpc;
pub mod service;
pub mod storage;

pub use article::{
    ArticleLocation, ArticleParts, ArticlePosting, ArticleRedirect, Overview, OverviewEntry,
    PartMask,
};
pub use blob::{Blob, BlobLocation, CompressionHint, DayId, day_for_timestamp};
pub use cluster::{
    ClusterResolver, ClusteredBlobService, Dialer, Member, MembershipEvent, NodeMeta,
    NodeRegistry, PeerInfo,
};
pub use deadline::Deadlines;
pub use error::{ArticleDbError, ErrorKind, Result};
pub use groups::{
    GroupEntryNrt, GroupEntryRtp, GroupNrtStore, GroupPairNrt, GroupRtpStore, NrtUpdate,
};
pub use kv::KvStore;
pub use operations::{
    PostArticleOperation, PostArticleOperationRequest, PostArticleOperationResult,
    ReadArticleOperation, ReadArticleOperationOutcome, ReadArticleOperationRequest,
    ReadArticleOperationResult,
};
pub use rpc::{Handler, Request, Response, RpcClient, RpcServer, TcpDialer};
pub use service::{
    ArticleService, BlobService, GroupNrtService, GroupRtpService, MessageIdService,
};
pub use storage::{ArticleStore, DayFileCache, DayFileStore, MessageIdIndex};
