use crate::blob::{Blob, BlobLocation, CompressionHint};
use serde::{Deserialize, Serialize};

/// Summary fields of an article as served by OVER/XOVER.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Overview {
    pub subject: String,
    pub from: String,
    pub date: String,
    pub message_id: String,
    pub references: String,
    pub bytes: i64,
    pub lines: i64,
    /// Posting time, unix seconds.
    pub timestamp: i64,
}

/// Where an article's content is filed. Crossposts point at the first group.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArticleRedirect {
    pub group: String,
    pub number: i64,
}

/// Everything one group's store needs to file an article under a number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArticlePosting {
    pub overview: Overview,
    pub redirect: ArticleRedirect,
    pub head: Option<Blob>,
    pub body: Option<Blob>,
    #[serde(default)]
    pub head_hint: CompressionHint,
    #[serde(default)]
    pub body_hint: CompressionHint,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverviewEntry {
    pub number: i64,
    pub overview: Overview,
}

/// Per-article record of head and body pointers into day files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ArticleLocation {
    pub head: Option<BlobLocation>,
    pub body: Option<BlobLocation>,
}

impl ArticleLocation {
    pub fn is_empty(&self) -> bool {
        self.head.is_none() && self.body.is_none()
    }
}

/// Requested parts of an article, each possibly still a pointer.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ArticleParts {
    pub head: Option<Blob>,
    pub body: Option<Blob>,
}

/// Which parts of an article a read asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PartMask {
    pub head: bool,
    pub body: bool,
}

impl PartMask {
    pub const NONE: PartMask = PartMask {
        head: false,
        body: false,
    };
    pub const HEAD: PartMask = PartMask {
        head: true,
        body: false,
    };
    pub const BODY: PartMask = PartMask {
        head: false,
        body: true,
    };
    pub const ALL: PartMask = PartMask {
        head: true,
        body: true,
    };

    pub fn from_bits(bits: u8) -> Self {
        PartMask {
            head: bits & 0b01 != 0,
            body: bits & 0b10 != 0,
        }
    }

    pub fn bits(self) -> u8 {
        (self.head as u8) | ((self.body as u8) << 1)
    }
}
