use crate::article::{
    ArticleLocation, ArticleParts, ArticlePosting, ArticleRedirect, OverviewEntry, PartMask,
};
use crate::blob::{Blob, BlobLocation, CompressionHint};
use crate::codec::{decode_i64, encode_i64, from_bytes, to_bytes};
use crate::error::Result;
use crate::kv::{KvStore, Scan, Txn, buckets};

/// Per-group article records: overview, redirect, inline head/body and the
/// pointers of content that lives in a day file.
#[derive(Clone)]
pub struct ArticleStore {
    kv: KvStore,
}

/// Inline content is compressed per hint; pointers are split off into the
/// location record.
fn split_part(
    blob: Option<Blob>,
    hint: CompressionHint,
) -> (Option<Blob>, Option<BlobLocation>) {
    match blob {
        Some(Blob::Location(location)) => (None, Some(location)),
        Some(inline) => (Some(hint.compress(inline)), None),
        None => (None, None),
    }
}

impl ArticleStore {
    pub fn new(kv: KvStore) -> Self {
        Self { kv }
    }

    pub fn kv(&self) -> &KvStore {
        &self.kv
    }

    /// Files `posting` under `(group, number)` in one transaction. The caller
    /// owns number uniqueness; a repeated put overwrites.
    pub fn put(&self, group: &str, number: i64, posting: ArticlePosting) -> Result<()> {
        let scope = group.as_bytes();
        let key = encode_i64(number);

        let (head, head_location) = split_part(posting.head, posting.head_hint);
        let (body, body_location) = split_part(posting.body, posting.body_hint);
        let location = ArticleLocation {
            head: head_location,
            body: body_location,
        };

        let overview = to_bytes(&posting.overview)?;
        let redirect = to_bytes(&posting.redirect)?;
        let head = head.as_ref().map(to_bytes).transpose()?;
        let body = body.as_ref().map(to_bytes).transpose()?;
        let location_record = if location.is_empty() {
            None
        } else {
            Some(to_bytes(&location)?)
        };

        self.kv.update(|txn| {
            txn.put(buckets::ARTICLE_OVERVIEW, scope, &key, &overview)?;
            txn.put(buckets::ARTICLE_REDIRECT, scope, &key, &redirect)?;
            if let Some(head) = &head {
                txn.put(buckets::ARTICLE_HEAD, scope, &key, head)?;
            }
            if let Some(body) = &body {
                txn.put(buckets::ARTICLE_BODY, scope, &key, body)?;
            }
            if let Some(record) = &location_record {
                txn.put(buckets::ARTICLE_LOCATION, scope, &key, record)?;
            }
            Ok(())
        })?;

        tracing::debug!(
            "Stored article {}:{} (head pointer: {}, body pointer: {})",
            group,
            number,
            location.head.is_some(),
            location.body.is_some()
        );
        Ok(())
    }

    /// Returns the requested parts, pointers left unresolved. `None` when a
    /// requested part is missing, or when nothing is requested and the
    /// article has no overview.
    pub fn get(&self, group: &str, number: i64, want: PartMask) -> Result<Option<ArticleParts>> {
        let scope = group.as_bytes();
        let key = encode_i64(number);

        self.kv.view(|txn| {
            if want == PartMask::NONE {
                let exists = txn.contains(buckets::ARTICLE_OVERVIEW, scope, &key)?;
                return Ok(exists.then(ArticleParts::default));
            }

            let location: ArticleLocation = txn
                .get(buckets::ARTICLE_LOCATION, scope, &key)?
                .map(|raw| from_bytes(&raw))
                .transpose()?
                .unwrap_or_default();

            let mut parts = ArticleParts::default();
            if want.head {
                let Some(head) = read_part(txn, buckets::ARTICLE_HEAD, scope, &key, location.head)?
                else {
                    return Ok(None);
                };
                parts.head = Some(head);
            }
            if want.body {
                let Some(body) = read_part(txn, buckets::ARTICLE_BODY, scope, &key, location.body)?
                else {
                    return Ok(None);
                };
                parts.body = Some(body);
            }
            Ok(Some(parts))
        })
    }

    pub fn redirect(&self, group: &str, number: i64) -> Result<Option<ArticleRedirect>> {
        self.kv.view(|txn| {
            txn.get(buckets::ARTICLE_REDIRECT, group.as_bytes(), &encode_i64(number))?
                .map(|raw| from_bytes(&raw))
                .transpose()
        })
    }

    /// Overview records with `first <= number <= last`, at most `max`.
    pub fn overview(&self, group: &str, first: i64, last: i64, max: usize) -> Result<Vec<OverviewEntry>> {
        if max == 0 || first > last {
            return Ok(Vec::new());
        }

        self.kv.view(|txn| {
            let mut entries = Vec::new();
            txn.scan(
                buckets::ARTICLE_OVERVIEW,
                group.as_bytes(),
                &encode_i64(first),
                |key, value| {
                    let number = decode_i64(key);
                    if number > last {
                        return Ok(Scan::Stop);
                    }
                    match from_bytes(value) {
                        Ok(overview) => entries.push(OverviewEntry { number, overview }),
                        Err(error) => {
                            tracing::warn!(
                                "Skipping corrupt overview {}:{}: {}",
                                group,
                                number,
                                error
                            );
                            return Ok(Scan::Continue);
                        }
                    }
                    if entries.len() >= max {
                        return Ok(Scan::Stop);
                    }
                    Ok(Scan::Continue)
                },
            )?;
            Ok(entries)
        })
    }
}

fn read_part(
    txn: &Txn<'_>,
    bucket: &str,
    scope: &[u8],
    key: &[u8],
    location: Option<BlobLocation>,
) -> Result<Option<Blob>> {
    if let Some(location) = location {
        return Ok(Some(Blob::Location(location)));
    }
    txn.get(bucket, scope, key)?
        .map(|raw| from_bytes(&raw))
        .transpose()
}
