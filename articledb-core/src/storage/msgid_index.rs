use crate::article::ArticleRedirect;
use crate::codec::{encode_i64, from_bytes, to_bytes};
use crate::error::Result;
use crate::kv::{FLAT, KvStore, Scan, buckets};
use chrono::Utc;

/// Message-ID to article lookup, plus an arrival-time index of message-ids.
#[derive(Clone)]
pub struct MessageIdIndex {
    kv: KvStore,
}

fn time_key(timestamp: i64) -> Vec<u8> {
    // Wall-clock nanos disambiguate ids that share a posting second.
    let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
    let mut key = Vec::with_capacity(16);
    key.extend_from_slice(&encode_i64(timestamp));
    key.extend_from_slice(&encode_i64(nanos));
    key
}

impl MessageIdIndex {
    pub fn new(kv: KvStore) -> Self {
        Self { kv }
    }

    pub fn kv(&self) -> &KvStore {
        &self.kv
    }

    pub fn get_location(&self, message_id: &str) -> Result<Option<ArticleRedirect>> {
        self.kv.view(|txn| {
            txn.get(buckets::MESSAGE_ID_INDEX, FLAT, message_id.as_bytes())?
                .map(|raw| from_bytes(&raw))
                .transpose()
        })
    }

    /// Points `message_id` at `redirect`. An empty id is refused with `false`.
    pub fn update_location(
        &self,
        message_id: &str,
        redirect: &ArticleRedirect,
        timestamp: i64,
    ) -> Result<bool> {
        if message_id.is_empty() {
            return Ok(false);
        }

        let value = to_bytes(redirect)?;
        let key = time_key(timestamp);
        self.kv.update(|txn| {
            txn.put(buckets::MESSAGE_ID_BY_TIME, FLAT, &key, message_id.as_bytes())?;
            txn.put(buckets::MESSAGE_ID_INDEX, FLAT, message_id.as_bytes(), &value)
        })?;

        tracing::debug!(
            "Indexed {} at {}:{}",
            message_id,
            redirect.group,
            redirect.number
        );
        Ok(true)
    }

    /// Message-ids indexed with a timestamp at or after `since`, oldest
    /// first, at most `max`.
    pub fn since(&self, since: i64, max: usize) -> Result<Vec<String>> {
        self.kv.view(|txn| {
            let mut ids = Vec::new();
            if max == 0 {
                return Ok(ids);
            }
            txn.scan(buckets::MESSAGE_ID_BY_TIME, FLAT, &encode_i64(since), |_, value| {
                ids.push(String::from_utf8_lossy(value).into_owned());
                Ok(if ids.len() >= max {
                    Scan::Stop
                } else {
                    Scan::Continue
                })
            })?;
            Ok(ids)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn redirect(group: &str, number: i64) -> ArticleRedirect {
        ArticleRedirect {
            group: group.to_string(),
            number,
        }
    }

    #[test]
    fn test_update_then_lookup() {
        let index = MessageIdIndex::new(KvStore::open_in_memory().unwrap());
        assert_eq!(index.get_location("<a@b>").unwrap(), None);

        assert!(index.update_location("<a@b>", &redirect("alt.test", 4), 100).unwrap());
        assert_eq!(index.get_location("<a@b>").unwrap(), Some(redirect("alt.test", 4)));

        assert!(index.update_location("<a@b>", &redirect("alt.moved", 9), 101).unwrap());
        assert_eq!(index.get_location("<a@b>").unwrap(), Some(redirect("alt.moved", 9)));
    }

    #[test]
    fn test_empty_message_id_is_refused() {
        let index = MessageIdIndex::new(KvStore::open_in_memory().unwrap());
        assert!(!index.update_location("", &redirect("alt.test", 1), 1).unwrap());
        assert!(index.since(0, 10).unwrap().is_empty());
    }

    #[test]
    fn test_time_index_orders_by_timestamp() {
        let index = MessageIdIndex::new(KvStore::open_in_memory().unwrap());
        index.update_location("<late@x>", &redirect("g", 3), 300).unwrap();
        index.update_location("<early@x>", &redirect("g", 1), 100).unwrap();
        index.update_location("<same@x>", &redirect("g", 2), 100).unwrap();

        let ids = index.since(100, 10).unwrap();
        assert_eq!(ids.len(), 3);
        assert_eq!(ids[2], "<late@x>");

        assert_eq!(index.since(200, 10).unwrap(), vec!["<late@x>".to_string()]);
        assert_eq!(index.since(0, 1).unwrap().len(), 1);
    }
}
