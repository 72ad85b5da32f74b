use super::entry::{GroupEntryNrt, GroupPairNrt, NrtUpdate};
use crate::codec::{from_bytes, to_bytes};
use crate::error::{ArticleDbError, Result};
use crate::kv::{FLAT, KvStore, Scan, buckets};

/// Group descriptions, keyed by group name.
#[derive(Clone)]
pub struct GroupNrtStore {
    kv: KvStore,
}

impl GroupNrtStore {
    pub fn new(kv: KvStore) -> Self {
        Self { kv }
    }

    pub fn kv(&self) -> &KvStore {
        &self.kv
    }

    pub fn get(&self, group: &str) -> Result<Option<GroupEntryNrt>> {
        self.kv.view(|txn| {
            txn.get(buckets::GROUP_NRT, FLAT, group.as_bytes())?
                .map(|raw| from_bytes(&raw))
                .transpose()
        })
    }

    /// Entries for the requested groups that exist. Absent or undecodable
    /// groups are left out.
    pub fn bulk_get(&self, groups: &[String]) -> Result<Vec<GroupPairNrt>> {
        self.kv.view(|txn| {
            let mut pairs = Vec::with_capacity(groups.len());
            for group in groups {
                let Some(raw) = txn.get(buckets::GROUP_NRT, FLAT, group.as_bytes())? else {
                    continue;
                };
                match from_bytes::<GroupEntryNrt>(&raw) {
                    Ok(entry) => pairs.push(GroupPairNrt {
                        group: group.clone(),
                        entry,
                    }),
                    Err(error) => {
                        tracing::warn!("Skipping undecodable group entry {}: {}", group, error)
                    }
                }
            }
            Ok(pairs)
        })
    }

    /// Stores `entry` unless an entry at least as new is already present.
    pub fn update(&self, group: &str, entry: &GroupEntryNrt) -> Result<NrtUpdate> {
        let value = to_bytes(entry)?;
        let outcome = self.kv.update(|txn| {
            let previous = txn
                .get(buckets::GROUP_NRT, FLAT, group.as_bytes())?
                .map(|raw| from_bytes::<GroupEntryNrt>(&raw))
                .transpose()?;

            let applied = previous
                .as_ref()
                .is_none_or(|existing| existing.timestamp < entry.timestamp);
            if applied {
                txn.put(buckets::GROUP_NRT, FLAT, group.as_bytes(), &value)?;
            }
            Ok(NrtUpdate { previous, applied })
        })?;

        tracing::debug!(
            "Group {} update at {} applied={}",
            group,
            entry.timestamp,
            outcome.applied
        );
        Ok(outcome)
    }

    /// Stores `entry` only if the group has no entry yet.
    pub fn create(&self, group: &str, entry: &GroupEntryNrt) -> Result<()> {
        let value = to_bytes(entry)?;
        self.kv.update(|txn| {
            if txn.contains(buckets::GROUP_NRT, FLAT, group.as_bytes())? {
                return Err(ArticleDbError::Conflict(format!("group {} already exists", group)));
            }
            txn.put(buckets::GROUP_NRT, FLAT, group.as_bytes(), &value)
        })?;

        tracing::info!("Created group {}", group);
        Ok(())
    }

    /// Groups after `after` that start with `prefix` and end with `suffix`,
    /// in key order.
    pub fn range(&self, after: &str, prefix: &str, suffix: &str) -> Result<Vec<GroupPairNrt>> {
        let start = after.max(prefix);
        self.kv.view(|txn| {
            let mut pairs = Vec::new();
            txn.scan(buckets::GROUP_NRT, FLAT, start.as_bytes(), |key, value| {
                if !after.is_empty() && key == after.as_bytes() {
                    return Ok(Scan::Continue);
                }
                if !key.starts_with(prefix.as_bytes()) {
                    return Ok(Scan::Stop);
                }
                if !key.ends_with(suffix.as_bytes()) {
                    return Ok(Scan::Continue);
                }

                let group = String::from_utf8_lossy(key).into_owned();
                match from_bytes::<GroupEntryNrt>(value) {
                    Ok(entry) => pairs.push(GroupPairNrt { group, entry }),
                    Err(error) => {
                        tracing::warn!("Skipping undecodable group entry {}: {}", group, error)
                    }
                }
                Ok(Scan::Continue)
            })?;
            Ok(pairs)
        })
    }
}
