use super::entry::GroupEntryRtp;
use crate::codec::{from_bytes, to_bytes};
use crate::error::Result;
use crate::kv::{FLAT, KvStore, buckets};

/// Article number allocator. Each mutation is a single-key atomic
/// read-modify-write, so concurrent callers on one group are linearized.
#[derive(Clone)]
pub struct GroupRtpStore {
    kv: KvStore,
}

fn decode(raw: Option<Vec<u8>>, group: &str) -> GroupEntryRtp {
    match raw.map(|raw| from_bytes::<GroupEntryRtp>(&raw)) {
        Some(Ok(entry)) => entry,
        Some(Err(error)) => {
            tracing::warn!("Resetting undecodable numbering state of {}: {}", group, error);
            GroupEntryRtp::default()
        }
        None => GroupEntryRtp::default(),
    }
}

impl GroupRtpStore {
    pub fn new(kv: KvStore) -> Self {
        Self { kv }
    }

    pub fn kv(&self) -> &KvStore {
        &self.kv
    }

    pub fn get(&self, group: &str) -> Result<Option<GroupEntryRtp>> {
        self.kv.view(|txn| {
            txn.get(buckets::GROUP_RTP, FLAT, group.as_bytes())?
                .map(|raw| from_bytes(&raw))
                .transpose()
        })
    }

    pub fn increment(&self, group: &str) -> Result<i64> {
        let number = self
            .kv
            .modify(buckets::GROUP_RTP, FLAT, group.as_bytes(), |raw| {
                let mut entry = decode(raw, group);
                let number = entry.increment();
                Ok((to_bytes(&entry)?, number))
            })?;

        tracing::debug!("Allocated article {} in {}", number, group);
        Ok(number)
    }

    pub fn rollback(&self, group: &str, number: i64) -> Result<GroupEntryRtp> {
        let entry = self
            .kv
            .modify(buckets::GROUP_RTP, FLAT, group.as_bytes(), |raw| {
                let mut entry = decode(raw, group);
                entry.rollback(number);
                Ok((to_bytes(&entry)?, entry))
            })?;

        tracing::debug!("Rolled back article {} in {}: {:?}", number, group, entry);
        Ok(entry)
    }
}
