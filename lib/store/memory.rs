use super::{IntervalStore, MutationBatch, StoreError};
use crate::vrp::{ActiveEntry, DumpMeta, TimeRange, Vrp, VrpRecord};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ipnetwork::IpNetwork;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::Mutex;

/// In-memory interval store.
///
/// Backs the engine and query tests and small local runs. A single mutex
/// around the whole state gives the same atomicity as the Postgres
/// transaction: `commit_run` validates the batch before touching anything,
/// so a rejected batch leaves the store unchanged.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    records: BTreeMap<i64, VrpRecord>,
    metadata: Vec<DumpMeta>,
    next_id: i64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every stored record, for test assertions.
    pub async fn all_records(&self) -> Vec<VrpRecord> {
        self.inner.lock().await.records.values().cloned().collect()
    }
}

#[async_trait]
impl IntervalStore for MemoryStore {
    async fn active_set(&self) -> Result<HashMap<Vrp, ActiveEntry>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .records
            .values()
            .filter(|rec| rec.visible_to.is_none())
            .map(|rec| {
                (
                    rec.vrp,
                    ActiveEntry {
                        id: rec.id,
                        visible_from: rec.visible_from,
                    },
                )
            })
            .collect())
    }

    async fn covering(
        &self,
        prefix: &IpNetwork,
        at: DateTime<Utc>,
    ) -> Result<Vec<VrpRecord>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .records
            .values()
            .filter(|rec| rec.vrp.covers(prefix) && rec.visible_at(at))
            .cloned()
            .collect())
    }

    async fn covering_in_range(
        &self,
        prefix: &IpNetwork,
        range: &TimeRange,
    ) -> Result<Vec<VrpRecord>, StoreError> {
        let inner = self.inner.lock().await;
        let mut hits: Vec<VrpRecord> = inner
            .records
            .values()
            .filter(|rec| rec.vrp.covers(prefix) && rec.visible_in(range))
            .cloned()
            .collect();
        hits.sort_by_key(|rec| rec.visible_from);
        Ok(hits)
    }

    async fn dump_time_range(&self) -> Result<Option<(DateTime<Utc>, DateTime<Utc>)>, StoreError> {
        let inner = self.inner.lock().await;
        let earliest = inner.metadata.iter().map(|m| m.dump_time).min();
        let latest = inner.metadata.iter().map(|m| m.dump_time).max();
        Ok(earliest.zip(latest))
    }

    async fn metadata_page(
        &self,
        range: &TimeRange,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<DumpMeta>, StoreError> {
        let inner = self.inner.lock().await;
        let mut rows: Vec<DumpMeta> = inner
            .metadata
            .iter()
            .filter(|m| {
                range.start.map_or(true, |s| m.dump_time >= s)
                    && range.end.map_or(true, |e| m.dump_time <= e)
            })
            .cloned()
            .collect();
        rows.sort_by_key(|m| m.dump_time);
        Ok(rows
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn commit_run(&self, meta: &DumpMeta, batch: &MutationBatch) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;

        // Validate before mutating so a bad batch leaves no partial state.
        for (id, _) in &batch.close {
            match inner.records.get(id) {
                Some(rec) if rec.visible_to.is_none() => {}
                _ => return Err(StoreError::MissingRecord(*id)),
            }
        }

        for (id, end) in &batch.close {
            if let Some(rec) = inner.records.get_mut(id) {
                rec.visible_to = Some(*end);
            }
        }
        for (vrp, start) in &batch.open {
            let id = inner.next_id;
            inner.next_id += 1;
            inner.records.insert(
                id,
                VrpRecord {
                    id,
                    vrp: *vrp,
                    trust_anchor: None,
                    visible_from: *start,
                    visible_to: None,
                },
            );
        }
        for (vrp, start, end) in &batch.bounded {
            let id = inner.next_id;
            inner.next_id += 1;
            inner.records.insert(
                id,
                VrpRecord {
                    id,
                    vrp: *vrp,
                    trust_anchor: None,
                    visible_from: *start,
                    visible_to: Some(*end),
                },
            );
        }
        inner.metadata.push(meta.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn net(s: &str) -> IpNetwork {
        s.parse().unwrap()
    }

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn vrp(prefix: &str, asn: u32, max_length: u8) -> Vrp {
        Vrp::new(net(prefix), asn, max_length)
    }

    fn meta(dump_time: DateTime<Utc>) -> DumpMeta {
        DumpMeta {
            dump_time,
            deleted_vrps: 0,
            unchanged_vrps: 0,
            new_vrps: 0,
        }
    }

    #[tokio::test]
    async fn open_then_close_round_trip() {
        let store = MemoryStore::new();
        let v = vrp("10.0.0.0/24", 65001, 24);
        let batch = MutationBatch {
            open: vec![(v, ts(100))],
            ..Default::default()
        };
        store.commit_run(&meta(ts(100)), &batch).await.unwrap();

        let active = store.active_set().await.unwrap();
        assert_eq!(active.len(), 1);
        let entry = active[&v];

        let batch = MutationBatch {
            close: vec![(entry.id, ts(200))],
            ..Default::default()
        };
        store.commit_run(&meta(ts(200)), &batch).await.unwrap();
        assert!(store.active_set().await.unwrap().is_empty());

        let covering = store.covering(&net("10.0.0.0/24"), ts(150)).await.unwrap();
        assert_eq!(covering.len(), 1);
        assert_eq!(covering[0].visible_to, Some(ts(200)));
    }

    #[tokio::test]
    async fn covering_matches_supernets_only() {
        let store = MemoryStore::new();
        let batch = MutationBatch {
            open: vec![
                (vrp("10.0.0.0/23", 65001, 24), ts(100)),
                (vrp("10.0.0.0/25", 65001, 25), ts(100)),
                (vrp("192.168.0.0/16", 65002, 24), ts(100)),
            ],
            ..Default::default()
        };
        store.commit_run(&meta(ts(100)), &batch).await.unwrap();

        let hits = store.covering(&net("10.0.0.0/24"), ts(100)).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].vrp.prefix, net("10.0.0.0/23"));
    }

    #[tokio::test]
    async fn bad_close_commits_nothing() {
        let store = MemoryStore::new();
        let batch = MutationBatch {
            close: vec![(42, ts(200))],
            open: vec![(vrp("10.0.0.0/24", 65001, 24), ts(200))],
            ..Default::default()
        };
        let err = store.commit_run(&meta(ts(200)), &batch).await.unwrap_err();
        assert!(matches!(err, StoreError::MissingRecord(42)));
        assert!(store.all_records().await.is_empty());
        assert!(store.dump_time_range().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn metadata_page_is_ordered_and_bounded() {
        let store = MemoryStore::new();
        for secs in [300, 100, 200] {
            store
                .commit_run(&meta(ts(secs)), &MutationBatch::default())
                .await
                .unwrap();
        }
        let page = store
            .metadata_page(&TimeRange::default(), 0, 2)
            .await
            .unwrap();
        assert_eq!(
            page.iter().map(|m| m.dump_time).collect::<Vec<_>>(),
            vec![ts(100), ts(200)]
        );
        assert_eq!(
            store.dump_time_range().await.unwrap(),
            Some((ts(100), ts(300)))
        );
    }
}
