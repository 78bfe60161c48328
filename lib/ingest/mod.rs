use crate::server::monitoring::INGEST_METRICS;
use crate::store::{IntervalStore, MutationBatch, StoreError};
use crate::vrp::{ActiveEntry, DumpMeta, FeedPayload, Observation, Vrp, VrpEvent, VrpEventKind};
use chrono::{DateTime, Utc};
use log::{error, info, warn};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error(transparent)]
    StoreError(#[from] StoreError),

    #[error("Snapshot contained no VRPs and was not declared empty; refusing to close every active interval")]
    EmptyObservation,

    #[error("Event stream contained no events, cannot derive a dump time")]
    EmptyEventStream,
}

/// Per-run counters, persisted into dump metadata.
///
/// In event-stream mode a VRP that is announced and withdrawn within one
/// dump counts as both new and deleted. Upstream documents these counters as
/// not totally precise for that case; we keep the semantics so historical
/// metadata keeps meaning the same thing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunCounts {
    pub new: usize,
    pub unchanged: usize,
    pub deleted: usize,
    /// Skipped or repaired feed inconsistencies. Logged, never persisted.
    pub inconsistencies: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub dump_time: DateTime<Utc>,
    pub counts: RunCounts,
}

/// Diff of a full point-in-time observation against the active set.
///
/// Identities absent from the observation are closed at the observation's
/// dump time, unseen identities are opened there, and the intersection is
/// left untouched (the open interval keeps covering this dump implicitly).
pub fn diff_snapshot(
    active: &HashMap<Vrp, ActiveEntry>,
    observation: &Observation,
) -> (MutationBatch, RunCounts) {
    let new_set: HashSet<Vrp> = observation.vrps.iter().copied().collect();

    let mut batch = MutationBatch::default();
    let mut counts = RunCounts::default();

    for (vrp, entry) in active {
        if new_set.contains(vrp) {
            counts.unchanged += 1;
        } else {
            counts.deleted += 1;
            batch.close.push((entry.id, observation.dump_time));
        }
    }
    for vrp in &new_set {
        if !active.contains_key(vrp) {
            counts.new += 1;
            batch.open.push((*vrp, observation.dump_time));
        }
    }

    // Set iteration order is arbitrary; keep the batch deterministic.
    batch.close.sort_by_key(|(id, _)| *id);
    batch.open.sort();
    (batch, counts)
}

/// Folds an ordered event stream into one mutation batch.
///
/// Single pass over the events with two working collections: the (copied)
/// active set and a pending-insert map for VRPs announced earlier in this
/// same dump. Feed inconsistencies (duplicate announces, withdraws of
/// unknown VRPs, unexpected state entries, unknown message kinds) are logged
/// and skipped; they never abort the run.
///
/// Returns the batch, the counts, and the maximum event timestamp, which
/// serves as the dump time since this feed does not declare one.
pub fn fold_events(
    active: &HashMap<Vrp, ActiveEntry>,
    events: &[VrpEvent],
) -> (MutationBatch, RunCounts, Option<DateTime<Utc>>) {
    let mut active = active.clone();
    let mut pending: HashMap<Vrp, DateTime<Utc>> = HashMap::new();
    let mut batch = MutationBatch::default();
    let mut counts = RunCounts::default();
    let mut max_ts: Option<DateTime<Utc>> = None;

    for event in events {
        max_ts = Some(max_ts.map_or(event.capture_ts, |ts| ts.max(event.capture_ts)));
        match &event.kind {
            // Start state should match the previous dump, but upstream
            // occasionally includes VRPs we never saw. Repair by treating
            // them as inserts at the event timestamp.
            VrpEventKind::State => {
                if active.contains_key(&event.vrp) {
                    counts.unchanged += 1;
                } else {
                    warn!(
                        "State entry for VRP absent from previous dump, inserting: {:?}",
                        event.vrp
                    );
                    counts.inconsistencies += 1;
                    counts.new += 1;
                    pending.insert(event.vrp, event.capture_ts);
                }
            }
            VrpEventKind::Announce => {
                if active.contains_key(&event.vrp) || pending.contains_key(&event.vrp) {
                    warn!("Ignoring duplicate announce: {:?}", event.vrp);
                    counts.inconsistencies += 1;
                    continue;
                }
                counts.new += 1;
                pending.insert(event.vrp, event.capture_ts);
            }
            VrpEventKind::Withdraw => {
                if let Some(entry) = active.remove(&event.vrp) {
                    counts.deleted += 1;
                    batch.close.push((entry.id, event.capture_ts));
                } else if let Some(start) = pending.remove(&event.vrp) {
                    // Announced and withdrawn within this dump: the record
                    // is born fully bounded and never shows up as open.
                    counts.deleted += 1;
                    batch.bounded.push((event.vrp, start, event.capture_ts));
                } else {
                    warn!("Withdraw of unknown VRP: {:?}", event.vrp);
                    counts.inconsistencies += 1;
                }
            }
            VrpEventKind::Other(kind) => {
                error!("Unknown message type {:?} for VRP {:?}", kind, event.vrp);
                counts.inconsistencies += 1;
            }
        }
    }

    // Whatever is still pending at end of stream opens for real.
    let mut opened: Vec<(Vrp, DateTime<Utc>)> = pending.into_iter().collect();
    opened.sort();
    batch.open = opened;

    (batch, counts, max_ts)
}

/// Merges feed payloads into the interval store, one dump per run.
///
/// Loads the active set fresh from the store each run (the store is the
/// single source of truth and both ingestion modes may alternate), computes
/// the mutation batch with the pure diff/fold functions above, and commits
/// batch plus metadata atomically.
pub struct ReconciliationEngine {
    store: Arc<dyn IntervalStore>,
}

impl ReconciliationEngine {
    pub fn new(store: Arc<dyn IntervalStore>) -> Self {
        Self { store }
    }

    pub async fn run(&self, payload: FeedPayload) -> Result<RunSummary, IngestError> {
        let active = self.store.active_set().await?;
        info!("Loaded {} active VRPs from store", active.len());

        let (batch, counts, dump_time) = match payload {
            FeedPayload::Snapshot(observation) => {
                // An empty VRP list from a failed fetch must not be read as
                // "everything was withdrawn"; the decoder has to declare a
                // genuinely empty dump explicitly.
                if observation.vrps.is_empty() && !observation.declared_empty {
                    return Err(IngestError::EmptyObservation);
                }
                let (batch, counts) = diff_snapshot(&active, &observation);
                (batch, counts, observation.dump_time)
            }
            FeedPayload::Events { events } => {
                let (batch, counts, max_ts) = fold_events(&active, &events);
                let dump_time = max_ts.ok_or(IngestError::EmptyEventStream)?;
                (batch, counts, dump_time)
            }
        };

        let meta = DumpMeta {
            dump_time,
            deleted_vrps: counts.deleted as i32,
            unchanged_vrps: counts.unchanged as i32,
            new_vrps: counts.new as i32,
        };
        self.store.commit_run(&meta, &batch).await?;

        info!(
            "Reconciled dump {}: {} new, {} deleted, {} unchanged, {} inconsistencies",
            dump_time, counts.new, counts.deleted, counts.unchanged, counts.inconsistencies
        );
        if let Some(metrics) = INGEST_METRICS.get() {
            metrics.runs_completed.inc();
            metrics
                .intervals_opened
                .inc_by((batch.open.len() + batch.bounded.len()) as u64);
            metrics
                .intervals_closed
                .inc_by((batch.close.len() + batch.bounded.len()) as u64);
            metrics
                .ingest_inconsistencies
                .inc_by(counts.inconsistencies as u64);
        }

        Ok(RunSummary { dump_time, counts })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use ipnetwork::IpNetwork;

    fn net(s: &str) -> IpNetwork {
        s.parse().unwrap()
    }

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn vrp(prefix: &str, asn: u32) -> Vrp {
        Vrp::new(net(prefix), asn, 24)
    }

    fn active_of(entries: &[(Vrp, i64, i64)]) -> HashMap<Vrp, ActiveEntry> {
        entries
            .iter()
            .map(|(vrp, id, start)| {
                (
                    *vrp,
                    ActiveEntry {
                        id: *id,
                        visible_from: ts(*start),
                    },
                )
            })
            .collect()
    }

    fn event(kind: VrpEventKind, vrp: Vrp, at: i64) -> VrpEvent {
        VrpEvent {
            kind,
            vrp,
            capture_ts: ts(at),
        }
    }

    #[test]
    fn snapshot_diff_splits_deleted_unchanged_new() {
        let kept = vrp("10.0.0.0/24", 65001);
        let gone = vrp("10.0.1.0/24", 65001);
        let fresh = vrp("10.0.2.0/24", 65002);
        let active = active_of(&[(kept, 1, 100), (gone, 2, 100)]);
        let observation = Observation::new(ts(200), vec![kept, fresh]);

        let (batch, counts) = diff_snapshot(&active, &observation);
        assert_eq!(counts.deleted, 1);
        assert_eq!(counts.unchanged, 1);
        assert_eq!(counts.new, 1);
        assert_eq!(batch.close, vec![(2, ts(200))]);
        assert_eq!(batch.open, vec![(fresh, ts(200))]);
        assert!(batch.bounded.is_empty());
    }

    #[test]
    fn snapshot_diff_is_idempotent_on_reapply() {
        let a = vrp("10.0.0.0/24", 65001);
        let b = vrp("10.0.1.0/24", 65001);
        let active = active_of(&[(a, 1, 100), (b, 2, 100)]);
        let observation = Observation::new(ts(100), vec![a, b]);

        let (batch, counts) = diff_snapshot(&active, &observation);
        assert!(batch.is_empty());
        assert_eq!(counts.unchanged, 2);
        assert_eq!(counts.new, 0);
        assert_eq!(counts.deleted, 0);
    }

    #[test]
    fn snapshot_diff_dedupes_repeated_observation_entries() {
        let a = vrp("10.0.0.0/24", 65001);
        let observation = Observation::new(ts(100), vec![a, a, a]);
        let (batch, counts) = diff_snapshot(&HashMap::new(), &observation);
        assert_eq!(counts.new, 1);
        assert_eq!(batch.open.len(), 1);
    }

    #[test]
    fn events_state_withdraw_announce_reopens() {
        let v = vrp("10.0.0.0/24", 65001);
        let active = active_of(&[(v, 7, 50)]);
        let events = vec![
            event(VrpEventKind::State, v, 100),
            event(VrpEventKind::Withdraw, v, 150),
            event(VrpEventKind::Announce, v, 200),
        ];

        let (batch, counts, max_ts) = fold_events(&active, &events);
        assert_eq!(batch.close, vec![(7, ts(150))]);
        assert_eq!(batch.open, vec![(v, ts(200))]);
        assert!(batch.bounded.is_empty());
        assert_eq!(counts.deleted, 1);
        assert_eq!(counts.new, 1);
        assert_eq!(counts.unchanged, 1);
        assert_eq!(max_ts, Some(ts(200)));
    }

    #[test]
    fn events_announce_withdraw_within_dump_is_bounded() {
        let v = vrp("10.0.0.0/24", 65001);
        let events = vec![
            event(VrpEventKind::Announce, v, 100),
            event(VrpEventKind::Withdraw, v, 150),
        ];

        let (batch, counts, _) = fold_events(&HashMap::new(), &events);
        assert!(batch.close.is_empty());
        assert!(batch.open.is_empty());
        assert_eq!(batch.bounded, vec![(v, ts(100), ts(150))]);
        // Known imprecision: the same VRP counts as both new and deleted.
        assert_eq!(counts.new, 1);
        assert_eq!(counts.deleted, 1);
    }

    #[test]
    fn events_state_resync_inserts_missing_vrp() {
        let v = vrp("10.0.0.0/24", 65001);
        let events = vec![event(VrpEventKind::State, v, 100)];

        let (batch, counts, _) = fold_events(&HashMap::new(), &events);
        assert_eq!(batch.open, vec![(v, ts(100))]);
        assert_eq!(counts.new, 1);
        assert_eq!(counts.inconsistencies, 1);
    }

    #[test]
    fn events_duplicate_announce_is_skipped() {
        let v = vrp("10.0.0.0/24", 65001);
        let active = active_of(&[(v, 1, 50)]);
        let events = vec![event(VrpEventKind::Announce, v, 100)];

        let (batch, counts, _) = fold_events(&active, &events);
        assert!(batch.is_empty());
        assert_eq!(counts.new, 0);
        assert_eq!(counts.inconsistencies, 1);
    }

    #[test]
    fn events_unknown_withdraw_and_kind_are_skipped() {
        let v = vrp("10.0.0.0/24", 65001);
        let events = vec![
            event(VrpEventKind::Withdraw, v, 100),
            event(VrpEventKind::Other("X".to_string()), v, 110),
        ];

        let (batch, counts, max_ts) = fold_events(&HashMap::new(), &events);
        assert!(batch.is_empty());
        assert_eq!(counts.inconsistencies, 2);
        assert_eq!(max_ts, Some(ts(110)));
    }

    #[tokio::test]
    async fn engine_rejects_undeclared_empty_snapshot() {
        let store = Arc::new(crate::store::MemoryStore::new());
        let engine = ReconciliationEngine::new(store.clone());

        let seed = Observation::new(ts(100), vec![vrp("10.0.0.0/24", 65001)]);
        engine.run(FeedPayload::Snapshot(seed)).await.unwrap();

        let empty = Observation::new(ts(200), vec![]);
        let err = engine.run(FeedPayload::Snapshot(empty)).await.unwrap_err();
        assert!(matches!(err, IngestError::EmptyObservation));
        // Nothing was closed by the rejected run.
        assert_eq!(store.active_set().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn engine_accepts_declared_empty_snapshot() {
        let store = Arc::new(crate::store::MemoryStore::new());
        let engine = ReconciliationEngine::new(store.clone());

        let seed = Observation::new(ts(100), vec![vrp("10.0.0.0/24", 65001)]);
        engine.run(FeedPayload::Snapshot(seed)).await.unwrap();

        let mut empty = Observation::new(ts(200), vec![]);
        empty.declared_empty = true;
        let summary = engine.run(FeedPayload::Snapshot(empty)).await.unwrap();
        assert_eq!(summary.counts.deleted, 1);
        assert!(store.active_set().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn engine_rejects_empty_event_stream() {
        let store = Arc::new(crate::store::MemoryStore::new());
        let engine = ReconciliationEngine::new(store);
        let err = engine
            .run(FeedPayload::Events { events: vec![] })
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::EmptyEventStream));
    }
}
