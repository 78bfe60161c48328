pub mod memory;
pub mod postgres;

use crate::vrp::{ActiveEntry, DumpMeta, TimeRange, Vrp, VrpRecord};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::result::Error as DieselError;
use diesel_async::pooled_connection::deadpool::PoolError;
use ipnetwork::IpNetwork;
use std::collections::HashMap;
use thiserror::Error;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Connection error: {0}")]
    ConnectError(String),

    #[error(transparent)]
    DieselError(#[from] DieselError),

    #[error(transparent)]
    DBPoolError(#[from] PoolError),

    #[error("No open interval with record id {0}")]
    MissingRecord(i64),
}

/// All interval mutations produced by one reconciliation run.
///
/// The batch is handed to [`IntervalStore::commit_run`] in one piece so the
/// store can apply it in a single transaction; a crash mid-run never leaves a
/// VRP straddling two dump times.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MutationBatch {
    /// Close an existing open interval: `(record id, inclusive end)`.
    pub close: Vec<(i64, DateTime<Utc>)>,
    /// Open a new interval with no upper bound: `(identity, inclusive start)`.
    pub open: Vec<(Vrp, DateTime<Utc>)>,
    /// Insert an interval that opened and closed within this same run:
    /// `(identity, start, end)`. Never surfaced as currently open.
    pub bounded: Vec<(Vrp, DateTime<Utc>, DateTime<Utc>)>,
}

impl MutationBatch {
    pub fn is_empty(&self) -> bool {
        self.close.is_empty() && self.open.is_empty() && self.bounded.is_empty()
    }
}

/// Contract the reconciliation and query engines require of the backing
/// store: point/range covering scans over visibility intervals plus an
/// atomic per-run mutation commit.
#[async_trait]
pub trait IntervalStore: Send + Sync {
    /// All records whose interval is currently open, keyed by identity.
    /// Loaded fresh at the start of every reconciliation run; one consistent
    /// snapshot.
    async fn active_set(&self) -> Result<HashMap<Vrp, ActiveEntry>, StoreError>;

    /// Records whose prefix is a supernet-or-equal of `prefix` and whose
    /// interval contains `at`.
    async fn covering(
        &self,
        prefix: &IpNetwork,
        at: DateTime<Utc>,
    ) -> Result<Vec<VrpRecord>, StoreError>;

    /// Records whose prefix is a supernet-or-equal of `prefix` and whose
    /// interval overlaps `range`, ordered by interval start.
    async fn covering_in_range(
        &self,
        prefix: &IpNetwork,
        range: &TimeRange,
    ) -> Result<Vec<VrpRecord>, StoreError>;

    /// Bounds of queryable history, from ingestion metadata.
    async fn dump_time_range(&self) -> Result<Option<(DateTime<Utc>, DateTime<Utc>)>, StoreError>;

    /// Ingestion metadata ordered by dump time ascending, restricted to
    /// `range` where bounded, with offset pagination.
    async fn metadata_page(
        &self,
        range: &TimeRange,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<DumpMeta>, StoreError>;

    /// Atomically applies one run's mutations together with its metadata
    /// row. Either everything commits or nothing does.
    async fn commit_run(&self, meta: &DumpMeta, batch: &MutationBatch) -> Result<(), StoreError>;
}
