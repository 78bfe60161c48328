use crate::store::{IntervalStore, StoreError};
use crate::validation::{validate_origin, RpkiStatus};
use crate::vrp::{DumpMeta, TimeRange, VrpRecord};
use chrono::{DateTime, Utc};
use ipnetwork::IpNetwork;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum QueryError {
    #[error(transparent)]
    StoreError(#[from] StoreError),

    #[error("No dumps have been ingested yet")]
    NoData,

    #[error("Requested timestamp is outside of available data")]
    OutOfRange,
}

/// Visibility interval as reported to API consumers.
///
/// Open intervals are a storage concept; outward they end at the latest
/// known dump time instead of being unbounded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VisibleJson {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VrpJson {
    pub prefix: IpNetwork,
    pub asn: u32,
    pub max_length: u8,
    pub trust_anchor: Option<String>,
    pub visible: VisibleJson,
}

impl VrpJson {
    fn from_record(rec: VrpRecord, latest_dump: DateTime<Utc>) -> Self {
        Self {
            prefix: rec.vrp.prefix,
            asn: rec.vrp.asn,
            max_length: rec.vrp.max_length,
            trust_anchor: rec.trust_anchor,
            visible: VisibleJson {
                from: rec.visible_from,
                to: rec.visible_to.unwrap_or(latest_dump),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetaJson {
    pub timestamp: DateTime<Utc>,
    pub deleted_vrps: i32,
    pub new_vrps: i32,
    pub unchanged_vrps: i32,
}

impl From<DumpMeta> for MetaJson {
    fn from(meta: DumpMeta) -> Self {
        Self {
            timestamp: meta.dump_time,
            deleted_vrps: meta.deleted_vrps,
            new_vrps: meta.new_vrps,
            unchanged_vrps: meta.unchanged_vrps,
        }
    }
}

/// One page of ingestion metadata. The API layer turns `has_next` into a
/// pagination URL; the ordering key (`dump_time`) is monotonic per run, so
/// page boundaries stay stable under concurrent append-only ingestion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataPage {
    pub results: Vec<MetaJson>,
    pub has_next: bool,
}

/// Read-only query surface over the interval store.
pub struct QueryEngine {
    store: Arc<dyn IntervalStore>,
}

impl QueryEngine {
    pub fn new(store: Arc<dyn IntervalStore>) -> Self {
        Self { store }
    }

    async fn dump_bounds(&self) -> Result<(DateTime<Utc>, DateTime<Utc>), QueryError> {
        self.store
            .dump_time_range()
            .await?
            .ok_or(QueryError::NoData)
    }

    fn check_within(
        at: DateTime<Utc>,
        bounds: (DateTime<Utc>, DateTime<Utc>),
    ) -> Result<(), QueryError> {
        // Never clamp: a timestamp outside ingested history is an error,
        // not an empty result.
        if at < bounds.0 || at > bounds.1 {
            return Err(QueryError::OutOfRange);
        }
        Ok(())
    }

    /// Covering VRPs for `prefix` at `at` (latest dump if omitted).
    pub async fn vrps_at(
        &self,
        prefix: &IpNetwork,
        at: Option<DateTime<Utc>>,
    ) -> Result<Vec<VrpJson>, QueryError> {
        let bounds = self.dump_bounds().await?;
        let at = match at {
            Some(ts) => {
                Self::check_within(ts, bounds)?;
                ts
            }
            None => bounds.1,
        };
        let records = self.store.covering(prefix, at).await?;
        Ok(records
            .into_iter()
            .map(|rec| VrpJson::from_record(rec, bounds.1))
            .collect())
    }

    /// Covering VRPs for `prefix` whose interval overlaps the given range;
    /// either bound may be omitted. Ordered by interval start.
    pub async fn vrps_in_range(
        &self,
        prefix: &IpNetwork,
        range: TimeRange,
    ) -> Result<Vec<VrpJson>, QueryError> {
        let bounds = self.dump_bounds().await?;
        if let Some(start) = range.start {
            Self::check_within(start, bounds)?;
        }
        if let Some(end) = range.end {
            Self::check_within(end, bounds)?;
        }
        let records = self.store.covering_in_range(prefix, &range).await?;
        Ok(records
            .into_iter()
            .map(|rec| VrpJson::from_record(rec, bounds.1))
            .collect())
    }

    /// RFC 6811 origin validation at `at` (latest dump if omitted).
    pub async fn status(
        &self,
        prefix: &IpNetwork,
        asn: u32,
        at: Option<DateTime<Utc>>,
    ) -> Result<RpkiStatus, QueryError> {
        let bounds = self.dump_bounds().await?;
        let at = match at {
            Some(ts) => {
                Self::check_within(ts, bounds)?;
                ts
            }
            None => bounds.1,
        };
        let covering = self.store.covering(prefix, at).await?;
        Ok(validate_origin(&covering, prefix, asn))
    }

    /// Offset-paginated ingestion metadata ordered by dump time.
    pub async fn metadata_page(
        &self,
        range: TimeRange,
        page_size: i64,
        page: i64,
    ) -> Result<MetadataPage, QueryError> {
        // A page number large enough to overflow the offset lies past the
        // end of any history; answer with an empty last page.
        let offset = match page.checked_mul(page_size) {
            Some(offset) => offset,
            None => {
                return Ok(MetadataPage {
                    results: Vec::new(),
                    has_next: false,
                })
            }
        };
        // Fetch one extra row to learn whether another page follows.
        let mut rows = self
            .store
            .metadata_page(&range, offset, page_size.saturating_add(1))
            .await?;
        let has_next = rows.len() as i64 > page_size;
        rows.truncate(page_size as usize);
        Ok(MetadataPage {
            results: rows.into_iter().map(MetaJson::from).collect(),
            has_next,
        })
    }
}
