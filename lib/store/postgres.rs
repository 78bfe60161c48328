use super::{IntervalStore, MutationBatch, StoreError};
use crate::db::models::{DumpMetaRow, NewDumpMetaRow, NewVrpRow, VrpRow};
use crate::db::schema::{metadata, vrps};
use crate::vrp::{ActiveEntry, DumpMeta, TimeRange, Vrp, VrpRecord};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::dsl::{max, min};
use diesel::prelude::*;
use diesel_async::pooled_connection::deadpool::Pool;
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use ipnetwork::IpNetwork;
use std::collections::HashMap;

/// Postgres-backed interval store.
///
/// Covering scans use the native `cidr` containment operator (`>>=`), so
/// longest-prefix-match semantics stay in the database where the gist index
/// lives. All per-run mutations go through one transaction in `commit_run`.
pub struct PgStore {
    pool: Pool<AsyncPgConnection>,
}

impl PgStore {
    pub fn new(pool: Pool<AsyncPgConnection>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl IntervalStore for PgStore {
    async fn active_set(&self) -> Result<HashMap<Vrp, ActiveEntry>, StoreError> {
        let mut conn = self.pool.get().await?;
        let rows: Vec<VrpRow> = vrps::table
            .filter(vrps::visible_to.is_null())
            .load(&mut conn)
            .await?;
        Ok(rows
            .into_iter()
            .map(|row| {
                let rec = VrpRecord::from(row);
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
        let mut conn = self.pool.get().await?;
        let rows: Vec<VrpRow> = vrps::table
            .filter(vrps::prefix.contains_or_eq(*prefix))
            .filter(vrps::visible_from.le(at))
            .filter(vrps::visible_to.is_null().or(vrps::visible_to.ge(at)))
            .load(&mut conn)
            .await?;
        Ok(rows.into_iter().map(VrpRecord::from).collect())
    }

    async fn covering_in_range(
        &self,
        prefix: &IpNetwork,
        range: &TimeRange,
    ) -> Result<Vec<VrpRecord>, StoreError> {
        let mut conn = self.pool.get().await?;
        let mut query = vrps::table
            .filter(vrps::prefix.contains_or_eq(*prefix))
            .into_boxed();
        if let Some(end) = range.end {
            query = query.filter(vrps::visible_from.le(end));
        }
        if let Some(start) = range.start {
            query = query.filter(vrps::visible_to.is_null().or(vrps::visible_to.ge(start)));
        }
        let rows: Vec<VrpRow> = query
            .order(vrps::visible_from.asc())
            .load(&mut conn)
            .await?;
        Ok(rows.into_iter().map(VrpRecord::from).collect())
    }

    async fn dump_time_range(&self) -> Result<Option<(DateTime<Utc>, DateTime<Utc>)>, StoreError> {
        let mut conn = self.pool.get().await?;
        let bounds: (Option<DateTime<Utc>>, Option<DateTime<Utc>>) = metadata::table
            .select((min(metadata::dump_time), max(metadata::dump_time)))
            .first(&mut conn)
            .await?;
        Ok(bounds.0.zip(bounds.1))
    }

    async fn metadata_page(
        &self,
        range: &TimeRange,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<DumpMeta>, StoreError> {
        let mut conn = self.pool.get().await?;
        let mut query = metadata::table.into_boxed();
        if let Some(start) = range.start {
            query = query.filter(metadata::dump_time.ge(start));
        }
        if let Some(end) = range.end {
            query = query.filter(metadata::dump_time.le(end));
        }
        let rows: Vec<DumpMetaRow> = query
            .order(metadata::dump_time.asc())
            .offset(offset)
            .limit(limit)
            .load(&mut conn)
            .await?;
        Ok(rows.into_iter().map(DumpMeta::from).collect())
    }

    async fn commit_run(&self, meta: &DumpMeta, batch: &MutationBatch) -> Result<(), StoreError> {
        let meta_row = NewDumpMetaRow::from(meta);
        let closes = batch.close.clone();
        let mut new_rows: Vec<NewVrpRow> = batch
            .open
            .iter()
            .map(|(vrp, start)| NewVrpRow::from_vrp(vrp, *start, None))
            .collect();
        new_rows.extend(
            batch
                .bounded
                .iter()
                .map(|(vrp, start, end)| NewVrpRow::from_vrp(vrp, *start, Some(*end))),
        );

        let mut conn = self.pool.get().await?;
        conn.transaction::<_, StoreError, _>(|conn| {
            async move {
                diesel::insert_into(metadata::table)
                    .values(&meta_row)
                    .execute(conn)
                    .await?;

                for (id, end) in &closes {
                    let updated = diesel::update(
                        vrps::table.find(*id).filter(vrps::visible_to.is_null()),
                    )
                    .set(vrps::visible_to.eq(Some(*end)))
                    .execute(conn)
                    .await?;
                    // Returning an error here rolls the whole run back.
                    if updated != 1 {
                        return Err(StoreError::MissingRecord(*id));
                    }
                }

                if !new_rows.is_empty() {
                    diesel::insert_into(vrps::table)
                        .values(&new_rows)
                        .execute(conn)
                        .await?;
                }
                Ok(())
            }
            .scope_boxed()
        })
        .await
    }
}
