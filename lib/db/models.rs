use super::schema::{metadata, vrps};
use crate::vrp::{DumpMeta, Vrp, VrpRecord};
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use ipnetwork::IpNetwork;

#[derive(Queryable, Identifiable, Debug)]
#[diesel(table_name = vrps)]
pub struct VrpRow {
    pub id: i64,
    pub prefix: IpNetwork,
    pub asn: i64,
    pub max_length: i32,
    pub trust_anchor: Option<String>,
    pub visible_from: DateTime<Utc>,
    pub visible_to: Option<DateTime<Utc>>,
}

impl From<VrpRow> for VrpRecord {
    fn from(row: VrpRow) -> Self {
        Self {
            id: row.id,
            vrp: Vrp::new(row.prefix, row.asn as u32, row.max_length as u8),
            trust_anchor: row.trust_anchor,
            visible_from: row.visible_from,
            visible_to: row.visible_to,
        }
    }
}

#[derive(Insertable, Debug)]
#[diesel(table_name = vrps)]
pub struct NewVrpRow {
    pub prefix: IpNetwork,
    pub asn: i64,
    pub max_length: i32,
    pub trust_anchor: Option<String>,
    pub visible_from: DateTime<Utc>,
    pub visible_to: Option<DateTime<Utc>>,
}

impl NewVrpRow {
    pub fn from_vrp(
        vrp: &Vrp,
        visible_from: DateTime<Utc>,
        visible_to: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            prefix: vrp.prefix,
            asn: vrp.asn as i64,
            max_length: vrp.max_length as i32,
            trust_anchor: None,
            visible_from,
            visible_to,
        }
    }
}

#[derive(Queryable, Debug)]
#[diesel(table_name = metadata)]
pub struct DumpMetaRow {
    pub id: i32,
    pub dump_time: DateTime<Utc>,
    pub ingest_time: DateTime<Utc>,
    pub deleted_vrps: i32,
    pub unchanged_vrps: i32,
    pub new_vrps: i32,
}

impl From<DumpMetaRow> for DumpMeta {
    fn from(row: DumpMetaRow) -> Self {
        Self {
            dump_time: row.dump_time,
            deleted_vrps: row.deleted_vrps,
            unchanged_vrps: row.unchanged_vrps,
            new_vrps: row.new_vrps,
        }
    }
}

#[derive(Insertable, Debug)]
#[diesel(table_name = metadata)]
pub struct NewDumpMetaRow {
    pub dump_time: DateTime<Utc>,
    pub deleted_vrps: i32,
    pub unchanged_vrps: i32,
    pub new_vrps: i32,
}

impl From<&DumpMeta> for NewDumpMetaRow {
    fn from(meta: &DumpMeta) -> Self {
        Self {
            dump_time: meta.dump_time,
            deleted_vrps: meta.deleted_vrps,
            unchanged_vrps: meta.unchanged_vrps,
            new_vrps: meta.new_vrps,
        }
    }
}
