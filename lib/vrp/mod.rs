use chrono::{DateTime, Utc};
use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};

/// Identity of a Validated ROA Payload.
///
/// Two VRPs with the same `(prefix, asn, max_length)` tuple are the same
/// logical entity no matter when they were observed; the visibility history
/// lives on [`VrpRecord`], not here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Vrp {
    pub prefix: IpNetwork,
    pub asn: u32,
    pub max_length: u8,
}

impl Vrp {
    pub fn new(prefix: IpNetwork, asn: u32, max_length: u8) -> Self {
        Self {
            prefix,
            asn,
            max_length,
        }
    }

    /// True if this VRP's prefix is a supernet of (or equal to) `query`.
    ///
    /// Matches the Postgres `>>=` operator on `cidr`: same address family,
    /// shorter-or-equal prefix length, and the query's network address falls
    /// inside this prefix.
    pub fn covers(&self, query: &IpNetwork) -> bool {
        self.prefix.prefix() <= query.prefix() && self.prefix.contains(query.network())
    }
}

/// One stored occurrence of a VRP identity with its visibility interval.
///
/// `visible_to == None` means the interval is still open ("visible as of the
/// most recent dump"). When set, the bound is inclusive of the last dump in
/// which the VRP was seen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VrpRecord {
    pub id: i64,
    pub vrp: Vrp,
    pub trust_anchor: Option<String>,
    pub visible_from: DateTime<Utc>,
    pub visible_to: Option<DateTime<Utc>>,
}

impl VrpRecord {
    /// Point containment: `visible_from <= at <= visible_to` (open = no upper
    /// bound).
    pub fn visible_at(&self, at: DateTime<Utc>) -> bool {
        self.visible_from <= at && self.visible_to.map_or(true, |to| at <= to)
    }

    /// Overlap with a possibly half-open query range.
    pub fn visible_in(&self, range: &TimeRange) -> bool {
        let starts_before_end = match range.end {
            Some(end) => self.visible_from <= end,
            None => true,
        };
        let ends_after_start = match (range.start, self.visible_to) {
            (Some(start), Some(to)) => start <= to,
            _ => true,
        };
        starts_before_end && ends_after_start
    }
}

/// Query range where either bound may be unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeRange {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl TimeRange {
    pub fn new(start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Self {
        Self { start, end }
    }
}

/// Entry of the active-set snapshot loaded at the start of a reconciliation
/// run: the record id and lower interval bound of the one open record for a
/// VRP identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActiveEntry {
    pub id: i64,
    pub visible_from: DateTime<Utc>,
}

/// Metadata for one successful reconciliation run. Append-only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DumpMeta {
    pub dump_time: DateTime<Utc>,
    pub deleted_vrps: i32,
    pub unchanged_vrps: i32,
    pub new_vrps: i32,
}

/// A complete point-in-time VRP set as delivered by a snapshot feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Observation {
    pub dump_time: DateTime<Utc>,
    pub vrps: Vec<Vrp>,
    /// The decoder must set this to distinguish a genuinely empty dump from
    /// a failed fetch. An empty VRP list without this flag aborts the run
    /// instead of closing every active interval.
    #[serde(default)]
    pub declared_empty: bool,
}

impl Observation {
    pub fn new(dump_time: DateTime<Utc>, vrps: Vec<Vrp>) -> Self {
        Self {
            dump_time,
            vrps,
            declared_empty: false,
        }
    }
}

/// Message kind of an event-stream feed entry.
///
/// Upstream encodes these as single characters; anything unrecognized is kept
/// verbatim so the engine can log it as an inconsistency instead of failing
/// at decode time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum VrpEventKind {
    State,
    Announce,
    Withdraw,
    Other(String),
}

impl From<String> for VrpEventKind {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "S" => Self::State,
            "A" => Self::Announce,
            "W" => Self::Withdraw,
            _ => Self::Other(raw),
        }
    }
}

impl From<VrpEventKind> for String {
    fn from(kind: VrpEventKind) -> Self {
        match kind {
            VrpEventKind::State => "S".to_string(),
            VrpEventKind::Announce => "A".to_string(),
            VrpEventKind::Withdraw => "W".to_string(),
            VrpEventKind::Other(raw) => raw,
        }
    }
}

/// One entry of an ordered event-stream dump.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VrpEvent {
    #[serde(rename = "type")]
    pub kind: VrpEventKind,
    #[serde(flatten)]
    pub vrp: Vrp,
    pub capture_ts: DateTime<Utc>,
}

/// What a feed hands to the reconciliation engine for one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum FeedPayload {
    Snapshot(Observation),
    Events { events: Vec<VrpEvent> },
}
