use crate::vrp::FeedPayload;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::info;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FeedError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    JsonParseError(#[from] serde_json::Error),

    #[error("No payload available for timestamp {0}")]
    NotAvailable(DateTime<Utc>),
}

/// Collaborator interface of the upstream feed fetcher/decoder.
///
/// Scraping the upstream dump directories and decoding the wire formats
/// (CSV-in-tar, columnar event files) live behind this trait; the engine
/// only ever sees decoded [`FeedPayload`] values.
#[async_trait]
pub trait VrpFeed: Send + Sync {
    /// The newest available payload, or `None` when the source has nothing.
    async fn fetch_latest(&self) -> Result<Option<FeedPayload>, FeedError>;

    /// The payload whose dump timestamp equals `at`.
    async fn fetch_at(&self, at: DateTime<Utc>) -> Result<FeedPayload, FeedError>;
}

/// Feed reading one pre-decoded payload from a local JSON file.
///
/// Used by the `update` command for backfills and by tests; stands in for
/// the network fetchers, which dump their decoded output in the same shape.
pub struct JsonFileFeed {
    path: PathBuf,
}

impl JsonFileFeed {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    async fn load(&self) -> Result<FeedPayload, FeedError> {
        info!("Reading feed payload from {}", self.path.display());
        let raw = tokio::fs::read(&self.path).await?;
        Ok(serde_json::from_slice(&raw)?)
    }
}

#[async_trait]
impl VrpFeed for JsonFileFeed {
    async fn fetch_latest(&self) -> Result<Option<FeedPayload>, FeedError> {
        Ok(Some(self.load().await?))
    }

    async fn fetch_at(&self, at: DateTime<Utc>) -> Result<FeedPayload, FeedError> {
        let payload = self.load().await?;
        // A file holds exactly one dump; requesting any other snapshot
        // timestamp is a miss, not a silent substitution.
        if let FeedPayload::Snapshot(observation) = &payload {
            if observation.dump_time != at {
                return Err(FeedError::NotAvailable(at));
            }
        }
        Ok(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vrp::{Observation, Vrp};
    use chrono::TimeZone;

    #[tokio::test]
    async fn json_file_feed_round_trips_a_snapshot() {
        let dump_time = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let payload = FeedPayload::Snapshot(Observation::new(
            dump_time,
            vec![Vrp::new("10.0.0.0/24".parse().unwrap(), 65001, 24)],
        ));
        let path = std::env::temp_dir().join("rpki_history_feed_test.json");
        tokio::fs::write(&path, serde_json::to_vec(&payload).unwrap())
            .await
            .unwrap();

        let feed = JsonFileFeed::new(&path);
        let loaded = feed.fetch_latest().await.unwrap().unwrap();
        match loaded {
            FeedPayload::Snapshot(observation) => {
                assert_eq!(observation.dump_time, dump_time);
                assert_eq!(observation.vrps.len(), 1);
                assert!(!observation.declared_empty);
            }
            FeedPayload::Events { .. } => panic!("expected snapshot"),
        }

        let err = feed
            .fetch_at(Utc.timestamp_opt(0, 0).unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, FeedError::NotAvailable(_)));

        tokio::fs::remove_file(&path).await.unwrap();
    }
}
