pub mod monitoring;

use crate::query::{MetaJson, QueryError, VrpJson};
use crate::state::AppState;
use crate::validation::RpkiStatus;
use crate::vrp::TimeRange;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{routing::get, Json, Router};
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use ipnetwork::IpNetwork;
use log::error;
use prometheus_client::encoding::text::encode;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;

#[derive(Debug)]
pub enum ApiError {
    MissingParam(&'static str),
    InvalidParam {
        name: &'static str,
        message: String,
    },
    NotFound(String),
    Internal,
}

impl From<QueryError> for ApiError {
    fn from(err: QueryError) -> Self {
        match err {
            QueryError::NoData | QueryError::OutOfRange => Self::NotFound(err.to_string()),
            QueryError::StoreError(e) => {
                error!("Store failure while serving query: {}", e);
                Self::Internal
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, title, description) = match self {
            Self::MissingParam(name) => (
                StatusCode::BAD_REQUEST,
                "Missing parameter",
                format!("The {} parameter is required.", name),
            ),
            Self::InvalidParam { name, message } => (
                StatusCode::BAD_REQUEST,
                "Invalid parameter",
                format!("The {} parameter is invalid. {}", name, message),
            ),
            Self::NotFound(description) => (StatusCode::NOT_FOUND, "Not found", description),
            Self::Internal => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error",
                "Internal server error".to_string(),
            ),
        };
        (
            status,
            Json(json!({"title": title, "description": description})),
        )
            .into_response()
    }
}

/// Accepts `%Y-%m-%dT%H:%M:%S` (UTC assumed) or unix epoch seconds.
fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, ApiError> {
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S") {
        return Ok(Utc.from_utc_datetime(&naive));
    }
    raw.parse::<i64>()
        .ok()
        .and_then(|epoch| Utc.timestamp_opt(epoch, 0).single())
        .ok_or(ApiError::InvalidParam {
            name: "timestamp",
            message: "Timestamp has to be in epoch or %Y-%m-%dT%H:%M:%S format.".to_string(),
        })
}

fn parse_prefix(raw: &str) -> Result<IpNetwork, ApiError> {
    raw.parse().map_err(|e| ApiError::InvalidParam {
        name: "prefix",
        message: format!("{}", e),
    })
}

fn opt_timestamp(raw: &Option<String>) -> Result<Option<DateTime<Utc>>, ApiError> {
    raw.as_deref().map(parse_timestamp).transpose()
}

#[derive(Deserialize)]
struct VrpParams {
    prefix: Option<String>,
    timestamp: Option<String>,
    start: Option<String>,
    end: Option<String>,
}

/// Covering VRPs for a prefix, either at one point in time or over a range.
async fn vrp_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<VrpParams>,
) -> Result<Json<Vec<VrpJson>>, ApiError> {
    let prefix = parse_prefix(params.prefix.as_deref().ok_or(ApiError::MissingParam("prefix"))?)?;

    let has_range = params.start.is_some() || params.end.is_some();
    if params.timestamp.is_some() && has_range {
        return Err(ApiError::InvalidParam {
            name: "timestamp",
            message: "timestamp cannot be combined with start/end.".to_string(),
        });
    }

    let vrps = if has_range {
        let range = TimeRange::new(
            opt_timestamp(&params.start)?,
            opt_timestamp(&params.end)?,
        );
        state.query.vrps_in_range(&prefix, range).await?
    } else {
        state
            .query
            .vrps_at(&prefix, opt_timestamp(&params.timestamp)?)
            .await?
    };
    Ok(Json(vrps))
}

#[derive(Deserialize)]
struct StatusParams {
    prefix: Option<String>,
    asn: Option<String>,
    timestamp: Option<String>,
}

/// RFC 6811 status of a prefix/origin-ASN announcement.
async fn status_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<StatusParams>,
) -> Result<Json<RpkiStatus>, ApiError> {
    let prefix = parse_prefix(params.prefix.as_deref().ok_or(ApiError::MissingParam("prefix"))?)?;
    let asn: u32 = params
        .asn
        .as_deref()
        .ok_or(ApiError::MissingParam("asn"))?
        .parse()
        .map_err(|_| ApiError::InvalidParam {
            name: "asn",
            message: "ASN has to be an integer.".to_string(),
        })?;

    let status = state
        .query
        .status(&prefix, asn, opt_timestamp(&params.timestamp)?)
        .await?;
    Ok(Json(status))
}

#[derive(Deserialize)]
struct MetadataParams {
    start: Option<String>,
    end: Option<String>,
    page: Option<i64>,
}

#[derive(Serialize)]
struct MetadataResponse {
    next: String,
    results: Vec<MetaJson>,
}

/// Paginated ingestion metadata ordered by dump time.
async fn metadata_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<MetadataParams>,
) -> Result<Json<MetadataResponse>, ApiError> {
    let page = params.page.unwrap_or(0).max(0);
    let range = TimeRange::new(opt_timestamp(&params.start)?, opt_timestamp(&params.end)?);

    let result = state
        .query
        .metadata_page(range, state.page_size, page)
        .await?;

    let next = if result.has_next {
        let mut next = format!("/metadata?page={}", page + 1);
        if let Some(start) = &params.start {
            next.push_str(&format!("&start={}", start));
        }
        if let Some(end) = &params.end {
            next.push_str(&format!("&end={}", end));
        }
        next
    } else {
        String::new()
    };

    Ok(Json(MetadataResponse {
        next,
        results: result.results,
    }))
}

// Health endpoint handler
async fn health_handler() -> String {
    "Healthy".to_string()
}

async fn expose_metrics(state: State<Arc<AppState>>) -> String {
    let mut buffer = String::new();
    let registry = state.registry.read().await;
    encode(&mut buffer, &registry).unwrap();
    buffer
}

pub async fn setup_server(state: Arc<AppState>, addr: SocketAddr) -> tokio::task::JoinHandle<()> {
    let shutdown_token = state.shutdown_token.clone();
    let app = Router::new()
        .route("/vrp", get(vrp_handler))
        .route("/status", get(status_handler))
        .route("/metadata", get(metadata_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(expose_metrics))
        .with_state(state);

    let server_handle = tokio::spawn(async move {
        axum::Server::bind(&addr)
            .serve(app.into_make_service())
            .with_graceful_shutdown(async {
                shutdown_token.cancelled().await;
            })
            .await
            .unwrap();
    });

    server_handle
}
