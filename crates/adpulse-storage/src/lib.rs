//! Row access for the hosted data store: REST client + in-memory fixture source.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::time::Duration;

use adpulse_core::RawRecord;
use anyhow::Context;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{debug, info_span, Instrument};
use uuid::Uuid;

pub const CRATE_NAME: &str = "adpulse-storage";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    fn as_str(self) -> &'static str {
        match self {
            SortDirection::Asc => "asc",
            SortDirection::Desc => "desc",
        }
    }
}

/// A `select=*` read of one table, optionally ordered by a single column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowQuery {
    pub table: String,
    pub order_by: Option<(String, SortDirection)>,
}

impl RowQuery {
    pub fn table(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            order_by: None,
        }
    }

    pub fn ordered(mut self, column: impl Into<String>, direction: SortDirection) -> Self {
        self.order_by = Some((column.into(), direction));
        self
    }

    /// Query string understood by the store's REST layer.
    pub fn query_string(&self) -> String {
        match &self.order_by {
            Some((column, direction)) => {
                format!("select=*&order={}.{}", column, direction.as_str())
            }
            None => "select=*".to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}: {body}")]
    HttpStatus {
        status: u16,
        url: String,
        body: String,
    },
    #[error("unexpected payload from table {table}: {message}")]
    Decode { table: String, message: String },
}

/// Anything that can hand back the raw rows of a table.
#[async_trait]
pub trait RowSource: Send + Sync {
    async fn fetch_rows(&self, load_id: Uuid, query: &RowQuery) -> Result<Vec<RawRecord>, FetchError>;

    async fn count_rows(&self, load_id: Uuid, table: &str) -> Result<usize, FetchError> {
        Ok(self.fetch_rows(load_id, &RowQuery::table(table)).await?.len())
    }
}

/// Turn a decoded JSON body into records, skipping anything that is not an object.
pub fn records_from_json(table: &str, body: JsonValue) -> Result<Vec<RawRecord>, FetchError> {
    match body {
        JsonValue::Array(items) => Ok(items
            .into_iter()
            .filter_map(|item| match item {
                JsonValue::Object(map) => Some(map.into_iter().collect::<RawRecord>()),
                _ => None,
            })
            .collect()),
        JsonValue::Null => Ok(Vec::new()),
        other => Err(FetchError::Decode {
            table: table.to_string(),
            message: format!("expected a JSON array, got {}", json_kind(&other)),
        }),
    }
}

fn json_kind(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "bool",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}

#[derive(Debug, Clone, Default)]
pub struct HttpClientConfig {
    /// `None` leaves requests unbounded.
    pub timeout: Option<Duration>,
    pub user_agent: Option<String>,
}

/// Connection details for one hosted store project.
#[derive(Clone)]
pub struct StoreEndpoint {
    pub base_url: String,
    pub api_key: String,
}

impl std::fmt::Debug for StoreEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreEndpoint")
            .field("base_url", &self.base_url)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

#[derive(Debug)]
pub struct StoreClient {
    client: reqwest::Client,
    endpoint: StoreEndpoint,
}

impl StoreClient {
    pub fn new(endpoint: StoreEndpoint, config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder().gzip(true).brotli(true);

        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        Ok(Self { client, endpoint })
    }

    pub fn table_url(&self, query: &RowQuery) -> String {
        format!(
            "{}/rest/v1/{}?{}",
            self.endpoint.base_url.trim_end_matches('/'),
            query.table,
            query.query_string()
        )
    }
}

#[async_trait]
impl RowSource for StoreClient {
    async fn fetch_rows(&self, load_id: Uuid, query: &RowQuery) -> Result<Vec<RawRecord>, FetchError> {
        let url = self.table_url(query);
        let span = info_span!("http_fetch", %load_id, table = %query.table);

        async {
            let resp = self
                .client
                .get(&url)
                .header("apikey", &self.endpoint.api_key)
                .bearer_auth(&self.endpoint.api_key)
                .header(reqwest::header::ACCEPT, "application/json")
                .send()
                .await?;

            let status = resp.status();
            if !status.is_success() {
                let body = resp.text().await.unwrap_or_default();
                return Err(FetchError::HttpStatus {
                    status: status.as_u16(),
                    url,
                    body,
                });
            }

            let body: JsonValue = resp.json().await?;
            let rows = records_from_json(&query.table, body)?;
            debug!(rows = rows.len(), "fetched rows");
            if let Some(first) = rows.first() {
                debug!(columns = ?first.keys().collect::<Vec<_>>(), "row columns");
            }
            Ok(rows)
        }
        .instrument(span)
        .await
    }
}

/// In-memory tables, used for fixture runs and tests. Counts every fetch.
#[derive(Debug, Default)]
pub struct StaticRowSource {
    tables: HashMap<String, Vec<RawRecord>>,
    unavailable: bool,
    calls: AtomicUsize,
}

impl StaticRowSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(mut self, table: impl Into<String>, rows: Vec<RawRecord>) -> Self {
        self.tables.insert(table.into(), rows);
        self
    }

    /// Every fetch fails with a 503, as if the store were down.
    pub fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Self::default()
        }
    }

    /// Load a JSON array of row objects from disk into `table`.
    pub async fn with_json_file(self, table: impl Into<String>, path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let table = table.into();
        let path = path.as_ref();
        let text = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        let body: JsonValue =
            serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
        let rows = records_from_json(&table, body)?;
        Ok(self.with_table(table, rows))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(AtomicOrdering::SeqCst)
    }
}

fn compare_cells(a: Option<&JsonValue>, b: Option<&JsonValue>) -> Ordering {
    match (a, b) {
        (Some(JsonValue::Number(x)), Some(JsonValue::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(JsonValue::String(x)), Some(JsonValue::String(y))) => x.cmp(y),
        (None | Some(JsonValue::Null), None | Some(JsonValue::Null)) => Ordering::Equal,
        // Nulls sort last ascending, as the store does.
        (None | Some(JsonValue::Null), _) => Ordering::Greater,
        (_, None | Some(JsonValue::Null)) => Ordering::Less,
        (Some(x), Some(y)) => x.to_string().cmp(&y.to_string()),
    }
}

#[async_trait]
impl RowSource for StaticRowSource {
    async fn fetch_rows(&self, _load_id: Uuid, query: &RowQuery) -> Result<Vec<RawRecord>, FetchError> {
        self.calls.fetch_add(1, AtomicOrdering::SeqCst);
        if self.unavailable {
            return Err(FetchError::HttpStatus {
                status: StatusCode::SERVICE_UNAVAILABLE.as_u16(),
                url: format!("memory://{}", query.table),
                body: String::new(),
            });
        }

        let Some(rows) = self.tables.get(&query.table) else {
            return Err(FetchError::HttpStatus {
                status: StatusCode::NOT_FOUND.as_u16(),
                url: format!("memory://{}", query.table),
                body: format!("relation \"{}\" does not exist", query.table),
            });
        };

        let mut rows = rows.clone();
        if let Some((column, direction)) = &query.order_by {
            rows.sort_by(|a, b| {
                let ord = compare_cells(a.get(column), b.get(column));
                match direction {
                    SortDirection::Asc => ord,
                    SortDirection::Desc => ord.reverse(),
                }
            });
        }
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(value: JsonValue) -> RawRecord {
        match value {
            JsonValue::Object(map) => map.into_iter().collect(),
            _ => panic!("fixture rows must be objects"),
        }
    }

    #[test]
    fn query_string_includes_order_clause() {
        let plain = RowQuery::table("facebook-ads");
        assert_eq!(plain.query_string(), "select=*");

        let ordered = RowQuery::table("facebook-ads").ordered("Data_inicio", SortDirection::Asc);
        assert_eq!(ordered.query_string(), "select=*&order=Data_inicio.asc");
    }

    #[test]
    fn table_url_joins_base_without_double_slash() {
        let client = StoreClient::new(
            StoreEndpoint {
                base_url: "https://example.supabase.co/".into(),
                api_key: "anon".into(),
            },
            HttpClientConfig::default(),
        )
        .unwrap();
        let url = client.table_url(&RowQuery::table("Gallant_dadosDiarios").ordered("data", SortDirection::Asc));
        assert_eq!(
            url,
            "https://example.supabase.co/rest/v1/Gallant_dadosDiarios?select=*&order=data.asc"
        );
    }

    #[test]
    fn endpoint_debug_hides_api_key() {
        let endpoint = StoreEndpoint {
            base_url: "https://example.supabase.co".into(),
            api_key: "secret-key".into(),
        };
        assert!(!format!("{endpoint:?}").contains("secret-key"));
    }

    #[test]
    fn records_from_json_skips_non_objects() {
        let rows = records_from_json("t", json!([{"a": 1}, 5, "x", {"b": "2"}])).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1]["b"], "2");

        assert!(records_from_json("t", JsonValue::Null).unwrap().is_empty());
        assert!(matches!(
            records_from_json("t", json!({"error": "nope"})),
            Err(FetchError::Decode { .. })
        ));
    }

    #[tokio::test]
    async fn static_source_orders_and_counts_calls() {
        let source = StaticRowSource::new().with_table(
            "insights",
            vec![
                row(json!({"created_at": "2024-01-01", "output": "old"})),
                row(json!({"created_at": "2024-03-01", "output": "new"})),
                row(json!({"output": "undated"})),
            ],
        );
        let rows = source
            .fetch_rows(
                Uuid::new_v4(),
                &RowQuery::table("insights").ordered("created_at", SortDirection::Desc),
            )
            .await
            .unwrap();
        assert_eq!(rows[0]["output"], "undated");
        assert_eq!(rows[1]["output"], "new");
        assert_eq!(rows[2]["output"], "old");

        assert_eq!(source.count_rows(Uuid::new_v4(), "insights").await.unwrap(), 3);
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test]
    async fn unavailable_source_reports_http_status() {
        let source = StaticRowSource::unavailable();
        let err = source
            .fetch_rows(Uuid::new_v4(), &RowQuery::table("facebook-ads"))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::HttpStatus { status: 503, .. }));
    }

    #[tokio::test]
    async fn missing_table_is_a_not_found() {
        let source = StaticRowSource::new();
        let err = source
            .fetch_rows(Uuid::new_v4(), &RowQuery::table("nope"))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::HttpStatus { status: 404, .. }));
    }
}
