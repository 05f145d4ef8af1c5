//! Source adapters: per-source column tables plus the normalization,
//! reconciliation and daily aggregation applied to raw store rows.

use std::cmp::Ordering;
use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::Path;

use adpulse_core::{
    cost_per_click, cpa, Campaign, CanonicalMetrics, DailyPoint, Insight, Platform, RawRecord,
};
use adpulse_storage::{FetchError, RowQuery, RowSource, SortDirection};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

pub const CRATE_NAME: &str = "adpulse-adapters";

/// Grouping bucket for rows whose date is empty or missing.
pub const UNKNOWN_DATE: &str = "unknown";

const UNKNOWN_CAMPAIGN: &str = "Unknown Campaign";
const UNLABELED_ROW: &str = "Unknown";
const DEFAULT_STATUS: &str = "active";

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("invalid field table: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

/// Normalized name for a concept that upstream tables spell in several ways.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CanonicalField {
    RawId,
    Name,
    Status,
    /// Date used to pick the most recent row per campaign.
    Recency,
    StartDate,
    EndDate,
    /// Date used to bucket rows into daily points.
    Date,
    Impressions,
    Clicks,
    Spend,
    Leads,
    Conversions,
    Content,
    CreatedAt,
}

/// Ordered candidate column names per canonical field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldTable {
    candidates: BTreeMap<CanonicalField, Vec<String>>,
}

impl FieldTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, field: CanonicalField, keys: &[&str]) -> Self {
        self.candidates
            .insert(field, keys.iter().map(|k| (*k).to_string()).collect());
        self
    }

    pub fn keys(&self, field: CanonicalField) -> &[String] {
        self.candidates.get(&field).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Replace the candidates of every field named in `overrides`.
    pub fn apply_overrides(&mut self, overrides: &BTreeMap<CanonicalField, Vec<String>>) {
        for (field, keys) in overrides {
            self.candidates.insert(*field, keys.clone());
        }
    }
}

/// On-disk overrides for the built-in field tables.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FieldTablesFile {
    #[serde(default)]
    pub google_ads: BTreeMap<CanonicalField, Vec<String>>,
    #[serde(default)]
    pub meta_ads: BTreeMap<CanonicalField, Vec<String>>,
    #[serde(default)]
    pub insights: BTreeMap<CanonicalField, Vec<String>>,
}

impl FieldTablesFile {
    pub fn for_platform(&self, platform: Platform) -> &BTreeMap<CanonicalField, Vec<String>> {
        match platform {
            Platform::GoogleAds => &self.google_ads,
            Platform::FacebookAds => &self.meta_ads,
        }
    }
}

pub fn parse_field_tables(text: &str) -> Result<FieldTablesFile, AdapterError> {
    Ok(serde_yaml::from_str(text)?)
}

pub fn load_field_tables(path: impl AsRef<Path>) -> Result<FieldTablesFile, AdapterError> {
    use anyhow::Context;

    let path = path.as_ref();
    let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    parse_field_tables(&text)
}

fn is_present(value: &JsonValue) -> bool {
    match value {
        JsonValue::Null => false,
        JsonValue::String(s) => !s.is_empty(),
        _ => true,
    }
}

/// First candidate whose value is not null.
pub fn resolve_value<'a>(row: &'a RawRecord, keys: &[String]) -> Option<&'a JsonValue> {
    keys.iter()
        .filter_map(|key| row.get(key))
        .find(|value| !value.is_null())
}

/// First candidate whose value is neither null nor an empty string.
pub fn resolve_present<'a>(row: &'a RawRecord, keys: &[String]) -> Option<&'a JsonValue> {
    keys.iter()
        .filter_map(|key| row.get(key))
        .find(|value| is_present(value))
}

/// Numeric value of the first non-null candidate; 0 when absent or unparsable.
///
/// Only the first non-null candidate is considered: if it does not parse,
/// the result is 0 even when a later candidate would have.
pub fn resolve_field(row: &RawRecord, keys: &[String]) -> f64 {
    resolve_value(row, keys).and_then(coerce_number).unwrap_or(0.0)
}

pub fn resolve_text(row: &RawRecord, keys: &[String]) -> Option<String> {
    resolve_present(row, keys).map(stringify)
}

fn stringify(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}

pub fn coerce_number(value: &JsonValue) -> Option<f64> {
    match value {
        JsonValue::Number(n) => n.as_f64(),
        JsonValue::String(s) => parse_number(s),
        _ => None,
    }
}

/// Parse the longest leading decimal number, ignoring leading whitespace and
/// any trailing text ("12.5 BRL" -> 12.5). Returns `None` when no digits lead.
pub fn parse_number(text: &str) -> Option<f64> {
    let s = text.trim_start();
    let bytes = s.as_bytes();
    let mut end = 0;
    if matches!(bytes.first(), Some(b'+' | b'-')) {
        end = 1;
    }

    let mut saw_digit = false;
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
        saw_digit = true;
    }
    if end < bytes.len() && bytes[end] == b'.' {
        let mut j = end + 1;
        while j < bytes.len() && bytes[j].is_ascii_digit() {
            j += 1;
            saw_digit = true;
        }
        if saw_digit {
            end = j;
        }
    }
    if !saw_digit {
        return None;
    }

    if end < bytes.len() && matches!(bytes[end], b'e' | b'E') {
        let mut j = end + 1;
        if j < bytes.len() && matches!(bytes[j], b'+' | b'-') {
            j += 1;
        }
        let exp_start = j;
        while j < bytes.len() && bytes[j].is_ascii_digit() {
            j += 1;
        }
        if j > exp_start {
            end = j;
        }
    }

    s[..end].parse::<f64>().ok()
}

fn has_iso_prefix(s: &str) -> bool {
    let b = s.as_bytes();
    b.len() >= 10
        && b[..4].iter().all(u8::is_ascii_digit)
        && b[4] == b'-'
        && b[5..7].iter().all(u8::is_ascii_digit)
        && b[7] == b'-'
        && b[8..10].iter().all(u8::is_ascii_digit)
}

fn is_day_month_year(s: &str) -> bool {
    let b = s.as_bytes();
    b.len() == 10
        && b[..2].iter().all(u8::is_ascii_digit)
        && b[2] == b'/'
        && b[3..5].iter().all(u8::is_ascii_digit)
        && b[5] == b'/'
        && b[6..].iter().all(u8::is_ascii_digit)
}

const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%d-%m-%Y",
    "%d.%m.%Y",
    "%B %d, %Y",
    "%b %d, %Y",
    "%d %B %Y",
    "%d %b %Y",
];
const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
    "%Y/%m/%d %H:%M:%S",
    "%Y/%m/%d %H:%M",
];

fn parse_loose_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc).date_naive());
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(s) {
        return Some(dt.with_timezone(&Utc).date_naive());
    }
    DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok().map(|dt| dt.date()))
        .or_else(|| {
            DATE_FORMATS
                .iter()
                .find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
        })
}

/// Canonical `YYYY-MM-DD` grouping key for a date value of unknown shape.
///
/// ISO prefixes are truncated without validation, `DD/MM/YYYY` is reordered,
/// other shapes go through a lenient parse, numbers are read as epoch
/// milliseconds. Anything left over is returned as-is so it still groups;
/// empty or missing values land in [`UNKNOWN_DATE`].
pub fn normalize_date(value: Option<&JsonValue>) -> String {
    let Some(value) = value.filter(|v| is_present(v)) else {
        return UNKNOWN_DATE.to_string();
    };

    match value {
        JsonValue::String(s) => strict_date_key(s)
            .or_else(|| parse_loose_date(s).map(|date| date.format("%Y-%m-%d").to_string()))
            .unwrap_or_else(|| s.clone()),
        JsonValue::Number(n) => n
            .as_f64()
            .and_then(|ms| DateTime::from_timestamp_millis(ms as i64))
            .map(|dt| dt.date_naive().format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| n.to_string()),
        other => other.to_string(),
    }
}

/// Date key for the two shapes the dashboard filters accept (ISO or
/// `DD/MM/YYYY`); `None` for anything else.
pub fn strict_date_key(s: &str) -> Option<String> {
    if has_iso_prefix(s) {
        Some(s[..10].to_string())
    } else if is_day_month_year(s) {
        Some(format!("{}-{}-{}", &s[6..10], &s[3..5], &s[..2]))
    } else {
        None
    }
}

/// The date behind a canonical zero-padded `YYYY-MM-DD` key.
fn calendar_key(key: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(key, "%Y-%m-%d")
        .ok()
        .filter(|date| date.format("%Y-%m-%d").to_string() == key)
}

/// Calendar order for ISO keys; non-date buckets follow, compared as strings.
pub fn compare_date_keys(a: &str, b: &str) -> Ordering {
    match (calendar_key(a), calendar_key(b)) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.cmp(b),
    }
}

/// Where one upstream platform keeps its rows and how its columns are named.
#[derive(Debug, Clone)]
pub struct SourceAdapter {
    platform: Platform,
    table: String,
    date_column: String,
    insights_table: Option<String>,
    /// Recency assumed for rows with no recency column at all.
    recency_default: Option<NaiveDate>,
    fields: FieldTable,
    /// Columns read when listing single dated rows without reconciliation.
    row_fields: FieldTable,
    insight_fields: FieldTable,
}

impl SourceAdapter {
    pub fn platform(&self) -> Platform {
        self.platform
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn fields(&self) -> &FieldTable {
        &self.fields
    }

    pub fn insights_table(&self) -> Option<&str> {
        self.insights_table.as_deref()
    }

    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    pub fn with_insights_table(mut self, table: Option<String>) -> Self {
        self.insights_table = table;
        self
    }

    pub fn with_overrides(mut self, tables: &FieldTablesFile) -> Self {
        self.fields.apply_overrides(tables.for_platform(self.platform));
        self.row_fields.apply_overrides(tables.for_platform(self.platform));
        self.insight_fields.apply_overrides(&tables.insights);
        self
    }

    /// All rows of the source table, ordered by its primary date column.
    pub fn rows_query(&self) -> RowQuery {
        RowQuery::table(&self.table).ordered(&self.date_column, SortDirection::Asc)
    }

    pub fn insights_query(&self) -> Option<RowQuery> {
        self.insights_table
            .as_ref()
            .map(|table| RowQuery::table(table).ordered("created_at", SortDirection::Desc))
    }

    pub async fn fetch_rows(
        &self,
        source: &dyn RowSource,
        load_id: Uuid,
    ) -> Result<Vec<RawRecord>, FetchError> {
        let rows = source.fetch_rows(load_id, &self.rows_query()).await?;
        debug!(platform = %self.platform, rows = rows.len(), "source rows");
        Ok(rows)
    }

    pub async fn fetch_insights(
        &self,
        source: &dyn RowSource,
        load_id: Uuid,
    ) -> Result<Vec<Insight>, FetchError> {
        let Some(query) = self.insights_query() else {
            return Ok(Vec::new());
        };
        let rows = source.fetch_rows(load_id, &query).await?;
        Ok(self.parse_insights(&rows))
    }

    fn campaign_name(&self, row: &RawRecord) -> String {
        resolve_text(row, self.fields.keys(CanonicalField::Name))
            .unwrap_or_else(|| UNKNOWN_CAMPAIGN.to_string())
    }

    /// `None` when the recency value is not a calendar date; such rows never
    /// replace, and are never replaced by, another row.
    fn recency(&self, row: &RawRecord) -> Option<NaiveDate> {
        match resolve_present(row, self.fields.keys(CanonicalField::Recency)) {
            Some(value) => calendar_key(&normalize_date(Some(value))),
            None => self.recency_default,
        }
    }

    fn metrics(&self, row: &RawRecord) -> CanonicalMetrics {
        metrics_from(&self.fields, row)
    }

    fn campaign_from_row(&self, row: &RawRecord) -> Campaign {
        let name = self.campaign_name(row);
        let raw_id = resolve_text(row, self.fields.keys(CanonicalField::RawId)).unwrap_or_else(|| name.clone());
        let metrics = self.metrics(row);
        Campaign {
            id: format!("{}-{}", self.platform.id_prefix(), raw_id),
            status: resolve_text(row, self.fields.keys(CanonicalField::Status))
                .unwrap_or_else(|| DEFAULT_STATUS.to_string()),
            start_date: resolve_text(row, self.fields.keys(CanonicalField::StartDate)),
            end_date: resolve_text(row, self.fields.keys(CanonicalField::EndDate)),
            platform: self.platform,
            cost_per_click: cost_per_click(metrics.spend, metrics.clicks),
            cpa: cpa(metrics.spend, metrics.leads),
            metrics,
            name,
        }
    }

    /// One campaign per distinct name, built from that name's most recent row.
    /// Ties keep the first row seen; output follows first appearance.
    pub fn reconcile_campaigns(&self, rows: &[RawRecord]) -> Vec<Campaign> {
        let mut index: HashMap<String, usize> = HashMap::new();
        let mut kept: Vec<&RawRecord> = Vec::new();

        for row in rows {
            match index.entry(self.campaign_name(row)) {
                Entry::Vacant(slot) => {
                    slot.insert(kept.len());
                    kept.push(row);
                }
                Entry::Occupied(slot) => {
                    let current = &mut kept[*slot.get()];
                    if let (Some(candidate), Some(existing)) = (self.recency(row), self.recency(current)) {
                        if candidate > existing {
                            *current = row;
                        }
                    }
                }
            }
        }

        kept.into_iter().map(|row| self.campaign_from_row(row)).collect()
    }

    /// Sum every row into one point per normalized date, in calendar order.
    pub fn aggregate_daily(&self, rows: &[RawRecord]) -> Vec<DailyPoint> {
        let mut by_date: HashMap<String, DailyPoint> = HashMap::new();

        for row in rows {
            let date = normalize_date(resolve_present(row, self.fields.keys(CanonicalField::Date)));
            let metrics = self.metrics(row);
            let point = by_date
                .entry(date)
                .or_insert_with_key(|date| DailyPoint::zeroed(date.clone()));
            point.clicks += metrics.clicks;
            point.leads += metrics.leads;
            point.impressions += metrics.impressions;
            point.conversions += metrics.conversions;
            point.spend += metrics.spend;
        }

        let mut points = by_date.into_values().collect::<Vec<_>>();
        points.sort_by(|a, b| compare_date_keys(&a.date, &b.date));
        points
    }

    /// Every row dated `date`, one campaign per row. Rows are not reconciled,
    /// so a campaign appears once per matching row.
    pub fn campaigns_on_date(&self, rows: &[RawRecord], date: &str) -> Vec<Campaign> {
        let wanted = strict_date_key(date).unwrap_or_else(|| date.to_string());
        let keys = |field: CanonicalField| self.row_fields.keys(field);

        rows.iter()
            .filter(|row| normalize_date(resolve_present(row, keys(CanonicalField::Date))) == wanted)
            .map(|row| {
                let name = resolve_text(row, keys(CanonicalField::Name))
                    .unwrap_or_else(|| UNLABELED_ROW.to_string());
                let slug = name.split_whitespace().collect::<Vec<_>>().join("-");
                let metrics = metrics_from(&self.row_fields, row);
                Campaign {
                    id: format!("{}-{}-{}", self.platform.id_prefix(), wanted, slug),
                    status: resolve_text(row, keys(CanonicalField::Status))
                        .unwrap_or_else(|| DEFAULT_STATUS.to_string()),
                    start_date: Some(wanted.clone()),
                    end_date: resolve_text(row, keys(CanonicalField::EndDate)),
                    platform: self.platform,
                    cost_per_click: cost_per_click(metrics.spend, metrics.clicks),
                    cpa: cpa(metrics.spend, metrics.leads),
                    metrics,
                    name,
                }
            })
            .collect()
    }

    /// Distinct ISO dates present in the rows, ascending. Other shapes are skipped.
    pub fn available_dates(&self, rows: &[RawRecord]) -> Vec<String> {
        rows.iter()
            .filter_map(|row| match resolve_present(row, self.fields.keys(CanonicalField::Date)) {
                Some(JsonValue::String(s)) if has_iso_prefix(s) => Some(s[..10].to_string()),
                _ => None,
            })
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn parse_insights(&self, rows: &[RawRecord]) -> Vec<Insight> {
        let keys = |field: CanonicalField| self.insight_fields.keys(field);
        rows.iter()
            .map(|row| Insight {
                id: resolve_text(row, keys(CanonicalField::RawId)),
                content: resolve_text(row, keys(CanonicalField::Content)).unwrap_or_default(),
                created_at: resolve_text(row, keys(CanonicalField::CreatedAt)),
                campaign: resolve_text(row, keys(CanonicalField::Name)),
                platform: self.platform,
            })
            .collect()
    }
}

fn metrics_from(fields: &FieldTable, row: &RawRecord) -> CanonicalMetrics {
    let f = |field: CanonicalField| resolve_field(row, fields.keys(field));
    CanonicalMetrics {
        impressions: f(CanonicalField::Impressions),
        clicks: f(CanonicalField::Clicks),
        spend: f(CanonicalField::Spend),
        leads: f(CanonicalField::Leads),
        conversions: f(CanonicalField::Conversions),
    }
}

fn insight_fields() -> FieldTable {
    FieldTable::new()
        .with(CanonicalField::RawId, &["id"])
        .with(CanonicalField::Content, &["output", "conteudo", "insight", "content"])
        .with(CanonicalField::CreatedAt, &["created_at", "data_criacao", "date"])
        .with(CanonicalField::Name, &["campanha", "Campanha", "campaign", "Campaign"])
}

pub fn google_ads_adapter() -> SourceAdapter {
    let fields = google_fields();
    SourceAdapter {
        platform: Platform::GoogleAds,
        table: "Gallant_dadosDiarios".to_string(),
        date_column: "data".to_string(),
        insights_table: Some("Gallant_insights".to_string()),
        recency_default: NaiveDate::from_ymd_opt(1970, 1, 1),
        row_fields: fields.clone(),
        fields,
        insight_fields: insight_fields(),
    }
}

fn google_fields() -> FieldTable {
    FieldTable::new()
        .with(CanonicalField::RawId, &["id"])
        .with(CanonicalField::Name, &["campanha", "Campanha", "campaign", "Campaign"])
        .with(CanonicalField::Status, &["status"])
        .with(
            CanonicalField::Recency,
            &["data_final", "data_inicio", "Data_final", "Data_inicio", "date", "data"],
        )
        .with(CanonicalField::StartDate, &["data", "data_inicio", "Data_inicio", "date"])
        .with(CanonicalField::EndDate, &["data", "data_final", "Data_final"])
        .with(CanonicalField::Date, &["data", "Date", "date"])
        .with(
            CanonicalField::Impressions,
            &["impressoes", "Impressoes", "impressions", "Impressions"],
        )
        .with(CanonicalField::Clicks, &["cliques", "Cliques", "clicks", "Clicks"])
        .with(
            CanonicalField::Spend,
            &[
                "custo",
                "Custo",
                "gasto",
                "Gasto",
                "valor_investido",
                "Valor_investido",
                "spend",
                "valor",
            ],
        )
        .with(CanonicalField::Leads, &["conversoes", "Conversoes", "leads", "Leads"])
        .with(
            CanonicalField::Conversions,
            &["conversoes", "Conversoes", "conversions", "Conversions", "leads"],
        )
}

pub fn meta_ads_adapter() -> SourceAdapter {
    SourceAdapter {
        platform: Platform::FacebookAds,
        table: "facebook-ads".to_string(),
        date_column: "Data_inicio".to_string(),
        insights_table: None,
        recency_default: None,
        fields: meta_fields(),
        row_fields: meta_row_fields(),
        insight_fields: insight_fields(),
    }
}

fn meta_fields() -> FieldTable {
    FieldTable::new()
        .with(CanonicalField::RawId, &["id"])
        .with(CanonicalField::Name, &["Campanha", "campanha", "campaign", "Campaign"])
        .with(CanonicalField::Status, &["status", "Status"])
        .with(CanonicalField::Recency, &["Data_final", "Data_inicio"])
        .with(CanonicalField::StartDate, &["Data_inicio", "data_inicio"])
        .with(CanonicalField::EndDate, &["Data_final", "data_final"])
        .with(CanonicalField::Date, &["Data_inicio", "data_inicio", "date", "Date"])
        .with(CanonicalField::Impressions, &["Impressoes", "impressoes", "impressions"])
        .with(CanonicalField::Clicks, &["Cliques", "cliques", "clicks"])
        .with(
            CanonicalField::Spend,
            &["Valor investido", "valor_investido", "spend", "investimento", "gasto"],
        )
        .with(CanonicalField::Leads, &["leads", "Leads"])
        .with(
            CanonicalField::Conversions,
            &["conversoes", "Conversoes", "conversions", "leads", "Leads"],
        )
}

/// Per-row listing reads the export's alternate headers first and does not
/// mirror leads into conversions.
fn meta_row_fields() -> FieldTable {
    meta_fields()
        .with(
            CanonicalField::Name,
            &["Nome_da_Campanha", "nome_da_campanha", "name", "Campanha", "campanha"],
        )
        .with(
            CanonicalField::Spend,
            &["Gasto", "gasto", "investimento", "Valor investido", "valor_investido"],
        )
        .with(CanonicalField::Impressions, &["Impressoes", "impressoes"])
        .with(CanonicalField::Clicks, &["Cliques", "cliques"])
        .with(CanonicalField::Leads, &["Leads", "leads"])
        .with(CanonicalField::Conversions, &["Conversoes", "conversoes"])
}

pub fn adapter_for_platform(platform: Platform) -> SourceAdapter {
    match platform {
        Platform::GoogleAds => google_ads_adapter(),
        Platform::FacebookAds => meta_ads_adapter(),
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

    fn keys(names: &[&str]) -> Vec<String> {
        names.iter().map(|k| k.to_string()).collect()
    }

    #[test]
    fn resolve_field_follows_candidate_order() {
        let candidates = keys(&["k1", "k2", "k3"]);
        assert_eq!(resolve_field(&row(json!({"k1": "1", "k2": "2", "k3": "3"})), &candidates), 1.0);
        assert_eq!(resolve_field(&row(json!({"k2": "2", "k3": "3"})), &candidates), 2.0);
        assert_eq!(resolve_field(&row(json!({"k3": 3})), &candidates), 3.0);
        assert_eq!(resolve_field(&row(json!({"other": 9})), &candidates), 0.0);
    }

    #[test]
    fn resolve_field_skips_nulls_but_not_garbage() {
        let candidates = keys(&["custo", "spend"]);
        assert_eq!(resolve_field(&row(json!({"custo": null, "spend": "7.5"})), &candidates), 7.5);
        assert_eq!(resolve_field(&row(json!({"custo": "n/a", "spend": "7.5"})), &candidates), 0.0);
        assert_eq!(resolve_field(&row(json!({"custo": true})), &candidates), 0.0);
        assert_eq!(resolve_field(&row(json!({"custo": [1, 2]})), &candidates), 0.0);
    }

    #[test]
    fn negative_values_pass_through() {
        let candidates = keys(&["clicks"]);
        assert_eq!(resolve_field(&row(json!({"clicks": "-4"})), &candidates), -4.0);
    }

    #[test]
    fn parse_number_reads_leading_decimal() {
        assert_eq!(parse_number("42"), Some(42.0));
        assert_eq!(parse_number("  12.5 BRL"), Some(12.5));
        assert_eq!(parse_number("1,234"), Some(1.0));
        assert_eq!(parse_number(".5"), Some(0.5));
        assert_eq!(parse_number("5."), Some(5.0));
        assert_eq!(parse_number("-3e2x"), Some(-300.0));
        assert_eq!(parse_number("7e"), Some(7.0));
        assert_eq!(parse_number("."), None);
        assert_eq!(parse_number("abc"), None);
        assert_eq!(parse_number(""), None);
    }

    #[test]
    fn iso_dates_truncate_to_ten_characters() {
        assert_eq!(normalize_date(Some(&json!("2024-03-01"))), "2024-03-01");
        assert_eq!(normalize_date(Some(&json!("2024-03-01T23:59:59"))), "2024-03-01");
        assert_eq!(normalize_date(Some(&json!("2024-03-01T23:59:59-03:00"))), "2024-03-01");
    }

    #[test]
    fn day_month_year_is_reordered() {
        assert_eq!(normalize_date(Some(&json!("02/03/2024"))), "2024-03-02");
        assert_eq!(normalize_date(Some(&json!("31/12/2023"))), "2023-12-31");
    }

    #[test]
    fn strict_keys_ignore_loose_shapes() {
        assert_eq!(strict_date_key("2024-03-01T10:00:00").as_deref(), Some("2024-03-01"));
        assert_eq!(strict_date_key("01/03/2024").as_deref(), Some("2024-03-01"));
        assert_eq!(strict_date_key("2024/03/01"), None);
        assert_eq!(strict_date_key("1/3/2024"), None);
    }

    #[test]
    fn other_shapes_use_lenient_parsing() {
        assert_eq!(normalize_date(Some(&json!("2024/03/05"))), "2024-03-05");
        assert_eq!(normalize_date(Some(&json!("Tue, 5 Mar 2024 10:00:00 +0000"))), "2024-03-05");
        assert_eq!(normalize_date(Some(&json!("March 5, 2024"))), "2024-03-05");
        assert_eq!(normalize_date(Some(&json!(1_709_596_800_000_i64))), "2024-03-05");
    }

    #[test]
    fn malformed_and_missing_dates_still_group() {
        assert_eq!(normalize_date(Some(&json!("ontem"))), "ontem");
        assert_eq!(normalize_date(Some(&json!(""))), UNKNOWN_DATE);
        assert_eq!(normalize_date(Some(&JsonValue::Null)), UNKNOWN_DATE);
        assert_eq!(normalize_date(None), UNKNOWN_DATE);
        assert_eq!(normalize_date(Some(&json!(true))), "true");
    }

    #[test]
    fn unpadded_dates_share_the_padded_bucket() {
        assert_eq!(normalize_date(Some(&json!("2024-3-1"))), "2024-03-01");
        assert_eq!(normalize_date(Some(&json!("2024-3-1T08:30:00"))), "2024-03-01");

        let adapter = google_ads_adapter();
        let daily = adapter.aggregate_daily(&[
            row(json!({"data": "2024-03-01", "cliques": 5})),
            row(json!({"data": "2024-3-1", "cliques": 3})),
        ]);
        assert_eq!(daily.len(), 1);
        assert_eq!(daily[0].date, "2024-03-01");
        assert_eq!(daily[0].clicks, 8.0);
    }

    #[test]
    fn only_zero_padded_keys_sort_as_calendar_dates() {
        let mut keys = vec!["2024-3-1", "2024-03-02", "2024-02-29"];
        keys.sort_by(|a, b| compare_date_keys(a, b));
        assert_eq!(keys, vec!["2024-02-29", "2024-03-02", "2024-3-1"]);
    }

    #[test]
    fn date_keys_sort_calendar_first_then_strings() {
        let mut keys = vec!["unknown", "2024-03-10", "ontem", "2024-02-29"];
        keys.sort_by(|a, b| compare_date_keys(a, b));
        assert_eq!(keys, vec!["2024-02-29", "2024-03-10", "ontem", "unknown"]);
    }

    #[test]
    fn latest_row_wins_per_campaign_name() {
        let adapter = meta_ads_adapter();
        let rows = vec![
            row(json!({"id": 1, "Campanha": "A", "Data_final": "2024-03-01", "Cliques": "10", "Valor investido": "20", "leads": "2"})),
            row(json!({"id": 2, "Campanha": "A", "Data_final": "2024-03-05", "Cliques": "4", "Valor investido": "100", "leads": "0"})),
        ];
        let campaigns = adapter.reconcile_campaigns(&rows);
        assert_eq!(campaigns.len(), 1);
        let a = &campaigns[0];
        assert_eq!(a.id, "meta-2");
        assert_eq!(a.metrics.clicks, 4.0);
        assert_eq!(a.metrics.spend, 100.0);
        assert_eq!(a.cost_per_click, 25.0);
        assert_eq!(a.cpa, 0.0);
        assert_eq!(a.platform, Platform::FacebookAds);

        let mut reversed = rows.clone();
        reversed.reverse();
        assert_eq!(adapter.reconcile_campaigns(&reversed)[0].id, "meta-2");
    }

    #[test]
    fn recency_ties_keep_first_seen_row() {
        let adapter = google_ads_adapter();
        let rows = vec![
            row(json!({"id": "x", "campanha": "A", "cliques": 1})),
            row(json!({"id": "y", "campanha": "A", "cliques": 2})),
        ];
        let campaigns = adapter.reconcile_campaigns(&rows);
        assert_eq!(campaigns.len(), 1);
        assert_eq!(campaigns[0].id, "google-x");
    }

    #[test]
    fn unparsable_recency_never_replaces() {
        let adapter = meta_ads_adapter();
        let rows = vec![
            row(json!({"id": 1, "Campanha": "A", "Data_final": "sem data"})),
            row(json!({"id": 2, "Campanha": "A", "Data_final": "2024-03-05"})),
        ];
        assert_eq!(adapter.reconcile_campaigns(&rows)[0].id, "meta-1");
    }

    #[test]
    fn undated_meta_row_is_never_replaced() {
        let adapter = meta_ads_adapter();
        let rows = vec![
            row(json!({"id": 1, "Campanha": "A"})),
            row(json!({"id": 2, "Campanha": "A", "Data_final": "2024-03-05"})),
        ];
        assert_eq!(adapter.reconcile_campaigns(&rows)[0].id, "meta-1");
    }

    #[test]
    fn undated_google_row_counts_as_epoch() {
        let adapter = google_ads_adapter();
        let rows = vec![
            row(json!({"id": 1, "campanha": "A"})),
            row(json!({"id": 2, "campanha": "A", "data": "2024-03-05"})),
        ];
        assert_eq!(adapter.reconcile_campaigns(&rows)[0].id, "google-2");
    }

    #[test]
    fn rows_on_date_are_listed_without_reconciling() {
        let adapter = meta_ads_adapter();
        let rows = vec![
            row(json!({"Campanha": "Leads Verão", "Data_inicio": "2024-03-01", "Cliques": "10", "Valor investido": "20", "leads": "4"})),
            row(json!({"Nome_da_Campanha": "Leads  Verão", "Data_inicio": "01/03/2024", "Cliques": "5", "Gasto": "7"})),
            row(json!({"Campanha": "Leads Verão", "Data_inicio": "2024-03-02", "Cliques": "1"})),
            row(json!({"Data_inicio": "2024-03-01", "Conversoes": "2"})),
        ];

        let listed = adapter.campaigns_on_date(&rows, "2024-03-01");
        assert_eq!(listed.len(), 3);
        assert_eq!(listed[0].id, "meta-2024-03-01-Leads-Verão");
        assert_eq!(listed[0].cost_per_click, 2.0);
        assert_eq!(listed[0].cpa, 5.0);
        assert_eq!(listed[0].metrics.conversions, 0.0);
        assert_eq!(listed[1].id, "meta-2024-03-01-Leads-Verão");
        assert_eq!(listed[1].metrics.spend, 7.0);
        assert_eq!(listed[2].name, "Unknown");
        assert_eq!(listed[2].metrics.conversions, 2.0);
        assert!(listed.iter().all(|c| c.start_date.as_deref() == Some("2024-03-01")));

        assert_eq!(adapter.campaigns_on_date(&rows, "01/03/2024").len(), 3);
        assert!(adapter.campaigns_on_date(&rows, "2024-04-01").is_empty());
    }

    #[test]
    fn campaign_defaults_when_columns_are_missing() {
        let adapter = google_ads_adapter();
        let campaigns = adapter.reconcile_campaigns(&[row(json!({"cliques": "3"}))]);
        let c = &campaigns[0];
        assert_eq!(c.name, "Unknown Campaign");
        assert_eq!(c.id, "google-Unknown Campaign");
        assert_eq!(c.status, "active");
        assert_eq!(c.start_date, None);
        assert_eq!(c.metrics.clicks, 3.0);
        assert_eq!(c.metrics.spend, 0.0);
    }

    #[test]
    fn daily_rows_sum_per_date_in_order() {
        let adapter = google_ads_adapter();
        let rows = vec![
            row(json!({"date": "2024-01-01", "clicks": "5"})),
            row(json!({"date": "2024-01-02", "clicks": "2"})),
            row(json!({"date": "2024-01-01", "clicks": "3"})),
        ];
        let daily = adapter.aggregate_daily(&rows);
        assert_eq!(daily.len(), 2);
        assert_eq!(daily[0].date, "2024-01-01");
        assert_eq!(daily[0].clicks, 8.0);
        assert_eq!(daily[1].date, "2024-01-02");
        assert_eq!(daily[1].clicks, 2.0);
        assert!(daily.iter().all(|p| p.source.is_none()));
    }

    #[test]
    fn daily_rows_without_date_share_unknown_bucket() {
        let adapter = meta_ads_adapter();
        let rows = vec![
            row(json!({"Cliques": "1"})),
            row(json!({"Data_inicio": "", "Cliques": "2"})),
            row(json!({"Data_inicio": "2024-01-01", "Cliques": "4"})),
        ];
        let daily = adapter.aggregate_daily(&rows);
        assert_eq!(daily.len(), 2);
        assert_eq!(daily[1].date, UNKNOWN_DATE);
        assert_eq!(daily[1].clicks, 3.0);
    }

    #[test]
    fn meta_conversions_mirror_leads() {
        let adapter = meta_ads_adapter();
        let daily = adapter.aggregate_daily(&[row(json!({"Data_inicio": "2024-01-01", "leads": "6"}))]);
        assert_eq!(daily[0].leads, 6.0);
        assert_eq!(daily[0].conversions, 6.0);
    }

    #[test]
    fn available_dates_keep_only_iso_values() {
        let adapter = google_ads_adapter();
        let rows = vec![
            row(json!({"data": "2024-03-02T10:00:00"})),
            row(json!({"data": "2024-03-01"})),
            row(json!({"data": "02/03/2024"})),
            row(json!({"data": "2024-03-01"})),
            row(json!({})),
        ];
        assert_eq!(adapter.available_dates(&rows), vec!["2024-03-01", "2024-03-02"]);
    }

    #[test]
    fn insights_resolve_content_from_any_known_column() {
        let adapter = google_ads_adapter();
        let insights = adapter.parse_insights(&[
            row(json!({"id": 1, "conteudo": "texto", "created_at": "2024-01-01", "Campanha": "A"})),
            row(json!({"id": 2})),
        ]);
        assert_eq!(insights[0].content, "texto");
        assert_eq!(insights[0].id.as_deref(), Some("1"));
        assert_eq!(insights[0].campaign.as_deref(), Some("A"));
        assert_eq!(insights[1].content, "");
        assert_eq!(insights[1].created_at, None);
    }

    #[test]
    fn yaml_overrides_replace_candidate_lists() {
        let tables = parse_field_tables(
            "google_ads:\n  spend: [Cost]\ninsights:\n  content: [texto]\n",
        )
        .unwrap();
        let adapter = google_ads_adapter().with_overrides(&tables);
        assert_eq!(adapter.fields().keys(CanonicalField::Spend), ["Cost".to_string()]);
        assert_eq!(
            adapter.fields().keys(CanonicalField::Clicks)[0],
            "cliques".to_string()
        );

        let campaigns = adapter.reconcile_campaigns(&[row(json!({"campanha": "A", "Cost": "9", "custo": "1"}))]);
        assert_eq!(campaigns[0].metrics.spend, 9.0);
        assert_eq!(adapter.parse_insights(&[row(json!({"texto": "oi"}))])[0].content, "oi");
    }

    #[test]
    fn unknown_canonical_field_in_yaml_is_rejected() {
        let err = parse_field_tables("google_ads:\n  budget: [orcamento]\n").unwrap_err();
        assert!(matches!(err, AdapterError::Yaml(_)));
    }

    #[test]
    fn queries_target_configured_tables() {
        let google = google_ads_adapter();
        assert_eq!(google.rows_query().query_string(), "select=*&order=data.asc");
        assert_eq!(google.insights_query().unwrap().table, "Gallant_insights");

        let meta = meta_ads_adapter().with_table("fb");
        assert_eq!(meta.rows_query().table, "fb");
        assert!(meta.insights_query().is_none());
    }
}
