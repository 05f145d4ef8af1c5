//! View orchestration: picks the sources behind a view, runs reconciliation
//! and daily aggregation per source, and merges the consolidated view.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use adpulse_adapters::{
    compare_date_keys, google_ads_adapter, load_field_tables, meta_ads_adapter, strict_date_key,
    FieldTablesFile, SourceAdapter,
};
use adpulse_core::{Campaign, DailyPoint, Insight, Platform, SeriesSource, Totals, View, ViewResult};
use adpulse_storage::{
    FetchError, HttpClientConfig, RowSource, StaticRowSource, StoreClient, StoreEndpoint,
};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

pub const CRATE_NAME: &str = "adpulse-views";

/// User-facing messages, in the dashboard's language (pt-BR).
pub mod messages {
    pub const CONSOLIDATED_FAILED: &str = "Erro ao carregar dados consolidados das plataformas.";
    pub const GOOGLE_FAILED: &str = "Erro ao buscar dados do Google Ads do Supabase.";
    pub const META_FAILED: &str = "Erro ao buscar dados do Meta Ads do Supabase.";
    pub const GOOGLE_EMPTY: &str = "Nenhuma campanha encontrada no Google Ads.";
    pub const META_EMPTY: &str = "Nenhuma campanha encontrada no Meta Ads.";
    pub const TIKTOK_NOT_INTEGRATED: &str =
        "TikTok Ads não foi integrado. Aguardando implementação com API real.";
    pub const PLATFORM_NOT_INTEGRATED: &str =
        "Plataforma não integrada. Apenas Meta Ads possui dados reais no momento.";
    pub const INSIGHTS_FAILED: &str = "Não foi possível carregar os insights de IA neste momento.";
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub base_url: String,
    pub api_key: String,
    pub table: String,
    pub insights_table: Option<String>,
}

impl StoreConfig {
    pub fn endpoint(&self) -> StoreEndpoint {
        StoreEndpoint {
            base_url: self.base_url.clone(),
            api_key: self.api_key.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DashboardConfig {
    pub google: StoreConfig,
    pub meta: StoreConfig,
    /// 0 disables the request timeout.
    pub http_timeout_secs: u64,
    pub user_agent: String,
    pub field_tables_path: Option<PathBuf>,
    /// Serve rows from `<dir>/<source>/sample.json` instead of the store.
    pub fixtures_dir: Option<PathBuf>,
    pub web_port: u16,
}

impl DashboardConfig {
    pub fn from_env() -> Self {
        let optional = |key: &str| std::env::var(key).ok().filter(|v| !v.trim().is_empty());
        Self {
            google: StoreConfig {
                base_url: std::env::var("ADPULSE_GOOGLE_URL")
                    .unwrap_or_else(|_| "http://localhost:54321".to_string()),
                api_key: std::env::var("ADPULSE_GOOGLE_KEY").unwrap_or_default(),
                table: std::env::var("ADPULSE_GOOGLE_TABLE")
                    .unwrap_or_else(|_| "Gallant_dadosDiarios".to_string()),
                insights_table: Some(
                    std::env::var("ADPULSE_GOOGLE_INSIGHTS_TABLE")
                        .unwrap_or_else(|_| "Gallant_insights".to_string()),
                ),
            },
            meta: StoreConfig {
                base_url: std::env::var("ADPULSE_META_URL")
                    .unwrap_or_else(|_| "http://localhost:54321".to_string()),
                api_key: std::env::var("ADPULSE_META_KEY").unwrap_or_default(),
                table: std::env::var("ADPULSE_META_TABLE")
                    .unwrap_or_else(|_| "facebook-ads".to_string()),
                insights_table: optional("ADPULSE_META_INSIGHTS_TABLE"),
            },
            http_timeout_secs: std::env::var("ADPULSE_HTTP_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(0),
            user_agent: std::env::var("ADPULSE_USER_AGENT")
                .unwrap_or_else(|_| "adpulse/0.1".to_string()),
            field_tables_path: optional("ADPULSE_FIELD_TABLES").map(PathBuf::from),
            fixtures_dir: optional("ADPULSE_FIXTURES_DIR").map(PathBuf::from),
            web_port: std::env::var("ADPULSE_WEB_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(8000),
        }
    }

    pub fn http_client_config(&self) -> HttpClientConfig {
        HttpClientConfig {
            timeout: (self.http_timeout_secs > 0).then(|| Duration::from_secs(self.http_timeout_secs)),
            user_agent: Some(self.user_agent.clone()),
        }
    }
}

/// One platform's adapter paired with the store that holds its rows.
#[derive(Clone)]
pub struct SourceHandle {
    adapter: SourceAdapter,
    rows: Arc<dyn RowSource>,
}

struct SourceLoad {
    campaigns: Vec<Campaign>,
    daily: Vec<DailyPoint>,
}

impl SourceHandle {
    pub fn new(adapter: SourceAdapter, rows: Arc<dyn RowSource>) -> Self {
        Self { adapter, rows }
    }

    pub fn adapter(&self) -> &SourceAdapter {
        &self.adapter
    }

    async fn load(&self, load_id: Uuid) -> Result<SourceLoad, FetchError> {
        let rows = self.adapter.fetch_rows(self.rows.as_ref(), load_id).await?;
        let campaigns = self.adapter.reconcile_campaigns(&rows);
        let daily = self.adapter.aggregate_daily(&rows);
        info!(
            platform = %self.adapter.platform(),
            rows = rows.len(),
            campaigns = campaigns.len(),
            days = daily.len(),
            "source loaded"
        );
        Ok(SourceLoad { campaigns, daily })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceStatus {
    pub available: bool,
    pub campaign_count: usize,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct InsightsResult {
    pub insights: Vec<Insight>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Entry point used by the presentation layer.
#[derive(Clone)]
pub struct Dashboard {
    google: SourceHandle,
    meta: SourceHandle,
}

fn fetch_failed_message(view: View) -> &'static str {
    match view {
        View::Google => messages::GOOGLE_FAILED,
        View::Meta => messages::META_FAILED,
        _ => messages::CONSOLIDATED_FAILED,
    }
}

fn empty_message(platform: Platform) -> &'static str {
    match platform {
        Platform::GoogleAds => messages::GOOGLE_EMPTY,
        Platform::FacebookAds => messages::META_EMPTY,
    }
}

async fn fixture_source(dir: &Path, slug: &str, adapter: &SourceAdapter) -> Result<StaticRowSource> {
    let base = dir.join(slug);
    let mut source = StaticRowSource::new()
        .with_json_file(adapter.table(), base.join("sample.json"))
        .await?;
    if let Some(table) = adapter.insights_table() {
        let path = base.join("insights.json");
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            source = source.with_json_file(table, path).await?;
        } else {
            source = source.with_table(table, Vec::new());
        }
    }
    Ok(source)
}

impl Dashboard {
    pub fn new(google: SourceHandle, meta: SourceHandle) -> Self {
        Self { google, meta }
    }

    /// Build both sources from configuration: hosted store by default,
    /// fixture files when `fixtures_dir` is set.
    pub async fn from_config(config: &DashboardConfig) -> Result<Self> {
        let tables = match &config.field_tables_path {
            Some(path) => load_field_tables(path)
                .with_context(|| format!("loading field tables from {}", path.display()))?,
            None => FieldTablesFile::default(),
        };

        let google_adapter = google_ads_adapter()
            .with_table(&config.google.table)
            .with_insights_table(config.google.insights_table.clone())
            .with_overrides(&tables);
        let meta_adapter = meta_ads_adapter()
            .with_table(&config.meta.table)
            .with_insights_table(config.meta.insights_table.clone())
            .with_overrides(&tables);

        let (google_rows, meta_rows): (Arc<dyn RowSource>, Arc<dyn RowSource>) =
            match &config.fixtures_dir {
                Some(dir) => (
                    Arc::new(fixture_source(dir, Platform::GoogleAds.route_slug(), &google_adapter).await?),
                    Arc::new(fixture_source(dir, Platform::FacebookAds.route_slug(), &meta_adapter).await?),
                ),
                None => {
                    let http = config.http_client_config();
                    (
                        Arc::new(StoreClient::new(config.google.endpoint(), http.clone())?),
                        Arc::new(StoreClient::new(config.meta.endpoint(), http)?),
                    )
                }
            };

        Ok(Self::new(
            SourceHandle::new(google_adapter, google_rows),
            SourceHandle::new(meta_adapter, meta_rows),
        ))
    }

    pub fn source(&self, platform: Platform) -> &SourceHandle {
        match platform {
            Platform::GoogleAds => &self.google,
            Platform::FacebookAds => &self.meta,
        }
    }

    /// Load everything a view shows. Never fails: fetch problems become the
    /// result's `error` message next to whatever data could still be loaded.
    pub async fn load_view(&self, view: View) -> ViewResult {
        let load_id = Uuid::new_v4();
        let span = info_span!("load_view", %load_id, %view);

        async {
            let result = match view {
                View::Principal => self.load_consolidated(load_id).await,
                View::Google | View::Meta => {
                    let platform = view.platforms()[0];
                    self.load_single(view, platform, load_id).await
                }
                View::Tiktok => ViewResult::unavailable(messages::TIKTOK_NOT_INTEGRATED),
                View::Other => ViewResult::unavailable(messages::PLATFORM_NOT_INTEGRATED),
            };
            info!(
                campaigns = result.campaigns.len(),
                days = result.daily.len(),
                error = result.error.as_deref().unwrap_or(""),
                "view loaded"
            );
            result
        }
        .instrument(span)
        .await
    }

    async fn load_single(&self, view: View, platform: Platform, load_id: Uuid) -> ViewResult {
        match self.source(platform).load(load_id).await {
            Ok(SourceLoad { campaigns, daily }) => {
                let error = campaigns
                    .is_empty()
                    .then(|| empty_message(platform).to_string());
                ViewResult {
                    campaigns,
                    daily,
                    error,
                }
            }
            Err(err) => {
                warn!(%platform, error = %err, "source unavailable");
                ViewResult::unavailable(fetch_failed_message(view))
            }
        }
    }

    async fn load_consolidated(&self, load_id: Uuid) -> ViewResult {
        let (google, meta) = tokio::join!(self.google.load(load_id), self.meta.load(load_id));

        let mut failed = false;
        let mut take = |platform: Platform, loaded: Result<SourceLoad, FetchError>| match loaded {
            Ok(load) => load,
            Err(err) => {
                warn!(%platform, error = %err, "source unavailable");
                failed = true;
                SourceLoad {
                    campaigns: Vec::new(),
                    daily: Vec::new(),
                }
            }
        };
        let google = take(Platform::GoogleAds, google);
        let meta = take(Platform::FacebookAds, meta);

        let daily = merge_daily(&google.daily, &meta.daily);
        let mut campaigns = google.campaigns;
        campaigns.extend(meta.campaigns);

        ViewResult {
            campaigns,
            daily,
            error: failed.then(|| messages::CONSOLIDATED_FAILED.to_string()),
        }
    }

    pub async fn campaigns(&self, platform: Platform) -> Result<Vec<Campaign>, FetchError> {
        Ok(self.source(platform).load(Uuid::new_v4()).await?.campaigns)
    }

    pub async fn daily(&self, platform: Platform) -> Result<Vec<DailyPoint>, FetchError> {
        Ok(self.source(platform).load(Uuid::new_v4()).await?.daily)
    }

    /// Every row of `platform` dated `date`, one entry per row.
    pub async fn campaigns_by_date(
        &self,
        platform: Platform,
        date: &str,
    ) -> Result<Vec<Campaign>, FetchError> {
        let handle = self.source(platform);
        let rows = handle.adapter.fetch_rows(handle.rows.as_ref(), Uuid::new_v4()).await?;
        let campaigns = handle.adapter.campaigns_on_date(&rows, date);
        info!(%platform, date, rows = campaigns.len(), "rows on date");
        Ok(campaigns)
    }

    /// Newest-first insight texts for a view; principal lists Google before Meta.
    pub async fn load_insights(&self, view: View) -> InsightsResult {
        let load_id = Uuid::new_v4();
        let mut insights = Vec::new();
        for platform in view.platforms() {
            let handle = self.source(*platform);
            match handle.adapter.fetch_insights(handle.rows.as_ref(), load_id).await {
                Ok(found) => insights.extend(found),
                Err(err) => {
                    warn!(%platform, error = %err, "insights unavailable");
                    return InsightsResult {
                        insights: Vec::new(),
                        error: Some(messages::INSIGHTS_FAILED.to_string()),
                    };
                }
            }
        }
        InsightsResult {
            insights,
            error: None,
        }
    }

    /// Newest insight whose campaign name contains `campaign`, ignoring case.
    pub async fn insight_for_campaign(
        &self,
        platform: Platform,
        campaign: &str,
    ) -> Result<Option<Insight>, FetchError> {
        let handle = self.source(platform);
        let needle = campaign.to_lowercase();
        let insights = handle
            .adapter
            .fetch_insights(handle.rows.as_ref(), Uuid::new_v4())
            .await?;
        Ok(insights.into_iter().find(|insight| {
            insight
                .campaign
                .as_deref()
                .is_some_and(|name| name.to_lowercase().contains(&needle))
        }))
    }

    /// Distinct ISO dates with data, ascending; principal is the union of both sources.
    pub async fn available_dates(&self, view: View) -> Result<Vec<String>, FetchError> {
        let load_id = Uuid::new_v4();
        let mut dates = BTreeSet::new();
        for platform in view.platforms() {
            let handle = self.source(*platform);
            let rows = handle.adapter.fetch_rows(handle.rows.as_ref(), load_id).await?;
            dates.extend(handle.adapter.available_dates(&rows));
        }
        Ok(dates.into_iter().collect())
    }

    pub async fn source_status(&self, platform: Platform) -> SourceStatus {
        let handle = self.source(platform);
        match handle
            .rows
            .count_rows(Uuid::new_v4(), handle.adapter.table())
            .await
        {
            Ok(count) => SourceStatus {
                available: true,
                campaign_count: count,
            },
            Err(err) => {
                warn!(%platform, error = %err, "status probe failed");
                SourceStatus {
                    available: false,
                    campaign_count: 0,
                }
            }
        }
    }
}

/// Sum two daily series per date. Every point in the result is tagged consolidated.
pub fn merge_daily(a: &[DailyPoint], b: &[DailyPoint]) -> Vec<DailyPoint> {
    let mut by_date: HashMap<&str, DailyPoint> = HashMap::new();
    for point in a.iter().chain(b) {
        by_date
            .entry(point.date.as_str())
            .or_insert_with(|| DailyPoint::zeroed(point.date.clone()))
            .accumulate(point);
    }

    let mut merged = by_date
        .into_values()
        .map(|mut point| {
            point.source = Some(SeriesSource::Consolidated);
            point
        })
        .collect::<Vec<_>>();
    merged.sort_by(|x, y| compare_date_keys(&x.date, &y.date));
    merged
}

/// Headline totals: the daily series when present, otherwise the campaigns.
pub fn totals(result: &ViewResult) -> Totals {
    if result.daily.is_empty() {
        Totals::from_campaigns(&result.campaigns)
    } else {
        Totals::from_daily(&result.daily)
    }
}

/// Keep campaigns whose id is selected (empty selection keeps all) and,
/// when `date` is set, whose start date falls on it.
pub fn filter_campaigns(campaigns: &[Campaign], selected_ids: &[String], date: Option<&str>) -> Vec<Campaign> {
    campaigns
        .iter()
        .filter(|c| selected_ids.is_empty() || selected_ids.contains(&c.id))
        .filter(|c| match date {
            None => true,
            Some(date) => c
                .start_date
                .as_deref()
                .and_then(strict_date_key)
                .is_some_and(|start| start == date),
        })
        .cloned()
        .collect()
}

pub fn filter_daily(points: &[DailyPoint], date: &str) -> Vec<DailyPoint> {
    points.iter().filter(|p| p.date == date).cloned().collect()
}

/// Issued by [`ViewSession::begin`]; only the newest ticket may commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadTicket {
    generation: u64,
    view: View,
}

impl LoadTicket {
    pub fn view(&self) -> View {
        self.view
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommittedView {
    pub view: View,
    pub result: ViewResult,
}

/// Displayed state for one dashboard session. A load started earlier than
/// the latest `begin` is discarded when it finishes.
#[derive(Debug, Default)]
pub struct ViewSession {
    generation: AtomicU64,
    current: RwLock<Option<CommittedView>>,
}

impl ViewSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&self, view: View) -> LoadTicket {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        LoadTicket { generation, view }
    }

    pub fn is_current(&self, ticket: &LoadTicket) -> bool {
        self.generation.load(Ordering::SeqCst) == ticket.generation
    }

    /// Store `result` if `ticket` is still the newest. Returns whether it was stored.
    pub async fn commit(&self, ticket: LoadTicket, result: ViewResult) -> bool {
        let mut current = self.current.write().await;
        if !self.is_current(&ticket) {
            return false;
        }
        *current = Some(CommittedView {
            view: ticket.view,
            result,
        });
        true
    }

    pub async fn current(&self) -> Option<CommittedView> {
        self.current.read().await.clone()
    }

    /// Begin, load and commit in one step. Returns the loaded result whether
    /// or not a newer load superseded it.
    pub async fn load(&self, dashboard: &Dashboard, view: View) -> (ViewResult, bool) {
        let ticket = self.begin(view);
        let result = dashboard.load_view(view).await;
        let committed = self.commit(ticket, result.clone()).await;
        if !committed {
            info!(%view, "discarding superseded view load");
        }
        (result, committed)
    }
}
