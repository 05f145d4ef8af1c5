//! JSON API over the view orchestrator.

use std::sync::Arc;

use adpulse_core::{Platform, View, ViewResult};
use adpulse_views::{
    filter_campaigns, filter_daily, messages, totals, Dashboard, DashboardConfig, ViewSession,
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use tracing::{info, warn};

pub const CRATE_NAME: &str = "adpulse-web";

#[derive(Clone)]
pub struct AppState {
    pub dashboard: Arc<Dashboard>,
    pub session: Arc<ViewSession>,
}

impl AppState {
    pub fn new(dashboard: Dashboard) -> Self {
        Self {
            dashboard: Arc::new(dashboard),
            session: Arc::new(ViewSession::new()),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct TotalsQuery {
    date: Option<String>,
    /// Comma-separated campaign ids.
    campaigns: Option<String>,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/api/views/{view}", get(view_handler))
        .route("/api/views/{view}/totals", get(totals_handler))
        .route("/api/campaigns/{platform}", get(campaigns_handler))
        .route("/api/campaigns/{platform}/daily", get(daily_handler))
        .route("/api/campaigns/{platform}/status", get(status_handler))
        .route("/api/campaigns/{platform}/by-date/{date}", get(by_date_handler))
        .route("/api/insights/{view}", get(insights_handler))
        .route("/api/insights/google-ads/{campaign}", get(campaign_insight_handler))
        .route("/api/dates/{view}", get(dates_handler))
        .with_state(Arc::new(state))
}

pub async fn serve_from_env() -> anyhow::Result<()> {
    serve(&DashboardConfig::from_env()).await
}

pub async fn serve(config: &DashboardConfig) -> anyhow::Result<()> {
    let dashboard = Dashboard::from_config(config).await?;
    let listener = TcpListener::bind(("0.0.0.0", config.web_port)).await?;
    info!(port = config.web_port, "dashboard api listening");
    axum::serve(listener, app(AppState::new(dashboard))).await?;
    Ok(())
}

async fn view_handler(State(state): State<Arc<AppState>>, Path(view): Path<String>) -> Response {
    let view = parse_view(&view);
    let (result, _) = state.session.load(&state.dashboard, view).await;
    Json(result).into_response()
}

async fn totals_handler(
    State(state): State<Arc<AppState>>,
    Path(view): Path<String>,
    Query(query): Query<TotalsQuery>,
) -> Response {
    let result = state.dashboard.load_view(parse_view(&view)).await;
    let selected = query
        .campaigns
        .as_deref()
        .map(|ids| {
            ids.split(',')
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .map(str::to_string)
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();
    let date = query.date.as_deref().filter(|d| !d.is_empty());

    let filtered = ViewResult {
        campaigns: filter_campaigns(&result.campaigns, &selected, date),
        daily: match date {
            Some(date) => filter_daily(&result.daily, date),
            None => result.daily,
        },
        error: result.error,
    };
    Json(totals(&filtered)).into_response()
}

async fn campaigns_handler(
    State(state): State<Arc<AppState>>,
    Path(slug): Path<String>,
) -> Response {
    let Some(platform) = Platform::from_route_slug(&slug) else {
        return not_found(&slug);
    };
    match state.dashboard.campaigns(platform).await {
        Ok(campaigns) => Json(json!({
            "success": true,
            "total": campaigns.len(),
            "campaigns": campaigns,
        }))
        .into_response(),
        Err(err) => server_error(fetch_failed(platform), err),
    }
}

async fn daily_handler(State(state): State<Arc<AppState>>, Path(slug): Path<String>) -> Response {
    let Some(platform) = Platform::from_route_slug(&slug) else {
        return not_found(&slug);
    };
    match state.dashboard.daily(platform).await {
        Ok(points) => Json(json!({
            "success": true,
            "total": points.len(),
            "data": points,
        }))
        .into_response(),
        Err(err) => server_error(fetch_failed(platform), err),
    }
}

async fn by_date_handler(
    State(state): State<Arc<AppState>>,
    Path((slug, date)): Path<(String, String)>,
) -> Response {
    let Some(platform) = Platform::from_route_slug(&slug) else {
        return not_found(&slug);
    };
    match state.dashboard.campaigns_by_date(platform, &date).await {
        Ok(campaigns) => Json(json!({
            "success": true,
            "date": date,
            "campaigns": campaigns,
        }))
        .into_response(),
        Err(err) => server_error(fetch_failed(platform), err),
    }
}

async fn status_handler(State(state): State<Arc<AppState>>, Path(slug): Path<String>) -> Response {
    let Some(platform) = Platform::from_route_slug(&slug) else {
        return not_found(&slug);
    };
    Json(state.dashboard.source_status(platform).await).into_response()
}

async fn insights_handler(State(state): State<Arc<AppState>>, Path(view): Path<String>) -> Response {
    let view = parse_view(&view);
    let result = state.dashboard.load_insights(view).await;
    match result.error {
        Some(message) => server_error(&message, format!("insights for view {view}")),
        None => Json(json!({
            "success": true,
            "total": result.insights.len(),
            "insights": result.insights,
        }))
        .into_response(),
    }
}

async fn campaign_insight_handler(
    State(state): State<Arc<AppState>>,
    Path(campaign): Path<String>,
) -> Response {
    match state
        .dashboard
        .insight_for_campaign(Platform::GoogleAds, &campaign)
        .await
    {
        Ok(insight) => Json(json!({ "success": true, "insight": insight })).into_response(),
        Err(err) => server_error(messages::INSIGHTS_FAILED, err),
    }
}

async fn dates_handler(State(state): State<Arc<AppState>>, Path(view): Path<String>) -> Response {
    let view = parse_view(&view);
    match state.dashboard.available_dates(view).await {
        Ok(dates) => Json(json!({ "success": true, "dates": dates })).into_response(),
        Err(err) => server_error(messages::CONSOLIDATED_FAILED, err),
    }
}

fn parse_view(name: &str) -> View {
    name.parse().unwrap_or(View::Other)
}

fn fetch_failed(platform: Platform) -> &'static str {
    match platform {
        Platform::GoogleAds => messages::GOOGLE_FAILED,
        Platform::FacebookAds => messages::META_FAILED,
    }
}

fn not_found(slug: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": format!("unknown platform: {slug}") })),
    )
        .into_response()
}

fn server_error(message: &str, details: impl std::fmt::Display) -> Response {
    warn!(%details, "request failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": message, "details": details.to_string() })),
    )
        .into_response()
}
