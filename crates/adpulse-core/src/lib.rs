//! Core domain model and derived metrics for the ad performance dashboard.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

pub const CRATE_NAME: &str = "adpulse-core";

/// One row as returned by the hosted store. Keys and value types are not guaranteed.
pub type RawRecord = BTreeMap<String, JsonValue>;

/// Advertising platform a campaign or insight came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Platform {
    #[serde(rename = "Google Ads")]
    GoogleAds,
    #[serde(rename = "Facebook Ads")]
    FacebookAds,
}

impl Platform {
    pub const ALL: [Platform; 2] = [Platform::GoogleAds, Platform::FacebookAds];

    /// Prefix used when building campaign ids.
    pub fn id_prefix(self) -> &'static str {
        match self {
            Platform::GoogleAds => "google",
            Platform::FacebookAds => "meta",
        }
    }

    /// Slug used by the pass-through HTTP routes.
    pub fn route_slug(self) -> &'static str {
        match self {
            Platform::GoogleAds => "google-ads",
            Platform::FacebookAds => "meta-ads",
        }
    }

    pub fn from_route_slug(slug: &str) -> Option<Self> {
        Platform::ALL.into_iter().find(|p| p.route_slug() == slug)
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Platform::GoogleAds => f.write_str("Google Ads"),
            Platform::FacebookAds => f.write_str("Facebook Ads"),
        }
    }
}

/// Reporting scope selected by the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum View {
    Principal,
    Google,
    Meta,
    Tiktok,
    Other,
}

impl View {
    /// Platforms whose rows feed this view, in presentation order.
    pub fn platforms(self) -> &'static [Platform] {
        match self {
            View::Principal => &[Platform::GoogleAds, Platform::FacebookAds],
            View::Google => &[Platform::GoogleAds],
            View::Meta => &[Platform::FacebookAds],
            View::Tiktok | View::Other => &[],
        }
    }

    pub fn is_integrated(self) -> bool {
        !self.platforms().is_empty()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            View::Principal => "principal",
            View::Google => "google",
            View::Meta => "meta",
            View::Tiktok => "tiktok",
            View::Other => "other",
        }
    }
}

impl FromStr for View {
    type Err = std::convert::Infallible;

    /// Platform route slugs select that platform's view. Unknown names map to
    /// [`View::Other`]; every selector is a valid view.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_lowercase().as_str() {
            "principal" => View::Principal,
            "google" | "google-ads" => View::Google,
            "meta" | "meta-ads" => View::Meta,
            "tiktok" => View::Tiktok,
            _ => View::Other,
        })
    }
}

impl fmt::Display for View {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metric totals shared by campaigns. Missing or unparsable source values are 0.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CanonicalMetrics {
    pub impressions: f64,
    pub clicks: f64,
    pub spend: f64,
    pub leads: f64,
    pub conversions: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Campaign {
    pub id: String,
    pub name: String,
    pub platform: Platform,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<String>,
    pub metrics: CanonicalMetrics,
    pub cost_per_click: f64,
    pub cpa: f64,
}

/// Marker attached to points produced by merging both sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeriesSource {
    Consolidated,
}

/// Per-day totals. Exactly one point per distinct `date` in a series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyPoint {
    pub date: String,
    pub clicks: f64,
    pub leads: f64,
    pub impressions: f64,
    pub conversions: f64,
    pub spend: f64,
    #[serde(rename = "_source", default, skip_serializing_if = "Option::is_none")]
    pub source: Option<SeriesSource>,
}

impl DailyPoint {
    pub fn zeroed(date: impl Into<String>) -> Self {
        Self {
            date: date.into(),
            clicks: 0.0,
            leads: 0.0,
            impressions: 0.0,
            conversions: 0.0,
            spend: 0.0,
            source: None,
        }
    }

    /// Field-wise sum of `other` into `self`. The date is left untouched.
    pub fn accumulate(&mut self, other: &DailyPoint) {
        self.clicks += other.clicks;
        self.leads += other.leads;
        self.impressions += other.impressions;
        self.conversions += other.conversions;
        self.spend += other.spend;
    }
}

/// Everything the presentation layer needs for one view.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ViewResult {
    pub campaigns: Vec<Campaign>,
    pub daily: Vec<DailyPoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ViewResult {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self {
            campaigns: Vec::new(),
            daily: Vec::new(),
            error: Some(message.into()),
        }
    }
}

/// AI-generated insight text, treated as opaque content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Insight {
    pub id: Option<String>,
    pub content: String,
    pub created_at: Option<String>,
    pub campaign: Option<String>,
    pub platform: Platform,
}

/// Headline totals shown above the charts.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Totals {
    pub spend: f64,
    pub impressions: f64,
    pub clicks: f64,
    pub leads: f64,
    pub cost_per_click: f64,
    pub cpa: f64,
}

impl Totals {
    fn finish(mut self) -> Self {
        self.cost_per_click = cost_per_click(self.spend, self.clicks);
        self.cpa = cpa(self.spend, self.leads);
        self
    }

    pub fn from_daily(points: &[DailyPoint]) -> Self {
        points
            .iter()
            .fold(Totals::default(), |mut acc, p| {
                acc.spend += p.spend;
                acc.impressions += p.impressions;
                acc.clicks += p.clicks;
                acc.leads += p.leads;
                acc
            })
            .finish()
    }

    pub fn from_campaigns(campaigns: &[Campaign]) -> Self {
        campaigns
            .iter()
            .fold(Totals::default(), |mut acc, c| {
                acc.spend += c.metrics.spend;
                acc.impressions += c.metrics.impressions;
                acc.clicks += c.metrics.clicks;
                acc.leads += c.metrics.leads;
                acc
            })
            .finish()
    }
}

/// Round half away from zero to two decimal places.
pub fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

pub fn cost_per_click(spend: f64, clicks: f64) -> f64 {
    if clicks > 0.0 {
        round2(spend / clicks)
    } else {
        0.0
    }
}

pub fn cpa(spend: f64, leads: f64) -> f64 {
    if leads > 0.0 {
        round2(spend / leads)
    } else {
        0.0
    }
}
