//! Wise Old Man group tracking: stat refreshes, group info and monthly gains.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{error, info};

use crate::config::WiseOldManConfig;
use crate::error::CollaboratorError;

const WOM_API: &str = "https://api.wiseoldman.net/v2";
const USER_AGENT: &str = "clan-eom-serenity";
pub const TOP_GAINS_LIMIT: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    Ehp,
    Ehb,
}

impl Metric {
    pub fn key(self) -> &'static str {
        match self {
            Metric::Ehp => "ehp",
            Metric::Ehb => "ehb",
        }
    }

    fn heading(self) -> &'static str {
        match self {
            Metric::Ehp => "**🧠 EHP (Efficient Hours Played):**",
            Metric::Ehb => "**⚔️ EHB (Efficient Hours Bossing):**",
        }
    }

    fn unit(self) -> &'static str {
        match self {
            Metric::Ehp => "EHP",
            Metric::Ehb => "EHB",
        }
    }
}

/// Group details as returned by `GET /groups/{id}`.
#[derive(Deserialize, Debug, Clone)]
pub struct GroupInfo {
    pub id: u64,
    pub name: String,
    #[serde(rename = "memberCount")]
    pub member_count: Option<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Gain {
    pub player: String,
    pub gained: f64,
}

#[derive(Deserialize, Debug)]
struct GainPlayer {
    #[serde(rename = "displayName")]
    display_name: String,
}

#[derive(Deserialize, Debug)]
struct GainEntry {
    player: GainPlayer,
    #[serde(default)]
    data: Value,
}

#[derive(Deserialize, Debug, Default)]
struct UpdateAllResponse {
    message: Option<String>,
    count: Option<u32>,
}

impl GainEntry {
    /// Accepts both `data.gained` and `data.<metric>.gained`.
    fn into_gain(self, metric: Metric) -> Gain {
        let gained = self
            .data
            .get("gained")
            .or_else(|| self.data.get(metric.key()).and_then(|m| m.get("gained")))
            .and_then(Value::as_f64)
            .unwrap_or(0.0);
        Gain {
            player: self.player.display_name,
            gained,
        }
    }
}

/// Player-stat collaborator.
#[async_trait]
pub trait StatTracker: Send + Sync {
    fn group_id(&self) -> u64;

    /// Asks the tracker to refresh every group member. Returns its status message.
    async fn trigger_group_update(&self) -> Result<String, CollaboratorError>;

    async fn group_info(&self) -> Result<GroupInfo, CollaboratorError>;

    async fn monthly_gains(&self, metric: Metric, limit: u32)
        -> Result<Vec<Gain>, CollaboratorError>;
}

pub struct WiseOldManClient {
    http: reqwest::Client,
    base_url: String,
    group_id: u64,
    api_key: Option<String>,
    verification_code: Option<String>,
}

impl WiseOldManClient {
    pub fn new(config: &WiseOldManConfig) -> Result<Self, CollaboratorError> {
        Self::with_base_url(config, WOM_API)
    }

    pub fn with_base_url(
        config: &WiseOldManConfig,
        base_url: impl Into<String>,
    ) -> Result<Self, CollaboratorError> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.into(),
            group_id: config.group_id,
            api_key: config.api_key.clone(),
            verification_code: config.verification_code.clone(),
        })
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, CollaboratorError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        Err(CollaboratorError::Status {
            service: "Wise Old Man",
            status: status.as_u16(),
            body: response.text().await.unwrap_or_default(),
        })
    }
}

#[async_trait]
impl StatTracker for WiseOldManClient {
    fn group_id(&self) -> u64 {
        self.group_id
    }

    async fn trigger_group_update(&self) -> Result<String, CollaboratorError> {
        info!("Triggering update for WOM group {}", self.group_id);
        let url = format!("{}/groups/{}/update-all", self.base_url, self.group_id);
        let mut request = self.authorized(self.http.post(url));
        if let Some(code) = &self.verification_code {
            request = request.json(&json!({ "verificationCode": code }));
        }

        let response = Self::check(request.send().await?).await?;
        let body = response
            .json::<UpdateAllResponse>()
            .await
            .unwrap_or_default();
        info!("WOM update request successful");
        Ok(match (body.message, body.count) {
            (Some(message), _) => message,
            (None, Some(count)) => format!("{count} members are being updated"),
            (None, None) => "Update triggered successfully".to_string(),
        })
    }

    async fn group_info(&self) -> Result<GroupInfo, CollaboratorError> {
        let url = format!("{}/groups/{}", self.base_url, self.group_id);
        let response = Self::check(self.authorized(self.http.get(url)).send().await?).await?;
        Ok(response.json::<GroupInfo>().await?)
    }

    async fn monthly_gains(
        &self,
        metric: Metric,
        limit: u32,
    ) -> Result<Vec<Gain>, CollaboratorError> {
        let url = format!("{}/groups/{}/gained", self.base_url, self.group_id);
        let limit = limit.to_string();
        let request = self
            .http
            .get(url)
            .query(&[("metric", metric.key()), ("period", "month"), ("limit", limit.as_str())]);
        let response = Self::check(self.authorized(request).send().await?).await?;
        let entries = response.json::<Vec<GainEntry>>().await?;
        info!("Retrieved {} {} gains from Wise Old Man", entries.len(), metric.unit());
        Ok(entries.into_iter().map(|e| e.into_gain(metric)).collect())
    }
}

/// Fetches EHP and EHB gains concurrently. A failed branch yields an empty list.
pub async fn monthly_gains_summary(tracker: &dyn StatTracker, limit: u32) -> (Vec<Gain>, Vec<Gain>) {
    let (ehp, ehb) = tokio::join!(
        tracker.monthly_gains(Metric::Ehp, limit),
        tracker.monthly_gains(Metric::Ehb, limit)
    );
    let settle = |metric: Metric, result: Result<Vec<Gain>, CollaboratorError>| {
        result.unwrap_or_else(|why| {
            error!("Error fetching {} gains: {}", metric.unit(), why);
            Vec::new()
        })
    };
    (settle(Metric::Ehp, ehp), settle(Metric::Ehb, ehb))
}

fn format_hours(value: f64) -> String {
    if value >= 1.0 {
        format!("{value:.1}")
    } else {
        format!("{value:.2}")
    }
}

pub fn format_gains_summary(ehp: &[Gain], ehb: &[Gain]) -> String {
    if ehp.is_empty() && ehb.is_empty() {
        return "ℹ️ No Wise Old Man gains data available for this month.".to_string();
    }

    let mut lines = vec!["🏆 **Top Monthly Gains**".to_string(), String::new()];
    for (metric, gains) in [(Metric::Ehp, ehp), (Metric::Ehb, ehb)] {
        lines.push(metric.heading().to_string());
        if gains.is_empty() {
            lines.push(format!("No {} data available", metric.unit()));
        }
        for (i, gain) in gains.iter().enumerate() {
            lines.push(format!(
                "{}. **{}** - {} {}",
                i + 1,
                gain.player,
                format_hours(gain.gained),
                metric.unit()
            ));
        }
        lines.push(String::new());
    }
    lines.join("\n").trim_end().to_string()
}
