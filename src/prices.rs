use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

use crate::error::CollaboratorError;

const WIKI_LATEST_PRICES_URL: &str = "https://prices.runescape.wiki/api/v1/osrs/latest";
const USER_AGENT: &str = "clan-eom-serenity - end of month loot valuation";
pub const PRICE_CACHE_TTL: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ItemId(pub u32);

/// Latest instant-buy (`high`) and instant-sell (`low`) offers for an item.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct PriceQuote {
    pub low: Option<u64>,
    pub high: Option<u64>,
}

impl PriceQuote {
    /// Average of both offers when present, otherwise whichever exists.
    pub fn unit_price(&self) -> Option<u64> {
        match (self.low.filter(|v| *v > 0), self.high.filter(|v| *v > 0)) {
            (Some(low), Some(high)) => Some((low + high) / 2),
            (Some(v), None) | (None, Some(v)) => Some(v),
            (None, None) => None,
        }
    }
}

pub type PriceTable = HashMap<ItemId, PriceQuote>;

/// Bulk "latest prices" endpoint. There is no lookup by name.
#[async_trait]
pub trait PriceSource: Send + Sync {
    async fn latest_prices(&self) -> Result<PriceTable, CollaboratorError>;
}

/// LatestPricesResponse is what the wiki's `/latest` endpoint returns: item id (as a string) to quote.
#[derive(Deserialize, Debug)]
struct LatestPricesResponse {
    data: HashMap<String, PriceQuote>,
}

/// Client for the OSRS wiki real-time prices API.
#[derive(Clone)]
pub struct WikiPriceClient {
    http: reqwest::Client,
    url: String,
}

impl WikiPriceClient {
    pub fn new() -> Result<Self, CollaboratorError> {
        Self::with_url(WIKI_LATEST_PRICES_URL)
    }

    pub fn with_url(url: impl Into<String>) -> Result<Self, CollaboratorError> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            http,
            url: url.into(),
        })
    }
}

#[async_trait]
impl PriceSource for WikiPriceClient {
    async fn latest_prices(&self) -> Result<PriceTable, CollaboratorError> {
        let response = self.http.get(&self.url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(CollaboratorError::Status {
                service: "RuneScape Wiki",
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        let body = response.json::<LatestPricesResponse>().await?;
        Ok(body
            .data
            .into_iter()
            .filter_map(|(id, quote)| id.parse().ok().map(|id| (ItemId(id), quote)))
            .collect())
    }
}

struct CachedPrices {
    fetched_at: Instant,
    prices: Arc<PriceTable>,
}

/// Time-bounded cache in front of a [`PriceSource`].
///
/// A hit returns immediately; a miss performs one fetch while holding the
/// lock. A failed fetch falls back to the stale table, or an empty one.
pub struct PriceCache {
    ttl: Duration,
    inner: Mutex<Option<CachedPrices>>,
}

impl PriceCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            inner: Mutex::new(None),
        }
    }

    pub async fn prices(&self, source: &dyn PriceSource) -> Arc<PriceTable> {
        let mut guard = self.inner.lock().await;

        if let Some(cached) = guard.as_ref() {
            if cached.fetched_at.elapsed() < self.ttl {
                debug!("Using cached price data");
                return Arc::clone(&cached.prices);
            }
        }

        match source.latest_prices().await {
            Ok(prices) => {
                info!("Retrieved price data for {} items", prices.len());
                let prices = Arc::new(prices);
                *guard = Some(CachedPrices {
                    fetched_at: Instant::now(),
                    prices: Arc::clone(&prices),
                });
                prices
            }
            Err(why) => {
                error!("Error fetching prices: {}", why);
                guard
                    .as_ref()
                    .map(|cached| Arc::clone(&cached.prices))
                    .unwrap_or_default()
            }
        }
    }
}

impl Default for PriceCache {
    fn default() -> Self {
        Self::new(PRICE_CACHE_TTL)
    }
}
