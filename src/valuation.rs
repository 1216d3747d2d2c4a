//! Loot valuation: item name resolution against a catalog plus market prices.

use std::sync::{Arc, OnceLock};

use regex::Regex;
use tracing::{debug, info, warn};

use crate::classifier::LootLine;
use crate::error::ConfigError;
use crate::prices::{ItemId, PriceCache, PriceQuote, PriceSource};

/// Minimum normalized similarity for a fuzzy catalog match.
pub const FUZZY_MATCH_THRESHOLD: f64 = 0.80;

/// Word-level rewrites applied after normalization.
const SYNONYMS: [(&str, &str); 2] = [("treads", "defender"), ("threads", "defender")];

/// Fallback catalog used when no `ITEM_CATALOG_JSON` is supplied.
const SAMPLE_CATALOG: [(&str, u32); 32] = [
    ("dragon claws", 13652),
    ("dragon dagger", 1215),
    ("dragon longsword", 1305),
    ("dragon scimitar", 4587),
    ("dragon boots", 11840),
    ("abyssal whip", 4151),
    ("bandos chestplate", 11832),
    ("bandos tassets", 11834),
    ("armadyl helmet", 11826),
    ("armadyl chestplate", 11828),
    ("armadyl chainskirt", 11830),
    ("twisted bow", 20997),
    ("scythe of vitur", 22325),
    ("avernic defender", 22322),
    ("primordial boots", 13239),
    ("pegasian boots", 13237),
    ("eternal boots", 13235),
    ("justiciar faceguard", 22326),
    ("justiciar chestguard", 22327),
    ("justiciar legguards", 22328),
    ("dragon bones", 536),
    ("prayer potion(4)", 2434),
    ("super combat potion(4)", 12695),
    ("ranging potion(4)", 2444),
    ("nature rune", 561),
    ("law rune", 563),
    ("death rune", 560),
    ("blood rune", 565),
    ("soul rune", 566),
    ("ghrazi rapier", 22324),
    ("sanguinesti staff", 22481),
    ("elder maul", 21003),
];

fn quantity_prefix_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d+\s*x\s*").expect("valid regex"))
}

fn trailing_parenthetical_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s*\([^)]*\)$").expect("valid regex"))
}

/// Lowercases, strips `N x ` and a trailing `(...)`, collapses whitespace and applies synonyms.
pub fn normalize_item_name(name: &str) -> String {
    let lowered = name.trim().to_lowercase();
    let without_qty = quantity_prefix_re().replace(&lowered, "");
    let without_paren = trailing_parenthetical_re().replace(&without_qty, "");
    without_paren
        .split_whitespace()
        .map(|word| {
            SYNONYMS
                .iter()
                .find(|(from, _)| *from == word)
                .map(|(_, to)| *to)
                .unwrap_or(word)
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemMatch {
    pub id: ItemId,
    pub name: String,
    pub exact: bool,
}

/// Name → id table, scanned in insertion order.
#[derive(Debug, Clone, Default)]
pub struct ItemCatalog {
    entries: Vec<(String, ItemId)>,
}

impl ItemCatalog {
    /// Keys are normalized on insert; the first entry for a key wins.
    pub fn from_entries<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = (S, ItemId)>,
        S: AsRef<str>,
    {
        let mut catalog = ItemCatalog::default();
        for (name, id) in entries {
            let key = normalize_item_name(name.as_ref());
            if key.is_empty() || catalog.entries.iter().any(|(k, _)| *k == key) {
                continue;
            }
            catalog.entries.push((key, id));
        }
        catalog
    }

    pub fn sample() -> Self {
        Self::from_entries(SAMPLE_CATALOG.iter().map(|(name, id)| (*name, ItemId(*id))))
    }

    /// Parses a JSON object of `"item name": id` pairs.
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let invalid = |reason: String| ConfigError::Invalid {
            name: "ITEM_CATALOG_JSON".to_string(),
            reason,
        };
        let map: serde_json::Map<String, serde_json::Value> =
            serde_json::from_str(raw).map_err(|e| invalid(e.to_string()))?;
        let mut entries = Vec::with_capacity(map.len());
        for (name, value) in map {
            let id = value
                .as_u64()
                .and_then(|v| u32::try_from(v).ok())
                .ok_or_else(|| invalid(format!("'{name}' is not an item id")))?;
            entries.push((name, ItemId(id)));
        }
        Ok(Self::from_entries(entries))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Exact normalized match first, then the best fuzzy candidate at or above
    /// [`FUZZY_MATCH_THRESHOLD`]. Ties keep the earliest entry.
    pub fn resolve(&self, name: &str) -> Option<ItemMatch> {
        let clean = normalize_item_name(name);
        if clean.is_empty() {
            return None;
        }

        if let Some((key, id)) = self.entries.iter().find(|(key, _)| *key == clean) {
            return Some(ItemMatch {
                id: *id,
                name: key.clone(),
                exact: true,
            });
        }

        let mut best: Option<(f64, &(String, ItemId))> = None;
        for entry in &self.entries {
            let score = strsim::normalized_levenshtein(&clean, &entry.0);
            if score >= FUZZY_MATCH_THRESHOLD && best.map_or(true, |(s, _)| score > s) {
                best = Some((score, entry));
            }
        }

        best.map(|(score, (key, id))| {
            info!("Fuzzy matched '{}' to '{}' with score {:.2}", name, key, score);
            ItemMatch {
                id: *id,
                name: key.clone(),
                exact: false,
            }
        })
    }
}

/// Value of one loot line. Unresolved items stay in the output at zero.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValuationResult {
    pub raw_text: String,
    pub resolved_item_name: Option<String>,
    pub quantity: u32,
    pub unit_price: u64,
    pub line_value: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Valuation {
    pub total: u64,
    pub lines: Vec<ValuationResult>,
}

/// Resolves loot lines to items and prices them through a shared cache.
pub struct LootValuer {
    catalog: ItemCatalog,
    source: Arc<dyn PriceSource>,
    cache: PriceCache,
}

impl LootValuer {
    pub fn new(catalog: ItemCatalog, source: Arc<dyn PriceSource>, cache: PriceCache) -> Self {
        Self {
            catalog,
            source,
            cache,
        }
    }

    pub fn resolve_item(&self, name: &str) -> Option<ItemMatch> {
        self.catalog.resolve(name)
    }

    pub async fn price(&self, id: ItemId) -> Option<PriceQuote> {
        self.cache.prices(self.source.as_ref()).await.get(&id).copied()
    }

    pub async fn valuate(&self, lines: &[LootLine]) -> Valuation {
        let prices = self.cache.prices(self.source.as_ref()).await;
        let mut valuation = Valuation::default();

        for line in lines {
            let matched = self.catalog.resolve(&line.item_name_guess);
            let unit_price = matched
                .as_ref()
                .and_then(|m| prices.get(&m.id))
                .and_then(PriceQuote::unit_price)
                .unwrap_or(0);
            let line_value = unit_price.saturating_mul(u64::from(line.quantity));

            match &matched {
                Some(m) if unit_price > 0 => debug!(
                    "Valued {}x {} at {} gp",
                    line.quantity, m.name, line_value
                ),
                _ => warn!("Could not find price for: {}", line.raw_text),
            }

            valuation.total = valuation.total.saturating_add(line_value);
            valuation.lines.push(ValuationResult {
                raw_text: line.raw_text.clone(),
                resolved_item_name: matched.map(|m| m.name),
                quantity: line.quantity,
                unit_price,
                line_value,
            });
        }

        valuation
    }
}

/// `950`, `1.5K`, `2.3M`. Output boundary only.
pub fn format_value(value: u64) -> String {
    if value >= 1_000_000 {
        format!("{:.1}M", value as f64 / 1_000_000.0)
    } else if value >= 1_000 {
        format!("{:.1}K", value as f64 / 1_000.0)
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::parse_loot_line;
    use crate::error::CollaboratorError;
    use crate::prices::PriceTable;
    use async_trait::async_trait;

    struct FixedPrices(PriceTable);

    #[async_trait]
    impl PriceSource for FixedPrices {
        async fn latest_prices(&self) -> Result<PriceTable, CollaboratorError> {
            Ok(self.0.clone())
        }
    }

    fn quote(low: u64, high: u64) -> PriceQuote {
        PriceQuote {
            low: Some(low),
            high: Some(high),
        }
    }

    #[test]
    fn normalizes_names() {
        assert_eq!(normalize_item_name("  50 x Dragon   Bones "), "dragon bones");
        assert_eq!(normalize_item_name("Prayer potion(4)"), "prayer potion");
        assert_eq!(normalize_item_name("Avernic treads"), "avernic defender");
    }

    #[test]
    fn exact_match_wins() {
        let catalog = ItemCatalog::sample();
        let m = catalog.resolve("Dragon claws").unwrap();
        assert_eq!(m.id, ItemId(13652));
        assert!(m.exact);
    }

    #[test]
    fn fuzzy_match_accepts_close_spelling() {
        let catalog = ItemCatalog::sample();
        let m = catalog.resolve("Dragon claw").unwrap();
        assert_eq!(m.id, ItemId(13652));
        assert!(!m.exact);
    }

    #[test]
    fn fuzzy_match_rejects_distant_names() {
        let catalog = ItemCatalog::sample();
        assert_eq!(catalog.resolve("Bucket of sand"), None);
    }

    #[test]
    fn catalog_from_json() {
        let catalog = ItemCatalog::from_json(r#"{"Zulrah's scales": 12934, "Onyx": 6573}"#).unwrap();
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.resolve("onyx").map(|m| m.id), Some(ItemId(6573)));
        assert!(ItemCatalog::from_json(r#"{"Onyx": "many"}"#).is_err());
    }

    #[tokio::test]
    async fn valuates_lines_and_keeps_unresolved_ones() {
        let mut table = PriceTable::new();
        table.insert(ItemId(536), quote(2_000, 2_200));
        table.insert(ItemId(13652), quote(40_000_000, 42_000_000));
        let valuer = LootValuer::new(
            ItemCatalog::sample(),
            Arc::new(FixedPrices(table)),
            PriceCache::default(),
        );

        let lines: Vec<LootLine> = ["50 x Dragon bones", "Dragon claws", "Mystery box"]
            .iter()
            .filter_map(|l| parse_loot_line(l))
            .collect();
        let valuation = valuer.valuate(&lines).await;

        assert_eq!(valuation.lines.len(), 3);
        assert_eq!(valuation.lines[0].line_value, 105_000);
        assert_eq!(valuation.lines[1].line_value, 41_000_000);
        assert_eq!(valuation.lines[2].resolved_item_name, None);
        assert_eq!(valuation.lines[2].line_value, 0);
        assert_eq!(valuation.total, 41_105_000);
    }

    #[tokio::test]
    async fn price_lookup_by_id() {
        let mut table = PriceTable::new();
        table.insert(ItemId(4151), quote(1_500_000, 1_600_000));
        let valuer = LootValuer::new(ItemCatalog::sample(), Arc::new(FixedPrices(table)), PriceCache::default());
        let id = valuer.resolve_item("Abyssal whip").unwrap().id;
        assert_eq!(valuer.price(id).await.and_then(|q| q.unit_price()), Some(1_550_000));
        assert_eq!(valuer.price(ItemId(1)).await, None);
    }

    #[test]
    fn formats_values() {
        assert_eq!(format_value(950), "950");
        assert_eq!(format_value(1_000), "1.0K");
        assert_eq!(format_value(1_500), "1.5K");
        assert_eq!(format_value(2_300_000), "2.3M");
    }
}
