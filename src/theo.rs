//! Converts external bookmaker odds into vig-free cent prices for a match's
//! two outcomes, handling two-way and three-way (draw-split) markets.

use crate::error::OddsError;
use async_trait::async_trait;
use std::collections::HashMap;

/// Reference weighting when no other blend is configured: lean on Pinnacle,
/// a sharper book, and average the rest. Mirrors the original implementation's
/// per-bookmaker weight table, generalized to a two-tier blend.
pub const PINNACLE_WEIGHT: f64 = 0.6;
const DEFAULT_DRAW_ODDS: f64 = 20.0;

/// Decimal odds for one outcome, reported per bookmaker.
pub type BookmakerOdds = HashMap<String, f64>;

/// Per-outcome decimal odds gathered from bookmakers for one match.
#[derive(Debug, Clone, Default)]
pub struct OddsSnapshot {
    pub odds_a: BookmakerOdds,
    pub odds_b: BookmakerOdds,
    pub odds_draw: BookmakerOdds,
}

/// External odds feed, consumed by `TheoEngine`. Out of scope for this
/// crate's implementation; callers provide a concrete HTTP-backed adapter.
#[async_trait]
pub trait OddsProvider: Send + Sync {
    async fn fetch_odds(&self, event_key: &str) -> Result<OddsSnapshot, OddsError>;
}

/// Convert American odds (e.g. `+150`, `-200`) to decimal odds.
pub fn american_to_decimal(american: i32) -> f64 {
    if american > 0 {
        american as f64 / 100.0 + 1.0
    } else {
        100.0 / (american.unsigned_abs() as f64) + 1.0
    }
}

/// Blend a bookmaker->decimal-odds map into a single decimal value: Pinnacle
/// weighted at `PINNACLE_WEIGHT`, the rest averaged and weighted at the
/// remainder. Falls back to a plain average when Pinnacle is absent.
pub fn blend_odds(odds: &BookmakerOdds) -> Option<f64> {
    if odds.is_empty() {
        return None;
    }
    let pinnacle = odds
        .iter()
        .find(|(book, _)| book.eq_ignore_ascii_case("pinnacle"))
        .map(|(_, v)| *v);

    let others: Vec<f64> = odds
        .iter()
        .filter(|(book, _)| !book.eq_ignore_ascii_case("pinnacle"))
        .map(|(_, v)| *v)
        .collect();

    match (pinnacle, others.is_empty()) {
        (Some(p), true) => Some(p),
        (Some(p), false) => {
            let avg_others = others.iter().sum::<f64>() / others.len() as f64;
            Some(p * PINNACLE_WEIGHT + avg_others * (1.0 - PINNACLE_WEIGHT))
        }
        (None, _) => Some(odds.values().sum::<f64>() / odds.len() as f64),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Theo {
    pub theo_a: u8,
    pub theo_b: u8,
}

impl Theo {
    pub fn fair_odds_a(&self) -> f64 {
        100.0 / self.theo_a.max(1) as f64
    }

    pub fn fair_odds_b(&self) -> f64 {
        100.0 / self.theo_b.max(1) as f64
    }
}

pub struct TheoEngine;

impl TheoEngine {
    /// Two-way: `theo_A = round(100 * p_A / (p_A + p_B))`, `theo_B = 100 - theo_A`.
    pub fn two_way(odds_a: f64, odds_b: f64) -> Theo {
        let p_a = 1.0 / odds_a;
        let p_b = 1.0 / odds_b;
        let theo_a = (100.0 * p_a / (p_a + p_b)).round().clamp(0.0, 100.0) as u8;
        Theo {
            theo_a,
            theo_b: 100 - theo_a,
        }
    }

    /// Three-way with a draw, split 50/50 between A and B per domain convention.
    /// `o_d` defaults to a long-shot draw (`DEFAULT_DRAW_ODDS`) when absent, which
    /// makes the formula degenerate to the two-way result in the limit.
    pub fn three_way(odds_a: f64, odds_b: f64, odds_draw: Option<f64>) -> Theo {
        let p_a = 1.0 / odds_a;
        let p_b = 1.0 / odds_b;
        let p_d = 1.0 / odds_draw.unwrap_or(DEFAULT_DRAW_ODDS);
        let theo_a = (100.0 * (p_a + p_d / 2.0) / (p_a + p_b + p_d))
            .round()
            .clamp(0.0, 100.0) as u8;
        Theo {
            theo_a,
            theo_b: 100 - theo_a,
        }
    }

    /// Reduce a full odds snapshot (possibly many bookmakers per outcome) to
    /// one theo pair, blending and falling back to the two-way formula when
    /// no draw odds are reported at all.
    pub fn from_snapshot(snapshot: &OddsSnapshot) -> Result<Theo, OddsError> {
        let odds_a = blend_odds(&snapshot.odds_a).ok_or(OddsError::NoData)?;
        let odds_b = blend_odds(&snapshot.odds_b).ok_or(OddsError::NoData)?;
        let odds_draw = blend_odds(&snapshot.odds_draw);

        Ok(if snapshot.odds_draw.is_empty() {
            Self::two_way(odds_a, odds_b)
        } else {
            Self::three_way(odds_a, odds_b, odds_draw)
        })
    }
}

/// Thin HTTP adapter to an odds-api.com-shaped bookmaker feed: fetches the
/// h2h market for an event and reduces it to a two-outcome `OddsSnapshot`.
/// Out of scope as a deep integration; this is the documented aggregation
/// contract and nothing more.
pub struct OddsApiClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl OddsApiClient {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key,
        }
    }
}

#[derive(Debug, serde::Deserialize)]
struct OddsApiEvent {
    home_team: String,
    away_team: String,
    bookmakers: Vec<OddsApiBookmaker>,
}

#[derive(Debug, serde::Deserialize)]
struct OddsApiBookmaker {
    key: String,
    markets: Vec<OddsApiMarket>,
}

#[derive(Debug, serde::Deserialize)]
struct OddsApiMarket {
    key: String,
    outcomes: Vec<OddsApiOutcome>,
}

#[derive(Debug, serde::Deserialize)]
struct OddsApiOutcome {
    name: String,
    price: f64,
}

#[async_trait]
impl OddsProvider for OddsApiClient {
    async fn fetch_odds(&self, event_key: &str) -> Result<OddsSnapshot, OddsError> {
        let mut url = format!("{}/sports/{}/odds?regions=us,eu&markets=h2h", self.base_url, event_key);
        if let Some(key) = &self.api_key {
            url.push_str(&format!("&apiKey={key}"));
        }
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| OddsError::RefreshFailed(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(OddsError::RefreshFailed(format!("status {}", resp.status())));
        }
        let events: Vec<OddsApiEvent> = resp
            .json()
            .await
            .map_err(|e| OddsError::RefreshFailed(e.to_string()))?;
        let event = events.into_iter().next().ok_or(OddsError::NoData)?;

        let mut snapshot = OddsSnapshot::default();
        for bookmaker in &event.bookmakers {
            let Some(h2h) = bookmaker.markets.iter().find(|m| m.key == "h2h") else {
                continue;
            };
            for outcome in &h2h.outcomes {
                if outcome.name == event.home_team {
                    snapshot.odds_a.insert(bookmaker.key.clone(), outcome.price);
                } else if outcome.name == event.away_team {
                    snapshot.odds_b.insert(bookmaker.key.clone(), outcome.price);
                } else if outcome.name.eq_ignore_ascii_case("draw") {
                    snapshot.odds_draw.insert(bookmaker.key.clone(), outcome.price);
                }
            }
        }
        if snapshot.odds_a.is_empty() || snapshot.odds_b.is_empty() {
            return Err(OddsError::NoData);
        }
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_way_sums_to_hundred() {
        let theo = TheoEngine::two_way(1.5, 3.0);
        assert_eq!(theo.theo_a as u16 + theo.theo_b as u16, 100);
        assert_eq!(theo.theo_a, 67);
    }

    #[test]
    fn three_way_sums_to_hundred() {
        let theo = TheoEngine::three_way(2.2, 3.1, Some(3.4));
        assert_eq!(theo.theo_a as u16 + theo.theo_b as u16, 100);
    }

    #[test]
    fn three_way_without_draw_uses_default_longshot() {
        let with_default = TheoEngine::three_way(1.5, 3.0, None);
        let two_way = TheoEngine::two_way(1.5, 3.0);
        // A long-shot draw perturbs the result only slightly from the pure two-way case.
        assert!((with_default.theo_a as i16 - two_way.theo_a as i16).abs() <= 2);
    }

    #[test]
    fn american_to_decimal_matches_known_values() {
        assert!((american_to_decimal(150) - 2.5).abs() < 1e-9);
        assert!((american_to_decimal(-200) - 1.5).abs() < 1e-9);
    }

    #[test]
    fn blend_prefers_pinnacle() {
        let mut odds = BookmakerOdds::new();
        odds.insert("pinnacle".into(), 2.0);
        odds.insert("draftkings".into(), 2.4);
        let blended = blend_odds(&odds).unwrap();
        assert!(blended < 2.2); // closer to pinnacle than the plain average (2.2)
    }
}
