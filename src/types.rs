//! Core domain types shared across every component: the two-outcome match,
//! its per-ticker markets, the order book shape, resting orders and fills.

use serde::{Deserialize, Serialize};
use std::time::Instant;

/// One of the two complementary outcome contracts in a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Outcome {
    A,
    B,
}

impl Outcome {
    pub fn other(self) -> Outcome {
        match self {
            Outcome::A => Outcome::B,
            Outcome::B => Outcome::A,
        }
    }
}

/// YES or NO side of a single market's contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Yes,
    No,
}

impl Side {
    pub fn as_str(self) -> &'static str {
        match self {
            Side::Yes => "yes",
            Side::No => "no",
        }
    }
}

/// One of the four tradable legs of a match: which outcome's market, which side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Leg {
    pub outcome: Outcome,
    pub side: Side,
}

impl Leg {
    pub const fn new(outcome: Outcome, side: Side) -> Self {
        Self { outcome, side }
    }

    /// A-YES and B-NO both pay off if A wins: the "long-A" legs.
    /// B-YES and A-NO both pay off if B wins: the "long-B" legs.
    pub fn exposure(self) -> Outcome {
        match (self.outcome, self.side) {
            (Outcome::A, Side::Yes) | (Outcome::B, Side::No) => Outcome::A,
            (Outcome::B, Side::Yes) | (Outcome::A, Side::No) => Outcome::B,
        }
    }
}

/// Top-of-book snapshot for a single ticker, both sides.
///
/// `best_no_bid` lets us derive the YES ask without a separate feed: a
/// resting NO bid at price `p` is equivalent to an offer to sell YES at
/// `100 - p`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Book {
    pub best_yes_bid: u8,
    pub best_yes_bid_qty: u32,
    pub second_yes_bid: u8,
    pub best_no_bid: u8,
    pub best_no_bid_qty: u32,
    pub second_no_bid: u8,
}

impl Book {
    pub fn yes_ask(&self) -> u8 {
        100u8.saturating_sub(self.best_no_bid)
    }

    pub fn no_ask(&self) -> u8 {
        100u8.saturating_sub(self.best_yes_bid)
    }

    pub fn best_bid(&self, side: Side) -> (u8, u32, u8) {
        match side {
            Side::Yes => (self.best_yes_bid, self.best_yes_bid_qty, self.second_yes_bid),
            Side::No => (self.best_no_bid, self.best_no_bid_qty, self.second_no_bid),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.best_yes_bid > 0 || self.best_no_bid > 0
    }
}

/// One market (ticker) within a match: its label, theo, and live book.
#[derive(Debug, Clone)]
pub struct Market {
    pub ticker: String,
    pub label: String,
    pub theo: u8,
    pub book: Book,
}

impl Market {
    pub fn new(ticker: impl Into<String>, label: impl Into<String>, theo: u8) -> Self {
        Self {
            ticker: ticker.into(),
            label: label.into(),
            theo,
            book: Book::default(),
        }
    }
}

/// Cost basis accumulated on one exposure (long-A or long-B) of a match.
#[derive(Debug, Clone, Copy, Default)]
pub struct CostBasis {
    pub cost: i64,
    pub count: i64,
}

impl CostBasis {
    pub fn avg_cost(&self) -> Option<f64> {
        if self.count == 0 {
            None
        } else {
            Some(self.cost as f64 / self.count as f64)
        }
    }

    pub fn apply_fill(&mut self, price: u8, count: u32) {
        self.cost += price as i64 * count as i64;
        self.count += count as i64;
    }
}

/// A single two-outcome event being market-made.
#[derive(Debug, Clone)]
pub struct Match {
    pub id: String,
    pub display_name: String,
    pub category: String,
    pub market_a: Market,
    pub market_b: Market,
    pub odds_a: f64,
    pub odds_b: f64,
    pub edge_min: u8,
    pub order_size: u32,
    pub inventory_cap: i64,
    pub event_time: chrono::DateTime<chrono::Utc>,
    pub active: bool,
    /// Registration-time seed values only; live inventory and cost basis are
    /// tracked by `InventoryLedger`, keyed by `id`, and read from there.
    pub inventory: i64,
    pub long_a: CostBasis,
    pub long_b: CostBasis,
    pub market_url: Option<String>,
}

impl Match {
    pub fn ticker_for(&self, outcome: Outcome) -> &str {
        match outcome {
            Outcome::A => &self.market_a.ticker,
            Outcome::B => &self.market_b.ticker,
        }
    }

    pub fn market(&self, outcome: Outcome) -> &Market {
        match outcome {
            Outcome::A => &self.market_a,
            Outcome::B => &self.market_b,
        }
    }

    pub fn market_mut(&mut self, outcome: Outcome) -> &mut Market {
        match outcome {
            Outcome::A => &mut self.market_a,
            Outcome::B => &mut self.market_b,
        }
    }

    pub fn cost_basis(&self, exposure: Outcome) -> CostBasis {
        match exposure {
            Outcome::A => self.long_a,
            Outcome::B => self.long_b,
        }
    }

    pub fn cost_basis_mut(&mut self, exposure: Outcome) -> &mut CostBasis {
        match exposure {
            Outcome::A => &mut self.long_a,
            Outcome::B => &mut self.long_b,
        }
    }

    pub fn is_past_event_time(&self, now: chrono::DateTime<chrono::Utc>) -> bool {
        now >= self.event_time
    }

    pub fn all_legs(&self) -> [Leg; 4] {
        [
            Leg::new(Outcome::A, Side::Yes),
            Leg::new(Outcome::A, Side::No),
            Leg::new(Outcome::B, Side::Yes),
            Leg::new(Outcome::B, Side::No),
        ]
    }
}

/// Key identifying one resting-order slot: at most one order per key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OrderKey {
    pub match_id: String,
    pub ticker: String,
    pub side: Side,
}

impl OrderKey {
    pub fn new(match_id: impl Into<String>, ticker: impl Into<String>, side: Side) -> Self {
        Self {
            match_id: match_id.into(),
            ticker: ticker.into(),
            side,
        }
    }
}

/// A live resting order tracked by the reconciler.
#[derive(Debug, Clone)]
pub struct RestingOrder {
    pub order_id: String,
    pub match_id: String,
    pub ticker: String,
    pub side: Side,
    pub price: u8,
    pub size: u32,
    pub placed_at: Instant,
    pub filled_count: u32,
    pub overbid_since: Option<Instant>,
}

/// A single observed fill, append-only, idempotent by `fill_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fill {
    pub fill_id: String,
    pub ticker: String,
    pub side: Side,
    /// Always `"buy"`: the exchange's buy-only order model (§9 "ask-side
    /// quoting" decision) expresses selling YES as buying NO instead.
    pub action: String,
    pub price: u8,
    pub count: u32,
    pub fee_cost: i64,
    pub is_taker: bool,
    pub created_time: chrono::DateTime<chrono::Utc>,
    pub match_id: Option<String>,
}

/// Settlement outcome recorded once a match resolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Result_ {
    A,
    B,
}

/// One row per match ever seen by the journal.
#[derive(Debug, Clone)]
pub struct PnlMatch {
    pub id: String,
    pub ticker_a: String,
    pub ticker_b: String,
    pub theo_a: i32,
    pub theo_b: i32,
    pub event_time: chrono::DateTime<chrono::Utc>,
    pub settled_at: Option<chrono::DateTime<chrono::Utc>>,
    pub result_a: Option<Result_>,
    pub category: Option<String>,
}

/// An outcome of a hedge placed manually by the operator on another venue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HedgeOutcome {
    Win,
    Loss,
    Push,
}

/// An externally-placed hedge the operator records against a match.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hedge {
    pub id: String,
    pub match_id: String,
    pub platform: String,
    pub outcome_side: Outcome,
    pub stake_usd: f64,
    pub decimal_odds: f64,
    pub outcome: Option<HedgeOutcome>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl Hedge {
    /// `stake*(odds-1)` on win, `-stake` on loss, 0 on push or unsettled.
    pub fn pnl_usd(&self) -> f64 {
        match self.outcome {
            Some(HedgeOutcome::Win) => self.stake_usd * (self.decimal_odds - 1.0),
            Some(HedgeOutcome::Loss) => -self.stake_usd,
            Some(HedgeOutcome::Push) | None => 0.0,
        }
    }
}
