//! Durable fill/hedge/match persistence and P&L reporting. The pairing
//! arithmetic lives in [`calc`] as pure functions; this module is the I/O
//! shell around it — Postgres via `sqlx`, runtime-checked queries (no
//! compile-time `DATABASE_URL` dependency).

pub mod calc;

use crate::error::PnlError;
use crate::types::{Fill, Hedge, HedgeOutcome, Match, Outcome, PnlMatch, Result_, Side};
use calc::{calculate_match_pnl, get_pnl_summary, MatchInputs, MatchPnl, MidPrices, Period, PeriodTotals};
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgPoolOptions, PgPool, Row};
use std::collections::BTreeMap;

/// Durable store for fills, hedges and match metadata, plus the FIFO
/// pairing report built on top of them.
pub struct PnlJournal {
    pool: PgPool,
}

fn side_str(side: Side) -> &'static str {
    side.as_str()
}

fn parse_side(s: &str) -> Side {
    match s {
        "no" => Side::No,
        _ => Side::Yes,
    }
}

fn result_str(result: Result_) -> &'static str {
    match result {
        Result_::A => "a",
        Result_::B => "b",
    }
}

fn parse_result(s: &str) -> Option<Result_> {
    match s {
        "a" => Some(Result_::A),
        "b" => Some(Result_::B),
        _ => None,
    }
}

fn outcome_str(outcome: Outcome) -> &'static str {
    match outcome {
        Outcome::A => "a",
        Outcome::B => "b",
    }
}

fn parse_outcome(s: &str) -> Outcome {
    match s {
        "b" => Outcome::B,
        _ => Outcome::A,
    }
}

fn hedge_outcome_str(outcome: HedgeOutcome) -> &'static str {
    match outcome {
        HedgeOutcome::Win => "win",
        HedgeOutcome::Loss => "loss",
        HedgeOutcome::Push => "push",
    }
}

fn parse_hedge_outcome(s: &str) -> Option<HedgeOutcome> {
    match s {
        "win" => Some(HedgeOutcome::Win),
        "loss" => Some(HedgeOutcome::Loss),
        "push" => Some(HedgeOutcome::Push),
        _ => None,
    }
}

impl PnlJournal {
    pub async fn connect(database_url: &str) -> Result<Self, PnlError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Applies pending schema migrations. Safe to call on every startup.
    pub async fn run_migrations(&self) -> Result<(), PnlError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| PnlError::Database(sqlx::Error::Migrate(Box::new(e))))
    }

    /// Idempotent insert keyed by `fill_id`; a re-observed fill is ignored
    /// except that a late-arriving `match_id` link is applied.
    pub async fn insert_fill(&self, fill: &Fill) -> Result<(), PnlError> {
        sqlx::query(
            "INSERT INTO fills (id, ticker, side, action, price, count, is_taker, fee_cost, created_time, match_id)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
             ON CONFLICT (id) DO UPDATE SET match_id = COALESCE(fills.match_id, excluded.match_id)",
        )
        .bind(&fill.fill_id)
        .bind(&fill.ticker)
        .bind(side_str(fill.side))
        .bind(&fill.action)
        .bind(fill.price as i32)
        .bind(fill.count as i32)
        .bind(fill.is_taker)
        .bind(fill.fee_cost)
        .bind(fill.created_time)
        .bind(&fill.match_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_fills_for_match(&self, match_id: &str) -> Result<Vec<Fill>, PnlError> {
        let rows = sqlx::query(
            "SELECT id, ticker, side, action, price, count, is_taker, fee_cost, created_time, match_id
             FROM fills WHERE match_id = $1 ORDER BY created_time",
        )
        .bind(match_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(row_to_fill).collect())
    }

    pub async fn link_fills_to_match(&self, match_id: &str, ticker_a: &str, ticker_b: &str) -> Result<(), PnlError> {
        sqlx::query(
            "UPDATE fills SET match_id = $1 WHERE match_id IS NULL AND ticker IN ($2, $3)",
        )
        .bind(match_id)
        .bind(ticker_a)
        .bind(ticker_b)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn insert_hedge(&self, hedge: &Hedge) -> Result<(), PnlError> {
        sqlx::query(
            "INSERT INTO hedges (id, match_id, platform, side, stake_usd, decimal_odds, outcome, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(&hedge.id)
        .bind(&hedge.match_id)
        .bind(hedge.platform.as_str())
        .bind(outcome_str(hedge.outcome_side))
        .bind(hedge.stake_usd)
        .bind(hedge.decimal_odds)
        .bind(hedge.outcome.map(hedge_outcome_str))
        .bind(hedge.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn update_hedge_outcome(&self, hedge_id: &str, outcome: HedgeOutcome) -> Result<(), PnlError> {
        sqlx::query("UPDATE hedges SET outcome = $1 WHERE id = $2")
            .bind(hedge_outcome_str(outcome))
            .bind(hedge_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn get_hedges_for_match(&self, match_id: &str) -> Result<Vec<Hedge>, PnlError> {
        let rows = sqlx::query(
            "SELECT id, match_id, platform, side, stake_usd, decimal_odds, outcome, created_at
             FROM hedges WHERE match_id = $1 ORDER BY created_at",
        )
        .bind(match_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(row_to_hedge).collect())
    }

    pub async fn delete_hedge(&self, hedge_id: &str) -> Result<(), PnlError> {
        sqlx::query("DELETE FROM hedges WHERE id = $1")
            .bind(hedge_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Partial upsert: only non-null fields overwrite the stored row, per
    /// the COALESCE pattern the journal was grounded on.
    pub async fn upsert_match(
        &self,
        id: &str,
        ticker_a: &str,
        ticker_b: &str,
        theo_a: Option<i32>,
        theo_b: Option<i32>,
        event_time: Option<DateTime<Utc>>,
        category: Option<&str>,
    ) -> Result<(), PnlError> {
        sqlx::query(
            "INSERT INTO pnl_matches (id, ticker_a, ticker_b, theo_a, theo_b, event_time, category)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             ON CONFLICT (id) DO UPDATE SET
                theo_a = COALESCE(excluded.theo_a, pnl_matches.theo_a),
                theo_b = COALESCE(excluded.theo_b, pnl_matches.theo_b),
                event_time = COALESCE(excluded.event_time, pnl_matches.event_time),
                category = COALESCE(excluded.category, pnl_matches.category)",
        )
        .bind(id)
        .bind(ticker_a)
        .bind(ticker_b)
        .bind(theo_a)
        .bind(theo_b)
        .bind(event_time)
        .bind(category)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn mark_match_settled(&self, match_id: &str, result: Option<Result_>) -> Result<(), PnlError> {
        sqlx::query("UPDATE pnl_matches SET settled_at = now(), result_a = $1 WHERE id = $2")
            .bind(result.map(result_str))
            .bind(match_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn update_match_result(&self, match_id: &str, result: Result_) -> Result<(), PnlError> {
        sqlx::query(
            "UPDATE pnl_matches SET result_a = $1, settled_at = COALESCE(settled_at, now()) WHERE id = $2",
        )
        .bind(result_str(result))
        .bind(match_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_match(&self, match_id: &str) -> Result<Option<PnlMatch>, PnlError> {
        let row = sqlx::query(
            "SELECT id, ticker_a, ticker_b, theo_a, theo_b, event_time, settled_at, result_a, category
             FROM pnl_matches WHERE id = $1",
        )
        .bind(match_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(row_to_pnl_match))
    }

    pub async fn get_all_matches(&self) -> Result<Vec<PnlMatch>, PnlError> {
        let rows = sqlx::query(
            "SELECT id, ticker_a, ticker_b, theo_a, theo_b, event_time, settled_at, result_a, category
             FROM pnl_matches ORDER BY event_time DESC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(row_to_pnl_match).collect())
    }

    /// Resolves a single match's fills/hedges/theos/result, then hands them
    /// to the pure [`calculate_match_pnl`]. `mid_prices` is supplied by the
    /// caller (already resolved, or `None` if the oracle call failed).
    pub async fn calculate_match_pnl(
        &self,
        match_id: &str,
        mid_prices: Option<MidPrices>,
    ) -> Result<MatchPnl, PnlError> {
        let pnl_match = self
            .get_match(match_id)
            .await?
            .ok_or_else(|| PnlError::MatchNotFound(match_id.to_string()))?;
        let fills = self.get_fills_for_match(match_id).await?;
        let hedges = self.get_hedges_for_match(match_id).await?;
        Ok(calculate_match_pnl(
            &fills,
            &hedges,
            &pnl_match.ticker_a,
            &pnl_match.ticker_b,
            pnl_match.theo_a as u8,
            pnl_match.theo_b as u8,
            pnl_match.result_a,
            mid_prices,
        ))
    }

    pub async fn get_open_positions(&self) -> Result<Vec<(PnlMatch, MatchPnl)>, PnlError> {
        let matches = self.get_all_matches().await?;
        let mut open = Vec::new();
        for m in matches {
            if m.settled_at.is_some() {
                continue;
            }
            let pnl = self.calculate_match_pnl(&m.id, None).await?;
            if pnl.pairs == 0 && pnl.leftover_a_count == 0 && pnl.leftover_b_count == 0 {
                continue;
            }
            open.push((m, pnl));
        }
        Ok(open)
    }

    pub async fn get_total_pnl(&self) -> Result<MatchPnl, PnlError> {
        let matches = self.get_all_matches().await?;
        let mut totals = MatchPnl::default();
        for m in matches {
            let pnl = self.calculate_match_pnl(&m.id, None).await?;
            totals.arb_cents += pnl.arb_cents;
            totals.ev_cents += pnl.ev_cents;
            totals.av_cents += pnl.av_cents;
            totals.hedge_usd += pnl.hedge_usd;
            totals.fees_cents += pnl.fees_cents;
            totals.pairs += pnl.pairs;
        }
        totals.net_pnl_usd = totals.arb_cents as f64 / 100.0 + totals.av_cents / 100.0 + totals.hedge_usd
            - totals.fees_cents as f64 / 100.0;
        Ok(totals)
    }

    pub async fn get_pnl_summary(&self, period: Period) -> Result<BTreeMap<String, PeriodTotals>, PnlError> {
        let matches = self.get_all_matches().await?;
        let mut fills_by_match = Vec::with_capacity(matches.len());
        for m in &matches {
            fills_by_match.push(self.get_fills_for_match(&m.id).await?);
        }
        let mut hedges_by_match = Vec::with_capacity(matches.len());
        for m in &matches {
            hedges_by_match.push(self.get_hedges_for_match(&m.id).await?);
        }
        let inputs: Vec<MatchInputs> = matches
            .iter()
            .zip(fills_by_match.iter())
            .zip(hedges_by_match.iter())
            .map(|((m, fills), hedges)| MatchInputs {
                fills,
                hedges,
                ticker_a: &m.ticker_a,
                ticker_b: &m.ticker_b,
                theo_a: m.theo_a as u8,
                theo_b: m.theo_b as u8,
                result: m.result_a,
                mid_prices: None,
            })
            .collect();
        Ok(get_pnl_summary(&inputs, period))
    }
}

fn row_to_fill(row: sqlx::postgres::PgRow) -> Fill {
    Fill {
        fill_id: row.get("id"),
        ticker: row.get("ticker"),
        side: parse_side(row.get::<String, _>("side").as_str()),
        action: row.get("action"),
        price: row.get::<i32, _>("price") as u8,
        count: row.get::<i32, _>("count") as u32,
        fee_cost: row.get::<i64, _>("fee_cost"),
        is_taker: row.get("is_taker"),
        created_time: row.get("created_time"),
        match_id: row.get("match_id"),
    }
}

fn row_to_hedge(row: sqlx::postgres::PgRow) -> Hedge {
    Hedge {
        id: row.get("id"),
        match_id: row.get("match_id"),
        platform: row.get("platform"),
        outcome_side: parse_outcome(row.get::<String, _>("side").as_str()),
        stake_usd: row.get("stake_usd"),
        decimal_odds: row.get("decimal_odds"),
        outcome: row
            .get::<Option<String>, _>("outcome")
            .as_deref()
            .and_then(parse_hedge_outcome),
        created_at: row.get("created_at"),
    }
}

fn row_to_pnl_match(row: sqlx::postgres::PgRow) -> PnlMatch {
    PnlMatch {
        id: row.get("id"),
        ticker_a: row.get("ticker_a"),
        ticker_b: row.get("ticker_b"),
        theo_a: row.get::<Option<i32>, _>("theo_a").unwrap_or(50),
        theo_b: row.get::<Option<i32>, _>("theo_b").unwrap_or(50),
        event_time: row.get("event_time"),
        settled_at: row.get("settled_at"),
        result_a: row
            .get::<Option<String>, _>("result_a")
            .as_deref()
            .and_then(parse_result),
        category: row.get("category"),
    }
}

/// Convenience for callers tracking a live `Match`: records its metadata in
/// the journal so fills observed later can be linked by ticker.
pub async fn register_match(journal: &PnlJournal, m: &Match) -> Result<(), PnlError> {
    journal
        .upsert_match(
            &m.id,
            &m.market_a.ticker,
            &m.market_b.ticker,
            Some(m.market_a.theo as i32),
            Some(m.market_b.theo as i32),
            Some(m.event_time),
            Some(&m.category),
        )
        .await?;
    journal
        .link_fills_to_match(&m.id, &m.market_a.ticker, &m.market_b.ticker)
        .await
}
