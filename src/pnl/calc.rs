//! Pure P&L decomposition: FIFO arb pairing plus EV/AV leftover valuation.
//! No I/O, no clock reads — every input is a plain value, so
//! `calculate_match_pnl` is deterministic in its inputs by construction
//! (testable property #6).

use crate::types::{Fill, Hedge, Outcome, Result_, Side};
use chrono::{Datelike, NaiveDate};
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Period {
    Daily,
    Weekly,
    Monthly,
}

pub fn period_key(date: NaiveDate, period: Period) -> String {
    match period {
        Period::Daily => date.format("%Y-%m-%d").to_string(),
        Period::Weekly => {
            let iso = date.iso_week();
            format!("{}-W{:02}", iso.year(), iso.week())
        }
        Period::Monthly => date.format("%Y-%m").to_string(),
    }
}

/// One fill reduced to the fields the pairing algorithm needs, preserving
/// chronological order on the side it was classified into.
#[derive(Debug, Clone, Copy)]
struct Leg {
    price: u8,
    count: u32,
    date: NaiveDate,
}

fn classify(fill: &Fill, ticker_a: &str, ticker_b: &str) -> Option<Outcome> {
    match (fill.ticker == ticker_a, fill.ticker == ticker_b, fill.side) {
        (true, _, Side::Yes) => Some(Outcome::A), // A-YES: long-A
        (_, true, Side::No) => Some(Outcome::A),  // B-NO: long-A
        (_, true, Side::Yes) => Some(Outcome::B), // B-YES: long-B
        (true, _, Side::No) => Some(Outcome::B),  // A-NO: long-B
        _ => None,
    }
}

fn legs_for(fills: &[Fill], ticker_a: &str, ticker_b: &str, exposure: Outcome) -> Vec<Leg> {
    let mut legs: Vec<Leg> = fills
        .iter()
        .filter(|f| classify(f, ticker_a, ticker_b) == Some(exposure))
        .map(|f| Leg {
            price: f.price,
            count: f.count,
            date: f.created_time.date_naive(),
        })
        .collect();
    legs.sort_by_key(|l| l.date);
    legs
}

struct PairResult {
    arb_cents: i64,
    pairs: u32,
    bucket_arb: Vec<(NaiveDate, i64)>,
    leftover_a: Vec<Leg>,
    leftover_b: Vec<Leg>,
}

/// Two-pointer FIFO pairing: walks both leg queues simultaneously, pairing
/// the smallest available remainder on each side, crediting the arb from
/// each matched slice to the later of the two legs' dates.
fn pair_fifo(legs_a: &[Leg], legs_b: &[Leg]) -> PairResult {
    let mut i = 0usize;
    let mut j = 0usize;
    let mut remaining_a = legs_a.first().map(|l| l.count).unwrap_or(0);
    let mut remaining_b = legs_b.first().map(|l| l.count).unwrap_or(0);

    let mut arb_cents = 0i64;
    let mut pairs = 0u32;
    let mut bucket_arb: Vec<(NaiveDate, i64)> = Vec::new();

    while i < legs_a.len() && j < legs_b.len() {
        let take = remaining_a.min(remaining_b);
        if take > 0 {
            let a = legs_a[i];
            let b = legs_b[j];
            let take_arb = (100i64 - a.price as i64 - b.price as i64) * take as i64;
            arb_cents += take_arb;
            pairs += take;
            bucket_arb.push((a.date.max(b.date), take_arb));
            remaining_a -= take;
            remaining_b -= take;
        }
        if remaining_a == 0 {
            i += 1;
            if i < legs_a.len() {
                remaining_a = legs_a[i].count;
            }
        }
        if remaining_b == 0 {
            j += 1;
            if j < legs_b.len() {
                remaining_b = legs_b[j].count;
            }
        }
    }

    let mut leftover_a = Vec::new();
    if remaining_a > 0 && i < legs_a.len() {
        leftover_a.push(Leg { count: remaining_a, ..legs_a[i] });
        leftover_a.extend_from_slice(&legs_a[i + 1..]);
    }
    let mut leftover_b = Vec::new();
    if remaining_b > 0 && j < legs_b.len() {
        leftover_b.push(Leg { count: remaining_b, ..legs_b[j] });
        leftover_b.extend_from_slice(&legs_b[j + 1..]);
    }

    PairResult {
        arb_cents,
        pairs,
        bucket_arb,
        leftover_a,
        leftover_b,
    }
}

/// Mid-price oracle result, resolved by the caller before this pure function
/// is invoked: a failed oracle call is represented as `None`, matching the
/// original implementation's fail-open-to-zero behavior (§4.6).
#[derive(Debug, Clone, Copy)]
pub struct MidPrices {
    pub mid_a_cents: f64,
    pub mid_b_cents: f64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MatchPnl {
    pub pairs: u32,
    pub arb_cents: i64,
    pub leftover_a_count: u32,
    pub leftover_b_count: u32,
    pub ev_cents: f64,
    pub av_cents: f64,
    pub hedge_usd: f64,
    pub fees_cents: i64,
    pub net_pnl_usd: f64,
}

fn leftover_ev(theo: u8, legs: &[Leg]) -> (u32, f64) {
    let count: u32 = legs.iter().map(|l| l.count).sum();
    let cost: i64 = legs.iter().map(|l| l.price as i64 * l.count as i64).sum();
    (count, theo as f64 * count as f64 - cost as f64)
}

fn leftover_cost(legs: &[Leg]) -> i64 {
    legs.iter().map(|l| l.price as i64 * l.count as i64).sum()
}

/// `calculate_match_pnl`: deterministic in `(fills, hedges, theos, result,
/// mid_price_oracle)`. Identical inputs yield identical outputs.
pub fn calculate_match_pnl(
    fills: &[Fill],
    hedges: &[Hedge],
    ticker_a: &str,
    ticker_b: &str,
    theo_a: u8,
    theo_b: u8,
    result: Option<Result_>,
    mid_prices: Option<MidPrices>,
) -> MatchPnl {
    let legs_a = legs_for(fills, ticker_a, ticker_b, Outcome::A);
    let legs_b = legs_for(fills, ticker_a, ticker_b, Outcome::B);

    let pair_result = pair_fifo(&legs_a, &legs_b);

    let (leftover_a_count, ev_a) = leftover_ev(theo_a, &pair_result.leftover_a);
    let (leftover_b_count, ev_b) = leftover_ev(theo_b, &pair_result.leftover_b);
    let ev_cents = ev_a + ev_b;

    let leftover_cost_a = leftover_cost(&pair_result.leftover_a);
    let leftover_cost_b = leftover_cost(&pair_result.leftover_b);

    let av_cents = match result {
        Some(Result_::A) => {
            100.0 * leftover_a_count as f64 - leftover_cost_a as f64 - leftover_cost_b as f64
        }
        Some(Result_::B) => {
            100.0 * leftover_b_count as f64 - leftover_cost_b as f64 - leftover_cost_a as f64
        }
        None => match mid_prices {
            Some(mid) => {
                mid.mid_a_cents * leftover_a_count as f64 - leftover_cost_a as f64
                    + mid.mid_b_cents * leftover_b_count as f64
                    - leftover_cost_b as f64
            }
            None => 0.0,
        },
    };

    let hedge_usd: f64 = hedges.iter().map(Hedge::pnl_usd).sum();
    let fees_cents: i64 = fills.iter().map(|f| f.fee_cost).sum();

    let net_pnl_usd =
        pair_result.arb_cents as f64 / 100.0 + av_cents / 100.0 + hedge_usd - fees_cents as f64 / 100.0;

    MatchPnl {
        pairs: pair_result.pairs,
        arb_cents: pair_result.arb_cents,
        leftover_a_count,
        leftover_b_count,
        ev_cents,
        av_cents,
        hedge_usd,
        fees_cents,
        net_pnl_usd,
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct PeriodTotals {
    pub arb_cents: i64,
    pub ev_cents: f64,
    pub av_cents: f64,
}

/// One match's worth of inputs to a period summary pass.
pub struct MatchInputs<'a> {
    pub fills: &'a [Fill],
    pub hedges: &'a [Hedge],
    pub ticker_a: &'a str,
    pub ticker_b: &'a str,
    pub theo_a: u8,
    pub theo_b: u8,
    pub result: Option<Result_>,
    pub mid_prices: Option<MidPrices>,
}

/// Walks every match's fills, crediting each closed pair's arb to the later
/// of its two legs' date buckets, crediting leftover EV/AV to each leftover
/// fill's own date bucket, and crediting each match's hedges to the bucket
/// of its earliest fill.
pub fn get_pnl_summary(matches: &[MatchInputs], period: Period) -> BTreeMap<String, PeriodTotals> {
    let mut totals: BTreeMap<String, PeriodTotals> = BTreeMap::new();

    for m in matches {
        let legs_a = legs_for(m.fills, m.ticker_a, m.ticker_b, Outcome::A);
        let legs_b = legs_for(m.fills, m.ticker_a, m.ticker_b, Outcome::B);
        let pair_result = pair_fifo(&legs_a, &legs_b);

        for (date, arb) in &pair_result.bucket_arb {
            let key = period_key(*date, period);
            totals.entry(key).or_default().arb_cents += arb;
        }

        for leg in &pair_result.leftover_a {
            let key = period_key(leg.date, period);
            let entry = totals.entry(key).or_default();
            entry.ev_cents += m.theo_a as f64 * leg.count as f64 - leg.price as f64 * leg.count as f64;
            let av = match m.result {
                Some(Result_::A) => 100.0 * leg.count as f64 - leg.price as f64 * leg.count as f64,
                Some(Result_::B) => -(leg.price as f64 * leg.count as f64),
                None => m
                    .mid_prices
                    .map(|mid| mid.mid_a_cents * leg.count as f64 - leg.price as f64 * leg.count as f64)
                    .unwrap_or(0.0),
            };
            entry.av_cents += av;
        }
        for leg in &pair_result.leftover_b {
            let key = period_key(leg.date, period);
            let entry = totals.entry(key).or_default();
            entry.ev_cents += m.theo_b as f64 * leg.count as f64 - leg.price as f64 * leg.count as f64;
            let av = match m.result {
                Some(Result_::B) => 100.0 * leg.count as f64 - leg.price as f64 * leg.count as f64,
                Some(Result_::A) => -(leg.price as f64 * leg.count as f64),
                None => m
                    .mid_prices
                    .map(|mid| mid.mid_b_cents * leg.count as f64 - leg.price as f64 * leg.count as f64)
                    .unwrap_or(0.0),
            };
            entry.av_cents += av;
        }

        if !m.hedges.is_empty() {
            if let Some(first_date) = m.fills.iter().map(|f| f.created_time.date_naive()).min() {
                let key = period_key(first_date, period);
                let hedge_usd: f64 = m.hedges.iter().map(Hedge::pnl_usd).sum();
                totals.entry(key).or_default().av_cents += hedge_usd * 100.0;
            }
        }
    }

    totals
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Side;
    use chrono::{TimeZone, Utc};

    fn fill(ticker: &str, side: Side, price: u8, count: u32, date: &str) -> Fill {
        Fill {
            fill_id: format!("{ticker}-{side:?}-{price}-{date}"),
            ticker: ticker.to_string(),
            side,
            action: "buy".to_string(),
            price,
            count,
            fee_cost: 0,
            is_taker: false,
            created_time: Utc.from_utc_datetime(
                &chrono::NaiveDate::parse_from_str(date, "%Y-%m-%d")
                    .unwrap()
                    .and_hms_opt(12, 0, 0)
                    .unwrap(),
            ),
            match_id: Some("m1".into()),
        }
    }

    /// S7. FIFO pairing and period bucketing.
    #[test]
    fn s7_fifo_pairing_and_period_bucketing() {
        let fills = vec![
            fill("T-A", Side::Yes, 50, 5, "2024-03-01"),
            fill("T-B", Side::Yes, 48, 3, "2024-03-01"),
            fill("T-B", Side::Yes, 49, 4, "2024-03-02"),
            fill("T-A", Side::Yes, 51, 2, "2024-03-02"),
        ];
        let pnl = calculate_match_pnl(&fills, &[], "T-A", "T-B", 50, 50, None, None);
        assert_eq!(pnl.pairs, 7);
        assert_eq!(pnl.arb_cents, 8);
        assert_eq!(pnl.leftover_a_count, 0);
        assert_eq!(pnl.leftover_b_count, 0);

        let inputs = [MatchInputs {
            fills: &fills,
            hedges: &[],
            ticker_a: "T-A",
            ticker_b: "T-B",
            theo_a: 50,
            theo_b: 50,
            result: None,
            mid_prices: None,
        }];
        let summary = get_pnl_summary(&inputs, Period::Daily);
        assert_eq!(summary["2024-03-01"].arb_cents, 6);
        assert_eq!(summary["2024-03-02"].arb_cents, 2);
    }

    #[test]
    fn arb_formula_matches_pairs_and_cost() {
        let fills = vec![
            fill("T-A", Side::Yes, 40, 10, "2024-01-01"),
            fill("T-B", Side::Yes, 55, 6, "2024-01-02"),
        ];
        let pnl = calculate_match_pnl(&fills, &[], "T-A", "T-B", 45, 55, None, None);
        assert_eq!(pnl.pairs, 6);
        assert_eq!(pnl.arb_cents, 100 * 6 - 40 * 6 - 55 * 6);
        assert_eq!(pnl.leftover_a_count, 4);
    }

    #[test]
    fn determinism_same_inputs_same_outputs() {
        let fills = vec![fill("T-A", Side::Yes, 40, 10, "2024-01-01")];
        let a = calculate_match_pnl(&fills, &[], "T-A", "T-B", 45, 55, None, None);
        let b = calculate_match_pnl(&fills, &[], "T-A", "T-B", 45, 55, None, None);
        assert_eq!(a.arb_cents, b.arb_cents);
        assert_eq!(a.ev_cents, b.ev_cents);
        assert_eq!(a.av_cents, b.av_cents);
    }

    #[test]
    fn settled_result_pays_winning_leftover_at_par() {
        let fills = vec![fill("T-A", Side::Yes, 40, 5, "2024-01-01")];
        let pnl = calculate_match_pnl(&fills, &[], "T-A", "T-B", 45, 55, Some(Result_::A), None);
        assert_eq!(pnl.av_cents, 100.0 * 5.0 - 40.0 * 5.0);
    }

    #[test]
    fn fee_cost_is_summed_across_all_fills() {
        let mut f1 = fill("T-A", Side::Yes, 40, 5, "2024-01-01");
        f1.fee_cost = 3;
        let mut f2 = fill("T-B", Side::Yes, 55, 5, "2024-01-01");
        f2.fee_cost = 2;
        let pnl = calculate_match_pnl(&[f1, f2], &[], "T-A", "T-B", 45, 55, None, None);
        assert_eq!(pnl.fees_cents, 5);
    }
}
