//! Pure target-price decision function for a single leg. No I/O, no clock
//! reads beyond what the caller passes in — every input is a plain value so
//! the decision table is exhaustively unit-testable.

/// The resolved target for a leg: a concrete price, a refusal to quote, or a
/// forced quote at the clamped price (ceiling for bids, floor for asks).
///
/// Both `must_quote` outcomes share this one enum so callers never special
/// case bid vs. ask: the carried price is already the correct clamp for
/// whichever side was asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriceTarget {
    Price(u8),
    BackOff,
    ForcedAtCeiling(u8),
}

impl PriceTarget {
    pub fn as_price(self) -> Option<u8> {
        match self {
            PriceTarget::Price(p) | PriceTarget::ForcedAtCeiling(p) => Some(p),
            PriceTarget::BackOff => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuoteSide {
    Bid,
    Ask,
}

/// Everything `AdaptivePricer` needs to decide one leg's target price.
#[derive(Debug, Clone, Copy)]
pub struct PricerInput {
    pub theo: u8,
    pub best: u8,
    pub second: u8,
    pub best_qty: u32,
    pub current_price: Option<u8>,
    pub our_size: u32,
    pub edge_min: u8,
    pub side: QuoteSide,
    pub sticky: bool,
    pub is_retest: bool,
    pub must_quote: bool,
}

impl PricerInput {
    /// `floor(theo - edge_min)` for bids, `ceil(theo + edge_min) + 1` for asks.
    /// For bids this is the maximum price preserving edge_min below theo; for
    /// asks it is the minimum price preserving edge_min above theo.
    fn clamp_bound(&self) -> u8 {
        match self.side {
            QuoteSide::Bid => self.theo.saturating_sub(self.edge_min),
            QuoteSide::Ask => (self.theo + self.edge_min + 1).min(100),
        }
    }
}

/// Decide the target price for one leg. Bids chase upward toward `ceiling`
/// from below; asks chase downward toward `floor` from above — the two are
/// mirror images of the same comparisons, so a single implementation handles
/// both by flipping the relevant inequalities on `side`.
pub fn decide(input: PricerInput) -> PriceTarget {
    let bound = input.clamp_bound();
    let is_bid = matches!(input.side, QuoteSide::Bid);

    let we_lead = match input.current_price {
        Some(current) => current == input.best,
        None => false,
    };

    if we_lead {
        let current = input.current_price.unwrap();
        let others_joined = input.best_qty > input.our_size;
        if others_joined {
            let has_room = if is_bid {
                current < bound
            } else {
                current > bound
            };
            if has_room {
                return PriceTarget::Price(step_toward_bound(current, is_bid));
            }
            // At the bound already with others joined: fall through to the
            // same stickiness/retest choice as the no-contention case.
        }
        if input.sticky && !input.is_retest {
            return PriceTarget::Price(current);
        }
        // Sticky expired or retest due: drop to just above/below the
        // second-best competitor.
        let retest_price = if is_bid {
            (input.second + 1).max(1)
        } else {
            input.second.saturating_sub(1).max(bound)
        };
        return PriceTarget::Price(clamp_to_bound(retest_price, bound, is_bid));
    }

    // Competitor leads, or we have no resting order yet.
    let competitor_past_bound = if is_bid {
        input.best > bound
    } else {
        input.best > 0 && input.best < bound
    };

    if competitor_past_bound {
        return if input.must_quote {
            PriceTarget::ForcedAtCeiling(bound)
        } else {
            PriceTarget::BackOff
        };
    }

    let outbid = step_toward_bound(input.best, is_bid);
    PriceTarget::Price(clamp_to_bound(outbid, bound, is_bid))
}

fn step_toward_bound(price: u8, is_bid: bool) -> u8 {
    if is_bid {
        price.saturating_add(1)
    } else {
        price.saturating_sub(1)
    }
}

fn clamp_to_bound(price: u8, bound: u8, is_bid: bool) -> u8 {
    if is_bid {
        price.min(bound).max(1)
    } else {
        price.max(bound).min(99)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bid(theo: u8, edge_min: u8) -> PricerInput {
        PricerInput {
            theo,
            best: 0,
            second: 0,
            best_qty: 0,
            current_price: None,
            our_size: 5,
            edge_min,
            side: QuoteSide::Bid,
            sticky: true,
            is_retest: false,
            must_quote: false,
        }
    }

    /// S1. Basic adaptive outbid: theo=60, edge=2 -> ceiling=58, best=52 (qty 10), no resting order.
    #[test]
    fn s1_basic_adaptive_outbid() {
        let input = PricerInput {
            best: 52,
            best_qty: 10,
            ..bid(60, 2)
        };
        assert_eq!(decide(input), PriceTarget::Price(53));
    }

    /// S2. Sticky hold: ceiling=58, resting=58, best=58, best_qty==our_size, not retest.
    #[test]
    fn s2_sticky_hold() {
        let input = PricerInput {
            best: 58,
            best_qty: 5,
            current_price: Some(58),
            ..bid(60, 2)
        };
        assert_eq!(decide(input), PriceTarget::Price(58));
    }

    /// S3. Tie at top: ceiling=59 (edge=1), resting=58, best=58, best_qty(12) > our_size(5).
    #[test]
    fn s3_tie_at_top_takes_priority() {
        let input = PricerInput {
            best: 58,
            best_qty: 12,
            current_price: Some(58),
            ..bid(60, 1)
        };
        assert_eq!(decide(input), PriceTarget::Price(59));
    }

    /// Given best > ceiling and not must_quote -> BACK_OFF.
    #[test]
    fn backs_off_when_competitor_above_ceiling() {
        let input = PricerInput {
            best: 59,
            best_qty: 3,
            ..bid(60, 2) // ceiling 58
        };
        assert_eq!(decide(input), PriceTarget::BackOff);
    }

    /// Given best > ceiling and must_quote -> ForcedAtCeiling(ceiling).
    #[test]
    fn forces_quote_at_ceiling_when_must_quote() {
        let input = PricerInput {
            best: 59,
            best_qty: 3,
            must_quote: true,
            ..bid(60, 2)
        };
        assert_eq!(decide(input), PriceTarget::ForcedAtCeiling(58));
    }

    #[test]
    fn output_never_exceeds_ceiling_for_bids() {
        for best in 0u8..=99 {
            let input = PricerInput {
                best,
                best_qty: 3,
                must_quote: true,
                ..bid(60, 2)
            };
            if let PriceTarget::Price(p) | PriceTarget::ForcedAtCeiling(p) = decide(input) {
                assert!(p <= 58, "price {p} exceeded ceiling for best={best}");
            }
        }
    }

    #[test]
    fn ask_side_mirrors_bid_decisions() {
        let ask_input = PricerInput {
            theo: 40,
            best: 48,
            second: 50,
            best_qty: 10,
            current_price: None,
            our_size: 5,
            edge_min: 2,
            side: QuoteSide::Ask,
            sticky: true,
            is_retest: false,
            must_quote: false,
        };
        // floor = ceil(40+2)+1 = 43; competitor at 48 is above the floor, not below it,
        // so we undercut by one toward the floor.
        assert_eq!(decide(ask_input), PriceTarget::Price(47));
    }
}
