//! Per-match cost basis and inventory tracking, fed by two independent write
//! paths (fill stream and authoritative position stream) that are reconciled
//! by "most recent write wins" (§4.5).

use crate::types::{CostBasis, Leg, Outcome, Side};
use std::collections::HashMap;

/// A position snapshot as reported by the exchange's authoritative stream,
/// per ticker side. The venue reports non-negative per-side counts; per the
/// open question in §9, this assumption is restated here explicitly rather
/// than guessed at silently.
#[derive(Debug, Clone, Copy, Default)]
pub struct PositionUpdate {
    pub a_yes: i64,
    pub a_no: i64,
    pub b_yes: i64,
    pub b_no: i64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct InventoryState {
    pub long_a: CostBasis,
    pub long_b: CostBasis,
    pub inventory: i64,
}

impl InventoryState {
    pub fn can_bid_long_a(&self, inventory_cap: i64) -> bool {
        self.inventory < inventory_cap
    }

    pub fn can_bid_long_b(&self, inventory_cap: i64) -> bool {
        self.inventory > -inventory_cap
    }

    /// `breakeven_for_other = 99 - ceil(avg_cost) - fee_buffer`, the price at
    /// which rebalancing onto the opposite exposure becomes breakeven.
    pub fn breakeven_for_opposite(&self, exposure: Outcome, fee_buffer_cents: u8) -> Option<u8> {
        let basis = match exposure {
            Outcome::A => self.long_a,
            Outcome::B => self.long_b,
        };
        let avg_cost = basis.avg_cost()?;
        let ceil_cost = avg_cost.ceil() as i64;
        Some((99 - ceil_cost - fee_buffer_cents as i64).clamp(0, 99) as u8)
    }
}

/// In-memory cost-basis and inventory ledger, one instance per running process,
/// keyed by match id. Mutated only by stream-event handlers (§5); quoting
/// core reads by value-copy, never while holding the lock across an await.
#[derive(Default)]
pub struct InventoryLedger {
    states: HashMap<String, InventoryState>,
}

impl InventoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, match_id: &str) -> InventoryState {
        self.states.get(match_id).copied().unwrap_or_default()
    }

    /// Fill stream write path: cost is never decreased, only accumulated.
    pub fn apply_fill(&mut self, match_id: &str, leg: Leg, price: u8, count: u32) {
        let state = self.states.entry(match_id.to_string()).or_default();
        let basis = match leg.exposure() {
            Outcome::A => &mut state.long_a,
            Outcome::B => &mut state.long_b,
        };
        basis.apply_fill(price, count);
    }

    /// Authoritative position stream write path: recomputes inventory from
    /// scratch, clamping each leg's reported count at zero.
    pub fn apply_position_update(&mut self, match_id: &str, update: PositionUpdate) {
        let state = self.states.entry(match_id.to_string()).or_default();
        let a_yes = update.a_yes.max(0);
        let a_no = update.a_no.max(0);
        let b_yes = update.b_yes.max(0);
        let b_no = update.b_no.max(0);
        state.inventory = (a_yes + b_no) - (a_no + b_yes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fill_accumulates_cost_basis_on_the_right_exposure() {
        let mut ledger = InventoryLedger::new();
        ledger.apply_fill("m1", Leg::new(Outcome::A, Side::Yes), 50, 5);
        ledger.apply_fill("m1", Leg::new(Outcome::B, Side::No), 52, 3);
        let state = ledger.get("m1");
        assert_eq!(state.long_a.count, 8);
        assert_eq!(state.long_a.cost, 50 * 5 + 52 * 3);
    }

    #[test]
    fn position_update_recomputes_inventory_from_scratch() {
        let mut ledger = InventoryLedger::new();
        ledger.apply_position_update(
            "m1",
            PositionUpdate {
                a_yes: 10,
                a_no: 0,
                b_yes: 0,
                b_no: 2,
            },
        );
        assert_eq!(ledger.get("m1").inventory, 12);
    }

    #[test]
    fn negative_reported_counts_are_clamped_to_zero() {
        let mut ledger = InventoryLedger::new();
        ledger.apply_position_update(
            "m1",
            PositionUpdate {
                a_yes: -5,
                a_no: 3,
                b_yes: 0,
                b_no: 0,
            },
        );
        assert_eq!(ledger.get("m1").inventory, -3);
    }

    /// S5. inventory_cap=10, avg_cost_A=70, fee_buffer=2 -> breakeven_for_B=27.
    #[test]
    fn s5_breakeven_for_opposite_matches_scenario() {
        let mut ledger = InventoryLedger::new();
        ledger.apply_fill("m1", Leg::new(Outcome::A, Side::Yes), 70, 1);
        let state = ledger.get("m1");
        assert_eq!(state.breakeven_for_opposite(Outcome::A, 2), Some(27));
    }

    #[test]
    fn inventory_gates_respect_cap() {
        let mut ledger = InventoryLedger::new();
        ledger.apply_position_update(
            "m1",
            PositionUpdate {
                a_yes: 10,
                a_no: 0,
                b_yes: 0,
                b_no: 0,
            },
        );
        let state = ledger.get("m1");
        assert!(!state.can_bid_long_a(10));
        assert!(state.can_bid_long_b(10));
    }
}
