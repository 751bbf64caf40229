//! `QuotingCore`: the per-match evaluation loop and the single owned `World`
//! aggregate root holding every live component (§9 "no hidden globals" design
//! note). One `World` is constructed in `main` and shared behind an `Arc`;
//! every handler takes `&self` and reaches into its own internally-locked
//! state rather than closing over ambient statics.

use crate::book_cache::BookCache;
use crate::gateway::stream::{delta_into_cache, snapshot_into_cache};
use crate::gateway::Event;
use crate::inventory::InventoryLedger;
use crate::pricer::{decide, PriceTarget, PricerInput, QuoteSide};
use crate::reconciler::{OrderReconciler, ReconcileTarget};
use crate::types::{Fill, Leg, Match, Outcome, OrderKey, Side};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tracing::{info, warn};

/// Maximum time a resting order is allowed to live before the reconciler
/// would need to re-place it anyway; mirrors the 60s default TTL the
/// inventory-aware pricing strategy this was adapted from used.
const ORDER_TTL: ChronoDuration = ChronoDuration::seconds(60);

pub struct World {
    matches: RwLock<HashMap<String, Match>>,
    books: BookCache,
    inventory: Mutex<InventoryLedger>,
    reconciler: Arc<OrderReconciler>,
    fee_buffer_cents: u8,
    sticky_reset: std::sync::RwLock<std::time::Duration>,
    fill_sink: Option<mpsc::UnboundedSender<Fill>>,
    kill_switch: watch::Sender<bool>,
}

impl World {
    pub fn new(reconciler: Arc<OrderReconciler>, fee_buffer_cents: u8, sticky_reset: std::time::Duration) -> Self {
        let (kill_switch, _) = watch::channel(false);
        Self {
            matches: RwLock::new(HashMap::new()),
            books: BookCache::new(),
            inventory: Mutex::new(InventoryLedger::new()),
            reconciler,
            fee_buffer_cents,
            sticky_reset: std::sync::RwLock::new(sticky_reset),
            fill_sink: None,
            kill_switch,
        }
    }

    /// Engages the kill switch: every subsequent `evaluate_match` call becomes
    /// a no-op until the process restarts (§7 emergency-stop semantics). Does
    /// not itself cancel resting orders; callers pair this with `cancel_all`.
    pub fn kill(&self) {
        let _ = self.kill_switch.send(true);
    }

    pub fn is_killed(&self) -> bool {
        *self.kill_switch.borrow()
    }

    /// A receiver `main` can select on to shut down the process the moment
    /// the operator API engages the kill switch, the same as a ctrl-c signal.
    pub fn kill_signal(&self) -> watch::Receiver<bool> {
        self.kill_switch.subscribe()
    }

    /// Applied to the next evaluation of each match; in-flight stickiness
    /// windows are unaffected (§9 "operator-tunable" note).
    pub fn set_sticky_reset(&self, d: std::time::Duration) {
        *self.sticky_reset.write().unwrap() = d;
    }

    pub fn reconciler(&self) -> &Arc<OrderReconciler> {
        &self.reconciler
    }

    pub async fn inventory_snapshot(&self, match_id: &str) -> crate::inventory::InventoryState {
        self.inventory.lock().await.get(match_id)
    }

    pub fn with_fill_sink(mut self, sink: mpsc::UnboundedSender<Fill>) -> Self {
        self.fill_sink = Some(sink);
        self
    }

    pub async fn upsert_match(&self, m: Match) {
        self.matches.write().await.insert(m.id.clone(), m);
    }

    pub async fn match_ids(&self) -> Vec<String> {
        self.matches.read().await.keys().cloned().collect()
    }

    pub async fn get_match(&self, match_id: &str) -> Option<Match> {
        self.matches.read().await.get(match_id).cloned()
    }

    /// Finds which match (and which outcome) owns a given ticker. Linear in
    /// the number of live matches, which is small enough not to warrant a
    /// second index (§2 scale note).
    async fn resolve_ticker(&self, ticker: &str) -> Option<(String, Outcome)> {
        let matches = self.matches.read().await;
        for m in matches.values() {
            if m.market_a.ticker == ticker {
                return Some((m.id.clone(), Outcome::A));
            }
            if m.market_b.ticker == ticker {
                return Some((m.id.clone(), Outcome::B));
            }
        }
        None
    }

    /// Dispatches one stream event into the book cache, inventory ledger, or
    /// fill sink. Never touches the reconciler: order placement only happens
    /// from `evaluate_match`'s periodic tick (§5).
    pub async fn handle_event(&self, event: Event) {
        match event {
            Event::OrderbookSnapshot(s) => {
                self.books.apply_snapshot(snapshot_into_cache(s.ticker, s.yes, s.no));
            }
            Event::OrderbookDelta(d) => {
                self.books.apply_delta(delta_into_cache(d.ticker, d.yes, d.no));
            }
            Event::Fill(fill) => {
                let Some((match_id, outcome)) = self.resolve_ticker(&fill.ticker).await else {
                    warn!(ticker = %fill.ticker, "fill for unknown ticker");
                    return;
                };
                let leg = Leg::new(outcome, fill.side);
                self.inventory.lock().await.apply_fill(&match_id, leg, fill.price, fill.count);

                let mut fill = fill;
                fill.match_id = Some(match_id);
                if let Some(sink) = &self.fill_sink {
                    let _ = sink.send(fill);
                }
            }
            Event::PositionUpdate { ticker, update } => {
                let Some((match_id, _)) = self.resolve_ticker(&ticker).await else {
                    warn!(ticker = %ticker, "position update for unknown ticker");
                    return;
                };
                self.inventory.lock().await.apply_position_update(&match_id, update);
            }
        }
    }

    /// One tick of the per-match evaluation in §4.3:
    /// 1. Event-time cutoff deactivates the match and cancels its orders.
    /// 2. Inventory gates decide which legs may bid at all.
    /// 3. Rebalance ceilings relax `edge_min` on the non-capped exposure.
    /// 4. Each of the four legs is priced independently by `AdaptivePricer`.
    /// 5. The four reconciliation requests are issued concurrently.
    pub async fn evaluate_match(&self, match_id: &str, now: DateTime<Utc>) {
        if self.is_killed() {
            return;
        }

        let Some(snapshot) = self.get_match(match_id).await else {
            return;
        };

        if snapshot.is_past_event_time(now) {
            if snapshot.active {
                self.deactivate(match_id, &snapshot, now).await;
            }
            return;
        }

        if !snapshot.active {
            return;
        }

        let inv = self.inventory.lock().await.get(match_id);
        let expiration = (now + ORDER_TTL).min(snapshot.event_time);

        let legs = snapshot.all_legs();
        let mut handles = Vec::with_capacity(legs.len());
        for leg in legs {
            let target = self.target_for_leg(&snapshot, leg, &inv);
            let key = OrderKey::new(snapshot.id.clone(), snapshot.ticker_for(leg.outcome).to_string(), leg.side);
            let reconciler = self.reconciler.clone();
            let size = snapshot.order_size;
            handles.push(tokio::spawn(async move {
                if let Err(err) = reconciler.reconcile(key.clone(), target, size, expiration).await {
                    warn!(?key, error = %err, "reconciliation failed");
                }
            }));
        }
        for handle in handles {
            let _ = handle.await;
        }
    }

    fn target_for_leg(&self, m: &Match, leg: Leg, inv: &crate::inventory::InventoryState) -> ReconcileTarget {
        let exposure = leg.exposure();
        let own_side_capped = match exposure {
            Outcome::A => !inv.can_bid_long_a(m.inventory_cap),
            Outcome::B => !inv.can_bid_long_b(m.inventory_cap),
        };
        if own_side_capped {
            return ReconcileTarget::Gated;
        }

        let opposite_capped = match exposure {
            Outcome::A => !inv.can_bid_long_b(m.inventory_cap),
            Outcome::B => !inv.can_bid_long_a(m.inventory_cap),
        };
        let rebalance_breakeven = opposite_capped.then(|| inv.breakeven_for_opposite(exposure.other(), self.fee_buffer_cents)).flatten();

        // `Market::theo` is quoted for the YES contract; a NO leg's fair
        // price is the complement.
        let market_theo = m.market(leg.outcome).theo;
        let theo = match leg.side {
            Side::Yes => market_theo,
            Side::No => 100u8.saturating_sub(market_theo),
        };
        // A rebalance ceiling replaces theo, not edge_min: the pricer always
        // computes its ceiling as `theo - edge_min`, so reaching a ceiling of
        // `breakeven` means substituting `breakeven + edge_min` as theo here,
        // keeping edge_min untouched. Deriving an edge_min delta from
        // `theo - breakeven` instead saturates to 0 whenever the breakeven
        // exceeds theo, silently producing a ceiling of theo itself.
        let effective_theo = match rebalance_breakeven {
            Some(breakeven) => breakeven.saturating_add(m.edge_min),
            None => theo,
        };

        let book = m.market(leg.outcome).book;
        let (best, best_qty, second) = book.best_bid(leg.side);
        let key = OrderKey::new(m.id.clone(), m.ticker_for(leg.outcome).to_string(), leg.side);
        let resting = self.reconciler.resting_order(&key);
        let (current_price, sticky, is_retest) = match &resting {
            Some(order) => {
                let elapsed = order.placed_at.elapsed();
                let sticky = elapsed < *self.sticky_reset.read().unwrap();
                (Some(order.price), sticky, !sticky)
            }
            None => (None, false, false),
        };

        let target = decide(PricerInput {
            theo: effective_theo,
            best,
            second,
            best_qty,
            current_price,
            our_size: m.order_size,
            edge_min: m.edge_min,
            side: QuoteSide::Bid,
            sticky,
            is_retest,
            must_quote: rebalance_breakeven.is_some(),
        });

        match target {
            PriceTarget::Price(p) | PriceTarget::ForcedAtCeiling(p) => ReconcileTarget::Price(p),
            PriceTarget::BackOff => ReconcileTarget::BackOff,
        }
    }

    async fn deactivate(&self, match_id: &str, snapshot: &Match, now: DateTime<Utc>) {
        info!(match_id, "match past event time, deactivating and cancelling orders");
        for leg in snapshot.all_legs() {
            let key = OrderKey::new(match_id.to_string(), snapshot.ticker_for(leg.outcome).to_string(), leg.side);
            if let Err(err) = self.reconciler.reconcile(key.clone(), ReconcileTarget::Gated, 0, now).await {
                warn!(?key, error = %err, "failed to cancel leg during deactivation");
            }
        }
        if let Some(m) = self.matches.write().await.get_mut(match_id) {
            m.active = false;
        }
    }

    /// Allows the operator API to resume quoting a match before its event
    /// time, per the design note that Inactive→Active transitions are valid
    /// only prior to event time.
    pub async fn reactivate(&self, match_id: &str, now: DateTime<Utc>) -> bool {
        let mut matches = self.matches.write().await;
        match matches.get_mut(match_id) {
            Some(m) if now < m.event_time => {
                m.active = true;
                true
            }
            _ => false,
        }
    }

    pub async fn start_all(&self, now: DateTime<Utc>) -> usize {
        let ids = self.match_ids().await;
        let mut started = 0;
        for id in ids {
            if self.reactivate(&id, now).await {
                started += 1;
            }
        }
        started
    }

    /// Operator-initiated stop: cancels resting orders and deactivates the
    /// match regardless of event time, unlike the automatic `deactivate` path.
    pub async fn stop(&self, match_id: &str, now: DateTime<Utc>) -> bool {
        let Some(snapshot) = self.get_match(match_id).await else {
            return false;
        };
        self.deactivate(match_id, &snapshot, now).await;
        true
    }

    pub async fn remove_match(&self, match_id: &str, now: DateTime<Utc>) -> bool {
        if self.get_match(match_id).await.is_none() {
            return false;
        }
        self.stop(match_id, now).await;
        self.matches.write().await.remove(match_id);
        true
    }

    pub async fn remove_all(&self, now: DateTime<Utc>) {
        for id in self.match_ids().await {
            self.remove_match(&id, now).await;
        }
    }

    pub async fn update_settings(
        &self,
        match_id: &str,
        edge_min: Option<u8>,
        order_size: Option<u32>,
        inventory_cap: Option<i64>,
    ) -> bool {
        let mut matches = self.matches.write().await;
        let Some(m) = matches.get_mut(match_id) else {
            return false;
        };
        if let Some(v) = edge_min {
            m.edge_min = v;
        }
        if let Some(v) = order_size {
            m.order_size = v;
        }
        if let Some(v) = inventory_cap {
            m.inventory_cap = v;
        }
        true
    }

    /// Recomputes both legs' theo from freshly supplied odds, per §4.1.
    pub async fn update_odds(&self, match_id: &str, odds_a: f64, odds_b: f64, odds_draw: Option<f64>) -> bool {
        let theo = match odds_draw {
            Some(draw) => crate::theo::TheoEngine::three_way(odds_a, odds_b, Some(draw)),
            None => crate::theo::TheoEngine::two_way(odds_a, odds_b),
        };
        let mut matches = self.matches.write().await;
        let Some(m) = matches.get_mut(match_id) else {
            return false;
        };
        m.odds_a = odds_a;
        m.odds_b = odds_b;
        m.market_a.theo = theo.theo_a;
        m.market_b.theo = theo.theo_b;
        true
    }

    /// Reconciles the in-memory ledger against the venue's authoritative
    /// position listing, for matches whose tickers the venue reports.
    pub async fn sync_inventory(&self, gateway: &dyn crate::gateway::ExchangeGateway) -> Result<usize, crate::error::GatewayError> {
        let positions = gateway.get_positions().await?;
        let by_ticker: HashMap<&str, i64> = positions.iter().map(|(t, p)| (t.as_str(), *p)).collect();
        let mut synced = 0;
        let matches = self.matches.read().await;
        for m in matches.values() {
            let a_net = by_ticker.get(m.market_a.ticker.as_str());
            let b_net = by_ticker.get(m.market_b.ticker.as_str());
            if a_net.is_none() && b_net.is_none() {
                continue;
            }
            let a_net = a_net.copied().unwrap_or(0);
            let b_net = b_net.copied().unwrap_or(0);
            let update = crate::inventory::PositionUpdate {
                a_yes: a_net.max(0),
                a_no: (-a_net).max(0),
                b_yes: b_net.max(0),
                b_no: (-b_net).max(0),
            };
            self.inventory.lock().await.apply_position_update(&m.id, update);
            synced += 1;
        }
        Ok(synced)
    }

    pub async fn cancel_all(&self) {
        self.reconciler.cancel_all().await;
    }

    pub fn books(&self) -> &BookCache {
        &self.books
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GatewayError;
    use crate::gateway::{ExchangeGateway, MarketMetadata, OrderbookSnapshot, PlaceOrderRequest, PlacedOrder};
    use crate::types::{CostBasis, Market, Side};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct FakeGateway {
        place_calls: AtomicUsize,
        cancel_calls: AtomicUsize,
    }

    impl FakeGateway {
        fn new() -> Self {
            Self {
                place_calls: AtomicUsize::new(0),
                cancel_calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ExchangeGateway for FakeGateway {
        async fn place_order(&self, req: PlaceOrderRequest) -> Result<PlacedOrder, GatewayError> {
            let n = self.place_calls.fetch_add(1, Ordering::SeqCst);
            Ok(PlacedOrder {
                order_id: format!("{}-{}", req.ticker, n),
            })
        }
        async fn cancel_order(&self, _order_id: &str) -> Result<(), GatewayError> {
            self.cancel_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        async fn list_resting_orders(&self) -> Result<Vec<PlacedOrder>, GatewayError> {
            Ok(vec![])
        }
        async fn get_market(&self, _ticker: &str) -> Result<MarketMetadata, GatewayError> {
            unimplemented!()
        }
        async fn get_orderbook(&self, _ticker: &str) -> Result<OrderbookSnapshot, GatewayError> {
            unimplemented!()
        }
        async fn get_positions(&self) -> Result<Vec<(String, i64)>, GatewayError> {
            Ok(vec![])
        }
        async fn get_balance(&self) -> Result<i64, GatewayError> {
            Ok(0)
        }
    }

    fn sample_match(id: &str, event_time: DateTime<Utc>) -> Match {
        let mut market_a = Market::new(format!("{id}-A"), "Team A", 60);
        market_a.book.best_yes_bid = 52;
        market_a.book.best_yes_bid_qty = 10;
        let mut market_b = Market::new(format!("{id}-B"), "Team B", 40);
        market_b.book.best_yes_bid = 30;
        market_b.book.best_yes_bid_qty = 10;
        Match {
            id: id.to_string(),
            display_name: "Team A vs Team B".into(),
            category: "sports".into(),
            market_a,
            market_b,
            odds_a: 1.6,
            odds_b: 2.4,
            edge_min: 2,
            order_size: 5,
            inventory_cap: 10,
            event_time,
            active: true,
            inventory: 0,
            long_a: CostBasis::default(),
            long_b: CostBasis::default(),
            market_url: None,
        }
    }

    fn world() -> (World, Arc<FakeGateway>) {
        let gateway = Arc::new(FakeGateway::new());
        let reconciler = Arc::new(OrderReconciler::new(gateway.clone(), 8, Duration::from_secs(5)));
        (World::new(reconciler, 2, Duration::from_secs(30)), gateway)
    }

    #[tokio::test]
    async fn evaluates_all_four_legs_and_places_orders() {
        let (world, gateway) = world();
        let now = Utc::now();
        world.upsert_match(sample_match("m1", now + ChronoDuration::hours(1))).await;

        world.evaluate_match("m1", now).await;

        assert_eq!(gateway.place_calls.load(Ordering::SeqCst), 4);
    }

    /// S6. Event-time cutoff: match deactivates and its orders are cancelled
    /// within one tick; subsequent evaluations are no-ops.
    #[tokio::test]
    async fn s6_event_time_cutoff_cancels_and_deactivates() {
        let (world, gateway) = world();
        let now = Utc::now();
        world.upsert_match(sample_match("m1", now + ChronoDuration::seconds(1))).await;

        world.evaluate_match("m1", now).await;
        assert_eq!(gateway.place_calls.load(Ordering::SeqCst), 4);

        let past_event = now + ChronoDuration::seconds(2);
        world.evaluate_match("m1", past_event).await;
        assert_eq!(gateway.cancel_calls.load(Ordering::SeqCst), 4);
        assert!(!world.get_match("m1").await.unwrap().active);

        // Second post-cutoff tick is a no-op: no further cancel calls.
        world.evaluate_match("m1", past_event).await;
        assert_eq!(gateway.cancel_calls.load(Ordering::SeqCst), 4);
    }

    /// S5. At inventory cap, the over-exposed side gates out while the
    /// opposite exposure's legs keep quoting, eligible for the rebalance
    /// breakeven override.
    #[tokio::test]
    async fn s5_inventory_cap_gates_one_side_and_rebalances_the_other() {
        let (world, gateway) = world();
        let now = Utc::now();
        world.upsert_match(sample_match("m1", now + ChronoDuration::hours(1))).await;

        {
            let mut inv = world.inventory.lock().await;
            inv.apply_fill("m1", Leg::new(Outcome::A, Side::Yes), 70, 10);
            inv.apply_position_update(
                "m1",
                crate::inventory::PositionUpdate {
                    a_yes: 10,
                    a_no: 0,
                    b_yes: 0,
                    b_no: 0,
                },
            );
        }

        world.evaluate_match("m1", now).await;

        // long_a legs (A-YES) are gated out; long_b legs (B-YES, A-NO) still place.
        assert_eq!(gateway.place_calls.load(Ordering::SeqCst), 2);
    }

    /// S5 contrast case: avg_cost_A=55 -> breakeven_for_B=42, which exceeds
    /// B's own theo of 40. The rebalance ceiling must elevate to 42, not
    /// collapse to theo (40) the way a saturating edge_min delta would.
    #[tokio::test]
    async fn s5_contrast_rebalance_ceiling_elevates_above_theo_when_breakeven_exceeds_it() {
        let (world, _gateway) = world();
        let now = Utc::now();
        let mut m = sample_match("m1", now + ChronoDuration::hours(1));
        m.market_b.book.best_yes_bid = 41;
        m.market_b.book.best_yes_bid_qty = 10;
        world.upsert_match(m.clone()).await;

        {
            let mut inv = world.inventory.lock().await;
            inv.apply_fill("m1", Leg::new(Outcome::A, Side::Yes), 55, 1);
            inv.apply_position_update(
                "m1",
                crate::inventory::PositionUpdate {
                    a_yes: 10,
                    a_no: 0,
                    b_yes: 0,
                    b_no: 0,
                },
            );
        }
        let inv = world.inventory.lock().await.get("m1");

        let target = world.target_for_leg(&m, Leg::new(Outcome::B, Side::Yes), &inv);
        assert_eq!(target, ReconcileTarget::Price(42));
    }

    #[tokio::test]
    async fn reactivate_only_works_before_event_time() {
        let (world, _gateway) = world();
        let now = Utc::now();
        let mut m = sample_match("m1", now + ChronoDuration::hours(1));
        m.active = false;
        world.upsert_match(m).await;

        assert!(world.reactivate("m1", now).await);
        assert!(world.get_match("m1").await.unwrap().active);

        let mut m2 = sample_match("m2", now - ChronoDuration::seconds(1));
        m2.active = false;
        world.upsert_match(m2).await;
        assert!(!world.reactivate("m2", now).await);
    }
}
