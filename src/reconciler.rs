//! Maintains the resting-order map keyed by `(match, ticker, side)`, applies
//! per-key serialization and overbid-cancel hysteresis, and drives the
//! gateway's place/cancel calls. Concurrent evaluations for different keys
//! proceed in parallel; the same key is single-threaded (§4.4, §5).

use crate::error::{GatewayError, ReconcileError};
use crate::gateway::{ExchangeGateway, PlaceOrderRequest};
use crate::types::{OrderKey, RestingOrder};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{info, warn};

/// Reconciliation target for one leg, after the quoting core has applied
/// inventory gating and rebalance ceilings to the pricer's raw output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileTarget {
    Gated,
    BackOff,
    Price(u8),
}

struct KeyLock {
    mutex: tokio::sync::Mutex<()>,
}

/// Per-key serialization locks plus the resting-order map they guard. The
/// lock table itself is protected by a short-held std mutex; the per-key
/// locks are tokio mutexes held across the gateway calls they serialize.
pub struct OrderReconciler {
    gateway: Arc<dyn ExchangeGateway>,
    resting: Mutex<HashMap<OrderKey, RestingOrder>>,
    key_locks: Mutex<HashMap<OrderKey, Arc<KeyLock>>>,
    worker_permits: Arc<Semaphore>,
    overbid_cancel_delay: Mutex<Duration>,
}

impl OrderReconciler {
    pub fn new(gateway: Arc<dyn ExchangeGateway>, workers: usize, overbid_cancel_delay: Duration) -> Self {
        Self {
            gateway,
            resting: Mutex::new(HashMap::new()),
            key_locks: Mutex::new(HashMap::new()),
            worker_permits: Arc::new(Semaphore::new(workers.max(1))),
            overbid_cancel_delay: Mutex::new(overbid_cancel_delay),
        }
    }

    /// Applied to the next hysteresis check; in-flight overbid timers are
    /// unaffected (§9 "operator-tunable" note).
    pub fn set_overbid_cancel_delay(&self, delay: Duration) {
        *self.overbid_cancel_delay.lock().unwrap() = delay;
    }

    fn key_lock(&self, key: &OrderKey) -> Arc<KeyLock> {
        let mut locks = self.key_locks.lock().unwrap();
        locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(KeyLock { mutex: tokio::sync::Mutex::new(()) }))
            .clone()
    }

    pub fn resting_order(&self, key: &OrderKey) -> Option<RestingOrder> {
        self.resting.lock().unwrap().get(key).cloned()
    }

    pub fn all_resting(&self) -> Vec<RestingOrder> {
        self.resting.lock().unwrap().values().cloned().collect()
    }

    /// Diffs `target` against the current resting order for `key` and issues
    /// the minimal place/cancel calls to converge, holding the per-key lock
    /// for the duration. Bounded by the worker-pool semaphore (§5).
    pub async fn reconcile(
        &self,
        key: OrderKey,
        target: ReconcileTarget,
        size: u32,
        expiration: DateTime<Utc>,
    ) -> Result<(), ReconcileError> {
        let lock = self.key_lock(&key);
        let _permit = self.worker_permits.acquire().await.expect("semaphore never closed");
        let _guard = lock.mutex.lock().await;

        match target {
            ReconcileTarget::Gated => self.handle_gated(&key).await,
            ReconcileTarget::BackOff => self.handle_back_off(&key).await,
            ReconcileTarget::Price(price) => self.handle_price(&key, price, size, expiration).await,
        }
    }

    async fn handle_gated(&self, key: &OrderKey) -> Result<(), ReconcileError> {
        if let Some(order) = self.take_resting(key) {
            self.cancel(key, &order.order_id).await?;
        }
        Ok(())
    }

    async fn handle_back_off(&self, key: &OrderKey) -> Result<(), ReconcileError> {
        let now = Instant::now();
        let order_id = {
            let mut resting = self.resting.lock().unwrap();
            let Some(order) = resting.get_mut(key) else {
                return Ok(());
            };
            let overbid_since = *order.overbid_since.get_or_insert(now);
            let elapsed = now.duration_since(overbid_since);
            if elapsed < *self.overbid_cancel_delay.lock().unwrap() {
                return Ok(());
            }
            order.order_id.clone()
        };
        self.take_resting(key);
        self.cancel(key, &order_id).await
    }

    async fn handle_price(
        &self,
        key: &OrderKey,
        price: u8,
        size: u32,
        expiration: DateTime<Utc>,
    ) -> Result<(), ReconcileError> {
        self.clear_overbid(key);

        if let Some(existing) = self.resting_order(key) {
            if existing.price == price && existing.size == size {
                return Ok(()); // already converged, idempotent no-op
            }
            self.cancel(key, &existing.order_id).await?;
            self.take_resting(key);
        }

        let placed = self
            .gateway
            .place_order(PlaceOrderRequest {
                ticker: key.ticker.clone(),
                side: key.side,
                price,
                count: size,
                expiration,
            })
            .await
            .map_err(ReconcileError::Gateway)?;

        let order = RestingOrder {
            order_id: placed.order_id,
            match_id: key.match_id.clone(),
            ticker: key.ticker.clone(),
            side: key.side,
            price,
            size,
            placed_at: Instant::now(),
            filled_count: 0,
            overbid_since: None,
        };
        self.resting.lock().unwrap().insert(key.clone(), order);
        Ok(())
    }

    async fn cancel(&self, key: &OrderKey, order_id: &str) -> Result<(), ReconcileError> {
        match self.gateway.cancel_order(order_id).await {
            Ok(()) => Ok(()),
            Err(err) if err.is_cancel_race() => {
                warn!(?key, order_id, "cancel race, treating as success");
                Ok(())
            }
            Err(GatewayError::Transient(msg)) => {
                info!(?key, order_id, error = %msg, "transient cancel failure, leaving map unchanged");
                Err(ReconcileError::Gateway(GatewayError::Transient(msg)))
            }
            Err(err) => Err(ReconcileError::Gateway(err)),
        }
    }

    fn take_resting(&self, key: &OrderKey) -> Option<RestingOrder> {
        self.resting.lock().unwrap().remove(key)
    }

    fn clear_overbid(&self, key: &OrderKey) {
        if let Some(order) = self.resting.lock().unwrap().get_mut(key) {
            order.overbid_since = None;
        }
    }

    /// Emergency mass-cancel: the local map union the exchange's own
    /// resting-orders listing, cancelled with bounded parallelism. Guarded by
    /// a one-shot flag at the call site (§7); idempotent to call again.
    pub async fn cancel_all(&self) {
        let mut order_ids: Vec<String> = self
            .resting
            .lock()
            .unwrap()
            .values()
            .map(|o| o.order_id.clone())
            .collect();

        match self.gateway.list_resting_orders().await {
            Ok(remote) => {
                for order in remote {
                    if !order_ids.contains(&order.order_id) {
                        order_ids.push(order.order_id);
                    }
                }
            }
            Err(err) => warn!(error = %err, "failed to list remote resting orders during emergency cancel"),
        }

        let permits = self.worker_permits.clone();
        let gateway = self.gateway.clone();
        let mut tasks = Vec::new();
        for order_id in order_ids {
            let permits = permits.clone();
            let gateway = gateway.clone();
            tasks.push(tokio::spawn(async move {
                let _permit = permits.acquire().await.expect("semaphore never closed");
                if let Err(err) = gateway.cancel_order(&order_id).await {
                    if !err.is_cancel_race() {
                        warn!(order_id, error = %err, "emergency cancel failed for order");
                    }
                }
            }));
        }
        for task in tasks {
            let _ = task.await;
        }
        self.resting.lock().unwrap().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{MarketMetadata, OrderbookSnapshot, PlacedOrder};
    use crate::types::Side;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

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

    fn key() -> OrderKey {
        OrderKey::new("m1", "T-A", Side::Yes)
    }

    #[tokio::test]
    async fn identical_price_and_size_is_a_noop() {
        let gateway = Arc::new(FakeGateway::new());
        let reconciler = OrderReconciler::new(gateway.clone(), 4, Duration::from_secs(10));
        let exp = Utc::now();

        reconciler.reconcile(key(), ReconcileTarget::Price(53), 5, exp).await.unwrap();
        reconciler.reconcile(key(), ReconcileTarget::Price(53), 5, exp).await.unwrap();

        assert_eq!(gateway.place_calls.load(Ordering::SeqCst), 1);
        assert_eq!(gateway.cancel_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn different_price_cancels_and_replaces() {
        let gateway = Arc::new(FakeGateway::new());
        let reconciler = OrderReconciler::new(gateway.clone(), 4, Duration::from_secs(10));
        let exp = Utc::now();

        reconciler.reconcile(key(), ReconcileTarget::Price(53), 5, exp).await.unwrap();
        reconciler.reconcile(key(), ReconcileTarget::Price(54), 5, exp).await.unwrap();

        assert_eq!(gateway.place_calls.load(Ordering::SeqCst), 2);
        assert_eq!(gateway.cancel_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn gated_cancels_existing_order() {
        let gateway = Arc::new(FakeGateway::new());
        let reconciler = OrderReconciler::new(gateway.clone(), 4, Duration::from_secs(10));
        let exp = Utc::now();

        reconciler.reconcile(key(), ReconcileTarget::Price(53), 5, exp).await.unwrap();
        reconciler.reconcile(key(), ReconcileTarget::Gated, 5, exp).await.unwrap();

        assert!(reconciler.resting_order(&key()).is_none());
        assert_eq!(gateway.cancel_calls.load(Ordering::SeqCst), 1);
    }

    /// S4. Overbid hysteresis: order survives until overbid_cancel_delay elapses.
    #[tokio::test]
    async fn s4_overbid_hysteresis_delays_cancel() {
        let gateway = Arc::new(FakeGateway::new());
        let reconciler = OrderReconciler::new(gateway.clone(), 4, Duration::from_millis(50));
        let exp = Utc::now();

        reconciler.reconcile(key(), ReconcileTarget::Price(57), 5, exp).await.unwrap();
        reconciler.reconcile(key(), ReconcileTarget::BackOff, 5, exp).await.unwrap();
        assert!(reconciler.resting_order(&key()).is_some());
        assert_eq!(gateway.cancel_calls.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(60)).await;
        reconciler.reconcile(key(), ReconcileTarget::BackOff, 5, exp).await.unwrap();
        assert!(reconciler.resting_order(&key()).is_none());
        assert_eq!(gateway.cancel_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancel_all_clears_the_map() {
        let gateway = Arc::new(FakeGateway::new());
        let reconciler = OrderReconciler::new(gateway.clone(), 4, Duration::from_secs(10));
        let exp = Utc::now();
        reconciler.reconcile(key(), ReconcileTarget::Price(53), 5, exp).await.unwrap();

        reconciler.cancel_all().await;

        assert!(reconciler.all_resting().is_empty());
    }
}
