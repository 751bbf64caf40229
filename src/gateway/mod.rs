//! The exchange gateway boundary: a thin adapter providing signed REST calls
//! and an authenticated streaming subscription. The core treats this as a
//! capability (a trait object), never reaching into a concrete client.

pub mod kalshi;
pub mod stream;

use crate::error::GatewayError;
use crate::inventory::PositionUpdate;
use crate::types::{Fill, Side};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// One price level, as returned by the orderbook REST endpoint and the
/// streaming snapshot/delta payloads.
#[derive(Debug, Clone, Copy)]
pub struct Level {
    pub price: u8,
    pub qty: u32,
}

#[derive(Debug, Clone)]
pub struct OrderbookSnapshot {
    pub ticker: String,
    pub yes: Vec<Level>,
    pub no: Vec<Level>,
}

#[derive(Debug, Clone)]
pub struct OrderbookDelta {
    pub ticker: String,
    pub yes: Vec<Level>,
    pub no: Vec<Level>,
}

/// Tagged sum of every event the streaming subscription can yield, fanned
/// out into typed handlers instead of duck-typed dispatch on a payload map.
#[derive(Debug, Clone)]
pub enum Event {
    OrderbookSnapshot(OrderbookSnapshot),
    OrderbookDelta(OrderbookDelta),
    Fill(Fill),
    PositionUpdate { ticker: String, update: PositionUpdate },
}

#[derive(Debug, Clone)]
pub struct PlaceOrderRequest {
    pub ticker: String,
    pub side: Side,
    pub price: u8,
    pub count: u32,
    pub expiration: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct PlacedOrder {
    pub order_id: String,
}

#[derive(Debug, Clone)]
pub struct MarketMetadata {
    pub ticker: String,
    pub title: String,
    pub event_time: DateTime<Utc>,
}

/// Signed-REST-plus-streaming capability consumed by the quoting engine.
/// A concrete Kalshi-style implementation lives in `kalshi`; tests use a
/// hand-rolled fake implementing this same trait.
#[async_trait]
pub trait ExchangeGateway: Send + Sync {
    async fn place_order(&self, req: PlaceOrderRequest) -> Result<PlacedOrder, GatewayError>;
    async fn cancel_order(&self, order_id: &str) -> Result<(), GatewayError>;
    async fn list_resting_orders(&self) -> Result<Vec<PlacedOrder>, GatewayError>;
    async fn get_market(&self, ticker: &str) -> Result<MarketMetadata, GatewayError>;
    async fn get_orderbook(&self, ticker: &str) -> Result<OrderbookSnapshot, GatewayError>;
    /// Authoritative net position per ticker (positive = long yes, negative =
    /// long no), used to reconcile the in-memory ledger against the venue.
    async fn get_positions(&self) -> Result<Vec<(String, i64)>, GatewayError>;
    /// Available balance, in cents. Queried once at startup as an
    /// authentication check (§7: failure here is fatal).
    async fn get_balance(&self) -> Result<i64, GatewayError>;
}
