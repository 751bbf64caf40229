//! Concrete signed-REST adapter to a Kalshi-style exchange: asymmetric-key
//! request signing, reqwest REST calls, JSON wire shapes per §6.

use super::{ExchangeGateway, Level, MarketMetadata, OrderbookSnapshot, PlaceOrderRequest, PlacedOrder};
use crate::error::GatewayError;
use crate::types::Side;
use async_trait::async_trait;
use base64::Engine;
use chrono::Utc;
use rsa::pkcs8::DecodePrivateKey;
use rsa::signature::{RandomizedSigner, SignatureEncoding};
use rsa::{pss::SigningKey, RsaPrivateKey};
use sha2::Sha256;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

pub struct KalshiGateway {
    client: reqwest::Client,
    base_url: String,
    key_id: String,
    signing_key: SigningKey<Sha256>,
}

impl KalshiGateway {
    pub fn new(base_url: impl Into<String>, key_id: impl Into<String>, private_key_pem: &str) -> anyhow::Result<Self> {
        let private_key = RsaPrivateKey::from_pkcs8_pem(private_key_pem)
            .map_err(|e| anyhow::anyhow!("failed to parse exchange private key: {e}"))?;
        let signing_key = SigningKey::<Sha256>::new(private_key);
        Ok(Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            key_id: key_id.into(),
            signing_key,
        })
    }

    /// Signature over `timestamp || method || path-without-query`, per §6.
    fn sign(&self, timestamp_ms: &str, method: &str, path_without_query: &str) -> String {
        let message = format!("{timestamp_ms}{method}{path_without_query}");
        let mut rng = rand::thread_rng();
        let signature = self.signing_key.sign_with_rng(&mut rng, message.as_bytes());
        base64::engine::general_purpose::STANDARD.encode(signature.to_bytes())
    }

    fn signed_headers(&self, method: &str, path_without_query: &str) -> (String, String, String) {
        let timestamp_ms = Utc::now().timestamp_millis().to_string();
        let signature = self.sign(&timestamp_ms, method, path_without_query);
        (self.key_id.clone(), signature, timestamp_ms)
    }

    fn request(&self, method: reqwest::Method, path_without_query: &str) -> reqwest::RequestBuilder {
        let (key_id, signature, timestamp) = self.signed_headers(method.as_str(), path_without_query);
        let url = format!("{}{}", self.base_url, path_without_query);
        self.client
            .request(method, url)
            .header("KALSHI-ACCESS-KEY", key_id)
            .header("KALSHI-ACCESS-SIGNATURE", signature)
            .header("KALSHI-ACCESS-TIMESTAMP", timestamp)
    }

    fn classify_status(status: reqwest::StatusCode, body: &str) -> GatewayError {
        if status.is_server_error() || status == reqwest::StatusCode::REQUEST_TIMEOUT {
            GatewayError::Transient(format!("{status}: {body}"))
        } else {
            GatewayError::LogicalReject(format!("{status}: {body}"))
        }
    }
}

#[derive(Debug, Serialize)]
struct PlaceOrderBody {
    ticker: String,
    action: &'static str,
    side: &'static str,
    r#type: &'static str,
    count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    yes_price: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    no_price: Option<u8>,
    expiration_ts: i64,
}

#[derive(Debug, Deserialize)]
struct PlaceOrderResponseEnvelope {
    order: PlaceOrderResponseOrder,
}

#[derive(Debug, Deserialize)]
struct PlaceOrderResponseOrder {
    order_id: String,
}

#[derive(Debug, Deserialize)]
struct OrderbookEnvelope {
    orderbook: OrderbookLevels,
}

#[derive(Debug, Deserialize)]
struct OrderbookLevels {
    #[serde(default)]
    yes: Vec<[i64; 2]>,
    #[serde(default)]
    no: Vec<[i64; 2]>,
}

#[derive(Debug, Deserialize)]
struct MarketEnvelope {
    market: MarketBody,
}

#[derive(Debug, Deserialize)]
struct MarketBody {
    ticker: String,
    title: String,
    close_time: chrono::DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct RestingOrdersEnvelope {
    orders: Vec<RestingOrderBody>,
}

#[derive(Debug, Deserialize)]
struct RestingOrderBody {
    order_id: String,
}

#[derive(Debug, Deserialize)]
struct PositionsEnvelope {
    #[serde(default)]
    market_positions: Vec<MarketPositionBody>,
}

#[derive(Debug, Deserialize)]
struct MarketPositionBody {
    ticker: String,
    position: i64,
}

#[derive(Debug, Deserialize)]
struct BalanceEnvelope {
    balance: i64,
}

#[async_trait]
impl ExchangeGateway for KalshiGateway {
    async fn place_order(&self, req: PlaceOrderRequest) -> Result<PlacedOrder, GatewayError> {
        let path = "/portfolio/orders";
        let body = PlaceOrderBody {
            ticker: req.ticker.clone(),
            action: "buy",
            side: req.side.as_str(),
            r#type: "limit",
            count: req.count,
            yes_price: matches!(req.side, Side::Yes).then_some(req.price),
            no_price: matches!(req.side, Side::No).then_some(req.price),
            expiration_ts: req.expiration.timestamp(),
        };
        let resp = self
            .request(reqwest::Method::POST, path)
            .json(&body)
            .send()
            .await
            .map_err(|e| GatewayError::Transient(e.to_string()))?;
        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            debug!(%status, %text, ticker = %req.ticker, "order placement rejected");
            return Err(Self::classify_status(status, &text));
        }
        let parsed: PlaceOrderResponseEnvelope = serde_json::from_str(&text)
            .map_err(|e| GatewayError::LogicalReject(format!("unparseable response: {e}")))?;
        Ok(PlacedOrder {
            order_id: parsed.order.order_id,
        })
    }

    async fn cancel_order(&self, order_id: &str) -> Result<(), GatewayError> {
        let path = format!("/portfolio/orders/{order_id}");
        let resp = self
            .request(reqwest::Method::DELETE, &path)
            .send()
            .await
            .map_err(|e| GatewayError::Transient(e.to_string()))?;
        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }
        if status == reqwest::StatusCode::NOT_FOUND {
            // Cancel race: already filled or already cancelled. Treat as success.
            warn!(order_id, "cancel race: order already gone");
            return Ok(());
        }
        let text = resp.text().await.unwrap_or_default();
        Err(Self::classify_status(status, &text))
    }

    async fn list_resting_orders(&self) -> Result<Vec<PlacedOrder>, GatewayError> {
        let resp = self
            .request(reqwest::Method::GET, "/portfolio/orders?status=resting")
            .send()
            .await
            .map_err(|e| GatewayError::Transient(e.to_string()))?;
        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(Self::classify_status(status, &text));
        }
        let parsed: RestingOrdersEnvelope = serde_json::from_str(&text)
            .map_err(|e| GatewayError::Transient(format!("unparseable response: {e}")))?;
        Ok(parsed
            .orders
            .into_iter()
            .map(|o| PlacedOrder { order_id: o.order_id })
            .collect())
    }

    async fn get_market(&self, ticker: &str) -> Result<MarketMetadata, GatewayError> {
        let path = format!("/markets/{ticker}");
        let resp = self
            .request(reqwest::Method::GET, &path)
            .send()
            .await
            .map_err(|e| GatewayError::Transient(e.to_string()))?;
        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(Self::classify_status(status, &text));
        }
        let parsed: MarketEnvelope = serde_json::from_str(&text)
            .map_err(|e| GatewayError::Transient(format!("unparseable response: {e}")))?;
        Ok(MarketMetadata {
            ticker: parsed.market.ticker,
            title: parsed.market.title,
            event_time: parsed.market.close_time,
        })
    }

    async fn get_orderbook(&self, ticker: &str) -> Result<OrderbookSnapshot, GatewayError> {
        let path = format!("/markets/{ticker}/orderbook");
        let resp = self
            .request(reqwest::Method::GET, &path)
            .send()
            .await
            .map_err(|e| GatewayError::Transient(e.to_string()))?;
        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(Self::classify_status(status, &text));
        }
        let parsed: OrderbookEnvelope = serde_json::from_str(&text)
            .map_err(|e| GatewayError::Transient(format!("unparseable response: {e}")))?;
        let to_levels = |raw: Vec<[i64; 2]>| -> Vec<Level> {
            raw.into_iter()
                .map(|[price, qty]| Level {
                    price: price.clamp(0, 99) as u8,
                    qty: qty.max(0) as u32,
                })
                .collect()
        };
        Ok(OrderbookSnapshot {
            ticker: ticker.to_string(),
            yes: to_levels(parsed.orderbook.yes),
            no: to_levels(parsed.orderbook.no),
        })
    }

    async fn get_positions(&self) -> Result<Vec<(String, i64)>, GatewayError> {
        let resp = self
            .request(reqwest::Method::GET, "/portfolio/positions")
            .send()
            .await
            .map_err(|e| GatewayError::Transient(e.to_string()))?;
        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(Self::classify_status(status, &text));
        }
        let parsed: PositionsEnvelope = serde_json::from_str(&text)
            .map_err(|e| GatewayError::Transient(format!("unparseable response: {e}")))?;
        Ok(parsed.market_positions.into_iter().map(|p| (p.ticker, p.position)).collect())
    }

    async fn get_balance(&self) -> Result<i64, GatewayError> {
        let resp = self
            .request(reqwest::Method::GET, "/portfolio/balance")
            .send()
            .await
            .map_err(|e| GatewayError::Transient(e.to_string()))?;
        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(Self::classify_status(status, &text));
        }
        let parsed: BalanceEnvelope = serde_json::from_str(&text)
            .map_err(|e| GatewayError::Transient(format!("unparseable response: {e}")))?;
        Ok(parsed.balance)
    }
}

